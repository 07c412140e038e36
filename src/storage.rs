use crate::Result;
use crate::word::{Difficulty, WordInfo};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

/// 已保存的单词
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Word {
    pub id: u64,
    pub word_list_id: u64,
    pub word: String,
    pub definition: String,
}

/// 已保存的单词表
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WordList {
    pub id: u64,
    pub title: String,
    pub difficulty: Difficulty,
    pub created_at: DateTime<Utc>,
    pub words: Vec<Word>,
}

impl WordList {
    pub fn word_infos(&self) -> Vec<WordInfo> {
        self.words
            .iter()
            .map(|w| WordInfo::new(w.word.clone(), w.definition.clone()))
            .collect()
    }

    pub fn word_texts(&self) -> Vec<String> {
        self.words.iter().map(|w| w.word.clone()).collect()
    }
}

fn storage_err(e: impl std::fmt::Display) -> crate::Error {
    crate::Error::Storage(e.to_string())
}

/// 单词表存储，未配置 Redis 时使用内存
pub enum Storage {
    Memory(MemoryStore),
    Redis(RedisStore),
}

impl Storage {
    pub fn memory() -> Self {
        Storage::Memory(MemoryStore::new())
    }

    pub async fn connect(redis_url: Option<&str>) -> Result<Self> {
        match redis_url {
            Some(url) => Ok(Storage::Redis(RedisStore::new(url).await?)),
            None => Ok(Self::memory()),
        }
    }

    pub async fn create_word_list(
        &self,
        title: &str,
        difficulty: Difficulty,
        words: &[WordInfo],
    ) -> Result<WordList> {
        match self {
            Storage::Memory(store) => Ok(store.create_word_list(title, difficulty, words)),
            Storage::Redis(store) => store.create_word_list(title, difficulty, words).await,
        }
    }

    pub async fn get_word_list(&self, id: u64) -> Result<Option<WordList>> {
        match self {
            Storage::Memory(store) => Ok(store.get_word_list(id)),
            Storage::Redis(store) => store.get_word_list(id).await,
        }
    }

    pub async fn find_by_title(&self, title: &str) -> Result<Option<WordList>> {
        match self {
            Storage::Memory(store) => Ok(store.find_by_title(title)),
            Storage::Redis(store) => store.find_by_title(title).await,
        }
    }

    pub async fn list_word_lists(&self) -> Result<Vec<WordList>> {
        match self {
            Storage::Memory(store) => Ok(store.list_word_lists()),
            Storage::Redis(store) => store.list_word_lists().await,
        }
    }

    /// 追加单词，单词表不存在时返回 `None`
    pub async fn append_words(&self, id: u64, words: &[WordInfo]) -> Result<Option<WordList>> {
        match self {
            Storage::Memory(store) => Ok(store.append_words(id, words)),
            Storage::Redis(store) => store.append_words(id, words).await,
        }
    }

    pub async fn get_word(&self, id: u64) -> Result<Option<Word>> {
        match self {
            Storage::Memory(store) => Ok(store.get_word(id)),
            Storage::Redis(store) => store.get_word(id).await,
        }
    }
}

pub struct MemoryStore {
    lists: DashMap<u64, WordList>,
    words: DashMap<u64, Word>,
    next_list_id: AtomicU64,
    next_word_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            lists: DashMap::new(),
            words: DashMap::new(),
            next_list_id: AtomicU64::new(1),
            next_word_id: AtomicU64::new(1),
        }
    }

    fn new_words(&self, list_id: u64, words: &[WordInfo]) -> Vec<Word> {
        words
            .iter()
            .map(|info| {
                let word = Word {
                    id: self.next_word_id.fetch_add(1, Ordering::SeqCst),
                    word_list_id: list_id,
                    word: info.word.clone(),
                    definition: info.definition.clone(),
                };
                self.words.insert(word.id, word.clone());
                word
            })
            .collect()
    }

    fn create_word_list(&self, title: &str, difficulty: Difficulty, words: &[WordInfo]) -> WordList {
        let id = self.next_list_id.fetch_add(1, Ordering::SeqCst);
        let list = WordList {
            id,
            title: title.to_string(),
            difficulty,
            created_at: Utc::now(),
            words: self.new_words(id, words),
        };
        self.lists.insert(id, list.clone());
        debug!("保存单词表 {} ({})", id, title);
        list
    }

    fn get_word_list(&self, id: u64) -> Option<WordList> {
        self.lists.get(&id).map(|entry| entry.value().clone())
    }

    fn find_by_title(&self, title: &str) -> Option<WordList> {
        self.lists
            .iter()
            .filter(|entry| entry.title == title)
            .min_by_key(|entry| entry.id)
            .map(|entry| entry.value().clone())
    }

    fn list_word_lists(&self) -> Vec<WordList> {
        let mut lists: Vec<WordList> = self.lists.iter().map(|e| e.value().clone()).collect();
        lists.sort_by_key(|list| list.id);
        lists
    }

    fn append_words(&self, id: u64, words: &[WordInfo]) -> Option<WordList> {
        let mut list = self.lists.get_mut(&id)?;
        let added = self.new_words(id, words);
        list.words.extend(added);
        Some(list.clone())
    }

    fn get_word(&self, id: u64) -> Option<Word> {
        self.words.get(&id).map(|entry| entry.value().clone())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

const LIST_IDS_KEY: &str = "word_lists";
const TITLE_INDEX_KEY: &str = "word_list:titles";
const NEXT_LIST_ID_KEY: &str = "word_list:next_id";
const NEXT_WORD_ID_KEY: &str = "word:next_id";

fn list_key(id: u64) -> String {
    format!("word_list:{}", id)
}

fn word_key(id: u64) -> String {
    format!("word:{}", id)
}

pub struct RedisStore {
    manager: Arc<Mutex<ConnectionManager>>,
}

impl RedisStore {
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).map_err(storage_err)?;
        let manager = ConnectionManager::new(client).await.map_err(storage_err)?;
        Ok(RedisStore {
            manager: Arc::new(Mutex::new(manager)),
        })
    }

    async fn save_words(
        &self,
        conn: &mut ConnectionManager,
        list_id: u64,
        words: &[WordInfo],
    ) -> Result<Vec<Word>> {
        let mut saved = Vec::with_capacity(words.len());
        for info in words {
            let id: u64 = conn.incr(NEXT_WORD_ID_KEY, 1).await.map_err(storage_err)?;
            let word = Word {
                id,
                word_list_id: list_id,
                word: info.word.clone(),
                definition: info.definition.clone(),
            };
            let value = serde_json::to_string(&word).map_err(storage_err)?;
            conn.set::<_, _, ()>(word_key(id), value)
                .await
                .map_err(storage_err)?;
            saved.push(word);
        }
        Ok(saved)
    }

    async fn save_list(&self, conn: &mut ConnectionManager, list: &WordList) -> Result<()> {
        let value = serde_json::to_string(list).map_err(storage_err)?;
        conn.set::<_, _, ()>(list_key(list.id), value)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn create_word_list(
        &self,
        title: &str,
        difficulty: Difficulty,
        words: &[WordInfo],
    ) -> Result<WordList> {
        let mut conn = self.manager.lock().await;
        let id: u64 = conn.incr(NEXT_LIST_ID_KEY, 1).await.map_err(storage_err)?;
        let saved = self.save_words(&mut conn, id, words).await?;

        let list = WordList {
            id,
            title: title.to_string(),
            difficulty,
            created_at: Utc::now(),
            words: saved,
        };
        self.save_list(&mut conn, &list).await?;
        conn.rpush::<_, _, ()>(LIST_IDS_KEY, id)
            .await
            .map_err(storage_err)?;
        conn.hset_nx::<_, _, _, ()>(TITLE_INDEX_KEY, title, id)
            .await
            .map_err(storage_err)?;

        debug!("保存单词表到 Redis: {} ({})", id, title);
        Ok(list)
    }

    async fn load_list(&self, conn: &mut ConnectionManager, id: u64) -> Result<Option<WordList>> {
        let value: Option<String> = conn.get(list_key(id)).await.map_err(storage_err)?;
        match value {
            Some(json) => Ok(Some(serde_json::from_str(&json).map_err(storage_err)?)),
            None => Ok(None),
        }
    }

    async fn get_word_list(&self, id: u64) -> Result<Option<WordList>> {
        let mut conn = self.manager.lock().await;
        self.load_list(&mut conn, id).await
    }

    async fn find_by_title(&self, title: &str) -> Result<Option<WordList>> {
        let mut conn = self.manager.lock().await;
        let id: Option<u64> = conn
            .hget(TITLE_INDEX_KEY, title)
            .await
            .map_err(storage_err)?;
        match id {
            Some(id) => self.load_list(&mut conn, id).await,
            None => Ok(None),
        }
    }

    async fn list_word_lists(&self) -> Result<Vec<WordList>> {
        let mut conn = self.manager.lock().await;
        let ids: Vec<u64> = conn
            .lrange(LIST_IDS_KEY, 0, -1)
            .await
            .map_err(storage_err)?;

        let mut lists = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(list) = self.load_list(&mut conn, id).await? {
                lists.push(list);
            }
        }
        Ok(lists)
    }

    async fn append_words(&self, id: u64, words: &[WordInfo]) -> Result<Option<WordList>> {
        let mut conn = self.manager.lock().await;
        let Some(mut list) = self.load_list(&mut conn, id).await? else {
            return Ok(None);
        };

        let saved = self.save_words(&mut conn, id, words).await?;
        list.words.extend(saved);
        self.save_list(&mut conn, &list).await?;
        Ok(Some(list))
    }

    async fn get_word(&self, id: u64) -> Result<Option<Word>> {
        let mut conn = self.manager.lock().await;
        let value: Option<String> = conn.get(word_key(id)).await.map_err(storage_err)?;
        match value {
            Some(json) => Ok(Some(serde_json::from_str(&json).map_err(storage_err)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ocean_words() -> Vec<WordInfo> {
        vec![
            WordInfo::new("Sea", "Large body of salt water"),
            WordInfo::new("Reef", "Ridge of coral"),
        ]
    }

    #[tokio::test]
    async fn create_and_fetch_word_list() {
        let storage = Storage::memory();
        let list = storage
            .create_word_list("Ocean", Difficulty::Easy, &ocean_words())
            .await
            .unwrap();

        assert_eq!(list.id, 1);
        assert_eq!(list.words.len(), 2);
        assert!(list.words.iter().all(|w| w.word_list_id == list.id));

        let fetched = storage.get_word_list(list.id).await.unwrap().unwrap();
        assert_eq!(fetched, list);
        assert!(storage.get_word_list(42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn find_by_title_returns_first_match() {
        let storage = Storage::memory();
        let first = storage
            .create_word_list("Ocean", Difficulty::Easy, &ocean_words())
            .await
            .unwrap();
        storage
            .create_word_list("Ocean", Difficulty::Hard, &[])
            .await
            .unwrap();

        let found = storage.find_by_title("Ocean").await.unwrap().unwrap();
        assert_eq!(found.id, first.id);
        assert!(storage.find_by_title("Space").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn append_words_extends_list_and_indexes_words() {
        let storage = Storage::memory();
        let list = storage
            .create_word_list("Ocean", Difficulty::Easy, &ocean_words())
            .await
            .unwrap();

        let updated = storage
            .append_words(list.id, &[WordInfo::new("Tide", "Rise and fall of water")])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.word_texts(), vec!["Sea", "Reef", "Tide"]);

        let tide = storage.get_word(updated.words[2].id).await.unwrap().unwrap();
        assert_eq!(tide.word, "Tide");
        assert_eq!(tide.word_list_id, list.id);

        assert!(storage.append_words(99, &[]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lists_are_sorted_by_id() {
        let storage = Storage::memory();
        for title in ["Ocean", "Space", "Forest"] {
            storage
                .create_word_list(title, Difficulty::Medium, &[])
                .await
                .unwrap();
        }
        let titles: Vec<String> = storage
            .list_word_lists()
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.title)
            .collect();
        assert_eq!(titles, vec!["Ocean", "Space", "Forest"]);
    }

    #[tokio::test]
    #[ignore = "需要本地 Redis: redis://127.0.0.1"]
    async fn redis_store_round_trip() {
        let storage = Storage::connect(Some("redis://127.0.0.1")).await.unwrap();
        // 标题带时间戳，避免和已有数据冲突
        let title = format!("Ocean {}", Utc::now().timestamp_micros());

        let first = storage
            .create_word_list(&title, Difficulty::Easy, &ocean_words())
            .await
            .unwrap();
        let second = storage
            .create_word_list(&title, Difficulty::Hard, &[])
            .await
            .unwrap();
        assert!(second.id > first.id);
        assert!(first.words[1].id > first.words[0].id);

        // 标题索引只记录第一张表
        let found = storage.find_by_title(&title).await.unwrap().unwrap();
        assert_eq!(found.id, first.id);

        let updated = storage
            .append_words(first.id, &[WordInfo::new("Tide", "Rise and fall of water")])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.word_texts(), vec!["Sea", "Reef", "Tide"]);

        let reloaded = storage.get_word_list(first.id).await.unwrap().unwrap();
        assert_eq!(reloaded.words.len(), 3);

        let tide = storage.get_word(updated.words[2].id).await.unwrap().unwrap();
        assert_eq!(tide.word_list_id, first.id);

        let ids: Vec<u64> = storage
            .list_word_lists()
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.id)
            .collect();
        assert!(ids.contains(&first.id) && ids.contains(&second.id));
    }

    #[test]
    fn word_list_serializes_camel_case() {
        let list = WordList {
            id: 3,
            title: "Ocean".to_string(),
            difficulty: Difficulty::Easy,
            created_at: Utc::now(),
            words: vec![Word {
                id: 7,
                word_list_id: 3,
                word: "Sea".to_string(),
                definition: "Salt water".to_string(),
            }],
        };
        let value = serde_json::to_value(&list).unwrap();
        assert_eq!(value["words"][0]["wordListId"], 3);
        assert!(value.get("createdAt").is_some());
        assert_eq!(list.word_infos()[0], WordInfo::new("Sea", "Salt water"));
    }
}
