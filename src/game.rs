use crate::word::{Difficulty, WordInfo, capitalize};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

pub const GAME_TITLE: &str = "Hangman Game";
pub const DEFAULT_ATTEMPTS: u32 = 6;

/// 单关卡的猜词游戏描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HangmanGame {
    pub game_title: String,
    pub default_attempts: u32,
    pub difficulty: Difficulty,
    pub hint: String,
    pub correct_answer: String,
}

/// 关卡表，序列化为按插入顺序排列的 `{"level1": [...], "level2": [...]}`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HangmanBank {
    levels: Vec<(String, Vec<HangmanGame>)>,
}

impl HangmanBank {
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn level(&self, key: &str) -> Option<&[HangmanGame]> {
        self.levels
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, games)| games.as_slice())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.levels.iter().map(|(name, _)| name.as_str())
    }
}

impl Serialize for HangmanBank {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.levels.len()))?;
        for (name, games) in &self.levels {
            map.serialize_entry(name, games)?;
        }
        map.end()
    }
}

/// 把单词表转换成猜词关卡
#[derive(Debug, Clone)]
pub struct Game {
    words_bank: Vec<WordInfo>,
}

impl Game {
    pub fn new(words: Vec<WordInfo>) -> Self {
        Game { words_bank: words }
    }

    pub fn generate_hangman_games(&self, route: u32) -> HangmanBank {
        let difficulty = Difficulty::from_route(route);
        let levels = self
            .words_bank
            .iter()
            .enumerate()
            .map(|(i, info)| {
                let game = HangmanGame {
                    game_title: GAME_TITLE.to_string(),
                    default_attempts: DEFAULT_ATTEMPTS,
                    difficulty,
                    hint: hint_for(info),
                    correct_answer: info.word.clone(),
                };
                (format!("level{}", i + 1), vec![game])
            })
            .collect();

        HangmanBank { levels }
    }
}

/// 用下划线遮住释义中的小写单词，再首字母大写
fn hint_for(info: &WordInfo) -> String {
    let hidden = "_".repeat(info.word.chars().count());
    let definition = info.definition.replace(&info.word.to_lowercase(), &hidden);
    capitalize(&definition)
}
