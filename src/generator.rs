use crate::completion::{ChatCompletion, ChatMessage, ChatRequest, CompletionClient, LlmError};
use crate::config::{GeneratorConfig, OpenAiConfig};
use crate::word::{Difficulty, TopicEvaluation, WordInfo, definition_leaks_word};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const WORD_LIST_ERROR: &str = "Error getting word list. Please try again later.";
pub const DEFINITION_ERROR: &str = "Error getting word definition. Please try again later.";
pub const TOPIC_ERROR: &str = "Error evaluating topic. Please try again later.";

/// 返回给调用方的生成错误。`message` 面向用户，`cause` 只写日志
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct GenerationError {
    message: &'static str,
    #[source]
    cause: LlmError,
}

impl GenerationError {
    pub fn new(message: &'static str, cause: LlmError) -> Self {
        GenerationError { message, cause }
    }

    pub fn message(&self) -> &'static str {
        self.message
    }

    pub fn cause(&self) -> &LlmError {
        &self.cause
    }
}

/// 生成器参数
#[derive(Debug, Clone)]
pub struct GeneratorSettings {
    pub list_model: String,
    pub repair_model: String,
    pub words_per_list: usize,
    pub extra_words: usize,
    pub definition_word_limit: usize,
    /// 修复后仍包含单词时最多重试的次数
    pub repair_attempts: usize,
    pub price_per_1k_tokens: f64,
}

impl GeneratorSettings {
    pub fn from_config(openai: &OpenAiConfig, generator: &GeneratorConfig) -> Self {
        GeneratorSettings {
            list_model: openai.list_model.clone(),
            repair_model: openai.repair_model.clone(),
            words_per_list: generator.words_per_list,
            extra_words: generator.extra_words,
            definition_word_limit: generator.definition_word_limit,
            repair_attempts: generator.repair_attempts,
            price_per_1k_tokens: openai.price_per_1k_tokens,
        }
    }
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self::from_config(&OpenAiConfig::default(), &GeneratorConfig::default())
    }
}

#[derive(Debug, Deserialize)]
struct WordListPayload {
    words: Vec<WordInfo>,
}

#[derive(Debug, Deserialize)]
struct DefinitionPayload {
    definition: String,
}

/// 单词表生成流水线：请求模型、解析 JSON、修复泄露单词的释义
#[derive(Clone)]
pub struct WordListGenerator {
    client: Arc<dyn CompletionClient>,
    settings: GeneratorSettings,
}

impl WordListGenerator {
    pub fn new(client: Arc<dyn CompletionClient>, settings: GeneratorSettings) -> Self {
        WordListGenerator { client, settings }
    }

    /// 为主题生成一组单词，数量为 `words_per_list`
    pub async fn generate(
        &self,
        topic: &str,
        difficulty: Difficulty,
    ) -> Result<Vec<WordInfo>, GenerationError> {
        self.generate_words(topic, difficulty, self.settings.words_per_list)
            .await
            .map_err(|cause| {
                error!("生成单词表失败, topic={}, difficulty={}: {}", topic, difficulty, cause);
                GenerationError::new(WORD_LIST_ERROR, cause)
            })
    }

    /// 为已有单词表追加 `extra_words` 个新词，跳过已存在的单词
    pub async fn generate_more(
        &self,
        topic: &str,
        difficulty: Difficulty,
        existing: &[String],
    ) -> Result<Vec<WordInfo>, GenerationError> {
        let fresh = self
            .generate_fresh_words(topic, difficulty, existing)
            .await
            .map_err(|cause| {
                error!("追加单词失败, topic={}: {}", topic, cause);
                GenerationError::new(WORD_LIST_ERROR, cause)
            })?;

        debug!("追加单词 {} 个, topic={}", fresh.len(), topic);
        Ok(fresh)
    }

    /// 请求一个不包含单词本身的新释义
    pub async fn repair_definition(&self, word: &str, topic: &str) -> Result<String, GenerationError> {
        self.request_definition(word, topic).await.map_err(|cause| {
            error!("获取释义失败, word={}: {}", word, cause);
            GenerationError::new(DEFINITION_ERROR, cause)
        })
    }

    /// 判断主题是否适合生成单词表
    pub async fn evaluate_topic(&self, topic: &str) -> Result<TopicEvaluation, GenerationError> {
        self.request_topic_evaluation(topic).await.map_err(|cause| {
            error!("评估主题失败, topic={}: {}", topic, cause);
            GenerationError::new(TOPIC_ERROR, cause)
        })
    }

    async fn generate_words(
        &self,
        topic: &str,
        difficulty: Difficulty,
        count: usize,
    ) -> Result<Vec<WordInfo>, LlmError> {
        let words = self.fetch_words(topic, difficulty, count, &[]).await?;
        self.repair_words(words, topic).await
    }

    /// 先按已有单词去重，只修复留下来的单词
    async fn generate_fresh_words(
        &self,
        topic: &str,
        difficulty: Difficulty,
        existing: &[String],
    ) -> Result<Vec<WordInfo>, LlmError> {
        let words = self
            .fetch_words(topic, difficulty, self.settings.extra_words, existing)
            .await?;

        let mut seen: HashSet<String> = existing.iter().map(|w| w.to_lowercase()).collect();
        let fresh: Vec<WordInfo> = words
            .into_iter()
            .filter(|info| seen.insert(info.word.to_lowercase()))
            .collect();
        self.repair_words(fresh, topic).await
    }

    /// 请求单词表并解析，不做修复
    async fn fetch_words(
        &self,
        topic: &str,
        difficulty: Difficulty,
        count: usize,
        exclude: &[String],
    ) -> Result<Vec<WordInfo>, LlmError> {
        let messages = word_list_messages(
            topic,
            difficulty,
            count,
            self.settings.definition_word_limit,
            exclude,
        );
        let request = ChatRequest::json(&self.settings.list_model, messages);
        let completion = self.client.complete(&request).await?;
        self.log_usage(&request.model, &completion);

        parse_word_list(&completion.content)
    }

    async fn repair_words(&self, mut words: Vec<WordInfo>, topic: &str) -> Result<Vec<WordInfo>, LlmError> {
        for info in words.iter_mut() {
            if info.is_self_referential() {
                debug!("释义包含单词本身，修复: {}", info.word);
                info.definition = self.repair_until_clean(&info.word, topic).await?;
            }
        }
        Ok(words)
    }

    /// 修复释义并重新校验，仍不合格时用下划线遮住单词
    async fn repair_until_clean(&self, word: &str, topic: &str) -> Result<String, LlmError> {
        let attempts = self.settings.repair_attempts.max(1);
        let mut last = String::new();

        for attempt in 1..=attempts {
            let definition = self.request_definition(word, topic).await?;
            if !definition_leaks_word(word, &definition) {
                return Ok(definition);
            }
            warn!("第{}次修复后释义仍包含单词 {}", attempt, word);
            last = definition;
        }

        Ok(mask_word(&last, word))
    }

    async fn request_definition(&self, word: &str, topic: &str) -> Result<String, LlmError> {
        let messages = definition_messages(word, topic, self.settings.definition_word_limit);
        let request = ChatRequest::json(&self.settings.repair_model, messages).with_temperature(0.0);
        let completion = self.client.complete(&request).await?;
        self.log_usage(&request.model, &completion);

        let payload: DefinitionPayload = serde_json::from_str(&completion.content)
            .map_err(|e| LlmError::MalformedResponse(format!("definition payload: {}", e)))?;
        Ok(payload.definition)
    }

    async fn request_topic_evaluation(&self, topic: &str) -> Result<TopicEvaluation, LlmError> {
        let request = ChatRequest::json(&self.settings.repair_model, topic_messages(topic))
            .with_temperature(0.0);
        let completion = self.client.complete(&request).await?;
        self.log_usage(&request.model, &completion);

        serde_json::from_str(&completion.content)
            .map_err(|e| LlmError::MalformedResponse(format!("topic evaluation payload: {}", e)))
    }

    fn log_usage(&self, model: &str, completion: &ChatCompletion) {
        if let Some(usage) = completion.usage {
            let cost = usage.total_tokens as f64 / 1000.0 * self.settings.price_per_1k_tokens;
            info!(
                model,
                total_tokens = usage.total_tokens,
                cost = %format!("${:.6}", cost),
                "模型调用用量"
            );
        }
    }
}

/// 单词表请求的消息
pub fn word_list_messages(
    topic: &str,
    difficulty: Difficulty,
    count: usize,
    definition_word_limit: usize,
    exclude: &[String],
) -> Vec<ChatMessage> {
    let mut user_prompt = format!(
        "Create a list of {} words related to the topic \"{}\" with difficulty level \"{}\". Provide a simple definition for each word. Easy: 1-4 letter words, Medium: 4-7 letter words, Hard: 7+ letter words.",
        count, topic, difficulty
    );
    if !exclude.is_empty() {
        user_prompt.push_str(&format!(
            " Do not include any of these words: {}.",
            exclude.join(", ")
        ));
    }

    vec![
        ChatMessage::system(
            "You are a helpful dictionary assistant designed to determine a list of words related to a topic.",
        ),
        ChatMessage::system(
            r#"The JSON response should be in the following format: {"words" : [{"word": "word", "definition": "definition"}]}"#,
        ),
        ChatMessage::system(format!(
            "The definition does not include the word itself and should be concise and contain less than {} words.",
            definition_word_limit
        )),
        ChatMessage::user(user_prompt),
    ]
}

/// 释义修复请求的消息
pub fn definition_messages(word: &str, topic: &str, definition_word_limit: usize) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(
            "You are a helpful dictionary assistant designed to output a simple definition for a word.",
        ),
        ChatMessage::system(
            r#"The JSON response should be in the following format: {"definition": "result here"}"#,
        ),
        ChatMessage::system(
            "If you are unsure, try to provide the most likely definition based on the word itself.",
        ),
        ChatMessage::system(format!(
            "The definition should be concise and contain less than {} words and should not include the word \"{}\" itself.",
            definition_word_limit, word
        )),
        ChatMessage::user(format!(
            "Provide a simple definition within {} words for the word \"{}\" related to {}.",
            definition_word_limit, word, topic
        )),
    ]
}

/// 主题评估请求的消息
pub fn topic_messages(topic: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(
            "You are a helpful assistant designed to decide whether a topic is suitable for generating a vocabulary word list.",
        ),
        ChatMessage::system(
            r#"The JSON response should be in the following format: {"isValid": true, "reason": "reason here"}"#,
        ),
        ChatMessage::system(
            "A topic is valid when it is appropriate for all ages and specific enough to produce related words. If the topic is invalid, briefly explain why in the reason.",
        ),
        ChatMessage::user(format!("Evaluate the topic \"{}\".", topic)),
    ]
}

/// 解析 `{"words": [...]}`，缺少字段或单词为空都视为格式错误
pub fn parse_word_list(content: &str) -> Result<Vec<WordInfo>, LlmError> {
    let payload: WordListPayload = serde_json::from_str(content)
        .map_err(|e| LlmError::MalformedResponse(format!("word list payload: {}", e)))?;

    if let Some(blank) = payload.words.iter().position(|w| w.word.trim().is_empty()) {
        return Err(LlmError::MalformedResponse(format!(
            "word list entry {} has an empty word",
            blank + 1
        )));
    }

    Ok(payload.words)
}

/// 将释义中出现的单词（不区分大小写）替换为下划线。
/// 匹配在 `to_lowercase` 之后的字符串上进行，与泄露检查的比较方式一致
pub fn mask_word(definition: &str, word: &str) -> String {
    let needle: Vec<char> = word.to_lowercase().chars().collect();
    if needle.is_empty() {
        return definition.to_string();
    }
    let lowered: Vec<char> = definition.to_lowercase().chars().collect();

    let mut masked = vec![false; lowered.len()];
    let mut i = 0;
    while i + needle.len() <= lowered.len() {
        if lowered[i..i + needle.len()] == needle[..] {
            masked[i..i + needle.len()].fill(true);
            i += needle.len();
        } else {
            i += 1;
        }
    }

    // 原字符与其小写形式在 `lowered` 中占据的位置一一对应
    let mut start = 0;
    definition
        .chars()
        .map(|c| {
            let span = c.to_lowercase().count();
            let hit = masked
                .get(start..start + span)
                .is_some_and(|range| range.iter().any(|&m| m));
            start += span;
            if hit { '_' } else { c }
        })
        .collect()
}
