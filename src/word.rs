use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 原始主题参数的最短长度
pub const MIN_TOPIC_LEN: usize = 2;

/// 单词及其释义
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordInfo {
    pub word: String,
    pub definition: String,
}

impl WordInfo {
    pub fn new(word: impl Into<String>, definition: impl Into<String>) -> Self {
        WordInfo {
            word: word.into(),
            definition: definition.into(),
        }
    }

    /// 释义中是否出现了单词本身（不区分大小写）
    pub fn is_self_referential(&self) -> bool {
        definition_leaks_word(&self.word, &self.definition)
    }
}

pub fn definition_leaks_word(word: &str, definition: &str) -> bool {
    definition.to_lowercase().contains(&word.to_lowercase())
}

/// 难度，对应单词长度区间。区间在 4 和 7 处重叠
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

    /// 单词长度区间 (最小, 最大)，`None` 表示无上限
    pub fn length_band(&self) -> (usize, Option<usize>) {
        match self {
            Difficulty::Easy => (1, Some(4)),
            Difficulty::Medium => (4, Some(7)),
            Difficulty::Hard => (7, None),
        }
    }

    pub fn accepts_length(&self, len: usize) -> bool {
        let (min, max) = self.length_band();
        len >= min && max.map_or(true, |max| len <= max)
    }

    /// 路由编号到难度：3、4 为 Medium，5 为 Hard，其余为 Easy
    pub fn from_route(route: u32) -> Self {
        match route {
            3 | 4 => Difficulty::Medium,
            5 => Difficulty::Hard,
            _ => Difficulty::Easy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "Easy",
            Difficulty::Medium => "Medium",
            Difficulty::Hard => "Hard",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown difficulty '{}', expected Easy, Medium or Hard",
                other
            ))),
        }
    }
}

/// 调用方提交的生成请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub topic: String,
    pub difficulty: Difficulty,
}

impl GenerationRequest {
    /// 从原始参数构建：主题去掉首尾空白后不能为空，难度不区分大小写
    pub fn parse(topic: &str, difficulty: &str) -> crate::Result<Self> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Topic must not be empty".to_string(),
            ));
        }
        Ok(GenerationRequest {
            topic: topic.to_string(),
            difficulty: difficulty.parse()?,
        })
    }
}

/// 主题评估结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicEvaluation {
    pub is_valid: bool,
    #[serde(default)]
    pub reason: String,
}

/// 规整主题：合并空白、去掉首尾空白，并按单词首字母大写
pub fn sanitize_topic(topic: &str) -> String {
    let collapsed = topic.split_whitespace().collect::<Vec<_>>().join(" ");
    title_case(&collapsed)
}

/// 校验原始主题参数的长度，在规整之前调用
pub fn validate_topic(raw: &str) -> crate::Result<()> {
    if raw.chars().count() < MIN_TOPIC_LEN {
        return Err(crate::Error::InvalidInput(format!(
            "Topic must be at least {} characters",
            MIN_TOPIC_LEN
        )));
    }
    Ok(())
}

fn title_case(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut prev_alphabetic = false;
    for c in text.chars() {
        if c.is_alphabetic() {
            if prev_alphabetic {
                result.extend(c.to_lowercase());
            } else {
                result.extend(c.to_uppercase());
            }
            prev_alphabetic = true;
        } else {
            result.push(c);
            prev_alphabetic = false;
        }
    }
    result
}

/// 首字母大写，其余小写
pub fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

/// 落在难度长度区间内的单词占比
pub fn band_success_ratio(words: &[WordInfo], difficulty: Difficulty) -> f64 {
    if words.is_empty() {
        return 0.0;
    }
    let hits = words
        .iter()
        .filter(|w| difficulty.accepts_length(w.word.chars().count()))
        .count();
    hits as f64 / words.len() as f64
}
