pub mod completion;
pub mod config;
pub mod game;
pub mod generator;
pub mod network;
pub mod storage;
pub mod word;

pub use completion::{CompletionClient, LazyOpenAiClient, LlmError, OpenAiClient};
pub use config::Config;
pub use game::{Game, HangmanBank, HangmanGame};
pub use generator::{GenerationError, GeneratorSettings, WordListGenerator};
pub use network::HttpServer;
pub use storage::{Storage, Word, WordList};
pub use word::{Difficulty, TopicEvaluation, WordInfo};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("网络错误: {0}")]
    Network(#[from] anyhow::Error),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error("参数错误: {0}")]
    InvalidInput(String),
    #[error("未找到: {0}")]
    NotFound(String),
    #[error("存储错误: {0}")]
    Storage(String),
    #[error("配置错误: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
