use anyhow::Result;
use once_cell::sync::OnceCell;
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

static CONFIG: OnceCell<Config> = OnceCell::new();

/// 配置文件路径的环境变量，未设置时读取工作目录下的 `config.toml`
pub const CONFIG_PATH_ENV: &str = "SPELLTRAIN_CONFIG";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub log: LogConfig,
    pub cors: CorsConfig,
    pub openai: OpenAiConfig,
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    pub level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    pub allow_all_origins: Option<bool>,
    pub allowed_origins: Option<Vec<String>>,
}

/// 大模型接口配置
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiConfig {
    pub base_url: String,
    /// 存放 API Key 的环境变量名，密钥本身不写进配置文件
    pub api_key_env: String,
    pub list_model: String,
    pub repair_model: String,
    /// 单次请求超时（秒）
    pub request_timeout: u64,
    pub price_per_1k_tokens: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneratorConfig {
    pub words_per_list: usize,
    pub extra_words: usize,
    pub definition_word_limit: usize,
    pub repair_attempts: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    /// 为空时使用内存存储
    pub redis_url: Option<String>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig {
            words_per_list: 10,
            extra_words: 6,
            definition_word_limit: 7,
            repair_attempts: 3,
        }
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        OpenAiConfig {
            base_url: "https://api.openai.com/v1/".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            list_model: "gpt-4-1106-preview".to_string(),
            repair_model: "gpt-3.5-turbo-1106".to_string(),
            request_timeout: 60,
            price_per_1k_tokens: 0.0010,
        }
    }
}

impl OpenAiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}

impl Config {
    /// 从指定文件加载配置，文件缺失的键使用默认值
    pub fn load_from(path: &str) -> Result<Self> {
        let openai = OpenAiConfig::default();
        let generator = GeneratorConfig::default();

        let config = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8000)?
            .set_default("log.level", "info")?
            .set_default("cors.allow_all_origins", true)?
            .set_default("openai.base_url", openai.base_url)?
            .set_default("openai.api_key_env", openai.api_key_env)?
            .set_default("openai.list_model", openai.list_model)?
            .set_default("openai.repair_model", openai.repair_model)?
            .set_default("openai.request_timeout", openai.request_timeout as i64)?
            .set_default("openai.price_per_1k_tokens", openai.price_per_1k_tokens)?
            .set_default("generator.words_per_list", generator.words_per_list as i64)?
            .set_default("generator.extra_words", generator.extra_words as i64)?
            .set_default(
                "generator.definition_word_limit",
                generator.definition_word_limit as i64,
            )?
            .set_default("generator.repair_attempts", generator.repair_attempts as i64)?
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("SPELLTRAIN")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        Ok(config.try_deserialize::<Config>()?)
    }

    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "config".to_string());
        Self::load_from(&path)
    }

    /// 初始化全局配置
    pub fn init() -> Result<()> {
        let config = Self::load()?;
        CONFIG
            .set(config)
            .map_err(|_| anyhow::anyhow!("配置已经初始化"))?;
        Ok(())
    }

    /// 获取全局配置实例
    pub fn get() -> &'static Config {
        CONFIG.get().expect("配置未初始化，请先调用 Config::init()")
    }

    pub fn http_addr(&self) -> Result<SocketAddr> {
        let addr: SocketAddr = format!("{}:{}", self.server.host, self.server.port).parse()?;
        Ok(addr)
    }

    pub fn log_filter(&self) -> String {
        format!(
            "spelltrain_hangman={},tower_http={}",
            self.log.level, self.log.level
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = Config::load_from("does-not-exist/config").unwrap();

        assert_eq!(config.server.port, 8000);
        assert_eq!(config.generator.words_per_list, 10);
        assert_eq!(config.generator.extra_words, 6);
        assert_eq!(config.openai.api_key_env, "OPENAI_API_KEY");
        assert_eq!(config.openai.repair_model, "gpt-3.5-turbo-1106");
        assert!(config.storage.redis_url.is_none());
    }

    #[test]
    fn log_filter_targets_crate() {
        let config = Config::load_from("does-not-exist/config").unwrap();
        assert_eq!(
            config.log_filter(),
            "spelltrain_hangman=info,tower_http=info"
        );
        assert_eq!(config.openai.request_timeout(), Duration::from_secs(60));
    }
}
