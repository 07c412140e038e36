use crate::config::OpenAiConfig;
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// 调用大模型时可能出现的内部错误
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("upstream call failed: {0}")]
    Upstream(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// 一次 JSON 模式的对话补全请求
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub response_format: ResponseFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl ChatRequest {
    pub fn json(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        ChatRequest {
            model: model.into(),
            messages,
            response_format: ResponseFormat::json_object(),
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub type_: String,
}

impl ResponseFormat {
    pub fn json_object() -> Self {
        ResponseFormat {
            type_: "json_object".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// 补全结果：模型返回的文本以及用量
#[derive(Debug, Clone, PartialEq)]
pub struct ChatCompletion {
    pub content: String,
    pub usage: Option<Usage>,
}

/// 任何能接收结构化提示并返回 JSON 文本的模型后端
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, LlmError>;
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

/// OpenAI 兼容的 `chat/completions` 客户端
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    endpoint: Url,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(base_url: &str, api_key: impl Into<String>, timeout: Duration) -> Result<Self, LlmError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(LlmError::Configuration("API key is empty".to_string()));
        }

        let base = Url::parse(base_url)
            .map_err(|e| LlmError::Configuration(format!("invalid base url '{}': {}", base_url, e)))?;
        let endpoint = base
            .join("chat/completions")
            .map_err(|e| LlmError::Configuration(e.to_string()))?;

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Configuration(e.to_string()))?;

        Ok(OpenAiClient {
            http,
            endpoint,
            api_key,
        })
    }

    /// 从配置指定的环境变量读取 API Key 并构建客户端
    pub fn from_env(config: &OpenAiConfig) -> Result<Self, LlmError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            LlmError::Configuration(format!("environment variable {} is not set", config.api_key_env))
        })?;
        Self::new(&config.base_url, api_key, config.request_timeout())
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, LlmError> {
        debug!("请求模型 {}，消息数 {}", request.model, request.messages.len());

        let response = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| LlmError::Upstream(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::Upstream(e.to_string()))?;

        if !status.is_success() {
            return Err(LlmError::Upstream(format!("status {}: {}", status, body)));
        }

        parse_completion(&body)
    }
}

/// 解析 `chat/completions` 响应体
pub fn parse_completion(body: &str) -> Result<ChatCompletion, LlmError> {
    let parsed: CompletionResponse = serde_json::from_str(body)
        .map_err(|e| LlmError::MalformedResponse(format!("completion body: {}", e)))?;

    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| LlmError::MalformedResponse("completion has no message content".to_string()))?;

    Ok(ChatCompletion {
        content,
        usage: parsed.usage,
    })
}

/// 首次调用时才构建 [`OpenAiClient`]，之后复用同一实例。
/// 缺少密钥不会阻止服务启动，而是在第一次生成时报配置错误。
pub struct LazyOpenAiClient {
    config: OpenAiConfig,
    client: OnceCell<OpenAiClient>,
}

impl LazyOpenAiClient {
    pub fn new(config: OpenAiConfig) -> Self {
        LazyOpenAiClient {
            config,
            client: OnceCell::new(),
        }
    }

    fn client(&self) -> Result<&OpenAiClient, LlmError> {
        self.client
            .get_or_try_init(|| OpenAiClient::from_env(&self.config))
    }
}

#[async_trait]
impl CompletionClient for LazyOpenAiClient {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, LlmError> {
        self.client()?.complete(request).await
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// 按顺序返回预设响应，并记录收到的请求
    #[derive(Default)]
    pub(crate) struct ScriptedClient {
        responses: Mutex<VecDeque<Result<String, LlmError>>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedClient {
        pub(crate) fn with(responses: Vec<Result<String, LlmError>>) -> Arc<Self> {
            Arc::new(ScriptedClient {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn requests(&self) -> Vec<ChatRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, LlmError> {
            self.requests.lock().unwrap().push(request.clone());
            let next = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::Upstream("no scripted response".to_string())));
            next.map(|content| ChatCompletion {
                content,
                usage: Some(Usage {
                    prompt_tokens: 40,
                    completion_tokens: 60,
                    total_tokens: 100,
                }),
            })
        }
    }

    pub(crate) fn ok(content: &str) -> Result<String, LlmError> {
        Ok(content.to_string())
    }
}
