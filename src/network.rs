use crate::config::{Config, CorsConfig};
use crate::game::{Game, HangmanBank};
use crate::generator::WordListGenerator;
use crate::storage::{Storage, Word, WordList};
use crate::word::{Difficulty, GenerationRequest, WordInfo, sanitize_topic, validate_topic};
use crate::{CompletionClient, GeneratorSettings, LazyOpenAiClient, Result};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

#[derive(Debug, Deserialize)]
struct GamesQuery {
    topic: String,
    difficulty: String,
}

#[derive(Debug, Deserialize)]
struct WordListQuery {
    topic: String,
    difficulty: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HangmanQuery {
    route: Option<u32>,
}

/// 路由共享状态
#[derive(Clone)]
pub struct AppState {
    pub generator: WordListGenerator,
    pub storage: Arc<Storage>,
}

/// HTTP 接口错误，响应体为 `{"detail": message}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<crate::Error> for ApiError {
    fn from(err: crate::Error) -> Self {
        match err {
            crate::Error::InvalidInput(message) => ApiError::bad_request(message),
            crate::Error::NotFound(message) => ApiError::not_found(message),
            // 内部原因已在生成器里记录，这里只返回固定提示
            crate::Error::Generation(e) => ApiError::internal(e.message()),
            other => {
                error!("请求处理失败: {}", other);
                ApiError::internal("Internal server error")
            }
        }
    }
}

impl From<crate::GenerationError> for ApiError {
    fn from(err: crate::GenerationError) -> Self {
        ApiError::from(crate::Error::Generation(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(status = %self.status, message = %self.message, "request failed");
        (
            self.status,
            Json(serde_json::json!({"detail": self.message})),
        )
            .into_response()
    }
}

/// 单词表 HTTP 服务
pub struct HttpServer {
    state: AppState,
    cors: CorsConfig,
}

impl HttpServer {
    /// 按配置创建服务。模型客户端在第一次请求时才构建
    pub async fn new(config: &Config) -> Result<Self> {
        let client: Arc<dyn CompletionClient> =
            Arc::new(LazyOpenAiClient::new(config.openai.clone()));
        let generator = WordListGenerator::new(
            client,
            GeneratorSettings::from_config(&config.openai, &config.generator),
        );
        let storage = Storage::connect(config.storage.redis_url.as_deref()).await?;
        if config.storage.redis_url.is_none() {
            info!("未配置 Redis，使用内存存储");
        }

        Ok(Self::with_state(
            AppState {
                generator,
                storage: Arc::new(storage),
            },
            config.cors.clone(),
        ))
    }

    pub fn with_state(state: AppState, cors: CorsConfig) -> Self {
        HttpServer { state, cors }
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone()).layer(build_cors(&self.cors))
    }

    pub async fn start(&self, http_addr: &str) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(http_addr)
            .await
            .map_err(|e| {
                error!("绑定HTTP地址失败: {} - {}", http_addr, e);
                crate::Error::Network(anyhow::anyhow!(e))
            })?;

        axum::serve(listener, self.router()).await.map_err(|e| {
            error!("HTTP服务器运行错误: {}", e);
            crate::Error::Network(anyhow::anyhow!(e))
        })?;
        Ok(())
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(greeting))
        .route("/games", post(retrieve_games))
        .route("/games/", post(retrieve_games))
        .route("/word-lists", get(create_generative_word_list))
        .route("/word-lists/", get(create_generative_word_list))
        .route("/word-lists/get-all", get(get_all_word_lists))
        .route("/word-lists/words/:word_id", get(get_word_info))
        .route("/word-lists/:word_list_id", get(get_word_list))
        .route("/word-lists/:word_list_id/more", get(get_more_words))
        .route("/word-lists/:word_list_id/hangman", get(get_hangman_games))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// 根据配置设置CORS
fn build_cors(config: &CorsConfig) -> CorsLayer {
    let allowed = config
        .allowed_origins
        .as_ref()
        .filter(|origins| !origins.is_empty());

    match allowed {
        Some(origins) if !config.allow_all_origins.unwrap_or(true) => {
            let origins = origins
                .iter()
                .filter_map(|origin| origin.parse::<axum::http::HeaderValue>().ok())
                .collect::<Vec<_>>();
            debug!("CORS允许的来源: {:?}", origins);
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::OPTIONS,
                ])
                .allow_credentials(true)
        }
        _ => {
            debug!("CORS配置: 允许所有来源");
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    }
}

fn parse_difficulty(value: Option<&str>) -> std::result::Result<Difficulty, ApiError> {
    match value {
        Some(value) => value.parse().map_err(ApiError::from),
        None => Ok(Difficulty::Medium),
    }
}

async fn greeting() -> Json<serde_json::Value> {
    Json(serde_json::json!({"message": "SpellTrain II API"}))
}

async fn retrieve_games(
    State(state): State<AppState>,
    Query(query): Query<GamesQuery>,
) -> std::result::Result<Json<Vec<WordInfo>>, ApiError> {
    let request = GenerationRequest::parse(&query.topic, &query.difficulty)?;

    let words = state
        .generator
        .generate(&request.topic, request.difficulty)
        .await?;
    debug!("生成单词 {} 个, topic={}", words.len(), request.topic);
    Ok(Json(words))
}

async fn create_generative_word_list(
    State(state): State<AppState>,
    Query(query): Query<WordListQuery>,
) -> std::result::Result<Json<WordList>, ApiError> {
    validate_topic(&query.topic)?;
    let topic = sanitize_topic(&query.topic);
    if topic.is_empty() {
        return Err(ApiError::bad_request("Topic must not be empty"));
    }
    let difficulty = parse_difficulty(query.difficulty.as_deref())?;

    let evaluation = state.generator.evaluate_topic(&topic).await?;
    if !evaluation.is_valid {
        return Err(ApiError::bad_request(evaluation.reason));
    }

    if let Some(existing) = state.storage.find_by_title(&topic).await? {
        debug!("返回已有单词表 {} ({})", existing.id, topic);
        return Ok(Json(existing));
    }

    let words = state.generator.generate(&topic, difficulty).await?;
    let list = state
        .storage
        .create_word_list(&topic, difficulty, &words)
        .await?;
    info!("创建单词表 {} ({}), 单词 {} 个", list.id, topic, list.words.len());
    Ok(Json(list))
}

async fn get_all_word_lists(
    State(state): State<AppState>,
) -> std::result::Result<Json<Vec<WordList>>, ApiError> {
    Ok(Json(state.storage.list_word_lists().await?))
}

async fn load_word_list(state: &AppState, id: u64) -> std::result::Result<WordList, ApiError> {
    state
        .storage
        .get_word_list(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Word list not found"))
}

async fn get_word_list(
    State(state): State<AppState>,
    Path(word_list_id): Path<u64>,
) -> std::result::Result<Json<WordList>, ApiError> {
    Ok(Json(load_word_list(&state, word_list_id).await?))
}

async fn get_more_words(
    State(state): State<AppState>,
    Path(word_list_id): Path<u64>,
) -> std::result::Result<Json<WordList>, ApiError> {
    let list = load_word_list(&state, word_list_id).await?;

    let extra = state
        .generator
        .generate_more(&list.title, list.difficulty, &list.word_texts())
        .await?;
    let updated = state
        .storage
        .append_words(word_list_id, &extra)
        .await?
        .ok_or_else(|| ApiError::not_found("Word list not found"))?;
    Ok(Json(updated))
}

async fn get_hangman_games(
    State(state): State<AppState>,
    Path(word_list_id): Path<u64>,
    Query(query): Query<HangmanQuery>,
) -> std::result::Result<Json<HangmanBank>, ApiError> {
    let list = load_word_list(&state, word_list_id).await?;
    let game = Game::new(list.word_infos());
    Ok(Json(game.generate_hangman_games(query.route.unwrap_or(1))))
}

async fn get_word_info(
    State(state): State<AppState>,
    Path(word_id): Path<u64>,
) -> std::result::Result<Json<Word>, ApiError> {
    let word = state
        .storage
        .get_word(word_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Word ID {} not found", word_id)))?;

    load_word_list(&state, word.word_list_id).await?;
    Ok(Json(word))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::LlmError;
    use crate::completion::mock::{ScriptedClient, ok};
    use crate::generator::WORD_LIST_ERROR;

    const OCEAN_WORDS: &str = r#"{"words": [{"word": "Sea", "definition": "Large body of salt water"}, {"word": "Reef", "definition": "Ridge of coral"}]}"#;
    const VALID_TOPIC: &str = r#"{"isValid": true, "reason": ""}"#;

    fn state_with(client: Arc<ScriptedClient>) -> AppState {
        AppState {
            generator: WordListGenerator::new(client, GeneratorSettings::default()),
            storage: Arc::new(Storage::memory()),
        }
    }

    fn games_query(topic: &str, difficulty: &str) -> Query<GamesQuery> {
        Query(GamesQuery {
            topic: topic.to_string(),
            difficulty: difficulty.to_string(),
        })
    }

    fn word_list_query(topic: &str) -> Query<WordListQuery> {
        Query(WordListQuery {
            topic: topic.to_string(),
            difficulty: Some("Easy".to_string()),
        })
    }

    #[tokio::test]
    async fn greeting_names_the_api() {
        let Json(body) = greeting().await;
        assert_eq!(body["message"], "SpellTrain II API");
    }

    #[tokio::test]
    async fn retrieve_games_returns_words() {
        let state = state_with(ScriptedClient::with(vec![ok(OCEAN_WORDS)]));
        let Json(words) = retrieve_games(State(state), games_query("Ocean", "Easy"))
            .await
            .unwrap();

        assert_eq!(words.len(), 2);
        assert!(words.iter().all(|w| !w.is_self_referential()));
    }

    #[tokio::test]
    async fn retrieve_games_rejects_unknown_difficulty() {
        let client = ScriptedClient::with(vec![]);
        let err = retrieve_games(State(state_with(client.clone())), games_query("Ocean", "Expert"))
            .await
            .unwrap_err();

        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(client.requests().is_empty());
    }

    #[tokio::test]
    async fn generation_failure_hides_internal_cause() {
        let client = ScriptedClient::with(vec![Err(LlmError::Upstream(
            "status 401: invalid api key sk-secret".to_string(),
        ))]);
        let err = retrieve_games(State(state_with(client)), games_query("Ocean", "Easy"))
            .await
            .unwrap_err();

        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message(), WORD_LIST_ERROR);
    }

    #[tokio::test]
    async fn word_list_is_generated_then_reused() {
        let client = ScriptedClient::with(vec![ok(VALID_TOPIC), ok(OCEAN_WORDS), ok(VALID_TOPIC)]);
        let state = state_with(client.clone());

        let Json(created) =
            create_generative_word_list(State(state.clone()), word_list_query("  ocean  "))
                .await
                .unwrap();
        assert_eq!(created.title, "Ocean");
        assert_eq!(created.difficulty, Difficulty::Easy);
        assert_eq!(created.words.len(), 2);

        let Json(again) = create_generative_word_list(State(state), word_list_query("OCEAN"))
            .await
            .unwrap();
        assert_eq!(again.id, created.id);
        assert_eq!(client.requests().len(), 3);
    }

    #[tokio::test]
    async fn invalid_topic_returns_reason() {
        let client = ScriptedClient::with(vec![ok(
            r#"{"isValid": false, "reason": "Topic is not appropriate"}"#,
        )]);
        let err = create_generative_word_list(State(state_with(client)), word_list_query("Nonsense"))
            .await
            .unwrap_err();

        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.message(), "Topic is not appropriate");
    }

    #[tokio::test]
    async fn short_topic_is_rejected_before_model_call() {
        let client = ScriptedClient::with(vec![]);
        let state = state_with(client.clone());
        for topic in ["a", "    "] {
            let err = create_generative_word_list(State(state.clone()), word_list_query(topic))
                .await
                .unwrap_err();
            assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        }
        assert!(client.requests().is_empty());
    }

    #[tokio::test]
    async fn missing_word_list_is_not_found() {
        let state = state_with(ScriptedClient::with(vec![]));
        let err = get_word_list(State(state.clone()), Path(7)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.message(), "Word list not found");

        let err = get_word_info(State(state), Path(3)).await.unwrap_err();
        assert_eq!(err.message(), "Word ID 3 not found");
    }

    #[tokio::test]
    async fn more_words_are_appended() {
        let client = ScriptedClient::with(vec![ok(
            r#"{"words": [{"word": "Tide", "definition": "Rise and fall"}, {"word": "sea", "definition": "Salt water"}]}"#,
        )]);
        let state = state_with(client);
        let list = state
            .storage
            .create_word_list(
                "Ocean",
                Difficulty::Easy,
                &[WordInfo::new("Sea", "Large body of salt water")],
            )
            .await
            .unwrap();

        let Json(updated) = get_more_words(State(state.clone()), Path(list.id)).await.unwrap();
        assert_eq!(updated.word_texts(), vec!["Sea", "Tide"]);

        let Json(tide) = get_word_info(State(state), Path(updated.words[1].id))
            .await
            .unwrap();
        assert_eq!(tide.definition, "Rise and fall");
    }

    #[tokio::test]
    async fn hangman_bank_for_stored_list() {
        let state = state_with(ScriptedClient::with(vec![]));
        let list = state
            .storage
            .create_word_list(
                "Harry Potter",
                Difficulty::Medium,
                &[
                    WordInfo::new("Wand", "Stick for a wand spell"),
                    WordInfo::new("Owl", "Bird that delivers mail"),
                ],
            )
            .await
            .unwrap();

        let Json(bank) = get_hangman_games(
            State(state),
            Path(list.id),
            Query(HangmanQuery { route: Some(5) }),
        )
        .await
        .unwrap();

        assert_eq!(bank.len(), 2);
        let level1 = &bank.level("level1").unwrap()[0];
        assert_eq!(level1.hint, "Stick for a ____ spell");
        assert_eq!(level1.difficulty, Difficulty::Hard);
    }

    #[test]
    fn api_error_maps_error_kinds() {
        let err = ApiError::from(crate::Error::NotFound("gone".to_string()));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err = ApiError::from(crate::Error::Storage("redis down".to_string()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message(), "Internal server error");
    }
}
