// ABOUTME: Shared test utilities and setup functions for integration tests
// ABOUTME: In-memory database, seeded sessions, and a scripted provider factory

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::{Arc, Once};

use promptrelay::database::Database;
use promptrelay::errors::{AppError, AppResult};
use promptrelay::llm::{
    ChatRequest, ChatResponse, ChatStream, LlmProvider, ProviderFactory, ProviderKind, StreamChunk,
};
use promptrelay::server::{build_router, ServerResources};

static INIT_LOGGER: Once = Once::new();

/// Initialize quiet logging for tests (call once per test process)
pub fn init_test_logging() {
    INIT_LOGGER.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_test_writer()
            .init();
    });
}

/// Scripted provider factory for tests
///
/// Every vendor kind resolves to the same mock provider, so tests control
/// the full fragment sequence without any network.
#[derive(Debug, Clone)]
pub struct MockProviderFactory {
    /// Fragments the streaming path yields, in order
    pub deltas: Vec<String>,
    /// When set, the stream errors with this message after the deltas
    pub fail_message: Option<String>,
    /// Content returned by the non-streaming path (also used for titles)
    pub completion: String,
}

impl Default for MockProviderFactory {
    fn default() -> Self {
        Self {
            deltas: vec!["Hel".to_owned(), "lo ".to_owned(), "world".to_owned()],
            fail_message: None,
            completion: "Mock completion".to_owned(),
        }
    }
}

impl MockProviderFactory {
    /// Factory whose streams yield the given fragments then finish
    pub fn with_deltas(deltas: &[&str]) -> Self {
        Self {
            deltas: deltas.iter().map(|d| (*d).to_owned()).collect(),
            ..Self::default()
        }
    }

    /// Factory whose streams fail after the given fragments
    pub fn failing_after(deltas: &[&str], message: &str) -> Self {
        Self {
            deltas: deltas.iter().map(|d| (*d).to_owned()).collect(),
            fail_message: Some(message.to_owned()),
            ..Self::default()
        }
    }
}

impl ProviderFactory for MockProviderFactory {
    fn create(&self, kind: ProviderKind, _api_key: &str) -> AppResult<Arc<dyn LlmProvider>> {
        Ok(Arc::new(MockProvider {
            kind,
            deltas: self.deltas.clone(),
            fail_message: self.fail_message.clone(),
            completion: self.completion.clone(),
        }))
    }
}

struct MockProvider {
    kind: ProviderKind,
    deltas: Vec<String>,
    fail_message: Option<String>,
    completion: String,
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &'static str {
        self.kind.as_str()
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, AppError> {
        if let Some(ref message) = self.fail_message {
            return Err(AppError::provider(self.kind.as_str(), message.clone()));
        }
        Ok(ChatResponse {
            content: self.completion.clone(),
            model: request.model.clone(),
            usage: None,
            finish_reason: Some("stop".to_owned()),
        })
    }

    async fn complete_stream(&self, _request: &ChatRequest) -> Result<ChatStream, AppError> {
        let mut items: Vec<Result<StreamChunk, AppError>> = self
            .deltas
            .iter()
            .map(|delta| {
                Ok(StreamChunk {
                    delta: delta.clone(),
                    is_final: false,
                    finish_reason: None,
                })
            })
            .collect();

        if let Some(ref message) = self.fail_message {
            items.push(Err(AppError::provider(self.kind.as_str(), message.clone())));
        } else {
            items.push(Ok(StreamChunk {
                delta: String::new(),
                is_final: true,
                finish_reason: Some("stop".to_owned()),
            }));
        }

        Ok(Box::pin(tokio_stream::iter(items)))
    }
}

/// Everything a route-level test needs
pub struct TestContext {
    pub resources: Arc<ServerResources>,
    pub router: axum::Router,
    pub user_id: String,
    pub token: String,
}

impl TestContext {
    /// Issue a session token for another user
    pub async fn issue_token(&self, user_id: &str) -> String {
        self.resources
            .authenticator
            .issue_token(user_id)
            .await
            .expect("Failed to issue token")
    }
}

/// Standard test setup: in-memory database, one session, one OpenAI key
pub async fn setup() -> TestContext {
    setup_with_factory(MockProviderFactory::default()).await
}

/// Test setup with a custom provider factory
pub async fn setup_with_factory(factory: MockProviderFactory) -> TestContext {
    init_test_logging();

    let database = Database::new("sqlite::memory:")
        .await
        .expect("Failed to open in-memory database");
    let resources = Arc::new(ServerResources::new(database, Arc::new(factory)));

    let user_id = "user-1".to_owned();
    let token = resources
        .authenticator
        .issue_token(&user_id)
        .await
        .expect("Failed to issue token");
    resources
        .credentials
        .save(&user_id, "openai", "sk-test")
        .await
        .expect("Failed to seed credential");

    let router = build_router(resources.clone());
    TestContext {
        resources,
        router,
        user_id,
        token,
    }
}

/// Parse the JSON payloads out of an SSE body
pub fn parse_sse_events(body: &str) -> Vec<serde_json::Value> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .filter_map(|data| serde_json::from_str(data).ok())
        .collect()
}
