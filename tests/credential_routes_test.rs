// ABOUTME: Integration tests for the provider credential routes
// ABOUTME: Covers save/replace, listing without secrets, deletion, and validation

mod common;
mod helpers;

use axum::http::StatusCode;
use helpers::axum_test::AxumTestRequest;

#[tokio::test]
async fn test_save_and_list_credentials() {
    let ctx = common::setup().await;

    let response = AxumTestRequest::put("/api/user/credentials")
        .bearer(&ctx.token)
        .json(&serde_json::json!({ "provider": "anthropic", "apiKey": "sk-ant-secret" }))
        .send(ctx.router.clone())
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = AxumTestRequest::get("/api/user/credentials")
        .bearer(&ctx.token)
        .send(ctx.router)
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.json();
    // Setup seeds an openai key; providers come back sorted
    assert_eq!(
        body["providers"],
        serde_json::json!(["anthropic", "openai"])
    );
    assert!(!response.text().contains("sk-ant-secret"));
}

#[tokio::test]
async fn test_save_replaces_existing_key() {
    let ctx = common::setup().await;

    let response = AxumTestRequest::put("/api/user/credentials")
        .bearer(&ctx.token)
        .json(&serde_json::json!({ "provider": "openai", "apiKey": "sk-replacement" }))
        .send(ctx.router.clone())
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let stored = ctx
        .resources
        .credentials
        .get(&ctx.user_id, "openai")
        .await
        .unwrap();
    assert_eq!(stored.as_deref(), Some("sk-replacement"));

    // Still exactly one openai entry
    let providers = ctx.resources.credentials.list(&ctx.user_id).await.unwrap();
    assert_eq!(providers, vec!["openai"]);
}

#[tokio::test]
async fn test_save_rejects_unknown_provider_and_empty_key() {
    let ctx = common::setup().await;

    let response = AxumTestRequest::put("/api/user/credentials")
        .bearer(&ctx.token)
        .json(&serde_json::json!({ "provider": "azure", "apiKey": "key" }))
        .send(ctx.router.clone())
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.json()["error"]["code"], "VALIDATION_ERROR");

    let response = AxumTestRequest::put("/api/user/credentials")
        .bearer(&ctx.token)
        .json(&serde_json::json!({ "provider": "google", "apiKey": "  " }))
        .send(ctx.router)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_delete_credential() {
    let ctx = common::setup().await;

    let response = AxumTestRequest::delete("/api/user/credentials/openai")
        .bearer(&ctx.token)
        .send(ctx.router.clone())
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let stored = ctx
        .resources
        .credentials
        .get(&ctx.user_id, "openai")
        .await
        .unwrap();
    assert!(stored.is_none());

    // Second delete reports not-found
    let response = AxumTestRequest::delete("/api/user/credentials/openai")
        .bearer(&ctx.token)
        .send(ctx.router)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_credentials_scoped_per_user() {
    let ctx = common::setup().await;
    let other_token = ctx.issue_token("user-2").await;

    let response = AxumTestRequest::get("/api/user/credentials")
        .bearer(&other_token)
        .send(ctx.router.clone())
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.json()["providers"], serde_json::json!([]));

    // Deleting another user's provider entry affects nothing
    let response = AxumTestRequest::delete("/api/user/credentials/openai")
        .bearer(&other_token)
        .send(ctx.router)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let stored = ctx
        .resources
        .credentials
        .get(&ctx.user_id, "openai")
        .await
        .unwrap();
    assert!(stored.is_some());
}

#[tokio::test]
async fn test_credentials_require_authentication() {
    let ctx = common::setup().await;

    let response = AxumTestRequest::get("/api/user/credentials")
        .send(ctx.router)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
