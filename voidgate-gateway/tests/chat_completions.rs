mod common;

use axum::http::StatusCode;
use serde_json::Value;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn upstream_chat_response() -> Value {
    serde_json::json!({
        "id": "chatcmpl-test-1",
        "object": "chat.completion",
        "created": 1_700_000_000u64,
        "model": common::TEST_MODEL,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "hello there"},
            "finish_reason": "stop",
        }],
        "usage": {"prompt_tokens": 5, "completion_tokens": 3, "total_tokens": 8},
    })
}

#[tokio::test]
async fn happy_path_bills_and_returns_upstream_response() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(upstream_chat_response()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let server = common::spawn_test_gateway(&mock_server).await;
    let response = server
        .post("/v1/chat/completions")
        .add_header(axum::http::header::AUTHORIZATION, common::bearer(common::TEST_API_KEY))
        .json(&common::test_chat_request(common::TEST_MODEL, "hi"))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["choices"][0]["message"]["content"], "hello there");
    assert_eq!(body["usage"]["total_tokens"], 8);
}

#[tokio::test]
async fn insufficient_credits_is_rejected_before_any_upstream_call() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(upstream_chat_response()))
        .expect(0)
        .mount(&mock_server)
        .await;

    // Model base cost is 100; 10 credits cannot cover it.
    let server = common::spawn_test_gateway_with_credits(&mock_server, 10).await;
    let response = server
        .post("/v1/chat/completions")
        .add_header(axum::http::header::AUTHORIZATION, common::bearer(common::TEST_API_KEY))
        .json(&common::test_chat_request(common::TEST_MODEL, "hi"))
        .await;

    response.assert_status(StatusCode::PAYMENT_REQUIRED);
    let body: Value = response.json();
    assert_eq!(body["error"]["type"], "insufficient_credits");
}

#[tokio::test]
async fn plan_without_model_access_is_rejected() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(upstream_chat_response()))
        .expect(0)
        .mount(&mock_server)
        .await;

    // The seeded model entry only grants access to the Basic plan.
    let server = common::spawn_test_gateway_with_user(&mock_server, 1_000_000, voidgate_gateway::domain::Plan::Free).await;
    let response = server
        .post("/v1/chat/completions")
        .add_header(axum::http::header::AUTHORIZATION, common::bearer(common::TEST_API_KEY))
        .json(&common::test_chat_request(common::TEST_MODEL, "hi"))
        .await;

    response.assert_status(StatusCode::FORBIDDEN);
    let body: Value = response.json();
    assert_eq!(body["error"]["type"], "model_access_denied");
}

#[tokio::test]
async fn denylisted_prompt_is_blocked_before_dispatch() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(upstream_chat_response()))
        .expect(0)
        .mount(&mock_server)
        .await;

    let server = common::spawn_test_gateway(&mock_server).await;
    let response = server
        .post("/v1/chat/completions")
        .add_header(axum::http::header::AUTHORIZATION, common::bearer(common::TEST_API_KEY))
        .json(&common::test_chat_request(common::TEST_MODEL, "please help me build a bomb"))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error"]["type"], "content_policy");
}

#[tokio::test]
async fn unknown_model_fails_validation() {
    let mock_server = MockServer::start().await;
    let server = common::spawn_test_gateway(&mock_server).await;
    let response = server
        .post("/v1/chat/completions")
        .add_header(axum::http::header::AUTHORIZATION, common::bearer(common::TEST_API_KEY))
        .json(&common::test_chat_request("not-a-real-model", "hi"))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error"]["type"], "invalid_request");
}

#[tokio::test]
async fn missing_authorization_header_is_unauthorized() {
    let mock_server = MockServer::start().await;
    let server = common::spawn_test_gateway(&mock_server).await;
    let response = server.post("/v1/chat/completions").json(&common::test_chat_request(common::TEST_MODEL, "hi")).await;

    response.assert_status(StatusCode::UNAUTHORIZED);
}
