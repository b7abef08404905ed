mod common;

use serde_json::Value;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn upstream_chat_response() -> Value {
    serde_json::json!({
        "id": "chatcmpl-discount-1",
        "object": "chat.completion",
        "created": 1_700_000_000u64,
        "model": common::TEST_MODEL,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "discounted reply"},
            "finish_reason": "stop",
        }],
        "usage": {"prompt_tokens": 2, "completion_tokens": 2, "total_tokens": 4},
    })
}

#[tokio::test]
async fn active_discount_is_visible_and_changes_the_authorized_cost() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(upstream_chat_response()))
        .expect(1)
        .mount(&mock_server)
        .await;

    // Base cost is 100; the seeded 2x multiplier makes the authorized
    // (and later debited) amount 50, half the base cost.
    let server = common::spawn_test_gateway_with_discount(&mock_server, 60, 2.0).await;

    let discounts: Value = server
        .get("/v1/discounts/my-discounts")
        .add_header(axum::http::header::AUTHORIZATION, common::bearer(common::TEST_API_KEY))
        .await
        .json();
    assert_eq!(discounts[0]["model_id"], common::TEST_MODEL);
    assert_eq!(discounts[0]["discount_multiplier"], 2.0);

    let response = server
        .post("/v1/chat/completions")
        .add_header(axum::http::header::AUTHORIZATION, common::bearer(common::TEST_API_KEY))
        .json(&common::test_chat_request(common::TEST_MODEL, "hi"))
        .await;

    response.assert_status_ok();
}

#[tokio::test]
async fn credits_short_of_the_multiplied_cost_are_still_rejected() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(upstream_chat_response()))
        .expect(0)
        .mount(&mock_server)
        .await;

    // Base cost 100 / 2.0 multiplier = 50 effective cost; 40 credits
    // fall short of even the discounted amount.
    let server = common::spawn_test_gateway_with_discount(&mock_server, 40, 2.0).await;
    let response = server
        .post("/v1/chat/completions")
        .add_header(axum::http::header::AUTHORIZATION, common::bearer(common::TEST_API_KEY))
        .json(&common::test_chat_request(common::TEST_MODEL, "hi"))
        .await;

    response.assert_status(axum::http::StatusCode::PAYMENT_REQUIRED);
}
