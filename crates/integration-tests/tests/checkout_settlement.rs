//! Checkout through settlement: order placement, the payment hand-off and
//! the signed webhook that completes the order.

#![allow(clippy::unwrap_used)]

use axum::http::StatusCode;
use rust_decimal::Decimal;
use serde_json::{Value, json};

use just_one_dollar_core::UserId;
use just_one_dollar_integration_tests::{
    Browser, TestContext, completed_session_event, decimal,
};

struct Shopper {
    browser: Browser,
    address_id: i32,
}

/// A signed-in shopper with a $100 cart (4 x $25) and one address.
async fn shopper_with_cart(ctx: &TestContext, user_id: i32) -> Shopper {
    let widget = ctx.store.add_product("Widget", "W-1", Decimal::from(25), true).await;
    let address = ctx.store.add_address(UserId::new(user_id), "Ada").await;

    let mut browser = ctx.browser();
    browser.sign_in(user_id, "buyer@example.com").await;
    let (status, _) = browser
        .post("/cart/items", json!({ "product_id": widget.id, "quantity": 4 }))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    Shopper {
        browser,
        address_id: address.id.as_i32(),
    }
}

async fn place_order(shopper: &mut Shopper) -> (StatusCode, Value) {
    shopper
        .browser
        .post(
            "/checkout",
            json!({
                "billing_address_id": shopper.address_id,
                "shipping_address_id": shopper.address_id,
            }),
        )
        .await
}

async fn order(shopper: &mut Shopper, order_number: &str) -> Value {
    let (status, order) = shopper
        .browser
        .get(&format!("/checkout/success?orderNumber={order_number}"))
        .await;
    assert_eq!(status, StatusCode::OK);
    order
}

// =============================================================================
// Happy path
// =============================================================================

#[tokio::test]
async fn test_hundred_dollar_cart_settles() {
    let ctx = TestContext::new();
    let mut shopper = shopper_with_cart(&ctx, 1).await;

    let (status, data) = shopper.browser.get("/checkout").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(data["has_cart_items"], true);
    assert_eq!(decimal(&data["totals"]["total"]), Decimal::from(108));

    let (status, placed) = place_order(&mut shopper).await;
    assert_eq!(status, StatusCode::OK);
    let order_number = placed["order_number"].as_str().unwrap().to_string();
    assert!(order_number.starts_with("ORD-"));
    assert!(placed["redirect_url"].as_str().unwrap().contains(&order_number));
    assert!(placed.get("session_id").is_none());

    let pending = order(&mut shopper, &order_number).await;
    assert_eq!(pending["status"], "PENDING");
    assert_eq!(decimal(&pending["subtotal"]), Decimal::from(100));
    assert_eq!(decimal(&pending["tax"]), Decimal::from(8));
    assert_eq!(decimal(&pending["total"]), Decimal::from(108));
    assert_eq!(pending["payment"]["payment_status"], "PENDING");

    let requests = ctx.gateway.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].total, Decimal::from(108));
    assert_eq!(
        requests[0].success_url().unwrap(),
        format!("http://localhost:3000/checkout/success?orderNumber={order_number}")
    );

    // The cart was consumed by the order.
    let (_, cart) = shopper.browser.get("/cart").await;
    assert!(cart["items"].as_array().unwrap().is_empty());

    let order_id = pending["id"].to_string();
    let session_id = format!("cs_test_{order_id}");
    let event = completed_session_event(&session_id, &order_id, &order_number, 10_800);

    let (status, body) = ctx.deliver_webhook(&event).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "received": true }));

    let settled = order(&mut shopper, &order_number).await;
    assert_eq!(settled["status"], "COMPLETED");
    assert_eq!(settled["payment"]["payment_status"], "COMPLETED");
    assert_eq!(settled["payment"]["gateway_payment_intent_id"], format!("pi_{order_id}"));
    assert_eq!(settled["payment"]["payment_method"], "card");

    // Redelivery is acknowledged and changes nothing.
    let (status, body) = ctx.deliver_webhook(&event).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "received": true }));
    assert_eq!(order(&mut shopper, &order_number).await, settled);
}

// =============================================================================
// Checkout failures
// =============================================================================

#[tokio::test]
async fn test_gateway_failure_keeps_cart_and_pending_order() {
    let ctx = TestContext::new();
    let mut shopper = shopper_with_cart(&ctx, 2).await;
    ctx.gateway.set_failing(true);

    let (status, body) = place_order(&mut shopper).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "Payment provider error");

    let (_, cart) = shopper.browser.get("/cart").await;
    assert_eq!(cart["item_count"], 4);

    let (_, orders) = shopper.browser.get("/account/orders").await;
    assert_eq!(orders["total_count"], 1);
    assert_eq!(orders["orders"][0]["status"], "PENDING");

    // Retrying once the gateway is back works with the same cart.
    ctx.gateway.set_failing(false);
    let (status, _) = place_order(&mut shopper).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_checkout_requires_sign_in() {
    let ctx = TestContext::new();
    let mut browser = ctx.browser();

    let (status, _) = browser.get("/checkout").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = browser
        .post(
            "/checkout",
            json!({ "billing_address_id": 1, "shipping_address_id": 1 }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = browser.get("/account/orders").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_empty_cart_is_unprocessable() {
    let ctx = TestContext::new();
    let address = ctx.store.add_address(UserId::new(3), "Ada").await;
    let mut browser = ctx.browser();
    browser.sign_in(3, "ada@example.com").await;

    let (status, body) = browser
        .post(
            "/checkout",
            json!({
                "billing_address_id": address.id,
                "shipping_address_id": address.id,
            }),
        )
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "Your cart is empty");
    assert!(ctx.gateway.requests().is_empty());
}

#[tokio::test]
async fn test_someone_elses_address_is_unprocessable() {
    let ctx = TestContext::new();
    let mut shopper = shopper_with_cart(&ctx, 4).await;
    let foreign = ctx.store.add_address(UserId::new(99), "Grace").await;

    let (status, body) = shopper
        .browser
        .post(
            "/checkout",
            json!({
                "billing_address_id": foreign.id,
                "shipping_address_id": shopper.address_id,
            }),
        )
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "Please choose a valid billing address");
}

#[tokio::test]
async fn test_success_page_hides_other_users_orders() {
    let ctx = TestContext::new();
    let mut shopper = shopper_with_cart(&ctx, 5).await;
    let (_, placed) = place_order(&mut shopper).await;
    let order_number = placed["order_number"].as_str().unwrap();

    let mut stranger = ctx.browser();
    stranger.sign_in(6, "stranger@example.com").await;
    let (status, _) = stranger
        .get(&format!("/checkout/success?orderNumber={order_number}"))
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_order_history_pages() {
    let ctx = TestContext::new();
    let mut shopper = shopper_with_cart(&ctx, 8).await;
    place_order(&mut shopper).await;
    let widget = ctx.store.add_product("Gadget", "G-1", Decimal::from(3), true).await;
    shopper
        .browser
        .post("/cart/items", json!({ "product_id": widget.id }))
        .await;
    place_order(&mut shopper).await;

    let (status, page) = shopper.browser.get("/account/orders?page=1&per_page=1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["orders"].as_array().unwrap().len(), 1);
    assert_eq!(page["total_count"], 2);
    assert_eq!(page["total_pages"], 2);
    assert_eq!(page["has_next"], true);
    assert_eq!(page["has_previous"], false);
}

// =============================================================================
// Webhook contract
// =============================================================================

#[tokio::test]
async fn test_webhook_signature_failures_are_bad_requests() {
    let ctx = TestContext::new();
    let event = completed_session_event("cs_test_1", "1", "ORD-X-0000", 10_800);
    let body = serde_json::to_vec(&event).unwrap();

    let (status, response) = ctx.post_webhook(body.clone(), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"], "Missing signature");

    let (status, response) = ctx.post_webhook(body.clone(), Some("t=1,v1=deadbeef")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"], "Invalid signature");

    let stale = ctx
        .state
        .webhook_verifier()
        .signature_header(chrono::Utc::now().timestamp() - 3_600, &body)
        .unwrap();
    let (status, _) = ctx.post_webhook(body.clone(), Some(&stale)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let fresh = ctx
        .state
        .webhook_verifier()
        .signature_header(chrono::Utc::now().timestamp(), &body)
        .unwrap();
    let mut tampered = body;
    tampered.extend_from_slice(b"\n");
    let (status, response) = ctx.post_webhook(tampered, Some(&fresh)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"], "Invalid signature");
}

#[tokio::test]
async fn test_webhook_for_unknown_session_is_not_found() {
    let ctx = TestContext::new();

    let (status, _) = ctx
        .deliver_webhook(&completed_session_event("cs_missing", "1", "ORD-X-0000", 10_800))
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unhandled_event_type_is_acknowledged() {
    let ctx = TestContext::new();
    let mut shopper = shopper_with_cart(&ctx, 9).await;
    let (_, placed) = place_order(&mut shopper).await;
    let order_number = placed["order_number"].as_str().unwrap().to_string();
    let pending = order(&mut shopper, &order_number).await;
    let order_id = pending["id"].to_string();

    let mut event =
        completed_session_event(&format!("cs_test_{order_id}"), &order_id, &order_number, 10_800);
    event["type"] = json!("checkout.session.expired");

    let (status, body) = ctx.deliver_webhook(&event).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "received": true }));
    assert_eq!(order(&mut shopper, &order_number).await["status"], "PENDING");
}

#[tokio::test]
async fn test_underpaid_session_does_not_settle() {
    let ctx = TestContext::new();
    let mut shopper = shopper_with_cart(&ctx, 10).await;
    let (_, placed) = place_order(&mut shopper).await;
    let order_number = placed["order_number"].as_str().unwrap().to_string();
    let order_id = order(&mut shopper, &order_number).await["id"].to_string();

    let event =
        completed_session_event(&format!("cs_test_{order_id}"), &order_id, &order_number, 100);
    let (status, body) = ctx.deliver_webhook(&event).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Malformed event");
    assert_eq!(order(&mut shopper, &order_number).await["status"], "PENDING");
}

#[tokio::test]
async fn test_event_without_metadata_is_bad_request() {
    let ctx = TestContext::new();
    let event = json!({
        "id": "evt_1",
        "type": "checkout.session.completed",
        "data": { "object": { "id": "cs_test_1" } }
    });

    let (status, body) = ctx.deliver_webhook(&event).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Malformed event");
}

#[tokio::test]
async fn test_health() {
    let ctx = TestContext::new();
    let mut browser = ctx.browser();

    let (status, _) = browser.get("/health").await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = browser.get("/health/ready").await;
    assert_eq!(status, StatusCode::OK);
}
