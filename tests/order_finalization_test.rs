mod common;

use axum::http::{Method, StatusCode};
use common::TestApp;
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use serde_json::json;
use std::collections::HashMap;
use storefront_api::{
    auth::Shopper,
    entities::{coupon, order, Coupon, Order, PaymentStatus},
    errors::ServiceError,
    payments::{CheckoutSession, SessionPaymentStatus},
    services::checkout::StartCheckoutInput,
};

async fn checkout_paid_session(app: &TestApp, shopper: &Shopper, coupon_code: Option<&str>) -> String {
    let result = app
        .state
        .services
        .checkout
        .start(
            shopper,
            StartCheckoutInput {
                coupon_code: coupon_code.map(str::to_string),
                guest_email: Some("shopper@example.com".to_string()),
                shipping_name: Some("A Shopper".to_string()),
                shipping_country: Some("US".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    app.gateway.mark_paid(&result.payment_reference);
    result.payment_reference
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn webhook_finalization_creates_the_order_once() {
    let app = TestApp::new().await;
    let product_id = app.seed_product("Desk", dec!(120.00)).await;
    let coupon_id = app.seed_percentage_coupon("SAVE10", dec!(10)).await;

    let shopper = Shopper::guest("guest-webhook");
    app.state
        .services
        .carts
        .add_item(&shopper, product_id, 1)
        .await
        .unwrap();
    let reference = checkout_paid_session(&app, &shopper, Some("SAVE10")).await;

    let session = app.gateway.session(&reference).unwrap();
    let first = app
        .state
        .services
        .orders
        .finalize_from_session(&session)
        .await
        .unwrap();
    assert!(first.created);
    assert_eq!(first.order.payment_status, PaymentStatus::Paid);
    assert_eq!(first.order.discount_total, dec!(12.00));
    assert_eq!(first.order.amount_total, dec!(108.00));
    assert_eq!(first.order.guest_email.as_deref(), Some("shopper@example.com"));

    // Order lines were snapshotted.
    let items = app.state.services.orders.items_for(first.order.id).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].product_name, "Desk");
    assert_eq!(items[0].quantity, 1);
    assert_eq!(items[0].unit_price, dec!(120.00));

    // The cart was emptied.
    let view = app.state.services.carts.get_cart(&shopper).await.unwrap();
    assert_eq!(view.item_count, 0);

    // Coupon bookkeeping happened exactly once.
    let redeemed = Coupon::find_by_id(coupon_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(redeemed.usage_count, 1);

    // A second delivery of the same event resolves to the existing order.
    let second = app
        .state
        .services
        .orders
        .finalize_from_session(&session)
        .await
        .unwrap();
    assert!(!second.created);
    assert_eq!(second.order.id, first.order.id);

    let order_count = Order::find()
        .filter(order::Column::PaymentReference.eq(reference))
        .count(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(order_count, 1);

    let still_once = Coupon::find()
        .filter(coupon::Column::Id.eq(coupon_id))
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(still_once.usage_count, 1);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn client_fallback_finalizes_when_the_webhook_never_lands() {
    let app = TestApp::new().await;
    let product_id = app.seed_product("Chair", dec!(75.00)).await;

    let shopper = Shopper::guest("guest-fallback");
    app.state
        .services
        .carts
        .add_item(&shopper, product_id, 2)
        .await
        .unwrap();
    let reference = checkout_paid_session(&app, &shopper, None).await;

    // No webhook was delivered. The storefront polls, misses, and asks the
    // server to create the order from the session.
    let (status, _, _) = app
        .request(
            Method::GET,
            &format!("/api/orders/lookup-by-session?session_id={}", reference),
            None,
            &[],
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, body) = app
        .request(
            Method::POST,
            "/api/orders/create-from-session",
            Some(json!({ "session_id": reference })),
            &[],
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["payment_reference"], reference.as_str());
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
    let order_id = body["id"].as_str().unwrap().to_string();

    // Retrying the fallback is idempotent: 200, same order.
    let (status, _, body) = app
        .request(
            Method::POST,
            "/api/orders/create-from-session",
            Some(json!({ "session_id": reference })),
            &[],
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"].as_str().unwrap(), order_id);

    // And the lookup now finds it.
    let (status, _, body) = app
        .request(
            Method::GET,
            &format!("/api/orders/lookup-by-session?session_id={}", reference),
            None,
            &[],
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"].as_str().unwrap(), order_id);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn unpaid_sessions_cannot_be_finalized() {
    let app = TestApp::new().await;
    let product_id = app.seed_product("Table", dec!(200.00)).await;

    let shopper = Shopper::guest("guest-unpaid");
    app.state
        .services
        .carts
        .add_item(&shopper, product_id, 1)
        .await
        .unwrap();

    let result = app
        .state
        .services
        .checkout
        .start(
            &shopper,
            StartCheckoutInput {
                guest_email: Some("shopper@example.com".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    // Deliberately not marked paid.

    let err = app
        .state
        .services
        .orders
        .finalize_by_reference(&result.payment_reference)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::PaymentFailed(_)));

    let order_count = Order::find().count(&*app.state.db).await.unwrap();
    assert_eq!(order_count, 0);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn finalization_falls_back_to_the_metadata_snapshot_when_the_cart_is_gone() {
    let app = TestApp::new().await;
    let product_id = app.seed_product("Shelf", dec!(30.00)).await;

    let shopper = Shopper::guest("guest-lost-cart");
    app.state
        .services
        .carts
        .add_item(&shopper, product_id, 3)
        .await
        .unwrap();
    let reference = checkout_paid_session(&app, &shopper, None).await;

    // The cart disappears between checkout and finalization.
    app.state.services.carts.clear_cart(&shopper).await.unwrap();

    let outcome = app
        .state
        .services
        .orders
        .finalize_by_reference(&reference)
        .await
        .unwrap();
    assert!(outcome.created);

    let items = app.state.services.orders.items_for(outcome.order.id).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].product_name, "Shelf");
    assert_eq!(items[0].quantity, 3);
    assert_eq!(items[0].unit_price, dec!(30.00));
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn finalization_refuses_a_session_with_no_line_source() {
    let app = TestApp::new().await;

    // A settled session that carries neither a cart reference nor a line
    // snapshot. An order built from it would have no items.
    let session = CheckoutSession {
        id: "cs_no_lines".to_string(),
        url: None,
        payment_status: SessionPaymentStatus::Paid,
        amount_total: 5000,
        currency: "usd".to_string(),
        customer_email: Some("shopper@example.com".to_string()),
        metadata: HashMap::new(),
    };

    let err = app
        .state
        .services
        .orders
        .finalize_from_session(&session)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::OrderError(_)), "got: {:?}", err);

    let order_count = Order::find().count(&*app.state.db).await.unwrap();
    assert_eq!(order_count, 0);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn concurrent_finalizations_converge_on_one_order() {
    let app = TestApp::new().await;
    let product_id = app.seed_product("Bench", dec!(90.00)).await;

    let shopper = Shopper::guest("guest-race");
    app.state
        .services
        .carts
        .add_item(&shopper, product_id, 1)
        .await
        .unwrap();
    let reference = checkout_paid_session(&app, &shopper, None).await;
    let session = app.gateway.session(&reference).unwrap();

    // The webhook delivery and the client fallback race for the same
    // session. The loser must resolve to the winner's order, not fail and
    // not duplicate it.
    let (webhook, fallback) = tokio::join!(
        app.state.services.orders.finalize_from_session(&session),
        app.state.services.orders.finalize_by_reference(&reference),
    );
    let webhook = webhook.unwrap();
    let fallback = fallback.unwrap();

    assert_eq!(webhook.order.id, fallback.order.id);
    assert_ne!(
        webhook.created, fallback.created,
        "exactly one caller creates the order"
    );

    let order_count = Order::find()
        .filter(order::Column::PaymentReference.eq(reference))
        .count(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(order_count, 1);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn order_history_is_scoped_to_the_signed_in_user() {
    let app = TestApp::new().await;
    let product_id = app.seed_product("Rug", dec!(60.00)).await;

    let user_id = uuid::Uuid::new_v4();
    let shopper = Shopper::user(user_id);
    app.state
        .services
        .carts
        .add_item(&shopper, product_id, 1)
        .await
        .unwrap();
    let reference = checkout_paid_session(&app, &shopper, None).await;
    app.state
        .services
        .orders
        .finalize_by_reference(&reference)
        .await
        .unwrap();

    let token = app.token_for(user_id);
    let auth = format!("Bearer {}", token);
    let (status, _, body) = app
        .request(Method::GET, "/api/orders", None, &[("authorization", &auth)])
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    let order_id = body["data"][0]["id"].as_str().unwrap().to_string();

    // Another user sees nothing, and cannot fetch the order directly.
    let other = app.token_for(uuid::Uuid::new_v4());
    let other_auth = format!("Bearer {}", other);
    let (_, _, body) = app
        .request(Method::GET, "/api/orders", None, &[("authorization", &other_auth)])
        .await;
    assert!(body["data"].as_array().unwrap().is_empty());

    let (status, _, _) = app
        .request(
            Method::GET,
            &format!("/api/orders/{}", order_id),
            None,
            &[("authorization", &other_auth)],
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Anonymous access to order history is refused outright.
    let (status, _, _) = app.request(Method::GET, "/api/orders", None, &[]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
