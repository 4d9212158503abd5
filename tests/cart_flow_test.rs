mod common;

use axum::http::{HeaderMap, Method, StatusCode};
use common::TestApp;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use uuid::Uuid;

fn amount(value: &Value) -> Decimal {
    value
        .as_str()
        .unwrap_or_else(|| panic!("expected a decimal string, got {}", value))
        .parse()
        .expect("unparseable decimal")
}

fn cart_cookie(headers: &HeaderMap) -> String {
    let set_cookie = headers
        .get("set-cookie")
        .expect("expected a Set-Cookie header")
        .to_str()
        .unwrap();
    assert!(set_cookie.starts_with("cart_session_id="));
    assert!(set_cookie.contains("HttpOnly"));
    set_cookie.split(';').next().unwrap().to_string()
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn anonymous_add_mints_guest_cookie_and_cart_persists() {
    let app = TestApp::new().await;
    let product_id = app.seed_product("Blue Mug", dec!(19.99)).await;

    let (status, headers, body) = app
        .request(
            Method::POST,
            "/api/cart/add",
            Some(json!({ "product_id": product_id, "quantity": 2 })),
            &[],
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let cookie = cart_cookie(&headers);
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
    assert_eq!(body["item_count"], 2);
    assert_eq!(amount(&body["subtotal"]), dec!(39.98));

    // The same cookie resolves the same cart on a later request.
    let (status, headers, body) = app
        .request(Method::GET, "/api/cart", None, &[("cookie", &cookie)])
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers.get("set-cookie").is_none(), "reads must not set cookies");
    assert_eq!(body["item_count"], 2);

    // Without the cookie there is no cart.
    let (status, _, body) = app.request(Method::GET, "/api/cart", None, &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["item_count"], 0);
    assert!(body["cart_id"].is_null());
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn adding_the_same_product_increments_quantity() {
    let app = TestApp::new().await;
    let product_id = app.seed_product("Notebook", dec!(5.00)).await;

    let (_, headers, _) = app
        .request(
            Method::POST,
            "/api/cart/add",
            Some(json!({ "product_id": product_id, "quantity": 1 })),
            &[],
        )
        .await;
    let cookie = cart_cookie(&headers);

    let (status, _, body) = app
        .request(
            Method::POST,
            "/api/cart/add",
            Some(json!({ "product_id": product_id, "quantity": 3 })),
            &[("cookie", &cookie)],
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
    assert_eq!(body["item_count"], 4);
    assert_eq!(amount(&body["subtotal"]), dec!(20.00));
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn zero_quantity_update_removes_the_line() {
    let app = TestApp::new().await;
    let mug = app.seed_product("Mug", dec!(10.00)).await;
    let pen = app.seed_product("Pen", dec!(2.00)).await;

    let (_, headers, _) = app
        .request(
            Method::POST,
            "/api/cart/add",
            Some(json!({ "product_id": mug, "quantity": 1 })),
            &[],
        )
        .await;
    let cookie = cart_cookie(&headers);
    app.request(
        Method::POST,
        "/api/cart/add",
        Some(json!({ "product_id": pen, "quantity": 5 })),
        &[("cookie", &cookie)],
    )
    .await;

    let (status, _, body) = app
        .request(
            Method::POST,
            "/api/cart/update",
            Some(json!({ "product_id": mug, "quantity": 0 })),
            &[("cookie", &cookie)],
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
    assert_eq!(amount(&body["subtotal"]), dec!(10.00));

    // Updating a line that is gone is a 404, not a silent no-op.
    let (status, _, _) = app
        .request(
            Method::POST,
            "/api/cart/update",
            Some(json!({ "product_id": mug, "quantity": 2 })),
            &[("cookie", &cookie)],
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn clear_empties_the_cart_but_keeps_the_session() {
    let app = TestApp::new().await;
    let product_id = app.seed_product("Poster", dec!(12.50)).await;

    let (_, headers, _) = app
        .request(
            Method::POST,
            "/api/cart/add",
            Some(json!({ "product_id": product_id, "quantity": 2 })),
            &[],
        )
        .await;
    let cookie = cart_cookie(&headers);

    let (status, _, body) = app
        .request(Method::POST, "/api/cart/clear", None, &[("cookie", &cookie)])
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["item_count"], 0);
    assert!(!body["cart_id"].is_null());
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn authenticated_and_guest_carts_are_separate() {
    let app = TestApp::new().await;
    let product_id = app.seed_product("Lamp", dec!(40.00)).await;
    let user_id = Uuid::new_v4();
    let token = app.token_for(user_id);
    let auth = format!("Bearer {}", token);

    // Guest cart with one item.
    let (_, headers, _) = app
        .request(
            Method::POST,
            "/api/cart/add",
            Some(json!({ "product_id": product_id, "quantity": 1 })),
            &[],
        )
        .await;
    let cookie = cart_cookie(&headers);

    // Logging in does not merge: the user's cart starts empty even with the
    // guest cookie still on the request.
    let (status, headers, body) = app
        .request(
            Method::GET,
            "/api/cart",
            None,
            &[("cookie", &cookie), ("authorization", &auth)],
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers.get("set-cookie").is_none());
    assert_eq!(body["item_count"], 0);

    // The guest cart is still there for the cookie alone.
    let (_, _, body) = app
        .request(Method::GET, "/api/cart", None, &[("cookie", &cookie)])
        .await;
    assert_eq!(body["item_count"], 1);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn unknown_product_is_rejected() {
    let app = TestApp::new().await;
    let (status, _, _) = app
        .request(
            Method::POST,
            "/api/cart/add",
            Some(json!({ "product_id": Uuid::new_v4(), "quantity": 1 })),
            &[],
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
