#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{HeaderMap, Method, Request, StatusCode},
    middleware, Router,
};
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ConnectionTrait, DatabaseBackend as DbBackend, Set, Statement};
use serde_json::Value;
use storefront_api::{
    auth::Claims,
    config::AppConfig,
    db,
    entities::{category, coupon, gift_card, product, CouponScope, CouponType},
    errors::ServiceError,
    events::{self, EventSender},
    payments::{
        CheckoutSession, CreateSessionRequest, PaymentGateway, SessionPaymentStatus,
    },
    tracing as request_tracing, AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";
pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_secret";

/// In-memory payment gateway: records created sessions and lets tests flip
/// them to paid before simulating the webhook or client fallback.
pub struct FakeGateway {
    sessions: Mutex<HashMap<String, CheckoutSession>>,
    counter: AtomicU64,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(1),
        }
    }

    /// Marks a session as paid, the way the hosted payment page would.
    pub fn mark_paid(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(session) = sessions.get_mut(session_id) {
            session.payment_status = SessionPaymentStatus::Paid;
        }
    }

    pub fn session(&self, session_id: &str) -> Option<CheckoutSession> {
        self.sessions.lock().unwrap().get(session_id).cloned()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_checkout_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<CheckoutSession, ServiceError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let id = format!("cs_test_{}", n);

        let gross: i64 = request
            .line_items
            .iter()
            .map(|item| item.unit_amount * item.quantity)
            .sum();
        let amount_total = (gross - request.discount_amount).max(0);
        let payment_status = if amount_total == 0 {
            SessionPaymentStatus::NoPaymentRequired
        } else {
            SessionPaymentStatus::Unpaid
        };

        let session = CheckoutSession {
            id: id.clone(),
            url: Some(format!("https://pay.test/session/{}", id)),
            payment_status,
            amount_total,
            currency: request.currency.to_uppercase(),
            customer_email: request.customer_email,
            metadata: request.metadata,
        };
        self.sessions.lock().unwrap().insert(id, session.clone());
        Ok(session)
    }

    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<CheckoutSession, ServiceError> {
        self.session(session_id)
            .ok_or_else(|| ServiceError::NotFound("checkout session".to_string()))
    }
}

/// Helper harness: application state and router over a fresh SQLite file.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub gateway: Arc<FakeGateway>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let db_file = std::env::temp_dir().join(format!("storefront_test_{}.db", Uuid::new_v4()));
        let db_url = format!("sqlite://{}?mode=rwc", db_file.display());

        let mut cfg = AppConfig::new(db_url, TEST_JWT_SECRET, "127.0.0.1", 18080, "test");
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.stripe_webhook_secret = Some(TEST_WEBHOOK_SECRET.to_string());

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        create_schema(&pool).await;

        let (event_tx, event_rx) = mpsc::channel(64);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(FakeGateway::new());
        let state = AppState::new(
            Arc::new(pool),
            Arc::new(cfg),
            gateway.clone(),
            Arc::new(EventSender::new(event_tx)),
        );

        let router = Router::new()
            .nest("/api", storefront_api::api_routes())
            .layer(middleware::from_fn(request_tracing::request_id_middleware))
            .with_state(state.clone());

        Self {
            router,
            state,
            gateway,
            _event_task: event_task,
        }
    }

    /// Signs a bearer token for a user id with the test secret.
    pub fn token_for(&self, user_id: Uuid) -> String {
        let claims = Claims {
            sub: user_id.to_string(),
            exp: (Utc::now().timestamp() + 3600) as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
        )
        .expect("failed to sign test token")
    }

    /// Sends a request with a raw (pre-serialized) body. Used by webhook
    /// tests, where the signature covers the exact bytes sent.
    pub async fn request_raw(
        &self,
        method: Method,
        uri: &str,
        body: String,
        headers: &[(&str, &str)],
    ) -> (StatusCode, HeaderMap, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder
            .header("content-type", "application/json")
            .body(Body::from(body))
            .expect("failed to build request");

        self.send(request).await
    }

    /// Sends a JSON request through the router and decodes the response.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> (StatusCode, HeaderMap, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("failed to build request");

        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("request failed");

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("failed to read body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, headers, json)
    }

    pub async fn seed_category(&self, name: &str, slug: &str) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        category::ActiveModel {
            id: Set(id),
            name: Set(name.to_string()),
            slug: Set(slug.to_string()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("failed to seed category");
        id
    }

    pub async fn seed_product(&self, name: &str, price: Decimal) -> Uuid {
        self.seed_product_in_category(name, price, None).await
    }

    pub async fn seed_product_in_category(
        &self,
        name: &str,
        price: Decimal,
        category_id: Option<Uuid>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        product::ActiveModel {
            id: Set(id),
            name: Set(name.to_string()),
            slug: Set(format!("{}-{}", name.to_lowercase().replace(' ', "-"), id)),
            description: Set(None),
            price: Set(price),
            currency: Set("USD".to_string()),
            category_id: Set(category_id),
            image_url: Set(None),
            active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("failed to seed product");
        id
    }

    pub async fn seed_percentage_coupon(&self, code: &str, percent: Decimal) -> Uuid {
        self.seed_coupon(code, CouponType::Percentage, percent, None)
            .await
    }

    pub async fn seed_fixed_coupon(&self, code: &str, amount: Decimal) -> Uuid {
        self.seed_coupon(code, CouponType::FixedAmount, amount, None)
            .await
    }

    pub async fn seed_coupon(
        &self,
        code: &str,
        coupon_type: CouponType,
        value: Decimal,
        usage_limit: Option<i32>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        coupon::ActiveModel {
            id: Set(id),
            code: Set(code.to_string()),
            description: Set(None),
            coupon_type: Set(coupon_type),
            discount_value: Set(value),
            max_discount_amount: Set(None),
            min_purchase_amount: Set(None),
            starts_at: Set(now - chrono::Duration::days(1)),
            expires_at: Set(None),
            usage_limit: Set(usage_limit),
            per_user_limit: Set(None),
            first_order_only: Set(false),
            scope: Set(CouponScope::All),
            product_ids: Set(None),
            category_ids: Set(None),
            usage_count: Set(0),
            active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("failed to seed coupon");
        id
    }

    pub async fn seed_gift_card(&self, code: &str, balance: Decimal) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        gift_card::ActiveModel {
            id: Set(id),
            code: Set(code.to_string()),
            initial_amount: Set(balance),
            remaining_amount: Set(balance),
            starts_at: Set(now - chrono::Duration::days(1)),
            expires_at: Set(None),
            active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("failed to seed gift card");
        id
    }
}

async fn create_schema(pool: &sea_orm::DatabaseConnection) {
    let statements = [
        r#"CREATE TABLE categories (
            id TEXT PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            slug TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );"#,
        r#"CREATE TABLE products (
            id TEXT PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            slug TEXT NOT NULL UNIQUE,
            description TEXT,
            price REAL NOT NULL,
            currency TEXT NOT NULL,
            category_id TEXT,
            image_url TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );"#,
        r#"CREATE TABLE carts (
            id TEXT PRIMARY KEY NOT NULL,
            user_id TEXT,
            session_token TEXT UNIQUE,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );"#,
        r#"CREATE TABLE cart_items (
            id TEXT PRIMARY KEY NOT NULL,
            cart_id TEXT NOT NULL,
            product_id TEXT NOT NULL,
            quantity INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(cart_id, product_id)
        );"#,
        r#"CREATE TABLE orders (
            id TEXT PRIMARY KEY NOT NULL,
            payment_reference TEXT NOT NULL UNIQUE,
            user_id TEXT,
            guest_email TEXT,
            guest_phone TEXT,
            amount_total REAL NOT NULL,
            discount_total REAL NOT NULL,
            gift_card_total REAL NOT NULL,
            currency TEXT NOT NULL,
            payment_status TEXT NOT NULL,
            fulfillment_status TEXT NOT NULL,
            coupon_id TEXT,
            gift_card_id TEXT,
            shipping_name TEXT,
            shipping_address TEXT,
            shipping_city TEXT,
            shipping_postal_code TEXT,
            shipping_country TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );"#,
        r#"CREATE TABLE order_items (
            id TEXT PRIMARY KEY NOT NULL,
            order_id TEXT NOT NULL,
            product_id TEXT,
            product_name TEXT NOT NULL,
            quantity INTEGER NOT NULL,
            unit_price REAL NOT NULL,
            created_at TEXT NOT NULL
        );"#,
        r#"CREATE TABLE coupons (
            id TEXT PRIMARY KEY NOT NULL,
            code TEXT NOT NULL UNIQUE,
            description TEXT,
            coupon_type TEXT NOT NULL,
            discount_value REAL NOT NULL,
            max_discount_amount REAL,
            min_purchase_amount REAL,
            starts_at TEXT NOT NULL,
            expires_at TEXT,
            usage_limit INTEGER,
            per_user_limit INTEGER,
            first_order_only INTEGER NOT NULL DEFAULT 0,
            scope TEXT NOT NULL,
            product_ids TEXT,
            category_ids TEXT,
            usage_count INTEGER NOT NULL DEFAULT 0,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );"#,
        r#"CREATE TABLE coupon_usage (
            id TEXT PRIMARY KEY NOT NULL,
            coupon_id TEXT NOT NULL,
            user_id TEXT,
            order_id TEXT NOT NULL,
            amount REAL NOT NULL,
            created_at TEXT NOT NULL
        );"#,
        r#"CREATE TABLE gift_cards (
            id TEXT PRIMARY KEY NOT NULL,
            code TEXT NOT NULL UNIQUE,
            initial_amount REAL NOT NULL,
            remaining_amount REAL NOT NULL,
            starts_at TEXT NOT NULL,
            expires_at TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );"#,
        r#"CREATE TABLE gift_card_transactions (
            id TEXT PRIMARY KEY NOT NULL,
            gift_card_id TEXT NOT NULL,
            order_id TEXT NOT NULL,
            amount REAL NOT NULL,
            balance_after REAL NOT NULL,
            created_at TEXT NOT NULL
        );"#,
    ];

    for sql in statements {
        pool.execute(Statement::from_string(DbBackend::Sqlite, sql.to_string()))
            .await
            .expect("failed to create test schema");
    }
}
