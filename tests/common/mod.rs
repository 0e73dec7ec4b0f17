use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::Value;
use souq_api::{
    auth::Claims,
    config::{AppConfig, PaymobConfig},
    db,
    entities::product,
    events::{self, EventSender},
    services::catalog::CatalogService,
    services::orders::OrderService,
    services::paymob::{BillingData, PaymentGateway},
    webhooks::HmacVerifier,
    AppState,
};
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tower::ServiceExt;
use uuid::Uuid;

pub const JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";
pub const HMAC_SECRET: &str = "whsec_test_secret";

/// Scriptable stand-in for the Paymob client. Records every handshake and
/// can be told to fail, which must roll back the enclosing placement.
pub struct MockGateway {
    fail_next: Mutex<bool>,
    calls: Mutex<Vec<(Decimal, Uuid)>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            fail_next: Mutex::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub async fn fail_next(&self) {
        *self.fail_next.lock().await = true;
    }

    pub async fn calls(&self) -> Vec<(Decimal, Uuid)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl PaymentGateway for MockGateway {
    async fn request_payment_token(
        &self,
        amount: Decimal,
        merchant_order_id: Uuid,
        _billing: &BillingData,
    ) -> Result<String, souq_api::errors::ServiceError> {
        let mut fail = self.fail_next.lock().await;
        if *fail {
            *fail = false;
            return Err(souq_api::errors::ServiceError::GatewayAuth(
                "scripted failure".to_string(),
            ));
        }
        self.calls.lock().await.push((amount, merchant_order_id));
        Ok(format!("tok_{}", merchant_order_id.simple()))
    }
}

/// Helper harness backed by a throwaway SQLite database file. A single pool
/// connection keeps concurrent requests honest about their SQL-level
/// guarantees instead of relying on backend row locks.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<MockGateway>,
    pub user_id: Uuid,
    token: String,
    db_file: std::path::PathBuf,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let db_file =
            std::env::temp_dir().join(format!("souq_test_{}.db", Uuid::new_v4().simple()));

        let paymob = PaymobConfig {
            api_key: "pk_test".to_string(),
            integration_id: 4455,
            hmac_secret: HMAC_SECRET.to_string(),
            base_url: "http://127.0.0.1:1".to_string(),
            currency: "EGP".to_string(),
            request_timeout_secs: 5,
        };

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_file.display()),
            JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
            paymob,
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(MockGateway::new());
        let order_service = OrderService::new(
            db_arc.clone(),
            gateway.clone() as Arc<dyn PaymentGateway>,
            event_sender.clone(),
        );
        let catalog_service = CatalogService::new(db_arc.clone());
        let hmac_verifier = HmacVerifier::new(HMAC_SECRET);

        let state = AppState {
            db: db_arc,
            config: cfg.clone(),
            event_sender,
            order_service,
            catalog_service,
            hmac_verifier,
        };

        let user_id = Uuid::new_v4();
        let token = mint_token(user_id);

        let router = souq_api::app_router(state.clone());

        Self {
            router,
            state,
            gateway,
            user_id,
            token,
            db_file,
            _event_task: event_task,
        }
    }

    /// Access the bearer token for the default test user.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Convenience helper for authenticated JSON requests.
    pub async fn request_authenticated(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        self.request(method, uri, body, Some(self.token())).await
    }

    /// Inserts a product directly into the database.
    pub async fn seed_product(&self, name: &str, price: Decimal, stock: i32) -> product::Model {
        let now = Utc::now();
        let model = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            slug: Set(name.to_lowercase().replace(' ', "-")),
            name: Set(name.to_string()),
            name_ar: Set(format!("{} (ar)", name)),
            description: Set(None),
            price: Set(price),
            stock: Set(stock),
            image_url: Set(None),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        };
        model
            .insert(&*self.state.db)
            .await
            .expect("seed product for tests")
    }

    /// Reads the current stock level of a product.
    pub async fn product_stock(&self, product_id: Uuid) -> i32 {
        product::Entity::find_by_id(product_id)
            .one(&*self.state.db)
            .await
            .expect("read product")
            .expect("product exists")
            .stock
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
        let _ = std::fs::remove_file(&self.db_file);
    }
}

/// Mints a bearer token for the given user the way the external auth
/// service would.
pub fn mint_token(user_id: Uuid) -> String {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        iss: "souq-auth".to_string(),
        iat: now,
        exp: now + 3600,
    };
    jsonwebtoken::encode(
        &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("encode access token")
}

/// Builds a gateway transaction callback for the given order.
pub fn transaction_payload(
    order_id: Uuid,
    success: bool,
    transaction_id: i64,
    amount_cents: i64,
) -> souq_api::webhooks::TransactionPayload {
    use souq_api::webhooks::{OrderRef, SourceData, TransactionPayload};

    TransactionPayload {
        id: transaction_id,
        amount_cents,
        created_at: "2024-03-01T10:15:30.123456".to_string(),
        currency: "EGP".to_string(),
        error_occured: !success,
        has_parent_transaction: false,
        integration_id: 4455,
        is_3d_secure: true,
        is_auth: false,
        is_capture: false,
        is_refunded: false,
        is_standalone_payment: true,
        is_voided: false,
        order: OrderRef {
            id: 770_000 + transaction_id,
            merchant_order_id: order_id.to_string(),
        },
        owner: 12,
        pending: false,
        source_data: SourceData {
            pan: "2346".to_string(),
            sub_type: "MasterCard".to_string(),
            kind: "card".to_string(),
        },
        success,
    }
}

/// Signs a payload with the test webhook secret and returns the webhook URI
/// plus the enveloped JSON body.
pub fn signed_webhook(
    payload: &souq_api::webhooks::TransactionPayload,
) -> (String, Value) {
    let digest = HmacVerifier::new(HMAC_SECRET)
        .sign(payload)
        .expect("sign test payload");
    let uri = format!("/api/v1/webhooks/payment?hmac={}", digest);
    let body = serde_json::json!({ "obj": payload });
    (uri, body)
}

/// Deserializes a response body into JSON.
pub async fn response_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("response body is json")
}

#[allow(dead_code)]
pub fn assert_status(response: &axum::response::Response, expected: StatusCode) {
    assert_eq!(response.status(), expected);
}
