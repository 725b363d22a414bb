//! Test utilities and fixtures for Reelpay integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use hmac::{Hmac, Mac};
use rusqlite::Connection;
use serde_json::Value;
use sha2::Sha256;
use tempfile::TempDir;
use tower::ServiceExt;

pub use reelpay::collaborators::{
    CollaboratorError, HostedVideo, TranscodePoll, TranscodeStatus, Transcoder, Unconfigured, VideoHost,
    async_trait,
};
pub use reelpay::config::{LedgerSettings, WebhookSecrets};
pub use reelpay::db::{AppState, create_pool, init_audit_db, init_db, queries};
pub use reelpay::models::*;
pub use reelpay::payments::PaymentProvider;

pub const ONE_DAY: i64 = 86400;
pub const ONE_MONTH: i64 = 30 * ONE_DAY;

pub const PAYPAL_SECRET: &str = "paypal_test_secret";
pub const PORTONE_SECRET: &str = "whsec_cG9ydG9uZS10ZXN0LXNlY3JldA==";
pub const CONFIRMATION_SECRET: &str = "confirmation_test_secret";

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Create an in-memory test database with schema initialized
pub fn setup_test_db() -> Connection {
    let conn = Connection::open_in_memory().expect("Failed to create in-memory database");
    init_db(&conn).expect("Failed to initialize schema");
    conn
}

pub fn test_settings() -> LedgerSettings {
    LedgerSettings::default()
}

/// App state backed by files in a temp dir, so every pooled connection sees
/// the same database. Keep the `TempDir` alive for the duration of the test.
pub fn create_test_app_state() -> (AppState, TempDir) {
    create_test_app_state_with(Arc::new(Unconfigured), Arc::new(Unconfigured))
}

pub fn create_test_app_state_with(
    transcoder: Arc<dyn Transcoder>,
    video_host: Arc<dyn VideoHost>,
) -> (AppState, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db_path = dir.path().join("reelpay.db");
    let audit_path = dir.path().join("reelpay_audit.db");

    let pool = create_pool(db_path.to_str().unwrap()).unwrap();
    init_db(&pool.get().unwrap()).unwrap();
    let audit_pool = create_pool(audit_path.to_str().unwrap()).unwrap();
    init_audit_db(&audit_pool.get().unwrap()).unwrap();

    let state = AppState {
        db: pool,
        audit: audit_pool,
        audit_log_enabled: true,
        dev_mode: false,
        webhook_secrets: Arc::new(WebhookSecrets {
            paypal: Some(PAYPAL_SECRET.to_string()),
            portone: Some(PORTONE_SECRET.to_string()),
            unified: Some(CONFIRMATION_SECRET.to_string()),
        }),
        ledger: Arc::new(test_settings()),
        transcoder,
        video_host,
        processing_timeout_secs: 3600,
    };
    (state, dir)
}

/// Every route the server exposes, without rate limiting.
pub fn test_app(state: AppState) -> Router {
    Router::new()
        .merge(reelpay::handlers::public_router())
        .merge(reelpay::handlers::api_router(state.clone()))
        .with_state(state)
}

// ============ Fixtures ============

pub fn create_test_user(conn: &Connection, name: &str, country: &str, role: UserRole) -> User {
    let input = CreateUser {
        name: name.to_string(),
        country: country.to_string(),
        role,
    };
    queries::create_user(conn, &input).expect("Failed to create test user")
}

/// User plus a bearer API key for them.
pub fn create_test_user_with_key(
    conn: &Connection,
    name: &str,
    country: &str,
    role: UserRole,
) -> (User, String) {
    let user = create_test_user(conn, name, country, role);
    let (_, key) = queries::create_api_key(conn, &user.id, "test").expect("Failed to create API key");
    (user, key)
}

pub fn create_test_plan(conn: &Connection, price: f64, currency: &str) -> CatalogItem {
    let input = CreateCatalogItem {
        kind: CatalogKind::Plan,
        title: "Monthly Plan".to_string(),
        creator_id: None,
        price: Some(price),
        currency: Some(currency.to_string()),
        billing_interval: Some(BillingInterval::Month),
        video_url: None,
    };
    queries::create_catalog_item(conn, &input).expect("Failed to create test plan")
}

pub fn create_test_content(
    conn: &Connection,
    kind: CatalogKind,
    creator_id: Option<&str>,
    title: &str,
) -> CatalogItem {
    let input = CreateCatalogItem {
        kind,
        title: title.to_string(),
        creator_id: creator_id.map(str::to_string),
        price: Some(1000.0),
        currency: Some("USD".to_string()),
        billing_interval: None,
        video_url: Some(format!("https://videos.test/{}", title.to_lowercase().replace(' ', "-"))),
    };
    queries::create_catalog_item(conn, &input).expect("Failed to create test content")
}

/// Creator, viewer and one course owned by the creator.
pub struct Marketplace {
    pub creator: User,
    pub viewer: User,
    pub course: CatalogItem,
}

pub fn create_marketplace(conn: &Connection) -> Marketplace {
    let creator = create_test_user(conn, "Creator", "US", UserRole::Creator);
    let viewer = create_test_user(conn, "Viewer", "US", UserRole::Viewer);
    let course = create_test_content(conn, CatalogKind::Course, Some(&creator.id), "Footwork");
    Marketplace {
        creator,
        viewer,
        course,
    }
}

// ============ Events ============

pub fn payment(
    provider: PaymentProvider,
    transaction_id: &str,
    user_id: &str,
    subject_id: &str,
    amount: f64,
    currency: &str,
    kind: PaymentKind,
    status: ObservedStatus,
    charge: ChargeType,
    timestamp: i64,
) -> ProviderEvent {
    ProviderEvent::Payment(PaymentEvent {
        provider,
        provider_transaction_id: transaction_id.to_string(),
        user_id: user_id.to_string(),
        amount,
        currency: currency.to_string(),
        kind,
        plan_or_item_id: subject_id.to_string(),
        observed_status: status,
        charge,
        provider_timestamp: timestamp,
    })
}

/// Succeeded one-time purchase through the global provider.
pub fn purchase(transaction_id: &str, user_id: &str, item_id: &str, amount: f64, timestamp: i64) -> ProviderEvent {
    payment(
        PaymentProvider::Global,
        transaction_id,
        user_id,
        item_id,
        amount,
        "USD",
        PaymentKind::OneTimePurchase,
        ObservedStatus::Succeeded,
        ChargeType::Initial,
        timestamp,
    )
}

pub fn subscription_charge(
    transaction_id: &str,
    user_id: &str,
    plan_id: &str,
    status: ObservedStatus,
    charge: ChargeType,
    timestamp: i64,
) -> ProviderEvent {
    payment(
        PaymentProvider::Global,
        transaction_id,
        user_id,
        plan_id,
        9.99,
        "USD",
        PaymentKind::Subscription,
        status,
        charge,
        timestamp,
    )
}

pub fn cancellation(event_id: &str, user_id: &str, subject_id: &str, timestamp: i64) -> ProviderEvent {
    ProviderEvent::Cancellation(CancellationEvent {
        provider: PaymentProvider::Global,
        provider_event_id: event_id.to_string(),
        user_id: user_id.to_string(),
        plan_or_item_id: subject_id.to_string(),
        provider_timestamp: timestamp,
    })
}

pub fn refund(
    event_id: &str,
    original_transaction_id: &str,
    user_id: &str,
    subject_id: &str,
    amount: f64,
    timestamp: i64,
) -> ProviderEvent {
    ProviderEvent::Refund(RefundEvent {
        provider: PaymentProvider::Global,
        provider_event_id: event_id.to_string(),
        original_transaction_id: original_transaction_id.to_string(),
        user_id: user_id.to_string(),
        plan_or_item_id: subject_id.to_string(),
        amount,
        currency: "USD".to_string(),
        provider_timestamp: timestamp,
    })
}

// ============ Signatures ============

type HmacSha256 = Hmac<Sha256>;

pub fn sign_hex(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Standard Webhooks `webhook-signature` value for `{id}.{timestamp}.{body}`.
pub fn sign_standard(secret: &str, id: &str, timestamp: &str, body: &[u8]) -> String {
    use base64::{Engine, engine::general_purpose::STANDARD};

    let key = secret.strip_prefix("whsec_").unwrap_or(secret);
    let mut mac = HmacSha256::new_from_slice(key.as_bytes()).expect("HMAC can take key of any size");
    mac.update(id.as_bytes());
    mac.update(b".");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    format!("v1,{}", STANDARD.encode(mac.finalize().into_bytes()))
}

// ============ HTTP ============

pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    api_key: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(key) = api_key {
        builder = builder.header("Authorization", format!("Bearer {}", key));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    into_json(app.clone().oneshot(request).await.unwrap()).await
}

pub async fn into_json(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

// ============ Mock collaborators ============

/// Transcoder that replays scripted poll results, then repeats the last one.
#[derive(Default)]
pub struct MockTranscoder {
    pub submitted: Mutex<Vec<String>>,
    pub polls: Mutex<VecDeque<TranscodePoll>>,
}

impl MockTranscoder {
    pub fn with_polls(polls: Vec<TranscodePoll>) -> Self {
        Self {
            submitted: Mutex::new(Vec::new()),
            polls: Mutex::new(polls.into()),
        }
    }
}

#[async_trait]
impl Transcoder for MockTranscoder {
    async fn submit(&self, source_ref: &str, _operations: &[EditOperation]) -> Result<String, CollaboratorError> {
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(source_ref.to_string());
        Ok(format!("tx_job_{}", submitted.len()))
    }

    async fn poll(&self, _job_id: &str) -> Result<TranscodePoll, CollaboratorError> {
        let mut polls = self.polls.lock().unwrap();
        let next = if polls.len() > 1 { polls.pop_front() } else { polls.front().cloned() };
        next.ok_or(CollaboratorError::NotConfigured("transcoder"))
    }
}

pub fn poll_result(status: TranscodeStatus, result_ref: Option<&str>) -> TranscodePoll {
    TranscodePoll {
        status,
        result_ref: result_ref.map(str::to_string),
        error: None,
    }
}

#[derive(Default)]
pub struct MockVideoHost {
    pub uploads: Mutex<Vec<String>>,
}

#[async_trait]
impl VideoHost for MockVideoHost {
    async fn upload(&self, asset_ref: &str, _title: &str) -> Result<HostedVideo, CollaboratorError> {
        let mut uploads = self.uploads.lock().unwrap();
        uploads.push(asset_ref.to_string());
        let video_id = format!("vid_{}", uploads.len());
        Ok(HostedVideo {
            url: format!("https://host.test/{}", video_id),
            video_id,
        })
    }
}
