pub mod from_row;
mod schema;
pub mod queries;

pub use schema::{init_audit_db, init_db};

use std::sync::Arc;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::collaborators::{Transcoder, VideoHost};
use crate::config::{LedgerSettings, WebhookSecrets};

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state holding database pools, settings and collaborator clients
#[derive(Clone)]
pub struct AppState {
    /// Main database pool (ledger, entitlements, payouts, catalog)
    pub db: DbPool,
    /// Audit log database pool (separate file to isolate growth)
    pub audit: DbPool,
    pub audit_log_enabled: bool,
    /// Dev mode allows webhooks without configured secrets
    pub dev_mode: bool,
    pub webhook_secrets: Arc<WebhookSecrets>,
    pub ledger: Arc<LedgerSettings>,
    pub transcoder: Arc<dyn Transcoder>,
    pub video_host: Arc<dyn VideoHost>,
    /// Jobs older than this without reaching a terminal state are failed
    pub processing_timeout_secs: i64,
}

/// Writers wait this long for the SQLite lock instead of failing immediately.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path).with_init(|conn| {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "foreign_keys", "ON")
    });
    Pool::builder().max_size(10).build(manager)
}
