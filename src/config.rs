use std::env;
use std::str::FromStr;

/// Per-IP rate limit for the authenticated API. `0` disables the limiter.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub api_rpm: u32,
}

impl RateLimitConfig {
    pub fn disabled() -> Self {
        Self { api_rpm: 0 }
    }
}

/// Knobs for the admit-and-apply pipeline, the ledger and the maintenance loop.
#[derive(Debug, Clone)]
pub struct LedgerSettings {
    /// Creator share applied when no per-creator override exists.
    pub default_creator_share: f64,
    /// How long an admitted event may stay in flight before another worker may reclaim it.
    pub admission_lease_secs: i64,
    /// Age after which a pending admission is picked up by the repair job.
    pub repair_grace_secs: i64,
    /// Grace added to `expires_at` before an unpaid subscription is canceled.
    pub expiry_grace_secs: i64,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            default_creator_share: 0.8,
            admission_lease_secs: 60,
            repair_grace_secs: 300,
            expiry_grace_secs: 86400,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WebhookSecrets {
    pub paypal: Option<String>,
    pub portone: Option<String>,
    pub unified: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CollaboratorConfig {
    pub transcoder_url: Option<String>,
    pub transcoder_api_key: Option<String>,
    pub video_host_url: Option<String>,
    pub video_host_token: Option<String>,
    pub request_timeout_secs: u64,
    /// Jobs still queued/running after this long are marked failed.
    pub processing_timeout_secs: i64,
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub audit_database_path: String,
    pub bootstrap_admin_name: Option<String>,
    pub dev_mode: bool,
    pub audit_log_enabled: bool,
    pub rate_limit: RateLimitConfig,
    pub webhook_secrets: WebhookSecrets,
    pub ledger: LedgerSettings,
    pub repair_interval_secs: u64,
    pub collaborators: CollaboratorConfig,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("REELPAY_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let defaults = LedgerSettings::default();
        let mut default_creator_share =
            env_or("DEFAULT_CREATOR_SHARE", defaults.default_creator_share);
        if !(0.0..=1.0).contains(&default_creator_share) {
            tracing::warn!(
                "DEFAULT_CREATOR_SHARE={} is outside 0..=1, falling back to {}",
                default_creator_share,
                defaults.default_creator_share
            );
            default_creator_share = defaults.default_creator_share;
        }

        Self {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env_or("PORT", 3000),
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "reelpay.db".to_string()),
            audit_database_path: env::var("AUDIT_DATABASE_PATH")
                .unwrap_or_else(|_| "reelpay_audit.db".to_string()),
            bootstrap_admin_name: env_opt("BOOTSTRAP_ADMIN_NAME"),
            dev_mode,
            audit_log_enabled: env_or("AUDIT_LOG_ENABLED", true),
            rate_limit: RateLimitConfig {
                api_rpm: env_or("RATE_LIMIT_API_RPM", 120),
            },
            webhook_secrets: WebhookSecrets {
                paypal: env_opt("PAYPAL_WEBHOOK_SECRET"),
                portone: env_opt("PORTONE_WEBHOOK_SECRET"),
                unified: env_opt("PAYMENT_CONFIRMATION_SECRET"),
            },
            ledger: LedgerSettings {
                default_creator_share,
                admission_lease_secs: env_or("ADMISSION_LEASE_SECS", defaults.admission_lease_secs),
                repair_grace_secs: env_or("REPAIR_GRACE_SECS", defaults.repair_grace_secs),
                expiry_grace_secs: env_or("EXPIRY_GRACE_SECS", defaults.expiry_grace_secs),
            },
            repair_interval_secs: env_or("REPAIR_INTERVAL_SECS", 60),
            collaborators: CollaboratorConfig {
                transcoder_url: env_opt("TRANSCODER_URL"),
                transcoder_api_key: env_opt("TRANSCODER_API_KEY"),
                video_host_url: env_opt("VIDEO_HOST_URL"),
                video_host_token: env_opt("VIDEO_HOST_TOKEN"),
                request_timeout_secs: env_or("COLLABORATOR_TIMEOUT_SECS", 30),
                processing_timeout_secs: env_or("PROCESSING_TIMEOUT_SECS", 2 * 60 * 60),
                poll_interval_secs: env_or("PROCESSING_POLL_SECS", 15),
            },
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
