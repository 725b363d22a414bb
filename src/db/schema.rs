use rusqlite::Connection;

/// Initialize the main database schema (everything except audit logs)
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- Users (identity is owned elsewhere; we keep what payments and access need)
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            country TEXT NOT NULL,
            role TEXT NOT NULL CHECK (role IN ('viewer', 'creator', 'admin')),
            created_at INTEGER NOT NULL
        );

        -- API keys (only the hash is stored)
        CREATE TABLE IF NOT EXISTS api_keys (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            key_prefix TEXT NOT NULL,
            key_hash TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL,
            last_used_at INTEGER,
            revoked_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_api_keys_user ON api_keys(user_id);

        -- Catalog: plans, content items and bundles
        CREATE TABLE IF NOT EXISTS catalog_items (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL CHECK (kind IN ('plan', 'course', 'routine', 'drill', 'lesson', 'bundle')),
            title TEXT NOT NULL,
            creator_id TEXT REFERENCES users(id),
            price REAL,
            currency TEXT,
            billing_interval TEXT CHECK (billing_interval IS NULL OR billing_interval IN ('month', 'year')),
            video_url TEXT,
            external_video_id TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_catalog_items_creator ON catalog_items(creator_id);

        -- Entitlement to parent grants access to child (bundle -> item, plan -> item)
        CREATE TABLE IF NOT EXISTS catalog_inclusions (
            parent_id TEXT NOT NULL REFERENCES catalog_items(id) ON DELETE CASCADE,
            child_id TEXT NOT NULL REFERENCES catalog_items(id) ON DELETE CASCADE,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (parent_id, child_id),
            CHECK (parent_id <> child_id)
        );
        CREATE INDEX IF NOT EXISTS idx_catalog_inclusions_child ON catalog_inclusions(child_id);

        -- Per-creator share overrides (platform share is 1 - creator_share)
        CREATE TABLE IF NOT EXISTS share_ratio_overrides (
            creator_id TEXT PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
            creator_share REAL NOT NULL CHECK (creator_share >= 0.0 AND creator_share <= 1.0),
            updated_at INTEGER NOT NULL
        );

        -- Idempotency store: one row per (provider, provider event id).
        -- payload holds the canonical event so the repair job can re-drive it.
        CREATE TABLE IF NOT EXISTS payment_events (
            id TEXT PRIMARY KEY,
            provider TEXT NOT NULL CHECK (provider IN ('paypal', 'portone')),
            provider_event_id TEXT NOT NULL,
            event_kind TEXT NOT NULL CHECK (event_kind IN ('payment', 'cancellation', 'refund')),
            payload TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('pending', 'applied', 'failed')),
            attempts INTEGER NOT NULL DEFAULT 1,
            lease_expires_at INTEGER NOT NULL,
            outcome_transaction_id TEXT,
            outcome_entitlement_status TEXT,
            last_error TEXT,
            received_at INTEGER NOT NULL,
            applied_at INTEGER,
            UNIQUE(provider, provider_event_id)
        );
        CREATE INDEX IF NOT EXISTS idx_payment_events_pending
            ON payment_events(received_at) WHERE status = 'pending';

        -- Entitlement lifecycles. At most one current (non-superseded) row per (user, subject).
        CREATE TABLE IF NOT EXISTS entitlements (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            subject_id TEXT NOT NULL REFERENCES catalog_items(id),
            status TEXT NOT NULL CHECK (status IN ('inactive', 'active', 'past_due', 'canceled', 'upgraded')),
            activated_at INTEGER NOT NULL,
            expires_at INTEGER,
            canceled_at INTEGER,
            last_event_at INTEGER NOT NULL,
            version INTEGER NOT NULL DEFAULT 1,
            superseded_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_entitlements_current
            ON entitlements(user_id, subject_id) WHERE superseded_at IS NULL;
        CREATE INDEX IF NOT EXISTS idx_entitlements_expiry
            ON entitlements(expires_at) WHERE superseded_at IS NULL AND status IN ('active', 'past_due');

        -- Append-only revenue ledger. Reversals are new rows pointing at the original.
        CREATE TABLE IF NOT EXISTS transactions (
            id TEXT PRIMARY KEY,
            payment_event_ref TEXT UNIQUE REFERENCES payment_events(id),
            provider TEXT NOT NULL,
            user_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            creator_id TEXT,
            gross_amount REAL NOT NULL,
            currency TEXT NOT NULL,
            creator_share_ratio REAL NOT NULL,
            platform_share_ratio REAL NOT NULL,
            creator_revenue REAL NOT NULL,
            platform_revenue REAL NOT NULL,
            reverses_transaction_id TEXT UNIQUE REFERENCES transactions(id),
            reason TEXT,
            settled_at INTEGER NOT NULL,
            CHECK (payment_event_ref IS NOT NULL OR reverses_transaction_id IS NOT NULL OR reason IS NOT NULL)
        );
        CREATE INDEX IF NOT EXISTS idx_transactions_creator ON transactions(creator_id, currency, settled_at);
        CREATE INDEX IF NOT EXISTS idx_transactions_settled ON transactions(settled_at);

        CREATE TRIGGER IF NOT EXISTS transactions_immutable
        BEFORE UPDATE ON transactions
        BEGIN
            SELECT RAISE(ABORT, 'ledger transactions are immutable');
        END;

        CREATE TRIGGER IF NOT EXISTS transactions_no_delete
        BEFORE DELETE ON transactions
        BEGIN
            SELECT RAISE(ABORT, 'ledger transactions are append-only');
        END;

        -- Creator withdrawals
        CREATE TABLE IF NOT EXISTS payout_requests (
            id TEXT PRIMARY KEY,
            creator_id TEXT NOT NULL REFERENCES users(id),
            payment_method TEXT NOT NULL CHECK (payment_method IN ('PayPal', 'Portone')),
            amount REAL NOT NULL CHECK (amount > 0),
            currency TEXT NOT NULL,
            destination TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('pending', 'processing', 'paid', 'rejected')),
            rejection_reason TEXT,
            requested_at INTEGER NOT NULL,
            resolved_at INTEGER,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_payout_requests_creator ON payout_requests(creator_id, currency, status);

        -- Transcoding jobs handed to the media collaborator
        CREATE TABLE IF NOT EXISTS processing_jobs (
            id TEXT PRIMARY KEY,
            item_id TEXT NOT NULL REFERENCES catalog_items(id) ON DELETE CASCADE,
            external_job_id TEXT NOT NULL,
            source_ref TEXT NOT NULL,
            operations TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('queued', 'running', 'completed', 'publishing', 'published', 'failed')),
            result_ref TEXT,
            external_video_id TEXT,
            error TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_processing_jobs_open
            ON processing_jobs(updated_at) WHERE status IN ('queued', 'running', 'completed', 'publishing');
        "#,
    )
}

/// Initialize the audit log database schema (separate file so it can grow independently)
pub fn init_audit_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS audit_logs (
            id TEXT PRIMARY KEY,
            timestamp INTEGER NOT NULL,
            actor_type TEXT NOT NULL,
            actor_id TEXT,
            action TEXT NOT NULL,
            resource_type TEXT NOT NULL,
            resource_id TEXT NOT NULL,
            details TEXT,
            ip_address TEXT,
            user_agent TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_audit_logs_timestamp ON audit_logs(timestamp);
        CREATE INDEX IF NOT EXISTS idx_audit_logs_actor ON audit_logs(actor_id);
        CREATE INDEX IF NOT EXISTS idx_audit_logs_resource ON audit_logs(resource_type, resource_id);
        "#,
    )
}
