//! SQL schema definitions.

/// Complete schema for the Quill v1 database.
pub const SCHEMA_V1: &str = r#"
-- ============================================================
-- Coin ledger
-- ============================================================

CREATE TABLE IF NOT EXISTS coin_balances (
    user_id TEXT PRIMARY KEY,
    balance INTEGER NOT NULL DEFAULT 0 CHECK (balance >= 0),
    lifetime_earned INTEGER NOT NULL DEFAULT 0,
    lifetime_spent INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

-- Append-only. `seq` is the commit order used for per-user history.
CREATE TABLE IF NOT EXISTS transactions (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    user_id TEXT NOT NULL,
    tx_type TEXT NOT NULL,
    coin_amount INTEGER NOT NULL,
    fiat_amount TEXT,
    currency TEXT,
    status TEXT NOT NULL CHECK (status IN ('pending', 'completed', 'failed')),
    related_content_id TEXT,
    external_transaction_id TEXT,
    counterpart_id TEXT,
    description TEXT,
    failure_reason TEXT,
    created_at INTEGER NOT NULL,
    completed_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_tx_user ON transactions(user_id, seq);
CREATE INDEX IF NOT EXISTS idx_tx_type_completed ON transactions(tx_type, status, completed_at);
CREATE INDEX IF NOT EXISTS idx_tx_content ON transactions(user_id, related_content_id)
    WHERE related_content_id IS NOT NULL;
CREATE UNIQUE INDEX IF NOT EXISTS idx_tx_idempotency
    ON transactions(user_id, external_transaction_id)
    WHERE external_transaction_id IS NOT NULL AND status != 'failed';

CREATE TABLE IF NOT EXISTS coin_packages (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    coin_amount INTEGER NOT NULL CHECK (coin_amount > 0),
    bonus_percentage INTEGER NOT NULL DEFAULT 0 CHECK (bonus_percentage BETWEEN 0 AND 100),
    base_price_usd TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    updated_at INTEGER NOT NULL
);

-- ============================================================
-- Access control
-- ============================================================

CREATE TABLE IF NOT EXISTS content_purchases (
    transaction_id TEXT PRIMARY KEY REFERENCES transactions(id),
    user_id TEXT NOT NULL,
    content_id TEXT NOT NULL,
    content_type TEXT NOT NULL,
    writer_id TEXT NOT NULL,
    coin_amount INTEGER NOT NULL,
    purchased_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_purchases_writer ON content_purchases(writer_id, purchased_at);

-- Mirrored from the user service.
CREATE TABLE IF NOT EXISTS subscriptions (
    user_id TEXT PRIMARY KEY,
    tier TEXT NOT NULL,
    expires_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

-- Mirrored from the content service.
CREATE TABLE IF NOT EXISTS content_registry (
    content_id TEXT PRIMARY KEY,
    writer_id TEXT NOT NULL,
    content_type TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);

-- Pushed by the external rate feed. USD value of one unit of `currency`.
CREATE TABLE IF NOT EXISTS exchange_rates (
    currency TEXT PRIMARY KEY,
    usd_per_unit TEXT NOT NULL,
    observed_at INTEGER NOT NULL
);

-- ============================================================
-- Revenue distribution
-- ============================================================

CREATE TABLE IF NOT EXISTS revenue_splits (
    id TEXT PRIMARY KEY,
    event_type TEXT NOT NULL,
    source_kind TEXT NOT NULL,
    transaction_id TEXT,
    workflow_id TEXT,
    reference TEXT,
    period_start INTEGER,
    period_end INTEGER,
    writer_id TEXT,
    studio_id TEXT,
    gross_amount TEXT NOT NULL,
    writer_share TEXT NOT NULL,
    studio_share TEXT,
    platform_share TEXT NOT NULL,
    writer_pct INTEGER NOT NULL,
    studio_pct INTEGER NOT NULL,
    platform_pct INTEGER NOT NULL,
    currency TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_split_transaction ON revenue_splits(transaction_id)
    WHERE transaction_id IS NOT NULL;
CREATE UNIQUE INDEX IF NOT EXISTS idx_split_workflow ON revenue_splits(workflow_id, reference)
    WHERE workflow_id IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_split_period ON revenue_splits(period_start, period_end)
    WHERE period_start IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_split_writer ON revenue_splits(writer_id, created_at);

CREATE TABLE IF NOT EXISTS writer_earnings (
    writer_id TEXT PRIMARY KEY,
    total_earned TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS pool_runs (
    period_start INTEGER NOT NULL,
    period_end INTEGER NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('running', 'completed', 'failed')),
    gross_pool TEXT,
    started_at INTEGER NOT NULL,
    finished_at INTEGER,
    PRIMARY KEY (period_start, period_end)
);

-- Content purchases whose debit committed but whose split did not.
CREATE TABLE IF NOT EXISTS pending_distributions (
    transaction_id TEXT PRIMARY KEY REFERENCES transactions(id),
    writer_id TEXT NOT NULL,
    reason TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    queued_at INTEGER NOT NULL
);

-- ============================================================
-- Payouts
-- ============================================================

CREATE TABLE IF NOT EXISTS payout_requests (
    id TEXT PRIMARY KEY,
    writer_id TEXT NOT NULL,
    amount TEXT NOT NULL,
    currency TEXT NOT NULL,
    payment_details TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('pending', 'completed', 'failed')),
    external_payout_id TEXT,
    idempotency_key TEXT,
    failure_reason TEXT,
    created_at INTEGER NOT NULL,
    processed_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_payouts_writer ON payout_requests(writer_id, created_at);
CREATE UNIQUE INDEX IF NOT EXISTS idx_payouts_idempotency
    ON payout_requests(writer_id, idempotency_key)
    WHERE idempotency_key IS NOT NULL AND status != 'failed';

-- ============================================================
-- Licensing workflows
-- ============================================================

CREATE TABLE IF NOT EXISTS licensing_workflows (
    workflow_id TEXT PRIMARY KEY,
    agreement_id TEXT NOT NULL UNIQUE,
    studio_id TEXT NOT NULL,
    writer_id TEXT NOT NULL,
    status TEXT NOT NULL,
    body TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_workflows_writer ON licensing_workflows(writer_id);
CREATE INDEX IF NOT EXISTS idx_workflows_studio ON licensing_workflows(studio_id);
"#;
