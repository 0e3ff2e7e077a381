mod from_row;
pub mod queries;

use std::sync::Arc;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::rate_limit::SlidingWindowLimiter;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    /// Per-client limiter for the public API
    pub limiter: Arc<SlidingWindowLimiter>,
    pub dev_mode: bool,
}

/// Open a pooled SQLite database with WAL and a busy timeout so concurrent
/// writers queue instead of failing.
pub fn create_pool(path: &str, max_size: u32) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(path).with_init(|conn| {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    });
    Pool::builder().max_size(max_size).build(manager)
}

pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS tenants (
            id TEXT PRIMARY KEY,
            owner TEXT NOT NULL,
            name TEXT NOT NULL,
            api_key TEXT NOT NULL UNIQUE,
            secret_key TEXT,
            secure INTEGER NOT NULL DEFAULT 0,
            encryption_alg TEXT NOT NULL DEFAULT 'NONE',
            redeem_extra TEXT,
            redeem_extra_mode TEXT,
            announcement TEXT,
            version TEXT,
            changelog TEXT,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS cards (
            id TEXT PRIMARY KEY,
            tenant_id TEXT REFERENCES tenants(id) ON DELETE CASCADE,
            code TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL DEFAULT 'NEW',
            disabled INTEGER NOT NULL DEFAULT 0,
            max_machines INTEGER NOT NULL DEFAULT 0,
            activated_at INTEGER,
            expire_at INTEGER,
            metadata TEXT,
            extra TEXT,
            return_extra INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_cards_tenant ON cards(tenant_id);

        CREATE TABLE IF NOT EXISTS machine_bindings (
            id TEXT PRIMARY KEY,
            card_id TEXT NOT NULL REFERENCES cards(id) ON DELETE CASCADE,
            device_id TEXT NOT NULL,
            bound_at INTEGER NOT NULL,
            UNIQUE(card_id, device_id)
        );

        CREATE TABLE IF NOT EXISTS card_use_logs (
            id TEXT PRIMARY KEY,
            card_id TEXT NOT NULL REFERENCES cards(id) ON DELETE CASCADE,
            card_code TEXT NOT NULL,
            action TEXT NOT NULL,
            request_ip TEXT,
            request_user TEXT,
            remark TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_card_use_logs_card ON card_use_logs(card_id);
        "#,
    )
}
