//! Database schema migrations for SQLite.
//!
//! We use a simple versioned migration system. Each migration is a SQL string
//! that transforms the schema from version N to N+1.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 2;

/// Initialize or migrate the database schema.
///
/// This function is idempotent - it can be called multiple times safely.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema version {current} is newer than supported version {CURRENT_VERSION}"
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
            tracing::debug!(version, "applied schema migration");
        }

        tx.commit()?;
    }

    Ok(())
}

/// Apply a specific migration version.
fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        2 => apply_v2(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
///
/// Names are stored as the signed reinterpretation of their 64-bit value;
/// queries never order by them.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE accounts (
            name INTEGER PRIMARY KEY,
            created_at INTEGER NOT NULL        -- block time, microseconds
        );

        -- Permission arena: one row per (owner, name)
        CREATE TABLE permissions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,  -- ids are never reused
            owner INTEGER NOT NULL,
            name INTEGER NOT NULL,
            parent_id INTEGER,                 -- NULL only for owner
            auth BLOB NOT NULL,                -- CBOR Authority
            updated_at INTEGER NOT NULL,

            UNIQUE(owner, name)
        );

        -- (account, code, message_type) -> required permission
        CREATE TABLE permission_links (
            account INTEGER NOT NULL,
            code INTEGER NOT NULL,
            message_type INTEGER NOT NULL,     -- 0 is the wildcard entry
            required_permission INTEGER NOT NULL,
            PRIMARY KEY (account, code, message_type)
        );

        CREATE TABLE deferred_transactions (
            sender INTEGER NOT NULL,
            sender_id BLOB NOT NULL,           -- 16 bytes, big endian
            trx_id BLOB NOT NULL UNIQUE,       -- 32 bytes
            authorizer_actor INTEGER NOT NULL,
            authorizer_permission INTEGER NOT NULL,
            published_at INTEGER NOT NULL,
            delay_until INTEGER NOT NULL,
            expiration INTEGER NOT NULL,
            packed_trx BLOB NOT NULL,          -- CBOR SignedTransaction
            PRIMARY KEY (sender, sender_id)
        );

        -- Opaque native contract state
        CREATE TABLE contract_rows (
            code INTEGER NOT NULL,
            row_key BLOB NOT NULL,
            value BLOB NOT NULL,
            PRIMARY KEY (code, row_key)
        );

        CREATE INDEX idx_permissions_parent ON permissions(parent_id);
        CREATE INDEX idx_links_requirement ON permission_links(account, required_permission);
        CREATE INDEX idx_deferred_delay ON deferred_transactions(delay_until, trx_id);
        "#,
    )?;

    Ok(())
}

/// Migration v2: ids of accepted transactions, kept until they expire.
fn apply_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE transactions (
            trx_id BLOB PRIMARY KEY,           -- 32 bytes
            expiration INTEGER NOT NULL        -- microseconds
        );

        CREATE INDEX idx_transactions_expiration ON transactions(expiration);
        "#,
    )?;

    Ok(())
}

/// Get current time in milliseconds.
fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
