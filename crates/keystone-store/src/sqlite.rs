//! SQLite implementation of the StateStore trait.
//!
//! This is the persistent storage backend. It uses rusqlite with bundled
//! SQLite; undo sessions map onto nested `SAVEPOINT`s, so releasing the
//! outermost session commits to disk.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use keystone_core::{
    AccountName, ActionName, Name, PermissionLevel, PermissionName, TimePoint, TransactionId,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{DeferredRow, LinkRow, NewPermission, PermissionId, PermissionRow, StateStore};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex.
pub struct SqliteStore {
    inner: Mutex<SqliteInner>,
}

struct SqliteInner {
    conn: Connection,
    /// Number of open savepoints.
    depth: usize,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        migration::migrate(&mut conn)?;
        Ok(Self {
            inner: Mutex::new(SqliteInner { conn, depth: 0 }),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, SqliteInner>> {
        self.inner
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    /// Execute an operation on the connection.
    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let inner = self.lock()?;
        f(&inner.conn)
    }
}

// Names are stored bit-for-bit as i64.
fn name_to_sql(name: Name) -> i64 {
    name.as_u64() as i64
}

fn name_from_sql(value: i64) -> Name {
    Name::from_u64(value as u64)
}

fn encode_blob<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn decode_blob<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::from_reader(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

const PERMISSION_COLUMNS: &str = "id, owner, name, parent_id, auth, updated_at";

/// A permission row as read from SQL, before the authority blob is decoded.
struct RawPermission {
    id: i64,
    owner: i64,
    name: i64,
    parent_id: Option<i64>,
    auth: Vec<u8>,
    updated_at: i64,
}

impl RawPermission {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner: row.get(1)?,
            name: row.get(2)?,
            parent_id: row.get(3)?,
            auth: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }

    fn into_row(self) -> Result<PermissionRow> {
        Ok(PermissionRow {
            id: self.id as PermissionId,
            owner: name_from_sql(self.owner),
            name: name_from_sql(self.name),
            parent: self.parent_id.map(|p| p as PermissionId),
            auth: decode_blob(&self.auth)?,
            last_updated: TimePoint::from_micros(self.updated_at),
        })
    }
}

fn query_permissions(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<PermissionRow>> {
    let mut stmt = conn.prepare(sql)?;
    let raw = stmt
        .query_map(params, RawPermission::read)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    raw.into_iter().map(RawPermission::into_row).collect()
}

fn read_link(row: &rusqlite::Row<'_>) -> rusqlite::Result<LinkRow> {
    Ok(LinkRow {
        account: name_from_sql(row.get(0)?),
        code: name_from_sql(row.get(1)?),
        message_type: name_from_sql(row.get(2)?),
        required_permission: name_from_sql(row.get(3)?),
    })
}

const DEFERRED_COLUMNS: &str = "sender, sender_id, trx_id, authorizer_actor, authorizer_permission,
     published_at, delay_until, expiration, packed_trx";

struct RawDeferred {
    sender: i64,
    sender_id: Vec<u8>,
    trx_id: Vec<u8>,
    authorizer_actor: i64,
    authorizer_permission: i64,
    published_at: i64,
    delay_until: i64,
    expiration: i64,
    packed_trx: Vec<u8>,
}

impl RawDeferred {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            sender: row.get(0)?,
            sender_id: row.get(1)?,
            trx_id: row.get(2)?,
            authorizer_actor: row.get(3)?,
            authorizer_permission: row.get(4)?,
            published_at: row.get(5)?,
            delay_until: row.get(6)?,
            expiration: row.get(7)?,
            packed_trx: row.get(8)?,
        })
    }

    fn into_row(self) -> Result<DeferredRow> {
        let sender_id: [u8; 16] = self
            .sender_id
            .try_into()
            .map_err(|_| StoreError::InvalidData("sender_id must be 16 bytes".into()))?;
        let trx_id = TransactionId::try_from(self.trx_id.as_slice())
            .map_err(|_| StoreError::InvalidData("trx_id must be 32 bytes".into()))?;
        Ok(DeferredRow {
            sender: name_from_sql(self.sender),
            sender_id: u128::from_be_bytes(sender_id),
            trx_id,
            authorizer: PermissionLevel::new(
                name_from_sql(self.authorizer_actor),
                name_from_sql(self.authorizer_permission),
            ),
            published: TimePoint::from_micros(self.published_at),
            delay_until: TimePoint::from_micros(self.delay_until),
            expiration: TimePoint::from_micros(self.expiration),
            packed_trx: self.packed_trx,
        })
    }
}

fn query_deferred(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<DeferredRow>> {
    let mut stmt = conn.prepare(sql)?;
    let raw = stmt
        .query_map(params, RawDeferred::read)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    raw.into_iter().map(RawDeferred::into_row).collect()
}

fn find_deferred_by_key(
    conn: &Connection,
    sender: AccountName,
    sender_id: u128,
) -> Result<Option<DeferredRow>> {
    let sql = format!(
        "SELECT {DEFERRED_COLUMNS} FROM deferred_transactions WHERE sender = ?1 AND sender_id = ?2"
    );
    Ok(query_deferred(
        conn,
        &sql,
        params![name_to_sql(sender), sender_id.to_be_bytes().as_slice()],
    )?
    .pop())
}

impl StateStore for SqliteStore {
    fn create_account(&self, name: AccountName, created: TimePoint) -> Result<()> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO accounts (name, created_at) VALUES (?1, ?2)",
                params![name_to_sql(name), created.as_micros()],
            )?;
            if inserted == 0 {
                return Err(StoreError::AlreadyExists(format!("account {name}")));
            }
            Ok(())
        })
    }

    fn account_exists(&self, name: AccountName) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT name FROM accounts WHERE name = ?1",
                    params![name_to_sql(name)],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    fn insert_permission(&self, permission: NewPermission) -> Result<PermissionRow> {
        let auth = encode_blob(&permission.auth)?;
        self.with_conn(|conn| {
            let existing: Option<i64> = conn
                .query_row(
                    "SELECT id FROM permissions WHERE owner = ?1 AND name = ?2",
                    params![name_to_sql(permission.owner), name_to_sql(permission.name)],
                    |row| row.get(0),
                )
                .optional()?;
            if existing.is_some() {
                return Err(StoreError::AlreadyExists(format!(
                    "permission {}@{}",
                    permission.owner, permission.name
                )));
            }

            conn.execute(
                "INSERT INTO permissions (owner, name, parent_id, auth, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    name_to_sql(permission.owner),
                    name_to_sql(permission.name),
                    permission.parent.map(|p| p as i64),
                    auth,
                    permission.last_updated.as_micros(),
                ],
            )?;
            let id = conn.last_insert_rowid() as PermissionId;

            Ok(PermissionRow {
                id,
                owner: permission.owner,
                name: permission.name,
                parent: permission.parent,
                auth: permission.auth,
                last_updated: permission.last_updated,
            })
        })
    }

    fn permission_by_id(&self, id: PermissionId) -> Result<Option<PermissionRow>> {
        let sql = format!("SELECT {PERMISSION_COLUMNS} FROM permissions WHERE id = ?1");
        self.with_conn(|conn| Ok(query_permissions(conn, &sql, params![id as i64])?.pop()))
    }

    fn find_permission(
        &self,
        owner: AccountName,
        name: PermissionName,
    ) -> Result<Option<PermissionRow>> {
        let sql =
            format!("SELECT {PERMISSION_COLUMNS} FROM permissions WHERE owner = ?1 AND name = ?2");
        self.with_conn(|conn| {
            Ok(query_permissions(conn, &sql, params![name_to_sql(owner), name_to_sql(name)])?.pop())
        })
    }

    fn update_permission(&self, row: &PermissionRow) -> Result<()> {
        let auth = encode_blob(&row.auth)?;
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE permissions SET auth = ?1, updated_at = ?2 WHERE id = ?3",
                params![auth, row.last_updated.as_micros(), row.id as i64],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("permission id {}", row.id)));
            }
            Ok(())
        })
    }

    fn remove_permission(&self, id: PermissionId) -> Result<()> {
        self.with_conn(|conn| {
            let changed =
                conn.execute("DELETE FROM permissions WHERE id = ?1", params![id as i64])?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("permission id {id}")));
            }
            Ok(())
        })
    }

    fn child_permissions(&self, parent: PermissionId) -> Result<Vec<PermissionRow>> {
        let sql = format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions WHERE parent_id = ?1 ORDER BY id"
        );
        self.with_conn(|conn| query_permissions(conn, &sql, params![parent as i64]))
    }

    fn permissions_of(&self, owner: AccountName) -> Result<Vec<PermissionRow>> {
        let sql =
            format!("SELECT {PERMISSION_COLUMNS} FROM permissions WHERE owner = ?1 ORDER BY id");
        self.with_conn(|conn| query_permissions(conn, &sql, params![name_to_sql(owner)]))
    }

    fn find_link(
        &self,
        account: AccountName,
        code: AccountName,
        message_type: ActionName,
    ) -> Result<Option<LinkRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT account, code, message_type, required_permission FROM permission_links
                 WHERE account = ?1 AND code = ?2 AND message_type = ?3",
                params![name_to_sql(account), name_to_sql(code), name_to_sql(message_type)],
                read_link,
            )
            .optional()
            .map_err(StoreError::from)
        })
    }

    fn insert_link(&self, link: &LinkRow) -> Result<()> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO permission_links
                    (account, code, message_type, required_permission)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    name_to_sql(link.account),
                    name_to_sql(link.code),
                    name_to_sql(link.message_type),
                    name_to_sql(link.required_permission),
                ],
            )?;
            if inserted == 0 {
                return Err(StoreError::AlreadyExists(format!(
                    "link {}:{}:{}",
                    link.account, link.code, link.message_type
                )));
            }
            Ok(())
        })
    }

    fn remove_link(
        &self,
        account: AccountName,
        code: AccountName,
        message_type: ActionName,
    ) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM permission_links WHERE account = ?1 AND code = ?2 AND message_type = ?3",
                params![name_to_sql(account), name_to_sql(code), name_to_sql(message_type)],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!(
                    "link {account}:{code}:{message_type}"
                )));
            }
            Ok(())
        })
    }

    fn links_requiring(
        &self,
        account: AccountName,
        permission: PermissionName,
    ) -> Result<Vec<LinkRow>> {
        let mut links = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT account, code, message_type, required_permission FROM permission_links
                 WHERE account = ?1 AND required_permission = ?2",
            )?;
            let links = stmt
                .query_map(params![name_to_sql(account), name_to_sql(permission)], read_link)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(links)
        })?;
        // SQL ordering over signed names differs from name order.
        links.sort_by_key(|link| (link.code, link.message_type));
        Ok(links)
    }

    fn find_deferred(&self, sender: AccountName, sender_id: u128) -> Result<Option<DeferredRow>> {
        self.with_conn(|conn| find_deferred_by_key(conn, sender, sender_id))
    }

    fn find_deferred_by_trx_id(&self, trx_id: &TransactionId) -> Result<Option<DeferredRow>> {
        let sql = format!("SELECT {DEFERRED_COLUMNS} FROM deferred_transactions WHERE trx_id = ?1");
        self.with_conn(|conn| {
            Ok(query_deferred(conn, &sql, params![trx_id.as_bytes().as_slice()])?.pop())
        })
    }

    fn upsert_deferred(&self, row: &DeferredRow) -> Result<Option<DeferredRow>> {
        self.with_conn(|conn| {
            let clash: Option<(i64, Vec<u8>)> = conn
                .query_row(
                    "SELECT sender, sender_id FROM deferred_transactions WHERE trx_id = ?1",
                    params![row.trx_id.as_bytes().as_slice()],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()?;
            if let Some((sender, sender_id)) = clash {
                if sender != name_to_sql(row.sender)
                    || sender_id.as_slice() != row.sender_id.to_be_bytes().as_slice()
                {
                    return Err(StoreError::AlreadyExists(format!(
                        "deferred transaction {}",
                        row.trx_id
                    )));
                }
            }

            let replaced = find_deferred_by_key(conn, row.sender, row.sender_id)?;
            conn.execute(
                "INSERT OR REPLACE INTO deferred_transactions
                    (sender, sender_id, trx_id, authorizer_actor, authorizer_permission,
                     published_at, delay_until, expiration, packed_trx)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    name_to_sql(row.sender),
                    row.sender_id.to_be_bytes().as_slice(),
                    row.trx_id.as_bytes().as_slice(),
                    name_to_sql(row.authorizer.actor),
                    name_to_sql(row.authorizer.permission),
                    row.published.as_micros(),
                    row.delay_until.as_micros(),
                    row.expiration.as_micros(),
                    row.packed_trx.as_slice(),
                ],
            )?;
            Ok(replaced)
        })
    }

    fn remove_deferred(&self, sender: AccountName, sender_id: u128) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM deferred_transactions WHERE sender = ?1 AND sender_id = ?2",
                params![name_to_sql(sender), sender_id.to_be_bytes().as_slice()],
            )?;
            Ok(changed > 0)
        })
    }

    fn deferred_due(&self, now: TimePoint) -> Result<Vec<DeferredRow>> {
        let sql = format!(
            "SELECT {DEFERRED_COLUMNS} FROM deferred_transactions
             WHERE delay_until <= ?1 ORDER BY delay_until, trx_id"
        );
        self.with_conn(|conn| query_deferred(conn, &sql, params![now.as_micros()]))
    }

    fn deferred_by_sender(&self, sender: AccountName) -> Result<Vec<DeferredRow>> {
        let sql = format!(
            "SELECT {DEFERRED_COLUMNS} FROM deferred_transactions
             WHERE sender = ?1 ORDER BY sender_id"
        );
        self.with_conn(|conn| query_deferred(conn, &sql, params![name_to_sql(sender)]))
    }

    fn find_transaction(&self, trx_id: &TransactionId) -> Result<Option<TimePoint>> {
        self.with_conn(|conn| {
            let expiration: Option<i64> = conn
                .query_row(
                    "SELECT expiration FROM transactions WHERE trx_id = ?1",
                    params![trx_id.as_bytes().as_slice()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(expiration.map(TimePoint::from_micros))
        })
    }

    fn insert_transaction(&self, trx_id: &TransactionId, expiration: TimePoint) -> Result<()> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO transactions (trx_id, expiration) VALUES (?1, ?2)",
                params![trx_id.as_bytes().as_slice(), expiration.as_micros()],
            )?;
            if inserted == 0 {
                return Err(StoreError::AlreadyExists(format!("transaction {trx_id}")));
            }
            Ok(())
        })
    }

    fn purge_expired_transactions(&self, now: TimePoint) -> Result<usize> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM transactions WHERE expiration < ?1",
                params![now.as_micros()],
            )?;
            Ok(removed)
        })
    }

    fn get_contract_row(&self, code: AccountName, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT value FROM contract_rows WHERE code = ?1 AND row_key = ?2",
                params![name_to_sql(code), key],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::from)
        })
    }

    fn set_contract_row(&self, code: AccountName, key: &[u8], value: &[u8]) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO contract_rows (code, row_key, value) VALUES (?1, ?2, ?3)",
                params![name_to_sql(code), key, value],
            )?;
            Ok(())
        })
    }

    fn remove_contract_row(&self, code: AccountName, key: &[u8]) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM contract_rows WHERE code = ?1 AND row_key = ?2",
                params![name_to_sql(code), key],
            )?;
            Ok(())
        })
    }

    fn begin_session(&self) -> Result<usize> {
        let mut inner = self.lock()?;
        let depth = inner.depth + 1;
        inner
            .conn
            .execute_batch(&format!("SAVEPOINT keystone_session_{depth}"))?;
        inner.depth = depth;
        Ok(depth)
    }

    fn squash_session(&self) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.depth == 0 {
            return Err(StoreError::NoSession);
        }
        let depth = inner.depth;
        inner
            .conn
            .execute_batch(&format!("RELEASE keystone_session_{depth}"))?;
        inner.depth -= 1;
        Ok(())
    }

    fn undo_session(&self) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.depth == 0 {
            return Err(StoreError::NoSession);
        }
        let depth = inner.depth;
        inner.conn.execute_batch(&format!(
            "ROLLBACK TO keystone_session_{depth}; RELEASE keystone_session_{depth}"
        ))?;
        inner.depth -= 1;
        Ok(())
    }

    fn session_depth(&self) -> Result<usize> {
        Ok(self.lock()?.depth)
    }
}
