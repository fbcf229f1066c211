//! SQLite storage backend.
//!
//! One `contacts` table holds every record. Cluster membership is read with a
//! recursive CTE so chains left by an interrupted merge still come back
//! flattened. Writes that depend on a prior read (`create_contact` with a
//! link, `set_precedence`) run inside `BEGIN IMMEDIATE` transactions, which
//! take SQLite's write lock before the read.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};

use crate::contact::{Contact, ContactId, LinkPrecedence, LinkState, NewContact};
use crate::storage::traits::{ContactRepository, PrecedenceUpdate, StorageError};

/// Busy timeout applied to every connection.
pub const BUSY_TIMEOUT_MS: u64 = 5_000;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS contacts (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    phone_number    TEXT,
    email           TEXT,
    linked_id       INTEGER REFERENCES contacts(id),
    link_precedence TEXT NOT NULL CHECK (link_precedence IN ('primary', 'secondary')),
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    deleted_at      TEXT
);
CREATE INDEX IF NOT EXISTS idx_contacts_email ON contacts(email);
CREATE INDEX IF NOT EXISTS idx_contacts_phone ON contacts(phone_number);
CREATE INDEX IF NOT EXISTS idx_contacts_linked ON contacts(linked_id);
";

const COLUMNS: &str =
    "id, email, phone_number, link_precedence, linked_id, created_at, updated_at";

fn to_storage_err(err: rusqlite::Error) -> StorageError {
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => StorageError::Timeout {
            duration_ms: BUSY_TIMEOUT_MS,
        },
        Some(ErrorCode::CannotOpen) => StorageError::ConnectionError(err.to_string()),
        _ => StorageError::BackendError(err.to_string()),
    }
}

fn lock_err() -> StorageError {
    StorageError::BackendError("poisoned lock: sqlite connection".to_string())
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(id: ContactId, column: &str, raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StorageError::CorruptRecord {
            id,
            reason: format!("bad {column} {raw:?}: {e}"),
        })
}

struct RawContact {
    id: i64,
    email: Option<String>,
    phone_number: Option<String>,
    link_precedence: String,
    linked_id: Option<i64>,
    created_at: String,
    updated_at: String,
}

impl RawContact {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            email: row.get(1)?,
            phone_number: row.get(2)?,
            link_precedence: row.get(3)?,
            linked_id: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn decode(self) -> Result<Contact, StorageError> {
        let id = ContactId::new(self.id);
        let link_precedence =
            self.link_precedence
                .parse::<LinkPrecedence>()
                .map_err(|e| StorageError::CorruptRecord {
                    id,
                    reason: e.to_string(),
                })?;
        Ok(Contact {
            id,
            email: self.email,
            phone_number: self.phone_number,
            link_precedence,
            linked_to: self.linked_id.map(ContactId::new),
            created_at: parse_ts(id, "created_at", &self.created_at)?,
            updated_at: parse_ts(id, "updated_at", &self.updated_at)?,
        })
    }
}

fn query_contacts<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<Contact>, StorageError> {
    let mut stmt = conn.prepare_cached(sql).map_err(to_storage_err)?;
    let rows = stmt
        .query_map(params, RawContact::from_row)
        .map_err(to_storage_err)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(to_storage_err)?.decode()?);
    }
    Ok(out)
}

fn get_contact(conn: &Connection, id: ContactId) -> Result<Option<Contact>, StorageError> {
    let sql = format!("SELECT {COLUMNS} FROM contacts WHERE id = ?1 AND deleted_at IS NULL");
    conn.query_row(&sql, params![id.get()], RawContact::from_row)
        .optional()
        .map_err(to_storage_err)?
        .map(RawContact::decode)
        .transpose()
}

fn ensure_primary_target(conn: &Connection, target: ContactId) -> Result<(), StorageError> {
    match get_contact(conn, target)? {
        Some(t) if t.is_primary() => Ok(()),
        Some(_) => Err(StorageError::Conflict(format!(
            "link target {target} is no longer a primary"
        ))),
        None => Err(StorageError::Conflict(format!(
            "link target {target} does not exist"
        ))),
    }
}

/// SQLite-backed contact store.
#[derive(Debug)]
pub struct SqliteContactStore {
    conn: Mutex<Connection>,
}

impl SqliteContactStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let conn = Connection::open(path).map_err(|e| StorageError::ConnectionError(e.to_string()))?;
        Self::init(conn, true)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn =
            Connection::open_in_memory().map_err(|e| StorageError::ConnectionError(e.to_string()))?;
        Self::init(conn, false)
    }

    fn init(conn: Connection, file_backed: bool) -> Result<Self, StorageError> {
        if file_backed {
            conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")
                .map_err(to_storage_err)?;
        }
        conn.execute_batch(&format!(
            "PRAGMA busy_timeout = {BUSY_TIMEOUT_MS}; PRAGMA foreign_keys = ON;"
        ))
        .map_err(to_storage_err)?;
        conn.execute_batch(SCHEMA).map_err(to_storage_err)?;
        tracing::debug!(file_backed, "contact schema ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl ContactRepository for SqliteContactStore {
    fn find_by_email_or_phone(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Vec<Contact>, StorageError> {
        if email.is_none() && phone.is_none() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock().map_err(|_| lock_err())?;
        // `x = NULL` is never true, so an absent argument cannot match.
        let sql = format!(
            "SELECT {COLUMNS} FROM contacts
             WHERE deleted_at IS NULL AND (email = ?1 OR phone_number = ?2)
             ORDER BY created_at ASC, id ASC"
        );
        query_contacts(&conn, &sql, params![email, phone])
    }

    fn find_by_id(&self, id: ContactId) -> Result<Option<Contact>, StorageError> {
        let conn = self.conn.lock().map_err(|_| lock_err())?;
        get_contact(&conn, id)
    }

    fn find_cluster_members(&self, root: ContactId) -> Result<Vec<Contact>, StorageError> {
        let conn = self.conn.lock().map_err(|_| lock_err())?;
        let sql = format!(
            "WITH RECURSIVE cluster(id) AS (
                 SELECT ?1
                 UNION
                 SELECT c.id FROM contacts c JOIN cluster ON c.linked_id = cluster.id
                 WHERE c.deleted_at IS NULL
             )
             SELECT {COLUMNS} FROM contacts
             WHERE deleted_at IS NULL AND id IN (SELECT id FROM cluster)
             ORDER BY created_at ASC, id ASC"
        );
        query_contacts(&conn, &sql, params![root.get()])
    }

    fn create_contact(&self, contact: NewContact) -> Result<Contact, StorageError> {
        let mut conn = self.conn.lock().map_err(|_| lock_err())?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(to_storage_err)?;

        if let Some(target) = contact.linked_to {
            ensure_primary_target(&tx, target)?;
        }

        let now = format_ts(Utc::now());
        tx.execute(
            "INSERT INTO contacts (email, phone_number, link_precedence, linked_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                contact.email,
                contact.phone_number,
                contact.link_precedence.as_str(),
                contact.linked_to.map(ContactId::get),
                now,
            ],
        )
        .map_err(to_storage_err)?;
        let id = ContactId::new(tx.last_insert_rowid());
        let stored = get_contact(&tx, id)?.ok_or(StorageError::ContactNotFound(id))?;
        tx.commit().map_err(to_storage_err)?;
        Ok(stored)
    }

    fn set_precedence(
        &self,
        id: ContactId,
        precedence: LinkPrecedence,
        linked_to: Option<ContactId>,
        expected: LinkState,
    ) -> Result<PrecedenceUpdate, StorageError> {
        if linked_to == Some(id) {
            return Err(StorageError::Conflict(format!("contact {id} cannot link to itself")));
        }
        if precedence.is_primary() != linked_to.is_none() {
            return Err(StorageError::BackendError(format!(
                "invalid rewrite for contact {id}: {precedence} with link {linked_to:?}"
            )));
        }

        let mut conn = self.conn.lock().map_err(|_| lock_err())?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(to_storage_err)?;

        let current = get_contact(&tx, id)?.ok_or(StorageError::ContactNotFound(id))?;
        let found = current.link_state();
        if found.precedence == precedence && found.linked_to == linked_to {
            return Ok(PrecedenceUpdate::Unchanged);
        }
        if found != expected {
            return Err(StorageError::Conflict(format!(
                "contact {id} is {found}, expected {expected}"
            )));
        }
        if let Some(target) = linked_to {
            ensure_primary_target(&tx, target)?;
        }

        let changed = tx
            .execute(
                "UPDATE contacts SET link_precedence = ?2, linked_id = ?3, updated_at = ?4
                 WHERE id = ?1 AND deleted_at IS NULL",
                params![
                    id.get(),
                    precedence.as_str(),
                    linked_to.map(ContactId::get),
                    format_ts(Utc::now()),
                ],
            )
            .map_err(to_storage_err)?;
        if changed != 1 {
            return Err(StorageError::Conflict(format!(
                "contact {id} changed during precedence rewrite"
            )));
        }
        tx.commit().map_err(to_storage_err)?;
        Ok(PrecedenceUpdate::Applied)
    }

    fn list_all(&self) -> Result<Vec<Contact>, StorageError> {
        let conn = self.conn.lock().map_err(|_| lock_err())?;
        let sql = format!(
            "SELECT {COLUMNS} FROM contacts WHERE deleted_at IS NULL ORDER BY created_at ASC, id ASC"
        );
        query_contacts(&conn, &sql, [])
    }
}
