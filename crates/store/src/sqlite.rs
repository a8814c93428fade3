//! SQLite-backed record store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, types::Type, Connection, Row};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use agent_runtime_core::{
    traits::{AuditStore, ContainerStore, LockEventStore},
    types::{
        AuditEntry, AuditFilter, ContainerQuery, ContainerRecord, ContainerStatus, ContainerUpdate,
        LockAction, LockEvent,
    },
    Error, Result,
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS lock_events (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        action TEXT NOT NULL,
        resource TEXT NOT NULL,
        holder TEXT NOT NULL,
        at INTEGER NOT NULL,       -- unix millis
        expires_at INTEGER
    );
    CREATE INDEX IF NOT EXISTS idx_lock_events_resource ON lock_events (resource);

    CREATE TABLE IF NOT EXISTS containers (
        id TEXT PRIMARY KEY,
        template TEXT NOT NULL,
        region TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        assigned_at INTEGER,
        released_at INTEGER,
        expires_at INTEGER NOT NULL,
        user_id TEXT,
        task_id TEXT,
        pre_initialized INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_containers_pool ON containers (region, template, status, created_at);
    CREATE INDEX IF NOT EXISTS idx_containers_expiry ON containers (expires_at);

    CREATE TABLE IF NOT EXISTS audit_log (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        tool_name TEXT NOT NULL,
        task_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        success INTEGER NOT NULL,
        duration_ms INTEGER NOT NULL,
        error_code TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_audit_user ON audit_log (user_id);
";

const CONTAINER_COLUMNS: &str = "id, template, region, status, created_at, assigned_at, released_at, \
                                 expires_at, user_id, task_id, pre_initialized";

/// Durable store in a single SQLite file.
///
/// The connection sits behind a mutex and every statement runs on the
/// blocking pool.
pub struct SqliteRecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRecordStore {
    /// Open (or create) the database at `path`.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(db_err("open"))?;
        tracing::info!(path = %path.as_ref().display(), "Opened SQLite record store");
        Self::init(conn)
    }

    /// A private database that disappears with the store.
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().map_err(db_err("open"))?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).map_err(db_err("schema"))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            f(&conn)
        })
        .await
        .map_err(|e| Error::internal(e.to_string()))?
    }
}

fn db_err(context: &'static str) -> impl Fn(rusqlite::Error) -> Error {
    move |e| Error::storage(format!("SQLite {} error: {}", context, e))
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn conversion_error(idx: usize, ty: Type, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, msg.into())
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| conversion_error(idx, Type::Integer, format!("timestamp out of range: {}", ms)))
}

fn opt_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(_) => timestamp(row, idx).map(Some),
        None => Ok(None),
    }
}

fn container_from_row(row: &Row<'_>) -> rusqlite::Result<ContainerRecord> {
    let status: String = row.get(3)?;
    let status = ContainerStatus::parse(&status)
        .ok_or_else(|| conversion_error(3, Type::Text, format!("unknown container status: {}", status)))?;
    Ok(ContainerRecord {
        id: row.get(0)?,
        template: row.get(1)?,
        region: row.get(2)?,
        status,
        created_at: timestamp(row, 4)?,
        assigned_at: opt_timestamp(row, 5)?,
        released_at: opt_timestamp(row, 6)?,
        expires_at: timestamp(row, 7)?,
        user_id: row.get(8)?,
        task_id: row.get(9)?,
        pre_initialized: row.get(10)?,
    })
}

fn lock_event_from_row(row: &Row<'_>) -> rusqlite::Result<LockEvent> {
    let action: String = row.get(0)?;
    let action = LockAction::parse(&action)
        .ok_or_else(|| conversion_error(0, Type::Text, format!("unknown lock action: {}", action)))?;
    Ok(LockEvent {
        action,
        resource: row.get(1)?,
        holder: row.get(2)?,
        at: timestamp(row, 3)?,
        expires_at: opt_timestamp(row, 4)?,
    })
}

fn audit_from_row(row: &Row<'_>) -> rusqlite::Result<AuditEntry> {
    Ok(AuditEntry {
        id: row.get(0)?,
        timestamp: timestamp(row, 1)?,
        tool_name: row.get(2)?,
        task_id: row.get(3)?,
        user_id: row.get(4)?,
        success: row.get(5)?,
        duration_ms: row.get::<_, i64>(6)? as u64,
        error_code: row.get(7)?,
    })
}

/// SQLite treats a negative LIMIT as unbounded.
fn sql_limit(limit: Option<usize>) -> i64 {
    limit.map(|l| l as i64).unwrap_or(-1)
}

#[async_trait]
impl LockEventStore for SqliteRecordStore {
    async fn append_lock_event(&self, event: LockEvent) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO lock_events (action, resource, holder, at, expires_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    event.action.as_str(),
                    event.resource,
                    event.holder,
                    millis(event.at),
                    event.expires_at.map(millis)
                ],
            )
            .map_err(db_err("insert"))?;
            Ok(())
        })
        .await
    }

    async fn lock_events(&self, resource: Option<&str>) -> Result<Vec<LockEvent>> {
        let resource = resource.map(str::to_string);
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT action, resource, holder, at, expires_at FROM lock_events
                     WHERE (?1 IS NULL OR resource = ?1) ORDER BY seq",
                )
                .map_err(db_err("prepare"))?;
            let events = stmt
                .query_map(params![resource], lock_event_from_row)
                .map_err(db_err("query"))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db_err("row"))?;
            Ok(events)
        })
        .await
    }
}

#[async_trait]
impl ContainerStore for SqliteRecordStore {
    async fn insert_container(&self, record: ContainerRecord) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO containers ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    CONTAINER_COLUMNS
                ),
                params![
                    record.id,
                    record.template,
                    record.region,
                    record.status.as_str(),
                    millis(record.created_at),
                    record.assigned_at.map(millis),
                    record.released_at.map(millis),
                    millis(record.expires_at),
                    record.user_id,
                    record.task_id,
                    record.pre_initialized
                ],
            )
            .map_err(db_err("insert"))?;
            Ok(())
        })
        .await
    }

    async fn get_container(&self, id: &str) -> Result<Option<ContainerRecord>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&format!("SELECT {} FROM containers WHERE id = ?1", CONTAINER_COLUMNS))
                .map_err(db_err("prepare"))?;
            let mut rows = stmt
                .query_map(params![id], container_from_row)
                .map_err(db_err("query"))?;
            rows.next().transpose().map_err(db_err("row"))
        })
        .await
    }

    async fn find_containers(&self, query: &ContainerQuery) -> Result<Vec<ContainerRecord>> {
        let query = query.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM containers
                     WHERE (?1 IS NULL OR region = ?1)
                       AND (?2 IS NULL OR template = ?2)
                       AND (?3 IS NULL OR status = ?3)
                     ORDER BY created_at, id
                     LIMIT ?4",
                    CONTAINER_COLUMNS
                ))
                .map_err(db_err("prepare"))?;
            let records = stmt
                .query_map(
                    params![
                        query.region,
                        query.template,
                        query.status.map(|s| s.as_str()),
                        sql_limit(query.limit)
                    ],
                    container_from_row,
                )
                .map_err(db_err("query"))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db_err("row"))?;
            Ok(records)
        })
        .await
    }

    async fn update_container_if(
        &self,
        id: &str,
        expected: ContainerStatus,
        update: ContainerUpdate,
    ) -> Result<bool> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE containers SET
                        status = ?1,
                        assigned_at = COALESCE(?2, assigned_at),
                        released_at = COALESCE(?3, released_at),
                        user_id = COALESCE(?4, user_id),
                        task_id = COALESCE(?5, task_id)
                     WHERE id = ?6 AND status = ?7",
                    params![
                        update.status.as_str(),
                        update.assigned_at.map(millis),
                        update.released_at.map(millis),
                        update.user_id,
                        update.task_id,
                        id,
                        expected.as_str()
                    ],
                )
                .map_err(db_err("update"))?;
            Ok(changed == 1)
        })
        .await
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM containers WHERE expires_at <= ?1", params![millis(now)])
                .map_err(db_err("delete"))
        })
        .await
    }
}

#[async_trait]
impl AuditStore for SqliteRecordStore {
    async fn log(&self, entry: AuditEntry) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO audit_log (id, timestamp, tool_name, task_id, user_id, success, duration_ms, error_code)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    entry.id,
                    millis(entry.timestamp),
                    entry.tool_name,
                    entry.task_id,
                    entry.user_id,
                    entry.success,
                    entry.duration_ms as i64,
                    entry.error_code
                ],
            )
            .map_err(db_err("insert"))?;
            Ok(())
        })
        .await
    }

    async fn query(&self, filter: AuditFilter) -> Result<Vec<AuditEntry>> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, timestamp, tool_name, task_id, user_id, success, duration_ms, error_code
                     FROM audit_log
                     WHERE (?1 IS NULL OR user_id = ?1)
                       AND (?2 IS NULL OR task_id = ?2)
                       AND (?3 IS NULL OR tool_name = ?3)
                       AND (?4 IS NULL OR success = ?4)
                     ORDER BY seq
                     LIMIT ?5",
                )
                .map_err(db_err("prepare"))?;
            let entries = stmt
                .query_map(
                    params![
                        filter.user_id,
                        filter.task_id,
                        filter.tool_name,
                        filter.success,
                        sql_limit(filter.limit)
                    ],
                    audit_from_row,
                )
                .map_err(db_err("query"))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db_err("row"))?;
            Ok(entries)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::container;
    use chrono::Duration;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_containers_survive_reopen() {
        let file = NamedTempFile::new().unwrap();
        let now = Utc::now();
        {
            let store = SqliteRecordStore::new(file.path()).unwrap();
            store.insert_container(container("c1", ContainerStatus::Warm, now)).await.unwrap();
        }
        let store = SqliteRecordStore::new(file.path()).unwrap();
        let record = store.get_container("c1").await.unwrap().unwrap();
        assert_eq!(record.status, ContainerStatus::Warm);
        assert_eq!(record.template, "python");
        assert_eq!(record.created_at.timestamp_millis(), now.timestamp_millis());
        assert!(store.get_container("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_conditional_update() {
        let store = SqliteRecordStore::in_memory().unwrap();
        let now = Utc::now();
        store.insert_container(container("c1", ContainerStatus::Warm, now)).await.unwrap();

        let claim = ContainerUpdate {
            assigned_at: Some(now),
            user_id: Some("alice".into()),
            ..ContainerUpdate::status(ContainerStatus::Assigned)
        };
        assert!(store.update_container_if("c1", ContainerStatus::Warm, claim.clone()).await.unwrap());
        assert!(!store.update_container_if("c1", ContainerStatus::Warm, claim).await.unwrap());

        let record = store.get_container("c1").await.unwrap().unwrap();
        assert_eq!(record.status, ContainerStatus::Assigned);
        assert_eq!(record.user_id.as_deref(), Some("alice"));
        assert!(record.task_id.is_none());
    }

    #[tokio::test]
    async fn test_find_filters_and_orders() {
        let store = SqliteRecordStore::in_memory().unwrap();
        let now = Utc::now();
        store.insert_container(container("b", ContainerStatus::Warm, now)).await.unwrap();
        store
            .insert_container(container("a", ContainerStatus::Warm, now - Duration::seconds(5)))
            .await
            .unwrap();
        store.insert_container(container("c", ContainerStatus::Assigned, now)).await.unwrap();

        let warm = store
            .find_containers(&ContainerQuery {
                region: Some("us".into()),
                template: Some("python".into()),
                status: Some(ContainerStatus::Warm),
                limit: None,
            })
            .await
            .unwrap();
        let ids: Vec<_> = warm.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);

        let one = store
            .find_containers(&ContainerQuery {
                limit: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(one.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_expired() {
        let store = SqliteRecordStore::in_memory().unwrap();
        let now = Utc::now();
        store.insert_container(container("c1", ContainerStatus::Warm, now)).await.unwrap();
        store
            .insert_container(container("c2", ContainerStatus::Expired, now - Duration::minutes(20)))
            .await
            .unwrap();
        assert_eq!(store.delete_expired(now).await.unwrap(), 1);
        assert!(store.get_container("c1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_lock_events_and_audit() {
        let store = SqliteRecordStore::in_memory().unwrap();
        let expiry = Utc::now() + Duration::minutes(5);
        store
            .append_lock_event(LockEvent::new(LockAction::Acquire, "file:a", "agent-1").with_expiry(Some(expiry)))
            .await
            .unwrap();
        store
            .append_lock_event(LockEvent::new(LockAction::ForceRelease, "file:a", "agent-1"))
            .await
            .unwrap();
        store
            .append_lock_event(LockEvent::new(LockAction::Acquire, "file:b", "agent-2"))
            .await
            .unwrap();

        let events = store.lock_events(Some("file:a")).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].expires_at.map(|t| t.timestamp_millis()), Some(expiry.timestamp_millis()));
        assert_eq!(events[1].action, LockAction::ForceRelease);

        store.log(AuditEntry::new("shell.exec", "t1", "alice")).await.unwrap();
        store
            .log(AuditEntry::new("shell.exec", "t2", "alice").with_outcome(false, 30_000, Some("TIMEOUT".into())))
            .await
            .unwrap();
        let failures = store
            .query(AuditFilter {
                user_id: Some("alice".into()),
                success: Some(false),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].duration_ms, 30_000);
        assert_eq!(failures[0].error_code.as_deref(), Some("TIMEOUT"));
    }
}
