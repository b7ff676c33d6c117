use std::collections::BTreeSet;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, info, warn};
use sea_orm::{
    ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend,
    EntityTrait, QueryFilter, QueryOrder, QueryResult, QuerySelect, Statement, TransactionTrait,
    Value,
};
use uuid::Uuid;

use crate::error_handling::types::StorageError;
use crate::session_management::{SessionRecord, SessionStatus};
use crate::storage::db_entities::{self as sessions, memories};
use crate::storage::storage_trait::Storage;
use crate::storage::types::{
    AuditEntry, LinkedMemory, MemoryRecord, MemoryUpdate, SessionBackup, SessionFilter, WorkType,
};

const SCHEMA: [&str; 7] = [
    "CREATE TABLE IF NOT EXISTS sessions (
        id TEXT PRIMARY KEY,
        project_name TEXT NOT NULL,
        project_path TEXT NOT NULL,
        git_repository TEXT,
        status TEXT NOT NULL,
        started_at TEXT NOT NULL,
        ended_at TEXT,
        updated_at TEXT NOT NULL,
        last_activity_at TEXT NOT NULL,
        activity_count INTEGER NOT NULL DEFAULT 0,
        memory_count INTEGER NOT NULL DEFAULT 0,
        total_work_time INTEGER NOT NULL DEFAULT 0,
        tags TEXT NOT NULL DEFAULT '[]',
        auto_created INTEGER NOT NULL DEFAULT 0,
        created_by TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT ''
    );",
    "CREATE TABLE IF NOT EXISTS memories (
        id TEXT PRIMARY KEY,
        content TEXT NOT NULL,
        work_type TEXT NOT NULL DEFAULT 'memory',
        session_id TEXT,
        archived INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS session_memory_links (
        session_id TEXT NOT NULL,
        memory_id TEXT NOT NULL,
        PRIMARY KEY (session_id, memory_id)
    );",
    "CREATE TABLE IF NOT EXISTS session_cache (
        session_id TEXT NOT NULL,
        cache_key TEXT NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (session_id, cache_key)
    );",
    "CREATE TABLE IF NOT EXISTS session_backups (
        id TEXT PRIMARY KEY,
        session_id TEXT NOT NULL,
        payload TEXT NOT NULL,
        created_at TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS session_audit_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id TEXT NOT NULL,
        action TEXT NOT NULL,
        reason TEXT NOT NULL,
        details TEXT NOT NULL,
        created_at TEXT NOT NULL
    );",
    "CREATE INDEX IF NOT EXISTS idx_sessions_activity ON sessions (last_activity_at);",
];

pub(crate) fn format_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("bad timestamp {:?}: {}", raw, e)))
}

fn parse_id(raw: &str) -> Result<Uuid, StorageError> {
    Uuid::parse_str(raw).map_err(|e| StorageError::Corrupt(format!("bad id {:?}: {}", raw, e)))
}

fn stmt<I: IntoIterator<Item = Value>>(sql: &str, values: I) -> Statement {
    Statement::from_sql_and_values(DbBackend::Sqlite, sql, values)
}

impl TryFrom<sessions::Model> for SessionRecord {
    type Error = StorageError;

    fn try_from(row: sessions::Model) -> Result<Self, Self::Error> {
        let status = SessionStatus::parse(&row.status)
            .ok_or_else(|| StorageError::Corrupt(format!("unknown status {:?}", row.status)))?;
        let tags: BTreeSet<String> = serde_json::from_str(&row.tags)
            .map_err(|e| StorageError::Corrupt(format!("bad tags for {}: {}", row.id, e)))?;
        Ok(SessionRecord {
            id: parse_id(&row.id)?,
            project_name: row.project_name,
            project_path: row.project_path,
            git_repository: row.git_repository,
            status,
            started_at: parse_ts(&row.started_at)?,
            ended_at: row.ended_at.as_deref().map(parse_ts).transpose()?,
            updated_at: parse_ts(&row.updated_at)?,
            last_activity_at: parse_ts(&row.last_activity_at)?,
            activity_count: row.activity_count.max(0) as u64,
            memory_count: row.memory_count.max(0) as u64,
            total_work_time: row.total_work_time,
            tags,
            auto_created: row.auto_created,
            created_by: row.created_by,
            description: row.description,
        })
    }
}

fn memory_from_row(row: &QueryResult) -> Result<MemoryRecord, StorageError> {
    let work_type: String = row.try_get("", "work_type")?;
    let session_id: Option<String> = row.try_get("", "session_id")?;
    let id: String = row.try_get("", "id")?;
    let created_at: String = row.try_get("", "created_at")?;
    Ok(MemoryRecord {
        id: parse_id(&id)?,
        content: row.try_get("", "content")?,
        work_type: WorkType::parse(&work_type)
            .ok_or_else(|| StorageError::Corrupt(format!("unknown work type {:?}", work_type)))?,
        session_id: session_id.as_deref().map(parse_id).transpose()?,
        archived: row.try_get("", "archived")?,
        created_at: parse_ts(&created_at)?,
    })
}

/// SQLite-backed storage.
///
/// Reads of the `sessions` table go through the SeaORM entity; writes are
/// parameterised statements. Multi-row writes run in one transaction and
/// are rolled back on the first failing row.
pub struct DatabaseStorage {
    db: DatabaseConnection,
}

impl DatabaseStorage {
    /// Default database filename used in the application's working directory
    pub const DEFAULT_DB_FILE: &'static str = "worksession.sqlite3";

    /// Opens (creating if missing) the database file at `path` and ensures
    /// the schema exists.
    pub async fn connect<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;
        }

        let mut options = ConnectOptions::new(format!("sqlite://{}?mode=rwc", path.display()));
        options.max_connections(5).sqlx_logging(false);
        let db = Database::connect(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        let storage = Self { db };
        storage.create_schema().await?;
        info!("DatabaseStorage opened at {}", path.display());
        Ok(storage)
    }

    async fn create_schema(&self) -> Result<(), StorageError> {
        for ddl in SCHEMA {
            self.db
                .execute_unprepared(ddl)
                .await
                .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        }
        Ok(())
    }

    async fn run(&self, statement: Statement) -> Result<usize, StorageError> {
        let result = self
            .db
            .execute(statement)
            .await
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        Ok(result.rows_affected() as usize)
    }

    /// Runs every statement inside one transaction.
    async fn run_atomically(&self, statements: Vec<Statement>) -> Result<usize, StorageError> {
        Ok(self.run_each_atomically(statements).await?.into_iter().sum())
    }

    /// Like [`run_atomically`](Self::run_atomically), returning the rows
    /// affected by each statement in order.
    async fn run_each_atomically(
        &self,
        statements: Vec<Statement>,
    ) -> Result<Vec<usize>, StorageError> {
        if statements.is_empty() {
            return Ok(Vec::new());
        }
        let txn = self.db.begin().await?;
        let mut affected = Vec::with_capacity(statements.len());
        for statement in statements {
            match txn.execute(statement).await {
                Ok(result) => affected.push(result.rows_affected() as usize),
                Err(e) => {
                    warn!("Rolling back batch write: {}", e);
                    txn.rollback().await?;
                    return Err(StorageError::WriteFailed(e.to_string()));
                }
            }
        }
        txn.commit().await?;
        Ok(affected)
    }

    /// Inserts a memory row. Memory CRUD belongs to the memory subsystem;
    /// this exists for imports and tests.
    pub async fn insert_memory(&self, memory: &MemoryRecord) -> Result<(), StorageError> {
        self.run(stmt(
            "INSERT INTO memories (id, content, work_type, session_id, archived, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            [
                memory.id.to_string().into(),
                memory.content.clone().into(),
                memory.work_type.as_str().into(),
                memory.session_id.map(|id| id.to_string()).into(),
                memory.archived.into(),
                format_ts(memory.created_at).into(),
                format_ts(memory.created_at).into(),
            ],
        ))
        .await
        .map(|_| ())
    }

    pub async fn link_memory(&self, session_id: Uuid, memory_id: Uuid) -> Result<(), StorageError> {
        self.run(stmt(
            "INSERT OR IGNORE INTO session_memory_links (session_id, memory_id) VALUES (?, ?)",
            [session_id.to_string().into(), memory_id.to_string().into()],
        ))
        .await
        .map(|_| ())
    }

    pub async fn put_cache_entry(
        &self,
        session_id: Uuid,
        key: &str,
        value: &str,
    ) -> Result<(), StorageError> {
        self.run(stmt(
            "INSERT OR REPLACE INTO session_cache (session_id, cache_key, value) VALUES (?, ?, ?)",
            [session_id.to_string().into(), key.into(), value.into()],
        ))
        .await
        .map(|_| ())
    }

    pub async fn get_memory(&self, id: Uuid) -> Result<Option<MemoryRecord>, StorageError> {
        let Some(row) = memories::Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await?
        else {
            return Ok(None);
        };
        let work_type = WorkType::parse(&row.work_type)
            .ok_or_else(|| StorageError::Corrupt(format!("unknown work type {:?}", row.work_type)))?;
        Ok(Some(MemoryRecord {
            id: parse_id(&row.id)?,
            content: row.content,
            work_type,
            session_id: row.session_id.as_deref().map(parse_id).transpose()?,
            archived: row.archived,
            created_at: parse_ts(&row.created_at)?,
        }))
    }

    async fn count(&self, sql: &str, session_id: Uuid) -> Result<u64, StorageError> {
        let row = self
            .db
            .query_one(stmt(sql, [session_id.to_string().into()]))
            .await?
            .ok_or_else(|| StorageError::ReadFailed("count returned no row".into()))?;
        let n: i64 = row.try_get("", "n")?;
        Ok(n.max(0) as u64)
    }

    pub async fn count_links(&self, session_id: Uuid) -> Result<u64, StorageError> {
        self.count(
            "SELECT COUNT(*) AS n FROM session_memory_links WHERE session_id = ?",
            session_id,
        )
        .await
    }

    pub async fn count_cache_entries(&self, session_id: Uuid) -> Result<u64, StorageError> {
        self.count(
            "SELECT COUNT(*) AS n FROM session_cache WHERE session_id = ?",
            session_id,
        )
        .await
    }

    pub async fn count_backups(&self, session_id: Uuid) -> Result<u64, StorageError> {
        self.count(
            "SELECT COUNT(*) AS n FROM session_backups WHERE session_id = ?",
            session_id,
        )
        .await
    }

    pub async fn list_audit_actions(&self, session_id: Uuid) -> Result<Vec<String>, StorageError> {
        let rows = self
            .db
            .query_all(stmt(
                "SELECT action FROM session_audit_log WHERE session_id = ? ORDER BY id",
                [session_id.to_string().into()],
            ))
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String>("", "action").map_err(StorageError::from))
            .collect()
    }
}

#[async_trait]
impl Storage for DatabaseStorage {
    async fn get_session(&self, id: Uuid) -> Result<Option<SessionRecord>, StorageError> {
        sessions::Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await?
            .map(SessionRecord::try_from)
            .transpose()
    }

    async fn get_sessions(
        &self,
        filter: &SessionFilter,
    ) -> Result<Vec<SessionRecord>, StorageError> {
        let mut select = sessions::Entity::find();
        if let Some(name) = &filter.project_name {
            select = select.filter(sessions::Column::ProjectName.contains(name.as_str()));
        }
        if let Some(path) = &filter.project_path {
            select = select.filter(sessions::Column::ProjectPath.eq(path.as_str()));
        }
        if let Some(repo) = &filter.git_repository {
            select = select.filter(sessions::Column::GitRepository.eq(repo.as_str()));
        }
        if !filter.statuses.is_empty() {
            select = select.filter(
                sessions::Column::Status.is_in(filter.statuses.iter().map(|s| s.as_str())),
            );
        }
        select = select.order_by_desc(sessions::Column::LastActivityAt);
        if let Some(limit) = filter.limit {
            select = select.limit(limit);
        }

        let rows = select.all(&self.db).await?;
        debug!("get_sessions({:?}) -> {} rows", filter, rows.len());
        rows.into_iter().map(SessionRecord::try_from).collect()
    }

    async fn insert_session(&self, session: &SessionRecord) -> Result<(), StorageError> {
        let tags = serde_json::to_string(&session.tags)
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        self.run(stmt(
            "INSERT INTO sessions (id, project_name, project_path, git_repository, status,
                started_at, ended_at, updated_at, last_activity_at, activity_count, memory_count,
                total_work_time, tags, auto_created, created_by, description)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            [
                session.id.to_string().into(),
                session.project_name.clone().into(),
                session.project_path.clone().into(),
                session.git_repository.clone().into(),
                session.status.as_str().into(),
                format_ts(session.started_at).into(),
                session.ended_at.map(format_ts).into(),
                format_ts(session.updated_at).into(),
                format_ts(session.last_activity_at).into(),
                (session.activity_count as i64).into(),
                (session.memory_count as i64).into(),
                session.total_work_time.into(),
                tags.into(),
                session.auto_created.into(),
                session.created_by.clone().into(),
                session.description.clone().into(),
            ],
        ))
        .await
        .map(|_| ())
    }

    async fn save_session(&self, session: &SessionRecord) -> Result<(), StorageError> {
        let tags = serde_json::to_string(&session.tags)
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        let changed = self
            .run(stmt(
                "UPDATE sessions SET project_name = ?, project_path = ?, git_repository = ?,
                    status = ?, started_at = ?, ended_at = ?, updated_at = ?, last_activity_at = ?,
                    activity_count = ?, memory_count = ?, total_work_time = ?, tags = ?,
                    auto_created = ?, created_by = ?, description = ?
                 WHERE id = ?",
                [
                    session.project_name.clone().into(),
                    session.project_path.clone().into(),
                    session.git_repository.clone().into(),
                    session.status.as_str().into(),
                    format_ts(session.started_at).into(),
                    session.ended_at.map(format_ts).into(),
                    format_ts(session.updated_at).into(),
                    format_ts(session.last_activity_at).into(),
                    (session.activity_count as i64).into(),
                    (session.memory_count as i64).into(),
                    session.total_work_time.into(),
                    tags.into(),
                    session.auto_created.into(),
                    session.created_by.clone().into(),
                    session.description.clone().into(),
                    session.id.to_string().into(),
                ],
            ))
            .await?;
        if changed == 0 {
            return Err(StorageError::WriteFailed(format!(
                "session {} does not exist",
                session.id
            )));
        }
        Ok(())
    }

    async fn get_session_memories(
        &self,
        session_id: Uuid,
    ) -> Result<Vec<LinkedMemory>, StorageError> {
        let id = session_id.to_string();
        let rows = self
            .db
            .query_all(stmt(
                "SELECT m.id, m.content, m.work_type, m.session_id, m.archived, m.created_at,
                    (SELECT COUNT(*) FROM session_memory_links o
                      WHERE o.memory_id = m.id AND o.session_id <> ?) AS other_links
                 FROM session_memory_links l
                 JOIN memories m ON m.id = l.memory_id
                 WHERE l.session_id = ?
                 ORDER BY m.created_at",
                [id.clone().into(), id.into()],
            ))
            .await?;

        rows.iter()
            .map(|row| {
                let other_links: i64 = row.try_get("", "other_links")?;
                Ok(LinkedMemory {
                    memory: memory_from_row(row)?,
                    other_links: other_links.max(0) as u64,
                })
            })
            .collect()
    }

    async fn update_memories(&self, updates: &[MemoryUpdate]) -> Result<usize, StorageError> {
        let statements = updates
            .iter()
            .map(|u| {
                stmt(
                    "UPDATE memories SET work_type = ?, content = ?, updated_at = ? WHERE id = ?",
                    [
                        u.work_type.as_str().into(),
                        u.content.clone().into(),
                        format_ts(u.updated_at).into(),
                        u.id.to_string().into(),
                    ],
                )
            })
            .collect();
        self.run_atomically(statements).await
    }

    async fn archive_memories(&self, ids: &[Uuid]) -> Result<usize, StorageError> {
        let statements = ids
            .iter()
            .map(|id| {
                stmt(
                    "UPDATE memories SET archived = 1 WHERE id = ?",
                    [id.to_string().into()],
                )
            })
            .collect();
        self.run_atomically(statements).await
    }

    async fn delete_memories(&self, ids: &[Uuid]) -> Result<usize, StorageError> {
        let mut statements = Vec::with_capacity(ids.len() * 2);
        for id in ids {
            statements.push(stmt("DELETE FROM memories WHERE id = ?", [id.to_string().into()]));
            statements.push(stmt(
                "DELETE FROM session_memory_links WHERE memory_id = ?",
                [id.to_string().into()],
            ));
        }
        let affected = self.run_each_atomically(statements).await?;
        // Even positions hold the `memories` deletes.
        let deleted: usize = affected.iter().step_by(2).sum();
        debug!(
            "deleted {} of {} requested memories ({} rows touched)",
            deleted,
            ids.len(),
            affected.iter().sum::<usize>()
        );
        Ok(deleted)
    }

    async fn remove_session_links(&self, session_id: Uuid) -> Result<usize, StorageError> {
        self.run(stmt(
            "DELETE FROM session_memory_links WHERE session_id = ?",
            [session_id.to_string().into()],
        ))
        .await
    }

    async fn clear_session_cache(&self, session_id: Uuid) -> Result<usize, StorageError> {
        self.run(stmt(
            "DELETE FROM session_cache WHERE session_id = ?",
            [session_id.to_string().into()],
        ))
        .await
    }

    async fn save_backup(&self, backup: &SessionBackup) -> Result<(), StorageError> {
        let payload =
            serde_json::to_string(backup).map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        self.run(stmt(
            "INSERT INTO session_backups (id, session_id, payload, created_at) VALUES (?, ?, ?, ?)",
            [
                backup.id.to_string().into(),
                backup.session.id.to_string().into(),
                payload.into(),
                format_ts(backup.created_at).into(),
            ],
        ))
        .await
        .map(|_| ())
    }

    async fn append_audit_entry(&self, entry: &AuditEntry) -> Result<(), StorageError> {
        self.run(stmt(
            "INSERT INTO session_audit_log (session_id, action, reason, details, created_at)
             VALUES (?, ?, ?, ?, ?)",
            [
                entry.session_id.to_string().into(),
                entry.action.clone().into(),
                entry.reason.clone().into(),
                entry.details.to_string().into(),
                format_ts(entry.created_at).into(),
            ],
        ))
        .await
        .map(|_| ())
    }
}
