//! Storage Trait
//!
//! This module defines the `Storage` trait, the interface the lifecycle core
//! uses to reach the relational store holding sessions, their memory links
//! and the memories themselves.
//!
//! Every method is a narrow, single-purpose call. Methods that touch several
//! rows (`update_memories`, `archive_memories`, `delete_memories`) are
//! atomic: either every row is written or none is.
//!
//! All methods return a `Result` to handle potential storage errors.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error_handling::types::StorageError;
use crate::session_management::SessionRecord;
use crate::storage::types::{AuditEntry, LinkedMemory, MemoryUpdate, SessionBackup, SessionFilter};

#[async_trait]
pub trait Storage: Send + Sync {
    /// Loads one session, `None` when the id is unknown.
    async fn get_session(&self, id: Uuid) -> Result<Option<SessionRecord>, StorageError>;

    /// Retrieves sessions matching `filter`, most recently active first.
    async fn get_sessions(&self, filter: &SessionFilter)
        -> Result<Vec<SessionRecord>, StorageError>;

    /// Persists a new session.
    async fn insert_session(&self, session: &SessionRecord) -> Result<(), StorageError>;

    /// Overwrites the stored copy of an existing session.
    async fn save_session(&self, session: &SessionRecord) -> Result<(), StorageError>;

    /// Memories linked to the session through `session_memory_links`.
    async fn get_session_memories(
        &self,
        session_id: Uuid,
    ) -> Result<Vec<LinkedMemory>, StorageError>;

    /// Rewrites kind and content of the given memories. Returns the number
    /// of rows changed.
    async fn update_memories(&self, updates: &[MemoryUpdate]) -> Result<usize, StorageError>;

    async fn archive_memories(&self, ids: &[Uuid]) -> Result<usize, StorageError>;

    async fn delete_memories(&self, ids: &[Uuid]) -> Result<usize, StorageError>;

    /// Drops every link row of the session; the memories stay.
    async fn remove_session_links(&self, session_id: Uuid) -> Result<usize, StorageError>;

    /// Drops session-scoped temporary and cache rows.
    async fn clear_session_cache(&self, session_id: Uuid) -> Result<usize, StorageError>;

    async fn save_backup(&self, backup: &SessionBackup) -> Result<(), StorageError>;

    async fn append_audit_entry(&self, entry: &AuditEntry) -> Result<(), StorageError>;
}
