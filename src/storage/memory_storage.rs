//! In-process storage backend.
//!
//! Keeps every table in a mutex-guarded map. Used when the configured
//! database path is `:memory:` and by tests that need deterministic,
//! non-blocking I/O. Individual operations can be made to fail with
//! [`MemoryStorage::fail_on`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use log::debug;
use uuid::Uuid;

use crate::error_handling::types::StorageError;
use crate::session_management::SessionRecord;
use crate::storage::storage_trait::Storage;
use crate::storage::types::{
    AuditEntry, LinkedMemory, MemoryRecord, MemoryUpdate, SessionBackup, SessionFilter,
};

/// Storage operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageOp {
    GetSession,
    GetSessions,
    InsertSession,
    SaveSession,
    GetSessionMemories,
    UpdateMemories,
    ArchiveMemories,
    DeleteMemories,
    RemoveSessionLinks,
    ClearSessionCache,
    SaveBackup,
    AppendAuditEntry,
}

#[derive(Default)]
struct Tables {
    sessions: HashMap<Uuid, SessionRecord>,
    memories: BTreeMap<Uuid, MemoryRecord>,
    links: HashSet<(Uuid, Uuid)>,
    cache: HashMap<Uuid, HashMap<String, String>>,
    backups: Vec<SessionBackup>,
    audit: Vec<AuditEntry>,
    failing: HashSet<StorageOp>,
}

#[derive(Default)]
pub struct MemoryStorage {
    tables: Mutex<Tables>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check(tables: &Tables, op: StorageOp) -> Result<(), StorageError> {
        if tables.failing.contains(&op) {
            debug!("MemoryStorage: injected failure for {:?}", op);
            return Err(StorageError::WriteFailed(format!("injected failure: {:?}", op)));
        }
        Ok(())
    }

    /// Makes every later call of `op` fail.
    pub fn fail_on(&self, op: StorageOp) {
        self.lock().failing.insert(op);
    }

    pub fn clear_failures(&self) {
        self.lock().failing.clear();
    }

    pub fn insert_memory(&self, memory: MemoryRecord) {
        self.lock().memories.insert(memory.id, memory);
    }

    pub fn link_memory(&self, session_id: Uuid, memory_id: Uuid) {
        self.lock().links.insert((session_id, memory_id));
    }

    pub fn put_cache_entry(&self, session_id: Uuid, key: &str, value: &str) {
        self.lock()
            .cache
            .entry(session_id)
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    pub fn memory(&self, id: Uuid) -> Option<MemoryRecord> {
        self.lock().memories.get(&id).cloned()
    }

    pub fn link_count(&self, session_id: Uuid) -> usize {
        self.lock()
            .links
            .iter()
            .filter(|(s, _)| *s == session_id)
            .count()
    }

    pub fn cache_entries(&self, session_id: Uuid) -> usize {
        self.lock().cache.get(&session_id).map_or(0, HashMap::len)
    }

    pub fn backups(&self) -> Vec<SessionBackup> {
        self.lock().backups.clone()
    }

    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.lock().audit.clone()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get_session(&self, id: Uuid) -> Result<Option<SessionRecord>, StorageError> {
        let tables = self.lock();
        Self::check(&tables, StorageOp::GetSession)?;
        Ok(tables.sessions.get(&id).cloned())
    }

    async fn get_sessions(
        &self,
        filter: &SessionFilter,
    ) -> Result<Vec<SessionRecord>, StorageError> {
        let tables = self.lock();
        Self::check(&tables, StorageOp::GetSessions)?;
        let mut found: Vec<SessionRecord> = tables
            .sessions
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        if let Some(limit) = filter.limit {
            found.truncate(limit as usize);
        }
        Ok(found)
    }

    async fn insert_session(&self, session: &SessionRecord) -> Result<(), StorageError> {
        let mut tables = self.lock();
        Self::check(&tables, StorageOp::InsertSession)?;
        if tables.sessions.contains_key(&session.id) {
            return Err(StorageError::WriteFailed(format!(
                "session {} already exists",
                session.id
            )));
        }
        tables.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn save_session(&self, session: &SessionRecord) -> Result<(), StorageError> {
        let mut tables = self.lock();
        Self::check(&tables, StorageOp::SaveSession)?;
        match tables.sessions.get_mut(&session.id) {
            Some(stored) => {
                *stored = session.clone();
                Ok(())
            }
            None => Err(StorageError::WriteFailed(format!(
                "session {} does not exist",
                session.id
            ))),
        }
    }

    async fn get_session_memories(
        &self,
        session_id: Uuid,
    ) -> Result<Vec<LinkedMemory>, StorageError> {
        let tables = self.lock();
        Self::check(&tables, StorageOp::GetSessionMemories)?;
        let mut linked: Vec<LinkedMemory> = tables
            .links
            .iter()
            .filter(|(s, _)| *s == session_id)
            .filter_map(|(_, m)| tables.memories.get(m))
            .map(|memory| LinkedMemory {
                memory: memory.clone(),
                other_links: tables
                    .links
                    .iter()
                    .filter(|(s, m)| *m == memory.id && *s != session_id)
                    .count() as u64,
            })
            .collect();
        linked.sort_by(|a, b| a.memory.created_at.cmp(&b.memory.created_at));
        Ok(linked)
    }

    async fn update_memories(&self, updates: &[MemoryUpdate]) -> Result<usize, StorageError> {
        let mut tables = self.lock();
        Self::check(&tables, StorageOp::UpdateMemories)?;
        let mut changed = 0;
        for update in updates {
            if let Some(memory) = tables.memories.get_mut(&update.id) {
                memory.work_type = update.work_type;
                memory.content = update.content.clone();
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn archive_memories(&self, ids: &[Uuid]) -> Result<usize, StorageError> {
        let mut tables = self.lock();
        Self::check(&tables, StorageOp::ArchiveMemories)?;
        let mut changed = 0;
        for id in ids {
            if let Some(memory) = tables.memories.get_mut(id) {
                memory.archived = true;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn delete_memories(&self, ids: &[Uuid]) -> Result<usize, StorageError> {
        let mut tables = self.lock();
        Self::check(&tables, StorageOp::DeleteMemories)?;
        let doomed: HashSet<Uuid> = ids.iter().copied().collect();
        tables.links.retain(|(_, m)| !doomed.contains(m));
        let before = tables.memories.len();
        tables.memories.retain(|id, _| !doomed.contains(id));
        Ok(before - tables.memories.len())
    }

    async fn remove_session_links(&self, session_id: Uuid) -> Result<usize, StorageError> {
        let mut tables = self.lock();
        Self::check(&tables, StorageOp::RemoveSessionLinks)?;
        let before = tables.links.len();
        tables.links.retain(|(s, _)| *s != session_id);
        Ok(before - tables.links.len())
    }

    async fn clear_session_cache(&self, session_id: Uuid) -> Result<usize, StorageError> {
        let mut tables = self.lock();
        Self::check(&tables, StorageOp::ClearSessionCache)?;
        Ok(tables.cache.remove(&session_id).map_or(0, |entries| entries.len()))
    }

    async fn save_backup(&self, backup: &SessionBackup) -> Result<(), StorageError> {
        let mut tables = self.lock();
        Self::check(&tables, StorageOp::SaveBackup)?;
        tables.backups.push(backup.clone());
        Ok(())
    }

    async fn append_audit_entry(&self, entry: &AuditEntry) -> Result<(), StorageError> {
        let mut tables = self.lock();
        Self::check(&tables, StorageOp::AppendAuditEntry)?;
        tables.audit.push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_management::SessionStatus;
    use crate::storage::session_filter::by_project_name;
    use crate::storage::types::WorkType;
    use chrono::{Duration, TimeZone, Utc};

    #[tokio::test]
    async fn test_memory_storage_orders_and_limits() {
        let storage = MemoryStorage::new();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let mut ids = Vec::new();
        for minutes in [30, 10, 20] {
            let mut s = SessionRecord::new("shop", format!("/w/shop{}", minutes), "test", now);
            s.last_activity_at = now - Duration::minutes(minutes);
            ids.push(s.id);
            storage.insert_session(&s).await.unwrap();
        }

        let found = storage
            .get_sessions(&by_project_name("SHOP").limit(2))
            .await
            .unwrap();
        assert_eq!(found.iter().map(|s| s.id).collect::<Vec<_>>(), vec![ids[1], ids[2]]);
    }

    #[tokio::test]
    async fn test_memory_storage_injected_failures() {
        let storage = MemoryStorage::new();
        let s = SessionRecord::new("a", "/a", "test", Utc::now());
        storage.insert_session(&s).await.unwrap();

        storage.fail_on(StorageOp::SaveSession);
        let err = storage
            .save_session(&s.clone().with_status(SessionStatus::Paused, Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::WriteFailed(_)));
        assert_eq!(
            storage.get_session(s.id).await.unwrap().unwrap().status,
            SessionStatus::Active
        );

        storage.clear_failures();
        assert!(storage.save_session(&s).await.is_ok());
    }

    #[tokio::test]
    async fn test_memory_storage_orphan_counting() {
        let storage = MemoryStorage::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let shared = MemoryRecord::new("shared", WorkType::Memory, Utc::now());
        let own = MemoryRecord::new("own", WorkType::Todo, Utc::now());
        storage.insert_memory(shared.clone());
        storage.insert_memory(own.clone());
        storage.link_memory(a, shared.id);
        storage.link_memory(b, shared.id);
        storage.link_memory(a, own.id);

        let linked = storage.get_session_memories(a).await.unwrap();
        let orphans: Vec<Uuid> = linked
            .iter()
            .filter(|l| l.is_orphan())
            .map(|l| l.memory.id)
            .collect();
        assert_eq!(orphans, vec![own.id]);

        assert_eq!(storage.delete_memories(&[shared.id]).await.unwrap(), 1);
        assert_eq!(storage.link_count(b), 0);
        assert_eq!(storage.link_count(a), 1);
    }
}
