use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session_management::{SessionRecord, SessionStatus};

/// Kind of a stored memory item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkType {
    Memory,
    Todo,
}

impl WorkType {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkType::Memory => "memory",
            WorkType::Todo => "todo",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "memory" => Some(WorkType::Memory),
            "todo" => Some(WorkType::Todo),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: Uuid,
    pub content: String,
    pub work_type: WorkType,
    pub session_id: Option<Uuid>,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
}

impl MemoryRecord {
    pub fn new(content: impl Into<String>, work_type: WorkType, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            work_type,
            session_id: None,
            archived: false,
            created_at: now,
        }
    }
}

/// A memory reached through `session_memory_links`, with the number of
/// *other* sessions that also link to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedMemory {
    pub memory: MemoryRecord,
    pub other_links: u64,
}

impl LinkedMemory {
    pub fn is_orphan(&self) -> bool {
        self.other_links == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryUpdate {
    pub id: Uuid,
    pub work_type: WorkType,
    pub content: String,
    pub updated_at: DateTime<Utc>,
}

/// Snapshot written before a session is terminated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionBackup {
    pub id: Uuid,
    pub session: SessionRecord,
    pub memories: Vec<MemoryRecord>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub session_id: Uuid,
    pub action: String,
    pub reason: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Criteria for [`Storage::get_sessions`](super::storage_trait::Storage::get_sessions).
///
/// All set criteria must hold. Name matching is case-insensitive
/// containment; path and repository matching is exact. Results come back
/// most recently active first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionFilter {
    pub project_name: Option<String>,
    pub project_path: Option<String>,
    pub git_repository: Option<String>,
    pub statuses: Vec<SessionStatus>,
    pub limit: Option<u64>,
}

impl SessionFilter {
    pub fn matches(&self, session: &SessionRecord) -> bool {
        if let Some(name) = &self.project_name {
            if !session
                .project_name
                .to_lowercase()
                .contains(&name.to_lowercase())
            {
                return false;
            }
        }
        if let Some(path) = &self.project_path {
            if &session.project_path != path {
                return false;
            }
        }
        if let Some(repo) = &self.git_repository {
            if session.git_repository.as_ref() != Some(repo) {
                return false;
            }
        }
        self.statuses.is_empty() || self.statuses.contains(&session.status)
    }
}
