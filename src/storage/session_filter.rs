//! Helpers for building `SessionFilter` values.
//!
//! This module re-exports `SessionFilter` and provides convenience builders
//! for the lookups used by candidate discovery.

pub use crate::storage::types::SessionFilter;

use crate::session_management::SessionStatus;

/// Sessions whose project name contains `name`, ignoring case.
pub fn by_project_name<S: Into<String>>(name: S) -> SessionFilter {
    SessionFilter {
        project_name: Some(name.into()),
        ..Default::default()
    }
}

/// Sessions rooted at exactly `path`.
pub fn by_project_path<S: Into<String>>(path: S) -> SessionFilter {
    SessionFilter {
        project_path: Some(path.into()),
        ..Default::default()
    }
}

pub fn by_git_repository<S: Into<String>>(repository: S) -> SessionFilter {
    SessionFilter {
        git_repository: Some(repository.into()),
        ..Default::default()
    }
}

pub fn with_status(status: SessionStatus) -> SessionFilter {
    SessionFilter {
        statuses: vec![status],
        ..Default::default()
    }
}

impl SessionFilter {
    pub fn with_statuses(mut self, statuses: &[SessionStatus]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}
