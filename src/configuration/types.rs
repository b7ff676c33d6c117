use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file, or `:memory:` for the in-process store.
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("worksession.sqlite3"),
        }
    }
}

/// Tunables of the switch rule engine.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchRules {
    pub similarity_threshold: f64,
    pub prefer_recent_sessions: bool,
    pub auto_pause_previous: bool,
    /// Soft cap; exceeding it queues idle sessions for completion.
    pub max_active_sessions: usize,
    pub auto_complete_after_hours: i64,
    /// Candidates fetched per lookup criterion.
    pub candidate_lookup_limit: u64,
}

impl Default for SwitchRules {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.8,
            prefer_recent_sessions: true,
            auto_pause_previous: true,
            max_active_sessions: 3,
            auto_complete_after_hours: 24,
            candidate_lookup_limit: 5,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitionPolicy {
    pub allow_reopen_completed: bool,
    pub allow_reopen_cancelled: bool,
}

impl Default for TransitionPolicy {
    fn default() -> Self {
        Self {
            allow_reopen_completed: true,
            allow_reopen_cancelled: false,
        }
    }
}

/// How the environment monitor acts on an evaluation.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchPolicy {
    /// Execute without asking when confidence clears the threshold.
    Auto,
    /// Ask first; unanswered prompts expire as declined.
    Prompt,
    /// Only suggest, never mutate.
    Manual,
    Disabled,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub policy: SwitchPolicy,
    pub poll_interval_ms: u64,
    pub debounce_ms: u64,
    pub auto_switch_threshold: f64,
    pub require_confirmation: bool,
    pub prompt_timeout_secs: u64,
    pub max_switches_per_hour: usize,
    pub history_limit: usize,
    /// Substrings; a path containing any of them is ignored.
    pub excluded_paths: Vec<String>,
    /// Prefixes; when non-empty a path must start with one of them.
    pub allowed_paths: Vec<String>,
    pub detect_git_remote: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            policy: SwitchPolicy::Prompt,
            poll_interval_ms: 5_000,
            debounce_ms: 2_000,
            auto_switch_threshold: 0.8,
            require_confirmation: false,
            prompt_timeout_secs: 30,
            max_switches_per_hour: 10,
            history_limit: 100,
            excluded_paths: vec![
                "node_modules".to_string(),
                "/.git".to_string(),
                "/.cache".to_string(),
            ],
            allowed_paths: Vec::new(),
            detect_git_remote: true,
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn prompt_timeout(&self) -> Duration {
        Duration::from_secs(self.prompt_timeout_secs)
    }
}

/// What happens to memories linked only to a terminated session.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrphanPolicy {
    Keep,
    Archive,
    Delete,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminationConfig {
    pub create_backup: bool,
    /// When set, a failed backup aborts the termination instead of being
    /// reported as a warning.
    pub require_backup: bool,
    pub orphaned_memories: OrphanPolicy,
    pub generate_report: bool,
    pub recent_activity_minutes: i64,
    pub batch_concurrency: usize,
}

impl Default for TerminationConfig {
    fn default() -> Self {
        Self {
            create_backup: true,
            require_backup: false,
            orphaned_memories: OrphanPolicy::Keep,
            generate_report: true,
            recent_activity_minutes: 5,
            batch_concurrency: 3,
        }
    }
}
