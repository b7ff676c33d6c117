//! Session management core module.
//!
//! This module provides the session data model and the lifecycle rules that
//! govern how a session moves between statuses.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Submodule for session data structures and utilities.
pub mod session;
/// Submodule for the status transition rules.
pub mod transition_validator;

pub use session::SessionRecord;
pub use transition_validator::{
    StateDistribution, TransitionOptions, TransitionOutcome, TransitionValidator,
};

/// Represents the current status of a session.
///
/// Variants:
/// - `Active`: The session is the one currently being worked on.
/// - `Paused`: The session was set aside and can be resumed.
/// - `Completed`: The work concluded normally.
/// - `Cancelled`: The work was abandoned or terminated abnormally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Paused,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub const ALL: [SessionStatus; 4] = [
        SessionStatus::Active,
        SessionStatus::Paused,
        SessionStatus::Completed,
        SessionStatus::Cancelled,
    ];

    /// Completed and cancelled sessions carry an `ended_at` timestamp.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "active" => Some(SessionStatus::Active),
            "paused" => Some(SessionStatus::Paused),
            "completed" => Some(SessionStatus::Completed),
            "cancelled" => Some(SessionStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_names_round_trip_through_parse() {
        for status in SessionStatus::ALL {
            assert_eq!(SessionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SessionStatus::parse("ACTIVE"), Some(SessionStatus::Active));
        assert_eq!(SessionStatus::parse("archived"), None);
    }

    #[test]
    fn only_completed_and_cancelled_are_terminal() {
        assert!(!SessionStatus::Active.is_terminal());
        assert!(!SessionStatus::Paused.is_terminal());
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Cancelled.is_terminal());
    }
}
