//! Session switching: scoring, the rule engine and the coordinator that
//! applies its decisions.

pub mod project_analyzer;
pub mod rule_engine;
pub mod similarity;
pub mod switch_coordinator;
pub mod types;

pub use project_analyzer::{ManifestAnalyzer, ProjectAnalyzer, ProjectMetadata};
pub use rule_engine::RuleEngine;
pub use switch_coordinator::SwitchCoordinator;
pub use types::*;
