//! Safe session termination.
//!
//! Re-exports:
//! - [`TerminationCoordinator`]: single, forced and batch termination.
//! - [`TerminationReason`], [`TerminationOptions`], [`BatchOptions`]: request types.
//! - [`TerminationResult`], [`TerminationReport`], [`BatchTerminationResult`]: outcomes.

pub mod termination_coordinator;
pub mod types;

pub use termination_coordinator::TerminationCoordinator;
pub use types::*;
