//! Storage subsystem
//!
//! This module provides abstractions and implementations for persisting
//! sessions, their memory links, backups and the termination audit trail.
//!
//! Components:
//! - `storage_trait`: the Storage trait defining a uniform API.
//! - `types`: shared data types used by storage backends.
//! - `database_storage`: SQLite implementation using SeaORM.
//! - `memory_storage`: in-process implementation with fault injection.
//! - `session_filter`: helpers to build session queries.
//! - `db_entities`: SeaORM entity models for the database backend.

pub mod database_storage;
pub mod db_entities;
pub mod memory_storage;
pub mod session_filter;
pub mod storage_trait;
pub mod types;

pub use database_storage::DatabaseStorage;
pub use memory_storage::{MemoryStorage, StorageOp};
pub use storage_trait::Storage;
pub use types::*;
