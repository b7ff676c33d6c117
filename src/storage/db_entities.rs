//! SeaORM entity models used by the database storage backend.
//!
//! These structs map to the SQLite tables created by `database_storage`:
//! - `sessions`: session lifecycle, location and counters
//! - `memories`: memory items, read when a session is terminated
//!
//! Link, cache, backup and audit tables are only written through raw
//! statements and have no entity.

use sea_orm::entity::prelude::*;

/// Sessions table entity model.
///
/// Timestamps are fixed-precision RFC 3339 strings so ordering by the column
/// is chronological; tags are a JSON array.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "sessions")]
pub struct Model {
    /// UUID as string primary key
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub project_name: String,
    pub project_path: String,
    pub git_repository: Option<String>,
    /// Lowercase status name
    pub status: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub updated_at: String,
    pub last_activity_at: String,
    pub activity_count: i64,
    pub memory_count: i64,
    /// Whole seconds
    pub total_work_time: i64,
    /// JSON array of strings
    pub tags: String,
    pub auto_created: bool,
    pub created_by: String,
    pub description: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Memories table entity models.
pub mod memories {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "memories")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: String,
        pub content: String,
        /// `memory` or `todo`
        pub work_type: String,
        pub session_id: Option<String>,
        pub archived: bool,
        pub created_at: String,
        pub updated_at: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}
