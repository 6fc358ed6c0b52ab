//! Generic SQLite-backed entity repository.
//!
//! Consumers describe their record types through the [`Entity`] trait and
//! get find-one/find-all/save/update/delete plus bulk foreign-key cleanup
//! through [`SqliteRepository`]. Schema creation and migration stay with
//! the consumer; this crate only validates declared mappings and runs each
//! write inside its own scoped transaction.

pub mod db;
pub mod entity;
pub mod logging;
pub mod repo;

pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use entity::{Entity, FromRowError, ValidationError};
pub use logging::{default_log_level, init_logging, logging_status};
pub use repo::entity_repo::{ListQuery, RepoError, RepoResult, Repository, SqliteRepository};

/// Returns the crate version.
pub fn crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
