//! Repository layer.
//!
//! # Responsibility
//! - Define the generic data-access contract over `Entity` descriptors.
//! - Isolate SQLite query details from consuming code.
//!
//! # Invariants
//! - Repository writes enforce `Entity::validate()` before persistence.
//! - Repository APIs return semantic errors (`NotFound`) in addition to DB
//!   transport errors; no failure is ever swallowed.

pub mod entity_repo;
