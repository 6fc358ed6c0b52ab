//! Entity descriptor contract.
//!
//! # Responsibility
//! - Describe how a consumer record maps onto one SQLite table.
//! - Own row decode and pre-write validation hooks.
//!
//! # Invariants
//! - `data_columns()` and `data_values()` use the same column order.
//! - `id_column()` is the single identifier column; descriptors never list
//!   it inside `data_columns()`.
//! - Write paths must call `validate()` before SQL mutations.

use rusqlite::types::{FromSql, ToSql, Value};
use rusqlite::Row;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Static table mapping plus per-instance access for one persisted record
/// type.
///
/// The descriptor is explicit by design: the repository never derives table
/// or column names from type names, and never inspects the type at runtime.
/// A minimal integer-keyed implementation looks like:
///
/// ```
/// use rowstore::{Entity, FromRowError};
/// use rusqlite::types::Value;
/// use rusqlite::Row;
///
/// # struct Person {
/// #     id: Option<i64>,
/// #     name: String,
/// #     age: i64,
/// # }
/// #
/// impl Entity for Person {
///     type Id = i64;
///     fn table_name() -> &'static str { "person" }
///     fn id_column() -> &'static str { "id" }
///     fn data_columns() -> &'static [&'static str] { &["name", "age"] }
///     fn id(&self) -> Option<i64> { self.id }
///     fn data_values(&self) -> Vec<Value> {
///         vec![self.name.clone().into(), self.age.into()]
///     }
///     fn from_row(row: &Row<'_>) -> Result<Person, FromRowError> {
///         Ok(Person {
///             id: Some(row.get("id")?),
///             name: row.get("name")?,
///             age: row.get("age")?,
///         })
///     }
///     fn assign_rowid(&mut self, rowid: i64) { self.id = Some(rowid); }
/// }
/// ```
pub trait Entity: Sized {
    /// Identifier value type. `Display` is required for diagnostics only.
    type Id: ToSql + FromSql + Clone + Display;

    /// Table backing this entity.
    fn table_name() -> &'static str;

    /// Identifier column name.
    fn id_column() -> &'static str;

    /// Non-identifier columns, in insert/select order.
    fn data_columns() -> &'static [&'static str];

    /// Current identifier, `None` while the entity is transient.
    fn id(&self) -> Option<Self::Id>;

    /// Column values matching `data_columns()` order.
    fn data_values(&self) -> Vec<Value>;

    /// Decodes one row selected as `id_column()` followed by
    /// `data_columns()`, all addressable by name.
    fn from_row(row: &Row<'_>) -> Result<Self, FromRowError>;

    /// Receives the SQLite rowid after an id-less insert.
    ///
    /// Integer-keyed entities adopt the rowid as their identifier here.
    /// Entities with externally minted ids (uuid strings and the like)
    /// keep the default no-op and must carry an id before `save`.
    fn assign_rowid(&mut self, _rowid: i64) {}

    /// Domain validation hook, called by every repository write path.
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// Failure while decoding a persisted row into an entity value.
#[derive(Debug)]
pub enum FromRowError {
    /// Driver-level read failure.
    Sqlite(rusqlite::Error),
    /// Row content that the entity refuses to accept.
    Invalid(String),
}

impl FromRowError {
    /// Shorthand for rejecting persisted state with a diagnostic message.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}

impl Display for FromRowError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Invalid(message) => write!(f, "invalid persisted row: {message}"),
        }
    }
}

impl Error for FromRowError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<rusqlite::Error> for FromRowError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// Entity-level validation failure raised before any SQL mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "entity validation failed: {}", self.message)
    }
}

impl Error for ValidationError {}

#[cfg(test)]
mod tests {
    use super::{FromRowError, ValidationError};

    #[test]
    fn from_row_error_display_includes_message() {
        let err = FromRowError::invalid("age must be non-negative");
        assert!(err.to_string().contains("age must be non-negative"));
    }

    #[test]
    fn validation_error_display_includes_message() {
        let err = ValidationError::new("name cannot be empty");
        assert!(err.to_string().contains("name cannot be empty"));
        assert_eq!(err.message(), "name cannot be empty");
    }
}
