//! Generic repository contract and SQLite implementation.
//!
//! # Responsibility
//! - Provide CRUD plus bulk foreign-key-nulling over any `Entity`.
//! - Keep dynamic SQL assembly behind validated descriptor identifiers.
//!
//! # Invariants
//! - Write paths call `Entity::validate()` before SQL mutations.
//! - Every write runs inside a scoped IMMEDIATE transaction; failure paths
//!   unwind through `?` and the guard rolls back on drop.
//! - Table and column names interpolated into SQL must pass
//!   `ensure_valid_identifier` first; values are always bound parameters.

use crate::db::DbError;
use crate::entity::{Entity, FromRowError, ValidationError};
use log::info;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::{ToSql, ToSqlOutput, Value};
use rusqlite::{params, params_from_iter, Connection, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::marker::PhantomData;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid"));

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error taxonomy.
///
/// "Absent" outcomes are expressed as `Ok(None)` / `Ok(false)` by the
/// operations themselves; every variant here is a genuine failure.
#[derive(Debug)]
pub enum RepoError {
    Validation(ValidationError),
    Db(DbError),
    NotFound { entity: &'static str, id: String },
    InvalidData(String),
    MissingTable(&'static str),
    MissingColumn { table: &'static str, column: String },
    InvalidIdentifier { table: &'static str, name: String },
}

impl RepoError {
    fn not_found<T: Entity>(id: &T::Id) -> Self {
        Self::NotFound {
            entity: T::table_name(),
            id: id.to_string(),
        }
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid entity data: {message}"),
            Self::MissingTable(table) => write!(f, "required table `{table}` does not exist"),
            Self::MissingColumn { table, column } => {
                write!(f, "table `{table}` has no column `{column}`")
            }
            Self::InvalidIdentifier { table, name } => {
                write!(f, "descriptor for `{table}` declares invalid identifier `{name}`")
            }
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for RepoError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<FromRowError> for RepoError {
    fn from(value: FromRowError) -> Self {
        match value {
            FromRowError::Sqlite(err) => Self::Db(DbError::Sqlite(err)),
            FromRowError::Invalid(message) => Self::InvalidData(message),
        }
    }
}

/// Pagination options for listing entities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListQuery {
    /// Maximum rows to return; `None` means unbounded.
    pub limit: Option<u32>,
    /// Number of rows to skip.
    pub offset: u32,
}

/// Generic repository interface over one entity type.
pub trait Repository<T: Entity> {
    /// Gets one entity by id; `Ok(None)` when absent.
    fn find_one(&self, id: &T::Id) -> RepoResult<Option<T>>;
    /// Returns every stored entity, ordered by id ascending.
    fn find_all(&self) -> RepoResult<Vec<T>>;
    /// Lists entities with limit/offset pagination, ordered by id ascending.
    fn list(&self, query: &ListQuery) -> RepoResult<Vec<T>>;
    /// Inserts a transient entity (assigning its rowid-derived id) or
    /// upserts an identified one.
    fn save(&self, entity: T) -> RepoResult<T>;
    /// Merges the entity's attributes into its stored row.
    fn update(&self, entity: &T) -> RepoResult<()>;
    /// Deletes the entity's row; `NotFound` when it is already gone.
    fn delete(&self, entity: &T) -> RepoResult<()>;
    /// Looks up by id, then deletes. Missing ids are a defined no-op
    /// returning `Ok(false)`.
    fn delete_by_id(&self, id: &T::Id) -> RepoResult<bool>;
    /// Counts stored entities.
    fn count(&self) -> RepoResult<u64>;
    /// Returns whether a row with the given id exists.
    fn exists(&self, id: &T::Id) -> RepoResult<bool>;
    /// Nulls `fk_column` on every row of `O` whose `fk_column` equals `id`,
    /// returning the affected-row count.
    ///
    /// The column must be declared by `O`'s descriptor; the id value is
    /// always a bound parameter.
    fn on_delete_set_null<O: Entity>(&self, fk_column: &str, id: &T::Id) -> RepoResult<usize>;
}

/// SQLite-backed generic repository.
pub struct SqliteRepository<'conn, T: Entity> {
    conn: &'conn Connection,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> std::fmt::Debug for SqliteRepository<'_, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteRepository")
            .field("table", &T::table_name())
            .finish_non_exhaustive()
    }
}

impl<'conn, T: Entity> SqliteRepository<'conn, T> {
    /// Constructs a repository after checking the descriptor against the
    /// live schema.
    ///
    /// # Errors
    /// - `InvalidIdentifier` when the descriptor declares a name unusable
    ///   in SQL.
    /// - `MissingTable` / `MissingColumn` when the schema does not carry
    ///   the declared mapping.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_valid_descriptor::<T>()?;
        ensure_entity_schema::<T>(conn)?;
        Ok(Self {
            conn,
            _entity: PhantomData,
        })
    }

    fn immediate_tx(&self) -> RepoResult<Transaction<'conn>> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        Ok(tx)
    }
}

impl<T: Entity> Repository<T> for SqliteRepository<'_, T> {
    fn find_one(&self, id: &T::Id) -> RepoResult<Option<T>> {
        let sql = format!(
            "{} WHERE {} = ?1;",
            build_select_sql(T::table_name(), T::id_column(), T::data_columns()),
            T::id_column()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params![id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(T::from_row(row)?));
        }
        Ok(None)
    }

    fn find_all(&self) -> RepoResult<Vec<T>> {
        self.list(&ListQuery::default())
    }

    fn list(&self, query: &ListQuery) -> RepoResult<Vec<T>> {
        let mut sql = format!(
            "{} ORDER BY {} ASC",
            build_select_sql(T::table_name(), T::id_column(), T::data_columns()),
            T::id_column()
        );
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            bind_values.push(Value::Integer(i64::from(limit)));
            if query.offset > 0 {
                sql.push_str(" OFFSET ?");
                bind_values.push(Value::Integer(i64::from(query.offset)));
            }
        } else if query.offset > 0 {
            sql.push_str(" LIMIT -1 OFFSET ?");
            bind_values.push(Value::Integer(i64::from(query.offset)));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut entities = Vec::new();
        while let Some(row) = rows.next()? {
            entities.push(T::from_row(row)?);
        }
        Ok(entities)
    }

    fn save(&self, mut entity: T) -> RepoResult<T> {
        entity.validate()?;

        let tx = self.immediate_tx()?;
        match entity.id() {
            Some(id) => {
                let sql = build_upsert_sql(T::table_name(), T::id_column(), T::data_columns());
                let mut values = Vec::with_capacity(T::data_columns().len() + 1);
                values.push(owned_value(&id)?);
                values.extend(entity.data_values());
                tx.execute(&sql, params_from_iter(values))?;
            }
            None => {
                let sql = build_insert_sql(T::table_name(), T::data_columns());
                tx.execute(&sql, params_from_iter(entity.data_values()))?;
                entity.assign_rowid(tx.last_insert_rowid());
            }
        }
        tx.commit()?;
        Ok(entity)
    }

    fn update(&self, entity: &T) -> RepoResult<()> {
        entity.validate()?;
        let id = entity.id().ok_or_else(|| {
            RepoError::InvalidData("cannot update an entity without an identifier".to_string())
        })?;

        let tx = self.immediate_tx()?;
        let changed = if T::data_columns().is_empty() {
            // Id-only tables carry nothing to merge; presence is success.
            usize::from(id_exists_in_tx(&tx, T::table_name(), T::id_column(), &id)?)
        } else {
            let sql = build_update_sql(T::table_name(), T::id_column(), T::data_columns());
            let mut values = entity.data_values();
            values.push(owned_value(&id)?);
            tx.execute(&sql, params_from_iter(values))?
        };

        if changed == 0 {
            return Err(RepoError::not_found::<T>(&id));
        }
        tx.commit()?;
        Ok(())
    }

    fn delete(&self, entity: &T) -> RepoResult<()> {
        let id = entity.id().ok_or_else(|| {
            RepoError::InvalidData("cannot delete an entity without an identifier".to_string())
        })?;

        let tx = self.immediate_tx()?;
        let changed = tx.execute(
            &format!(
                "DELETE FROM {} WHERE {} = ?1;",
                T::table_name(),
                T::id_column()
            ),
            params![id],
        )?;
        if changed == 0 {
            return Err(RepoError::not_found::<T>(&id));
        }
        tx.commit()?;
        Ok(())
    }

    fn delete_by_id(&self, id: &T::Id) -> RepoResult<bool> {
        match self.find_one(id)? {
            Some(entity) => {
                self.delete(&entity)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn count(&self) -> RepoResult<u64> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {};", T::table_name()),
            [],
            |row| row.get(0),
        )?;
        u64::try_from(count).map_err(|_| {
            RepoError::InvalidData(format!("negative row count {count} for {}", T::table_name()))
        })
    }

    fn exists(&self, id: &T::Id) -> RepoResult<bool> {
        let exists: i64 = self.conn.query_row(
            &format!(
                "SELECT EXISTS(SELECT 1 FROM {} WHERE {} = ?1);",
                T::table_name(),
                T::id_column()
            ),
            params![id],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    fn on_delete_set_null<O: Entity>(&self, fk_column: &str, id: &T::Id) -> RepoResult<usize> {
        ensure_valid_identifier(O::table_name(), O::table_name())?;
        ensure_valid_identifier(O::table_name(), fk_column)?;
        if !O::data_columns().iter().any(|column| *column == fk_column) {
            return Err(RepoError::MissingColumn {
                table: O::table_name(),
                column: fk_column.to_string(),
            });
        }

        let tx = self.immediate_tx()?;
        let changed = tx.execute(
            &format!(
                "UPDATE {} SET {fk_column} = NULL WHERE {fk_column} = ?1;",
                O::table_name()
            ),
            params![id],
        )?;
        tx.commit()?;

        info!(
            "event=fk_set_null module=repo status=ok table={} column={} rows={}",
            O::table_name(),
            fk_column,
            changed
        );
        Ok(changed)
    }
}

fn owned_value(value: &dyn ToSql) -> RepoResult<Value> {
    match value.to_sql()? {
        ToSqlOutput::Borrowed(value_ref) => Ok(value_ref.into()),
        ToSqlOutput::Owned(value) => Ok(value),
        _ => Err(RepoError::InvalidData(
            "unsupported identifier binding".to_string(),
        )),
    }
}

fn id_exists_in_tx(
    tx: &Transaction<'_>,
    table: &str,
    id_column: &str,
    id: &dyn ToSql,
) -> RepoResult<bool> {
    let exists: i64 = tx.query_row(
        &format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE {id_column} = ?1);"),
        params![id],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn build_select_sql(table: &str, id_column: &str, data_columns: &[&str]) -> String {
    let mut columns = String::from(id_column);
    for column in data_columns {
        columns.push_str(", ");
        columns.push_str(column);
    }
    format!("SELECT {columns} FROM {table}")
}

fn build_insert_sql(table: &str, data_columns: &[&str]) -> String {
    if data_columns.is_empty() {
        return format!("INSERT INTO {table} DEFAULT VALUES;");
    }
    let placeholders = numbered_placeholders(1, data_columns.len());
    format!(
        "INSERT INTO {table} ({}) VALUES ({placeholders});",
        data_columns.join(", ")
    )
}

fn build_upsert_sql(table: &str, id_column: &str, data_columns: &[&str]) -> String {
    let mut columns = String::from(id_column);
    for column in data_columns {
        columns.push_str(", ");
        columns.push_str(column);
    }
    let placeholders = numbered_placeholders(1, data_columns.len() + 1);

    if data_columns.is_empty() {
        return format!(
            "INSERT INTO {table} ({columns}) VALUES ({placeholders})
             ON CONFLICT({id_column}) DO NOTHING;"
        );
    }

    let assignments = data_columns
        .iter()
        .map(|column| format!("{column} = excluded.{column}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {table} ({columns}) VALUES ({placeholders})
         ON CONFLICT({id_column}) DO UPDATE SET {assignments};"
    )
}

fn build_update_sql(table: &str, id_column: &str, data_columns: &[&str]) -> String {
    let assignments = data_columns
        .iter()
        .enumerate()
        .map(|(index, column)| format!("{column} = ?{}", index + 1))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE {table} SET {assignments} WHERE {id_column} = ?{};",
        data_columns.len() + 1
    )
}

fn numbered_placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|index| format!("?{index}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn ensure_valid_descriptor<T: Entity>() -> RepoResult<()> {
    ensure_valid_identifier(T::table_name(), T::table_name())?;
    ensure_valid_identifier(T::table_name(), T::id_column())?;
    for column in T::data_columns() {
        ensure_valid_identifier(T::table_name(), column)?;
        if *column == T::id_column() {
            return Err(RepoError::InvalidIdentifier {
                table: T::table_name(),
                name: (*column).to_string(),
            });
        }
    }
    Ok(())
}

fn ensure_valid_identifier(table: &'static str, name: &str) -> RepoResult<()> {
    if IDENTIFIER.is_match(name) {
        return Ok(());
    }
    Err(RepoError::InvalidIdentifier {
        table,
        name: name.to_string(),
    })
}

fn ensure_entity_schema<T: Entity>(conn: &Connection) -> RepoResult<()> {
    if !table_exists(conn, T::table_name())? {
        return Err(RepoError::MissingTable(T::table_name()));
    }
    if !table_has_column(conn, T::table_name(), T::id_column())? {
        return Err(RepoError::MissingColumn {
            table: T::table_name(),
            column: T::id_column().to_string(),
        });
    }
    for column in T::data_columns() {
        if !table_has_column(conn, T::table_name(), column)? {
            return Err(RepoError::MissingColumn {
                table: T::table_name(),
                column: (*column).to_string(),
            });
        }
    }
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> RepoResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}
