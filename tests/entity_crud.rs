use rowstore::{
    open_db_in_memory, Entity, FromRowError, ListQuery, RepoError, Repository, SqliteRepository,
    ValidationError,
};
use rusqlite::types::Value;
use rusqlite::{Connection, Row};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Person {
    id: Option<i64>,
    name: String,
    age: i64,
}

impl Person {
    fn new(name: &str, age: i64) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            age,
        }
    }
}

impl Entity for Person {
    type Id = i64;

    fn table_name() -> &'static str {
        "person"
    }

    fn id_column() -> &'static str {
        "id"
    }

    fn data_columns() -> &'static [&'static str] {
        &["name", "age"]
    }

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn data_values(&self) -> Vec<Value> {
        vec![self.name.clone().into(), self.age.into()]
    }

    fn from_row(row: &Row<'_>) -> Result<Self, FromRowError> {
        let age: i64 = row.get("age")?;
        if age < 0 {
            return Err(FromRowError::invalid(format!(
                "negative age {age} in person.age"
            )));
        }
        Ok(Self {
            id: Some(row.get("id")?),
            name: row.get("name")?,
            age,
        })
    }

    fn assign_rowid(&mut self, rowid: i64) {
        self.id = Some(rowid);
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::new("name cannot be empty"));
        }
        Ok(())
    }
}

fn setup_conn() -> Connection {
    let conn = open_db_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE person (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            age INTEGER NOT NULL
        );",
    )
    .unwrap();
    conn
}

#[test]
fn save_transient_entity_assigns_id() {
    let conn = setup_conn();
    let repo = SqliteRepository::<Person>::try_new(&conn).unwrap();

    let saved = repo.save(Person::new("ada", 36)).unwrap();
    let id = saved.id.expect("save should assign an id");

    let loaded = repo.find_one(&id).unwrap().unwrap();
    assert_eq!(loaded, saved);
}

#[test]
fn save_with_id_upserts_instead_of_duplicating() {
    let conn = setup_conn();
    let repo = SqliteRepository::<Person>::try_new(&conn).unwrap();

    let saved = repo.save(Person::new("grace", 45)).unwrap();
    let mut replacement = saved.clone();
    replacement.age = 46;

    let merged = repo.save(replacement).unwrap();
    assert_eq!(merged.id, saved.id);
    assert_eq!(repo.count().unwrap(), 1);

    let loaded = repo.find_one(&saved.id.unwrap()).unwrap().unwrap();
    assert_eq!(loaded.age, 46);
}

#[test]
fn find_one_absent_returns_none() {
    let conn = setup_conn();
    let repo = SqliteRepository::<Person>::try_new(&conn).unwrap();

    assert_eq!(repo.find_one(&999).unwrap(), None);
}

#[test]
fn find_all_returns_every_row_ordered_by_id() {
    let conn = setup_conn();
    let repo = SqliteRepository::<Person>::try_new(&conn).unwrap();

    assert!(repo.find_all().unwrap().is_empty());

    let first = repo.save(Person::new("ada", 36)).unwrap();
    let second = repo.save(Person::new("grace", 45)).unwrap();
    let third = repo.save(Person::new("edsger", 40)).unwrap();

    let all = repo.find_all().unwrap();
    assert_eq!(
        all.iter().map(|person| person.id).collect::<Vec<_>>(),
        vec![first.id, second.id, third.id]
    );
}

#[test]
fn list_applies_limit_and_offset() {
    let conn = setup_conn();
    let repo = SqliteRepository::<Person>::try_new(&conn).unwrap();

    for index in 0..5 {
        repo.save(Person::new(&format!("p{index}"), 20 + index))
            .unwrap();
    }

    let page = repo
        .list(&ListQuery {
            limit: Some(2),
            offset: 1,
        })
        .unwrap();
    assert_eq!(
        page.iter()
            .map(|person| person.name.as_str())
            .collect::<Vec<_>>(),
        vec!["p1", "p2"]
    );

    let offset_only = repo
        .list(&ListQuery {
            limit: None,
            offset: 3,
        })
        .unwrap();
    assert_eq!(offset_only.len(), 2);
}

#[test]
fn update_merges_attributes_into_stored_row() {
    let conn = setup_conn();
    let repo = SqliteRepository::<Person>::try_new(&conn).unwrap();

    let mut person = repo.save(Person::new("ada", 36)).unwrap();
    person.name = "ada lovelace".to_string();
    person.age = 37;
    repo.update(&person).unwrap();

    let loaded = repo.find_one(&person.id.unwrap()).unwrap().unwrap();
    assert_eq!(loaded.name, "ada lovelace");
    assert_eq!(loaded.age, 37);
}

#[test]
fn update_of_absent_row_returns_not_found() {
    let conn = setup_conn();
    let repo = SqliteRepository::<Person>::try_new(&conn).unwrap();

    let mut phantom = Person::new("nobody", 1);
    phantom.id = Some(404);

    let err = repo.update(&phantom).unwrap_err();
    assert!(matches!(
        err,
        RepoError::NotFound { entity: "person", ref id } if id == "404"
    ));
}

#[test]
fn update_without_id_is_rejected() {
    let conn = setup_conn();
    let repo = SqliteRepository::<Person>::try_new(&conn).unwrap();

    let err = repo.update(&Person::new("transient", 5)).unwrap_err();
    assert!(matches!(err, RepoError::InvalidData(_)));
}

#[test]
fn delete_removes_row_and_is_visible_to_find_one() {
    let conn = setup_conn();
    let repo = SqliteRepository::<Person>::try_new(&conn).unwrap();

    let person = repo.save(Person::new("ada", 36)).unwrap();
    repo.delete(&person).unwrap();

    assert_eq!(repo.find_one(&person.id.unwrap()).unwrap(), None);

    let err = repo.delete(&person).unwrap_err();
    assert!(matches!(err, RepoError::NotFound { .. }));
}

#[test]
fn delete_by_id_of_missing_row_is_a_defined_no_op() {
    let conn = setup_conn();
    let repo = SqliteRepository::<Person>::try_new(&conn).unwrap();

    assert!(!repo.delete_by_id(&12345).unwrap());

    let person = repo.save(Person::new("ada", 36)).unwrap();
    assert!(repo.delete_by_id(&person.id.unwrap()).unwrap());
    assert_eq!(repo.count().unwrap(), 0);
}

#[test]
fn count_and_exists_track_stored_rows() {
    let conn = setup_conn();
    let repo = SqliteRepository::<Person>::try_new(&conn).unwrap();

    assert_eq!(repo.count().unwrap(), 0);
    let person = repo.save(Person::new("ada", 36)).unwrap();
    assert_eq!(repo.count().unwrap(), 1);
    assert!(repo.exists(&person.id.unwrap()).unwrap());
    assert!(!repo.exists(&999).unwrap());
}

#[test]
fn validation_blocks_writes_before_any_mutation() {
    let conn = setup_conn();
    let repo = SqliteRepository::<Person>::try_new(&conn).unwrap();

    let err = repo.save(Person::new("   ", 30)).unwrap_err();
    assert!(matches!(err, RepoError::Validation(_)));
    assert_eq!(repo.count().unwrap(), 0);

    let mut existing = repo.save(Person::new("ada", 36)).unwrap();
    existing.name = String::new();
    let err = repo.update(&existing).unwrap_err();
    assert!(matches!(err, RepoError::Validation(_)));

    let loaded = repo.find_one(&existing.id.unwrap()).unwrap().unwrap();
    assert_eq!(loaded.name, "ada");
}

#[test]
fn invalid_persisted_data_surfaces_as_error_not_absence() {
    let conn = setup_conn();
    let repo = SqliteRepository::<Person>::try_new(&conn).unwrap();

    conn.execute(
        "INSERT INTO person (id, name, age) VALUES (1, 'corrupt', -5);",
        [],
    )
    .unwrap();

    let err = repo.find_one(&1).unwrap_err();
    assert!(matches!(err, RepoError::InvalidData(_)));
}

#[test]
fn try_new_rejects_missing_table_and_column() {
    let conn = open_db_in_memory().unwrap();
    let err = SqliteRepository::<Person>::try_new(&conn).unwrap_err();
    assert!(matches!(err, RepoError::MissingTable("person")));

    conn.execute_batch("CREATE TABLE person (id INTEGER PRIMARY KEY, name TEXT NOT NULL);")
        .unwrap();
    let err = SqliteRepository::<Person>::try_new(&conn).unwrap_err();
    assert!(matches!(
        err,
        RepoError::MissingColumn { table: "person", ref column } if column == "age"
    ));
}

#[test]
fn repository_debug_names_the_bound_table() {
    let conn = setup_conn();
    let repo = SqliteRepository::<Person>::try_new(&conn);

    let rendered = format!("{repo:?}");
    assert!(rendered.contains("SqliteRepository"));
    assert!(rendered.contains("person"));
}

#[test]
fn failed_write_rolls_back_and_connection_stays_usable() {
    let conn = setup_conn();
    let repo = SqliteRepository::<Person>::try_new(&conn).unwrap();

    let saved = repo.save(Person::new("ada", 36)).unwrap();

    let mut phantom = Person::new("nobody", 1);
    phantom.id = Some(404);
    repo.update(&phantom).unwrap_err();

    // The failed write's transaction must be released: later writes on the
    // same connection succeed and see unchanged state.
    let loaded = repo.find_one(&saved.id.unwrap()).unwrap().unwrap();
    assert_eq!(loaded, saved);

    let next = repo.save(Person::new("grace", 45)).unwrap();
    assert!(next.id.is_some());
    assert_eq!(repo.count().unwrap(), 2);
}

#[derive(Debug)]
struct BadDescriptor;

impl Entity for BadDescriptor {
    type Id = i64;

    fn table_name() -> &'static str {
        "bad"
    }

    fn id_column() -> &'static str {
        "id"
    }

    fn data_columns() -> &'static [&'static str] {
        &["name; DROP TABLE person"]
    }

    fn id(&self) -> Option<i64> {
        None
    }

    fn data_values(&self) -> Vec<Value> {
        Vec::new()
    }

    fn from_row(_row: &Row<'_>) -> Result<Self, FromRowError> {
        Err(FromRowError::invalid("bad descriptor is never decoded"))
    }
}

#[test]
fn try_new_rejects_descriptor_with_unsafe_identifier() {
    let conn = open_db_in_memory().unwrap();
    let err = SqliteRepository::<BadDescriptor>::try_new(&conn).unwrap_err();
    assert!(matches!(err, RepoError::InvalidIdentifier { table: "bad", .. }));
}
