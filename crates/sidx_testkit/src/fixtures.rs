//! Test fixtures and database helpers.
//!
//! Provides convenience functions for setting up test databases
//! and common schemas.

use sidx_core::{Config, Database, PropertyType};
use sidx_core::{Document, Property, Value};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A test database with automatic cleanup.
pub struct TestDatabase {
    /// The database instance.
    pub db: Database,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestDatabase {
    /// Creates a new in-memory test database.
    pub fn memory() -> Self {
        Self::memory_with(Config::default())
    }

    /// Creates an in-memory test database with a custom configuration.
    pub fn memory_with(config: Config) -> Self {
        Self {
            db: Database::open_in_memory(config).expect("Failed to open in-memory database"),
            temp_dir: None,
        }
    }

    /// Creates a new directory-backed test database.
    pub fn file() -> Self {
        Self::file_with(Config::default().sync_on_write(false))
    }

    /// Creates a directory-backed test database with a custom configuration.
    pub fn file_with(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::open(&temp_dir.path().join("db"), config)
            .expect("Failed to open directory database");
        Self {
            db,
            temp_dir: Some(temp_dir),
        }
    }

    /// Returns the database directory if directory-backed.
    pub fn path(&self) -> Option<PathBuf> {
        self.temp_dir.as_ref().map(|d| d.path().join("db"))
    }

    /// Closes the database and opens the same directory again.
    ///
    /// # Panics
    ///
    /// Panics for in-memory databases.
    pub fn reopen(self) -> Self {
        let path = self.path().expect("Only directory databases can be reopened");
        let config = self.db.config().clone();
        let Self { db, temp_dir } = self;
        db.close().expect("Failed to close database");
        drop(db);
        Self {
            db: Database::open(&path, config).expect("Failed to reopen database"),
            temp_dir,
        }
    }

    /// Drops the database without a final checkpoint, as a crash would.
    ///
    /// Returns the directory so a test can tamper with it before reopening.
    pub fn crash(self) -> (TempDir, PathBuf) {
        let path = self.path().expect("Only directory databases can crash");
        let Self { db, temp_dir } = self;
        db.abandon();
        drop(db);
        (temp_dir.expect("directory database"), path)
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with a temporary in-memory database.
///
/// # Example
///
/// ```rust,ignore
/// use sidx_testkit::with_temp_db;
///
/// #[test]
/// fn my_test() {
///     with_temp_db(|db| {
///         db.schema().create_class("C", &[]).unwrap();
///     });
/// }
/// ```
pub fn with_temp_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database) -> R,
{
    let test_db = TestDatabase::memory();
    f(&test_db.db)
}

/// Runs a test with a temporary directory-backed database.
pub fn with_file_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database, &Path) -> R,
{
    let test_db = TestDatabase::file();
    let path = test_db.path().expect("File database should have a path");
    f(&test_db.db, &path)
}

/// Common schemas and documents.
pub mod scenarios {
    use super::*;

    /// Name of the class created by [`define_items`].
    pub const ITEM: &str = "Item";

    /// Declares `Item { x: INTEGER, name: STRING, tags: EMBEDDEDLIST<INTEGER> }`.
    pub fn define_items(db: &Database) {
        let schema = db.schema();
        schema.create_class(ITEM, &[]).expect("create class");
        schema
            .create_property(ITEM, Property::new("x", PropertyType::Integer))
            .expect("create x");
        schema
            .create_property(ITEM, Property::new("name", PropertyType::String))
            .expect("create name");
        schema
            .create_property(
                ITEM,
                Property::new("tags", PropertyType::EmbeddedList)
                    .with_linked_type(PropertyType::Integer),
            )
            .expect("create tags");
    }

    /// Builds an `Item` document.
    pub fn item(x: i64, tags: &[i64]) -> Document {
        Document::new(ITEM)
            .with("x", x)
            .with("tags", Value::list(tags.iter().copied()))
    }

    /// Declares `Animal` with subclasses `Cat`
    /// and `Dog`, all sharing `name: STRING`.
    pub fn define_animals(db: &Database) {
        let schema = db.schema();
        schema.create_class("Animal", &[]).expect("create Animal");
        schema
            .create_property("Animal", Property::new("name", PropertyType::String))
            .expect("create name");
        schema.create_class("Cat", &["Animal"]).expect("create Cat");
        schema.create_class("Dog", &["Animal"]).expect("create Dog");
    }

    /// Creates an in-memory database holding `count` items with distinct `x`.
    pub fn populated_database(count: usize) -> TestDatabase {
        let test_db = TestDatabase::memory();
        define_items(&test_db);
        for i in 0..count as i64 {
            test_db
                .insert(item(i, &[i % 7, i % 11]))
                .expect("Failed to insert item");
        }
        test_db
    }
}
