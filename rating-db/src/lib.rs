//! SQLite backing store for rating sets.
//!
//! Holds every concrete rating of a specification as one row: header columns
//! (dates, active flag, body kind) plus the gzip-compressed JSON body. Header
//! queries never decompress bodies, which is what lets a lazy rating set
//! index a long history cheaply and fetch tables one at a time.
//!
//! # Architecture
//!
//! - `Arc<Mutex<Connection>>` so one database can back rating sets on several
//!   threads
//! - In-memory (`Database::new`) or file-backed (`Database::open`) SQLite via
//!   `rusqlite`
//! - Implements [`rating_core::RatingStore`]; a session holds the connection
//!   lock until it is dropped
//! - Typed query methods returning serializable structs from [`models`]
//!
//! # Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use rating_core::{LoadMode, RatingSet, RatingStore};
//! use rating_db::Database;
//!
//! let db = Database::new().unwrap();
//! db.store_ratings_text(r#"{
//!   "spec": {"office_id": "SWT", "location_id": "KEYS", "template_id": "Stage;Flow.Linear",
//!            "version": "Production"},
//!   "ratings": [{"office_id": "SWT", "spec_id": "KEYS.Stage;Flow.Linear.Production",
//!                "effective_date": "2020-01-01T00:00:00Z", "create_date": "2020-01-01T00:00:00Z",
//!                "body": {"type": "table", "values": [{"ind": 0, "dep": 0}, {"ind": 10, "dep": 20}]}}]
//! }"#, false, false).unwrap();
//!
//! let store: Arc<dyn RatingStore> = Arc::new(db.clone());
//! let set = RatingSet::from_store(store, "SWT", "KEYS.Stage;Flow.Linear.Production", LoadMode::Lazy, None).unwrap();
//! let t = rating_utils::times::parse_time("2021-01-01").unwrap();
//! assert_eq!(set.rate_one(t, &[5.0]).unwrap(), Some(10.0));
//! ```
//!
//! # Tables
//!
//! See [`schema::create_schema`] for the full SQL schema.

pub mod schema;
mod loader;
mod queries;
pub mod models;

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;
use rating_core::{RatingError, RatingStore, StoreSession};
use rusqlite::Connection;

/// SQLite rating store.
///
/// Cheaply cloneable; clones share one connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Create a new in-memory database with the full schema applied.
    pub fn new() -> anyhow::Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Open (or create) a database file and apply the schema.
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        debug!("opening rating database {}", path.display());
        Self::from_connection(Connection::open(path)?)
    }

    fn from_connection(conn: Connection) -> anyhow::Result<Self> {
        conn.execute_batch(schema::create_schema())?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("rating database connection lock poisoned"))
    }
}

/// A checked-out connection. Dropping it releases the lock.
struct DbSession<'a> {
    conn: MutexGuard<'a, Connection>,
}

impl Drop for DbSession<'_> {
    fn drop(&mut self) {
        debug!("rating database session released");
    }
}

impl StoreSession for DbSession<'_> {
    fn fetch_ratings_text(
        &self,
        spec_id: &str,
        office_id: &str,
        from: Option<i64>,
        to: Option<i64>,
        as_of: Option<i64>,
    ) -> rating_core::Result<String> {
        queries::ratings_text(&self.conn, spec_id, office_id, from, to, as_of).map_err(RatingError::store)
    }

    fn fetch_rating_headers(&self, spec_id: &str, office_id: &str, as_of: Option<i64>) -> rating_core::Result<String> {
        queries::headers_text(&self.conn, spec_id, office_id, as_of).map_err(RatingError::store)
    }

    fn store_ratings_text(&self, text: &str, overwrite: bool, replace_base: bool) -> rating_core::Result<()> {
        loader::store_text(&self.conn, text, overwrite, replace_base)
            .map(|_| ())
            .map_err(RatingError::store)
    }
}

impl RatingStore for Database {
    fn connect(&self) -> rating_core::Result<Box<dyn StoreSession + '_>> {
        let conn = self.conn.lock().map_err(|_| RatingError::Poisoned)?;
        debug!("rating database session opened");
        Ok(Box::new(DbSession { conn }))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use rating_core::{ConcreteRating, RatingBody, RatingSetContainer, RatingSpec, RatingTable, TableRating};

    pub const SPEC_ID: &str = "KEYS.Stage;Flow.Linear.Production";

    pub fn spec() -> RatingSpec {
        RatingSpec::new("SWT", "KEYS", "Stage;Flow.Linear", "Production")
    }

    /// Y = scale * X over [0, 1000], created at `create_date`.
    pub fn scaled(effective_date: i64, create_date: i64, scale: f64) -> ConcreteRating {
        let table = RatingTable::from_pairs(&[(0.0, 0.0), (1000.0, 1000.0 * scale)]).unwrap();
        ConcreteRating::for_spec(&spec(), effective_date, create_date, RatingBody::Table(TableRating::new(table)))
    }

    pub fn text(ratings: &[ConcreteRating]) -> String {
        let mut container = RatingSetContainer::new(spec());
        container.ratings = ratings.iter().map(|r| r.to_container().unwrap()).collect();
        container.to_json().unwrap()
    }
}
