//! SQLite-backed query store with the toy dataset.
//!
//! The store executes arbitrary query text and returns every column as JSON.
//! Seeding drops and recreates the dataset on each start, so the database is
//! effectively scratch space.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::Connection;
use rusqlite::types::ValueRef;
use serde_json::{Number, Value};
use tracing::{debug, info};

use q2d_core::{QueryStore, Row, StoreError};

/// Schema and seed rows: lights, food, animals, humans, vehicles.
///
/// `human.vehicle_id` and `vehicle.owner_id` reference each other, so humans
/// are inserted without vehicles and linked once vehicles exist.
const SEED_SQL: &str = r#"
PRAGMA foreign_keys = OFF;

DROP TABLE IF EXISTS human;
DROP TABLE IF EXISTS vehicle;
DROP TABLE IF EXISTS animal;
DROP TABLE IF EXISTS food;
DROP TABLE IF EXISTS light;

CREATE TABLE light (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
INSERT INTO light (id, name) VALUES (11, 'light 1'), (12, 'light 2');

CREATE TABLE food (id INTEGER PRIMARY KEY, name TEXT UNIQUE NOT NULL);
INSERT INTO food (id, name) VALUES
  (101, 'pizza'), (102, 'burger'), (103, 'pasta'), (104, 'noodles');

CREATE TABLE animal (
  id INTEGER PRIMARY KEY,
  name TEXT UNIQUE NOT NULL,
  food TEXT NOT NULL,
  color TEXT NOT NULL
);
INSERT INTO animal (id, name, food, color) VALUES
  (8, 'cow', 'grass', 'white'),
  (6, 'deer', 'leaves', 'brown'),
  (7, 'rhino', 'plants', 'grey');

CREATE TABLE human (
  id INTEGER PRIMARY KEY,
  name TEXT NOT NULL,
  age INTEGER NOT NULL,
  gender TEXT NOT NULL,
  fav_food_id INTEGER,
  fav_animal_id INTEGER,
  vehicle_id INTEGER,
  FOREIGN KEY (fav_food_id) REFERENCES food(id),
  FOREIGN KEY (fav_animal_id) REFERENCES animal(id)
);
INSERT INTO human (id, name, age, gender, fav_food_id, fav_animal_id, vehicle_id) VALUES
  (3, 'priya', 20, 'female', 101, 6, NULL),
  (5, 'abi', 21, 'female', 102, 6, NULL),
  (10, 'sana', 22, 'female', 103, 7, NULL),
  (9, 'saro', 23, 'male', 104, 7, NULL);

CREATE TABLE vehicle (
  id INTEGER PRIMARY KEY,
  name TEXT NOT NULL,
  owner_id INTEGER,
  wheel_count INTEGER NOT NULL,
  type TEXT NOT NULL,
  number TEXT UNIQUE NOT NULL,
  FOREIGN KEY (owner_id) REFERENCES human(id)
);
INSERT INTO vehicle (id, name, owner_id, wheel_count, type, number) VALUES
  (2, 'car', 5, 4, 'car', 'TN01AB1234'),
  (1, 'bike', 3, 2, 'bike', 'TN02CB5678'),
  (4, 'bus', 10, 6, 'bus', 'TN03EF9876');

UPDATE human SET vehicle_id = 2 WHERE id = 5;
UPDATE human SET vehicle_id = 1 WHERE id = 3;
UPDATE human SET vehicle_id = 4 WHERE id = 10;
"#;

/// Query store over a single SQLite connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`. `":memory:"` opens a
    /// private in-memory database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = if path == Path::new(":memory:") {
            Connection::open_in_memory()
        } else {
            Connection::open(path)
        }
        .map_err(sql_error)?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(sql_error)?;

        debug!(path = %path.display(), "Opened SQLite store");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open a private in-memory database, already seeded.
    pub fn open_seeded_in_memory() -> Result<Self, StoreError> {
        let store = Self::open(":memory:")?;
        store.seed()?;
        Ok(store)
    }

    /// Drop and recreate the dataset with its seed rows.
    pub fn seed(&self) -> Result<(), StoreError> {
        self.lock().execute_batch(SEED_SQL).map_err(sql_error)?;
        info!("Database initialized and seeded");
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl QueryStore for SqliteStore {
    fn execute(&self, query: &str) -> Result<Vec<Row>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(query).map_err(sql_error)?;

        if stmt.column_count() == 0 {
            let changed = stmt.execute([]).map_err(sql_error)?;
            debug!(changed, "Statement returned no columns");
            return Ok(Vec::new());
        }

        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt.query([]).map_err(sql_error)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(sql_error)? {
            let mut map = Row::new();
            for (idx, name) in columns.iter().enumerate() {
                let value = row.get_ref(idx).map_err(sql_error)?;
                map.insert(name.clone(), json_value(value));
            }
            out.push(map);
        }
        Ok(out)
    }
}

fn json_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(i.into()),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => {
            Value::Array(bytes.iter().map(|b| Value::Number((*b).into())).collect())
        }
    }
}

/// SQLite's own message, with the rusqlite wrapper stripped.
fn sql_error(err: rusqlite::Error) -> StoreError {
    match err {
        rusqlite::Error::SqliteFailure(_, Some(message)) => StoreError::new(message),
        other => StoreError::new(other.to_string()),
    }
}
