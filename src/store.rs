//! Persisted scanner state.
//!
//! The logical layout is `StoredData`; SQLite keeps it as one JSON value per
//! top-level key so a partial save only rewrites the keys it carries.

use crate::error::StorageError;
use crate::models::{StoragePatch, StoredData};
use rusqlite::{params, Connection};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Mutex;

pub trait Store {
    fn load(&self) -> Result<StoredData, StorageError>;

    /// Merge `patch` into the stored state; absent fields are left alone.
    fn save(&self, patch: StoragePatch) -> Result<(), StorageError>;
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T, StorageError>) -> Result<T, StorageError> {
        let mut conn = match self.conn.lock() {
            Ok(c) => c,
            Err(_) => return Err(StorageError::Unavailable("database lock poisoned".into())),
        };
        f(&mut conn)
    }
}

/// Check one stored key against the layout on its own, so a single bad
/// value falls back to its default instead of failing the whole load.
fn check_key(key: &str, value: &Value) -> Result<(), serde_json::Error> {
    let mut single = Map::new();
    single.insert(key.to_string(), value.clone());
    serde_json::from_value::<StoredData>(Value::Object(single)).map(|_| ())
}

impl Store for SqliteStore {
    fn load(&self) -> Result<StoredData, StorageError> {
        let map = self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT key, value FROM kv")?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

            let mut map = Map::new();
            for row in rows {
                let (key, raw) = row?;
                match serde_json::from_str::<Value>(&raw).and_then(|value| check_key(&key, &value).map(|()| value)) {
                    Ok(value) => {
                        map.insert(key, value);
                    }
                    Err(e) => log::warn!("dropping unreadable stored value for {}: {}", key, e),
                }
            }
            Ok(map)
        })?;
        Ok(serde_json::from_value(Value::Object(map))?)
    }

    fn save(&self, patch: StoragePatch) -> Result<(), StorageError> {
        let fields = match serde_json::to_value(&patch)? {
            Value::Object(fields) => fields,
            _ => return Err(StorageError::Unavailable("patch did not serialize to an object".into())),
        };

        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            for (key, value) in fields.iter().filter(|(_, v)| !v.is_null()) {
                tx.execute(
                    "INSERT INTO kv (key, value) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    params![key, serde_json::to_string(value)?],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }
}
