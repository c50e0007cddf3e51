use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable")]
    Unavailable,
    #[error("storage backend: {0}")]
    Backend(#[from] rusqlite::Error),
    #[error("stored value is not valid JSON: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Where a value lives and how long it survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Follows the user across devices. Settings only.
    Synced,
    /// Survives restarts on this device.
    Local,
    /// Gone when the process ends.
    Session,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Synced => "sync",
            Scope::Local => "local",
            Scope::Session => "session",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub key: String,
    pub value: Value,
}

/// Uniform key/value view over every persistence scope.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;
    fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;
    /// Receives every successful write made through any handle on this scope.
    fn watch(&self) -> Receiver<Change>;
}

#[derive(Default)]
struct Watchers {
    senders: Mutex<Vec<Sender<Change>>>,
}

impl Watchers {
    fn subscribe(&self) -> Receiver<Change> {
        let (tx, rx) = unbounded();
        self.senders.lock().push(tx);
        rx
    }

    fn notify(&self, key: &str, value: &Value) {
        let change = Change {
            key: key.to_string(),
            value: value.clone(),
        };
        self.senders
            .lock()
            .retain(|tx| tx.send(change.clone()).is_ok());
    }
}

#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
    watchers: Watchers,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.values.lock().insert(key.to_string(), value.clone());
        self.watchers.notify(key, &value);
        Ok(())
    }

    fn watch(&self) -> Receiver<Change> {
        self.watchers.subscribe()
    }
}

#[derive(Debug, Default, Clone)]
pub struct Options {
    pub path: Option<PathBuf>,
}

/// SQLite file backing the durable scopes.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    watchers: Arc<Mutex<HashMap<Scope, Arc<Watchers>>>>,
}

impl Database {
    pub fn open(opts: Options) -> Result<Self> {
        let path = if let Some(path) = opts.path {
            path
        } else {
            default_path().context("storage: resolve default path")?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("storage: create directory {}", parent.display()))?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("storage: open database at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("storage: set WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .context("storage: set busy timeout")?;
        migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            watchers: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn scope(&self, scope: Scope) -> SqliteScope {
        let watchers = self.watchers.lock().entry(scope).or_default().clone();
        SqliteScope {
            conn: self.conn.clone(),
            scope,
            watchers,
        }
    }

    pub fn close(self) -> Result<()> {
        let conn = Arc::try_unwrap(self.conn)
            .map_err(|_| anyhow!("storage: connection still in use"))?
            .into_inner();
        conn.close()
            .map_err(|(_, err)| err)
            .context("storage: close connection")
    }
}

pub struct SqliteScope {
    conn: Arc<Mutex<Connection>>,
    scope: Scope,
    watchers: Arc<Watchers>,
}

impl KeyValueStore for SqliteScope {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM kv WHERE scope = ?1 AND key = ?2",
                params![self.scope.as_str(), key],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(&value)?;
        {
            let conn = self.conn.lock();
            conn.execute(
                r#"
INSERT INTO kv (scope, key, value, updated_at)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(scope, key) DO UPDATE SET
  value = excluded.value,
  updated_at = excluded.updated_at
"#,
                params![self.scope.as_str(), key, encoded, unix_now()],
            )?;
        }
        self.watchers.notify(key, &value);
        Ok(())
    }

    fn watch(&self) -> Receiver<Change> {
        self.watchers.subscribe()
    }
}

/// The three scopes the engine reads and writes.
#[derive(Clone)]
pub struct Stores {
    pub synced: Arc<dyn KeyValueStore>,
    pub local: Arc<dyn KeyValueStore>,
    pub session: Arc<dyn KeyValueStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            synced: Arc::new(MemoryStore::new()),
            local: Arc::new(MemoryStore::new()),
            session: Arc::new(MemoryStore::new()),
        }
    }

    pub fn with_database(db: &Database) -> Self {
        Self {
            synced: Arc::new(db.scope(Scope::Synced)),
            local: Arc::new(db.scope(Scope::Local)),
            session: Arc::new(MemoryStore::new()),
        }
    }
}

/// One consumer's handle on a scope. The first backend failure detaches it
/// and the consumer carries on with its in-memory copy.
pub struct Mirror {
    store: Option<Arc<dyn KeyValueStore>>,
    scope: Scope,
}

impl Mirror {
    pub fn new(store: Arc<dyn KeyValueStore>, scope: Scope) -> Self {
        Self {
            store: Some(store),
            scope,
        }
    }

    pub fn detached(scope: Scope) -> Self {
        Self { store: None, scope }
    }

    pub fn is_degraded(&self) -> bool {
        self.store.is_none()
    }

    fn degrade(&mut self, key: &str, err: &StoreError) {
        warn!(scope = self.scope.as_str(), key, error = %err, "store failed; continuing in memory");
        self.store = None;
    }

    /// Missing keys, detached stores and wrongly shaped values all read as
    /// `None`.
    pub fn read<T: DeserializeOwned>(&mut self, key: &str) -> Option<T> {
        let store = self.store.as_ref()?;
        let value = match store.get(key) {
            Ok(value) => value?,
            Err(err) => {
                self.degrade(key, &err);
                return None;
            }
        };
        match serde_json::from_value(value) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                warn!(scope = self.scope.as_str(), key, error = %err, "ignoring malformed stored value");
                None
            }
        }
    }

    pub fn write<T: Serialize>(&mut self, key: &str, value: &T) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        let encoded = match serde_json::to_value(value) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(key, error = %err, "value not serializable; skipped write");
                return;
            }
        };
        if let Err(err) = store.set(key, encoded) {
            self.degrade(key, &err);
        }
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs() as i64
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at INTEGER NOT NULL
)
"#,
        [],
    )?;

    let current: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    for (idx, sql) in migrations().iter().enumerate() {
        let version = (idx + 1) as i64;
        if version <= current {
            continue;
        }
        conn.execute_batch(sql)
            .with_context(|| format!("storage: apply migration {version}"))?;
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![version, unix_now()],
        )?;
    }
    Ok(())
}

fn migrations() -> Vec<&'static str> {
    vec![
        r#"
CREATE TABLE IF NOT EXISTS kv (
  scope TEXT NOT NULL,
  key TEXT NOT NULL,
  value TEXT NOT NULL,
  updated_at INTEGER NOT NULL,
  PRIMARY KEY (scope, key)
);
"#,
    ]
}

pub fn default_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("ezam-lens").join("state.db"))
}
