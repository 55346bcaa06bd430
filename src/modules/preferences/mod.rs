//! Persisted engine preferences.
//!
//! Keeps the preferred resolver candidate and the cumulative request counter
//! across runs. Failures here are never fatal; callers log and carry on.

use std::path::Path;
use std::sync::{Arc, Mutex};

use redb::{Database, ReadableTable, TableDefinition};
use thiserror::Error;

const STRINGS: TableDefinition<&str, &str> = TableDefinition::new("preferences");
const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");

const PREFERRED_RESOLVER_KEY: &str = "preferred_resolver";
const REQUEST_COUNT_KEY: &str = "request_count";

#[derive(Debug, Error)]
pub enum PreferenceError {
    #[error("preference storage error: {0}")]
    Storage(#[from] redb::Error),
}

fn storage<E: Into<redb::Error>>(err: E) -> PreferenceError {
    PreferenceError::Storage(err.into())
}

/// Storage seam for values that outlive a single run.
pub trait PreferenceStore: Send + Sync {
    fn preferred_resolver(&self) -> Result<Option<String>, PreferenceError>;
    fn set_preferred_resolver(&self, name: &str) -> Result<(), PreferenceError>;
    fn request_count(&self) -> Result<u64, PreferenceError>;
    fn set_request_count(&self, count: u64) -> Result<(), PreferenceError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    preferred_resolver: Option<String>,
    request_count: u64,
}

/// Process-local store, used by default and in tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPreferences {
    inner: Arc<Mutex<MemoryState>>,
}

impl InMemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for InMemoryPreferences {
    fn preferred_resolver(&self) -> Result<Option<String>, PreferenceError> {
        Ok(self
            .inner
            .lock()
            .expect("preferences lock poisoned")
            .preferred_resolver
            .clone())
    }

    fn set_preferred_resolver(&self, name: &str) -> Result<(), PreferenceError> {
        self.inner
            .lock()
            .expect("preferences lock poisoned")
            .preferred_resolver = Some(name.to_string());
        Ok(())
    }

    fn request_count(&self) -> Result<u64, PreferenceError> {
        Ok(self.inner.lock().expect("preferences lock poisoned").request_count)
    }

    fn set_request_count(&self, count: u64) -> Result<(), PreferenceError> {
        self.inner.lock().expect("preferences lock poisoned").request_count = count;
        Ok(())
    }
}

/// File-backed store on top of `redb`.
pub struct RedbPreferences {
    db: Database,
}

impl RedbPreferences {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PreferenceError> {
        let db = Database::create(path.as_ref()).map_err(storage)?;
        let txn = db.begin_write().map_err(storage)?;
        {
            txn.open_table(STRINGS).map_err(storage)?;
            txn.open_table(COUNTERS).map_err(storage)?;
        }
        txn.commit().map_err(storage)?;
        Ok(Self { db })
    }
}

impl PreferenceStore for RedbPreferences {
    fn preferred_resolver(&self) -> Result<Option<String>, PreferenceError> {
        let txn = self.db.begin_read().map_err(storage)?;
        let table = txn.open_table(STRINGS).map_err(storage)?;
        let value = table
            .get(PREFERRED_RESOLVER_KEY)
            .map_err(storage)?
            .map(|guard| guard.value().to_string());
        Ok(value)
    }

    fn set_preferred_resolver(&self, name: &str) -> Result<(), PreferenceError> {
        let txn = self.db.begin_write().map_err(storage)?;
        {
            let mut table = txn.open_table(STRINGS).map_err(storage)?;
            table.insert(PREFERRED_RESOLVER_KEY, name).map_err(storage)?;
        }
        txn.commit().map_err(storage)?;
        Ok(())
    }

    fn request_count(&self) -> Result<u64, PreferenceError> {
        let txn = self.db.begin_read().map_err(storage)?;
        let table = txn.open_table(COUNTERS).map_err(storage)?;
        let value = table
            .get(REQUEST_COUNT_KEY)
            .map_err(storage)?
            .map(|guard| guard.value())
            .unwrap_or(0);
        Ok(value)
    }

    fn set_request_count(&self, count: u64) -> Result<(), PreferenceError> {
        let txn = self.db.begin_write().map_err(storage)?;
        {
            let mut table = txn.open_table(COUNTERS).map_err(storage)?;
            table.insert(REQUEST_COUNT_KEY, count).map_err(storage)?;
        }
        txn.commit().map_err(storage)?;
        Ok(())
    }
}
