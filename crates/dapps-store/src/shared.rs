//! Thread-safe handle shared by sessions, the delivery sweep and the API.

use std::sync::{Arc, Mutex};

use crate::database::Database;
use crate::error::{Result, StoreError};

/// Cloneable handle around one [`Database`].
///
/// Each call to [`SharedDatabase::with`] holds the lock for the duration of a
/// synchronous closure only, so it must never be used across an `.await`.
#[derive(Clone)]
pub struct SharedDatabase {
    inner: Arc<Mutex<Database>>,
}

impl SharedDatabase {
    pub fn new(db: Database) -> Self {
        Self {
            inner: Arc::new(Mutex::new(db)),
        }
    }

    pub fn with<T>(&self, f: impl FnOnce(&Database) -> Result<T>) -> Result<T> {
        let db = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        f(&db)
    }
}
