//! Database handle

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::network::Executor;
use crate::store::Store;
use crate::transaction::Transaction;

/// A handle to the cluster's key space. Cheap to clone.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DbInner>,
}

struct DbInner {
    store: Arc<Mutex<Store>>,
    executor: Executor,
}

impl Database {
    pub(crate) fn new(store: Arc<Mutex<Store>>, executor: Executor) -> Self {
        Database {
            inner: Arc::new(DbInner { store, executor }),
        }
    }

    pub fn create_transaction(&self) -> Transaction {
        Transaction::new(self.clone())
    }

    /// Latest committed version.
    pub fn current_version(&self) -> i64 {
        self.store().version()
    }

    /// Watches armed and not yet fired.
    pub fn active_watches(&self) -> usize {
        self.store().watch_count()
    }

    pub(crate) fn store(&self) -> MutexGuard<'_, Store> {
        self.inner
            .store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn executor(&self) -> &Executor {
        &self.inner.executor
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Database {{ version: {} }}", self.current_version())
    }
}
