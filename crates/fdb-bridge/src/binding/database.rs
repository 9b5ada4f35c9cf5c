use std::cell::RefCell;
use std::fmt;

use crate::binding::transaction::Transaction;
use crate::bridge::Bridge;
use crate::error::BridgeError;

/// The host-facing database object.
pub struct Database {
    bridge: Bridge,
    db: RefCell<Option<fdb_native::Database>>,
}

impl Database {
    pub fn new(bridge: Bridge, db: fdb_native::Database) -> Self {
        Database {
            bridge,
            db: RefCell::new(Some(db)),
        }
    }

    pub fn create_transaction(&self) -> Result<Transaction, BridgeError> {
        let db = self.db.borrow();
        let db = db.as_ref().ok_or(BridgeError::DatabaseClosed)?;
        Ok(Transaction::new(self.bridge.clone(), db.create_transaction()))
    }

    /// Release the native handle. Transactions already created keep working.
    pub fn close(&self) {
        if self.db.borrow_mut().take().is_some() {
            log::debug!("database closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.db.borrow().is_none()
    }

    pub fn current_version(&self) -> Option<i64> {
        self.db.borrow().as_ref().map(fdb_native::Database::current_version)
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("closed", &self.is_closed())
            .finish()
    }
}
