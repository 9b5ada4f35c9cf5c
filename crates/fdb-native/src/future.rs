//! Native futures
//!
//! Every asynchronous store operation hands back a [`StoreFuture`]. The
//! producing side keeps the paired [`Resolver`] and settles it exactly once,
//! usually from a network worker thread. Consumers see the future only
//! through the [`NativeFuture`] trait.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::database::Database;
use crate::error::{codes, ErrorCode, NativeError};

/// Callback fired once when a future becomes ready.
pub type ReadyCallback = Box<dyn FnOnce() + Send>;

/// A key and its value, as returned by range reads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyValue {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl KeyValue {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        KeyValue {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// What a successfully resolved future carries.
#[derive(Clone, Debug)]
pub enum Payload {
    Void,
    Value(Option<Vec<u8>>),
    Key(Vec<u8>),
    KeyValues { items: Vec<KeyValue>, more: bool },
    Strings(Vec<String>),
    Version(i64),
    Database(Database),
}

pub type Outcome = Result<Payload, ErrorCode>;

/// The store library's future handle.
///
/// Dropping the boxed future destroys it. Accessors may only be called once
/// the future is ready.
pub trait NativeFuture: Send + Sync + 'static {
    /// Register the one ready callback. It runs on whichever thread resolves
    /// the future, or right away on this thread if the future is ready.
    fn set_callback(&self, callback: ReadyCallback) -> Result<(), NativeError>;

    /// Ask the library to cancel. A pending future resolves with
    /// `operation_cancelled`; a resolved one is left alone.
    fn cancel(&self);

    fn is_ready(&self) -> bool;

    /// Block the calling thread until the future is ready.
    fn block_until_ready(&self);

    /// The resolution error code, or 0 on success (or while pending).
    fn get_error(&self) -> ErrorCode;

    fn get_value(&self) -> Result<Option<Vec<u8>>, NativeError>;

    fn get_key(&self) -> Result<Vec<u8>, NativeError>;

    /// Key-value batch and whether more data exists beyond it.
    fn get_keyvalue_array(&self) -> Result<(Vec<KeyValue>, bool), NativeError>;

    fn get_string_array(&self) -> Result<Vec<String>, NativeError>;

    fn get_version(&self) -> Result<i64, NativeError>;

    fn get_database(&self) -> Result<Database, NativeError>;
}

#[derive(Default)]
struct CellState {
    outcome: Option<Outcome>,
    callback: Option<ReadyCallback>,
    callback_set: bool,
}

#[derive(Default)]
struct FutureCell {
    state: Mutex<CellState>,
    ready: Condvar,
    cancels: AtomicUsize,
    late_cancels: AtomicUsize,
    destroyed: AtomicBool,
}

impl FutureCell {
    fn lock(&self) -> MutexGuard<'_, CellState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Settle the cell. Returns false if it was already settled.
    fn settle(&self, outcome: Outcome) -> bool {
        let callback = {
            let mut state = self.lock();
            if state.outcome.is_some() {
                return false;
            }
            state.outcome = Some(outcome);
            state.callback.take()
        };
        self.ready.notify_all();
        // The callback runs outside the lock; it may call back into us.
        if let Some(callback) = callback {
            callback();
        }
        true
    }
}

/// Create a pending future and the resolver that settles it.
pub fn pair() -> (StoreFuture, Resolver) {
    let cell = Arc::new(FutureCell::default());
    (
        StoreFuture { cell: cell.clone() },
        Resolver {
            cell,
            settled: false,
        },
    )
}

/// A future that is already resolved.
pub fn ready(outcome: Outcome) -> StoreFuture {
    let (future, mut resolver) = pair();
    resolver.resolve(outcome);
    future
}

/// The future handle given to consumers.
pub struct StoreFuture {
    cell: Arc<FutureCell>,
}

impl StoreFuture {
    fn with_payload<T>(&self, pick: impl FnOnce(&Payload) -> Option<T>) -> Result<T, NativeError> {
        let state = self.cell.lock();
        match &state.outcome {
            None => Err(NativeError::new(codes::FUTURE_NOT_SET)),
            Some(Err(code)) => Err(NativeError::new(*code)),
            Some(Ok(payload)) => {
                pick(payload).ok_or(NativeError::new(codes::CLIENT_INVALID_OPERATION))
            }
        }
    }
}

impl NativeFuture for StoreFuture {
    fn set_callback(&self, callback: ReadyCallback) -> Result<(), NativeError> {
        let mut state = self.cell.lock();
        if state.callback_set {
            return Err(NativeError::new(codes::CLIENT_INVALID_OPERATION));
        }
        state.callback_set = true;
        if state.outcome.is_some() {
            drop(state);
            callback();
        } else {
            state.callback = Some(callback);
        }
        Ok(())
    }

    fn cancel(&self) {
        self.cell.cancels.fetch_add(1, Ordering::SeqCst);
        if !self.cell.settle(Err(codes::OPERATION_CANCELLED)) {
            self.cell.late_cancels.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_ready(&self) -> bool {
        self.cell.lock().outcome.is_some()
    }

    fn block_until_ready(&self) {
        let mut state = self.cell.lock();
        while state.outcome.is_none() {
            state = self
                .cell
                .ready
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn get_error(&self) -> ErrorCode {
        match &self.cell.lock().outcome {
            Some(Err(code)) => *code,
            _ => codes::SUCCESS,
        }
    }

    fn get_value(&self) -> Result<Option<Vec<u8>>, NativeError> {
        self.with_payload(|p| match p {
            Payload::Value(value) => Some(value.clone()),
            _ => None,
        })
    }

    fn get_key(&self) -> Result<Vec<u8>, NativeError> {
        self.with_payload(|p| match p {
            Payload::Key(key) => Some(key.clone()),
            _ => None,
        })
    }

    fn get_keyvalue_array(&self) -> Result<(Vec<KeyValue>, bool), NativeError> {
        self.with_payload(|p| match p {
            Payload::KeyValues { items, more } => Some((items.clone(), *more)),
            _ => None,
        })
    }

    fn get_string_array(&self) -> Result<Vec<String>, NativeError> {
        self.with_payload(|p| match p {
            Payload::Strings(strings) => Some(strings.clone()),
            _ => None,
        })
    }

    fn get_version(&self) -> Result<i64, NativeError> {
        self.with_payload(|p| match p {
            Payload::Version(version) => Some(*version),
            _ => None,
        })
    }

    fn get_database(&self) -> Result<Database, NativeError> {
        self.with_payload(|p| match p {
            Payload::Database(db) => Some(db.clone()),
            _ => None,
        })
    }
}

impl Drop for StoreFuture {
    fn drop(&mut self) {
        self.cell.destroyed.store(true, Ordering::SeqCst);
    }
}

impl fmt::Debug for StoreFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.cell.lock();
        match &state.outcome {
            None => write!(f, "StoreFuture {{ <pending> }}"),
            Some(Ok(_)) => write!(f, "StoreFuture {{ <ready> }}"),
            Some(Err(code)) => write!(f, "StoreFuture {{ <error {}> }}", code),
        }
    }
}

/// The producing side of a [`StoreFuture`].
///
/// A resolver dropped without resolving breaks its future with
/// `broken_promise`, so consumers never wait forever.
pub struct Resolver {
    cell: Arc<FutureCell>,
    settled: bool,
}

impl Resolver {
    /// Settle the future. Returns false if it was already settled, for
    /// instance by a cancel.
    pub fn resolve(&mut self, outcome: Outcome) -> bool {
        self.settled = true;
        self.cell.settle(outcome)
    }

    pub fn succeed(mut self, payload: Payload) -> bool {
        self.resolve(Ok(payload))
    }

    pub fn fail(mut self, code: ErrorCode) -> bool {
        self.resolve(Err(code))
    }

    pub fn is_resolved(&self) -> bool {
        self.cell.lock().outcome.is_some()
    }

    /// How many times `cancel` was called on the future.
    pub fn cancel_count(&self) -> usize {
        self.cell.cancels.load(Ordering::SeqCst)
    }

    /// Cancels that arrived after the future had already resolved.
    pub fn late_cancel_count(&self) -> usize {
        self.cell.late_cancels.load(Ordering::SeqCst)
    }

    /// Whether the consumer has dropped the future.
    pub fn is_destroyed(&self) -> bool {
        self.cell.destroyed.load(Ordering::SeqCst)
    }
}

impl Drop for Resolver {
    fn drop(&mut self) {
        if !self.settled && self.cell.settle(Err(codes::BROKEN_PROMISE)) {
            log::debug!("future resolver dropped before resolving");
        }
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("resolved", &self.is_resolved())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn test_callback_fires_on_resolving_thread() {
        let (future, resolver) = pair();
        let (tx, rx) = mpsc::channel();
        future
            .set_callback(Box::new(move || {
                tx.send(thread::current().id()).unwrap();
            }))
            .unwrap();

        let worker = thread::spawn(move || {
            resolver.succeed(Payload::Value(Some(b"hello".to_vec())));
            thread::current().id()
        });
        let worker_id = worker.join().unwrap();
        assert_eq!(rx.recv().unwrap(), worker_id);
        assert_eq!(future.get_value().unwrap(), Some(b"hello".to_vec()));
    }

    #[test]
    fn test_callback_on_ready_future_runs_immediately() {
        let future = ready(Ok(Payload::Version(42)));
        let (tx, rx) = mpsc::channel();
        future.set_callback(Box::new(move || tx.send(()).unwrap())).unwrap();
        assert!(rx.try_recv().is_ok());
        assert_eq!(future.get_version().unwrap(), 42);
    }

    #[test]
    fn test_second_callback_is_rejected() {
        let (future, _resolver) = pair();
        future.set_callback(Box::new(|| {})).unwrap();
        assert_eq!(
            future.set_callback(Box::new(|| {})).unwrap_err().code,
            codes::CLIENT_INVALID_OPERATION
        );
    }

    #[test]
    fn test_cancel_pending_then_late() {
        let (future, mut resolver) = pair();
        future.cancel();
        assert_eq!(future.get_error(), codes::OPERATION_CANCELLED);
        assert!(!resolver.resolve(Ok(Payload::Void)));
        future.cancel();
        assert_eq!(resolver.cancel_count(), 2);
        assert_eq!(resolver.late_cancel_count(), 1);
    }

    #[test]
    fn test_accessors_before_ready_and_on_mismatch() {
        let (future, resolver) = pair();
        assert_eq!(future.get_key().unwrap_err().code, codes::FUTURE_NOT_SET);
        resolver.succeed(Payload::Void);
        assert_eq!(future.get_key().unwrap_err().code, codes::CLIENT_INVALID_OPERATION);
        assert_eq!(future.get_error(), 0);
    }

    #[test]
    fn test_block_until_ready_waits_for_worker() {
        let (future, resolver) = pair();
        let worker = thread::spawn(move || {
            thread::sleep(std::time::Duration::from_millis(10));
            resolver.fail(codes::FUTURE_VERSION);
        });
        future.block_until_ready();
        assert_eq!(future.get_error(), codes::FUTURE_VERSION);
        worker.join().unwrap();
    }

    #[test]
    fn test_dropped_resolver_breaks_future() {
        let (future, resolver) = pair();
        drop(resolver);
        assert_eq!(future.get_error(), codes::BROKEN_PROMISE);
    }

    #[test]
    fn test_destroy_is_visible_to_resolver() {
        let (future, resolver) = pair();
        assert!(!resolver.is_destroyed());
        drop(future);
        assert!(resolver.is_destroyed());
    }
}
