//! Transactions
//!
//! Reads are served at the transaction's read version with its own buffered
//! writes layered on top. Every operation returns a [`StoreFuture`] that a
//! network worker resolves; writes are buffered and only checked and applied
//! at commit.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::database::Database;
use crate::error::{codes, error_predicate, ErrorCode, ErrorPredicate, NativeError};
use crate::future::{self, KeyValue, Outcome, Payload, Resolver, StoreFuture};
use crate::mutation::{
    check_key, check_value, key_after, KeyRange, KeySelector, Mutation, MutationType,
    SYSTEM_KEY_PREFIX,
};
use crate::store::{CommitRequest, Store};

/// Rows returned per range batch when no limit is given.
pub const RANGE_BATCH_ROWS: usize = 256;
const INITIAL_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF: Duration = Duration::from_secs(1);
/// Address every key lives at in this single-process cluster.
const LOCAL_ADDRESS: &str = "127.0.0.1:4500";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RangeOptions {
    /// Maximum rows, 0 for one default-sized batch.
    pub limit: usize,
    pub reverse: bool,
}

/// The 10-byte versionstamp of a commit: big-endian version plus batch order.
pub fn versionstamp(version: i64) -> Vec<u8> {
    let mut stamp = Vec::with_capacity(10);
    stamp.extend_from_slice(&version.to_be_bytes());
    stamp.extend_from_slice(&0u16.to_be_bytes());
    stamp
}

struct PendingWatch {
    key: Vec<u8>,
    value: Option<Vec<u8>>,
    resolver: Resolver,
}

struct TxState {
    read_version: Option<i64>,
    mutations: Vec<Mutation>,
    read_conflicts: Vec<KeyRange>,
    write_conflicts: Vec<KeyRange>,
    watches: Vec<PendingWatch>,
    versionstamps: Vec<Resolver>,
    committed_version: i64,
    deferred_error: Option<ErrorCode>,
    cancelled: bool,
    backoff: Duration,
}

impl TxState {
    fn new() -> Self {
        TxState {
            read_version: None,
            mutations: Vec::new(),
            read_conflicts: Vec::new(),
            write_conflicts: Vec::new(),
            watches: Vec::new(),
            versionstamps: Vec::new(),
            committed_version: -1,
            deferred_error: None,
            cancelled: false,
            backoff: INITIAL_BACKOFF,
        }
    }

    fn defer_error(&mut self, error: NativeError) {
        if self.deferred_error.is_none() {
            self.deferred_error = Some(error.code);
        }
    }

    fn ensure_read_version(&mut self, store: &Store) -> Result<i64, ErrorCode> {
        match self.read_version {
            Some(version) => {
                store.check_read_version(version)?;
                Ok(version)
            }
            None => {
                let version = store.version();
                self.read_version = Some(version);
                Ok(version)
            }
        }
    }

    /// Snapshot of `range` at the read version with our writes applied.
    fn view(&self, store: &Store, version: i64, range: &KeyRange) -> BTreeMap<Vec<u8>, Vec<u8>> {
        let mut view = store.range(range, version);
        for mutation in &self.mutations {
            match mutation {
                Mutation::Set { key, value } if range.contains(key) => {
                    view.insert(key.clone(), value.clone());
                }
                Mutation::Clear { key } => {
                    view.remove(key);
                }
                Mutation::ClearRange { range: cleared } => {
                    view.retain(|key, _| !cleared.contains(key));
                }
                Mutation::Atomic { op, key, param } if range.contains(key) => {
                    let value = op.apply(view.get(key).map(Vec::as_slice), param);
                    view.insert(key.clone(), value);
                }
                _ => {}
            }
        }
        view
    }

    fn read_one(&self, store: &Store, version: i64, key: &[u8]) -> Option<Vec<u8>> {
        self.view(store, version, &KeyRange::single(key)).remove(key)
    }

    /// Take every pending watch and versionstamp, for failing them.
    fn take_pending(&mut self) -> Vec<Resolver> {
        let mut pending: Vec<Resolver> = self.watches.drain(..).map(|w| w.resolver).collect();
        pending.append(&mut self.versionstamps);
        pending
    }

    fn clear(&mut self) -> Vec<Resolver> {
        let pending = self.take_pending();
        let backoff = self.backoff;
        *self = TxState::new();
        self.backoff = backoff;
        pending
    }
}

fn whole_keyspace() -> KeyRange {
    KeyRange::new(Vec::new(), vec![SYSTEM_KEY_PREFIX])
}

pub struct Transaction {
    db: Database,
    state: Mutex<TxState>,
}

impl Transaction {
    pub(crate) fn new(db: Database) -> Self {
        Transaction {
            db,
            state: Mutex::new(TxState::new()),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn lock(&self) -> MutexGuard<'_, TxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fail_all(&self, pending: Vec<Resolver>, code: ErrorCode) {
        for resolver in pending {
            self.db.executor().deliver(resolver, Err(code));
        }
    }

    /// Run a read against the store now and resolve its future on a worker.
    fn issue<F>(&self, read: F) -> StoreFuture
    where
        F: FnOnce(&mut TxState, &Store, i64) -> Outcome,
    {
        let (future, resolver) = future::pair();
        let outcome = {
            let mut state = self.lock();
            if state.cancelled {
                Err(codes::TRANSACTION_CANCELLED)
            } else {
                let store = self.db.store();
                state
                    .ensure_read_version(&store)
                    .and_then(|version| read(&mut state, &store, version))
            }
        };
        self.db.executor().deliver(resolver, outcome);
        future
    }

    pub fn get(&self, key: &[u8], snapshot: bool) -> StoreFuture {
        let key = key.to_vec();
        self.issue(move |state, store, version| {
            if !snapshot {
                state.read_conflicts.push(KeyRange::single(&key));
            }
            Ok(Payload::Value(state.read_one(store, version, &key)))
        })
    }

    pub fn get_key(&self, selector: &KeySelector, snapshot: bool) -> StoreFuture {
        let selector = selector.clone();
        self.issue(move |state, store, version| {
            let keys: Vec<Vec<u8>> = state
                .view(store, version, &whole_keyspace())
                .into_keys()
                .collect();
            let key = selector.resolve(&keys);
            if !snapshot {
                let (low, high) = if key <= selector.key {
                    (&key, &selector.key)
                } else {
                    (&selector.key, &key)
                };
                state.read_conflicts.push(KeyRange::new(low.clone(), key_after(high)));
            }
            Ok(Payload::Key(key))
        })
    }

    pub fn get_range(
        &self,
        begin: &KeySelector,
        end: &KeySelector,
        options: RangeOptions,
        snapshot: bool,
    ) -> StoreFuture {
        let (begin, end) = (begin.clone(), end.clone());
        self.issue(move |state, store, version| {
            let view = state.view(store, version, &whole_keyspace());
            let keys: Vec<Vec<u8>> = view.keys().cloned().collect();
            let begin_key = begin.resolve(&keys);
            let end_key = end.resolve(&keys);
            if begin_key >= end_key {
                return Ok(Payload::KeyValues {
                    items: Vec::new(),
                    more: false,
                });
            }
            let range = KeyRange::new(begin_key, end_key);
            let rows: Vec<KeyValue> = view
                .into_iter()
                .filter(|(key, _)| range.contains(key))
                .map(|(key, value)| KeyValue { key, value })
                .collect();
            let cap = if options.limit == 0 {
                RANGE_BATCH_ROWS
            } else {
                options.limit
            };
            let total = rows.len();
            let items: Vec<KeyValue> = if options.reverse {
                rows.into_iter().rev().take(cap).collect()
            } else {
                rows.into_iter().take(cap).collect()
            };
            let more = total > items.len();
            if !snapshot {
                let read = match (more, items.last()) {
                    (true, Some(last)) if options.reverse => KeyRange::new(last.key.clone(), range.end),
                    (true, Some(last)) => KeyRange::new(range.begin, key_after(&last.key)),
                    _ => range,
                };
                state.read_conflicts.push(read);
            }
            Ok(Payload::KeyValues { items, more })
        })
    }

    pub fn get_read_version(&self) -> StoreFuture {
        self.issue(|_, _, version| Ok(Payload::Version(version)))
    }

    /// Pin the read version. Fails if one is already set.
    pub fn set_read_version(&self, version: i64) -> Result<(), NativeError> {
        let mut state = self.lock();
        if state.read_version.is_some() {
            return Err(NativeError::new(codes::READ_VERSION_ALREADY_SET));
        }
        if version < 0 {
            return Err(NativeError::new(codes::VERSION_INVALID));
        }
        state.read_version = Some(version);
        Ok(())
    }

    /// Version the last commit landed at, -1 for none or read-only.
    pub fn get_committed_version(&self) -> i64 {
        self.lock().committed_version
    }

    pub fn get_addresses_for_key(&self, key: &[u8]) -> StoreFuture {
        let checked = check_key(key);
        self.issue(move |_, _, _| {
            checked.map_err(|e| e.code)?;
            Ok(Payload::Strings(vec![LOCAL_ADDRESS.to_string()]))
        })
    }

    fn buffer(&self, mutation: Mutation, checked: Result<(), NativeError>) {
        let mut state = self.lock();
        if state.cancelled {
            return;
        }
        match checked {
            Ok(()) => {
                state.write_conflicts.push(mutation.range());
                state.mutations.push(mutation);
            }
            Err(e) => state.defer_error(e),
        }
    }

    pub fn set(&self, key: &[u8], value: &[u8]) {
        let checked = check_key(key).and_then(|_| check_value(value));
        self.buffer(
            Mutation::Set {
                key: key.to_vec(),
                value: value.to_vec(),
            },
            checked,
        );
    }

    pub fn clear(&self, key: &[u8]) {
        self.buffer(Mutation::Clear { key: key.to_vec() }, check_key(key));
    }

    pub fn clear_range(&self, begin: &[u8], end: &[u8]) {
        let checked = check_key(begin).and_then(|_| {
            if begin > end {
                Err(NativeError::new(codes::INVERTED_RANGE))
            } else {
                Ok(())
            }
        });
        self.buffer(
            Mutation::ClearRange {
                range: KeyRange::new(begin, end),
            },
            checked,
        );
    }

    pub fn atomic_op(&self, op: MutationType, key: &[u8], param: &[u8]) {
        let checked = check_key(key).and_then(|_| check_value(param));
        self.buffer(
            Mutation::Atomic {
                op,
                key: key.to_vec(),
                param: param.to_vec(),
            },
            checked,
        );
    }

    pub fn add_read_conflict_range(&self, begin: &[u8], end: &[u8]) -> Result<(), NativeError> {
        if begin > end {
            return Err(NativeError::new(codes::INVERTED_RANGE));
        }
        self.lock().read_conflicts.push(KeyRange::new(begin, end));
        Ok(())
    }

    pub fn add_write_conflict_range(&self, begin: &[u8], end: &[u8]) -> Result<(), NativeError> {
        if begin > end {
            return Err(NativeError::new(codes::INVERTED_RANGE));
        }
        self.lock().write_conflicts.push(KeyRange::new(begin, end));
        Ok(())
    }

    /// Watch `key` for changes. The watch is armed when the transaction
    /// commits and resolves once the value differs from what this
    /// transaction saw.
    pub fn watch(&self, key: &[u8]) -> StoreFuture {
        let (future, resolver) = future::pair();
        let mut state = self.lock();
        let baseline = if state.cancelled {
            Err(codes::TRANSACTION_CANCELLED)
        } else {
            check_key(key).map_err(|e| e.code).and_then(|_| {
                let store = self.db.store();
                let version = state.ensure_read_version(&store)?;
                Ok(state.read_one(&store, version, key))
            })
        };
        match baseline {
            Ok(value) => state.watches.push(PendingWatch {
                key: key.to_vec(),
                value,
                resolver,
            }),
            Err(code) => self.db.executor().deliver(resolver, Err(code)),
        }
        future
    }

    /// Resolves with the commit's versionstamp once it commits.
    pub fn get_versionstamp(&self) -> StoreFuture {
        let (future, resolver) = future::pair();
        let mut state = self.lock();
        if state.cancelled {
            self.db.executor().deliver(resolver, Err(codes::TRANSACTION_CANCELLED));
        } else {
            state.versionstamps.push(resolver);
        }
        future
    }

    pub fn commit(&self) -> StoreFuture {
        let (future, resolver) = future::pair();
        let mut state = self.lock();
        let outcome = if state.cancelled {
            Err(codes::TRANSACTION_CANCELLED)
        } else if let Some(code) = state.deferred_error {
            let pending = state.take_pending();
            self.fail_all(pending, code);
            Err(code)
        } else {
            self.commit_locked(&mut state)
        };
        drop(state);
        self.db.executor().deliver(resolver, outcome);
        future
    }

    fn commit_locked(&self, state: &mut TxState) -> Outcome {
        let read_only = state.mutations.is_empty() && state.write_conflicts.is_empty();
        let mut store = self.db.store();
        let result = if read_only {
            Ok((-1, Vec::new()))
        } else {
            let read_version = state.read_version.unwrap_or_else(|| store.version());
            store.commit(CommitRequest {
                read_version,
                read_conflicts: std::mem::take(&mut state.read_conflicts),
                write_conflicts: std::mem::take(&mut state.write_conflicts),
                mutations: std::mem::take(&mut state.mutations),
            })
        };

        match result {
            Ok((version, mut fire)) => {
                log::debug!("committed at version {}", version);
                state.committed_version = version;
                for watch in state.watches.drain(..) {
                    if let Some(resolver) = store.add_watch(watch.key, watch.value, watch.resolver) {
                        fire.push(resolver);
                    }
                }
                drop(store);
                for resolver in fire {
                    self.db.executor().deliver(resolver, Ok(Payload::Void));
                }
                for resolver in state.versionstamps.drain(..) {
                    let outcome = if version < 0 {
                        Err(codes::NO_COMMIT_VERSION)
                    } else {
                        Ok(Payload::Key(versionstamp(version)))
                    };
                    self.db.executor().deliver(resolver, outcome);
                }
                Ok(Payload::Void)
            }
            Err(code) => {
                drop(store);
                log::debug!("commit failed with {}", code);
                let pending = state.take_pending();
                self.fail_all(pending, code);
                Err(code)
            }
        }
    }

    /// Handle an error from an earlier operation: retryable errors reset the
    /// transaction and resolve after a backoff, others fail with the error.
    pub fn on_error(&self, code: ErrorCode) -> StoreFuture {
        let (future, resolver) = future::pair();
        if !error_predicate(ErrorPredicate::Retryable, code) {
            self.db.executor().deliver(resolver, Err(code));
            return future;
        }
        let mut state = self.lock();
        let delay = state.backoff;
        let pending = state.clear();
        state.backoff = (delay * 2).min(MAX_BACKOFF);
        drop(state);
        self.fail_all(pending, codes::TRANSACTION_CANCELLED);
        log::debug!("retrying after error {} in {:?}", code, delay);
        self.db
            .executor()
            .deliver_after(resolver, Ok(Payload::Void), delay);
        future
    }

    /// Drop all buffered state and start over.
    pub fn reset(&self) {
        let mut state = self.lock();
        let pending = state.clear();
        state.backoff = INITIAL_BACKOFF;
        drop(state);
        self.fail_all(pending, codes::TRANSACTION_CANCELLED);
    }

    /// Cancel the transaction. Later operations fail with
    /// `transaction_cancelled` until [`reset`](Self::reset).
    pub fn cancel(&self) {
        let mut state = self.lock();
        let pending = state.clear();
        state.cancelled = true;
        drop(state);
        self.fail_all(pending, codes::TRANSACTION_CANCELLED);
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let pending = self.lock().take_pending();
        self.fail_all(pending, codes::TRANSACTION_CANCELLED);
    }
}
