//! In-memory multi-version key space
//!
//! Every key keeps a short history of `(version, value)` pairs so reads at
//! an older read version see the data as of that version. Commits are
//! checked optimistically against the write ranges of every commit newer
//! than the transaction's read version.

use std::collections::BTreeMap;
use std::ops::Bound;

use crate::error::{codes, ErrorCode};
use crate::future::Resolver;
use crate::mutation::{KeyRange, Mutation};

/// How many versions back reads are still served.
pub const MVCC_WINDOW: i64 = 5_000;
/// Versions advance by this much per commit.
const VERSIONS_PER_COMMIT: i64 = 1;

type History = Vec<(i64, Option<Vec<u8>>)>;

struct CommitRecord {
    version: i64,
    writes: Vec<KeyRange>,
}

struct WatchEntry {
    key: Vec<u8>,
    value: Option<Vec<u8>>,
    resolver: Resolver,
}

/// What a transaction hands over at commit.
pub(crate) struct CommitRequest {
    pub read_version: i64,
    pub read_conflicts: Vec<KeyRange>,
    pub write_conflicts: Vec<KeyRange>,
    pub mutations: Vec<Mutation>,
}

pub(crate) struct Store {
    version: i64,
    data: BTreeMap<Vec<u8>, History>,
    commits: Vec<CommitRecord>,
    watches: Vec<WatchEntry>,
}

impl Store {
    pub fn new() -> Self {
        Store {
            version: 1,
            data: BTreeMap::new(),
            commits: Vec::new(),
            watches: Vec::new(),
        }
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn oldest_readable(&self) -> i64 {
        (self.version - MVCC_WINDOW).max(0)
    }

    /// Check that `read_version` can be served.
    pub fn check_read_version(&self, read_version: i64) -> Result<(), ErrorCode> {
        if read_version > self.version {
            Err(codes::FUTURE_VERSION)
        } else if read_version < self.oldest_readable() {
            Err(codes::TRANSACTION_TOO_OLD)
        } else {
            Ok(())
        }
    }

    fn value_at(history: &History, version: i64) -> Option<&Vec<u8>> {
        history
            .iter()
            .rev()
            .find(|(v, _)| *v <= version)
            .and_then(|(_, value)| value.as_ref())
    }

    pub fn get(&self, key: &[u8], version: i64) -> Option<Vec<u8>> {
        self.data
            .get(key)
            .and_then(|history| Store::value_at(history, version))
            .cloned()
    }

    /// Present keys and values in `range` at `version`, in key order.
    pub fn range(&self, range: &KeyRange, version: i64) -> BTreeMap<Vec<u8>, Vec<u8>> {
        if range.begin >= range.end {
            return BTreeMap::new();
        }
        self.data
            .range::<[u8], _>((
                Bound::Included(range.begin.as_slice()),
                Bound::Excluded(range.end.as_slice()),
            ))
            .filter_map(|(key, history)| {
                Store::value_at(history, version).map(|value| (key.clone(), value.clone()))
            })
            .collect()
    }

    /// Validate and apply a commit. Returns the commit version and the
    /// watches the commit triggered.
    pub fn commit(&mut self, request: CommitRequest) -> Result<(i64, Vec<Resolver>), ErrorCode> {
        if request.read_version < self.oldest_readable() {
            return Err(codes::TRANSACTION_TOO_OLD);
        }
        let conflict = self
            .commits
            .iter()
            .filter(|c| c.version > request.read_version)
            .any(|c| {
                c.writes
                    .iter()
                    .any(|w| request.read_conflicts.iter().any(|r| r.intersects(w)))
            });
        if conflict {
            return Err(codes::NOT_COMMITTED);
        }

        let version = self.version + VERSIONS_PER_COMMIT;
        for mutation in &request.mutations {
            self.apply(mutation, version);
        }
        self.version = version;
        self.commits.push(CommitRecord {
            version,
            writes: request.write_conflicts,
        });
        self.prune();
        Ok((version, self.triggered_watches()))
    }

    fn apply(&mut self, mutation: &Mutation, version: i64) {
        match mutation {
            Mutation::Set { key, value } => self.write(key, version, Some(value.clone())),
            Mutation::Clear { key } => self.write(key, version, None),
            Mutation::ClearRange { range } => {
                let keys: Vec<Vec<u8>> = self.range(range, version).into_keys().collect();
                for key in keys {
                    self.write(&key, version, None);
                }
            }
            Mutation::Atomic { op, key, param } => {
                let current = self.get(key, version);
                let value = op.apply(current.as_deref(), param);
                self.write(key, version, Some(value));
            }
        }
    }

    fn write(&mut self, key: &[u8], version: i64, value: Option<Vec<u8>>) {
        let history = self.data.entry(key.to_vec()).or_default();
        match history.last_mut() {
            Some((v, slot)) if *v == version => *slot = value,
            _ => history.push((version, value)),
        }
    }

    fn prune(&mut self) {
        let oldest = self.oldest_readable();
        self.commits.retain(|c| c.version > oldest);
        if self.version % 256 != 0 {
            return;
        }
        for history in self.data.values_mut() {
            // Keep the newest entry visible at `oldest` and everything after.
            if let Some(keep) = history.iter().rposition(|(v, _)| *v <= oldest) {
                history.drain(..keep);
            }
        }
        self.data
            .retain(|_, history| !(history.len() == 1 && history[0].1.is_none()));
    }

    /// Arm a watch on `key`, which the watcher last saw as `value`. Fires
    /// right away if the key has already moved on.
    pub fn add_watch(&mut self, key: Vec<u8>, value: Option<Vec<u8>>, resolver: Resolver) -> Option<Resolver> {
        if self.get(&key, self.version) != value {
            return Some(resolver);
        }
        self.watches.push(WatchEntry { key, value, resolver });
        None
    }

    fn triggered_watches(&mut self) -> Vec<Resolver> {
        let mut fired = Vec::new();
        let mut armed = Vec::with_capacity(self.watches.len());
        for watch in std::mem::take(&mut self.watches) {
            if watch.resolver.is_resolved() {
                // Cancelled in the meantime.
                continue;
            }
            if self.get(&watch.key, self.version) != watch.value {
                fired.push(watch.resolver);
            } else {
                armed.push(watch);
            }
        }
        self.watches = armed;
        fired
    }

    pub fn watch_count(&self) -> usize {
        self.watches.iter().filter(|w| !w.resolver.is_resolved()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::future::{self, NativeFuture, Payload};

    fn set(key: &str, value: &str) -> Mutation {
        Mutation::Set {
            key: key.as_bytes().to_vec(),
            value: value.as_bytes().to_vec(),
        }
    }

    fn commit(store: &mut Store, read_version: i64, reads: Vec<KeyRange>, mutations: Vec<Mutation>) -> Result<i64, ErrorCode> {
        let write_conflicts = mutations.iter().map(Mutation::range).collect();
        store
            .commit(CommitRequest {
                read_version,
                read_conflicts: reads,
                write_conflicts,
                mutations,
            })
            .map(|(version, _)| version)
    }

    #[test]
    fn test_reads_see_their_version() {
        let mut store = Store::new();
        let v1 = commit(&mut store, 1, vec![], vec![set("a", "1")]).unwrap();
        let v2 = commit(&mut store, v1, vec![], vec![set("a", "2")]).unwrap();
        assert!(v2 > v1);
        assert_eq!(store.get(b"a", v1 - 1), None);
        assert_eq!(store.get(b"a", v1), Some(b"1".to_vec()));
        assert_eq!(store.get(b"a", v2), Some(b"2".to_vec()));
    }

    #[test]
    fn test_conflicting_commit_is_rejected() {
        let mut store = Store::new();
        let read_version = store.version();
        commit(&mut store, read_version, vec![], vec![set("a", "1")]).unwrap();
        let result = commit(&mut store, read_version, vec![KeyRange::single(b"a")], vec![set("b", "1")]);
        assert_eq!(result, Err(codes::NOT_COMMITTED));
        // Reads of other keys do not conflict
        let result = commit(&mut store, read_version, vec![KeyRange::single(b"c")], vec![set("b", "1")]);
        assert!(result.is_ok());
    }

    #[test]
    fn test_clear_range_and_atomic() {
        let mut store = Store::new();
        let read_version = commit(&mut store, 1, vec![], vec![set("a", "1"), set("b", "2"), set("c", "3")]).unwrap();
        let v = commit(
            &mut store,
            read_version,
            vec![],
            vec![
                Mutation::ClearRange { range: KeyRange::new("a", "c") },
                Mutation::Atomic {
                    op: crate::mutation::MutationType::Add,
                    key: b"n".to_vec(),
                    param: 3u32.to_le_bytes().to_vec(),
                },
            ],
        )
        .unwrap();
        let keys: Vec<Vec<u8>> = store.range(&KeyRange::new("", "\u{7f}"), v).into_keys().collect();
        assert_eq!(keys, vec![b"c".to_vec(), b"n".to_vec()]);
    }

    #[test]
    fn test_version_checks() {
        let store = Store::new();
        assert_eq!(store.check_read_version(store.version() + 1), Err(codes::FUTURE_VERSION));
        assert!(store.check_read_version(store.version()).is_ok());
    }

    #[test]
    fn test_watch_fires_on_change_only() {
        let mut store = Store::new();
        commit(&mut store, 1, vec![], vec![set("w", "old")]).unwrap();
        let (future, resolver) = future::pair();
        assert!(store.add_watch(b"w".to_vec(), Some(b"old".to_vec()), resolver).is_none());

        // Same value written again: still armed
        let (_, fired) = store
            .commit(CommitRequest {
                read_version: store.version(),
                read_conflicts: vec![],
                write_conflicts: vec![],
                mutations: vec![set("w", "old")],
            })
            .unwrap();
        assert!(fired.is_empty());
        assert_eq!(store.watch_count(), 1);

        let (_, fired) = store
            .commit(CommitRequest {
                read_version: store.version(),
                read_conflicts: vec![],
                write_conflicts: vec![],
                mutations: vec![set("w", "new")],
            })
            .unwrap();
        assert_eq!(fired.len(), 1);
        for resolver in fired {
            resolver.succeed(Payload::Void);
        }
        assert!(future.is_ready());
        assert_eq!(future.get_error(), 0);
    }

    #[test]
    fn test_watch_on_stale_value_fires_immediately() {
        let mut store = Store::new();
        commit(&mut store, 1, vec![], vec![set("w", "now")]).unwrap();
        let (_future, resolver) = future::pair();
        assert!(store.add_watch(b"w".to_vec(), None, resolver).is_some());
    }
}
