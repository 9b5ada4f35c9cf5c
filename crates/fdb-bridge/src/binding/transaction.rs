//! Host-facing transaction object
//!
//! Every asynchronous method takes the callback argument last and returns
//! what the host call evaluates to: a promise when the argument is
//! `undefined`/`null`, `undefined` when it is a function. The argument is
//! checked before the operation is issued, so a bad callback never leaves
//! an orphaned future behind.

use fdb_host::{Env, HostValue};
use fdb_native::{codes, ErrorCode, KeySelector, MutationType, NativeError, RangeOptions};

use crate::bridge::Bridge;
use crate::delivery::Delivery;
use crate::error::BridgeError;
use crate::extract::Extractor;
use crate::version::{decode_version, encode_version};
use crate::watch::{Watch, WatchPolicy};

/// One end of a range read, as the host passes it.
#[derive(Clone, Debug)]
pub struct SelectorArg {
    pub key: HostValue,
    pub or_equal: bool,
    pub offset: i32,
}

impl SelectorArg {
    pub fn first_greater_or_equal(key: HostValue) -> Self {
        SelectorArg {
            key,
            or_equal: false,
            offset: 1,
        }
    }

    fn to_selector(&self, bridge: &Bridge) -> Result<KeySelector, BridgeError> {
        let key = bridge.string_params(&self.key)?;
        Ok(KeySelector::new(key.as_bytes(), self.or_equal, self.offset))
    }
}

#[derive(Clone, Debug)]
pub struct RangeArgs {
    pub begin: SelectorArg,
    pub end: SelectorArg,
    /// 0 for one default-sized batch.
    pub limit: usize,
    pub reverse: bool,
    pub snapshot: bool,
}

impl RangeArgs {
    /// Every key in `[begin, end)`.
    pub fn keys(begin: HostValue, end: HostValue) -> Self {
        RangeArgs {
            begin: SelectorArg::first_greater_or_equal(begin),
            end: SelectorArg::first_greater_or_equal(end),
            limit: 0,
            reverse: false,
            snapshot: false,
        }
    }
}

pub struct Transaction {
    bridge: Bridge,
    tx: fdb_native::Transaction,
}

impl Transaction {
    pub(crate) fn new(bridge: Bridge, tx: fdb_native::Transaction) -> Self {
        Transaction { bridge, tx }
    }

    pub fn commit(&self, callback: &HostValue) -> Result<HostValue, BridgeError> {
        let delivery = Delivery::from_arg(callback)?;
        self.bridge.deliver(self.tx.commit(), Extractor::Void, delivery)
    }

    pub fn reset(&self) {
        self.tx.reset();
    }

    pub fn cancel(&self) {
        self.tx.cancel();
    }

    /// Resolves once the transaction may be retried after `code`; rejects
    /// with `code` when it is not retryable.
    pub fn on_error(&self, code: ErrorCode, callback: &HostValue) -> Result<HostValue, BridgeError> {
        let delivery = Delivery::from_arg(callback)?;
        self.bridge.deliver(self.tx.on_error(code), Extractor::Void, delivery)
    }

    pub fn get(
        &self,
        key: &HostValue,
        snapshot: bool,
        callback: &HostValue,
    ) -> Result<HostValue, BridgeError> {
        let delivery = Delivery::from_arg(callback)?;
        let future = {
            let key = self.bridge.string_params(key)?;
            self.tx.get(key.as_bytes(), snapshot)
        };
        self.bridge.deliver(future, Extractor::Value, delivery)
    }

    pub fn get_key(
        &self,
        key: &HostValue,
        or_equal: bool,
        offset: i32,
        snapshot: bool,
        callback: &HostValue,
    ) -> Result<HostValue, BridgeError> {
        let delivery = Delivery::from_arg(callback)?;
        let selector = SelectorArg {
            key: key.clone(),
            or_equal,
            offset,
        }
        .to_selector(&self.bridge)?;
        self.bridge
            .deliver(self.tx.get_key(&selector, snapshot), Extractor::Key, delivery)
    }

    pub fn get_range(&self, args: &RangeArgs, callback: &HostValue) -> Result<HostValue, BridgeError> {
        let delivery = Delivery::from_arg(callback)?;
        let begin = args.begin.to_selector(&self.bridge)?;
        let end = args.end.to_selector(&self.bridge)?;
        let options = RangeOptions {
            limit: args.limit,
            reverse: args.reverse,
        };
        let future = self.tx.get_range(&begin, &end, options, args.snapshot);
        self.bridge.deliver(future, Extractor::KeyValues, delivery)
    }

    pub fn set(&self, key: &HostValue, value: &HostValue) -> Result<(), BridgeError> {
        let key = self.bridge.string_params(key)?;
        let value = self.bridge.string_params(value)?;
        self.tx.set(key.as_bytes(), value.as_bytes());
        Ok(())
    }

    pub fn clear(&self, key: &HostValue) -> Result<(), BridgeError> {
        let key = self.bridge.string_params(key)?;
        self.tx.clear(key.as_bytes());
        Ok(())
    }

    pub fn clear_range(&self, begin: &HostValue, end: &HostValue) -> Result<(), BridgeError> {
        let begin = self.bridge.string_params(begin)?;
        let end = self.bridge.string_params(end)?;
        self.tx.clear_range(begin.as_bytes(), end.as_bytes());
        Ok(())
    }

    /// Apply an atomic mutation, identified by the store's operation code.
    pub fn atomic_op(&self, op: i32, key: &HostValue, param: &HostValue) -> Result<(), BridgeError> {
        let op = MutationType::from_code(op).ok_or_else(|| NativeError::new(codes::INVALID_OPTION_VALUE))?;
        let key = self.bridge.string_params(key)?;
        let param = self.bridge.string_params(param)?;
        self.tx.atomic_op(op, key.as_bytes(), param.as_bytes());
        Ok(())
    }

    pub fn add_read_conflict_range(&self, begin: &HostValue, end: &HostValue) -> Result<(), BridgeError> {
        let begin = self.bridge.string_params(begin)?;
        let end = self.bridge.string_params(end)?;
        Ok(self.tx.add_read_conflict_range(begin.as_bytes(), end.as_bytes())?)
    }

    pub fn add_write_conflict_range(&self, begin: &HostValue, end: &HostValue) -> Result<(), BridgeError> {
        let begin = self.bridge.string_params(begin)?;
        let end = self.bridge.string_params(end)?;
        Ok(self.tx.add_write_conflict_range(begin.as_bytes(), end.as_bytes())?)
    }

    /// Watch `key`. With `ignore_standard_errors` the watch settles `false`
    /// instead of rejecting when it is cancelled or its transaction fails.
    pub fn watch(&self, key: &HostValue, ignore_standard_errors: bool) -> Result<Watch, BridgeError> {
        let future = {
            let key = self.bridge.string_params(key)?;
            self.tx.watch(key.as_bytes())
        };
        let policy = WatchPolicy::from_config(self.bridge.config())
            .ignore_standard_errors(ignore_standard_errors);
        self.bridge.watch(future, policy)
    }

    pub fn get_read_version(&self, callback: &HostValue) -> Result<HostValue, BridgeError> {
        let delivery = Delivery::from_arg(callback)?;
        self.bridge
            .deliver(self.tx.get_read_version(), Extractor::Version, delivery)
    }

    /// Pin the read version to an 8-byte version buffer.
    pub fn set_read_version(&self, version: &HostValue) -> Result<(), BridgeError> {
        let bytes = version.as_buffer().ok_or(BridgeError::InvalidVersion)?;
        self.tx.set_read_version(decode_version(bytes)?)?;
        Ok(())
    }

    /// The commit version as an 8-byte buffer. Synchronous.
    pub fn get_committed_version(&self, env: &Env) -> Result<HostValue, BridgeError> {
        let version = self.tx.get_committed_version();
        Ok(env.create_buffer(&encode_version(version))?)
    }

    pub fn get_versionstamp(&self, callback: &HostValue) -> Result<HostValue, BridgeError> {
        let delivery = Delivery::from_arg(callback)?;
        self.bridge
            .deliver(self.tx.get_versionstamp(), Extractor::Key, delivery)
    }

    pub fn get_addresses_for_key(&self, key: &HostValue, callback: &HostValue) -> Result<HostValue, BridgeError> {
        let delivery = Delivery::from_arg(callback)?;
        let future = {
            let key = self.bridge.string_params(key)?;
            self.tx.get_addresses_for_key(key.as_bytes())
        };
        self.bridge.deliver(future, Extractor::StringArray, delivery)
    }
}
