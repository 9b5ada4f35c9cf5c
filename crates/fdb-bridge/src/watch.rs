//! Watch subscriptions
//!
//! A [`Watch`] is a promise for "the key changed" plus a `cancel()` that
//! may be called at any time. The continuation unlinks the watch from its
//! completion before settling, so a late `cancel()` finds nothing to
//! cancel instead of touching a future that has already resolved.

use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};

use fdb_host::{Deferred, HostValue, Promise};
use fdb_native::{codes, describe, ErrorCode, NativeFuture};
use serde::Serialize;

use crate::bridge::{Bridge, BridgeInner};
use crate::config::BridgeConfig;
use crate::dispatch::CompletionId;
use crate::error::BridgeError;
use crate::extract::error_code;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchState {
    /// Registered, not yet resolved.
    Active,
    /// The key changed; settled `true`.
    Resolved,
    /// Ended by a benign error; settled `false`.
    Aborted,
    /// Ended by any other error; rejected.
    Failed,
}

/// How a watch treats error resolutions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchPolicy {
    /// Settle `false` on a benign error instead of rejecting.
    pub ignore_standard_errors: bool,
    pub benign_errors: Vec<ErrorCode>,
}

impl Default for WatchPolicy {
    fn default() -> Self {
        WatchPolicy {
            ignore_standard_errors: true,
            benign_errors: vec![
                codes::OPERATION_CANCELLED,
                codes::TRANSACTION_CANCELLED,
                codes::NOT_COMMITTED,
            ],
        }
    }
}

impl WatchPolicy {
    /// Every error rejects.
    pub fn strict() -> Self {
        WatchPolicy {
            ignore_standard_errors: false,
            ..WatchPolicy::default()
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        WatchPolicy {
            ignore_standard_errors: config.ignore_standard_errors,
            benign_errors: config.benign_watch_errors.clone(),
        }
    }

    pub fn ignore_standard_errors(mut self, ignore: bool) -> Self {
        self.ignore_standard_errors = ignore;
        self
    }

    /// `Ok(true)` for a change, `Ok(false)` for a benign abort, `Err(code)`
    /// for a failure.
    pub fn classify(&self, code: ErrorCode) -> Result<bool, ErrorCode> {
        if code == codes::SUCCESS {
            Ok(true)
        } else if self.ignore_standard_errors && self.benign_errors.contains(&code) {
            Ok(false)
        } else {
            Err(code)
        }
    }
}

struct WatchLink {
    /// The completion to cancel; cleared when the watch resolves.
    id: Cell<Option<CompletionId>>,
    bridge: Weak<BridgeInner>,
    state: Cell<WatchState>,
    cancel_requested: Cell<bool>,
}

/// A live watch subscription. Clones share the same subscription.
#[derive(Clone)]
pub struct Watch {
    link: Rc<WatchLink>,
    promise: Promise,
}

impl Watch {
    pub(crate) fn arm(
        bridge: &Bridge,
        future: Box<dyn NativeFuture>,
        policy: WatchPolicy,
    ) -> Result<Watch, BridgeError> {
        let (deferred, promise) = Deferred::new();
        let link = Rc::new(WatchLink {
            id: Cell::new(None),
            bridge: bridge.downgrade(),
            state: Cell::new(WatchState::Active),
            cancel_requested: Cell::new(false),
        });

        let resolved = link.clone();
        let id = bridge.register(
            future,
            Box::new(move |env, future| {
                resolved.id.set(None);
                match policy.classify(error_code(future)) {
                    Ok(changed) => {
                        resolved.state.set(if changed {
                            WatchState::Resolved
                        } else {
                            WatchState::Aborted
                        });
                        deferred.resolve(env, HostValue::Bool(changed));
                    }
                    Err(code) => {
                        resolved.state.set(WatchState::Failed);
                        let error = env.create_store_error(describe(code), code);
                        deferred.reject(env, error);
                    }
                }
                Ok(())
            }),
        )?;
        link.id.set(Some(id));
        Ok(Watch { link, promise })
    }

    /// Ask the store to cancel the watch. Only the first call while the
    /// watch is unresolved does anything; returns whether it did.
    pub fn cancel(&self) -> bool {
        let link = &self.link;
        if link.cancel_requested.get() {
            return false;
        }
        let (Some(id), Some(bridge)) = (link.id.get(), link.bridge.upgrade()) else {
            return false;
        };
        link.cancel_requested.set(true);
        bridge.cancel_unfired(id)
    }

    pub fn promise(&self) -> &Promise {
        &self.promise
    }

    pub fn state(&self) -> WatchState {
        self.link.state.get()
    }

    /// Whether the watch still refers to a live completion.
    pub fn is_linked(&self) -> bool {
        self.link.id.get().is_some()
    }

    /// The host object `{ cancel(), promise }`.
    pub fn to_host_value(&self) -> HostValue {
        let watch = self.clone();
        HostValue::Object(vec![
            (
                "cancel".to_string(),
                HostValue::function("cancel", move |_, _| {
                    watch.cancel();
                    Ok(HostValue::Undefined)
                }),
            ),
            ("promise".to_string(), HostValue::Promise(self.promise.clone())),
        ])
    }
}

impl fmt::Debug for Watch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watch")
            .field("state", &self.state())
            .field("linked", &self.is_linked())
            .finish()
    }
}
