//! Promise implementation
//!
//! A promise is created together with its [`Deferred`] resolver. The
//! resolver is consumed by `resolve`/`reject`, so a promise settles at most
//! once by construction. Reactions registered with `then`/`on_settled` run
//! as microtasks on the next [`Env::run_microtasks`].

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::env::Env;
use crate::value::{HostFunction, HostValue};

/// Promise state
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PromiseState {
    Pending,
    Fulfilled,
    Rejected,
}

/// Outcome of a settled promise: `Ok(value)` or `Err(reason)`.
pub type Settled = Result<HostValue, HostValue>;

type Reaction = Box<dyn FnOnce(&mut Env, Settled)>;

struct Inner {
    state: PromiseState,
    /// The value if fulfilled, the reason if rejected
    result: HostValue,
    reactions: Vec<Reaction>,
    /// Set once anything observes the promise
    handled: bool,
}

impl Inner {
    fn outcome(&self) -> Settled {
        match self.state {
            PromiseState::Rejected => Err(self.result.clone()),
            _ => Ok(self.result.clone()),
        }
    }
}

#[derive(Clone)]
pub struct Promise(Rc<RefCell<Inner>>);

/// The one-shot resolver for a [`Promise`].
pub struct Deferred {
    promise: Promise,
}

impl Deferred {
    /// Create a pending promise and its resolver.
    pub fn new() -> (Deferred, Promise) {
        let promise = Promise(Rc::new(RefCell::new(Inner {
            state: PromiseState::Pending,
            result: HostValue::Undefined,
            reactions: Vec::new(),
            handled: false,
        })));
        (
            Deferred {
                promise: promise.clone(),
            },
            promise,
        )
    }

    pub fn promise(&self) -> &Promise {
        &self.promise
    }

    pub fn resolve(self, env: &mut Env, value: HostValue) {
        self.promise.settle(env, PromiseState::Fulfilled, value);
    }

    pub fn reject(self, env: &mut Env, reason: HostValue) {
        self.promise.settle(env, PromiseState::Rejected, reason);
    }

    pub fn settle(self, env: &mut Env, outcome: Settled) {
        match outcome {
            Ok(value) => self.resolve(env, value),
            Err(reason) => self.reject(env, reason),
        }
    }
}

impl Promise {
    /// A promise that is already fulfilled.
    pub fn resolved(env: &mut Env, value: HostValue) -> Promise {
        let (deferred, promise) = Deferred::new();
        deferred.resolve(env, value);
        promise
    }

    /// A promise that is already rejected.
    pub fn rejected(env: &mut Env, reason: HostValue) -> Promise {
        let (deferred, promise) = Deferred::new();
        deferred.reject(env, reason);
        promise
    }

    pub fn state(&self) -> PromiseState {
        self.0.borrow().state
    }

    pub fn is_pending(&self) -> bool {
        self.state() == PromiseState::Pending
    }

    /// The settled outcome, or `None` while pending.
    pub fn outcome(&self) -> Option<Settled> {
        let inner = self.0.borrow();
        match inner.state {
            PromiseState::Pending => None,
            _ => Some(inner.outcome()),
        }
    }

    /// Whether a reaction has been attached.
    pub fn is_handled(&self) -> bool {
        self.0.borrow().handled
    }

    pub fn ptr_eq(&self, other: &Promise) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn settle(&self, env: &mut Env, state: PromiseState, result: HostValue) {
        let (reactions, outcome, unobserved) = {
            let mut inner = self.0.borrow_mut();
            if inner.state != PromiseState::Pending {
                return;
            }
            inner.state = state;
            inner.result = result;
            (
                std::mem::take(&mut inner.reactions),
                inner.outcome(),
                !inner.handled,
            )
        };

        if state == PromiseState::Rejected && unobserved {
            env.track_rejection(self.clone());
        }

        for reaction in reactions {
            let outcome = outcome.clone();
            env.enqueue_microtask(Box::new(move |env| reaction(env, outcome)));
        }
    }

    /// Run `reaction` once the promise settles (immediately queued if it
    /// already has). Marks the promise handled.
    pub fn on_settled<F>(&self, env: &mut Env, reaction: F)
    where
        F: FnOnce(&mut Env, Settled) + 'static,
    {
        let mut inner = self.0.borrow_mut();
        inner.handled = true;
        if inner.state == PromiseState::Pending {
            inner.reactions.push(Box::new(reaction));
        } else {
            let outcome = inner.outcome();
            drop(inner);
            env.enqueue_microtask(Box::new(move |env| reaction(env, outcome)));
        }
    }

    /// Register fulfillment/rejection handlers, returns a new promise for chaining
    pub fn then(
        &self,
        env: &mut Env,
        on_fulfilled: Option<HostFunction>,
        on_rejected: Option<HostFunction>,
    ) -> Promise {
        let (next, promise) = Deferred::new();
        self.on_settled(env, move |env, outcome| {
            let handler = match &outcome {
                Ok(_) => on_fulfilled,
                Err(_) => on_rejected,
            };
            match handler {
                Some(handler) => {
                    let arg = match outcome {
                        Ok(v) | Err(v) => v,
                    };
                    let result = handler.invoke(env, &[arg]);
                    next.settle(env, result);
                }
                // No handler for this state: pass the outcome down the chain
                None => next.settle(env, outcome),
            }
        });
        promise
    }

    /// Equivalent to `.catch(onRejected)`
    pub fn catch(&self, env: &mut Env, on_rejected: HostFunction) -> Promise {
        self.then(env, None, Some(on_rejected))
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.0.borrow();
        match inner.state {
            PromiseState::Pending => write!(f, "Promise {{ <pending> }}"),
            PromiseState::Fulfilled => write!(f, "Promise {{ {:?} }}", inner.result),
            PromiseState::Rejected => write!(f, "Promise {{ <rejected> {:?} }}", inner.result),
        }
    }
}
