//! Completion handles
//!
//! A [`Completion`] owns one native future plus the continuation that turns
//! its resolution into host-visible effects. It is created on the main
//! thread when an operation is issued and consumed on the main thread when
//! the future's ready callback has been dispatched back.

use std::fmt;

use fdb_host::{Env, HostValue};
use fdb_native::NativeFuture;

/// Runs on the main thread with the resolved future. An `Err` is an
/// exception nothing can catch any more.
pub type Continuation = Box<dyn FnOnce(&mut Env, &dyn NativeFuture) -> Result<(), HostValue>>;

pub struct Completion {
    future: Box<dyn NativeFuture>,
    continuation: Continuation,
}

impl Completion {
    pub fn new(future: Box<dyn NativeFuture>, continuation: Continuation) -> Self {
        Completion {
            future,
            continuation,
        }
    }

    pub fn future(&self) -> &dyn NativeFuture {
        self.future.as_ref()
    }

    /// Run the continuation, then destroy the future. An exception escaping
    /// the continuation becomes a fatal fault.
    pub fn run(self, env: &mut Env) {
        let Completion {
            future,
            continuation,
        } = self;
        if let Err(exception) = continuation(env, future.as_ref()) {
            env.fatal_exception(exception);
        }
        drop(future);
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("ready", &self.future.is_ready())
            .finish_non_exhaustive()
    }
}
