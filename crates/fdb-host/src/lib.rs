//! Host runtime for the store bridge
//!
//! Models the single-threaded runtime the store client is embedded in:
//! - Host values (buffers, strings, arrays, objects, functions, errors)
//! - Promises with one-shot resolvers and microtask reactions
//! - Unhandled rejection and fatal exception escalation
//! - An event loop with keep-alive references and thread-safe wake-ups
//!
//! Nothing in this crate is `Send` except [`AsyncHandle`] and [`KeepAlive`],
//! which are the only ways other threads can reach the loop.

pub mod config;
pub mod env;
pub mod error;
pub mod event_loop;
pub mod promise;
pub mod value;

pub use config::{HostConfig, UnhandledRejections};
pub use env::Env;
pub use error::{HostError, HostFault};
pub use event_loop::{AsyncHandle, EventLoop, KeepAlive, LoopExit};
pub use promise::{Deferred, Promise, PromiseState, Settled};
pub use value::{ErrorObject, HostFunction, HostValue};
