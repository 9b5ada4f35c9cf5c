//! Store client boundary
//!
//! This crate is the "library side" of the bridge: everything here may run
//! on network worker threads and nothing here knows about the host.
//!
//! - [`NativeFuture`]: the future handle every asynchronous operation returns
//! - [`error`]: store error codes, messages and predicates
//! - [`network`]: API version selection and the worker thread pool
//! - [`Database`] / [`Transaction`]: an in-memory multi-version store with
//!   optimistic conflict checking, read-your-writes and watches

pub mod database;
pub mod error;
pub mod future;
pub mod mutation;
pub mod network;
mod store;
pub mod transaction;

pub use database::Database;
pub use error::{codes, describe, error_predicate, ErrorCode, ErrorPredicate, NativeError};
pub use future::{KeyValue, NativeFuture, Outcome, Payload, Resolver, StoreFuture};
pub use mutation::{KeyRange, KeySelector, MutationType};
pub use network::{select_api_version, Network, NetworkConfig, MAX_API_VERSION};
pub use store::MVCC_WINDOW;
pub use transaction::{RangeOptions, Transaction};
