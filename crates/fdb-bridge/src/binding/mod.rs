//! Binding surface
//!
//! The objects a host program sees: module functions, the database and
//! transactions. Each asynchronous call issues a store operation and hands
//! its future to the [`Bridge`](crate::Bridge).

pub mod database;
pub mod module;
pub mod transaction;

pub use database::Database;
pub use module::{database_from_value, error_predicate, open_database, open_database_sync, set_api_version};
pub use transaction::{RangeArgs, SelectorArg, Transaction};
