//! Completion bridge between store futures and the host loop
//!
//! Store operations resolve on library threads; host values may only be
//! touched on the loop thread. The bridge carries each resolution across:
//!
//! - [`Bridge`]: registers futures, counts outstanding work and keeps the
//!   loop alive exactly while some is pending
//! - [`Dispatcher`]: the many-producer queue the ready callbacks feed
//! - [`Extractor`]: turns a resolved future into a host value
//! - [`Delivery`]: promise or `(err, value)` callback, chosen per call
//! - [`Watch`]: a cancellable change subscription
//! - [`binding`]: the database and transaction objects built on top

pub mod binding;
pub mod bridge;
pub mod completion;
pub mod config;
pub mod delivery;
pub mod dispatch;
pub mod error;
pub mod extract;
pub mod scratch;
pub mod version;
pub mod watch;

pub use bridge::{Bridge, BridgeStats};
pub use completion::{Completion, Continuation};
pub use config::{BridgeConfig, Config, ConfigError};
pub use delivery::Delivery;
pub use dispatch::{CompletionId, Dispatcher};
pub use error::BridgeError;
pub use extract::{Extracted, Extractor};
pub use scratch::{to_string_params, ScratchBuffer, StringParams, DEFAULT_SCRATCH_CAPACITY};
pub use version::{decode_version, encode_version};
pub use watch::{Watch, WatchPolicy, WatchState};
