//! CLI command implementations

pub mod bench;
pub mod kv;
pub mod session;
pub mod version;
pub mod watch;
