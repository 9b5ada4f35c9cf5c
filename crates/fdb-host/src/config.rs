//! Host runtime configuration (`[host]` section)

use serde::{Deserialize, Serialize};

/// Largest buffer the host will allocate, mirroring the usual 2^30 - 1 cap.
pub const DEFAULT_MAX_BUFFER_LEN: usize = (1 << 30) - 1;

/// What the host does with a rejected promise nobody is listening to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnhandledRejections {
    /// Treat it as a fatal process-level fault.
    #[default]
    Strict,
    /// Log a warning and carry on.
    Warn,
    /// Ignore it.
    None,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Buffers larger than this fail to allocate.
    pub max_buffer_len: usize,
    pub unhandled_rejections: UnhandledRejections,
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig {
            max_buffer_len: DEFAULT_MAX_BUFFER_LEN,
            unhandled_rejections: UnhandledRejections::Strict,
        }
    }
}
