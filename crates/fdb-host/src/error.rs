//! Host error types

use thiserror::Error;

use crate::value::{ErrorObject, HostValue};

/// A fault the host cannot recover from. Returned by the event loop and
/// ends the run, the way an uncaught exception ends a process.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum HostFault {
    #[error("uncaught exception: {0}")]
    UncaughtException(String),

    #[error("unhandled promise rejection: {0}")]
    UnhandledRejection(String),
}

/// Failure to construct a host value.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HostError {
    #[error("cannot allocate a buffer of {len} bytes (limit is {limit})")]
    BufferTooLarge { len: usize, limit: usize },

    #[error("{0} is not a function")]
    NotAFunction(&'static str),
}

impl HostError {
    /// The exception a host would have pending after this failure.
    pub fn to_exception(&self) -> HostValue {
        let name = match self {
            HostError::BufferTooLarge { .. } => "RangeError",
            HostError::NotAFunction(_) => "TypeError",
        };
        HostValue::Error(ErrorObject::named(name, self.to_string()))
    }
}
