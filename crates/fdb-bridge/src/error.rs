//! Bridge error types

use fdb_host::{Env, ErrorObject, HostError, HostValue};
use fdb_native::NativeError;
use thiserror::Error;

/// A structural failure reported synchronously to whoever issued the
/// operation. Store errors met while delivering a result never take this
/// path; they settle the operation's promise or callback instead.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum BridgeError {
    #[error("bridge has been torn down")]
    Closed,

    #[error("Invalid callback argument call")]
    InvalidCallback,

    #[error("Invalid param - must be string, buffer or arraybuffer")]
    InvalidParam,

    #[error("Invalid version buffer - must be 8 bytes")]
    InvalidVersion,

    #[error("Cannot create transaction after db closed")]
    DatabaseClosed,

    #[error("foundationdb already initialized with another API version")]
    ApiVersionMismatch,

    #[error(transparent)]
    Native(#[from] NativeError),

    #[error(transparent)]
    Host(#[from] HostError),
}

impl BridgeError {
    /// The exception to throw into the host for this error.
    pub fn to_exception(&self, env: &Env) -> HostValue {
        match self {
            BridgeError::Native(e) => env.create_store_error(e.message(), e.code),
            BridgeError::Host(e) => e.to_exception(),
            other => HostValue::Error(ErrorObject::new(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fdb_native::codes;

    #[test]
    fn test_native_errors_become_store_errors() {
        let mut env = Env::default();
        env.register_error_class("FDBError");
        let err = BridgeError::from(NativeError::new(codes::NOT_COMMITTED)).to_exception(&env);
        let err = err.as_error().unwrap();
        assert_eq!(err.name, "FDBError");
        assert_eq!(err.code, Some(codes::NOT_COMMITTED));
    }

    #[test]
    fn test_structural_errors_keep_their_message() {
        let env = Env::default();
        let err = BridgeError::InvalidVersion.to_exception(&env);
        assert_eq!(
            err.as_error().unwrap().message,
            "Invalid version buffer - must be 8 bytes"
        );
    }
}
