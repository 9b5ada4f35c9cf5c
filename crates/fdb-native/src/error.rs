//! Store error codes
//!
//! Codes and messages follow the store client's own error table so that
//! host code can match on the numbers it already knows.

use thiserror::Error;

pub type ErrorCode = i32;

pub mod codes {
    use super::ErrorCode;

    pub const SUCCESS: ErrorCode = 0;
    pub const OPERATION_FAILED: ErrorCode = 1000;
    pub const TRANSACTION_TOO_OLD: ErrorCode = 1007;
    pub const FUTURE_VERSION: ErrorCode = 1009;
    pub const NOT_COMMITTED: ErrorCode = 1020;
    pub const COMMIT_UNKNOWN_RESULT: ErrorCode = 1021;
    pub const TRANSACTION_CANCELLED: ErrorCode = 1025;
    pub const TRANSACTION_TIMED_OUT: ErrorCode = 1031;
    pub const BROKEN_PROMISE: ErrorCode = 1100;
    pub const OPERATION_CANCELLED: ErrorCode = 1101;
    pub const FUTURE_RELEASED: ErrorCode = 1102;
    pub const CLIENT_INVALID_OPERATION: ErrorCode = 2000;
    pub const KEY_OUTSIDE_LEGAL_RANGE: ErrorCode = 2004;
    pub const INVERTED_RANGE: ErrorCode = 2005;
    pub const INVALID_OPTION_VALUE: ErrorCode = 2006;
    pub const NETWORK_NOT_SETUP: ErrorCode = 2008;
    pub const NETWORK_ALREADY_SETUP: ErrorCode = 2009;
    pub const READ_VERSION_ALREADY_SET: ErrorCode = 2010;
    pub const VERSION_INVALID: ErrorCode = 2011;
    pub const RANGE_LIMITS_INVALID: ErrorCode = 2012;
    pub const FUTURE_NOT_SET: ErrorCode = 2015;
    pub const USED_DURING_COMMIT: ErrorCode = 2017;
    pub const NO_COMMIT_VERSION: ErrorCode = 2021;
    pub const KEY_TOO_LARGE: ErrorCode = 2102;
    pub const VALUE_TOO_LARGE: ErrorCode = 2103;
    pub const API_VERSION_UNSET: ErrorCode = 2200;
    pub const API_VERSION_ALREADY_SET: ErrorCode = 2201;
    pub const API_VERSION_INVALID: ErrorCode = 2202;
    pub const API_VERSION_NOT_SUPPORTED: ErrorCode = 2203;
    pub const UNKNOWN_ERROR: ErrorCode = 4000;
    pub const INTERNAL_ERROR: ErrorCode = 4100;
}

/// Human-readable message for a store error code.
pub fn describe(code: ErrorCode) -> &'static str {
    use codes::*;
    match code {
        SUCCESS => "Success",
        OPERATION_FAILED => "Operation failed",
        TRANSACTION_TOO_OLD => "Transaction is too old to perform reads or be committed",
        FUTURE_VERSION => "Request for future version",
        NOT_COMMITTED => "Transaction not committed due to conflict with another transaction",
        COMMIT_UNKNOWN_RESULT => "Transaction may or may not have committed",
        TRANSACTION_CANCELLED => "Operation aborted because the transaction was cancelled",
        TRANSACTION_TIMED_OUT => "Operation aborted because the transaction timed out",
        BROKEN_PROMISE => "Broken promise",
        OPERATION_CANCELLED => "Asynchronous operation cancelled",
        FUTURE_RELEASED => "Future has been released",
        CLIENT_INVALID_OPERATION => "Invalid API call",
        KEY_OUTSIDE_LEGAL_RANGE => "Key outside legal range",
        INVERTED_RANGE => "Range begin key larger than end key",
        INVALID_OPTION_VALUE => "Option set with an invalid value",
        NETWORK_NOT_SETUP => "Action not possible before the network is configured",
        NETWORK_ALREADY_SETUP => "Network can be configured only once",
        READ_VERSION_ALREADY_SET => "Transaction already has a read version set",
        VERSION_INVALID => "Version not valid",
        RANGE_LIMITS_INVALID => "Range limits not valid",
        FUTURE_NOT_SET => "Future not ready",
        USED_DURING_COMMIT => "Operation issued while a commit was outstanding",
        NO_COMMIT_VERSION => "Transaction is read-only and therefore does not have a commit version",
        KEY_TOO_LARGE => "Key length exceeds limit",
        VALUE_TOO_LARGE => "Value length exceeds limit",
        API_VERSION_UNSET => "API version is not set",
        API_VERSION_ALREADY_SET => "API version may be set only once",
        API_VERSION_INVALID => "API version not valid",
        API_VERSION_NOT_SUPPORTED => "API version not supported",
        UNKNOWN_ERROR => "An unknown error occurred",
        INTERNAL_ERROR => "An internal error occurred",
        _ => "Unknown error",
    }
}

/// Error classes queried through [`error_predicate`]. The discriminants are
/// the store's predicate numbers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorPredicate {
    /// Worth retrying the whole transaction.
    Retryable = 50000,
    /// The transaction may have committed despite the error.
    MaybeCommitted = 50001,
    /// Retryable and known not to have committed.
    RetryableNotCommitted = 50002,
}

impl ErrorPredicate {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            50000 => Some(ErrorPredicate::Retryable),
            50001 => Some(ErrorPredicate::MaybeCommitted),
            50002 => Some(ErrorPredicate::RetryableNotCommitted),
            _ => None,
        }
    }
}

pub fn error_predicate(predicate: ErrorPredicate, code: ErrorCode) -> bool {
    use codes::*;
    let maybe_committed = code == COMMIT_UNKNOWN_RESULT;
    let not_committed = matches!(code, NOT_COMMITTED | TRANSACTION_TOO_OLD | FUTURE_VERSION);
    match predicate {
        ErrorPredicate::Retryable => maybe_committed || not_committed,
        ErrorPredicate::MaybeCommitted => maybe_committed,
        ErrorPredicate::RetryableNotCommitted => not_committed,
    }
}

/// A non-zero store error code.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("{} (code {code})", describe(*.code))]
pub struct NativeError {
    pub code: ErrorCode,
}

impl NativeError {
    pub fn new(code: ErrorCode) -> Self {
        NativeError { code }
    }

    pub fn message(&self) -> &'static str {
        describe(self.code)
    }

    pub fn is_retryable(&self) -> bool {
        error_predicate(ErrorPredicate::Retryable, self.code)
    }
}

impl From<ErrorCode> for NativeError {
    fn from(code: ErrorCode) -> Self {
        NativeError::new(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_known_and_unknown_codes() {
        assert_eq!(describe(codes::FUTURE_VERSION), "Request for future version");
        assert_eq!(describe(codes::OPERATION_CANCELLED), "Asynchronous operation cancelled");
        assert_eq!(describe(31337), "Unknown error");
    }

    #[test]
    fn test_predicates() {
        assert!(error_predicate(ErrorPredicate::Retryable, codes::NOT_COMMITTED));
        assert!(error_predicate(ErrorPredicate::Retryable, codes::COMMIT_UNKNOWN_RESULT));
        assert!(!error_predicate(ErrorPredicate::RetryableNotCommitted, codes::COMMIT_UNKNOWN_RESULT));
        assert!(error_predicate(ErrorPredicate::MaybeCommitted, codes::COMMIT_UNKNOWN_RESULT));
        assert!(!error_predicate(ErrorPredicate::Retryable, codes::TRANSACTION_CANCELLED));
        assert_eq!(ErrorPredicate::from_code(50002), Some(ErrorPredicate::RetryableNotCommitted));
        assert_eq!(ErrorPredicate::from_code(7), None);
    }

    #[test]
    fn test_native_error_display() {
        let err = NativeError::new(codes::NOT_COMMITTED);
        assert_eq!(
            err.to_string(),
            "Transaction not committed due to conflict with another transaction (code 1020)"
        );
        assert!(err.is_retryable());
    }
}
