//! Result extraction strategies
//!
//! Each operation shape has one [`Extractor`] that reads a resolved future
//! and builds the host value for it. Extraction is the only place a store
//! error code is read, and host allocation failures are kept apart from
//! store errors in [`Extracted`].

use std::fmt;

use fdb_host::{Env, HostError, HostValue, Settled};
use fdb_native::{describe, ErrorCode, NativeError, NativeFuture};

use crate::version::encode_version;

/// A caller-supplied strategy.
pub type CustomExtractor = Box<dyn FnOnce(&mut Env, &dyn NativeFuture) -> Extracted>;

pub enum Extractor {
    /// Ignore the result; settles with an empty value.
    Void,
    /// A value or its absence.
    Value,
    Key,
    /// `{ results: [[key, value], ...], more }`
    KeyValues,
    StringArray,
    /// An 8-byte big-endian version buffer.
    Version,
    Custom(CustomExtractor),
}

/// What extraction produced.
#[derive(Debug)]
pub enum Extracted {
    /// Success. `None` is an empty result.
    Value(Option<HostValue>),
    /// The operation failed in the store.
    StoreError(ErrorCode),
    /// The host could not represent the result.
    HostError(HostError),
}

impl From<NativeError> for Extracted {
    fn from(e: NativeError) -> Self {
        Extracted::StoreError(e.code)
    }
}

impl From<Result<HostValue, HostError>> for Extracted {
    fn from(result: Result<HostValue, HostError>) -> Self {
        match result {
            Ok(value) => Extracted::Value(Some(value)),
            Err(e) => Extracted::HostError(e),
        }
    }
}

impl Extracted {
    /// Promise settlement: an empty result resolves to `null`.
    pub fn into_settled(self, env: &Env) -> Settled {
        match self {
            Extracted::Value(value) => Ok(value.unwrap_or(HostValue::Null)),
            Extracted::StoreError(code) => Err(env.create_store_error(describe(code), code)),
            Extracted::HostError(e) => Err(e.to_exception()),
        }
    }

    /// Callback arguments `(err, value)`. Unused slots are `undefined`.
    pub fn into_callback_args(self, env: &Env) -> [HostValue; 2] {
        match self.into_slots(env) {
            (Some(err), _) => [err, HostValue::Undefined],
            (None, value) => [HostValue::Undefined, value.unwrap_or(HostValue::Undefined)],
        }
    }

    fn into_slots(self, env: &Env) -> (Option<HostValue>, Option<HostValue>) {
        match self {
            Extracted::Value(value) => (None, value),
            Extracted::StoreError(code) => (Some(env.create_store_error(describe(code), code)), None),
            Extracted::HostError(e) => (Some(e.to_exception()), None),
        }
    }

    pub fn is_store_error(&self) -> bool {
        matches!(self, Extracted::StoreError(_))
    }
}

/// The raw error code of a resolved future, 0 on success. Watches use this
/// directly instead of an [`Extractor`].
pub fn error_code(future: &dyn NativeFuture) -> ErrorCode {
    future.get_error()
}

impl Extractor {
    pub fn extract(self, env: &mut Env, future: &dyn NativeFuture) -> Extracted {
        if let Extractor::Custom(custom) = self {
            return custom(env, future);
        }
        let code = error_code(future);
        if code != 0 {
            return Extracted::StoreError(code);
        }
        match self.read(env, future) {
            Ok(extracted) => extracted,
            Err(e) => e.into(),
        }
    }

    fn read(self, env: &mut Env, future: &dyn NativeFuture) -> Result<Extracted, NativeError> {
        let extracted = match self {
            Extractor::Void | Extractor::Custom(_) => Extracted::Value(None),
            Extractor::Value => match future.get_value()? {
                Some(bytes) => env.create_buffer(&bytes).into(),
                None => Extracted::Value(None),
            },
            Extractor::Key => env.create_buffer(&future.get_key()?).into(),
            Extractor::KeyValues => {
                let (items, more) = future.get_keyvalue_array()?;
                key_values(env, &items, more).into()
            }
            Extractor::StringArray => {
                let strings = future.get_string_array()?;
                Extracted::Value(Some(HostValue::Array(
                    strings.into_iter().map(HostValue::String).collect(),
                )))
            }
            Extractor::Version => env.create_buffer(&encode_version(future.get_version()?)).into(),
        };
        Ok(extracted)
    }
}

fn key_values(
    env: &Env,
    items: &[fdb_native::KeyValue],
    more: bool,
) -> Result<HostValue, HostError> {
    let mut results = Vec::with_capacity(items.len());
    for item in items {
        results.push(HostValue::Array(vec![
            env.create_buffer(&item.key)?,
            env.create_buffer(&item.value)?,
        ]));
    }
    Ok(HostValue::Object(vec![
        ("results".to_string(), HostValue::Array(results)),
        ("more".to_string(), HostValue::Bool(more)),
    ]))
}

impl fmt::Debug for Extractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Extractor::Void => "Void",
            Extractor::Value => "Value",
            Extractor::Key => "Key",
            Extractor::KeyValues => "KeyValues",
            Extractor::StringArray => "StringArray",
            Extractor::Version => "Version",
            Extractor::Custom(_) => "Custom",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fdb_host::HostConfig;
    use fdb_native::future::ready;
    use fdb_native::{codes, KeyValue, Payload};

    fn env() -> Env {
        let mut env = Env::default();
        env.register_error_class("FDBError");
        env
    }

    #[test]
    fn test_value_and_absent_value() {
        let mut env = env();
        let present = ready(Ok(Payload::Value(Some(b"hello".to_vec()))));
        let extracted = Extractor::Value.extract(&mut env, &present);
        assert_eq!(extracted.into_settled(&env), Ok(HostValue::buffer(*b"hello")));

        let absent = ready(Ok(Payload::Value(None)));
        let extracted = Extractor::Value.extract(&mut env, &absent);
        assert_eq!(extracted.into_settled(&env), Ok(HostValue::Null));
        let extracted = Extractor::Value.extract(&mut env, &absent);
        assert_eq!(
            extracted.into_callback_args(&env),
            [HostValue::Undefined, HostValue::Undefined]
        );
    }

    #[test]
    fn test_store_error_is_reported_with_code() {
        let mut env = env();
        let failed = ready(Err(codes::FUTURE_VERSION));
        let [err, value] = Extractor::Value.extract(&mut env, &failed).into_callback_args(&env);
        let err = err.as_error().unwrap();
        assert_eq!(err.code, Some(1009));
        assert_eq!(err.message, describe(1009));
        assert_eq!(value, HostValue::Undefined);
    }

    #[test]
    fn test_key_values_keep_order_and_more_flag() {
        let mut env = env();
        let items = vec![
            KeyValue::new(*b"b", *b"2"),
            KeyValue::new(*b"a", *b"1"),
            KeyValue::new(*b"c", *b"3"),
        ];
        for more in [true, false] {
            let future = ready(Ok(Payload::KeyValues {
                items: items.clone(),
                more,
            }));
            let value = Extractor::KeyValues
                .extract(&mut env, &future)
                .into_settled(&env)
                .unwrap();
            let keys: Vec<_> = value
                .get("results")
                .and_then(HostValue::as_array)
                .unwrap()
                .iter()
                .map(|pair| pair.as_array().unwrap()[0].clone())
                .collect();
            assert_eq!(
                keys,
                vec![HostValue::buffer(*b"b"), HostValue::buffer(*b"a"), HostValue::buffer(*b"c")]
            );
            assert_eq!(value.get("more"), Some(&HostValue::Bool(more)));
        }
    }

    #[test]
    fn test_version_is_big_endian_buffer() {
        let mut env = env();
        let future = ready(Ok(Payload::Version(0x0102_0304)));
        let value = Extractor::Version.extract(&mut env, &future).into_settled(&env);
        assert_eq!(value, Ok(HostValue::buffer(vec![0, 0, 0, 0, 1, 2, 3, 4])));
    }

    #[test]
    fn test_host_allocation_failure_is_not_a_store_error() {
        let mut env = Env::new(HostConfig {
            max_buffer_len: 2,
            ..HostConfig::default()
        });
        let future = ready(Ok(Payload::Value(Some(b"too long".to_vec()))));
        let extracted = Extractor::Value.extract(&mut env, &future);
        assert!(matches!(extracted, Extracted::HostError(HostError::BufferTooLarge { .. })));
        let err = extracted.into_settled(&env).unwrap_err();
        assert_eq!(err.as_error().unwrap().name, "RangeError");
    }

    #[test]
    fn test_payload_mismatch_surfaces_as_store_error() {
        let mut env = env();
        let future = ready(Ok(Payload::Void));
        assert!(Extractor::Version.extract(&mut env, &future).is_store_error());
    }

    #[test]
    fn test_void_ignores_payload() {
        let mut env = env();
        let future = ready(Ok(Payload::Version(5)));
        let settled = Extractor::Void.extract(&mut env, &future).into_settled(&env);
        assert_eq!(settled, Ok(HostValue::Null));
    }
}
