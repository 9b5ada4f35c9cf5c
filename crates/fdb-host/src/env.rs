//! Per-loop host state
//!
//! `Env` is what every main-thread callback receives. It owns the microtask
//! queue, tracks rejected promises until someone observes them, constructs
//! host values that can fail (buffers, store errors) and records the first
//! fatal fault.

use std::collections::VecDeque;

use crate::config::{HostConfig, UnhandledRejections};
use crate::error::{HostError, HostFault};
use crate::promise::Promise;
use crate::value::{ErrorObject, HostFunction, HostValue};

pub(crate) type Microtask = Box<dyn FnOnce(&mut Env)>;

/// Message used when the store error class has not been registered.
pub const MISSING_ERROR_CLASS: &str = "FDBError class not found. Unable to deliver error.";

pub struct Env {
    config: HostConfig,
    microtasks: VecDeque<Microtask>,
    pending_rejections: Vec<Promise>,
    error_class: Option<String>,
    fault: Option<HostFault>,
}

impl Env {
    pub fn new(config: HostConfig) -> Self {
        Env {
            config,
            microtasks: VecDeque::new(),
            pending_rejections: Vec::new(),
            error_class: None,
            fault: None,
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Register the error class store errors are delivered as.
    pub fn register_error_class(&mut self, name: &str) {
        self.error_class = Some(name.to_string());
    }

    pub fn error_class(&self) -> Option<&str> {
        self.error_class.as_deref()
    }

    /// Copy `bytes` into a new host buffer.
    pub fn create_buffer(&self, bytes: &[u8]) -> Result<HostValue, HostError> {
        if bytes.len() > self.config.max_buffer_len {
            return Err(HostError::BufferTooLarge {
                len: bytes.len(),
                limit: self.config.max_buffer_len,
            });
        }
        Ok(HostValue::Buffer(bytes.to_vec()))
    }

    /// Build the host error object for a store error. Falls back to a plain
    /// `Error` with a fixed diagnostic when no error class is registered.
    pub fn create_store_error(&self, message: &str, code: i32) -> HostValue {
        let error = match &self.error_class {
            Some(class) => ErrorObject::named(class, message).with_code(code),
            None => ErrorObject::new(MISSING_ERROR_CLASS),
        };
        HostValue::Error(error)
    }

    pub fn call_function(
        &mut self,
        function: &HostFunction,
        args: &[HostValue],
    ) -> Result<HostValue, HostValue> {
        function.invoke(self, args)
    }

    /// Call a value that should be a function.
    pub fn call_value(&mut self, value: &HostValue, args: &[HostValue]) -> Result<HostValue, HostValue> {
        match value {
            HostValue::Function(f) => f.invoke(self, args),
            _ => Err(HostError::NotAFunction("callback").to_exception()),
        }
    }

    /// Escalate an exception nothing can catch. The first fault wins.
    pub fn fatal_exception(&mut self, exception: HostValue) {
        let message = exception.describe();
        log::error!("fatal exception: {}", message);
        if self.fault.is_none() {
            self.fault = Some(HostFault::UncaughtException(message));
        }
    }

    pub fn has_fault(&self) -> bool {
        self.fault.is_some()
    }

    pub fn take_fault(&mut self) -> Option<HostFault> {
        self.fault.take()
    }

    pub(crate) fn enqueue_microtask(&mut self, task: Microtask) {
        self.microtasks.push_back(task);
    }

    pub(crate) fn track_rejection(&mut self, promise: Promise) {
        self.pending_rejections.push(promise);
    }

    pub fn pending_microtasks(&self) -> usize {
        self.microtasks.len()
    }

    /// Run microtasks until the queue is empty, then report rejections
    /// nobody handled. Returns the number of microtasks run.
    pub fn run_microtasks(&mut self) -> usize {
        let mut ran = 0;
        while let Some(task) = self.microtasks.pop_front() {
            task(self);
            ran += 1;
        }
        self.check_rejections();
        ran
    }

    fn check_rejections(&mut self) {
        for promise in std::mem::take(&mut self.pending_rejections) {
            if promise.is_handled() {
                continue;
            }
            let reason = match promise.outcome() {
                Some(Err(reason)) => reason.describe(),
                _ => continue,
            };
            match self.config.unhandled_rejections {
                UnhandledRejections::Strict => {
                    log::error!("unhandled promise rejection: {}", reason);
                    if self.fault.is_none() {
                        self.fault = Some(HostFault::UnhandledRejection(reason));
                    }
                }
                UnhandledRejections::Warn => {
                    log::warn!("unhandled promise rejection: {}", reason);
                }
                UnhandledRejections::None => {}
            }
        }
    }
}

impl Default for Env {
    fn default() -> Self {
        Env::new(HostConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_uses_registered_class() {
        let mut env = Env::default();
        env.register_error_class("FDBError");
        let err = env.create_store_error("Request for future version", 1009);
        let err = err.as_error().unwrap();
        assert_eq!(err.name, "FDBError");
        assert_eq!(err.code, Some(1009));
    }

    #[test]
    fn test_store_error_falls_back_without_class() {
        let env = Env::default();
        let err = env.create_store_error("Request for future version", 1009);
        let err = err.as_error().unwrap();
        assert_eq!(err.name, "Error");
        assert_eq!(err.message, MISSING_ERROR_CLASS);
        assert_eq!(err.code, None);
    }

    #[test]
    fn test_buffer_limit() {
        let env = Env::new(HostConfig {
            max_buffer_len: 4,
            ..HostConfig::default()
        });
        assert!(env.create_buffer(b"1234").is_ok());
        assert_eq!(
            env.create_buffer(b"12345"),
            Err(HostError::BufferTooLarge { len: 5, limit: 4 })
        );
    }

    #[test]
    fn test_first_fatal_exception_wins() {
        let mut env = Env::default();
        env.fatal_exception(HostValue::from("first"));
        env.fatal_exception(HostValue::from("second"));
        assert_eq!(
            env.take_fault(),
            Some(HostFault::UncaughtException("\"first\"".to_string()))
        );
        assert!(env.take_fault().is_none());
    }

    #[test]
    fn test_call_value_rejects_non_functions() {
        let mut env = Env::default();
        let err = env.call_value(&HostValue::Number(1.0), &[]).unwrap_err();
        assert_eq!(err.as_error().unwrap().name, "TypeError");
    }
}
