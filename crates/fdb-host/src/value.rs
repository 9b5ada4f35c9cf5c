//! Host value representation
//!
//! Every value the bridge hands to host code is a [`HostValue`]. Functions,
//! promises and external objects are reference counted and tied to the
//! main thread.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::env::Env;
use crate::promise::Promise;

/// Body of a host function. `Err` carries a thrown exception.
pub type NativeFn = dyn Fn(&mut Env, &[HostValue]) -> Result<HostValue, HostValue>;

/// A callable host function
#[derive(Clone)]
pub struct HostFunction {
    name: Rc<str>,
    body: Rc<NativeFn>,
}

impl HostFunction {
    pub fn new<F>(name: &str, body: F) -> Self
    where
        F: Fn(&mut Env, &[HostValue]) -> Result<HostValue, HostValue> + 'static,
    {
        HostFunction {
            name: Rc::from(name),
            body: Rc::new(body),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn invoke(&self, env: &mut Env, args: &[HostValue]) -> Result<HostValue, HostValue> {
        (self.body)(env, args)
    }

    pub fn ptr_eq(&self, other: &HostFunction) -> bool {
        Rc::ptr_eq(&self.body, &other.body)
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Function: {}]", self.name)
    }
}

/// An error instance: `name`, `message` and the store error code if any.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorObject {
    pub name: String,
    pub message: String,
    pub code: Option<i32>,
}

impl ErrorObject {
    pub fn new(message: impl Into<String>) -> Self {
        ErrorObject::named("Error", message)
    }

    pub fn named(name: &str, message: impl Into<String>) -> Self {
        ErrorObject {
            name: name.to_string(),
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: i32) -> Self {
        self.code = Some(code);
        self
    }
}

impl fmt::Display for ErrorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{}: {} (code {})", self.name, self.message, code),
            None => write!(f, "{}: {}", self.name, self.message),
        }
    }
}

/// An opaque native object wrapped for the host.
pub type External = Rc<dyn Any>;

#[derive(Clone)]
pub enum HostValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Buffer(Vec<u8>),
    Array(Vec<HostValue>),
    /// Object with fields in insertion order
    Object(Vec<(String, HostValue)>),
    Function(HostFunction),
    Error(ErrorObject),
    Promise(Promise),
    External(External),
}

impl HostValue {
    pub fn buffer(bytes: impl Into<Vec<u8>>) -> Self {
        HostValue::Buffer(bytes.into())
    }

    pub fn string(s: impl Into<String>) -> Self {
        HostValue::String(s.into())
    }

    pub fn function<F>(name: &str, body: F) -> Self
    where
        F: Fn(&mut Env, &[HostValue]) -> Result<HostValue, HostValue> + 'static,
    {
        HostValue::Function(HostFunction::new(name, body))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            HostValue::Undefined => "undefined",
            HostValue::Null => "null",
            HostValue::Bool(_) => "boolean",
            HostValue::Number(_) => "number",
            HostValue::String(_) => "string",
            HostValue::Buffer(_) => "buffer",
            HostValue::Array(_) => "array",
            HostValue::Object(_) => "object",
            HostValue::Function(_) => "function",
            HostValue::Error(_) => "error",
            HostValue::Promise(_) => "promise",
            HostValue::External(_) => "external",
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, HostValue::Undefined | HostValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HostValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            HostValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_buffer(&self) -> Option<&[u8]> {
        match self {
            HostValue::Buffer(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[HostValue]> {
        match self {
            HostValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&ErrorObject> {
        match self {
            HostValue::Error(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&HostFunction> {
        match self {
            HostValue::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_promise(&self) -> Option<&Promise> {
        match self {
            HostValue::Promise(p) => Some(p),
            _ => None,
        }
    }

    /// Downcast a wrapped native object.
    pub fn as_external<T: 'static>(&self) -> Option<Rc<T>> {
        match self {
            HostValue::External(ext) => Rc::clone(ext).downcast::<T>().ok(),
            _ => None,
        }
    }

    /// Look up a field on an object value.
    pub fn get(&self, field: &str) -> Option<&HostValue> {
        match self {
            HostValue::Object(fields) => fields.iter().find(|(k, _)| k == field).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Short human-readable rendering, used in fault messages and logs.
    pub fn describe(&self) -> String {
        match self {
            HostValue::Undefined => "undefined".to_string(),
            HostValue::Null => "null".to_string(),
            HostValue::Bool(b) => b.to_string(),
            HostValue::Number(n) => n.to_string(),
            HostValue::String(s) => format!("{:?}", s),
            HostValue::Buffer(b) => format!("<Buffer {} bytes>", b.len()),
            HostValue::Array(items) => format!("[Array({})]", items.len()),
            HostValue::Object(_) => "[object Object]".to_string(),
            HostValue::Function(f) => format!("{:?}", f),
            HostValue::Error(e) => e.to_string(),
            HostValue::Promise(p) => format!("Promise {{ <{:?}> }}", p.state()),
            HostValue::External(_) => "[External]".to_string(),
        }
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Buffer(b) => write!(f, "Buffer({:?})", String::from_utf8_lossy(b)),
            HostValue::Array(items) => f.debug_list().entries(items).finish(),
            HostValue::Object(fields) => {
                let mut map = f.debug_map();
                for (k, v) in fields {
                    map.entry(k, v);
                }
                map.finish()
            }
            other => f.write_str(&other.describe()),
        }
    }
}

impl PartialEq for HostValue {
    fn eq(&self, other: &Self) -> bool {
        use HostValue::*;
        match (self, other) {
            (Undefined, Undefined) | (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Number(a), Number(b)) => a == b,
            (String(a), String(b)) => a == b,
            (Buffer(a), Buffer(b)) => a == b,
            (Array(a), Array(b)) => a == b,
            (Object(a), Object(b)) => a == b,
            (Function(a), Function(b)) => a.ptr_eq(b),
            (Error(a), Error(b)) => a == b,
            (Promise(a), Promise(b)) => a.ptr_eq(b),
            (External(a), External(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        HostValue::Bool(b)
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        HostValue::String(s.to_string())
    }
}

impl From<f64> for HostValue {
    fn from(n: f64) -> Self {
        HostValue::Number(n)
    }
}
