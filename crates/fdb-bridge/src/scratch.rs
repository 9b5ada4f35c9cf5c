//! Scratch buffer for key and value arguments
//!
//! Short string arguments are staged in one shared fixed-size buffer instead
//! of a fresh allocation. [`StringParams`] is the guard: the shared buffer
//! goes back when it drops, on every exit path.

use std::cell::{Cell, RefCell};

use fdb_host::HostValue;

use crate::error::BridgeError;

pub const DEFAULT_SCRATCH_CAPACITY: usize = 1024;

pub struct ScratchBuffer {
    /// `None` while a staging holds the buffer.
    slot: RefCell<Option<Box<[u8]>>>,
    capacity: usize,
    heap_stagings: Cell<usize>,
}

impl ScratchBuffer {
    pub fn new(capacity: usize) -> Self {
        ScratchBuffer {
            slot: RefCell::new(Some(vec![0; capacity].into_boxed_slice())),
            capacity,
            heap_stagings: Cell::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_use(&self) -> bool {
        self.slot.borrow().is_none()
    }

    /// Stagings that had to allocate.
    pub fn heap_stagings(&self) -> usize {
        self.heap_stagings.get()
    }

    /// Copy `bytes` into the shared buffer if it is free and big enough,
    /// otherwise into a heap allocation of exactly the right size.
    pub fn stage(&self, bytes: &[u8]) -> StringParams<'_> {
        if bytes.len() <= self.capacity {
            let taken = self.slot.borrow_mut().take();
            if let Some(mut buf) = taken {
                buf[..bytes.len()].copy_from_slice(bytes);
                return StringParams {
                    storage: Storage::Shared { home: self, buf },
                    len: bytes.len(),
                };
            }
        }
        self.heap_stagings.set(self.heap_stagings.get() + 1);
        StringParams {
            storage: Storage::Owned(bytes.to_vec()),
            len: bytes.len(),
        }
    }

    fn put_back(&self, buf: Box<[u8]>) {
        *self.slot.borrow_mut() = Some(buf);
    }
}

impl Default for ScratchBuffer {
    fn default() -> Self {
        ScratchBuffer::new(DEFAULT_SCRATCH_CAPACITY)
    }
}

enum Storage<'a> {
    Shared { home: &'a ScratchBuffer, buf: Box<[u8]> },
    Owned(Vec<u8>),
    Borrowed(&'a [u8]),
}

/// Bytes of one marshaled argument.
pub struct StringParams<'a> {
    storage: Storage<'a>,
    len: usize,
}

impl<'a> StringParams<'a> {
    pub fn as_bytes(&self) -> &[u8] {
        match &self.storage {
            Storage::Shared { buf, .. } => &buf[..self.len],
            Storage::Owned(bytes) => bytes,
            Storage::Borrowed(bytes) => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether these bytes live in the shared scratch buffer.
    pub fn is_shared(&self) -> bool {
        matches!(self.storage, Storage::Shared { .. })
    }

    pub fn is_owned(&self) -> bool {
        matches!(self.storage, Storage::Owned(_))
    }
}

impl Drop for StringParams<'_> {
    fn drop(&mut self) {
        if let Storage::Shared { home, buf } = std::mem::replace(&mut self.storage, Storage::Borrowed(&[])) {
            home.put_back(buf);
        }
    }
}

/// Marshal a string or buffer argument. Strings are staged as UTF-8;
/// buffers are used in place.
pub fn to_string_params<'a>(
    scratch: &'a ScratchBuffer,
    value: &'a HostValue,
) -> Result<StringParams<'a>, BridgeError> {
    match value {
        HostValue::String(s) => Ok(scratch.stage(s.as_bytes())),
        HostValue::Buffer(bytes) => Ok(StringParams {
            storage: Storage::Borrowed(bytes),
            len: bytes.len(),
        }),
        _ => Err(BridgeError::InvalidParam),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_string_uses_shared_buffer_and_releases_it() {
        let scratch = ScratchBuffer::default();
        let key = HostValue::from("hello");
        {
            let params = to_string_params(&scratch, &key).unwrap();
            assert!(params.is_shared());
            assert_eq!(params.as_bytes(), b"hello");
            assert!(scratch.in_use());
        }
        assert!(!scratch.in_use());
    }

    #[test]
    fn test_second_staging_falls_back_to_heap() {
        let scratch = ScratchBuffer::default();
        let key = HostValue::from("key");
        let value = HostValue::from("value");
        let first = to_string_params(&scratch, &key).unwrap();
        let second = to_string_params(&scratch, &value).unwrap();
        assert!(first.is_shared());
        assert!(second.is_owned());
        assert_eq!(first.as_bytes(), b"key");
        assert_eq!(second.as_bytes(), b"value");
        drop(second);
        // The owned staging never held the shared buffer
        assert!(scratch.in_use());
        drop(first);
        assert!(!scratch.in_use());
    }

    #[test]
    fn test_oversized_string_takes_heap_path() {
        let scratch = ScratchBuffer::new(8);
        let exact = HostValue::string("12345678");
        let long = HostValue::string("123456789");
        assert!(to_string_params(&scratch, &exact).unwrap().is_shared());
        let params = to_string_params(&scratch, &long).unwrap();
        assert!(params.is_owned());
        assert!(!scratch.in_use());
        assert_eq!(scratch.heap_stagings(), 1);
    }

    #[test]
    fn test_buffers_are_borrowed() {
        let scratch = ScratchBuffer::default();
        let buffer = HostValue::buffer(vec![0xff, 0x00]);
        let params = to_string_params(&scratch, &buffer).unwrap();
        assert!(!params.is_shared() && !params.is_owned());
        assert_eq!(params.as_bytes(), &[0xff, 0x00]);
        assert!(!scratch.in_use());
    }

    #[test]
    fn test_other_values_are_rejected_without_claiming_buffer() {
        let scratch = ScratchBuffer::default();
        let result = to_string_params(&scratch, &HostValue::Number(1.0));
        assert!(matches!(result, Err(BridgeError::InvalidParam)));
        assert!(!scratch.in_use());
    }
}
