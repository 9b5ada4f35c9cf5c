//! Keys, selectors, ranges and mutations

use crate::error::{codes, NativeError};

/// Keys at or above this prefix belong to the system keyspace.
pub const SYSTEM_KEY_PREFIX: u8 = 0xff;
pub const MAX_KEY_LEN: usize = 10_000;
pub const MAX_VALUE_LEN: usize = 100_000;

/// The smallest key strictly greater than `key`.
pub fn key_after(key: &[u8]) -> Vec<u8> {
    let mut next = Vec::with_capacity(key.len() + 1);
    next.extend_from_slice(key);
    next.push(0);
    next
}

pub(crate) fn check_key(key: &[u8]) -> Result<(), NativeError> {
    if key.len() > MAX_KEY_LEN {
        return Err(NativeError::new(codes::KEY_TOO_LARGE));
    }
    if key.first() == Some(&SYSTEM_KEY_PREFIX) {
        return Err(NativeError::new(codes::KEY_OUTSIDE_LEGAL_RANGE));
    }
    Ok(())
}

pub(crate) fn check_value(value: &[u8]) -> Result<(), NativeError> {
    if value.len() > MAX_VALUE_LEN {
        return Err(NativeError::new(codes::VALUE_TOO_LARGE));
    }
    Ok(())
}

/// Half-open key range `[begin, end)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyRange {
    pub begin: Vec<u8>,
    pub end: Vec<u8>,
}

impl KeyRange {
    pub fn new(begin: impl Into<Vec<u8>>, end: impl Into<Vec<u8>>) -> Self {
        KeyRange {
            begin: begin.into(),
            end: end.into(),
        }
    }

    /// The range holding exactly `key`.
    pub fn single(key: &[u8]) -> Self {
        KeyRange::new(key, key_after(key))
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.begin.as_slice() <= key && key < self.end.as_slice()
    }

    pub fn intersects(&self, other: &KeyRange) -> bool {
        self.begin < other.end && other.begin < self.end
    }
}

/// Locates a key relative to the keys present in the database.
///
/// The base is the last key `<= key` (`or_equal`) or `< key`; the selected
/// key is `offset` keys past the base.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeySelector {
    pub key: Vec<u8>,
    pub or_equal: bool,
    pub offset: i32,
}

impl KeySelector {
    pub fn new(key: impl Into<Vec<u8>>, or_equal: bool, offset: i32) -> Self {
        KeySelector {
            key: key.into(),
            or_equal,
            offset,
        }
    }

    pub fn last_less_than(key: impl Into<Vec<u8>>) -> Self {
        KeySelector::new(key, false, 0)
    }

    pub fn last_less_or_equal(key: impl Into<Vec<u8>>) -> Self {
        KeySelector::new(key, true, 0)
    }

    pub fn first_greater_than(key: impl Into<Vec<u8>>) -> Self {
        KeySelector::new(key, true, 1)
    }

    pub fn first_greater_or_equal(key: impl Into<Vec<u8>>) -> Self {
        KeySelector::new(key, false, 1)
    }

    /// Resolve against the sorted list of present keys. Running off either
    /// end yields the empty key or the system prefix.
    pub(crate) fn resolve(&self, keys: &[Vec<u8>]) -> Vec<u8> {
        let base = keys
            .iter()
            .rposition(|k| {
                if self.or_equal {
                    k.as_slice() <= self.key.as_slice()
                } else {
                    k.as_slice() < self.key.as_slice()
                }
            })
            .map(|i| i as i64)
            .unwrap_or(-1);
        let index = base + self.offset as i64;
        if index < 0 {
            Vec::new()
        } else if index as usize >= keys.len() {
            vec![SYSTEM_KEY_PREFIX]
        } else {
            keys[index as usize].clone()
        }
    }
}

/// Atomic operations, numbered as the store numbers them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MutationType {
    Add = 2,
    BitAnd = 6,
    BitOr = 7,
    BitXor = 8,
    Max = 12,
    Min = 13,
}

impl MutationType {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            2 => Some(MutationType::Add),
            6 => Some(MutationType::BitAnd),
            7 => Some(MutationType::BitOr),
            8 => Some(MutationType::BitXor),
            12 => Some(MutationType::Max),
            13 => Some(MutationType::Min),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "add" => Some(MutationType::Add),
            "and" | "bit_and" => Some(MutationType::BitAnd),
            "or" | "bit_or" => Some(MutationType::BitOr),
            "xor" | "bit_xor" => Some(MutationType::BitXor),
            "max" => Some(MutationType::Max),
            "min" => Some(MutationType::Min),
            _ => None,
        }
    }

    /// Combine the existing value with `param`. Operands are little-endian
    /// and the result is as long as `param`.
    pub fn apply(self, existing: Option<&[u8]>, param: &[u8]) -> Vec<u8> {
        let existing: &[u8] = match existing {
            Some(existing) => existing,
            None if matches!(self, MutationType::Add | MutationType::BitOr | MutationType::BitXor) => &[],
            None => return param.to_vec(),
        };
        let byte = |i: usize| existing.get(i).copied().unwrap_or(0);
        match self {
            MutationType::Add => {
                let mut carry = 0u16;
                param
                    .iter()
                    .enumerate()
                    .map(|(i, p)| {
                        let sum = byte(i) as u16 + *p as u16 + carry;
                        carry = sum >> 8;
                        sum as u8
                    })
                    .collect()
            }
            MutationType::BitAnd => param.iter().enumerate().map(|(i, p)| byte(i) & p).collect(),
            MutationType::BitOr => param.iter().enumerate().map(|(i, p)| byte(i) | p).collect(),
            MutationType::BitXor => param.iter().enumerate().map(|(i, p)| byte(i) ^ p).collect(),
            MutationType::Max | MutationType::Min => {
                let current: Vec<u8> = (0..param.len()).map(byte).collect();
                // Compare from the most significant (last) byte.
                let ordering = current.iter().rev().cmp(param.iter().rev());
                let keep_current = match self {
                    MutationType::Max => ordering.is_gt(),
                    _ => ordering.is_lt(),
                };
                if keep_current {
                    current
                } else {
                    param.to_vec()
                }
            }
        }
    }
}

/// One buffered write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mutation {
    Set { key: Vec<u8>, value: Vec<u8> },
    Clear { key: Vec<u8> },
    ClearRange { range: KeyRange },
    Atomic { op: MutationType, key: Vec<u8>, param: Vec<u8> },
}

impl Mutation {
    /// Keys this mutation writes.
    pub fn range(&self) -> KeyRange {
        match self {
            Mutation::Set { key, .. } | Mutation::Clear { key } | Mutation::Atomic { key, .. } => {
                KeyRange::single(key)
            }
            Mutation::ClearRange { range } => range.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(list: &[&str]) -> Vec<Vec<u8>> {
        list.iter().map(|k| k.as_bytes().to_vec()).collect()
    }

    #[test]
    fn test_selectors() {
        let present = keys(&["a", "c", "e"]);
        assert_eq!(KeySelector::first_greater_or_equal("b").resolve(&present), b"c");
        assert_eq!(KeySelector::first_greater_or_equal("c").resolve(&present), b"c");
        assert_eq!(KeySelector::first_greater_than("c").resolve(&present), b"e");
        assert_eq!(KeySelector::last_less_or_equal("c").resolve(&present), b"c");
        assert_eq!(KeySelector::last_less_than("c").resolve(&present), b"a");
        assert_eq!(KeySelector::last_less_than("a").resolve(&present), b"");
        assert_eq!(KeySelector::first_greater_than("e").resolve(&present), vec![0xff]);
        assert_eq!(KeySelector::new("a", false, 3).resolve(&present), b"e");
    }

    #[test]
    fn test_atomic_add_carries_and_truncates() {
        let one = 1u32.to_le_bytes();
        assert_eq!(MutationType::Add.apply(None, &one), one.to_vec());
        let sum = MutationType::Add.apply(Some(&255u32.to_le_bytes()), &one);
        assert_eq!(sum, 256u32.to_le_bytes().to_vec());
        let wrapped = MutationType::Add.apply(Some(&[0xff, 0xff, 0x01]), &[1, 0]);
        assert_eq!(wrapped, vec![0, 0]);
    }

    #[test]
    fn test_atomic_bitwise_and_minmax() {
        assert_eq!(MutationType::BitAnd.apply(None, &[0x0f]), vec![0x0f]);
        assert_eq!(MutationType::BitAnd.apply(Some(&[0x3c]), &[0x0f]), vec![0x0c]);
        assert_eq!(MutationType::BitOr.apply(Some(&[0x30]), &[0x0f]), vec![0x3f]);
        assert_eq!(MutationType::BitXor.apply(Some(&[0xff]), &[0x0f]), vec![0xf0]);
        let five = 5u16.to_le_bytes();
        let nine = 9u16.to_le_bytes();
        assert_eq!(MutationType::Max.apply(Some(&five), &nine), nine.to_vec());
        assert_eq!(MutationType::Min.apply(Some(&five), &nine), five.to_vec());
        assert_eq!(MutationType::Min.apply(None, &nine), nine.to_vec());
        // 0x0100 is larger than 0x00ff even though its first byte is smaller
        assert_eq!(MutationType::Max.apply(Some(&[0x00, 0x01]), &[0xff, 0x00]), vec![0x00, 0x01]);
    }

    #[test]
    fn test_key_checks() {
        assert!(check_key(b"user/1").is_ok());
        assert_eq!(check_key(&[0xff, 1]).unwrap_err().code, codes::KEY_OUTSIDE_LEGAL_RANGE);
        assert_eq!(check_key(&vec![0; MAX_KEY_LEN + 1]).unwrap_err().code, codes::KEY_TOO_LARGE);
    }

    #[test]
    fn test_range_intersection() {
        let ab = KeyRange::new("a", "b");
        assert!(ab.intersects(&KeyRange::single(b"a")));
        assert!(!ab.intersects(&KeyRange::new("b", "c")));
        assert!(ab.contains(b"a\x00"));
        assert!(!ab.contains(b"b"));
    }
}
