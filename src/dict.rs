//! `UDict`: the generic attribute store attached to every `URef`.
//!
//! The C library's dict is a flat array of `{name, type, value}` triples
//! searched linearly because dicts are small and rarely iterated in a
//! hot loop. In Rust that maps cleanly onto the same keyed-lookup idiom
//! the teacher crate uses everywhere it needs a small, hot map —
//! `FnvHashMap` (`graph/shared_pool.rs`, `graph/plugin_host.rs`,
//! `reducing_queue.rs`) — rather than the default SipHash-keyed
//! `std::collections::HashMap`, since keys here are short attribute
//! names hashed on every buffer that carries metadata.

use fnv::FnvHashMap;
use std::fmt;

/// A single attribute value. Mirrors the C library's `UDICT_TYPE_*`
/// tagged union, collapsed onto an enum since Rust doesn't need manual
/// tag/payload bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub enum UDictValue {
    Void,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Rational { num: i64, den: i64 },
}

impl fmt::Display for UDictValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UDictValue::Void => write!(f, "void"),
            UDictValue::Bool(b) => write!(f, "{b}"),
            UDictValue::Int(i) => write!(f, "{i}"),
            UDictValue::UInt(u) => write!(f, "{u}"),
            UDictValue::Float(x) => write!(f, "{x}"),
            UDictValue::String(s) => write!(f, "{s:?}"),
            UDictValue::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            UDictValue::Rational { num, den } => write!(f, "{num}/{den}"),
        }
    }
}

/// A flat, cloneable attribute dictionary keyed by attribute name.
///
/// `URef` embeds one of these directly (not behind a pool or refcount):
/// spec.md describes the dict as cheap to clone-on-write when a `URef`
/// is duplicated for a split output, which an owned `FnvHashMap` gives
/// for free via `Clone`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UDict {
    entries: FnvHashMap<String, UDictValue>,
}

impl UDict {
    pub fn new() -> Self {
        Self { entries: FnvHashMap::default() }
    }

    pub fn set(&mut self, name: impl Into<String>, value: UDictValue) {
        self.entries.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&UDictValue> {
        self.entries.get(name)
    }

    /// Remove an attribute, returning its value if present.
    pub fn delete(&mut self, name: &str) -> Option<UDictValue> {
        self.entries.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &UDictValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Merge `other`'s attributes into `self`, overwriting any names that
    /// collide. Used when a probe or pipe wants to stamp extra attributes
    /// onto a urequest answer without losing what was already there.
    pub fn merge(&mut self, other: &UDict) {
        for (name, value) in other.iter() {
            self.entries.insert(name.to_string(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_delete_round_trip() {
        let mut dict = UDict::new();
        dict.set("x.width", UDictValue::UInt(1920));
        assert_eq!(dict.get("x.width"), Some(&UDictValue::UInt(1920)));
        assert_eq!(dict.delete("x.width"), Some(UDictValue::UInt(1920)));
        assert_eq!(dict.get("x.width"), None);
    }

    #[test]
    fn merge_overwrites_colliding_keys() {
        let mut a = UDict::new();
        a.set("k", UDictValue::Int(1));
        a.set("keep", UDictValue::Bool(true));

        let mut b = UDict::new();
        b.set("k", UDictValue::Int(2));

        a.merge(&b);
        assert_eq!(a.get("k"), Some(&UDictValue::Int(2)));
        assert_eq!(a.get("keep"), Some(&UDictValue::Bool(true)));
    }

    #[test]
    fn clone_is_independent() {
        let mut a = UDict::new();
        a.set("k", UDictValue::Int(1));
        let mut b = a.clone();
        b.set("k", UDictValue::Int(2));
        assert_eq!(a.get("k"), Some(&UDictValue::Int(1)));
        assert_eq!(b.get("k"), Some(&UDictValue::Int(2)));
    }
}
