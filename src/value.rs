//! The closed field-value vocabulary and its Merkle hashing / JSON envelope.
//!
//! A concrete component's fields enumerate to [`FieldValue`]s (see
//! [`crate::component::ComponentFields`]). This module owns three things
//! that only depend on the shape of a value, not on the arena that resolves
//! [`FieldValue::Ref`] targets:
//!
//! - the enum itself (§4.1's closed vocabulary, replacing the original's
//!   open-ended dynamic field typing);
//! - `hash_value`, the recursive, type-tagged Merkle hash (§3.2);
//! - `to_json` / `from_json`, the non-`Ref` half of the value codec (§4.1) —
//!   component references are encoded/decoded by [`crate::component`] because
//!   that's where the arena lives.

use std::collections::BTreeMap;

use base64::Engine as _;
use sha2::{Digest, Sha256};

use crate::error::EngineError;

/// Stable index of a component node inside an [`crate::component::Arena`].
///
/// Per §3.3/§9, the component graph is represented as an arena of nodes
/// addressed by index rather than as live parent-pointer object references,
/// sidestepping reference cycles entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// The closed vocabulary of values a component field may hold (§4.1, §9).
///
/// Unlike the original's dynamic, anything-goes field typing, `FieldValue` is
/// an exhaustive Rust enum: every match is checked by the compiler and no
/// component can accidentally hold an un-reconstructable value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<FieldValue>),
    Map(BTreeMap<String, FieldValue>),
    /// Opaque binary payload; encodes as `:blob:{base64}`.
    Bytes(Vec<u8>),
    /// A named top-level symbol (function or type); encodes as `:import:{path}`.
    Import(String),
    /// A child component, addressed by arena index; encodes as `?{type}:{id}`.
    Ref(NodeId),
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}
impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}
impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}
impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Str(v)
    }
}
impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

/// A single named, typed field slot, as enumerated by
/// [`crate::component::ComponentFields::fields`].
#[derive(Debug, Clone)]
pub struct FieldSlot {
    pub name: &'static str,
    pub value: FieldValue,
    /// Whether this field is a member of the component type's `breaks` set.
    pub breaking: bool,
}

impl FieldSlot {
    pub fn new(name: &'static str, value: FieldValue, breaking: bool) -> Self {
        FieldSlot { name, value, breaking }
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn hash_tagged(tag: &str, repr: &str) -> String {
    sha256_hex(format!("{tag}{repr}").as_bytes())
}

/// Render a float exactly the way Rust's `Display` would — good enough for a
/// content hash that only needs to be internally deterministic.
fn float_repr(f: f64) -> String {
    format!("{f}")
}

/// Recursively, type-tagged hash a [`FieldValue`] (§3.2).
///
/// `breaks` selects which half of a child [`FieldValue::Ref`] to fold in:
/// the child's `uuid` when building a `breaks_tree` entry, its `hash`
/// otherwise. `resolve_ref` performs that lookup against the arena.
pub fn hash_value(value: &FieldValue, breaks: bool, resolve_ref: &mut dyn FnMut(NodeId, bool) -> String) -> String {
    match value {
        FieldValue::Null => hash_tagged("<NoneType>", "None"),
        FieldValue::Bool(b) => hash_tagged("<bool>", &b.to_string()),
        FieldValue::Int(i) => hash_tagged("<int>", &i.to_string()),
        FieldValue::Float(f) => hash_tagged("<float>", &float_repr(*f)),
        FieldValue::Str(s) => sha256_hex(s.as_bytes()),
        FieldValue::Bytes(b) => sha256_hex(b),
        FieldValue::Import(path) => hash_tagged("<import>", path),
        FieldValue::List(items) => {
            let concatenated: String = items
                .iter()
                .map(|i| hash_value(i, breaks, resolve_ref))
                .collect();
            sha256_hex(concatenated.as_bytes())
        }
        FieldValue::Map(entries) => {
            // Keys are already sorted (BTreeMap); pair-hash each (key, value).
            let rendered: Vec<String> = entries
                .iter()
                .map(|(k, v)| {
                    let kh = sha256_hex(k.as_bytes());
                    let vh = hash_value(v, breaks, resolve_ref);
                    format!("({kh},{vh})")
                })
                .collect();
            sha256_hex(format!("[{}]", rendered.join(",")).as_bytes())
        }
        FieldValue::Ref(node_id) => resolve_ref(*node_id, breaks),
    }
}

/// Hash an arbitrary ordered list of strings the same way a `FieldValue::List`
/// of `Str`s would hash — used to derive `uuid` from `[component, identifier,
/// ...breaks_hashes]` and `hash` from `[...tree_hashes]` (§3.2).
pub fn hash_string_list(items: &[String]) -> String {
    let concatenated: String = items.iter().map(|s| sha256_hex(s.as_bytes())).collect();
    sha256_hex(concatenated.as_bytes())
}

/// Encode the non-`Ref` portion of a [`FieldValue`] to its JSON envelope form
/// (§4.1). [`FieldValue::Ref`] is encoded by [`crate::component`], which has
/// the arena context needed to resolve `{type}:{id}` and recurse into `_builds`.
pub fn to_json(value: &FieldValue) -> serde_json::Value {
    use serde_json::Value as J;
    match value {
        FieldValue::Null => J::Null,
        FieldValue::Bool(b) => J::Bool(*b),
        FieldValue::Int(i) => J::Number((*i).into()),
        FieldValue::Float(f) => serde_json::Number::from_f64(*f).map(J::Number).unwrap_or(J::Null),
        FieldValue::Str(s) => J::String(s.clone()),
        FieldValue::List(items) => J::Array(items.iter().map(to_json).collect()),
        FieldValue::Map(entries) => {
            let map = entries.iter().map(|(k, v)| (k.clone(), to_json(v))).collect();
            J::Object(map)
        }
        FieldValue::Bytes(bytes) => {
            let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
            J::String(format!(":blob:{encoded}"))
        }
        FieldValue::Import(path) => J::String(format!(":import:{path}")),
        FieldValue::Ref(_) => {
            unreachable!("FieldValue::Ref must be encoded by crate::component, which has arena access")
        }
    }
}

/// Decode the non-`Ref` portion of an encoded JSON value back into a
/// [`FieldValue`]. `"?..."` strings are left as plain [`FieldValue::Str`];
/// [`crate::component`]'s decoder resolves those into [`FieldValue::Ref`]
/// once it has built (or looked up) the referenced node.
pub fn from_json(json: &serde_json::Value) -> Result<FieldValue, EngineError> {
    use serde_json::Value as J;
    Ok(match json {
        J::Null => FieldValue::Null,
        J::Bool(b) => FieldValue::Bool(*b),
        J::Number(n) => {
            if let Some(i) = n.as_i64() {
                FieldValue::Int(i)
            } else if let Some(f) = n.as_f64() {
                FieldValue::Float(f)
            } else {
                return Err(EngineError::Decode {
                    huuid: String::new(),
                    message: format!("unrepresentable number: {n}"),
                });
            }
        }
        J::String(s) => {
            if let Some(rest) = s.strip_prefix(":blob:") {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(rest)
                    .map_err(|e| EngineError::Decode {
                        huuid: String::new(),
                        message: format!("malformed blob: {e}"),
                    })?;
                FieldValue::Bytes(bytes)
            } else if let Some(rest) = s.strip_prefix(":import:") {
                FieldValue::Import(rest.to_string())
            } else {
                FieldValue::Str(s.clone())
            }
        }
        J::Array(items) => {
            let decoded = items.iter().map(from_json).collect::<Result<Vec<_>, _>>()?;
            FieldValue::List(decoded)
        }
        J::Object(map) => {
            let decoded = map
                .iter()
                .map(|(k, v)| from_json(v).map(|fv| (k.clone(), fv)))
                .collect::<Result<BTreeMap<_, _>, _>>()?;
            FieldValue::Map(decoded)
        }
    })
}

/// `true` when `s` is a component reference marker (`"?type:id"`).
pub fn is_ref_marker(s: &str) -> bool {
    s.starts_with('?')
}

/// Split a `"?type:id"` marker into `(type, id)`.
pub fn parse_ref_marker(s: &str) -> Option<(&str, &str)> {
    let rest = s.strip_prefix('?')?;
    rest.split_once(':')
}
