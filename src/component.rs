//! The component model: identity, content hashing, and the parent/child
//! arena (§3, §4.1).
//!
//! A concrete user component is any Rust type implementing [`Component`]
//! (itself `ComponentFields + Lifecycle` plus a handful of downcasting
//! methods — implemented per type, not blanket, so each component chooses
//! its own `as_any`). Live component trees are held in a single
//! [`Arena`], addressed by stable [`NodeId`] rather than by owned parent
//! pointers — see §3.3/§9's arena-indexed redesign. `uuid`/`hash` are pure
//! functions of the arena's current field values (Open Question (c)): there
//! is no mutable cache to invalidate.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};

use crate::error::EngineError;
use crate::value::{self, FieldSlot, FieldValue, NodeId};

/// Reserved field names the engine derives rather than a component declaring
/// (§3.1). Never appear in [`ComponentFields::fields`]; always appear in the
/// JSON envelope.
pub const METADATA_FIELDS: &[&str] = &["uuid", "component", "_path"];

/// Enumerates a component type's own declared fields.
///
/// This is the statically-typed answer to the original's runtime field
/// introspection (§9): rather than reflecting on a dataclass at runtime, a
/// concrete component hand-writes a small, mechanical `fields()` impl.
pub trait ComponentFields {
    /// The declared type-name of this record (`Component.component`).
    fn component_type(&self) -> &'static str;
    /// User-supplied, non-empty identifier, unique within (type, registry).
    fn identifier(&self) -> &str;
    /// `(name, value, is_breaking)` triples for every non-metadata field, in
    /// declaration order.
    fn fields(&self) -> Vec<FieldSlot>;
    /// The subset of field names whose mutation triggers an identity-breaking
    /// version transition (§3.1). Declaration order, not sorted.
    fn breaks(&self) -> &'static [&'static str] {
        &[]
    }
}

/// The four user-implemented lifecycle hooks (§6.1). Any hook may be a
/// no-op; the defaults below are exactly that.
pub trait Lifecycle {
    /// Invoked after construction and after decode; prepares in-memory,
    /// non-persisted state. Must be idempotent.
    fn read(&mut self) {}
    /// Initial provisioning.
    fn create(&mut self) -> Result<(), EngineError> {
        Ok(())
    }
    /// Incremental reconciliation; identity preserved.
    fn update(&mut self) -> Result<(), EngineError> {
        Ok(())
    }
    /// Teardown of external resources. Never touches the registry record —
    /// the engine removes that itself.
    fn delete(&mut self) -> Result<(), EngineError> {
        Ok(())
    }
}

/// A user-defined component type: field introspection plus lifecycle hooks,
/// downcastable so the executor can recover the concrete type if needed.
pub trait Component: ComponentFields + Lifecycle {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// The root's optional five-field cron expression (§4.5), read straight
    /// out of `fields()` rather than a separate slot.
    fn cron(&self) -> Option<String> {
        self.fields().into_iter().find(|f| f.name == "cron").and_then(|f| match f.value {
            FieldValue::Str(s) if !s.is_empty() => Some(s),
            _ => None,
        })
    }
}

/// A single node in the [`Arena`]: a boxed concrete component plus nothing
/// else — parent back-links and children are derived on demand by scanning
/// the arena, per the no-stale-cache design (§9, Open Question c).
struct Node {
    obj: Box<dyn Component>,
}

/// The single owning store of every component reachable from the root being
/// applied (§3.3, §9). Refer to nodes by [`NodeId`]; never by owned pointer.
#[derive(Default)]
pub struct Arena {
    nodes: Vec<Node>,
}

impl Arena {
    pub fn new() -> Self {
        Arena { nodes: Vec::new() }
    }

    /// Insert a constructed component, returning its stable index.
    pub fn insert(&mut self, obj: Box<dyn Component>) -> NodeId {
        self.nodes.push(Node { obj });
        NodeId(self.nodes.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> &dyn Component {
        self.nodes[id.0].obj.as_ref()
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut dyn Component {
        self.nodes[id.0].obj.as_mut()
    }

    /// Human-readable label: `"{type}/{identifier}/{uuid}"` (§3.5, GLOSSARY).
    pub fn huuid(&self, id: NodeId) -> String {
        let obj = self.get(id);
        format!("{}/{}/{}", obj.component_type(), obj.identifier(), self.uuid(id))
    }

    /// `"{type}:{identifier}"` — the key used in `_builds` and the planner's
    /// `existing_components` map.
    pub fn type_key(&self, id: NodeId) -> String {
        let obj = self.get(id);
        format!("{}:{}", obj.component_type(), obj.identifier())
    }

    // ── Merkle tree / identity (§3.2) ───────────────────────────────────

    /// `field -> hash(value)` over every declared field, or — when `breaks`
    /// is set — only the fields in the component's `breaks` set. Recomputed
    /// on every call; not cached.
    fn tree(&self, id: NodeId, breaks: bool) -> BTreeMap<String, String> {
        let obj = self.get(id);
        let breaking_fields = obj.breaks();
        let mut out = BTreeMap::new();
        for slot in obj.fields() {
            if breaks && !breaking_fields.contains(&slot.name) {
                continue;
            }
            let h = value::hash_value(&slot.value, breaks, &mut |rid, want_uuid| {
                if want_uuid {
                    self.uuid(rid)
                } else {
                    self.hash(rid)
                }
            });
            out.insert(slot.name.to_string(), h);
        }
        out
    }

    /// Identity hash: changes iff a `breaks` field changes (§3.2).
    pub fn uuid(&self, id: NodeId) -> String {
        let obj = self.get(id);
        let breaks_tree = self.tree(id, true);
        let mut items = vec![obj.component_type().to_string(), obj.identifier().to_string()];
        for k in obj.breaks() {
            if let Some(h) = breaks_tree.get(*k) {
                items.push(h.clone());
            }
        }
        value::hash_string_list(&items)[..32].to_string()
    }

    /// Content hash: changes whenever any field changes (§3.2).
    pub fn hash(&self, id: NodeId) -> String {
        let obj = self.get(id);
        let tree = self.tree(id, false);
        let breaking_fields = obj.breaks();

        let breaking_hashes: Vec<String> = breaking_fields
            .iter()
            .filter_map(|k| tree.get(*k).cloned())
            .collect();
        let non_breaking_hashes: Vec<String> = tree
            .iter()
            .filter(|(k, _)| !breaking_fields.contains(&k.as_str()))
            .map(|(_, v)| v.clone())
            .collect();

        let breaking = value::hash_string_list(&breaking_hashes);
        let non_breaking = value::hash_string_list(&non_breaking_hashes);
        format!("{}{}", &breaking[..32], &non_breaking[..32])
    }

    // ── Parent / child graph (§3.3) ─────────────────────────────────────

    /// Structural children (non-metadata fields only — every
    /// [`ComponentFields::fields`] slot already excludes metadata) as
    /// `(field_name, child)` pairs, in field declaration order. Children
    /// nested inside lists/maps are included.
    pub fn structural_children(&self, id: NodeId) -> Vec<(String, NodeId)> {
        let obj = self.get(id);
        let mut out = Vec::new();
        for slot in obj.fields() {
            collect_refs(&slot.value, slot.name, &mut out);
        }
        out
    }

    /// Children of `id`, deduplicated by node index. When `deep` is set,
    /// recurses through descendants too.
    pub fn get_children(&self, id: NodeId, deep: bool) -> Vec<NodeId> {
        let mut seen: Vec<NodeId> = Vec::new();
        let mut stack: Vec<NodeId> = self.structural_children(id).into_iter().map(|(_, c)| c).collect();
        while let Some(child) = stack.pop() {
            if seen.contains(&child) {
                continue;
            }
            seen.push(child);
            if deep {
                stack.extend(self.structural_children(child).into_iter().map(|(_, c)| c));
            }
        }
        seen
    }

    /// Back-links for `id`: every `(parent, field_name)` pair across the
    /// whole arena whose field value references `id`. Derived by scanning,
    /// not stored — consistent with the no-cache design.
    pub fn parents_of(&self, id: NodeId) -> Vec<(NodeId, String)> {
        let mut out = Vec::new();
        for i in 0..self.nodes.len() {
            let pid = NodeId(i);
            for (field, child) in self.structural_children(pid) {
                if child == id {
                    out.push((pid, field));
                }
            }
        }
        out
    }

    // ── Value codec: encode (§4.1) ──────────────────────────────────────

    /// Encode `id` to its JSON envelope. When `deep`, referenced children
    /// are recursively encoded into a top-level `_builds` map.
    pub fn encode(&self, id: NodeId, deep: bool) -> serde_json::Value {
        let mut builds = serde_json::Map::new();
        let body = self.encode_node(id, deep, &mut builds);
        match body {
            serde_json::Value::Object(mut map) if deep => {
                map.insert("_builds".to_string(), serde_json::Value::Object(builds));
                serde_json::Value::Object(map)
            }
            other => other,
        }
    }

    fn encode_node(&self, id: NodeId, deep: bool, builds: &mut serde_json::Map<String, serde_json::Value>) -> serde_json::Value {
        let obj = self.get(id);
        let mut out = serde_json::Map::new();
        out.insert("identifier".into(), serde_json::Value::String(obj.identifier().to_string()));
        out.insert("component".into(), serde_json::Value::String(obj.component_type().to_string()));
        out.insert("_path".into(), serde_json::Value::String(obj.component_type().to_string()));
        out.insert("uuid".into(), serde_json::Value::String(self.uuid(id)));
        for slot in obj.fields() {
            out.insert(slot.name.to_string(), self.encode_value(&slot.value, deep, builds));
        }
        serde_json::Value::Object(out)
    }

    fn encode_value(&self, v: &FieldValue, deep: bool, builds: &mut serde_json::Map<String, serde_json::Value>) -> serde_json::Value {
        match v {
            FieldValue::Ref(child_id) => {
                let key = self.type_key(*child_id);
                if deep && !builds.contains_key(&key) {
                    let mut child_doc = self.encode_node(*child_id, deep, builds);
                    if let serde_json::Value::Object(ref mut m) = child_doc {
                        m.remove("identifier");
                    }
                    builds.insert(key.clone(), child_doc);
                }
                serde_json::Value::String(format!("?{key}"))
            }
            FieldValue::List(items) => {
                serde_json::Value::Array(items.iter().map(|i| self.encode_value(i, deep, builds)).collect())
            }
            FieldValue::Map(map) => {
                let obj = map.iter().map(|(k, v)| (k.clone(), self.encode_value(v, deep, builds))).collect();
                serde_json::Value::Object(obj)
            }
            leaf => value::to_json(leaf),
        }
    }
}

fn collect_refs(value: &FieldValue, field_name: &str, out: &mut Vec<(String, NodeId)>) {
    match value {
        FieldValue::Ref(id) => out.push((field_name.to_string(), *id)),
        FieldValue::List(items) => {
            for item in items {
                collect_refs(item, field_name, out);
            }
        }
        FieldValue::Map(map) => {
            for v in map.values() {
                collect_refs(v, field_name, out);
            }
        }
        _ => {}
    }
}

// ── Decode (§4.1) ────────────────────────────────────────────────────────

/// Builds a concrete [`Component`] from its decoded field map. Registered
/// per type-name in a [`TypeRegistry`] — the Rust answer to the original's
/// dynamic module import (§6.2): the engine's library accepts any type
/// implementing [`Component`], but a binary can only decode the types it
/// registered at startup.
///
/// A well-behaved factory validates that `fields` contains no keys outside
/// its own schema, returning [`EngineError::Integrity`] otherwise (§7).
pub type Factory = fn(identifier: &str, fields: &BTreeMap<String, FieldValue>) -> Result<Box<dyn Component>, EngineError>;

/// Maps a component type-name (`_path` in the encoded envelope) to the
/// factory that can reconstruct it.
#[derive(Default, Clone)]
pub struct TypeRegistry {
    factories: HashMap<String, Factory>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        TypeRegistry { factories: HashMap::new() }
    }

    pub fn register(&mut self, type_name: &str, factory: Factory) {
        self.factories.insert(type_name.to_string(), factory);
    }

    pub fn get(&self, type_name: &str) -> Option<&Factory> {
        self.factories.get(type_name)
    }
}

/// Resolves a `(component_type, identifier)` pair to its encoded document
/// when a `?...` reference is missing from the in-payload `_builds` map —
/// i.e. the registry's `load`. Returns [`EngineError::NotFound`] on miss.
pub type Loader<'a> = dyn FnMut(&str, &str) -> Result<serde_json::Value, EngineError> + 'a;

/// Decode an encoded document into the arena, returning the root's
/// [`NodeId`]. `"?type:id"` references resolve first from the document's own
/// `_builds`, then via `loader` (typically `registry::load`); a miss on both
/// is [`EngineError::NotFound`] (§4.1).
pub fn decode(arena: &mut Arena, registry: &TypeRegistry, doc: &serde_json::Value, loader: &mut Loader<'_>) -> Result<NodeId, EngineError> {
    let obj = doc.as_object().ok_or_else(|| EngineError::Decode {
        huuid: String::new(),
        message: "expected a JSON object".into(),
    })?;
    let mut builds: HashMap<String, serde_json::Value> = obj
        .get("_builds")
        .and_then(|v| v.as_object())
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();
    let mut cache: HashMap<String, NodeId> = HashMap::new();
    decode_node(arena, registry, obj, &mut builds, &mut cache, loader)
}

fn decode_node(
    arena: &mut Arena,
    registry: &TypeRegistry,
    node_obj: &serde_json::Map<String, serde_json::Value>,
    builds: &mut HashMap<String, serde_json::Value>,
    cache: &mut HashMap<String, NodeId>,
    loader: &mut Loader<'_>,
) -> Result<NodeId, EngineError> {
    let path = node_obj
        .get("_path")
        .and_then(|v| v.as_str())
        .ok_or_else(|| EngineError::Decode { huuid: String::new(), message: "missing '_path'".into() })?
        .to_string();
    let identifier = node_obj
        .get("identifier")
        .and_then(|v| v.as_str())
        .ok_or_else(|| EngineError::Decode { huuid: String::new(), message: "missing 'identifier'".into() })?
        .to_string();
    let component_type = node_obj.get("component").and_then(|v| v.as_str()).unwrap_or(&path).to_string();
    let key = format!("{component_type}:{identifier}");

    if let Some(id) = cache.get(&key) {
        return Ok(*id);
    }

    let mut fields_map: BTreeMap<String, FieldValue> = BTreeMap::new();
    for (k, v) in node_obj.iter() {
        if matches!(k.as_str(), "identifier" | "component" | "_path" | "uuid" | "_builds") {
            continue;
        }
        fields_map.insert(k.clone(), decode_value(arena, registry, v, builds, cache, loader)?);
    }

    let factory = registry.get(&path).ok_or_else(|| EngineError::Decode {
        huuid: key.clone(),
        message: format!("unregistered component type '{path}'"),
    })?;
    let obj = factory(&identifier, &fields_map).map_err(|e| match e {
        EngineError::Integrity { component, fields } => EngineError::Integrity { component, fields },
        other => other,
    })?;
    let node_id = arena.insert(obj);
    cache.insert(key, node_id);
    Ok(node_id)
}

fn decode_value(
    arena: &mut Arena,
    registry: &TypeRegistry,
    v: &serde_json::Value,
    builds: &mut HashMap<String, serde_json::Value>,
    cache: &mut HashMap<String, NodeId>,
    loader: &mut Loader<'_>,
) -> Result<FieldValue, EngineError> {
    match v {
        serde_json::Value::String(s) if value::is_ref_marker(s) => {
            let (ctype, cid) = value::parse_ref_marker(s)
                .ok_or_else(|| EngineError::Decode { huuid: String::new(), message: format!("malformed reference: {s}") })?;
            let key = format!("{ctype}:{cid}");
            if let Some(id) = cache.get(&key) {
                return Ok(FieldValue::Ref(*id));
            }
            let child_doc = if let Some(doc) = builds.get(&key).cloned() {
                doc
            } else {
                loader(ctype, cid).map_err(|_| EngineError::NotFound(key.clone()))?
            };
            let mut child_obj = child_doc
                .as_object()
                .ok_or_else(|| EngineError::Decode { huuid: key.clone(), message: "build entry is not an object".into() })?
                .clone();
            if let Some(nested) = child_obj.remove("_builds") {
                if let Some(nested_map) = nested.as_object() {
                    for (k, v) in nested_map {
                        builds.entry(k.clone()).or_insert_with(|| v.clone());
                    }
                }
            }
            child_obj
                .entry("identifier".to_string())
                .or_insert_with(|| serde_json::Value::String(cid.to_string()));
            child_obj
                .entry("component".to_string())
                .or_insert_with(|| serde_json::Value::String(ctype.to_string()));
            child_obj
                .entry("_path".to_string())
                .or_insert_with(|| serde_json::Value::String(ctype.to_string()));
            let id = decode_node(arena, registry, &child_obj, builds, cache, loader)?;
            Ok(FieldValue::Ref(id))
        }
        serde_json::Value::Array(items) => {
            let decoded = items
                .iter()
                .map(|i| decode_value(arena, registry, i, builds, cache, loader))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(FieldValue::List(decoded))
        }
        serde_json::Value::Object(map) => {
            let decoded = map
                .iter()
                .map(|(k, v)| decode_value(arena, registry, v, builds, cache, loader).map(|fv| (k.clone(), fv)))
                .collect::<Result<BTreeMap<_, _>, _>>()?;
            Ok(FieldValue::Map(decoded))
        }
        other => value::from_json(other),
    }
}
