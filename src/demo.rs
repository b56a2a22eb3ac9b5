//! A small, self-contained demo component tree.
//!
//! Not a real integration (those — email, Slack, GitHub sync, a PDF indexer
//! — are out of scope per §1): this module exists only so the CLI's `test`
//! verb (§6.2) and the crate's integration tests have something concrete to
//! apply, reapply, and destroy. Grounded on `ochre/component.py`'s
//! `build_example()` convention (§6.1).

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::component::{Component, ComponentFields, Lifecycle, TypeRegistry};
use crate::error::EngineError;
use crate::value::{FieldSlot, FieldValue, NodeId};

/// A leaf note: a breaking `body` and a non-breaking `tag`.
pub struct Note {
    pub identifier: String,
    pub body: String,
    pub tag: String,
    pub create_calls: AtomicUsize,
}

impl Note {
    pub fn new(identifier: impl Into<String>, body: impl Into<String>, tag: impl Into<String>) -> Self {
        Note { identifier: identifier.into(), body: body.into(), tag: tag.into(), create_calls: AtomicUsize::new(0) }
    }
}

impl ComponentFields for Note {
    fn component_type(&self) -> &'static str {
        "Note"
    }
    fn identifier(&self) -> &str {
        &self.identifier
    }
    fn fields(&self) -> Vec<FieldSlot> {
        vec![
            FieldSlot::new("body", FieldValue::Str(self.body.clone()), true),
            FieldSlot::new("tag", FieldValue::Str(self.tag.clone()), false),
        ]
    }
    fn breaks(&self) -> &'static [&'static str] {
        &["body"]
    }
}

impl Lifecycle for Note {
    fn create(&mut self) -> Result<(), EngineError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Component for Note {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub fn note_factory(identifier: &str, fields: &BTreeMap<String, FieldValue>) -> Result<Box<dyn Component>, EngineError> {
    let known = ["body", "tag"];
    let unknown: Vec<String> = fields.keys().filter(|k| !known.contains(&k.as_str())).cloned().collect();
    if !unknown.is_empty() {
        return Err(EngineError::Integrity { component: "Note".into(), fields: unknown });
    }
    let body = match fields.get("body") {
        Some(FieldValue::Str(s)) => s.clone(),
        _ => String::new(),
    };
    let tag = match fields.get("tag") {
        Some(FieldValue::Str(s)) => s.clone(),
        _ => String::new(),
    };
    Ok(Box::new(Note::new(identifier, body, tag)))
}

/// A root component holding an ordered list of [`Note`] children and an
/// optional cron expression, to exercise the scheduler adapter.
pub struct Folder {
    pub identifier: String,
    pub notes: Vec<NodeId>,
    pub cron: String,
}

impl ComponentFields for Folder {
    fn component_type(&self) -> &'static str {
        "Folder"
    }
    fn identifier(&self) -> &str {
        &self.identifier
    }
    fn fields(&self) -> Vec<FieldSlot> {
        vec![
            FieldSlot::new("notes", FieldValue::List(self.notes.iter().map(|n| FieldValue::Ref(*n)).collect()), false),
            FieldSlot::new("cron", FieldValue::Str(self.cron.clone()), false),
        ]
    }
}

impl Lifecycle for Folder {}

impl Component for Folder {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub fn folder_factory(identifier: &str, fields: &BTreeMap<String, FieldValue>) -> Result<Box<dyn Component>, EngineError> {
    let known = ["notes", "cron"];
    let unknown: Vec<String> = fields.keys().filter(|k| !known.contains(&k.as_str())).cloned().collect();
    if !unknown.is_empty() {
        return Err(EngineError::Integrity { component: "Folder".into(), fields: unknown });
    }
    let notes = match fields.get("notes") {
        Some(FieldValue::List(items)) => items
            .iter()
            .map(|v| match v {
                FieldValue::Ref(id) => Ok(*id),
                _ => Err(EngineError::Integrity { component: "Folder".into(), fields: vec!["notes".into()] }),
            })
            .collect::<Result<Vec<_>, _>>()?,
        _ => Vec::new(),
    };
    let cron = match fields.get("cron") {
        Some(FieldValue::Str(s)) => s.clone(),
        _ => String::new(),
    };
    Ok(Box::new(Folder { identifier: identifier.to_string(), notes, cron }))
}

/// The name the `test`/`apply` CLI verbs accept to build this tree (§6.2:
/// "a small in-binary registry mapping a string name to a
/// `build_example()`-style factory function").
pub const EXAMPLE_NAME: &str = "demo.Folder";

/// `build_example()` (§6.1): a self-contained root with two notes, used by
/// the CLI's `test` verb and by integration tests.
pub fn build_example(arena: &mut crate::component::Arena) -> NodeId {
    let n1 = arena.insert(Box::new(Note::new("first", "hello", "greeting")));
    let n2 = arena.insert(Box::new(Note::new("second", "world", "greeting")));
    arena.insert(Box::new(Folder { identifier: "root".into(), notes: vec![n1, n2], cron: String::new() }))
}

/// The in-binary type registry (§6.2): every component type this binary can
/// decode, apply, and destroy.
pub fn types() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    registry.register("Note", note_factory);
    registry.register("Folder", folder_factory);
    registry
}
