//! Diff a live component tree against the registry and emit a
//! dependency-ordered job graph (§4.2, §4.3).
//!
//! Grounded on `ochre/core.py`'s `_apply`/`_destroy`, with one deliberate
//! divergence: job-dependency wiring for the `new`+`clean` case follows
//! §4.2.3's explicit table (the `create` depends on the `delete`) rather
//! than the original's literal code, which only wires that dependency for
//! the `breaking` branch — the spec is more precise here than the source it
//! was distilled from.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::component::{decode, Arena, TypeRegistry};
use crate::error::EngineError;
use crate::job::{Job, JobId, Method};
use crate::registry;
use crate::value::NodeId;

/// The planner's per-node verdict (§4.2.2, GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyStatus {
    New,
    Same,
    Update,
    Breaking,
}

/// An ordered, dependency-annotated list of jobs (GLOSSARY). Emission order
/// is already a valid topological order (§4.2.3's invariant).
#[derive(Debug, Default)]
pub struct Plan {
    pub jobs: Vec<Job>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// One `"{method} {huuid}"` line per job, in emission order — the raw
    /// material for the CLI's plan table (§7).
    pub fn summary(&self) -> Vec<String> {
        self.jobs.iter().map(|j| format!("{} {}", j.method, j.huuid())).collect()
    }
}

struct ExistingEntry {
    uuid: String,
    hash: String,
    status: registry::Status,
}

/// Diffs and emits jobs for one registry root. Borrows the registry path and
/// the type registry needed to decode prior versions.
pub struct Planner<'a> {
    root: &'a Path,
    types: &'a TypeRegistry,
}

impl<'a> Planner<'a> {
    pub fn new(root: &'a Path, types: &'a TypeRegistry) -> Self {
        Planner { root, types }
    }

    /// §4.2: plan an apply of the live tree rooted at `root_id`.
    ///
    /// `clean`: when a node is `new`, also emit a (non-raising) `delete`
    /// before its `create`, clearing any stray on-disk leftovers first.
    pub fn plan_apply(&self, arena: &Arena, root_id: NodeId, clean: bool) -> Result<Plan, EngineError> {
        let existing = self.load_existing(arena, root_id)?;
        let mut processed: HashMap<String, Vec<JobId>> = HashMap::new();
        let mut jobs = Vec::new();
        self.apply_node(arena, root_id, &existing, &mut processed, &mut jobs, clean)?;
        Ok(Plan { jobs })
    }

    /// §4.2.1: load the persisted prior tree (root + all descendants, deep)
    /// keyed by `"{type}:{identifier}"`. Absent registry entry → empty map.
    fn load_existing(&self, arena: &Arena, root_id: NodeId) -> Result<HashMap<String, ExistingEntry>, EngineError> {
        let obj = arena.get(root_id);
        let prior_doc = match registry::load(self.root, obj.component_type(), obj.identifier()) {
            Ok(doc) => doc,
            Err(EngineError::NotFound(_)) => return Ok(HashMap::new()),
            Err(e) => return Err(e),
        };

        let mut prior_arena = Arena::new();
        let mut loader = |ctype: &str, cid: &str| registry::load(self.root, ctype, cid);
        let prior_root = decode(&mut prior_arena, self.types, &prior_doc, &mut loader)?;

        let mut existing = HashMap::new();
        let mut seen: HashSet<NodeId> = HashSet::new();
        let mut stack = vec![prior_root];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            let node = prior_arena.get(id);
            let key = prior_arena.type_key(id);
            let status = registry::status(self.root, node.component_type(), node.identifier())?;
            existing.insert(key, ExistingEntry { uuid: prior_arena.uuid(id), hash: prior_arena.hash(id), status });
            stack.extend(prior_arena.structural_children(id).into_iter().map(|(_, c)| c));
        }
        Ok(existing)
    }

    /// §4.2.2/§4.2.3: depth-first, children before parent. Returns the job
    /// ids a parent referencing this node should depend on.
    fn apply_node(
        &self,
        arena: &Arena,
        id: NodeId,
        existing: &HashMap<String, ExistingEntry>,
        processed: &mut HashMap<String, Vec<JobId>>,
        jobs: &mut Vec<Job>,
        clean: bool,
    ) -> Result<Vec<JobId>, EngineError> {
        let key = arena.type_key(id);
        if let Some(ids) = processed.get(&key) {
            return Ok(ids.clone());
        }

        let mut child_job_ids = Vec::new();
        for (_, child_id) in arena.structural_children(id) {
            child_job_ids.extend(self.apply_node(arena, child_id, existing, processed, jobs, clean)?);
        }

        let obj = arena.get(id);
        let component_type = obj.component_type().to_string();
        let identifier = obj.identifier().to_string();
        let live_uuid = arena.uuid(id);
        let live_hash = arena.hash(id);
        let doc = arena.encode(id, false);

        let status = classify(existing.get(&key), &live_uuid, &live_hash);

        let own_job_ids = match status {
            ApplyStatus::Same => Vec::new(),
            ApplyStatus::New => {
                let mut ids = Vec::new();
                let create_deps = if clean {
                    let delete = Job::new(Method::Delete, &component_type, &identifier, &live_uuid, doc.clone(), child_job_ids.clone(), false);
                    let delete_id = delete.job_id.clone();
                    jobs.push(delete);
                    ids.push(delete_id.clone());
                    vec![delete_id]
                } else {
                    child_job_ids.clone()
                };
                let create = Job::new(Method::Create, &component_type, &identifier, &live_uuid, doc, create_deps, true);
                ids.push(create.job_id.clone());
                jobs.push(create);
                ids
            }
            ApplyStatus::Breaking => {
                let delete = Job::new(Method::Delete, &component_type, &identifier, &live_uuid, doc.clone(), child_job_ids.clone(), false);
                let delete_id = delete.job_id.clone();
                jobs.push(delete);
                let create = Job::new(Method::Create, &component_type, &identifier, &live_uuid, doc, vec![delete_id.clone()], true);
                let create_id = create.job_id.clone();
                jobs.push(create);
                vec![delete_id, create_id]
            }
            ApplyStatus::Update => {
                let update = Job::new(Method::Update, &component_type, &identifier, &live_uuid, doc, child_job_ids.clone(), true);
                let update_id = update.job_id.clone();
                jobs.push(update);
                vec![update_id]
            }
        };

        // A `same` node emitted no job of its own; a parent depending on it
        // should depend on its children's jobs instead (§4.2.3, Open Question a).
        let result_ids = if matches!(status, ApplyStatus::Same) { child_job_ids } else { own_job_ids };
        processed.insert(key, result_ids.clone());
        Ok(result_ids)
    }

    /// §4.3: plan a destroy of the live tree rooted at `root_id`. Inverted
    /// order: the root's delete is emitted first; every child's delete
    /// depends on its parent's delete job id.
    pub fn plan_destroy(&self, arena: &Arena, root_id: NodeId) -> Result<Plan, EngineError> {
        let mut processed: HashMap<String, JobId> = HashMap::new();
        let mut jobs = Vec::new();
        self.destroy_node(arena, root_id, None, &mut processed, &mut jobs);
        Ok(Plan { jobs })
    }

    fn destroy_node(
        &self,
        arena: &Arena,
        id: NodeId,
        parent_job_id: Option<JobId>,
        processed: &mut HashMap<String, JobId>,
        jobs: &mut Vec<Job>,
    ) {
        let key = arena.type_key(id);
        if processed.contains_key(&key) {
            return;
        }

        let obj = arena.get(id);
        let component_type = obj.component_type().to_string();
        let identifier = obj.identifier().to_string();
        let live_uuid = arena.uuid(id);
        let doc = arena.encode(id, false);

        let deps = parent_job_id.into_iter().collect();
        let job = Job::new(Method::Delete, &component_type, &identifier, &live_uuid, doc, deps, false);
        let job_id = job.job_id.clone();
        jobs.push(job);
        processed.insert(key, job_id.clone());

        for (_, child_id) in arena.structural_children(id) {
            self.destroy_node(arena, child_id, Some(job_id.clone()), processed, jobs);
        }
    }
}

/// §4.2.2's classification table.
fn classify(existing: Option<&ExistingEntry>, live_uuid: &str, live_hash: &str) -> ApplyStatus {
    match existing {
        None => ApplyStatus::New,
        Some(e) if matches!(e.status, registry::Status::Error(_)) => ApplyStatus::New,
        Some(e) if e.hash == live_hash => ApplyStatus::Same,
        Some(e) if e.uuid == live_uuid => ApplyStatus::Update,
        Some(_) => ApplyStatus::Breaking,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{Component, ComponentFields, Lifecycle};
    use crate::value::{FieldSlot, FieldValue};
    use std::any::Any;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    struct Leaf {
        identifier: String,
        a: String,
        extra: i64,
    }
    impl ComponentFields for Leaf {
        fn component_type(&self) -> &'static str {
            "Leaf"
        }
        fn identifier(&self) -> &str {
            &self.identifier
        }
        fn fields(&self) -> Vec<FieldSlot> {
            vec![
                FieldSlot::new("a", FieldValue::Str(self.a.clone()), true),
                FieldSlot::new("extra", FieldValue::Int(self.extra), false),
            ]
        }
        fn breaks(&self) -> &'static [&'static str] {
            &["a"]
        }
    }
    impl Lifecycle for Leaf {}
    impl Component for Leaf {
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }
    fn leaf_factory(identifier: &str, fields: &BTreeMap<String, FieldValue>) -> Result<Box<dyn Component>, EngineError> {
        let a = match fields.get("a") {
            Some(FieldValue::Str(s)) => s.clone(),
            _ => String::new(),
        };
        let extra = match fields.get("extra") {
            Some(FieldValue::Int(i)) => *i,
            _ => 0,
        };
        Ok(Box::new(Leaf { identifier: identifier.to_string(), a, extra }))
    }

    struct Parent {
        identifier: String,
        child: NodeId,
        label: String,
    }
    impl ComponentFields for Parent {
        fn component_type(&self) -> &'static str {
            "Parent"
        }
        fn identifier(&self) -> &str {
            &self.identifier
        }
        fn fields(&self) -> Vec<FieldSlot> {
            vec![
                FieldSlot::new("child", FieldValue::Ref(self.child), false),
                FieldSlot::new("label", FieldValue::Str(self.label.clone()), false),
            ]
        }
    }
    impl Lifecycle for Parent {}
    impl Component for Parent {
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }
    fn parent_factory(identifier: &str, fields: &BTreeMap<String, FieldValue>) -> Result<Box<dyn Component>, EngineError> {
        let child = match fields.get("child") {
            Some(FieldValue::Ref(id)) => *id,
            _ => return Err(EngineError::Integrity { component: "Parent".into(), fields: vec!["child".into()] }),
        };
        let label = match fields.get("label") {
            Some(FieldValue::Str(s)) => s.clone(),
            _ => String::new(),
        };
        Ok(Box::new(Parent { identifier: identifier.to_string(), child, label }))
    }

    fn types() -> TypeRegistry {
        let mut t = TypeRegistry::new();
        t.register("Leaf", leaf_factory);
        t.register("Parent", parent_factory);
        t
    }

    /// Persist a tree into the registry by literally running its plan's jobs
    /// — mirrors how `main`'s `apply` verb would drive this in production.
    fn apply_for_real(root: &Path, types: &TypeRegistry, arena: &Arena, id: NodeId, clean: bool) -> Plan {
        let planner = Planner::new(root, types);
        let plan = planner.plan_apply(arena, id, clean).unwrap();
        for job in &plan.jobs {
            job.execute(root, types).unwrap();
        }
        plan
    }

    #[test]
    fn single_new_component_emits_one_create() {
        let tmp = tempdir().unwrap();
        let types = types();
        let mut arena = Arena::new();
        let id = arena.insert(Box::new(Leaf { identifier: "x".into(), a: "value".into(), extra: 0 }));

        let planner = Planner::new(tmp.path(), &types);
        let plan = planner.plan_apply(&arena, id, false).unwrap();
        assert_eq!(plan.jobs.len(), 1);
        assert_eq!(plan.jobs[0].method, Method::Create);
    }

    #[test]
    fn idempotent_reapply_emits_zero_jobs() {
        let tmp = tempdir().unwrap();
        let types = types();
        let mut arena = Arena::new();
        let id = arena.insert(Box::new(Leaf { identifier: "x".into(), a: "value".into(), extra: 0 }));
        apply_for_real(tmp.path(), &types, &arena, id, false);

        let mut arena2 = Arena::new();
        let id2 = arena2.insert(Box::new(Leaf { identifier: "x".into(), a: "value".into(), extra: 0 }));
        let planner = Planner::new(tmp.path(), &types);
        let plan2 = planner.plan_apply(&arena2, id2, false).unwrap();
        assert!(plan2.is_empty());
    }

    #[test]
    fn non_breaking_change_emits_single_update() {
        let tmp = tempdir().unwrap();
        let types = types();
        let mut arena = Arena::new();
        let id = arena.insert(Box::new(Leaf { identifier: "x".into(), a: "value".into(), extra: 1 }));
        apply_for_real(tmp.path(), &types, &arena, id, false);

        let mut arena2 = Arena::new();
        let id2 = arena2.insert(Box::new(Leaf { identifier: "x".into(), a: "value".into(), extra: 2 }));
        let planner = Planner::new(tmp.path(), &types);
        let plan2 = planner.plan_apply(&arena2, id2, false).unwrap();
        assert_eq!(plan2.jobs.len(), 1);
        assert_eq!(plan2.jobs[0].method, Method::Update);
        assert_eq!(arena.uuid(id), arena2.uuid(id2));
    }

    #[test]
    fn breaking_change_emits_delete_then_create_with_dependency() {
        let tmp = tempdir().unwrap();
        let types = types();
        let mut arena = Arena::new();
        let id = arena.insert(Box::new(Leaf { identifier: "x".into(), a: "v1".into(), extra: 0 }));
        apply_for_real(tmp.path(), &types, &arena, id, false);

        let mut arena2 = Arena::new();
        let id2 = arena2.insert(Box::new(Leaf { identifier: "x".into(), a: "v2".into(), extra: 0 }));
        let planner = Planner::new(tmp.path(), &types);
        let plan2 = planner.plan_apply(&arena2, id2, false).unwrap();
        assert_eq!(plan2.jobs.len(), 2);
        assert_eq!(plan2.jobs[0].method, Method::Delete);
        assert_eq!(plan2.jobs[1].method, Method::Create);
        assert_eq!(plan2.jobs[1].dependencies, vec![plan2.jobs[0].job_id.clone()]);
        assert_ne!(arena.uuid(id), arena2.uuid(id2));
    }

    #[test]
    fn nested_breaking_child_updates_parent_with_child_first() {
        let tmp = tempdir().unwrap();
        let types = types();
        let mut arena = Arena::new();
        let child = arena.insert(Box::new(Leaf { identifier: "c".into(), a: "v1".into(), extra: 0 }));
        let parent = arena.insert(Box::new(Parent { identifier: "p".into(), child, label: "x".into() }));
        apply_for_real(tmp.path(), &types, &arena, parent, false);

        let mut arena2 = Arena::new();
        let child2 = arena2.insert(Box::new(Leaf { identifier: "c".into(), a: "v2".into(), extra: 0 }));
        let parent2 = arena2.insert(Box::new(Parent { identifier: "p".into(), child: child2, label: "x".into() }));
        let planner = Planner::new(tmp.path(), &types);
        let plan2 = planner.plan_apply(&arena2, parent2, false).unwrap();

        assert_eq!(plan2.jobs.len(), 3);
        let methods: Vec<_> = plan2.jobs.iter().map(|j| (j.component_type.as_str(), j.method)).collect();
        assert_eq!(methods, vec![("Leaf", Method::Delete), ("Leaf", Method::Create), ("Parent", Method::Update)]);
        // Parent's update depends on the child's create (its last job).
        assert_eq!(plan2.jobs[2].dependencies, vec![plan2.jobs[1].job_id.clone()]);
    }

    #[test]
    fn shared_child_produces_exactly_one_job_set() {
        struct TwoRefs {
            identifier: String,
            a: NodeId,
            b: NodeId,
        }
        impl ComponentFields for TwoRefs {
            fn component_type(&self) -> &'static str {
                "TwoRefs"
            }
            fn identifier(&self) -> &str {
                &self.identifier
            }
            fn fields(&self) -> Vec<FieldSlot> {
                vec![FieldSlot::new("a", FieldValue::Ref(self.a), false), FieldSlot::new("b", FieldValue::Ref(self.b), false)]
            }
        }
        impl Lifecycle for TwoRefs {}
        impl Component for TwoRefs {
            fn as_any(&self) -> &dyn Any {
                self
            }
            fn as_any_mut(&mut self) -> &mut dyn Any {
                self
            }
        }

        let tmp = tempdir().unwrap();
        let mut types = types();
        types.register("TwoRefs", |identifier, fields| {
            let a = match fields.get("a") {
                Some(FieldValue::Ref(id)) => *id,
                _ => panic!("expected ref"),
            };
            let b = match fields.get("b") {
                Some(FieldValue::Ref(id)) => *id,
                _ => panic!("expected ref"),
            };
            Ok(Box::new(TwoRefs { identifier: identifier.to_string(), a, b }))
        });

        let mut arena = Arena::new();
        let child = arena.insert(Box::new(Leaf { identifier: "c".into(), a: "v".into(), extra: 0 }));
        let holder = arena.insert(Box::new(TwoRefs { identifier: "h".into(), a: child, b: child }));

        let planner = Planner::new(tmp.path(), &types);
        let plan = planner.plan_apply(&arena, holder, false).unwrap();
        assert_eq!(plan.jobs.len(), 2); // one create for Leaf, one create for TwoRefs
        assert_eq!(plan.jobs[0].component_type, "Leaf");
        assert_eq!(plan.jobs[1].component_type, "TwoRefs");
        // The holder's single job depends on the child's single job exactly once per reference slot
        // traversed, both pointing at the same job id.
        assert_eq!(plan.jobs[1].dependencies, vec![plan.jobs[0].job_id.clone(), plan.jobs[0].job_id.clone()]);
    }

    #[test]
    fn destroy_inverts_order_parent_before_children() {
        let mut arena = Arena::new();
        let child = arena.insert(Box::new(Leaf { identifier: "c".into(), a: "v".into(), extra: 0 }));
        let parent = arena.insert(Box::new(Parent { identifier: "p".into(), child, label: "x".into() }));

        let tmp = tempdir().unwrap();
        let types = types();
        let planner = Planner::new(tmp.path(), &types);
        let plan = planner.plan_destroy(&arena, parent).unwrap();

        assert_eq!(plan.jobs.len(), 2);
        assert_eq!(plan.jobs[0].component_type, "Parent");
        assert_eq!(plan.jobs[1].component_type, "Leaf");
        assert_eq!(plan.jobs[1].dependencies, vec![plan.jobs[0].job_id.clone()]);
        assert!(plan.jobs.iter().all(|j| !j.raises));
    }

    #[test]
    fn error_marker_is_treated_as_new_and_retried() {
        let tmp = tempdir().unwrap();
        let types = types();

        // Persist directly then force an error marker, simulating a failed prior apply.
        let mut arena = Arena::new();
        let id = arena.insert(Box::new(Leaf { identifier: "x".into(), a: "v1".into(), extra: 0 }));
        let doc = arena.encode(id, false);
        registry::save(tmp.path(), "Leaf", "x", &doc).unwrap();
        registry::mark_error(tmp.path(), "Leaf", "x", "boom").unwrap();

        let mut arena2 = Arena::new();
        let id2 = arena2.insert(Box::new(Leaf { identifier: "x".into(), a: "v1".into(), extra: 0 }));
        let planner = Planner::new(tmp.path(), &types);
        let plan = planner.plan_apply(&arena2, id2, false).unwrap();
        assert_eq!(plan.jobs.len(), 1);
        assert_eq!(plan.jobs[0].method, Method::Create);
    }
}
