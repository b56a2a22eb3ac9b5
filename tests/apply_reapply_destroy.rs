//! End-to-end apply → reapply → destroy cycles against the demo component
//! tree, asserting the invariants of spec §8.1 across the whole stack rather
//! than unit-by-unit (per the teacher's `tests/test_docstore.rs` placement).

use strata::component::{decode, Arena, ComponentFields};
use strata::executor::{Executor, SimpleExecutor};
use strata::planner::Planner;
use strata::scheduler::{SchedulerAdapter, TabFileAdapter};
use strata::{demo, registry};

fn apply_tree(root: &std::path::Path, types: &strata::component::TypeRegistry, arena: &Arena, root_id: strata::NodeId, clean: bool) {
    let planner = Planner::new(root, types);
    let plan = planner.plan_apply(arena, root_id, clean).unwrap();
    SimpleExecutor.execute(root, types, &plan).unwrap();
}

#[test]
fn fresh_apply_persists_and_marks_complete() {
    let tmp = tempfile::tempdir().unwrap();
    let types = demo::types();
    let mut arena = Arena::new();
    let root_id = demo::build_example(&mut arena);
    let root_type = arena.get(root_id).component_type().to_string();
    let root_ident = arena.get(root_id).identifier().to_string();

    apply_tree(tmp.path(), &types, &arena, root_id, false);

    assert!(registry::exists(tmp.path(), &root_type, &root_ident));
    assert_eq!(registry::status(tmp.path(), &root_type, &root_ident).unwrap(), registry::Status::Complete);
    for child in arena.get_children(root_id, false) {
        let obj = arena.get(child);
        assert!(registry::exists(tmp.path(), obj.component_type(), obj.identifier()));
    }
}

#[test]
fn idempotent_reapply_emits_no_jobs() {
    let tmp = tempfile::tempdir().unwrap();
    let types = demo::types();
    let mut arena = Arena::new();
    let root_id = demo::build_example(&mut arena);
    apply_tree(tmp.path(), &types, &arena, root_id, false);

    // Re-apply the identical tree: planner property 4, "planner idempotence".
    let mut arena2 = Arena::new();
    let root_id2 = demo::build_example(&mut arena2);
    let planner = Planner::new(tmp.path(), &types);
    let plan2 = planner.plan_apply(&arena2, root_id2, false).unwrap();
    assert!(plan2.is_empty());
}

#[test]
fn reapply_verb_loads_from_registry_and_reconciles() {
    let tmp = tempfile::tempdir().unwrap();
    let types = demo::types();
    let mut arena = Arena::new();
    let root_id = demo::build_example(&mut arena);
    let root_type = arena.get(root_id).component_type().to_string();
    let root_ident = arena.get(root_id).identifier().to_string();
    apply_tree(tmp.path(), &types, &arena, root_id, false);

    // Simulate the `reapply` CLI verb: load straight from the registry
    // (no live tree the caller constructed) and re-plan against it.
    let doc = registry::load(tmp.path(), &root_type, &root_ident).unwrap();
    let mut loaded_arena = Arena::new();
    let mut loader = |ctype: &str, cid: &str| registry::load(tmp.path(), ctype, cid);
    let loaded_root = decode(&mut loaded_arena, &types, &doc, &mut loader).unwrap();

    let planner = Planner::new(tmp.path(), &types);
    let plan = planner.plan_apply(&loaded_arena, loaded_root, false).unwrap();
    assert!(plan.is_empty(), "unchanged reapply should be a no-op");
}

#[test]
fn destroy_removes_root_and_all_children() {
    let tmp = tempfile::tempdir().unwrap();
    let types = demo::types();
    let mut arena = Arena::new();
    let root_id = demo::build_example(&mut arena);
    let root_type = arena.get(root_id).component_type().to_string();
    let root_ident = arena.get(root_id).identifier().to_string();
    let children: Vec<(String, String)> = arena
        .get_children(root_id, false)
        .into_iter()
        .map(|c| (arena.get(c).component_type().to_string(), arena.get(c).identifier().to_string()))
        .collect();
    apply_tree(tmp.path(), &types, &arena, root_id, false);

    let planner = Planner::new(tmp.path(), &types);
    let plan = planner.plan_destroy(&arena, root_id).unwrap();
    // Destroy inversion (§8.1 property 7): root's delete precedes children's.
    assert_eq!(plan.jobs[0].component_type, root_type);
    SimpleExecutor.execute(tmp.path(), &types, &plan).unwrap();

    assert!(!registry::exists(tmp.path(), &root_type, &root_ident));
    for (ctype, cident) in children {
        assert!(!registry::exists(tmp.path(), &ctype, &cident));
    }
}

#[test]
fn error_recovery_retries_as_new_after_prior_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let types = demo::types();
    let mut arena = Arena::new();
    let root_id = demo::build_example(&mut arena);
    let root_type = arena.get(root_id).component_type().to_string();
    let root_ident = arena.get(root_id).identifier().to_string();

    // Persist directly, then force an error marker to simulate a failed
    // first apply (§8.2 scenario 7).
    let doc = arena.encode(root_id, false);
    registry::save(tmp.path(), &root_type, &root_ident, &doc).unwrap();
    registry::mark_error(tmp.path(), &root_type, &root_ident, "boom").unwrap();

    let mut arena2 = Arena::new();
    let root_id2 = demo::build_example(&mut arena2);
    let planner = Planner::new(tmp.path(), &types);
    let plan = planner.plan_apply(&arena2, root_id2, false).unwrap();
    assert!(!plan.is_empty(), "an errored prior entry should be retried as new");

    SimpleExecutor.execute(tmp.path(), &types, &plan).unwrap();
    assert_eq!(registry::status(tmp.path(), &root_type, &root_ident).unwrap(), registry::Status::Complete);
}

#[test]
fn scheduling_lifecycle_follows_root_cron_field() {
    let tmp = tempfile::tempdir().unwrap();
    let types = demo::types();

    // Root with a cron expression: apply should schedule.
    let mut arena = Arena::new();
    let n1 = arena.insert(Box::new(demo::Note::new("only", "hi", "greeting")));
    let root_id = arena.insert(Box::new(demo::Folder {
        identifier: "scheduled".into(),
        notes: vec![n1],
        cron: "0 * * * *".into(),
    }));
    apply_tree(tmp.path(), &types, &arena, root_id, false);

    let mut adapter = TabFileAdapter::new("strata");
    adapter.schedule(tmp.path(), "Folder", "scheduled", "0 * * * *").unwrap();
    let contents = std::fs::read_to_string(registry::crontab_path(tmp.path())).unwrap();
    assert!(contents.contains("Folder/scheduled"));

    adapter.cancel(tmp.path(), "Folder", "scheduled").unwrap();
    let contents = std::fs::read_to_string(registry::crontab_path(tmp.path())).unwrap();
    assert!(!contents.contains("Folder/scheduled"));
}
