//! `strata` — the engine's CLI entry point (§6.2).
//!
//! Startup sequence (grounded in the teacher's `main.rs`):
//!   1. Load .env (if present)
//!   2. Init logger at "info" (hardcoded; config resolution happens after)
//!   3. Parse argv into a verb + flags
//!   4. Resolve config (registry root, log level, executor — `--log-level`
//!      only affects `RUST_LOG` going forward, it does not re-init tracing)
//!   5. Dispatch to the verb, exit 1 on any error
//!
//! Five verbs: `apply`, `reapply`, `destroy`, `test`, `enter`. Because Rust
//! has no dynamic module-import story, "module+symbol path" (§6.2) is
//! satisfied by a small in-binary registry mapping a string name to a
//! `build_example()`-style factory — this binary links in exactly the demo
//! component types (`strata::demo`).

use std::io::Write;
use std::process;

use strata::component::{Arena, Component, ComponentFields, Lifecycle, TypeRegistry};
use strata::executor::{Executor, SimpleExecutor};
use strata::planner::Planner;
use strata::scheduler::{SchedulerAdapter, TabFileAdapter};
use strata::value::NodeId;
use strata::{config, demo, logger, registry, EngineError};

const BINARY_NAME: &str = "strata";

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), EngineError> {
    let _ = dotenvy::dotenv();
    logger::init("info")?;

    let args = parse_args();
    let Some(verb) = args.verb else {
        print_help();
        process::exit(1);
    };

    let cfg = config::load(args.registry.clone(), args.log_level.clone())?;
    tracing::info!(registry = %cfg.registry.display(), executor = %cfg.executor, "config loaded");

    match verb.as_str() {
        "apply" => cmd_apply(&cfg.registry, &args),
        "reapply" => cmd_reapply(&cfg.registry, &args),
        "destroy" => cmd_destroy(&cfg.registry, &args),
        "test" => cmd_test(&cfg.registry, &args),
        "enter" => cmd_enter(&cfg.registry, &args),
        "--help" | "-h" | "help" => {
            print_help();
            Ok(())
        }
        other => Err(EngineError::Internal(format!("unknown verb '{other}' — run 'strata --help'"))),
    }
}

// ── Argument parsing ─────────────────────────────────────────────────────

struct Args {
    verb: Option<String>,
    positionals: Vec<String>,
    force: bool,
    clean: bool,
    registry: Option<String>,
    log_level: Option<String>,
}

fn parse_args() -> Args {
    let mut iter = std::env::args().skip(1).peekable();
    let mut verb = None;
    let mut positionals = Vec::new();
    let mut force = false;
    let mut clean = false;
    let mut registry = None;
    let mut log_level = None;

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--force" | "-f" => force = true,
            "--clean" => clean = true,
            "--registry" => registry = iter.next(),
            "--log-level" => log_level = iter.next(),
            "--help" | "-h" if verb.is_none() => {
                print_help();
                process::exit(0);
            }
            _ if verb.is_none() => verb = Some(arg),
            _ => positionals.push(arg),
        }
    }

    Args { verb, positionals, force, clean, registry, log_level }
}

fn print_help() {
    eprintln!("usage: strata <verb> [args...] [flags]");
    eprintln!();
    eprintln!("verbs:");
    eprintln!("  apply <example>               build, plan, confirm, execute, schedule");
    eprintln!("  reapply <type> <identifier>   force-apply from the registry, no prompt (cron)");
    eprintln!("  destroy <type> <identifier>   plan deletes, confirm, execute, cancel schedule");
    eprintln!("  test <example>                build_example, apply, destroy (smoke test)");
    eprintln!("  enter <type> <id> <method>    load and invoke a named lifecycle method");
    eprintln!();
    eprintln!("flags:");
    eprintln!("  --force, -f            skip the confirmation prompt");
    eprintln!("  --clean                on apply, delete any stray on-disk leftovers before create");
    eprintln!("  --registry <path>      override the registry root (default: ./registry)");
    eprintln!("  --log-level <level>    override RUST_LOG (default: info)");
    eprintln!();
    eprintln!("available examples: {}", demo::EXAMPLE_NAME);
}

/// Resolve an in-binary example name to its `build_example()`-equivalent.
fn resolve_example(name: &str) -> Result<fn(&mut Arena) -> NodeId, EngineError> {
    match name {
        demo::EXAMPLE_NAME => Ok(demo::build_example),
        other => Err(EngineError::Internal(format!(
            "unknown example '{other}' — available: {}",
            demo::EXAMPLE_NAME
        ))),
    }
}

fn types() -> TypeRegistry {
    demo::types()
}

// ── Plan confirmation / printing (§7: "prints the plan as a labeled table
// before execution and requires confirmation unless forced") ──────────────

fn print_plan(plan: &strata::planner::Plan) {
    if plan.is_empty() {
        println!("plan: no changes");
        return;
    }
    println!("plan: {} job(s)", plan.jobs.len());
    for line in plan.summary() {
        println!("  {line}");
    }
}

fn confirm(force: bool, prompt: &str) -> Result<bool, EngineError> {
    if force {
        return Ok(true);
    }
    print!("{prompt} [y/N] ");
    std::io::stdout().flush().ok();
    let mut input = String::new();
    std::io::stdin().read_line(&mut input).map_err(|e| EngineError::Internal(e.to_string()))?;
    Ok(matches!(input.trim().to_lowercase().as_str(), "y" | "yes"))
}

// ── apply ────────────────────────────────────────────────────────────────

fn cmd_apply(root: &std::path::Path, args: &Args) -> Result<(), EngineError> {
    let name = args.positionals.first().ok_or_else(|| EngineError::Internal("apply requires <example>".into()))?;
    let build = resolve_example(name)?;
    let types = types();

    let mut arena = Arena::new();
    let root_id = build(&mut arena);

    let prior_cron = load_prior_cron(root, &types, &arena, root_id)?;

    let planner = Planner::new(root, &types);
    let plan = planner.plan_apply(&arena, root_id, args.clean)?;
    print_plan(&plan);

    if plan.is_empty() {
        return Ok(());
    }
    if !confirm(args.force, "proceed with apply?")? {
        println!("aborted");
        process::exit(1);
    }

    SimpleExecutor.execute(root, &types, &plan)?;

    reconcile_schedule(root, &arena, root_id, prior_cron)?;
    println!("apply complete");
    Ok(())
}

/// Read whatever `cron` value the registry currently has for this root,
/// before the apply overwrites it — needed to decide whether to cancel a
/// schedule the new definition no longer carries (§4.5).
fn load_prior_cron(root: &std::path::Path, types: &TypeRegistry, arena: &Arena, root_id: NodeId) -> Result<Option<String>, EngineError> {
    let obj = arena.get(root_id);
    match registry::load(root, obj.component_type(), obj.identifier()) {
        Ok(doc) => {
            let mut prior_arena = Arena::new();
            let mut loader = |ctype: &str, cid: &str| registry::load(root, ctype, cid);
            let prior_id = strata::component::decode(&mut prior_arena, types, &doc, &mut loader)?;
            Ok(prior_arena.get(prior_id).cron())
        }
        Err(EngineError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// §4.5: "On apply: if new component has cron → schedule; else if prior had
/// cron → cancel."
fn reconcile_schedule(root: &std::path::Path, arena: &Arena, root_id: NodeId, prior_cron: Option<String>) -> Result<(), EngineError> {
    let obj = arena.get(root_id);
    let mut adapter = TabFileAdapter::new(BINARY_NAME);
    match obj.cron() {
        Some(expr) => adapter.schedule(root, obj.component_type(), obj.identifier(), &expr)?,
        None if prior_cron.is_some() => adapter.cancel(root, obj.component_type(), obj.identifier())?,
        None => {}
    }
    Ok(())
}

// ── reapply ──────────────────────────────────────────────────────────────

fn cmd_reapply(root: &std::path::Path, args: &Args) -> Result<(), EngineError> {
    let component_type =
        args.positionals.first().ok_or_else(|| EngineError::Internal("reapply requires <type> <identifier>".into()))?;
    let identifier =
        args.positionals.get(1).ok_or_else(|| EngineError::Internal("reapply requires <type> <identifier>".into()))?;

    let types = types();
    let doc = registry::load(root, component_type, identifier)?;
    let mut arena = Arena::new();
    let mut loader = |ctype: &str, cid: &str| registry::load(root, ctype, cid);
    let root_id = strata::component::decode(&mut arena, &types, &doc, &mut loader)?;

    let planner = Planner::new(root, &types);
    let plan = planner.plan_apply(&arena, root_id, false)?;
    print_plan(&plan);
    // reapply is force-applied with no prompt, and never re-schedules — a
    // cron firing should not rewrite its own tab entry (§6.2).
    SimpleExecutor.execute(root, &types, &plan)?;
    println!("reapply complete");
    Ok(())
}

// ── destroy ──────────────────────────────────────────────────────────────

fn cmd_destroy(root: &std::path::Path, args: &Args) -> Result<(), EngineError> {
    let component_type =
        args.positionals.first().ok_or_else(|| EngineError::Internal("destroy requires <type> <identifier>".into()))?;
    let identifier =
        args.positionals.get(1).ok_or_else(|| EngineError::Internal("destroy requires <type> <identifier>".into()))?;

    let types = types();
    let doc = registry::load(root, component_type, identifier)?;
    let mut arena = Arena::new();
    let mut loader = |ctype: &str, cid: &str| registry::load(root, ctype, cid);
    let root_id = strata::component::decode(&mut arena, &types, &doc, &mut loader)?;

    let planner = Planner::new(root, &types);
    let plan = planner.plan_destroy(&arena, root_id)?;
    print_plan(&plan);

    if plan.is_empty() {
        return Ok(());
    }
    if !confirm(args.force, "proceed with destroy?")? {
        println!("aborted");
        process::exit(1);
    }

    // §4.5: "On destroy: always cancel before executing deletes."
    let mut adapter = TabFileAdapter::new(BINARY_NAME);
    adapter.cancel(root, component_type, identifier)?;

    SimpleExecutor.execute(root, &types, &plan)?;
    println!("destroy complete");
    Ok(())
}

// ── test ─────────────────────────────────────────────────────────────────

fn cmd_test(root: &std::path::Path, args: &Args) -> Result<(), EngineError> {
    let name = args.positionals.first().ok_or_else(|| EngineError::Internal("test requires <example>".into()))?;
    let build = resolve_example(name)?;
    let types = types();

    let mut arena = Arena::new();
    let root_id = build(&mut arena);
    let obj = arena.get(root_id);
    let component_type = obj.component_type().to_string();
    let identifier = obj.identifier().to_string();

    println!("test: applying {component_type}/{identifier}");
    let planner = Planner::new(root, &types);
    let apply_plan = planner.plan_apply(&arena, root_id, false)?;
    print_plan(&apply_plan);
    SimpleExecutor.execute(root, &types, &apply_plan)?;

    println!("test: destroying {component_type}/{identifier}");
    let destroy_plan = planner.plan_destroy(&arena, root_id)?;
    print_plan(&destroy_plan);
    SimpleExecutor.execute(root, &types, &destroy_plan)?;

    println!("test complete: {component_type}/{identifier}");
    Ok(())
}

// ── enter ────────────────────────────────────────────────────────────────

fn cmd_enter(root: &std::path::Path, args: &Args) -> Result<(), EngineError> {
    let component_type =
        args.positionals.first().ok_or_else(|| EngineError::Internal("enter requires <type> <identifier> <method>".into()))?;
    let identifier =
        args.positionals.get(1).ok_or_else(|| EngineError::Internal("enter requires <type> <identifier> <method>".into()))?;
    let method =
        args.positionals.get(2).ok_or_else(|| EngineError::Internal("enter requires <type> <identifier> <method>".into()))?;

    let types = types();
    let doc = registry::load(root, component_type, identifier)?;
    let mut arena = Arena::new();
    let mut loader = |ctype: &str, cid: &str| registry::load(root, ctype, cid);
    let root_id = strata::component::decode(&mut arena, &types, &doc, &mut loader)?;

    arena.get_mut(root_id).read();
    let huuid = arena.huuid(root_id);
    let result = match method.as_str() {
        "read" => Ok(()),
        "create" => arena.get_mut(root_id).create(),
        "update" => arena.get_mut(root_id).update(),
        "delete" => arena.get_mut(root_id).delete(),
        other => return Err(EngineError::Internal(format!("unknown lifecycle method '{other}'"))),
    };

    result.map_err(|e| EngineError::Lifecycle { huuid: huuid.clone(), method: method.clone(), message: e.to_string() })?;
    println!("enter: invoked '{method}' on {huuid}");
    Ok(())
}
