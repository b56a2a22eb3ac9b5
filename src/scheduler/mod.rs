//! Cron validation and the recurring-reapply tab-file adapter (§4.5).
//!
//! Grounded in the teacher's `subsystems/cron/{mod,service}.rs` style for
//! the adapter shape, and in `ochre/executors/simple.py`'s tab-file format
//! for the on-disk representation: one physical file per registry
//! (`<REGISTRY>/.crontab`), entries tagged by a trailing `# type/identifier`
//! comment so `cancel`/`schedule` never need to parse the command portion.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::error::EngineError;
use crate::registry;

/// Validate a five-field cron expression (§4.5, §8.3 property 11).
///
/// The `cron` crate parses the extended (seconds-first, year-optional)
/// syntax, not bare five-field crontab syntax, so a `"0 "` seconds field is
/// prepended before delegating — this crate only ever surfaces the
/// five-field form to callers.
pub fn validate_cron(expr: &str) -> Result<(), EngineError> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(EngineError::Schedule(format!(
            "cron expression '{expr}' must have exactly 5 whitespace-separated fields, got {}",
            fields.len()
        )));
    }
    let with_seconds = format!("0 {expr}");
    cron::Schedule::from_str(&with_seconds)
        .map_err(|e| EngineError::Schedule(format!("invalid cron expression '{expr}': {e}")))?;
    Ok(())
}

/// Capability the engine requires of a recurring-reapply adapter (§4.5).
pub trait SchedulerAdapter {
    /// Upsert an entry tagged by `"{component_type}/{identifier}"`, honoring
    /// `cron_expr`. Overwrites any prior entry with the same tag.
    fn schedule(&mut self, root: &Path, component_type: &str, identifier: &str, cron_expr: &str) -> Result<(), EngineError>;

    /// Remove any entry tagged by `"{component_type}/{identifier}"`.
    /// Idempotent.
    fn cancel(&mut self, root: &Path, component_type: &str, identifier: &str) -> Result<(), EngineError>;
}

fn tag(component_type: &str, identifier: &str) -> String {
    format!("{component_type}/{identifier}")
}

fn reapply_command(binary: &str, root: &Path, component_type: &str, identifier: &str) -> String {
    let log_path = registry::cron_log_path(root, component_type, identifier);
    format!(
        "{binary} reapply {component_type} {identifier} --registry {} >> {} 2>&1",
        root.display(),
        log_path.display()
    )
}

/// Remove any line in `lines` tagged `# {tag}`, preserving the rest in
/// order.
fn without_tag<'a>(lines: impl Iterator<Item = &'a str>, wanted_tag: &str) -> Vec<String> {
    let suffix = format!("# {wanted_tag}");
    lines.filter(|l| !l.trim_end().ends_with(&suffix)).map(|l| l.to_string()).collect()
}

/// The reference adapter: maintains `<REGISTRY>/.crontab` as described in
/// §4.5. Installing the tab file into the host's real `crontab` is the
/// binary's concern, not this adapter's.
#[derive(Debug, Default, Clone, Copy)]
pub struct TabFileAdapter {
    /// The name this binary is invoked as, embedded in each `reapply` line.
    pub binary_name: &'static str,
}

impl TabFileAdapter {
    pub fn new(binary_name: &'static str) -> Self {
        TabFileAdapter { binary_name }
    }

    fn read_lines(&self, root: &Path) -> Result<Vec<String>, EngineError> {
        let path = registry::crontab_path(root);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(contents.lines().map(|l| l.to_string()).collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_lines(&self, root: &Path, lines: &[String]) -> Result<(), EngineError> {
        let path = registry::crontab_path(root);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut contents = lines.join("\n");
        if !lines.is_empty() {
            contents.push('\n');
        }
        fs::write(path, contents)?;
        Ok(())
    }
}

impl SchedulerAdapter for TabFileAdapter {
    fn schedule(&mut self, root: &Path, component_type: &str, identifier: &str, cron_expr: &str) -> Result<(), EngineError> {
        validate_cron(cron_expr)?;
        let tag = tag(component_type, identifier);
        let mut lines = without_tag(self.read_lines(root)?.iter().map(|s| s.as_str()), &tag);
        let command = reapply_command(self.binary_name, root, component_type, identifier);
        lines.push(format!("{cron_expr} {command} # {tag}"));
        self.write_lines(root, &lines)
    }

    fn cancel(&mut self, root: &Path, component_type: &str, identifier: &str) -> Result<(), EngineError> {
        let tag = tag(component_type, identifier);
        let lines = self.read_lines(root)?;
        if lines.is_empty() {
            return Ok(());
        }
        let filtered = without_tag(lines.iter().map(|s| s.as_str()), &tag);
        self.write_lines(root, &filtered)
    }
}

/// An in-memory adapter for planner/executor tests that should not touch the
/// filesystem (§4.5: "A test-only adapter... is also provided").
#[derive(Debug, Default)]
pub struct InMemoryAdapter {
    pub entries: std::collections::HashMap<String, String>,
}

impl InMemoryAdapter {
    pub fn new() -> Self {
        InMemoryAdapter { entries: std::collections::HashMap::new() }
    }
}

impl SchedulerAdapter for InMemoryAdapter {
    fn schedule(&mut self, _root: &Path, component_type: &str, identifier: &str, cron_expr: &str) -> Result<(), EngineError> {
        validate_cron(cron_expr)?;
        self.entries.insert(tag(component_type, identifier), cron_expr.to_string());
        Ok(())
    }

    fn cancel(&mut self, _root: &Path, component_type: &str, identifier: &str) -> Result<(), EngineError> {
        self.entries.remove(&tag(component_type, identifier));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn valid_five_field_cron_passes() {
        assert!(validate_cron("0 * * * *").is_ok());
        assert!(validate_cron("*/5 9-17 * * 1-5").is_ok());
    }

    #[test]
    fn wrong_field_count_is_rejected() {
        let err = validate_cron("0 * * *").unwrap_err();
        assert!(matches!(err, EngineError::Schedule(_)));
        let err = validate_cron("0 * * * * *").unwrap_err();
        assert!(matches!(err, EngineError::Schedule(_)));
    }

    #[test]
    fn unparseable_field_is_rejected() {
        let err = validate_cron("nonsense * * * *").unwrap_err();
        assert!(matches!(err, EngineError::Schedule(_)));
    }

    #[test]
    fn tabfile_schedule_then_cancel_round_trips() {
        let tmp = tempdir().unwrap();
        let mut adapter = TabFileAdapter::new("strata");
        adapter.schedule(tmp.path(), "Email", "inbox", "0 * * * *").unwrap();

        let contents = fs::read_to_string(registry::crontab_path(tmp.path())).unwrap();
        assert!(contents.contains("# Email/inbox"));
        assert!(contents.contains("0 * * * *"));
        assert!(contents.contains("reapply Email inbox"));

        adapter.cancel(tmp.path(), "Email", "inbox").unwrap();
        let contents = fs::read_to_string(registry::crontab_path(tmp.path())).unwrap();
        assert!(!contents.contains("Email/inbox"));
    }

    #[test]
    fn rescheduling_overwrites_prior_entry_for_same_tag() {
        let tmp = tempdir().unwrap();
        let mut adapter = TabFileAdapter::new("strata");
        adapter.schedule(tmp.path(), "Email", "inbox", "0 * * * *").unwrap();
        adapter.schedule(tmp.path(), "Email", "inbox", "*/15 * * * *").unwrap();

        let contents = fs::read_to_string(registry::crontab_path(tmp.path())).unwrap();
        assert_eq!(contents.matches("# Email/inbox").count(), 1);
        assert!(contents.contains("*/15 * * * *"));
        assert!(!contents.contains("0 * * * * strata"));
    }

    #[test]
    fn cancel_is_idempotent_on_empty_tabfile() {
        let tmp = tempdir().unwrap();
        let mut adapter = TabFileAdapter::new("strata");
        adapter.cancel(tmp.path(), "Email", "inbox").unwrap();
    }

    #[test]
    fn multiple_components_coexist_in_one_tabfile() {
        let tmp = tempdir().unwrap();
        let mut adapter = TabFileAdapter::new("strata");
        adapter.schedule(tmp.path(), "Email", "inbox", "0 * * * *").unwrap();
        adapter.schedule(tmp.path(), "Slack", "alerts", "*/5 * * * *").unwrap();
        adapter.cancel(tmp.path(), "Email", "inbox").unwrap();

        let contents = fs::read_to_string(registry::crontab_path(tmp.path())).unwrap();
        assert!(!contents.contains("Email/inbox"));
        assert!(contents.contains("Slack/alerts"));
    }

    #[test]
    fn in_memory_adapter_tracks_entries_without_filesystem() {
        let tmp = tempdir().unwrap();
        let mut adapter = InMemoryAdapter::new();
        adapter.schedule(tmp.path(), "Email", "inbox", "0 * * * *").unwrap();
        assert_eq!(adapter.entries.get("Email/inbox"), Some(&"0 * * * *".to_string()));
        adapter.cancel(tmp.path(), "Email", "inbox").unwrap();
        assert!(adapter.entries.is_empty());
        assert!(!registry::crontab_path(tmp.path()).exists());
    }

    #[test]
    fn schedule_rejects_invalid_cron_before_touching_tabfile() {
        let tmp = tempdir().unwrap();
        let mut adapter = TabFileAdapter::new("strata");
        let err = adapter.schedule(tmp.path(), "Email", "inbox", "bogus").unwrap_err();
        assert!(matches!(err, EngineError::Schedule(_)));
        assert!(!registry::crontab_path(tmp.path()).exists());
    }
}
