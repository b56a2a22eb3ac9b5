//! Filesystem registry: the on-disk persisted form of a component tree
//! (§3.4, §4.4.1).
//!
//! ```text
//! <REGISTRY>/<ComponentType>/<Identifier>/
//!     component.json            # encoded definition
//!     files/<name>               # side-files written by the component
//!     .status/in_progress        # transient marker
//!     .status/complete           # success marker
//!     .status/error              # failure marker; content = error message
//!     cron.log                   # re-apply log (optional)
//! ```
//!
//! Grounded on the teacher's directory-scanning idiom (its deleted
//! `identity.rs` walked a fixed tree of named subdirectories the same way)
//! and on `docstore_manager.rs`'s orphan-scan pattern for [`list`].

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::EngineError;

/// The on-disk status of a single registry entry (§3.4, §4.4, §8.1).
#[derive(Debug, Clone, PartialEq)]
pub enum Status {
    /// No status marker present — nothing has ever attempted a job here.
    None,
    InProgress,
    Complete,
    Error(String),
}

fn dir(root: &Path, component_type: &str, identifier: &str) -> PathBuf {
    root.join(component_type).join(identifier)
}

fn component_json_path(root: &Path, component_type: &str, identifier: &str) -> PathBuf {
    dir(root, component_type, identifier).join("component.json")
}

fn status_dir(root: &Path, component_type: &str, identifier: &str) -> PathBuf {
    dir(root, component_type, identifier).join(".status")
}

fn files_dir(root: &Path, component_type: &str, identifier: &str) -> PathBuf {
    dir(root, component_type, identifier).join("files")
}

/// `<REGISTRY>/.crontab` — the single tab file shared by the whole registry
/// (§4.5).
pub fn crontab_path(root: &Path) -> PathBuf {
    root.join(".crontab")
}

/// `<REGISTRY>/<type>/<id>/cron.log` — re-apply output log (§3.4).
pub fn cron_log_path(root: &Path, component_type: &str, identifier: &str) -> PathBuf {
    dir(root, component_type, identifier).join("cron.log")
}

/// Persist an encoded component document, creating its directory if absent.
/// Pretty-printed with stable (sorted) key order (§4.4.1) — guaranteed by
/// `serde_json::Map`'s `BTreeMap` backing, since this crate does not enable
/// the `preserve_order` feature.
pub fn save(root: &Path, component_type: &str, identifier: &str, doc: &serde_json::Value) -> Result<(), EngineError> {
    let path = component_json_path(root, component_type, identifier);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let rendered = serde_json::to_string_pretty(doc)?;
    fs::write(path, rendered)?;
    Ok(())
}

/// Load and parse a persisted component document.
/// [`EngineError::NotFound`] when the entry does not exist.
pub fn load(root: &Path, component_type: &str, identifier: &str) -> Result<serde_json::Value, EngineError> {
    let path = component_json_path(root, component_type, identifier);
    let raw = fs::read_to_string(&path).map_err(|_| EngineError::NotFound(format!("{component_type}:{identifier}")))?;
    let doc = serde_json::from_str(&raw)?;
    Ok(doc)
}

/// Whether a persisted entry exists at all, without parsing it.
pub fn exists(root: &Path, component_type: &str, identifier: &str) -> bool {
    component_json_path(root, component_type, identifier).is_file()
}

/// Remove a registry entry's entire directory (§4.4 step 5, delete jobs).
/// Idempotent: absent entries are not an error.
pub fn rm(root: &Path, component_type: &str, identifier: &str) -> Result<(), EngineError> {
    let path = dir(root, component_type, identifier);
    match fs::remove_dir_all(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Read the current status marker. "Only one of `{in_progress, complete,
/// error}` should be present at rest" (§3.4) — when more than one marker
/// file exists (a prior crash), the most severe wins: `error` > `in_progress`
/// > `complete`.
pub fn status(root: &Path, component_type: &str, identifier: &str) -> Result<Status, EngineError> {
    let dir = status_dir(root, component_type, identifier);
    let error_path = dir.join("error");
    if error_path.is_file() {
        let message = fs::read_to_string(&error_path)?;
        return Ok(Status::Error(message));
    }
    if dir.join("in_progress").is_file() {
        return Ok(Status::InProgress);
    }
    if dir.join("complete").is_file() {
        return Ok(Status::Complete);
    }
    Ok(Status::None)
}

fn clear_status(root: &Path, component_type: &str, identifier: &str) -> Result<(), EngineError> {
    let dir = status_dir(root, component_type, identifier);
    for marker in ["in_progress", "complete", "error"] {
        let path = dir.join(marker);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Write the transient `in_progress` marker, clearing any stale marker first.
pub fn mark_in_progress(root: &Path, component_type: &str, identifier: &str) -> Result<(), EngineError> {
    let dir = status_dir(root, component_type, identifier);
    fs::create_dir_all(&dir)?;
    clear_status(root, component_type, identifier)?;
    fs::write(dir.join("in_progress"), b"")?;
    Ok(())
}

/// Write `complete`, removing `in_progress`.
pub fn mark_complete(root: &Path, component_type: &str, identifier: &str) -> Result<(), EngineError> {
    let dir = status_dir(root, component_type, identifier);
    fs::create_dir_all(&dir)?;
    clear_status(root, component_type, identifier)?;
    fs::write(dir.join("complete"), b"")?;
    Ok(())
}

/// Write `error` with `message` as its content, removing `in_progress`.
pub fn mark_error(root: &Path, component_type: &str, identifier: &str, message: &str) -> Result<(), EngineError> {
    let dir = status_dir(root, component_type, identifier);
    fs::create_dir_all(&dir)?;
    clear_status(root, component_type, identifier)?;
    fs::write(dir.join("error"), message)?;
    Ok(())
}

/// Write a side-file under `files/<name>` for a component.
pub fn save_file(root: &Path, component_type: &str, identifier: &str, name: &str, contents: &[u8]) -> Result<(), EngineError> {
    let dir = files_dir(root, component_type, identifier);
    fs::create_dir_all(&dir)?;
    fs::write(dir.join(name), contents)?;
    Ok(())
}

/// Read a side-file, as bytes.
pub fn read_binary_file(root: &Path, component_type: &str, identifier: &str, name: &str) -> Result<Vec<u8>, EngineError> {
    let path = files_dir(root, component_type, identifier).join(name);
    Ok(fs::read(path)?)
}

/// Read a side-file, as UTF-8 text.
pub fn read_text_file(root: &Path, component_type: &str, identifier: &str, name: &str) -> Result<String, EngineError> {
    let path = files_dir(root, component_type, identifier).join(name);
    Ok(fs::read_to_string(path)?)
}

/// Remove a side-file. Idempotent.
pub fn rm_file(root: &Path, component_type: &str, identifier: &str, name: &str) -> Result<(), EngineError> {
    let path = files_dir(root, component_type, identifier).join(name);
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Enumerate every `(component_type, identifier)` pair currently persisted
/// under `root`, by walking its two-level directory structure. Used by
/// orphan/garbage-collection tooling and by `main`'s `enter`/`destroy`
/// verbs when only a type is known.
pub fn list(root: &Path) -> Result<Vec<(String, String)>, EngineError> {
    let mut out = Vec::new();
    if !root.is_dir() {
        return Ok(out);
    }
    for type_entry in fs::read_dir(root)? {
        let type_entry = type_entry?;
        if !type_entry.file_type()?.is_dir() {
            continue;
        }
        let component_type = type_entry.file_name().to_string_lossy().to_string();
        if component_type.starts_with('.') {
            continue;
        }
        for id_entry in fs::read_dir(type_entry.path())? {
            let id_entry = id_entry?;
            if !id_entry.file_type()?.is_dir() {
                continue;
            }
            let identifier = id_entry.file_name().to_string_lossy().to_string();
            if component_json_path(root, &component_type, &identifier).is_file() {
                out.push((component_type, identifier));
            }
        }
    }
    out.sort();
    Ok(out)
}
