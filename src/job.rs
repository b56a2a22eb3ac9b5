//! A single unit of lifecycle work and its execution procedure (§3.5, §4.4).
//!
//! Grounded on `ochre/job.py`'s `Job` dataclass and `execute()` method,
//! adapted to the arena-indexed component model: `Job::execute` decodes its
//! own `data` into a fresh, single-use [`Arena`] rather than operating on a
//! shared live tree.

use std::path::Path;

use crate::component::{decode, Arena, TypeRegistry};
use crate::error::EngineError;
use crate::registry;

/// One of the three lifecycle transitions a job drives (§3.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Create,
    Update,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Create => "create",
            Method::Update => "update",
            Method::Delete => "delete",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque unique job token (§3.5). A thin wrapper over a `uuid` v4 string so
/// dependency lists compare cheaply without needing the whole [`Job`].
pub type JobId = String;

/// A unit of lifecycle work emitted by the planner and run by the executor.
#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: JobId,
    pub method: Method,
    pub component_type: String,
    pub identifier: String,
    /// The component's identity hash at plan time — part of `huuid`, not
    /// re-derived at execution time (the plan was computed against this
    /// exact version).
    pub uuid: String,
    /// The encoded component definition to decode and act on (§4.1).
    pub data: serde_json::Value,
    pub dependencies: Vec<JobId>,
    /// Whether a failure of this job aborts the run (§4.4, §7).
    pub raises: bool,
    pub time: chrono::DateTime<chrono::Utc>,
}

impl Job {
    pub fn new(
        method: Method,
        component_type: impl Into<String>,
        identifier: impl Into<String>,
        uuid: impl Into<String>,
        data: serde_json::Value,
        dependencies: Vec<JobId>,
        raises: bool,
    ) -> Self {
        Job {
            job_id: uuid::Uuid::new_v4().to_string(),
            method,
            component_type: component_type.into(),
            identifier: identifier.into(),
            uuid: uuid.into(),
            data,
            dependencies,
            raises,
            time: chrono::Utc::now(),
        }
    }

    /// `"{component}/{identifier}/{uuid}.{method}"` (§3.5).
    pub fn huuid(&self) -> String {
        format!("{}/{}/{}.{}", self.component_type, self.identifier, self.uuid, self.method)
    }

    /// Run this job's lifecycle procedure against `root` (§4.4 step-by-step):
    ///
    /// 1. Create the component directory if absent; mark `in_progress`.
    /// 2. Load any existing `component.json` as `previous`.
    /// 3. Decode `data` into a live component.
    /// 4. Invoke the lifecycle method named by `method`.
    /// 5. On success: mark `complete`; persist (create/update) or remove
    ///    (delete) the on-disk record.
    /// 6. On failure: mark `error`; if `raises`, restore `previous` and
    ///    return the error so the executor aborts the run.
    pub fn execute(&self, root: &Path, types: &TypeRegistry) -> Result<(), EngineError> {
        registry::mark_in_progress(root, &self.component_type, &self.identifier)?;
        let previous = registry::load(root, &self.component_type, &self.identifier).ok();

        let mut arena = Arena::new();
        let mut loader = |ctype: &str, cid: &str| registry::load(root, ctype, cid);
        let node_id = match decode(&mut arena, types, &self.data, &mut loader) {
            Ok(id) => id,
            Err(e) => {
                registry::mark_error(root, &self.component_type, &self.identifier, &e.to_string())?;
                return Err(e);
            }
        };

        arena.get_mut(node_id).read();

        let hook_result = match self.method {
            Method::Create => arena.get_mut(node_id).create(),
            Method::Update => arena.get_mut(node_id).update(),
            Method::Delete => arena.get_mut(node_id).delete(),
        };

        match hook_result {
            Ok(()) => {
                registry::mark_complete(root, &self.component_type, &self.identifier)?;
                match self.method {
                    Method::Create | Method::Update => {
                        let doc = arena.encode(node_id, false);
                        registry::save(root, &self.component_type, &self.identifier, &doc)?;
                    }
                    Method::Delete => {
                        registry::rm(root, &self.component_type, &self.identifier)?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                registry::mark_error(root, &self.component_type, &self.identifier, &message)?;
                if self.raises {
                    if let Some(prev) = previous {
                        registry::save(root, &self.component_type, &self.identifier, &prev)?;
                    }
                }
                Err(EngineError::Lifecycle { huuid: self.huuid(), method: self.method.as_str().to_string(), message })
            }
        }
    }
}
