//! Run a [`Plan`]'s jobs in dependency order (§4.4).
//!
//! Grounded on `ochre/executors/simple.py`'s sequential driver and on the
//! teacher's `store.rs` trait-with-defaults idiom: [`Executor`] is a small
//! trait with one required method so alternate executors (batching,
//! remote dispatch) are drop-in, even though this crate only ships the one
//! sequential implementation the spec calls for.

use std::path::Path;

use crate::component::TypeRegistry;
use crate::error::EngineError;
use crate::planner::Plan;

/// Capability the engine requires to run a plan (§4.4's "Scheduling model").
pub trait Executor {
    /// Run every job in `plan`, in the order given (already a valid
    /// topological order — see [`crate::planner::Planner`]).
    ///
    /// A raising job's failure aborts the run and its error propagates; a
    /// non-raising job's failure is logged and execution continues (§4.4
    /// step 6, §7).
    fn execute(&self, root: &Path, types: &TypeRegistry, plan: &Plan) -> Result<(), EngineError>;
}

/// Single-threaded, cooperative sequential executor — the reference
/// implementation (§4.4, §5: "Entirely single-threaded and sequential
/// inside one apply or destroy invocation").
#[derive(Debug, Default, Clone, Copy)]
pub struct SimpleExecutor;

impl Executor for SimpleExecutor {
    fn execute(&self, root: &Path, types: &TypeRegistry, plan: &Plan) -> Result<(), EngineError> {
        for job in &plan.jobs {
            tracing::info!(huuid = %job.huuid(), method = %job.method, "executing job");
            match job.execute(root, types) {
                Ok(()) => {
                    tracing::debug!(huuid = %job.huuid(), "job complete");
                }
                Err(e) => {
                    if job.raises {
                        tracing::error!(huuid = %job.huuid(), error = %e, "raising job failed, aborting run");
                        return Err(e);
                    }
                    tracing::warn!(huuid = %job.huuid(), error = %e, "non-raising job failed, continuing");
                }
            }
        }
        Ok(())
    }
}
