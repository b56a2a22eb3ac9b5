//! Engine-wide error types.

use thiserror::Error;

/// Errors raised by any stage of the engine: value codec, component model,
/// registry I/O, planner, executor, or scheduler adapter.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A referenced component (`?type:id`, or `registry::load`) is absent
    /// from both the in-payload `_builds` map and the registry.
    #[error("component not found: {0}")]
    NotFound(String),

    /// An encoded payload could not be reconstructed into a live component.
    #[error("decode error ({huuid}): {message}")]
    Decode { huuid: String, message: String },

    /// A decoded field set did not match the target component type's schema.
    #[error("integrity error in {component}: unexpected fields {fields:?}")]
    Integrity {
        component: String,
        fields: Vec<String>,
    },

    /// A user lifecycle hook (`create`/`update`/`delete`) failed.
    #[error("lifecycle hook '{method}' failed for {huuid}: {message}")]
    Lifecycle {
        huuid: String,
        method: String,
        message: String,
    },

    /// An engine invariant was violated (should never happen in practice).
    #[error("internal error: {0}")]
    Internal(String),

    /// Logger initialisation failed.
    #[error("logger error: {0}")]
    Logger(String),

    /// Configuration could not be resolved.
    #[error("config error: {0}")]
    Config(String),

    /// The scheduler adapter rejected a cron expression or tab-file entry.
    #[error("scheduler error: {0}")]
    Schedule(String),

    /// Wrapped filesystem I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapped JSON (de)serialization failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
