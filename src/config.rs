#![cfg_attr(test, allow(dead_code))]
//! Configuration loading with env-var overrides.
//!
//! Resolution order mirrors the teacher's `config::load()`: an explicit CLI
//! flag, then an environment variable, then a hardcoded default. This
//! engine's config surface is small — registry root, log level, and the
//! default executor name — so no TOML defaults file is needed.

use std::path::PathBuf;

use crate::error::EngineError;

/// Resolved engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the content-addressed component registry.
    pub registry: PathBuf,
    /// `tracing` env-filter level string.
    pub log_level: String,
    /// Name of the executor implementation to run plans with.
    pub executor: String,
}

impl Config {
    /// Default registry root relative to the current working directory.
    pub const DEFAULT_REGISTRY: &'static str = "registry";
    /// Default tracing level.
    pub const DEFAULT_LOG_LEVEL: &'static str = "info";
    /// Default executor name, matching the original's `Plan.executor` default.
    pub const DEFAULT_EXECUTOR: &'static str = "simple";

    /// A config rooted at `dir`, used by tests that need an isolated registry.
    pub fn test_default(dir: &std::path::Path) -> Self {
        Config {
            registry: dir.join(Self::DEFAULT_REGISTRY),
            log_level: Self::DEFAULT_LOG_LEVEL.into(),
            executor: Self::DEFAULT_EXECUTOR.into(),
        }
    }
}

/// Resolve [`Config`] from explicit CLI overrides, then environment
/// variables, then defaults.
///
/// Precedence (highest first): `--registry` / `STRATA_REGISTRY` / `./registry`;
/// `--log-level` / `RUST_LOG` / `"info"`; `STRATA_EXECUTOR` / `"simple"`.
pub fn load(
    registry_flag: Option<String>,
    log_level_flag: Option<String>,
) -> Result<Config, EngineError> {
    let registry = registry_flag
        .or_else(|| std::env::var("STRATA_REGISTRY").ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(Config::DEFAULT_REGISTRY));

    let log_level = log_level_flag
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| Config::DEFAULT_LOG_LEVEL.to_string());

    let executor = std::env::var("STRATA_EXECUTOR").unwrap_or_else(|_| Config::DEFAULT_EXECUTOR.to_string());

    Ok(Config {
        registry,
        log_level,
        executor,
    })
}
