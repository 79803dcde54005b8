//! Shared types, error model, capability traits, and configuration for Harvester.
//!
//! This crate is the foundation depended on by all other Harvester crates.
//! It provides:
//! - [`HarvesterError`] and the unified `Result` alias
//! - Domain types ([`TaskCategory`], [`UnitSpec`], [`WorkUnit`], [`ProgressRecord`])
//! - Capability traits ([`Fetcher`], [`CatalogStore`], [`ContentIndexer`])
//! - Configuration ([`AppConfig`], [`PoolConfig`], config loading)

pub mod capabilities;
pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use capabilities::{CatalogStore, ContentIndexer, FetchedContent, Fetcher};
pub use config::{
    AppConfig, BreakersConfig, DefaultsConfig, DiscoveryConfig, ExecutionMode,
    OrchestratorConfig, PoolConfig, RetrievalConfig, RetryConfig, WorkersConfig, config_dir,
    config_file_path, expand_tilde, init_config, load_config, load_config_from,
};
pub use error::{HarvesterError, Result};
pub use types::{
    DiscoveredItem, ProgressRecord, StageKind, TaskCategory, TaskId, TaskStatus, UnitSpec,
    UnitState, WorkUnit, coverage_percent,
};
