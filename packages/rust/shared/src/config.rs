//! Application configuration for Harvester.
//!
//! User config lives at `~/.harvester/harvester.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HarvesterError, Result};
use crate::types::{TaskCategory, UnitSpec};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "harvester.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".harvester";

// ---------------------------------------------------------------------------
// Config structs (matching harvester.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Worker count per task category.
    #[serde(default)]
    pub workers: WorkersConfig,

    /// Retry, backoff, and timeout policy.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Circuit breaker policy.
    #[serde(default)]
    pub breakers: BreakersConfig,

    /// Retrieval stage policy.
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Discovery strategy settings.
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Registered work units.
    #[serde(default)]
    pub units: Vec<UnitSpec>,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Root directory for the database, manifests, and progress document.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Pipeline execution mode.
    #[serde(default)]
    pub mode: ExecutionMode,

    /// Capacity of the discovery-to-retrieval hand-off queue in pipelined mode.
    #[serde(default = "default_handoff_capacity")]
    pub handoff_capacity: usize,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            mode: ExecutionMode::default(),
            handoff_capacity: default_handoff_capacity(),
        }
    }
}

fn default_data_dir() -> String {
    "~/harvester".into()
}
fn default_handoff_capacity() -> usize {
    2
}

/// How the orchestrator advances units through stages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Each stage fully drains before the next starts, unit by unit.
    #[default]
    Sequential,
    /// Discovery of the next unit overlaps retrieval/indexing of the
    /// previous one, through bounded hand-off queues.
    Pipelined,
}

/// `[workers]` section: fixed worker count per category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    #[serde(default = "default_discovery_workers")]
    pub discovery: usize,
    #[serde(default = "default_retrieval_workers")]
    pub retrieval: usize,
    #[serde(default = "default_indexing_workers")]
    pub indexing: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            discovery: default_discovery_workers(),
            retrieval: default_retrieval_workers(),
            indexing: default_indexing_workers(),
        }
    }
}

fn default_discovery_workers() -> usize {
    2
}
fn default_retrieval_workers() -> usize {
    6
}
fn default_indexing_workers() -> usize {
    3
}

/// `[retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempt budget per task (first attempt included).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff delay; doubles each attempt.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Backoff ceiling.
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,

    /// Per-attempt execution deadline.
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,

    /// Deadline for a whole discovery pass over one unit.
    #[serde(default = "default_discovery_timeout_secs")]
    pub discovery_timeout_secs: u64,

    /// Idle queue poll interval for worker loops.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How long `stop()` waits for workers before aborting them.
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            task_timeout_secs: default_task_timeout_secs(),
            discovery_timeout_secs: default_discovery_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            grace_period_secs: default_grace_period_secs(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_backoff_cap_ms() -> u64 {
    30_000
}
fn default_task_timeout_secs() -> u64 {
    120
}
fn default_discovery_timeout_secs() -> u64 {
    600
}
fn default_poll_interval_ms() -> u64 {
    200
}
fn default_grace_period_secs() -> u64 {
    10
}

/// `[breakers]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakersConfig {
    /// Consecutive failures before a breaker opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long an open breaker denies calls before probing.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl Default for BreakersConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_cooldown_secs() -> u64 {
    60
}

/// `[retrieval]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Minimum delay between retrieval task submissions for one unit.
    #[serde(default = "default_inter_request_delay_ms")]
    pub inter_request_delay_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            inter_request_delay_ms: default_inter_request_delay_ms(),
        }
    }
}

fn default_inter_request_delay_ms() -> u64 {
    250
}

/// `[discovery]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Maximum link-following depth from the origin.
    #[serde(default = "default_discovery_depth")]
    pub depth: u32,

    /// Maximum pages visited by link-following per unit.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Cap on discovered items per unit after deduplication.
    #[serde(default = "default_max_items")]
    pub max_items: usize,

    /// Well-known listing paths probed relative to the origin.
    #[serde(default = "default_known_paths")]
    pub known_paths: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            depth: default_discovery_depth(),
            max_pages: default_max_pages(),
            max_items: default_max_items(),
            known_paths: default_known_paths(),
        }
    }
}

fn default_discovery_depth() -> u32 {
    3
}
fn default_max_pages() -> usize {
    500
}
fn default_max_items() -> usize {
    2000
}
fn default_known_paths() -> Vec<String> {
    vec![
        "/catalog".into(),
        "/products".into(),
        "/collections/all".into(),
        "/archive".into(),
    ]
}

// ---------------------------------------------------------------------------
// Runtime configs (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime worker pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Workers per category.
    pub discovery_workers: usize,
    pub retrieval_workers: usize,
    pub indexing_workers: usize,
    /// Idle queue poll interval.
    pub poll_interval: Duration,
    /// Drain grace period for `stop()`.
    pub grace_period: Duration,
    /// First retry backoff; doubles per attempt.
    pub backoff_base: Duration,
    /// Retry backoff ceiling.
    pub backoff_cap: Duration,
}

impl PoolConfig {
    /// Configured worker count for a category.
    pub fn workers_for(&self, category: TaskCategory) -> usize {
        match category {
            TaskCategory::Discovery => self.discovery_workers,
            TaskCategory::Retrieval => self.retrieval_workers,
            TaskCategory::Indexing => self.indexing_workers,
        }
    }
}

impl From<&AppConfig> for PoolConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            discovery_workers: config.workers.discovery,
            retrieval_workers: config.workers.retrieval,
            indexing_workers: config.workers.indexing,
            poll_interval: Duration::from_millis(config.retry.poll_interval_ms),
            grace_period: Duration::from_secs(config.retry.grace_period_secs),
            backoff_base: Duration::from_millis(config.retry.backoff_base_ms),
            backoff_cap: Duration::from_millis(config.retry.backoff_cap_ms),
        }
    }
}

/// Runtime orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Sequential or pipelined stage execution.
    pub mode: ExecutionMode,
    /// Bounded hand-off queue capacity in pipelined mode.
    pub handoff_capacity: usize,
    /// Total attempt budget per task.
    pub max_retries: u32,
    /// Per-attempt task deadline.
    pub task_timeout: Duration,
    /// Deadline for a whole discovery pass over one unit.
    pub discovery_timeout: Duration,
    /// Delay between retrieval submissions.
    pub inter_request_delay: Duration,
}

impl From<&AppConfig> for OrchestratorConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            mode: config.defaults.mode,
            handoff_capacity: config.defaults.handoff_capacity.max(1),
            max_retries: config.retry.max_retries,
            task_timeout: Duration::from_secs(config.retry.task_timeout_secs),
            discovery_timeout: Duration::from_secs(config.retry.discovery_timeout_secs),
            inter_request_delay: Duration::from_millis(
                config.retrieval.inter_request_delay_ms,
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.harvester/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| HarvesterError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.harvester/harvester.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| HarvesterError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        HarvesterError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| HarvesterError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| HarvesterError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| HarvesterError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~` in a configured path against the user's home.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

impl AppConfig {
    /// The resolved data directory.
    pub fn data_dir(&self) -> PathBuf {
        expand_tilde(&self.defaults.data_dir)
    }

    /// Path to the cross-process progress document.
    pub fn progress_path(&self) -> PathBuf {
        self.data_dir().join("progress.json")
    }

    /// Directory holding per-unit discovery manifests.
    pub fn manifest_dir(&self) -> PathBuf {
        self.data_dir().join("manifests")
    }

    /// Path to the catalog database.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir().join("harvester.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("data_dir"));
        assert!(toml_str.contains("failure_threshold"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.workers.retrieval, 6);
        assert_eq!(parsed.retry.max_retries, 3);
        assert_eq!(parsed.defaults.mode, ExecutionMode::Sequential);
    }

    #[test]
    fn config_with_units() {
        let toml_str = r#"
[defaults]
data_dir = "/tmp/harvester"
mode = "pipelined"

[[units]]
name = "acme"
origin = "https://shop.acme.example.com"
catalog_ids = ["sku-1", "sku-2"]
url_template = "https://shop.acme.example.com/product/{id}"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.units.len(), 1);
        assert_eq!(config.units[0].name, "acme");
        assert_eq!(config.units[0].catalog_ids.len(), 2);
        assert_eq!(config.defaults.mode, ExecutionMode::Pipelined);
    }

    #[test]
    fn pool_config_from_app_config() {
        let app = AppConfig::default();
        let pool = PoolConfig::from(&app);
        assert_eq!(pool.workers_for(TaskCategory::Discovery), 2);
        assert_eq!(pool.workers_for(TaskCategory::Retrieval), 6);
        assert_eq!(pool.workers_for(TaskCategory::Indexing), 3);
        assert_eq!(pool.backoff_base, Duration::from_millis(500));
    }

    #[test]
    fn orchestrator_config_from_app_config() {
        let app = AppConfig::default();
        let orch = OrchestratorConfig::from(&app);
        assert_eq!(orch.mode, ExecutionMode::Sequential);
        assert_eq!(orch.max_retries, 3);
        assert_eq!(orch.handoff_capacity, 2);
    }

    #[test]
    fn tilde_expansion() {
        let plain = expand_tilde("/var/lib/harvester");
        assert_eq!(plain, PathBuf::from("/var/lib/harvester"));

        if let Some(home) = dirs::home_dir() {
            let expanded = expand_tilde("~/harvester");
            assert_eq!(expanded, home.join("harvester"));
        }
    }
}
