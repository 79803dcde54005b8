//! Discovery: turning a unit's origin into a ranked manifest of identifiers.
//!
//! This crate provides:
//! - [`strategies`] — independent discovery strategies (structured index,
//!   known-path probing, link-following, catalog synthesis)
//! - [`Discoverer`] — runs the strategies in sequence, deduplicates and
//!   ranks their output, and persists the unit's [`DiscoveryManifest`]
//! - [`ManifestStore`] — per-unit manifest persistence

pub mod manifest;
pub mod strategies;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};

use harvester_shared::{
    DiscoveredItem, Fetcher, Result, UnitSpec, config::DiscoveryConfig,
};

pub use manifest::{DiscoveryManifest, ManifestStore};
pub use strategies::{
    CatalogSynthesisStrategy, DiscoveryStrategy, KnownPathsStrategy, LinkFollowStrategy,
    PRIORITY_KNOWN_PATH, PRIORITY_LINK_FOLLOW, PRIORITY_STRUCTURED_INDEX, PRIORITY_SYNTHESIS,
    StructuredIndexStrategy,
};

use strategies::{UnitScope, parse_origin};

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Tuning for the discovery strategies.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Link-following depth from the origin.
    pub depth: u32,
    /// Link-following page budget per unit.
    pub max_pages: usize,
    /// Cap on discovered items per unit after deduplication.
    pub max_items: usize,
    /// Well-known listing paths probed relative to the origin.
    pub known_paths: Vec<String>,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self::from(&DiscoveryConfig::default())
    }
}

impl From<&DiscoveryConfig> for DiscoveryOptions {
    fn from(config: &DiscoveryConfig) -> Self {
        Self {
            depth: config.depth,
            max_pages: config.max_pages,
            max_items: config.max_items,
            known_paths: config.known_paths.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Discoverer
// ---------------------------------------------------------------------------

/// Runs all discovery strategies for a unit and persists the result.
pub struct Discoverer {
    fetcher: Arc<dyn Fetcher>,
    manifests: ManifestStore,
    options: DiscoveryOptions,
}

impl Discoverer {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        manifests: ManifestStore,
        options: DiscoveryOptions,
    ) -> Self {
        Self {
            fetcher,
            manifests,
            options,
        }
    }

    /// The manifest store discovery writes to.
    pub fn manifests(&self) -> &ManifestStore {
        &self.manifests
    }

    /// Run every strategy in sequence, merge and rank the results, and
    /// persist the unit's manifest as ground truth for verification.
    ///
    /// A failing strategy is logged and skipped; discovery only fails when
    /// the unit spec itself is unusable.
    #[instrument(skip_all, fields(unit = %unit.name, origin = %unit.origin))]
    pub async fn discover(&self, unit: &UnitSpec) -> Result<Vec<DiscoveredItem>> {
        let origin = parse_origin(&unit.origin)?;
        let scope = UnitScope::new(&origin, unit);

        let strategies: Vec<Box<dyn DiscoveryStrategy>> = vec![
            Box::new(StructuredIndexStrategy::new(self.fetcher.clone())),
            Box::new(KnownPathsStrategy::new(
                self.fetcher.clone(),
                self.options.known_paths.clone(),
            )),
            Box::new(LinkFollowStrategy::new(
                self.fetcher.clone(),
                self.options.depth,
                self.options.max_pages,
            )),
            Box::new(CatalogSynthesisStrategy),
        ];

        // Merge keyed by identifier, keeping the most urgent priority.
        let mut merged: HashMap<String, DiscoveredItem> = HashMap::new();
        for strategy in strategies {
            match strategy.discover(unit).await {
                Ok(items) => {
                    for item in items {
                        merged
                            .entry(item.identifier.clone())
                            .and_modify(|existing| {
                                if item.priority < existing.priority {
                                    *existing = item.clone();
                                }
                            })
                            .or_insert(item);
                    }
                }
                Err(e) => {
                    warn!(strategy = strategy.name(), error = %e, "strategy failed, continuing");
                }
            }
        }

        let mut items: Vec<DiscoveredItem> = merged
            .into_values()
            .filter(|item| {
                url::Url::parse(&item.identifier)
                    .map(|u| scope.path_allowed(u.path()))
                    .unwrap_or(false)
            })
            .collect();
        items.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.identifier.cmp(&b.identifier))
        });

        if items.len() > self.options.max_items {
            let dropped = items.len() - self.options.max_items;
            warn!(dropped, max_items = self.options.max_items, "item cap reached, truncating");
            items.truncate(self.options.max_items);
        }

        self.manifests.save(&DiscoveryManifest {
            unit: unit.name.clone(),
            origin: unit.origin.clone(),
            discovered_at: Utc::now(),
            items: items.clone(),
        })?;

        info!(items = items.len(), "discovery complete");
        Ok(items)
    }
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------
