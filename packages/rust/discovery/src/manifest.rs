//! Per-unit discovery manifests.
//!
//! The manifest written at the end of discovery is the ground truth that
//! verification measures coverage against: one JSON document per unit under
//! a configured directory.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use harvester_shared::{DiscoveredItem, HarvesterError, Result};

/// Ranked, deduplicated discovery output for one unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryManifest {
    /// Unit name.
    pub unit: String,
    /// Origin the discovery ran from.
    pub origin: String,
    /// When discovery completed.
    pub discovered_at: DateTime<Utc>,
    /// Items in rank order (most urgent first).
    pub items: Vec<DiscoveredItem>,
}

impl DiscoveryManifest {
    /// Identifiers in rank order.
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|i| i.identifier.as_str())
    }
}

/// Reads and writes per-unit manifests under one directory.
pub struct ManifestStore {
    dir: PathBuf,
}

impl ManifestStore {
    /// Store rooted at `dir`; created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The manifest path for a unit.
    pub fn path_for(&self, unit: &str) -> PathBuf {
        self.dir.join(format!("{}.json", slugify(unit)))
    }

    /// Persist a manifest, replacing any previous one for the unit.
    pub fn save(&self, manifest: &DiscoveryManifest) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir).map_err(|e| HarvesterError::io(&self.dir, e))?;

        let path = self.path_for(&manifest.unit);
        let json = serde_json::to_string_pretty(manifest)
            .map_err(|e| HarvesterError::parse(format!("manifest serialize: {e}")))?;
        std::fs::write(&path, json).map_err(|e| HarvesterError::io(&path, e))?;

        debug!(unit = %manifest.unit, items = manifest.items.len(), ?path, "manifest saved");
        Ok(path)
    }

    /// Load a unit's manifest, or None if it has never been discovered.
    pub fn load(&self, unit: &str) -> Result<Option<DiscoveryManifest>> {
        let path = self.path_for(unit);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(HarvesterError::io(&path, e)),
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| HarvesterError::parse(format!("{}: {e}", path.display())))
    }

    /// Directory the manifests live under.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Reduce a unit name to a filesystem-safe slug.
fn slugify(name: &str) -> String {
    let slug: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    slug.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_store() -> ManifestStore {
        ManifestStore::new(std::env::temp_dir().join(format!("hv_manifests_{}", Uuid::now_v7())))
    }

    fn sample_manifest(unit: &str) -> DiscoveryManifest {
        DiscoveryManifest {
            unit: unit.into(),
            origin: "https://shop.example.com".into(),
            discovered_at: Utc::now(),
            items: vec![
                DiscoveredItem {
                    identifier: "https://shop.example.com/product/a".into(),
                    priority: 10,
                    strategy: "structured_index".into(),
                },
                DiscoveredItem {
                    identifier: "https://shop.example.com/product/b".into(),
                    priority: 30,
                    strategy: "link_follow".into(),
                },
            ],
        }
    }

    #[test]
    fn save_and_load_roundtrip() {
        let store = temp_store();
        let manifest = sample_manifest("Acme Shop");

        let path = store.save(&manifest).expect("save manifest");
        assert!(path.ends_with("acme-shop.json"));

        let loaded = store
            .load("Acme Shop")
            .expect("load manifest")
            .expect("manifest exists");
        assert_eq!(loaded.unit, "Acme Shop");
        assert_eq!(loaded.items.len(), 2);
        assert_eq!(
            loaded.identifiers().collect::<Vec<_>>(),
            vec![
                "https://shop.example.com/product/a",
                "https://shop.example.com/product/b"
            ]
        );

        let _ = std::fs::remove_dir_all(store.dir());
    }

    #[test]
    fn load_missing_is_none() {
        let store = temp_store();
        assert!(store.load("never-discovered").expect("load").is_none());
    }

    #[test]
    fn save_replaces_previous_manifest() {
        let store = temp_store();
        let mut manifest = sample_manifest("acme");
        store.save(&manifest).expect("first save");

        manifest.items.truncate(1);
        store.save(&manifest).expect("second save");

        let loaded = store.load("acme").expect("load").expect("exists");
        assert_eq!(loaded.items.len(), 1);

        let _ = std::fs::remove_dir_all(store.dir());
    }

    #[test]
    fn slugs_are_filesystem_safe() {
        assert_eq!(slugify("Acme Shop"), "acme-shop");
        assert_eq!(slugify("shop.example.com/eu"), "shop-example-com-eu");
        assert_eq!(slugify("--weird--"), "weird");
    }
}
