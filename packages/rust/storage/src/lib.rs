//! libSQL storage layer: stage catalog, content chunks, and run history.
//!
//! The [`Storage`] struct wraps a libSQL database. Two thin wrappers adapt
//! it to the pipeline's capability traits:
//! - [`Catalog`] implements `CatalogStore` over the stage ledger
//! - [`ChunkIndexer`] implements `ContentIndexer` with paragraph chunking
//!
//! **Access rules:**
//! - the pipeline process is the sole writer via [`Storage::open`]
//! - status consumers may use [`Storage::open_readonly`]

mod migrations;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database, params};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use harvester_shared::{
    CatalogStore, ContentIndexer, HarvesterError, Result, StageKind,
};

/// Default maximum chunk size in characters.
const DEFAULT_MAX_CHUNK_CHARS: usize = 2000;

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| HarvesterError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| HarvesterError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| HarvesterError::Storage(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode (for status consumers).
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| HarvesterError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| HarvesterError::Storage(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    HarvesterError::Storage(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(HarvesterError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Unit operations
    // -----------------------------------------------------------------------

    /// Insert or refresh a unit record.
    pub async fn upsert_unit(&self, name: &str, origin: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO units (name, origin, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(name) DO UPDATE SET
                   origin = excluded.origin,
                   updated_at = excluded.updated_at",
                params![name, origin, now.as_str(), now.as_str()],
            )
            .await
            .map_err(|e| HarvesterError::Storage(e.to_string()))?;
        Ok(())
    }

    /// List all units. Returns `Vec<(name, origin)>`.
    pub async fn list_units(&self) -> Result<Vec<(String, String)>> {
        let mut rows = self
            .conn
            .query("SELECT name, origin FROM units ORDER BY name", params![])
            .await
            .map_err(|e| HarvesterError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push((
                row.get::<String>(0)
                    .map_err(|e| HarvesterError::Storage(e.to_string()))?,
                row.get::<String>(1)
                    .map_err(|e| HarvesterError::Storage(e.to_string()))?,
            ));
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Catalog operations
    // -----------------------------------------------------------------------

    /// Record (or overwrite) an identifier at a stage.
    pub async fn catalog_record(
        &self,
        stage: &str,
        identifier: &str,
        metadata_json: &str,
    ) -> Result<()> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO catalog (id, stage, identifier, metadata_json, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(stage, identifier) DO UPDATE SET
                   metadata_json = excluded.metadata_json,
                   recorded_at = excluded.recorded_at",
                params![id.as_str(), stage, identifier, metadata_json, now.as_str()],
            )
            .await
            .map_err(|e| HarvesterError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Whether an identifier has a record at a stage.
    pub async fn catalog_has(&self, stage: &str, identifier: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM catalog WHERE stage = ?1 AND identifier = ?2",
                params![stage, identifier],
            )
            .await
            .map_err(|e| HarvesterError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(_)) => Ok(true),
            Ok(None) => Ok(false),
            Err(e) => Err(HarvesterError::Storage(e.to_string())),
        }
    }

    /// Metadata recorded for an identifier at a stage, if any.
    pub async fn catalog_get(&self, stage: &str, identifier: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT metadata_json FROM catalog WHERE stage = ?1 AND identifier = ?2",
                params![stage, identifier],
            )
            .await
            .map_err(|e| HarvesterError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row.get::<String>(0)
                    .map_err(|e| HarvesterError::Storage(e.to_string()))?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(HarvesterError::Storage(e.to_string())),
        }
    }

    /// Number of identifiers recorded at a stage.
    pub async fn catalog_count(&self, stage: &str) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM catalog WHERE stage = ?1",
                params![stage],
            )
            .await
            .map_err(|e| HarvesterError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0) as u64),
            _ => Ok(0),
        }
    }

    // -----------------------------------------------------------------------
    // Chunk operations
    // -----------------------------------------------------------------------

    /// Replace all chunks for an identifier. Returns the new chunk count.
    pub async fn replace_chunks(&self, identifier: &str, chunks: &[String]) -> Result<usize> {
        self.check_writable()?;
        self.conn
            .execute(
                "DELETE FROM chunks WHERE identifier = ?1",
                params![identifier],
            )
            .await
            .map_err(|e| HarvesterError::Storage(e.to_string()))?;

        let now = Utc::now().to_rfc3339();
        for (seq, content) in chunks.iter().enumerate() {
            let id = Uuid::now_v7().to_string();
            let hash = {
                let mut hasher = Sha256::new();
                hasher.update(content.as_bytes());
                format!("{:x}", hasher.finalize())
            };
            self.conn
                .execute(
                    "INSERT INTO chunks (id, identifier, seq, content, content_hash, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        id.as_str(),
                        identifier,
                        seq as i64,
                        content.as_str(),
                        hash.as_str(),
                        now.as_str()
                    ],
                )
                .await
                .map_err(|e| HarvesterError::Storage(e.to_string()))?;
        }
        Ok(chunks.len())
    }

    /// Number of chunks stored for an identifier.
    pub async fn count_chunks(&self, identifier: &str) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM chunks WHERE identifier = ?1",
                params![identifier],
            )
            .await
            .map_err(|e| HarvesterError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0) as u64),
            _ => Ok(0),
        }
    }

    // -----------------------------------------------------------------------
    // Run history
    // -----------------------------------------------------------------------

    /// Insert a new run record. Returns the generated run ID.
    pub async fn insert_run(&self) -> Result<String> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO runs (id, started_at) VALUES (?1, ?2)",
                params![id.as_str(), now.as_str()],
            )
            .await
            .map_err(|e| HarvesterError::Storage(e.to_string()))?;
        Ok(id)
    }

    /// Update a run with its completion report.
    pub async fn update_run(&self, run_id: &str, report_json: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE runs SET finished_at = ?1, report_json = ?2 WHERE id = ?3",
                params![now.as_str(), report_json, run_id],
            )
            .await
            .map_err(|e| HarvesterError::Storage(e.to_string()))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Capability adapters
// ---------------------------------------------------------------------------

/// `CatalogStore` implementation over the stage ledger.
#[derive(Clone)]
pub struct Catalog {
    storage: Arc<Storage>,
}

impl Catalog {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl CatalogStore for Catalog {
    async fn has(&self, stage: StageKind, identifier: &str) -> Result<bool> {
        self.storage.catalog_has(stage.as_str(), identifier).await
    }

    async fn get(
        &self,
        stage: StageKind,
        identifier: &str,
    ) -> Result<Option<serde_json::Value>> {
        let raw = self.storage.catalog_get(stage.as_str(), identifier).await?;
        match raw {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| HarvesterError::Storage(format!("catalog metadata: {e}"))),
            None => Ok(None),
        }
    }

    async fn record(
        &self,
        stage: StageKind,
        identifier: &str,
        metadata: &serde_json::Value,
    ) -> Result<()> {
        self.storage
            .catalog_record(stage.as_str(), identifier, &metadata.to_string())
            .await
    }
}

/// `ContentIndexer` implementation: paragraph chunking into the chunks table.
#[derive(Clone)]
pub struct ChunkIndexer {
    storage: Arc<Storage>,
    max_chunk_chars: usize,
}

impl ChunkIndexer {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            max_chunk_chars: DEFAULT_MAX_CHUNK_CHARS,
        }
    }

    /// Override the maximum chunk size.
    pub fn with_max_chunk_chars(mut self, max_chunk_chars: usize) -> Self {
        self.max_chunk_chars = max_chunk_chars.max(1);
        self
    }
}

#[async_trait]
impl ContentIndexer for ChunkIndexer {
    async fn index(&self, content: &str, metadata: &serde_json::Value) -> Result<usize> {
        let identifier = metadata
            .get("identifier")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                HarvesterError::validation("index metadata missing 'identifier'")
            })?;

        let chunks = chunk_content(content, self.max_chunk_chars);
        self.storage.replace_chunks(identifier, &chunks).await
    }
}

/// Split content on blank lines, packing paragraphs into chunks of at most
/// `max_chars`. Oversized paragraphs are hard-split at char boundaries.
fn chunk_content(content: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for para in content.split("\n\n") {
        let para = para.trim();
        if para.is_empty() {
            continue;
        }

        if !current.is_empty() && current.len() + para.len() + 2 > max_chars {
            chunks.push(std::mem::take(&mut current));
        }

        if para.len() > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            let mut rest = para;
            while rest.len() > max_chars {
                let mut cut = max_chars;
                while !rest.is_char_boundary(cut) {
                    cut -= 1;
                }
                chunks.push(rest[..cut].to_string());
                rest = &rest[cut..];
            }
            if !rest.is_empty() {
                current = rest.to_string();
            }
        } else if current.is_empty() {
            current = para.to_string();
        } else {
            current.push_str("\n\n");
            current.push_str(para);
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("hv_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        let version = storage.get_schema_version().await;
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("hv_test_{}.db", Uuid::now_v7()));
        let s1 = Storage::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn unit_upsert_and_list() {
        let storage = test_storage().await;

        storage
            .upsert_unit("acme", "https://shop.acme.example.com")
            .await
            .expect("insert unit");
        storage
            .upsert_unit("acme", "https://shop.acme.example.com/eu")
            .await
            .expect("update unit");

        let units = storage.list_units().await.expect("list units");
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].1, "https://shop.acme.example.com/eu");
    }

    #[tokio::test]
    async fn catalog_record_has_get() {
        let storage = test_storage().await;

        assert!(
            !storage
                .catalog_has("retrieved", "https://a/1")
                .await
                .unwrap()
        );

        storage
            .catalog_record("retrieved", "https://a/1", r#"{"content_hash":"abc"}"#)
            .await
            .expect("record");

        assert!(
            storage
                .catalog_has("retrieved", "https://a/1")
                .await
                .unwrap()
        );
        // Same identifier at a different stage is a distinct record.
        assert!(
            !storage
                .catalog_has("indexed", "https://a/1")
                .await
                .unwrap()
        );

        // Upsert overwrites metadata.
        storage
            .catalog_record("retrieved", "https://a/1", r#"{"content_hash":"def"}"#)
            .await
            .expect("re-record");
        let meta = storage
            .catalog_get("retrieved", "https://a/1")
            .await
            .unwrap()
            .expect("metadata");
        assert!(meta.contains("def"));

        assert_eq!(storage.catalog_count("retrieved").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn catalog_adapter_roundtrips_json() {
        let storage = Arc::new(test_storage().await);
        let catalog = Catalog::new(storage);

        catalog
            .record(
                StageKind::Indexed,
                "https://a/1",
                &serde_json::json!({"chunks": 3}),
            )
            .await
            .expect("record");

        assert!(catalog.has(StageKind::Indexed, "https://a/1").await.unwrap());
        let meta = catalog
            .get(StageKind::Indexed, "https://a/1")
            .await
            .unwrap()
            .expect("metadata");
        assert_eq!(meta["chunks"], 3);
    }

    #[tokio::test]
    async fn chunk_indexer_counts_and_replaces() {
        let storage = Arc::new(test_storage().await);
        let indexer = ChunkIndexer::new(storage.clone()).with_max_chunk_chars(40);

        let content = "First paragraph of the description.\n\n\
                       Second paragraph with more detail.\n\n\
                       Third paragraph.";
        let meta = serde_json::json!({"identifier": "https://a/1"});

        let count = indexer.index(content, &meta).await.expect("index");
        assert!(count >= 2);
        assert_eq!(
            storage.count_chunks("https://a/1").await.unwrap(),
            count as u64
        );

        // Re-indexing replaces rather than appends.
        let count2 = indexer.index("Short.", &meta).await.expect("re-index");
        assert_eq!(count2, 1);
        assert_eq!(storage.count_chunks("https://a/1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn chunk_indexer_requires_identifier() {
        let storage = Arc::new(test_storage().await);
        let indexer = ChunkIndexer::new(storage);

        let err = indexer
            .index("content", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn run_lifecycle() {
        let storage = test_storage().await;

        let run_id = storage.insert_run().await.expect("insert run");
        assert!(!run_id.is_empty());

        storage
            .update_run(&run_id, r#"{"units": 2, "indexed": 40}"#)
            .await
            .expect("update run");
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("hv_test_{}.db", Uuid::now_v7()));
        let rw = Storage::open(&tmp).await.unwrap();
        rw.upsert_unit("acme", "https://a").await.unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        let result = ro.upsert_unit("globex", "https://g").await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }

    #[test]
    fn chunking_packs_paragraphs() {
        let chunks = chunk_content("a\n\nb\n\nc", 100);
        assert_eq!(chunks, vec!["a\n\nb\n\nc"]);

        let chunks = chunk_content("aaaa\n\nbbbb\n\ncccc", 9);
        assert_eq!(chunks.len(), 3);

        // Oversized paragraph is hard-split.
        let long = "x".repeat(25);
        let chunks = chunk_content(&long, 10);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.len() <= 10));

        assert!(chunk_content("   \n\n  ", 10).is_empty());
    }
}
