//! Cross-process-safe shared progress tracking.
//!
//! One JSON document at a configured path is the externally-readable record
//! of the current run. Multiple OS processes may read and write it, so every
//! mutation is a lock-guarded read-modify-write: take an exclusive advisory
//! lock, re-read the persisted value (merging concurrent external changes),
//! apply the delta, stamp `last_updated`, write, flush, release.
//!
//! Coordination failures never propagate: if the document is unreadable or
//! corrupt the tracker logs a warning and falls back to its last in-memory
//! copy, which the next successful write persists.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use fs2::FileExt;
use tracing::{debug, warn};

use harvester_shared::ProgressRecord;

/// Keep at most this many errors in the record, newest last.
const MAX_ERRORS: usize = 100;

/// Lock-guarded handle to the shared progress document.
///
/// Constructed explicitly and passed by handle to the orchestrator and
/// stages; external consumers read the same document with [`snapshot`]
/// (or any JSON reader in another process).
///
/// [`snapshot`]: ProgressTracker::snapshot
pub struct ProgressTracker {
    path: PathBuf,
    fallback: Mutex<ProgressRecord>,
}

impl ProgressTracker {
    /// Create a tracker for the document at `path`. The file is created on
    /// first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fallback: Mutex::new(ProgressRecord::default()),
        }
    }

    /// The document path (the cross-process contract).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Begin a unit. The first `start` of a run resets the record.
    pub fn start(&self, unit: &str) {
        let unit = unit.to_string();
        self.mutate(move |rec| {
            if !rec.is_running {
                *rec = ProgressRecord {
                    is_running: true,
                    started_at: Some(Utc::now()),
                    ..Default::default()
                };
            }
            rec.current_unit = Some(unit);
            rec.current_step = Some("starting".into());
        });
    }

    /// Describe the current step for external observers.
    pub fn update_step(&self, step: &str) {
        let step = step.to_string();
        self.mutate(move |rec| {
            rec.current_step = Some(step);
        });
    }

    /// Update run totals. `discovered` never decreases; `processed` is the
    /// writer's current value and pulls `discovered` up with it if needed.
    pub fn update_counts(&self, discovered: u64, processed: u64) {
        self.mutate(move |rec| {
            rec.discovered = rec.discovered.max(discovered);
            rec.processed = processed;
        });
    }

    /// Add `n` newly indexed identifiers to the running total.
    pub fn record_indexed(&self, n: u64) {
        self.mutate(move |rec| {
            rec.indexed += n;
        });
    }

    /// Mark a unit finished. The indexed total is already tracked through
    /// [`record_indexed`](Self::record_indexed); `indexed` here only feeds
    /// the step message.
    pub fn mark_unit_complete(&self, unit: &str, indexed: u64) {
        let step = format!("{unit} complete ({indexed} indexed)");
        self.mutate(move |rec| {
            rec.current_step = Some(step);
        });
    }

    /// Append an error to the record (bounded; oldest dropped first).
    pub fn add_error(&self, error: &str) {
        let error = error.to_string();
        self.mutate(move |rec| {
            rec.errors.push(error);
            if rec.errors.len() > MAX_ERRORS {
                let excess = rec.errors.len() - MAX_ERRORS;
                rec.errors.drain(..excess);
            }
        });
    }

    /// End the run.
    pub fn complete(&self) {
        self.mutate(|rec| {
            rec.is_running = false;
            rec.current_step = Some("complete".into());
        });
    }

    /// Read the current record under a shared lock.
    ///
    /// Falls back to the last in-memory copy if the document is missing or
    /// unreadable.
    pub fn snapshot(&self) -> ProgressRecord {
        match self.read_persisted() {
            Ok(Some(rec)) => {
                *self.fallback.lock().expect("progress fallback lock") = rec.clone();
                rec
            }
            Ok(None) => self.fallback.lock().expect("progress fallback lock").clone(),
            Err(e) => {
                warn!(path = ?self.path, error = %e, "progress document unreadable, using in-memory snapshot");
                self.fallback.lock().expect("progress fallback lock").clone()
            }
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Lock-guarded read-modify-write. The delta is always applied exactly
    /// once, to the persisted record when available, else to the fallback.
    fn mutate<F: FnOnce(&mut ProgressRecord)>(&self, apply: F) {
        let file = self.open_locked_exclusive();

        let mut record = match &file {
            Some(file) => match read_record(file) {
                Ok(Some(rec)) => rec,
                Ok(None) => self.fallback.lock().expect("progress fallback lock").clone(),
                Err(e) => {
                    warn!(
                        path = ?self.path,
                        error = %e,
                        "progress document corrupt, rebuilding from in-memory snapshot"
                    );
                    self.fallback.lock().expect("progress fallback lock").clone()
                }
            },
            None => self.fallback.lock().expect("progress fallback lock").clone(),
        };

        apply(&mut record);
        record.heal();
        record.last_updated = Some(Utc::now());

        if let Some(mut file) = file {
            if let Err(e) = write_record(&mut file, &record) {
                warn!(path = ?self.path, error = %e, "failed to persist progress document");
            }
            // Lock released when the file handle closes.
        }

        *self.fallback.lock().expect("progress fallback lock") = record;
    }

    /// Open the document read-write with an exclusive lock, or None with a
    /// warning when the filesystem refuses.
    fn open_locked_exclusive(&self) -> Option<File> {
        if let Some(parent) = self.path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(path = ?parent, error = %e, "cannot create progress directory");
                return None;
            }
        }

        let file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(e) => {
                warn!(path = ?self.path, error = %e, "cannot open progress document");
                return None;
            }
        };

        if let Err(e) = file.lock_exclusive() {
            warn!(path = ?self.path, error = %e, "cannot lock progress document");
            return None;
        }

        Some(file)
    }

    /// Read the persisted record under a shared lock. `Ok(None)` means the
    /// document does not exist yet.
    fn read_persisted(&self) -> std::io::Result<Option<ProgressRecord>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        file.lock_shared()?;

        match read_record(&file)? {
            Some(rec) => Ok(Some(rec)),
            None => Ok(None),
        }
    }
}

/// Parse the record from an open file. `Ok(None)` for an empty document.
fn read_record(mut file: &File) -> std::io::Result<Option<ProgressRecord>> {
    let mut contents = String::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_string(&mut contents)?;

    if contents.trim().is_empty() {
        return Ok(None);
    }

    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

/// Truncate and rewrite the document, then flush.
fn write_record(file: &mut File, record: &ProgressRecord) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(record)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(json.as_bytes())?;
    file.flush()?;
    debug!(discovered = record.discovered, processed = record.processed, "progress persisted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_progress_path() -> PathBuf {
        std::env::temp_dir().join(format!("hv_progress_{}.json", Uuid::now_v7()))
    }

    #[test]
    fn run_lifecycle() {
        let path = temp_progress_path();
        let tracker = ProgressTracker::new(&path);

        tracker.start("acme");
        let rec = tracker.snapshot();
        assert!(rec.is_running);
        assert_eq!(rec.current_unit.as_deref(), Some("acme"));
        assert!(rec.started_at.is_some());

        tracker.update_step("retrieving items");
        tracker.update_counts(10, 4);
        tracker.record_indexed(2);

        let rec = tracker.snapshot();
        assert_eq!(rec.current_step.as_deref(), Some("retrieving items"));
        assert_eq!(rec.discovered, 10);
        assert_eq!(rec.processed, 4);
        assert_eq!(rec.indexed, 2);

        tracker.complete();
        let rec = tracker.snapshot();
        assert!(!rec.is_running);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn two_writers_never_lose_updates() {
        let path = temp_progress_path();
        // Two tracker instances on the same path stand in for two processes.
        let writer_a = ProgressTracker::new(&path);
        let writer_b = ProgressTracker::new(&path);

        writer_a.start("acme");
        writer_a.update_counts(5, 2);
        writer_b.update_counts(7, 6);
        writer_a.add_error("https://a/9: network error");

        let rec = writer_b.snapshot();
        assert_eq!(rec.discovered, 7);
        assert_eq!(rec.processed, 6);
        // writer_a's error survived writer_b's count update.
        assert_eq!(rec.errors.len(), 1);
        assert!(rec.is_running);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn sequential_updates_last_writer_wins() {
        let path = temp_progress_path();
        let tracker = ProgressTracker::new(&path);

        tracker.start("acme");
        for n in 1..=20u64 {
            tracker.update_counts(n * 2, n);
        }

        let rec = tracker.snapshot();
        assert_eq!(rec.discovered, 40);
        assert_eq!(rec.processed, 20);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn discovered_is_monotonic_and_self_healing() {
        let path = temp_progress_path();
        let tracker = ProgressTracker::new(&path);

        tracker.start("acme");
        tracker.update_counts(10, 0);
        // A lower discovered value must not regress the count.
        tracker.update_counts(4, 0);
        assert_eq!(tracker.snapshot().discovered, 10);

        // Processed overtaking discovered pulls discovered up.
        tracker.update_counts(0, 25);
        let rec = tracker.snapshot();
        assert_eq!(rec.processed, 25);
        assert_eq!(rec.discovered, 25);
        assert!(rec.percent() <= 100.0);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn corrupt_document_falls_back_and_recovers() {
        let path = temp_progress_path();
        let tracker = ProgressTracker::new(&path);

        tracker.start("acme");
        tracker.update_counts(3, 1);

        std::fs::write(&path, "{ not json").expect("corrupt the document");

        // Mutation must not panic and must keep the delta.
        tracker.add_error("site timed out");
        let rec = tracker.snapshot();
        assert!(rec.errors.iter().any(|e| e.contains("timed out")));
        // The rewrite healed the document.
        let raw = std::fs::read_to_string(&path).expect("read document");
        assert!(serde_json::from_str::<ProgressRecord>(&raw).is_ok());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn error_list_is_bounded() {
        let path = temp_progress_path();
        let tracker = ProgressTracker::new(&path);

        tracker.start("acme");
        for i in 0..150 {
            tracker.add_error(&format!("error {i}"));
        }

        let rec = tracker.snapshot();
        assert_eq!(rec.errors.len(), MAX_ERRORS);
        assert_eq!(rec.errors.last().map(String::as_str), Some("error 149"));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn restart_resets_the_record() {
        let path = temp_progress_path();
        let tracker = ProgressTracker::new(&path);

        tracker.start("acme");
        tracker.update_counts(10, 10);
        tracker.mark_unit_complete("acme", 10);
        tracker.complete();

        tracker.start("globex");
        let rec = tracker.snapshot();
        assert!(rec.is_running);
        assert_eq!(rec.current_unit.as_deref(), Some("globex"));
        assert_eq!(rec.discovered, 0);
        assert_eq!(rec.indexed, 0);
        assert!(rec.errors.is_empty());

        let _ = std::fs::remove_file(&path);
    }
}
