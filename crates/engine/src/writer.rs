use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crackmill_core::{BrainState, EngineSnapshot, JobRecord, Queue, RecordStore, SessionId};

/// Persisted per-session result snapshot (one JSON file per session).
///
/// Read back as the merge base when the job record is no longer in the
/// store, e.g. after cleanup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSnapshot {
    /// Operator-supplied job name.
    pub name: Option<String>,
    /// Hash-mode number.
    pub hash_mode: u32,
    /// Attack mode.
    pub attack_mode: Option<u32>,
    /// Mask pattern.
    pub mask: Option<String>,
    /// Primary wordlist label.
    pub wordlist: Option<String>,
    /// Secondary wordlist label.
    pub wordlist2: Option<String>,
    /// Rule-file labels.
    #[serde(default)]
    pub rules: Vec<String>,
    /// Brain decision tri-state.
    #[serde(default)]
    pub brain_check: BrainState,
    /// Restore point for resuming.
    #[serde(default)]
    pub restore: u64,
    /// Cumulative cracked count, monotonically non-decreasing.
    #[serde(rename = "Cracked Hashes", default)]
    pub cracked_hashes: u64,
    /// Cumulative total count, monotonically non-decreasing.
    #[serde(rename = "Total Hashes", default)]
    pub total_hashes: u64,
}

impl ResultSnapshot {
    /// Build the snapshot view of a job record (counters zeroed, merged
    /// in by the writer).
    pub fn from_record(record: &JobRecord) -> Self {
        Self {
            name: record.details.name.clone(),
            hash_mode: record.details.hash_mode,
            attack_mode: record.details.attack_mode,
            mask: record.details.mask.clone(),
            wordlist: record.details.wordlist.clone(),
            wordlist2: record.details.wordlist2.clone(),
            rules: record.details.rules.clone(),
            brain_check: record.brain,
            restore: record.restore,
            cracked_hashes: 0,
            total_hashes: 0,
        }
    }
}

/// Merges live engine status into the job record and the persisted
/// per-session snapshot file. Never called for benchmark runs.
#[derive(Debug, Clone)]
pub struct ResultWriter {
    log_dir: PathBuf,
}

impl ResultWriter {
    /// Writer rooted at `log_dir`.
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
        }
    }

    /// Path of the snapshot file for `session`.
    pub fn snapshot_path(&self, session: &SessionId) -> PathBuf {
        self.log_dir.join(format!("{session}.json"))
    }

    /// Path of the cracked-output file for `session`.
    pub fn cracked_path(&self, session: &SessionId) -> PathBuf {
        self.log_dir.join(format!("{session}.cracked"))
    }

    /// Path of the system benchmark file.
    pub fn benchmark_path(&self) -> PathBuf {
        self.log_dir.join("sys_benchmark.json")
    }

    async fn read_snapshot(&self, path: &Path) -> Option<ResultSnapshot> {
        let raw = tokio::fs::read_to_string(path).await.ok()?;
        serde_json::from_str(raw.trim()).ok()
    }

    /// Merge `snap` into the job record and rewrite the snapshot file.
    ///
    /// Speed-check sessions are folded onto their primary record via the
    /// suffix convention. All failures here are soft: the update is
    /// skipped and the loops carry on.
    pub async fn write_result(
        &self,
        store: &dyn RecordStore,
        session: &SessionId,
        snap: &EngineSnapshot,
    ) {
        tracing::debug!(session = %session, "updating status file");
        let primary = session.primary();
        let path = self.snapshot_path(&primary);
        let prev = self.read_snapshot(&path).await;
        let (prev_cracked, prev_total) = prev
            .as_ref()
            .map(|p| (p.cracked_hashes, p.total_hashes))
            .unwrap_or((0, 0));

        let record = match store.fetch(Queue::Jobs, &primary).await {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(session = %primary, %err, "status update failure");
                None
            }
        };

        let mut base = match record {
            Some(mut record) => {
                record.engine_state = Some(snap.clone());
                record.speed_history.push(snap.speed_raw);
                record.restore = snap.restore_point;
                if let Err(err) = store.save(Queue::Jobs, &record).await {
                    tracing::warn!(session = %primary, %err, "status update failure");
                }
                ResultSnapshot::from_record(&record)
            }
            // Record already cleaned up: fall back to the last-written
            // snapshot as the merge base.
            None => match prev {
                Some(prev) => prev,
                None => {
                    tracing::debug!(session = %primary, "no record and no prior snapshot, skipping");
                    return;
                }
            },
        };

        base.cracked_hashes = snap.digests_done.max(prev_cracked);
        base.total_hashes = snap.digests_total.max(prev_total);

        match serde_json::to_string(&base) {
            Ok(json) => {
                if let Err(err) = tokio::fs::write(&path, json).await {
                    tracing::warn!(session = %primary, %err, "status file write failure");
                }
            }
            Err(err) => tracing::warn!(session = %primary, %err, "status encode failure"),
        }
    }

    /// Write an initial status template for `session`, so status queries
    /// succeed before the engine starts. Existing files are left alone.
    pub async fn write_template(&self, session: &SessionId, template: &ResultSnapshot) {
        tracing::debug!(session = %session, "writing template/status file");
        let path = self.snapshot_path(session);
        if let Some(dir) = path.parent() {
            let _ = tokio::fs::create_dir_all(dir).await;
        }
        let json = match serde_json::to_string(template) {
            Ok(json) => json,
            Err(err) => {
                tracing::warn!(session = %session, %err, "template encode failure");
                return;
            }
        };
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(mut fh) => {
                use tokio::io::AsyncWriteExt as _;
                if let Err(err) = fh.write_all(json.as_bytes()).await {
                    tracing::warn!(session = %session, %err, "template write failure");
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                tracing::debug!(session = %session, "status/template file already exists");
            }
            Err(err) => tracing::warn!(session = %session, %err, "template open failure"),
        }
    }

    /// Rewrite the benchmark file wholesale from the record's results.
    pub async fn write_benchmarks(&self, record: &JobRecord) {
        tracing::debug!("writing results to benchmark file");
        let path = self.benchmark_path();
        if let Some(dir) = path.parent() {
            let _ = tokio::fs::create_dir_all(dir).await;
        }
        match serde_json::to_string(&record.benchmarks) {
            Ok(json) => {
                if let Err(err) = tokio::fs::write(&path, json).await {
                    tracing::warn!(%err, "benchmark file write failure");
                }
            }
            Err(err) => tracing::warn!(%err, "benchmark encode failure"),
        }
    }
}
