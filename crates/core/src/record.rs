use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Suffix appended to a primary session id to derive its speed-check id.
pub const SPEED_SUFFIX: &str = "_speed";

/// Record schema version carried by every persisted [`JobRecord`].
pub const RECORD_VERSION: u32 = 1;

/// Samples retained by [`SpeedHistory`] before FIFO eviction kicks in.
pub const SPEED_HISTORY_CAPACITY: usize = 180;

/// Globally unique session token identifying a job.
///
/// A speed-check probe shares its primary job's token plus a fixed
/// `_speed` suffix, so either record can be located from the other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap a raw session token.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The derived speed-check session id for this primary id.
    pub fn speed_probe(&self) -> SessionId {
        SessionId(format!("{}{SPEED_SUFFIX}", self.0))
    }

    /// Whether this id names a speed-check probe session.
    pub fn is_speed_probe(&self) -> bool {
        self.0.ends_with(SPEED_SUFFIX)
    }

    /// The primary session id, stripping the probe suffix when present.
    pub fn primary(&self) -> SessionId {
        match self.0.strip_suffix(SPEED_SUFFIX) {
            Some(base) => SessionId(base.to_string()),
            None => self.clone(),
        }
    }

    /// The raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Operator-controlled state driving the worker loop.
///
/// This field is the single source of truth for what the loop should do
/// next; everything else on the record is advisory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlState {
    /// Normal execution.
    Run,
    /// Execution resumed after a pause or restore.
    #[serde(rename = "Run/Restored")]
    RunRestored,
    /// The loop should pause the engine (transient, speed-check driven).
    Pause,
    /// The loop should quit the engine and return without finalizing.
    Stop,
    /// The loop should quit, reset and tear down any outstanding probe.
    Delete,
}

impl ControlState {
    /// Whether the record is marked for stop or delete.
    pub fn is_del_marked(self) -> bool {
        matches!(self, ControlState::Stop | ControlState::Delete)
    }
}

/// Broker-side lifecycle phase of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPhase {
    /// Submitted but not yet claimed by a worker.
    Queued,
    /// Claimed and executing.
    Started,
    /// Completed normally.
    Finished,
    /// Terminated with an error.
    Failed,
}

impl JobPhase {
    /// Whether the job has reached a terminal phase.
    pub fn is_settled(self) -> bool {
        matches!(self, JobPhase::Finished | JobPhase::Failed)
    }
}

/// Tri-state brain-cache decision carried on a job record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BrainState {
    /// No decision has been made yet.
    #[default]
    Unset,
    /// The throughput estimator enabled the cache.
    Enabled,
    /// Disabled, either by the user or by the estimator.
    Disabled,
}

impl BrainState {
    /// Map to the wire form (`null` / `true` / `false`).
    pub fn as_flag(self) -> Option<bool> {
        match self {
            BrainState::Unset => None,
            BrainState::Enabled => Some(true),
            BrainState::Disabled => Some(false),
        }
    }

    /// Build from the wire form.
    pub fn from_flag(flag: Option<bool>) -> Self {
        match flag {
            None => BrainState::Unset,
            Some(true) => BrainState::Enabled,
            Some(false) => BrainState::Disabled,
        }
    }

    /// Whether a decision (either way) has been recorded.
    pub fn is_decided(self) -> bool {
        !matches!(self, BrainState::Unset)
    }
}

impl Serialize for BrainState {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.as_flag().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for BrainState {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(BrainState::from_flag(Option::<bool>::deserialize(
            deserializer,
        )?))
    }
}

/// Fixed-capacity FIFO of raw speed samples, used only for trend display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpeedHistory(VecDeque<u64>);

impl SpeedHistory {
    /// Empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample, evicting the oldest once capacity is exceeded.
    pub fn push(&mut self, sample: u64) {
        self.0.push_back(sample);
        if self.0.len() > SPEED_HISTORY_CAPACITY {
            self.0.pop_front();
        }
    }

    /// Number of retained samples.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no samples have been recorded.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate oldest-first.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.0.iter().copied()
    }
}

/// Live engine status projected into a job record by the result writer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    /// Engine status line (`Running`, `Paused`, ...).
    pub status: String,
    /// Hash mode the status refers to (varies across a benchmark-all run).
    pub hash_mode: u32,
    /// Keyspace progress, percent-scaled integer.
    pub progress: u64,
    /// Restore/skip point for resuming the session.
    pub restore_point: u64,
    /// Raw candidate throughput (hashes/sec).
    pub speed_raw: u64,
    /// Human-formatted throughput string.
    pub speed_all: String,
    /// Digests recovered so far.
    pub digests_done: u64,
    /// Total digests in the session.
    pub digests_total: u64,
    /// Salt count for the loaded hashes.
    pub salts_total: u64,
}

/// Throughput measurement published by the speed-check sub-pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeMeasurement {
    /// Hash-mode descriptor strings (name, category).
    pub mode_info: Vec<String>,
    /// Measured throughput, hashes/sec.
    pub speed: u64,
    /// Salt count observed during the probe.
    pub salts: u64,
}

/// Submission-time attack parameters, preserved into the result snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDetails {
    /// Operator-supplied job name.
    pub name: Option<String>,
    /// Hashcat hash-mode number.
    pub hash_mode: u32,
    /// Attack mode; `None` when unset or coerced away from bad input.
    pub attack_mode: Option<u32>,
    /// Mask pattern, when applicable.
    pub mask: Option<String>,
    /// Primary wordlist label.
    pub wordlist: Option<String>,
    /// Secondary wordlist label (combinator attacks).
    pub wordlist2: Option<String>,
    /// Rule-file labels.
    #[serde(default)]
    pub rules: Vec<String>,
}

/// One benchmark measurement: raw speed plus the formatted display string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchmarkEntry(pub u64, pub String);

/// One mutable record per job, keyed by session id.
///
/// Mutated by the worker loop, the speed-check pipeline and external
/// control-command writers; merges are idempotent and last-writer-wins,
/// the store provides no transactions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Record schema version.
    pub version: u32,
    /// Session identity.
    pub session_id: SessionId,
    /// Operator control state (see [`ControlState`]).
    pub control_state: ControlState,
    /// Broker lifecycle phase.
    pub phase: JobPhase,
    /// Whether completion notifications were requested.
    pub notify: bool,
    /// Notification destination, when present.
    pub email: Option<String>,
    /// Last observed user activity, `YYYY-MM-DD HH:MM:SS`.
    pub last_seen: Option<String>,
    /// Notifications already sent for this job.
    pub email_count: u32,
    /// Brain-cache decision tri-state.
    pub brain: BrainState,
    /// Latest engine status snapshot.
    pub engine_state: Option<EngineSnapshot>,
    /// Bounded recent-speed trend.
    pub speed_history: SpeedHistory,
    /// Benchmark results keyed by hash-mode string.
    pub benchmarks: BTreeMap<String, BenchmarkEntry>,
    /// Advisory warning text surfaced to observers.
    pub warning: Option<String>,
    /// Advisory error text surfaced to observers.
    pub error_text: Option<String>,
    /// Advisory hint text surfaced to observers.
    pub tip: Option<String>,
    /// Restore/skip point mirrored from the engine.
    pub restore: u64,
    /// Failure detail for failed probe jobs.
    pub failure: Option<String>,
    /// Probe measurement (speed-check records only).
    pub probe: Option<ProbeMeasurement>,
    /// Submission-time attack parameters.
    pub details: JobDetails,
}

impl JobRecord {
    /// Fresh record in `Run`/`Queued` with everything else unset.
    pub fn new(session_id: SessionId, details: JobDetails) -> Self {
        Self {
            version: RECORD_VERSION,
            session_id,
            control_state: ControlState::Run,
            phase: JobPhase::Queued,
            notify: false,
            email: None,
            last_seen: None,
            email_count: 0,
            brain: BrainState::Unset,
            engine_state: None,
            speed_history: SpeedHistory::new(),
            benchmarks: BTreeMap::new(),
            warning: None,
            error_text: None,
            tip: None,
            restore: 0,
            failure: None,
            probe: None,
            details,
        }
    }

    /// Whether the record is marked for stop or delete.
    pub fn is_del_marked(&self) -> bool {
        self.control_state.is_del_marked()
    }
}
