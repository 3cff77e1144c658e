//! Abstraction seam over the external cracking engine: session traits,
//! status and event vocabulary, and per-session parameters.

use std::path::PathBuf;

use async_trait::async_trait;

use crackmill_core::{EngineSnapshot, SessionId};

use crate::error::EngineError;

/// Engine session status, layered under the record's control state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    /// Sentinel: the engine has not produced a status yet.
    Waiting,
    /// Session is starting up (kernel compile, dictionary cache, ...).
    Initializing,
    /// Actively cracking.
    Running,
    /// Paused by request.
    Paused,
    /// Candidate space exhausted (terminal).
    Exhausted,
    /// All digests recovered (terminal).
    Cracked,
    /// Fatal engine condition (terminal).
    Aborted,
    /// The engine computed the requested metric and is idle
    /// (speed-only / show runs).
    Bypass,
}

impl EngineStatus {
    /// Parse an engine status line, `Waiting` for anything unknown.
    pub fn parse(raw: &str) -> EngineStatus {
        match raw.trim() {
            "Initializing" => EngineStatus::Initializing,
            "Running" => EngineStatus::Running,
            "Paused" => EngineStatus::Paused,
            "Exhausted" => EngineStatus::Exhausted,
            "Cracked" => EngineStatus::Cracked,
            "Aborted" => EngineStatus::Aborted,
            "Bypass" => EngineStatus::Bypass,
            _ => EngineStatus::Waiting,
        }
    }
}

/// Engine event, a closed set of tagged variants dispatched through one
/// synchronous handler table owned by the worker loop. Handlers only
/// mutate records and enqueue notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// The engine logged a warning.
    LogWarning,
    /// The engine logged an error.
    LogError,
    /// A hash was cracked during a live session.
    HashCracked,
    /// The cracker loop finished.
    CrackerFinished,
    /// The outer loop finished (benchmark runs).
    OuterloopFinished,
    /// A potfile entry matched during a `show` run.
    PotfileHashShow,
    /// The engine finished initializing.
    Initialized,
    /// Catch-all status-change notification.
    Any,
}

/// What kind of run a session performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Normal cracking run.
    #[default]
    Crack,
    /// Potfile-only lookup, no GPU cracking.
    Show,
    /// Rate measurement only, no candidate output.
    SpeedOnly,
    /// Benchmark of one hash mode.
    Benchmark,
    /// Benchmark of every hash mode.
    BenchmarkAll,
}

/// Brain client parameters handed to the engine when enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrainParams {
    /// Brain client feature flags.
    pub features: u8,
    /// Per-deployment brain password.
    pub password: String,
}

/// Everything needed to configure one engine session.
#[derive(Debug, Clone)]
pub struct SessionParams {
    /// Session identity (flows into the engine's session name).
    pub session: SessionId,
    /// Run mode.
    pub mode: RunMode,
    /// File containing the target hashes.
    pub hash_file: PathBuf,
    /// Hash-mode number.
    pub hash_mode: u32,
    /// Attack mode; unset when absent or coerced away from bad input.
    pub attack_mode: Option<u32>,
    /// Mask pattern or mask-file path.
    pub mask: Option<String>,
    /// Primary wordlist.
    pub wordlist: Option<PathBuf>,
    /// Secondary wordlist (combinator attacks).
    pub wordlist2: Option<PathBuf>,
    /// Rule files.
    pub rules: Vec<PathBuf>,
    /// Hash file carries `user:hash` lines.
    pub username: bool,
    /// Mask increment mode.
    pub increment: bool,
    /// Increment lower bound.
    pub increment_min: Option<u32>,
    /// Increment upper bound.
    pub increment_max: Option<u32>,
    /// Potfile path.
    pub potfile: Option<PathBuf>,
    /// Cracked-output file.
    pub outfile: Option<PathBuf>,
    /// Restore/skip point.
    pub restore_point: Option<u64>,
    /// Markov statistics file.
    pub markov_stats: Option<PathBuf>,
    /// Brain client parameters; `None` leaves the brain off.
    pub brain: Option<BrainParams>,
}

impl SessionParams {
    /// Minimal params for `session` with everything else unset.
    pub fn new(session: SessionId) -> Self {
        Self {
            session,
            mode: RunMode::Crack,
            hash_file: PathBuf::new(),
            hash_mode: 0,
            attack_mode: None,
            mask: None,
            wordlist: None,
            wordlist2: None,
            rules: Vec::new(),
            username: false,
            increment: false,
            increment_min: None,
            increment_max: None,
            potfile: None,
            outfile: None,
            restore_point: None,
            markov_stats: None,
            brain: None,
        }
    }
}

/// Coerce an attack mode from untrusted submission input.
///
/// Bad optional input is dropped, never an error.
pub fn coerce_attack_mode(value: &serde_json::Value) -> Option<u32> {
    match value {
        serde_json::Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// A live engine session, owned exclusively by whichever loop started it.
///
/// Destroyed (quit + reset) at the end of every control path, including
/// error paths.
#[async_trait]
pub trait EngineSession: Send {
    /// Start the session. Non-blocking control; progress arrives via
    /// status polling and [`EngineSession::drain_events`].
    async fn execute(&mut self) -> Result<(), EngineError>;

    /// Current engine status ([`EngineStatus::Waiting`] until the engine
    /// reports one).
    async fn status(&mut self) -> EngineStatus;

    /// Latest full status snapshot, `None` while waiting.
    async fn snapshot(&mut self) -> Option<EngineSnapshot>;

    /// Pause the session.
    async fn pause(&mut self) -> Result<(), EngineError>;

    /// Resume a paused session.
    async fn resume(&mut self) -> Result<(), EngineError>;

    /// Quit the session.
    async fn quit(&mut self) -> Result<(), EngineError>;

    /// Reset engine state after quitting.
    async fn reset(&mut self) -> Result<(), EngineError>;

    /// The engine's accumulated log buffer (diagnostics for aborts).
    async fn log_buffer(&mut self) -> String;

    /// Drain events accumulated since the last call, oldest first.
    fn drain_events(&mut self) -> Vec<EngineEvent>;
}

/// Factory wrapping the external cracking engine.
#[async_trait]
pub trait CrackEngine: Send + Sync {
    /// Configure a new session. May fail on hardware or configuration
    /// errors, which the owning loop treats as fatal for that run.
    async fn configure(&self, params: SessionParams) -> Result<Box<dyn EngineSession>, EngineError>;
}
