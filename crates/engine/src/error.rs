//! Failure taxonomies for the engine adapter, the speed-check
//! sub-pipeline and the worker loop.

use crackmill_core::{SessionId, StoreError};

/// Engine adapter failure taxonomy.
///
/// Any adapter call may fail when the underlying engine reports a
/// hardware or configuration error; the owning loop treats this as fatal
/// for the run.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine process/library could not be started.
    #[error("engine spawn failed: {0}")]
    Spawn(String),
    /// An I/O failure talking to the engine.
    #[error("engine io: {0}")]
    Io(#[from] std::io::Error),
    /// The engine produced output the adapter could not interpret.
    #[error("engine protocol: {0}")]
    Protocol(String),
}

/// Speed-check sub-pipeline failures.
///
/// The primary job is resumed as a side effect before any of these
/// surface, so a probe failure never leaves the primary permanently
/// paused.
#[derive(Debug, thiserror::Error)]
pub enum SpeedCheckError {
    /// The engine aborted during probing.
    #[error("aborted: {log}")]
    Aborted {
        /// Engine log buffer at abort time.
        log: String,
    },
    /// The probe exhausted its poll budget without a measurement.
    #[error("speed check timed out: {log}")]
    Timeout {
        /// Engine log buffer at timeout.
        log: String,
    },
    /// The active primary job could not be paused.
    #[error("speed check error: cannot pause active job {session}")]
    PauseUnavailable {
        /// The primary session that could not be paused.
        session: SessionId,
    },
    /// The probe record settled in the failed phase.
    #[error("speed check failed: {detail}")]
    Failed {
        /// Failure text recorded on the probe.
        detail: String,
    },
    /// Adapter failure during probing.
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// Store failure during probing.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Worker loop failure taxonomy.
///
/// Fatal engine conditions and hang detection are the only conditions
/// allowed to terminate the loop abnormally; everything else degrades to
/// a logged warning plus a record annotation.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The engine reported `Aborted`.
    #[error("aborted: {log}")]
    EngineFatal {
        /// Engine log buffer at abort time.
        log: String,
    },
    /// The engine never reached `Running` within the iteration ceiling.
    #[error("engine hung, initialize timeout after {iterations} iterations")]
    Hang {
        /// Iterations observed before giving up.
        iterations: u64,
    },
    /// The speed-check sub-pipeline failed while the worker waited on it.
    #[error("speed check failed: {0}")]
    SpeedCheck(#[from] SpeedCheckError),
    /// Adapter failure.
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// Store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}
