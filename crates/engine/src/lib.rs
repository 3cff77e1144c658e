#![forbid(unsafe_code)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! Engine orchestration for `crackmill` (worker supervisory loop,
//! speed-check sub-pipeline, hashcat subprocess adapter).

pub mod adapter;
pub mod error;

mod hashcat;
mod notify;
mod speed_check;
#[cfg(test)]
mod test_support;
mod worker;
mod writer;

pub use adapter::{
    BrainParams, CrackEngine, EngineEvent, EngineSession, EngineStatus, RunMode, SessionParams,
    coerce_attack_mode,
};
pub use error::{EngineError, SpeedCheckError, WorkerError};
pub use hashcat::HashcatEngine;
pub use notify::{LAST_SEEN_FORMAT, NotificationGate, Notifier, NotifyEvent, WebhookNotifier};
pub use worker::{
    BRAIN_WAIT_LIMIT, DELETE_WAIT_LIMIT, HANG_LIMIT, JobOutcome, JobRequest, PAUSE_WAIT_LIMIT,
    Worker,
};
pub use writer::{ResultSnapshot, ResultWriter};
