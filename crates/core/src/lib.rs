#![forbid(unsafe_code)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! Shared types for `crackmill` (job records, record store, config, estimator).

/// Injected runtime configuration.
pub mod config;
/// Throughput estimator for the brain cache decision.
pub mod estimator;
/// Typed job records and the session-id conventions.
pub mod record;
/// Record store trait, queues and the lease registry.
pub mod store;

pub use config::{
    CUSTOM_CHARSET_1, CUSTOM_CHARSET_2, CUSTOM_CHARSET_3, Config, WORKLOAD_PROFILE, config_path,
    ensure_config, load_config, save_config,
};
pub use estimator::brain_check;
pub use record::{
    BenchmarkEntry, BrainState, ControlState, EngineSnapshot, JobDetails, JobPhase, JobRecord,
    ProbeMeasurement, SessionId, SpeedHistory,
};
pub use store::{Lease, MemoryStore, Queue, RecordStore, StoreError};
