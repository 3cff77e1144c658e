use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use crackmill_core::{ControlState, Queue, RecordStore, SessionId};

#[derive(Debug)]
pub struct ShutdownController {
    forced: AtomicU8,
}

impl ShutdownController {
    pub fn new() -> Self {
        Self {
            forced: AtomicU8::new(0),
        }
    }

    pub fn bump_forced(&self) -> u8 {
        self.forced.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// First ctrl-c marks the job `Stop` so the loop winds down at its next
/// poll; a second one exits immediately.
pub fn spawn_ctrl_c_handler(
    shutdown: Arc<ShutdownController>,
    store: Arc<dyn RecordStore>,
    session: SessionId,
) {
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            let n = shutdown.bump_forced();
            if n == 1 {
                tracing::info!(session = %session, "stop requested, finishing up (ctrl-c again to force)");
                match store.fetch(Queue::Jobs, &session).await {
                    Ok(Some(mut record)) => {
                        record.control_state = ControlState::Stop;
                        if let Err(err) = store.save(Queue::Jobs, &record).await {
                            tracing::error!(session = %session, %err, "failed to mark job stopped");
                        }
                    }
                    Ok(None) => {
                        tracing::warn!(session = %session, "no job record to stop");
                    }
                    Err(err) => {
                        tracing::error!(session = %session, %err, "failed to mark job stopped");
                    }
                }
            } else {
                tracing::warn!("forced shutdown");
                std::process::exit(130);
            }
        }
    });
}
