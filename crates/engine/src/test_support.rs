//! Scripted engine doubles shared across the crate's unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crackmill_core::EngineSnapshot;

use crate::adapter::{
    CrackEngine, EngineEvent, EngineSession, EngineStatus, SessionParams,
};
use crate::error::EngineError;
use crate::notify::Notifier;

struct SessionInner {
    statuses: VecDeque<EngineStatus>,
    last: EngineStatus,
    forced: Option<EngineStatus>,
    snapshot: Option<EngineSnapshot>,
    events: VecDeque<EngineEvent>,
    log: String,
    executes: u32,
    pauses: u32,
    resumes: u32,
    quits: u32,
    resets: u32,
}

/// Shared, scriptable state behind a [`ScriptedSession`].
///
/// Status lines pop one per `status()` call and the last one repeats,
/// so a script maps 1:1 onto supervisor iterations. `pause()` forces
/// `Paused` until the next `resume()`.
#[derive(Clone)]
pub(crate) struct SessionState(Arc<Mutex<SessionInner>>);

impl SessionState {
    pub(crate) fn new(statuses: Vec<EngineStatus>) -> Self {
        Self(Arc::new(Mutex::new(SessionInner {
            statuses: statuses.into(),
            last: EngineStatus::Waiting,
            forced: None,
            snapshot: None,
            events: VecDeque::new(),
            log: String::new(),
            executes: 0,
            pauses: 0,
            resumes: 0,
            quits: 0,
            resets: 0,
        })))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionInner> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn set_snapshot(&self, snap: EngineSnapshot) {
        self.lock().snapshot = Some(snap);
    }

    pub(crate) fn push_event(&self, event: EngineEvent) {
        self.lock().events.push_back(event);
    }

    pub(crate) fn set_log(&self, log: impl Into<String>) {
        self.lock().log = log.into();
    }

    pub(crate) fn executes(&self) -> u32 {
        self.lock().executes
    }

    pub(crate) fn pauses(&self) -> u32 {
        self.lock().pauses
    }

    pub(crate) fn resumes(&self) -> u32 {
        self.lock().resumes
    }

    pub(crate) fn quits(&self) -> u32 {
        self.lock().quits
    }

    pub(crate) fn resets(&self) -> u32 {
        self.lock().resets
    }
}

pub(crate) struct ScriptedSession {
    state: SessionState,
}

#[async_trait]
impl EngineSession for ScriptedSession {
    async fn execute(&mut self) -> Result<(), EngineError> {
        self.state.lock().executes += 1;
        Ok(())
    }

    async fn status(&mut self) -> EngineStatus {
        let mut inner = self.state.lock();
        if let Some(forced) = inner.forced {
            return forced;
        }
        if let Some(next) = inner.statuses.pop_front() {
            inner.last = next;
        }
        inner.last
    }

    async fn snapshot(&mut self) -> Option<EngineSnapshot> {
        self.state.lock().snapshot.clone()
    }

    async fn pause(&mut self) -> Result<(), EngineError> {
        let mut inner = self.state.lock();
        inner.pauses += 1;
        inner.forced = Some(EngineStatus::Paused);
        Ok(())
    }

    async fn resume(&mut self) -> Result<(), EngineError> {
        let mut inner = self.state.lock();
        inner.resumes += 1;
        inner.forced = None;
        Ok(())
    }

    async fn quit(&mut self) -> Result<(), EngineError> {
        self.state.lock().quits += 1;
        Ok(())
    }

    async fn reset(&mut self) -> Result<(), EngineError> {
        self.state.lock().resets += 1;
        Ok(())
    }

    async fn log_buffer(&mut self) -> String {
        self.state.lock().log.clone()
    }

    fn drain_events(&mut self) -> Vec<EngineEvent> {
        self.state.lock().events.drain(..).collect()
    }
}

/// Clonable view of every [`SessionParams`] a [`MockEngine`] received.
#[derive(Clone, Default)]
pub(crate) struct CapturedParams(Arc<Mutex<Vec<SessionParams>>>);

impl CapturedParams {
    pub(crate) fn snapshot(&self) -> Vec<SessionParams> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Engine double handing out pre-scripted sessions in order. Configuring
/// more sessions than were scripted is a test bug and panics.
pub(crate) struct MockEngine {
    sessions: Mutex<VecDeque<SessionState>>,
    captured: CapturedParams,
}

impl MockEngine {
    pub(crate) fn new(sessions: Vec<SessionState>) -> Self {
        Self {
            sessions: Mutex::new(sessions.into()),
            captured: CapturedParams::default(),
        }
    }

    pub(crate) fn captured_handle(&self) -> CapturedParams {
        self.captured.clone()
    }
}

#[async_trait]
impl CrackEngine for MockEngine {
    async fn configure(&self, params: SessionParams) -> Result<Box<dyn EngineSession>, EngineError> {
        self.captured
            .0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(params);
        let state = self
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .expect("no scripted session left");
        Ok(Box::new(ScriptedSession { state }))
    }
}

/// Notifier double counting deliveries.
#[derive(Default)]
pub(crate) struct CountingNotifier(AtomicU32);

impl CountingNotifier {
    pub(crate) fn count(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for CountingNotifier {
    async fn notify(&self, _dest: &str, _subject: &str) -> anyhow::Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
