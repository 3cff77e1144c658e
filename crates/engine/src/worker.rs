use std::path::PathBuf;
use std::sync::Arc;

use crackmill_core::{
    BenchmarkEntry, BrainState, Config, ControlState, JobPhase, JobRecord, Queue, RecordStore,
    SessionId, brain_check,
};

use crate::adapter::{
    BrainParams, CrackEngine, EngineEvent, EngineSession, EngineStatus, RunMode, SessionParams,
};
use crate::error::{SpeedCheckError, WorkerError};
use crate::notify::{NotificationGate, Notifier, NotifyEvent};
use crate::writer::ResultWriter;

/// Main-loop iterations of non-`Running` status tolerated before the job
/// is declared hung.
pub const HANG_LIMIT: u64 = 2000;
/// Poll attempts waiting for the engine to acknowledge a pause.
pub const PAUSE_WAIT_LIMIT: u32 = 400;
/// Poll attempts waiting for an outstanding probe to settle on delete.
pub const DELETE_WAIT_LIMIT: u32 = 100;
/// Probe `show` phase poll budget.
pub(crate) const SHOW_WAIT_LIMIT: u32 = 100;
/// Probe `speed_only` phase poll budget.
pub(crate) const SPEED_WAIT_LIMIT: u32 = 180;
/// Brain-gate wait budget, counted in 5-unit steps.
pub const BRAIN_WAIT_LIMIT: u32 = 410;

/// One job submission, as handed to the worker by the queue glue.
#[derive(Debug, Clone)]
pub struct JobRequest {
    /// Session identity.
    pub session: SessionId,
    /// File containing the target hashes.
    pub hash_file: PathBuf,
    /// Hash-mode number.
    pub hash_mode: u32,
    /// Attack mode (already coerced; bad input arrives as `None`).
    pub attack_mode: Option<u32>,
    /// Mask pattern or mask-file path.
    pub mask: Option<String>,
    /// Whether the mask is a mask file (affects exhaustion handling).
    pub mask_file: bool,
    /// Primary wordlist.
    pub wordlist: Option<PathBuf>,
    /// Secondary wordlist.
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
    /// Restore/skip point to resume from.
    pub restore: Option<u64>,
    /// Cracked-output file override.
    pub outfile: Option<PathBuf>,
    /// Whether the submitter asked for the brain cache.
    pub brain_requested: bool,
    /// Benchmark run (single mode).
    pub benchmark: bool,
    /// Benchmark every hash mode.
    pub benchmark_all: bool,
}

impl JobRequest {
    /// Minimal request with everything optional unset.
    pub fn new(session: SessionId, hash_file: impl Into<PathBuf>, hash_mode: u32) -> Self {
        Self {
            session,
            hash_file: hash_file.into(),
            hash_mode,
            attack_mode: None,
            mask: None,
            mask_file: false,
            wordlist: None,
            wordlist2: None,
            rules: Vec::new(),
            username: false,
            increment: false,
            increment_min: None,
            increment_max: None,
            restore: None,
            outfile: None,
            brain_requested: false,
            benchmark: false,
            benchmark_all: false,
        }
    }
}

/// How a supervised job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Candidate space exhausted.
    Exhausted,
    /// All digests recovered.
    Cracked,
    /// Stopped by operator command, not finalized.
    Stopped,
    /// Deleted by operator command.
    Deleted,
    /// Benchmark run completed.
    Benchmarked,
}

#[derive(Default)]
pub(crate) struct EventFlow {
    outerloop_finished: bool,
}

/// The supervisory loop driving one engine session per claimed job.
pub struct Worker {
    store: Arc<dyn RecordStore>,
    engine: Arc<dyn CrackEngine>,
    pub(crate) writer: ResultWriter,
    gate: NotificationGate,
    pub(crate) config: Config,
}

impl Worker {
    /// Worker over the given store, engine and notification transport.
    pub fn new(
        store: Arc<dyn RecordStore>,
        engine: Arc<dyn CrackEngine>,
        notifier: Arc<dyn Notifier>,
        config: Config,
    ) -> Self {
        let writer = ResultWriter::new(&config.files.log_dir);
        let gate = NotificationGate::new(config.notify.clone(), notifier);
        Self {
            store,
            engine,
            writer,
            gate,
            config,
        }
    }

    pub(crate) fn store(&self) -> &dyn RecordStore {
        self.store.as_ref()
    }

    pub(crate) fn engine(&self) -> &dyn CrackEngine {
        self.engine.as_ref()
    }

    pub(crate) async fn fetch_soft(&self, queue: Queue, id: &SessionId) -> Option<JobRecord> {
        match self.store.fetch(queue, id).await {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(session = %id, %err, "record fetch failed");
                None
            }
        }
    }

    pub(crate) async fn save_soft(&self, queue: Queue, record: &JobRecord) {
        if let Err(err) = self.store.save(queue, record).await {
            tracing::warn!(session = %record.session_id, %err, "record save failed");
        }
    }

    pub(crate) async fn speed_lease_active(&self) -> bool {
        match self.store.active_lease(Queue::SpeedCheck).await {
            Ok(lease) => lease.is_some(),
            Err(err) => {
                tracing::warn!(%err, "speed lease lookup failed");
                false
            }
        }
    }

    pub(crate) fn brain_params(&self) -> BrainParams {
        BrainParams {
            features: self.config.brain.features,
            password: self.config.brain.secret.clone(),
        }
    }

    /// Build engine session parameters for `req`, running as `session`
    /// in `mode`.
    pub(crate) fn session_params(
        &self,
        req: &JobRequest,
        session: SessionId,
        mode: RunMode,
        brain: Option<BrainParams>,
        outfile: Option<PathBuf>,
    ) -> SessionParams {
        let mut params = SessionParams::new(session);
        params.mode = mode;
        params.hash_file = req.hash_file.clone();
        params.hash_mode = req.hash_mode;
        params.attack_mode = req.attack_mode;
        params.mask = req.mask.clone();
        params.wordlist = req.wordlist.clone();
        params.wordlist2 = req.wordlist2.clone();
        params.rules = req.rules.clone();
        params.username = req.username;
        params.increment = req.increment;
        params.increment_min = req.increment_min;
        params.increment_max = req.increment_max;
        params.potfile = Some(self.config.files.potfile.clone());
        params.markov_stats = Some(self.config.files.markov_stats.clone());
        params.outfile = outfile;
        params.restore_point = req.restore;
        params.brain = brain;
        params
    }

    /// Claim and supervise one job to a terminal result.
    pub async fn run_job(&self, req: JobRequest) -> Result<JobOutcome, WorkerError> {
        tracing::info!(session = %req.session, "running job");
        self.store
            .acquire_lease(Queue::Jobs, &req.session, self.config.timing.lease_ttl())
            .await?;
        if let Some(mut record) = self.fetch_soft(Queue::Jobs, &req.session).await {
            record.phase = JobPhase::Started;
            self.save_soft(Queue::Jobs, &record).await;
        }

        let result = self.run_job_inner(&req).await;

        let _ = self.store.release_lease(Queue::Jobs, &req.session).await;
        if let Some(mut record) = self.fetch_soft(Queue::Jobs, &req.session).await {
            match &result {
                Ok(_) => record.phase = JobPhase::Finished,
                Err(err) => {
                    record.phase = JobPhase::Failed;
                    record.failure = Some(err.to_string());
                }
            }
            self.save_soft(Queue::Jobs, &record).await;
        }
        result
    }

    async fn run_job_inner(&self, req: &JobRequest) -> Result<JobOutcome, WorkerError> {
        let bench = req.benchmark || req.benchmark_all;
        let mode = if req.benchmark_all {
            RunMode::BenchmarkAll
        } else if req.benchmark {
            RunMode::Benchmark
        } else {
            RunMode::Crack
        };

        let brain = if bench || !req.brain_requested {
            None
        } else {
            self.brain_gate(req).await?
        };

        let outfile = req
            .outfile
            .clone()
            .or_else(|| (!bench).then(|| self.writer.cracked_path(&req.session)));
        let params = self.session_params(req, req.session.clone(), mode, brain, outfile);
        let mut session = self.engine.configure(params).await?;
        if let Err(err) = session.execute().await {
            let _ = session.quit().await;
            let _ = session.reset().await;
            return Err(err.into());
        }

        // A probe claimed the GPU between submission and now; mark this
        // job paused and let the loop carry out the handshake.
        if !bench && self.speed_lease_active().await {
            if let Some(mut record) = self.fetch_soft(Queue::Jobs, &req.session).await {
                if !record.is_del_marked() {
                    tracing::debug!(session = %req.session, "speed job running, marking job paused");
                    record.control_state = ControlState::Pause;
                    self.save_soft(Queue::Jobs, &record).await;
                }
            }
        }

        let out = self.supervise(session.as_mut(), req).await;
        if out.is_err() {
            let _ = session.quit().await;
            let _ = session.reset().await;
        }
        out
    }

    /// Wait on the derived speed-check record and decide brain
    /// enablement from its measurement.
    async fn brain_gate(&self, req: &JobRequest) -> Result<Option<BrainParams>, WorkerError> {
        let probe_id = req.session.speed_probe();
        let job = self.fetch_soft(Queue::Jobs, &req.session).await;

        // A restored job may already carry the decision.
        if job.as_ref().is_some_and(|j| j.brain == BrainState::Enabled) {
            tracing::debug!(session = %req.session, "restored job already brain-enabled");
            return Ok(Some(self.brain_params()));
        }

        let Some(mut probe) = self.fetch_soft(Queue::SpeedCheck, &probe_id).await else {
            tracing::error!(session = %req.session, "no speed job to check");
            if let Some(mut job) = job {
                if !job.is_del_marked() {
                    job.control_state = ControlState::RunRestored;
                    self.save_soft(Queue::Jobs, &job).await;
                }
            }
            return Ok(None);
        };

        let mut waited: u32 = 0;
        while probe.probe.is_none() && waited < BRAIN_WAIT_LIMIT {
            tracing::debug!(session = %req.session, waited, "speed measurement not populated, waiting");
            if let Some(job) = self.fetch_soft(Queue::Jobs, &req.session).await {
                if job.is_del_marked() {
                    return Ok(None);
                }
            }
            if probe.phase == JobPhase::Failed {
                let detail = probe
                    .failure
                    .clone()
                    .unwrap_or_else(|| "speed check failed".to_string());
                tracing::error!(session = %req.session, %detail, "speed check failed");
                return Err(SpeedCheckError::Failed { detail }.into());
            }
            if probe.is_del_marked() {
                return Ok(None);
            }
            if probe.phase == JobPhase::Finished {
                tracing::debug!(session = %req.session, "speed job settled without a measurement");
                break;
            }
            tokio::time::sleep(self.config.timing.brain_wait_poll()).await;
            waited += 5;
            match self.fetch_soft(Queue::SpeedCheck, &probe_id).await {
                Some(next) => probe = next,
                None => break,
            }
        }

        if let Some(measurement) = &probe.probe {
            let decision = brain_check(measurement.speed, measurement.salts);
            if let Some(mut job) = self.fetch_soft(Queue::Jobs, &req.session).await {
                job.brain = if decision {
                    BrainState::Enabled
                } else {
                    BrainState::Disabled
                };
                self.save_soft(Queue::Jobs, &job).await;
            }
            // Measurement consumed and decision recorded; the probe
            // record has served its purpose.
            if let Err(err) = self.store.delete(Queue::SpeedCheck, &probe_id).await {
                tracing::warn!(session = %probe_id, %err, "probe record delete failed");
            }
            return Ok(decision.then(|| self.brain_params()));
        }

        tracing::error!(session = %req.session, "speed check never reported, disabling brain");
        if let Some(mut job) = self.fetch_soft(Queue::Jobs, &req.session).await {
            if !job.is_del_marked() {
                job.control_state = ControlState::RunRestored;
            }
            self.save_soft(Queue::Jobs, &job).await;
        }
        Ok(None)
    }

    /// The control-state machine: one status poll and at most one
    /// transition per iteration, until a terminal condition.
    async fn supervise(
        &self,
        session: &mut dyn EngineSession,
        req: &JobRequest,
    ) -> Result<JobOutcome, WorkerError> {
        let bench = req.benchmark || req.benchmark_all;
        let poll = self.config.timing.main_poll();
        let mut iterations: u64 = 0;
        let mut initialized = false;

        loop {
            let mut hc_state = session.status().await;
            let flow = self.dispatch_events(session, req, bench).await;
            if bench && flow.outerloop_finished {
                let _ = session.quit().await;
                let _ = session.reset().await;
                return Ok(JobOutcome::Benchmarked);
            }

            if hc_state == EngineStatus::Exhausted {
                if req.mask_file {
                    // Mask files transiently report Exhausted between
                    // sub-masks; re-poll after a grace delay before
                    // accepting it.
                    tokio::time::sleep(self.config.timing.mask_grace()).await;
                    hc_state = session.status().await;
                    tracing::info!(session = %req.session, status = ?hc_state, "re-checking mask file exhaustion");
                }
                if hc_state == EngineStatus::Exhausted {
                    self.on_finished(session, req, bench).await;
                    let _ = session.quit().await;
                    let _ = session.reset().await;
                    return Ok(JobOutcome::Exhausted);
                }
            } else if hc_state == EngineStatus::Cracked {
                self.on_cracked(session, req).await;
                let _ = session.quit().await;
                let _ = session.reset().await;
                return Ok(JobOutcome::Cracked);
            } else if hc_state == EngineStatus::Aborted {
                tracing::debug!(session = %req.session, "engine abort status returned");
                let log = session.log_buffer().await;
                return Err(WorkerError::EngineFatal { log });
            } else if iterations > HANG_LIMIT && hc_state != EngineStatus::Running && !req.mask_file
            {
                tracing::debug!(session = %req.session, "resetting job, seems to be hung");
                return Err(WorkerError::Hang { iterations });
            } else {
                if !initialized
                    && !matches!(hc_state, EngineStatus::Initializing | EngineStatus::Waiting)
                {
                    initialized = true;
                    tracing::debug!(session = %req.session, status = ?hc_state, "engine initialized");
                }
                if initialized && !bench {
                    if let Some(snap) = session.snapshot().await {
                        self.writer
                            .write_result(self.store.as_ref(), &req.session, &snap)
                            .await;
                    }
                }

                let speed_active = self.speed_lease_active().await;
                match self.fetch_soft(Queue::Jobs, &req.session).await {
                    None => tracing::error!(session = %req.session, "error finding job record"),
                    Some(mut job) => match job.control_state {
                        ControlState::Stop => {
                            tracing::info!(session = %req.session, "stopping job");
                            let _ = session.quit().await;
                            return Ok(JobOutcome::Stopped);
                        }
                        ControlState::Delete => {
                            tracing::info!(session = %req.session, "deleting job");
                            self.teardown_speed_probe(&req.session).await;
                            let _ = session.quit().await;
                            let _ = session.reset().await;
                            return Ok(JobOutcome::Deleted);
                        }
                        ControlState::Pause => {
                            if hc_state != EngineStatus::Paused {
                                self.pause_protocol(session, req, speed_active).await?;
                            } else if !speed_active && !job.is_del_marked() {
                                tracing::debug!(session = %req.session, "stale paused job caught, resuming");
                                job.control_state = ControlState::RunRestored;
                                self.save_soft(Queue::Jobs, &job).await;
                                session.resume().await?;
                            }
                        }
                        ControlState::Run | ControlState::RunRestored => {
                            if hc_state == EngineStatus::Bypass {
                                tracing::debug!("bypass not cleared");
                            } else if !speed_active
                                && !job.is_del_marked()
                                && hc_state == EngineStatus::Paused
                            {
                                tracing::debug!(session = %req.session, "stale paused job caught, resuming");
                                job.control_state = ControlState::RunRestored;
                                self.save_soft(Queue::Jobs, &job).await;
                                session.resume().await?;
                            }
                        }
                    },
                }
            }

            tokio::time::sleep(poll).await;
            iterations += 1;
        }
    }

    /// Pause handshake: ask the engine to pause, wait (bounded) for the
    /// acknowledgement, then recover a stale pause when no speed check
    /// explains it.
    async fn pause_protocol(
        &self,
        session: &mut dyn EngineSession,
        req: &JobRequest,
        speed_active: bool,
    ) -> Result<(), WorkerError> {
        session.pause().await?;
        tracing::debug!(session = %req.session, "pausing job");
        let mut waited: u32 = 0;
        let mut paused = false;
        while waited < PAUSE_WAIT_LIMIT {
            if session.status().await == EngineStatus::Paused {
                tracing::info!(session = %req.session, "job paused");
                paused = true;
                break;
            }
            if self
                .fetch_soft(Queue::Jobs, &req.session)
                .await
                .is_some_and(|j| j.is_del_marked())
            {
                break;
            }
            tokio::time::sleep(self.config.timing.probe_poll()).await;
            waited += 1;
        }
        if !paused {
            tracing::debug!(session = %req.session, "pause not acknowledged");
        }

        // Pausing is transient and tied to an active speed check; with
        // none running the pause was left stale by a prior failure.
        if !speed_active {
            if let Some(mut job) = self.fetch_soft(Queue::Jobs, &req.session).await {
                if !job.is_del_marked() {
                    tracing::debug!(session = %req.session, "stale paused job caught, resuming");
                    job.control_state = ControlState::RunRestored;
                    self.save_soft(Queue::Jobs, &job).await;
                    session.resume().await?;
                }
            }
        }
        Ok(())
    }

    /// On delete: wait (bounded) for an outstanding probe to settle,
    /// then remove its record.
    async fn teardown_speed_probe(&self, primary: &SessionId) {
        let probe_id = primary.speed_probe();
        let Some(mut probe) = self.fetch_soft(Queue::SpeedCheck, &probe_id).await else {
            return;
        };
        tracing::debug!(session = %probe_id, "deleting speed job");
        let mut waited: u32 = 0;
        while !probe.phase.is_settled() && waited < DELETE_WAIT_LIMIT {
            tokio::time::sleep(self.config.timing.probe_poll()).await;
            waited += 1;
            match self.fetch_soft(Queue::SpeedCheck, &probe_id).await {
                Some(next) => probe = next,
                None => return,
            }
        }
        if let Err(err) = self.store.delete(Queue::SpeedCheck, &probe_id).await {
            tracing::warn!(session = %probe_id, %err, "probe record delete failed");
        }
    }

    pub(crate) async fn dispatch_events(
        &self,
        session: &mut dyn EngineSession,
        req: &JobRequest,
        bench: bool,
    ) -> EventFlow {
        let mut flow = EventFlow::default();
        for event in session.drain_events() {
            tracing::debug!(session = %req.session, ?event, "callback triggered");
            match event {
                EngineEvent::LogWarning => self.on_warning(session, req).await,
                EngineEvent::LogError => self.on_error(session).await,
                EngineEvent::HashCracked | EngineEvent::PotfileHashShow => {
                    self.on_cracked(session, req).await;
                }
                EngineEvent::CrackerFinished => {
                    if bench {
                        self.on_bench(session, req).await;
                    } else {
                        self.on_finished(session, req, bench).await;
                    }
                }
                EngineEvent::OuterloopFinished => {
                    self.on_finished(session, req, bench).await;
                    flow.outerloop_finished = true;
                }
                EngineEvent::Initialized | EngineEvent::Any => {
                    if !bench {
                        if let Some(snap) = session.snapshot().await {
                            self.writer
                                .write_result(self.store.as_ref(), &req.session, &snap)
                                .await;
                        }
                    }
                }
            }
        }
        flow
    }

    async fn active_job_record(&self) -> Option<JobRecord> {
        let lease = match self.store.active_lease(Queue::Jobs).await {
            Ok(lease) => lease?,
            Err(err) => {
                tracing::warn!(%err, "jobs lease lookup failed");
                return None;
            }
        };
        self.fetch_soft(Queue::Jobs, &lease.owner).await
    }

    async fn on_warning(&self, session: &mut dyn EngineSession, req: &JobRequest) {
        let msg = session.log_buffer().await;
        tracing::warn!(session = %req.session, %msg, "engine warning");
        let Some(mut job) = self.active_job_record().await else {
            return;
        };
        if req.username && msg.contains("Separator unmatched") {
            job.tip = Some("This algorithm probably doesn't support the username flag".to_string());
        }
        if self.config.user_warnings {
            job.warning = Some(msg);
        }
        self.save_soft(Queue::Jobs, &job).await;
    }

    async fn on_error(&self, session: &mut dyn EngineSession) {
        let msg = session.log_buffer().await;
        let Some(mut job) = self.active_job_record().await else {
            return;
        };
        tracing::error!(session = %job.session_id, %msg, "engine error");
        job.error_text = Some(msg);
        self.save_soft(Queue::Jobs, &job).await;
    }

    pub(crate) async fn on_cracked(&self, session: &mut dyn EngineSession, req: &JobRequest) {
        let primary = req.session.primary();
        if let Some(mut job) = self.fetch_soft(Queue::Jobs, &primary).await {
            self.gate.apply(&mut job, NotifyEvent::HashCracked);
            self.save_soft(Queue::Jobs, &job).await;
        } else {
            tracing::debug!(session = %primary, "no job record yet");
        }
        if let Some(snap) = session.snapshot().await {
            self.writer
                .write_result(self.store.as_ref(), &req.session, &snap)
                .await;
        }
    }

    async fn on_finished(&self, session: &mut dyn EngineSession, req: &JobRequest, bench: bool) {
        let primary = req.session.primary();
        if let Some(mut job) = self.fetch_soft(Queue::Jobs, &primary).await {
            self.gate.apply(&mut job, NotifyEvent::JobComplete);
            self.save_soft(Queue::Jobs, &job).await;
        } else {
            tracing::debug!(session = %primary, "no job record yet");
        }
        if !bench {
            if let Some(snap) = session.snapshot().await {
                self.writer
                    .write_result(self.store.as_ref(), &req.session, &snap)
                    .await;
            }
        }
    }

    async fn on_bench(&self, session: &mut dyn EngineSession, req: &JobRequest) {
        let Some(snap) = session.snapshot().await else {
            return;
        };
        let Some(mut job) = self.fetch_soft(Queue::Jobs, &req.session).await else {
            tracing::error!(session = %req.session, "failed to write benchmark job meta");
            return;
        };
        job.benchmarks.insert(
            snap.hash_mode.to_string(),
            BenchmarkEntry(snap.speed_raw, snap.speed_all.clone()),
        );
        self.save_soft(Queue::Jobs, &job).await;
        self.writer.write_benchmarks(&job).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{CountingNotifier, MockEngine, SessionState};
    use crackmill_core::{EngineSnapshot, JobDetails, MemoryStore, ProbeMeasurement};
    use std::time::Duration;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.timing.main_poll_secs = 0.01;
        config.timing.probe_poll_secs = 0.01;
        config.timing.brain_wait_poll_secs = 0.01;
        config.timing.mask_grace_secs = 0.01;
        config.files.log_dir = std::env::temp_dir().join("crackmill-worker-tests");
        config
    }

    fn worker_with(engine: MockEngine, config: Config) -> Worker {
        Worker::new(
            Arc::new(MemoryStore::new()),
            Arc::new(engine),
            Arc::new(CountingNotifier::default()),
            config,
        )
    }

    async fn seed_job(worker: &Worker, id: &SessionId) {
        let record = JobRecord::new(id.clone(), JobDetails::default());
        worker
            .store()
            .save(Queue::Jobs, &record)
            .await
            .unwrap_or_else(|err| panic!("seed save failed: {err}"));
    }

    fn snapshot(speed: u64) -> EngineSnapshot {
        EngineSnapshot {
            status: "Running".to_string(),
            hash_mode: 1000,
            progress: 10,
            restore_point: 5,
            speed_raw: speed,
            speed_all: format!("{speed} H/s"),
            digests_done: 0,
            digests_total: 4,
            salts_total: 1,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_session_finishes_job() {
        let state = SessionState::new(vec![EngineStatus::Running, EngineStatus::Exhausted]);
        state.set_snapshot(snapshot(1000));
        let engine = MockEngine::new(vec![state.clone()]);
        let worker = worker_with(engine, test_config());
        let id = SessionId::new("job1");
        seed_job(&worker, &id).await;

        let out = worker
            .run_job(JobRequest::new(id.clone(), "/tmp/hashes.txt", 1000))
            .await
            .unwrap_or_else(|err| panic!("run failed: {err}"));
        assert_eq!(out, JobOutcome::Exhausted);
        assert_eq!(state.quits(), 1);
        assert_eq!(state.resets(), 1);
        let job = worker
            .fetch_soft(Queue::Jobs, &id)
            .await
            .unwrap_or_else(|| panic!("record missing"));
        assert_eq!(job.phase, JobPhase::Finished);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_marked_job_quits_without_reset() {
        let state = SessionState::new(vec![EngineStatus::Running, EngineStatus::Running]);
        state.set_snapshot(snapshot(1000));
        let engine = MockEngine::new(vec![state.clone()]);
        let worker = worker_with(engine, test_config());
        let id = SessionId::new("job-stop");
        let mut record = JobRecord::new(id.clone(), JobDetails::default());
        record.control_state = ControlState::Stop;
        worker
            .store()
            .save(Queue::Jobs, &record)
            .await
            .unwrap_or_else(|err| panic!("seed save failed: {err}"));

        let out = worker
            .run_job(JobRequest::new(id.clone(), "/tmp/hashes.txt", 0))
            .await
            .unwrap_or_else(|err| panic!("run failed: {err}"));
        assert_eq!(out, JobOutcome::Stopped);
        assert_eq!(state.quits(), 1);
        assert_eq!(state.resets(), 0, "stop must preserve the restore file");
    }

    #[tokio::test(start_paused = true)]
    async fn delete_marked_job_tears_down_probe_record() {
        let state = SessionState::new(vec![EngineStatus::Running]);
        state.set_snapshot(snapshot(1000));
        let engine = MockEngine::new(vec![state.clone()]);
        let worker = worker_with(engine, test_config());
        let id = SessionId::new("job-del");
        let mut record = JobRecord::new(id.clone(), JobDetails::default());
        record.control_state = ControlState::Delete;
        worker
            .store()
            .save(Queue::Jobs, &record)
            .await
            .unwrap_or_else(|err| panic!("seed save failed: {err}"));
        let mut probe = JobRecord::new(id.speed_probe(), JobDetails::default());
        probe.phase = JobPhase::Finished;
        worker
            .store()
            .save(Queue::SpeedCheck, &probe)
            .await
            .unwrap_or_else(|err| panic!("probe save failed: {err}"));

        let out = worker
            .run_job(JobRequest::new(id.clone(), "/tmp/hashes.txt", 0))
            .await
            .unwrap_or_else(|err| panic!("run failed: {err}"));
        assert_eq!(out, JobOutcome::Deleted);
        assert_eq!(state.quits(), 1);
        assert_eq!(state.resets(), 1);
        assert_eq!(state.resumes(), 0, "delete must never resume the session");
        assert!(
            worker
                .fetch_soft(Queue::SpeedCheck, &id.speed_probe())
                .await
                .is_none(),
            "probe record must be removed on delete"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stale_pause_resumes_when_no_speed_check_runs() {
        let state = SessionState::new(vec![
            EngineStatus::Running,
            EngineStatus::Paused,
            EngineStatus::Exhausted,
        ]);
        state.set_snapshot(snapshot(1000));
        let engine = MockEngine::new(vec![state.clone()]);
        let worker = worker_with(engine, test_config());
        let id = SessionId::new("job-stale");
        seed_job(&worker, &id).await;

        let out = worker
            .run_job(JobRequest::new(id.clone(), "/tmp/hashes.txt", 0))
            .await
            .unwrap_or_else(|err| panic!("run failed: {err}"));
        assert_eq!(out, JobOutcome::Exhausted);
        assert_eq!(state.resumes(), 1);
        let job = worker
            .fetch_soft(Queue::Jobs, &id)
            .await
            .unwrap_or_else(|| panic!("record missing"));
        assert_eq!(job.phase, JobPhase::Finished);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_request_honoured_while_speed_check_holds_lease() {
        // Paused state must persist while the probe lease is live.
        let state = SessionState::new(vec![EngineStatus::Running, EngineStatus::Running]);
        state.set_snapshot(snapshot(1000));
        let engine = MockEngine::new(vec![state.clone()]);
        let worker = worker_with(engine, test_config());
        let id = SessionId::new("job-pause");
        let mut record = JobRecord::new(id.clone(), JobDetails::default());
        record.control_state = ControlState::Pause;
        worker
            .store()
            .save(Queue::Jobs, &record)
            .await
            .unwrap_or_else(|err| panic!("seed save failed: {err}"));
        worker
            .store()
            .acquire_lease(
                Queue::SpeedCheck,
                &id.speed_probe(),
                Duration::from_secs(600),
            )
            .await
            .unwrap_or_else(|err| panic!("lease failed: {err}"));

        let worker = Arc::new(worker);
        let handle = {
            let worker = worker.clone();
            let id = id.clone();
            tokio::spawn(async move {
                worker
                    .run_job(JobRequest::new(id, "/tmp/hashes.txt", 0))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(state.pauses(), 1);
        assert_eq!(state.resumes(), 0, "must not resume under an active lease");

        // Release the lease and flip the stored state; the stale-pause
        // recovery path resumes, then the next scripted status ends it.
        let _ = worker
            .store()
            .release_lease(Queue::SpeedCheck, &id.speed_probe())
            .await;
        let mut job = worker
            .fetch_soft(Queue::Jobs, &id)
            .await
            .unwrap_or_else(|| panic!("record missing"));
        job.control_state = ControlState::Delete;
        worker.save_soft(Queue::Jobs, &job).await;
        let out = handle
            .await
            .unwrap_or_else(|err| panic!("join failed: {err}"))
            .unwrap_or_else(|err| panic!("run failed: {err}"));
        assert_eq!(out, JobOutcome::Deleted);
    }

    #[tokio::test(start_paused = true)]
    async fn hang_detected_after_limit_exceeded() {
        let mut statuses = vec![EngineStatus::Initializing; HANG_LIMIT as usize + 2];
        statuses.push(EngineStatus::Initializing);
        let state = SessionState::new(statuses);
        let engine = MockEngine::new(vec![state.clone()]);
        let worker = worker_with(engine, test_config());
        let id = SessionId::new("job-hang");
        seed_job(&worker, &id).await;

        let err = worker
            .run_job(JobRequest::new(id.clone(), "/tmp/hashes.txt", 0))
            .await
            .expect_err("hung session must error");
        assert!(matches!(err, WorkerError::Hang { .. }));
        assert_eq!(state.resets(), 1);
        let job = worker
            .fetch_soft(Queue::Jobs, &id)
            .await
            .unwrap_or_else(|| panic!("record missing"));
        assert_eq!(job.phase, JobPhase::Failed);
        assert!(job.failure.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_before_hang_limit_keeps_running() {
        let mut statuses = vec![EngineStatus::Initializing; HANG_LIMIT as usize];
        statuses.push(EngineStatus::Cracked);
        let state = SessionState::new(statuses);
        state.set_snapshot(snapshot(1000));
        let engine = MockEngine::new(vec![state.clone()]);
        let worker = worker_with(engine, test_config());
        let id = SessionId::new("job-slow");
        seed_job(&worker, &id).await;

        let out = worker
            .run_job(JobRequest::new(id.clone(), "/tmp/hashes.txt", 0))
            .await
            .unwrap_or_else(|err| panic!("run failed: {err}"));
        assert_eq!(out, JobOutcome::Cracked);
    }

    #[tokio::test(start_paused = true)]
    async fn brain_gate_disables_for_fast_salted_hash() {
        // 9 MH/s over 2 salts is 4.5 MH/s effective, well over the
        // threshold, so the cache overhead is not worth it.
        let state = SessionState::new(vec![EngineStatus::Running, EngineStatus::Exhausted]);
        state.set_snapshot(snapshot(1000));
        let engine = MockEngine::new(vec![state.clone()]);
        let captured = engine.captured_handle();
        let worker = worker_with(engine, test_config());
        let id = SessionId::new("job-brain");
        seed_job(&worker, &id).await;
        let mut probe = JobRecord::new(id.speed_probe(), JobDetails::default());
        probe.phase = JobPhase::Finished;
        probe.probe = Some(ProbeMeasurement {
            mode_info: vec!["1000".to_string(), "NTLM".to_string()],
            speed: 9_000_000,
            salts: 2,
        });
        worker
            .store()
            .save(Queue::SpeedCheck, &probe)
            .await
            .unwrap_or_else(|err| panic!("probe save failed: {err}"));

        let mut req = JobRequest::new(id.clone(), "/tmp/hashes.txt", 1000);
        req.brain_requested = true;
        let out = worker
            .run_job(req)
            .await
            .unwrap_or_else(|err| panic!("run failed: {err}"));
        assert_eq!(out, JobOutcome::Exhausted);
        let job = worker
            .fetch_soft(Queue::Jobs, &id)
            .await
            .unwrap_or_else(|| panic!("record missing"));
        assert_eq!(job.brain, BrainState::Disabled);
        assert!(
            worker
                .fetch_soft(Queue::SpeedCheck, &id.speed_probe())
                .await
                .is_none(),
            "probe record deleted once decision is made"
        );
        assert!(captured.snapshot()[0].brain.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn brain_gate_enables_for_slow_hash() {
        let state = SessionState::new(vec![EngineStatus::Running, EngineStatus::Exhausted]);
        state.set_snapshot(snapshot(200));
        let engine = MockEngine::new(vec![state.clone()]);
        let captured = engine.captured_handle();
        let worker = worker_with(engine, test_config());
        let id = SessionId::new("job-brain-on");
        seed_job(&worker, &id).await;
        let mut probe = JobRecord::new(id.speed_probe(), JobDetails::default());
        probe.phase = JobPhase::Finished;
        probe.probe = Some(ProbeMeasurement {
            mode_info: vec!["3200".to_string(), "bcrypt".to_string()],
            speed: 20_000,
            salts: 1,
        });
        worker
            .store()
            .save(Queue::SpeedCheck, &probe)
            .await
            .unwrap_or_else(|err| panic!("probe save failed: {err}"));

        let mut req = JobRequest::new(id.clone(), "/tmp/hashes.txt", 3200);
        req.brain_requested = true;
        let out = worker
            .run_job(req)
            .await
            .unwrap_or_else(|err| panic!("run failed: {err}"));
        assert_eq!(out, JobOutcome::Exhausted);
        let job = worker
            .fetch_soft(Queue::Jobs, &id)
            .await
            .unwrap_or_else(|| panic!("record missing"));
        assert_eq!(job.brain, BrainState::Enabled);
        let params = captured.snapshot();
        let brain = params[0]
            .brain
            .as_ref()
            .unwrap_or_else(|| panic!("brain params missing"));
        assert_eq!(brain.features, 3);
        assert!(!brain.password.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn settled_probe_without_measurement_falls_back_quickly() {
        let state = SessionState::new(vec![EngineStatus::Running, EngineStatus::Exhausted]);
        state.set_snapshot(snapshot(1000));
        let engine = MockEngine::new(vec![state.clone()]);
        let captured = engine.captured_handle();
        let worker = worker_with(engine, test_config());
        let id = SessionId::new("job-probe-bailed");
        seed_job(&worker, &id).await;
        // A probe that bailed out leaves a settled record with no
        // measurement behind.
        let mut probe = JobRecord::new(id.speed_probe(), JobDetails::default());
        probe.phase = JobPhase::Finished;
        worker
            .store()
            .save(Queue::SpeedCheck, &probe)
            .await
            .unwrap_or_else(|err| panic!("probe save failed: {err}"));

        let mut req = JobRequest::new(id.clone(), "/tmp/hashes.txt", 1000);
        req.brain_requested = true;
        let started = tokio::time::Instant::now();
        let out = worker
            .run_job(req)
            .await
            .unwrap_or_else(|err| panic!("run failed: {err}"));
        assert_eq!(out, JobOutcome::Exhausted);
        assert!(
            started.elapsed() < Duration::from_millis(500),
            "gate must bail out instead of burning the full wait budget"
        );
        assert!(captured.snapshot()[0].brain.is_none());
        let job = worker
            .fetch_soft(Queue::Jobs, &id)
            .await
            .unwrap_or_else(|| panic!("record missing"));
        assert_eq!(job.control_state, ControlState::RunRestored);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_probe_record_clears_brain_and_restores_run() {
        let state = SessionState::new(vec![EngineStatus::Running, EngineStatus::Exhausted]);
        state.set_snapshot(snapshot(1000));
        let engine = MockEngine::new(vec![state.clone()]);
        let captured = engine.captured_handle();
        let worker = worker_with(engine, test_config());
        let id = SessionId::new("job-noprobe");
        seed_job(&worker, &id).await;

        let mut req = JobRequest::new(id.clone(), "/tmp/hashes.txt", 1000);
        req.brain_requested = true;
        let out = worker
            .run_job(req)
            .await
            .unwrap_or_else(|err| panic!("run failed: {err}"));
        assert_eq!(out, JobOutcome::Exhausted);
        assert!(captured.snapshot()[0].brain.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn benchmark_run_collects_entries() {
        let state = SessionState::new(vec![EngineStatus::Running, EngineStatus::Running]);
        state.set_snapshot(snapshot(123_456));
        state.push_event(EngineEvent::CrackerFinished);
        state.push_event(EngineEvent::OuterloopFinished);
        let engine = MockEngine::new(vec![state.clone()]);
        let worker = worker_with(engine, test_config());
        let id = SessionId::new("bench1");
        seed_job(&worker, &id).await;

        let mut req = JobRequest::new(id.clone(), "/tmp/hashes.txt", 1000);
        req.benchmark = true;
        let out = worker
            .run_job(req)
            .await
            .unwrap_or_else(|err| panic!("run failed: {err}"));
        assert_eq!(out, JobOutcome::Benchmarked);
        let job = worker
            .fetch_soft(Queue::Jobs, &id)
            .await
            .unwrap_or_else(|| panic!("record missing"));
        let entry = job
            .benchmarks
            .get("1000")
            .unwrap_or_else(|| panic!("benchmark entry missing"));
        assert_eq!(entry.0, 123_456);
    }
}
