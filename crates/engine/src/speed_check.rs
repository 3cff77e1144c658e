//! Speed-check sub-pipeline: measure throughput and harvest potfile
//! hits for a submitted job without running concurrently with the
//! primary GPU workload.

use crackmill_core::{
    ControlState, JobDetails, JobPhase, JobRecord, ProbeMeasurement, Queue, SessionId,
};

use crate::adapter::{EngineSession, EngineStatus, RunMode};
use crate::error::SpeedCheckError;
use crate::worker::{JobRequest, SHOW_WAIT_LIMIT, SPEED_WAIT_LIMIT, Worker};
use crate::writer::ResultSnapshot;

impl Worker {
    /// Run the probe for `req` and publish its measurement onto the
    /// derived speed-check record.
    ///
    /// Holds the speed-check lease for the duration; the primary loop
    /// reads that lease to keep itself paused. The primary job is always
    /// resumed before an error surfaces.
    pub async fn run_speed_check(&self, req: JobRequest) -> Result<(), SpeedCheckError> {
        let primary = req.session.primary();
        let probe_id = primary.speed_probe();
        tracing::info!(session = %probe_id, "running speed check");
        self.store()
            .acquire_lease(Queue::SpeedCheck, &probe_id, self.config.timing.lease_ttl())
            .await?;

        let mut probe = match self.fetch_soft(Queue::SpeedCheck, &probe_id).await {
            Some(probe) => probe,
            None => JobRecord::new(probe_id.clone(), details_from(&req)),
        };
        probe.phase = JobPhase::Started;
        self.save_soft(Queue::SpeedCheck, &probe).await;

        let result = self.speed_check_inner(&req, &primary, &probe_id).await;

        let _ = self
            .store()
            .release_lease(Queue::SpeedCheck, &probe_id)
            .await;
        if let Some(mut probe) = self.fetch_soft(Queue::SpeedCheck, &probe_id).await {
            match &result {
                Ok(_) => probe.phase = JobPhase::Finished,
                Err(err) => {
                    probe.phase = JobPhase::Failed;
                    probe.failure = Some(err.to_string());
                }
            }
            self.save_soft(Queue::SpeedCheck, &probe).await;
        }
        result
    }

    async fn speed_check_inner(
        &self,
        req: &JobRequest,
        primary: &SessionId,
        probe_id: &SessionId,
    ) -> Result<(), SpeedCheckError> {
        let paused_primary = self.pause_primary(primary).await?;

        // Fresh measurement: start from an empty cracked-output file.
        let cracked = self.writer.cracked_path(primary);
        if let Some(parent) = cracked.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        if let Err(err) = tokio::fs::write(&cracked, b"").await {
            tracing::warn!(session = %primary, %err, "cracked file truncate failed");
        }

        // Status queries must succeed before the engine produces output.
        if let Some(probe) = self.fetch_soft(Queue::SpeedCheck, probe_id).await {
            let template = ResultSnapshot::from_record(&probe);
            self.writer.write_template(primary, &template).await;
        }

        let show = self.session_params(
            req,
            probe_id.clone(),
            RunMode::Show,
            None,
            Some(cracked.clone()),
        );
        let mut session = self.engine().configure(show).await?;
        let show_result = self.drive_show(session.as_mut(), req, probe_id).await;
        let _ = session.quit().await;
        let _ = session.reset().await;
        match show_result {
            Ok(true) => {}
            Ok(false) => {
                // Probe marked for deletion mid-show.
                self.resume_primary(paused_primary.as_ref()).await;
                return Ok(());
            }
            Err(err) => {
                self.resume_primary(paused_primary.as_ref()).await;
                return Err(err);
            }
        }

        if !req.brain_requested {
            // User opted out: record the decision and hand the GPU back.
            if let Some(mut job) = self.fetch_soft(Queue::Jobs, primary).await {
                job.brain = crackmill_core::BrainState::Disabled;
                self.save_soft(Queue::Jobs, &job).await;
            }
            self.resume_primary(paused_primary.as_ref()).await;
            return Ok(());
        }

        let speed = self.session_params(req, probe_id.clone(), RunMode::SpeedOnly, None, None);
        let mut session = self.engine().configure(speed).await?;
        let result = self.drive_speed_only(session.as_mut(), req, probe_id).await;
        let _ = session.quit().await;
        let _ = session.reset().await;
        self.resume_primary(paused_primary.as_ref()).await;
        result
    }

    /// Step 1: ask the active primary job (if any) to pause. Returns the
    /// session we paused, so only that one is resumed later.
    async fn pause_primary(
        &self,
        primary: &SessionId,
    ) -> Result<Option<SessionId>, SpeedCheckError> {
        let lease = match self.store().active_lease(Queue::Jobs).await? {
            Some(lease) => lease,
            None => return Ok(None),
        };
        let Some(mut job) = self.fetch_soft(Queue::Jobs, &lease.owner).await else {
            return Err(SpeedCheckError::PauseUnavailable {
                session: lease.owner,
            });
        };
        if job.is_del_marked() {
            // Deletion takes precedence; give the owning loop a moment
            // to settle instead of pausing a dying job.
            tracing::debug!(session = %lease.owner, "active job marked for deletion, waiting");
            tokio::time::sleep(self.config.timing.mask_grace()).await;
            return Ok(None);
        }
        tracing::debug!(session = %lease.owner, probe = %primary.speed_probe(), "pausing active job for speed check");
        job.control_state = ControlState::Pause;
        self.save_soft(Queue::Jobs, &job).await;
        Ok(Some(lease.owner))
    }

    /// Step 4: potfile-only lookup. Quick wins surfaced here skip the
    /// queue entirely, so pot hits route through the shared event
    /// dispatch and land on the primary record. Returns `Ok(false)`
    /// when the probe was marked for deletion and the pipeline should
    /// bail out.
    async fn drive_show(
        &self,
        session: &mut dyn EngineSession,
        req: &JobRequest,
        probe_id: &SessionId,
    ) -> Result<bool, SpeedCheckError> {
        session.execute().await?;
        let mut waited: u32 = 0;
        while waited < SHOW_WAIT_LIMIT {
            self.dispatch_events(session, req, false).await;
            match session.status().await {
                EngineStatus::Running | EngineStatus::Paused | EngineStatus::Bypass => {
                    return Ok(true);
                }
                EngineStatus::Aborted => {
                    let log = session.log_buffer().await;
                    return Err(SpeedCheckError::Aborted { log });
                }
                _ => {}
            }
            if self
                .fetch_soft(Queue::SpeedCheck, probe_id)
                .await
                .is_some_and(|p| p.is_del_marked())
            {
                tracing::debug!(session = %probe_id, "probe marked for deletion during show");
                return Ok(false);
            }
            tokio::time::sleep(self.config.timing.probe_poll()).await;
            waited += 1;
        }
        // Show mode is allowed to finish without ever surfacing one of
        // the observed states; treat budget exhaustion as completion.
        Ok(true)
    }

    /// Step 5: speed-only run. Publishes the measurement on `Bypass`.
    async fn drive_speed_only(
        &self,
        session: &mut dyn EngineSession,
        req: &JobRequest,
        probe_id: &SessionId,
    ) -> Result<(), SpeedCheckError> {
        session.execute().await?;
        let mut waited: u32 = 0;
        while waited < SPEED_WAIT_LIMIT {
            match session.status().await {
                EngineStatus::Bypass => {
                    let Some(snap) = session.snapshot().await else {
                        let log = session.log_buffer().await;
                        return Err(SpeedCheckError::Timeout { log });
                    };
                    let measurement = ProbeMeasurement {
                        mode_info: mode_info(req),
                        speed: snap.speed_raw,
                        salts: snap.salts_total,
                    };
                    tracing::info!(
                        session = %probe_id,
                        speed = measurement.speed,
                        salts = measurement.salts,
                        "speed check measurement published"
                    );
                    if let Some(mut probe) = self.fetch_soft(Queue::SpeedCheck, probe_id).await {
                        probe.probe = Some(measurement);
                        self.save_soft(Queue::SpeedCheck, &probe).await;
                    }
                    return Ok(());
                }
                EngineStatus::Aborted => {
                    let log = session.log_buffer().await;
                    return Err(SpeedCheckError::Aborted { log });
                }
                _ => {}
            }
            if self
                .fetch_soft(Queue::SpeedCheck, probe_id)
                .await
                .is_some_and(|p| p.is_del_marked())
            {
                tracing::debug!(session = %probe_id, "probe marked for deletion during speed run");
                return Ok(());
            }
            tokio::time::sleep(self.config.timing.probe_poll()).await;
            waited += 1;
        }
        let log = session.log_buffer().await;
        Err(SpeedCheckError::Timeout { log })
    }

    /// Hand the GPU back: restore the job this pipeline paused, unless
    /// it has been marked for deletion in the meantime.
    async fn resume_primary(&self, paused: Option<&SessionId>) {
        let Some(primary) = paused else { return };
        let Some(mut job) = self.fetch_soft(Queue::Jobs, primary).await else {
            return;
        };
        if job.is_del_marked() {
            return;
        }
        tracing::debug!(session = %primary, "resuming primary job after speed check");
        job.control_state = ControlState::RunRestored;
        self.save_soft(Queue::Jobs, &job).await;
    }
}

fn details_from(req: &JobRequest) -> JobDetails {
    JobDetails {
        name: None,
        hash_mode: req.hash_mode,
        attack_mode: req.attack_mode,
        mask: req.mask.clone(),
        wordlist: req
            .wordlist
            .as_ref()
            .map(|p| p.display().to_string()),
        wordlist2: req
            .wordlist2
            .as_ref()
            .map(|p| p.display().to_string()),
        rules: req.rules.iter().map(|p| p.display().to_string()).collect(),
    }
}

fn mode_info(req: &JobRequest) -> Vec<String> {
    let mut info = vec![req.hash_mode.to_string()];
    if let Some(name) = crate::hashcat::hash_mode_name(req.hash_mode) {
        info.push(name.to_string());
    }
    info
}
