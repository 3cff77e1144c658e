//! Subprocess-backed engine adapter driving a real `hashcat` binary.
//!
//! One spawned process per session. Status is consumed from the
//! machine-readable JSON status stream on stdout; control commands go
//! through the interactive stdin keys. A pump task owns the stdout
//! reader and publishes parsed state through a shared handle, so the
//! session's accessors never block on process I/O.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};

use crackmill_core::{
    CUSTOM_CHARSET_1, CUSTOM_CHARSET_2, CUSTOM_CHARSET_3, EngineSnapshot, WORKLOAD_PROFILE,
};

use crate::adapter::{CrackEngine, EngineEvent, EngineSession, EngineStatus, RunMode, SessionParams};
use crate::error::EngineError;

/// Hashcat numeric status codes from the JSON status stream.
fn map_status_code(code: u64) -> EngineStatus {
    match code {
        0..=2 => EngineStatus::Initializing,
        3 => EngineStatus::Running,
        4 => EngineStatus::Paused,
        5 => EngineStatus::Exhausted,
        6 => EngineStatus::Cracked,
        9 => EngineStatus::Bypass,
        _ => EngineStatus::Aborted,
    }
}

/// Display names for commonly-run hash modes.
pub(crate) fn hash_mode_name(mode: u32) -> Option<&'static str> {
    Some(match mode {
        0 => "MD5",
        100 => "SHA1",
        400 => "phpass",
        500 => "md5crypt",
        1000 => "NTLM",
        1400 => "SHA2-256",
        1700 => "SHA2-512",
        1800 => "sha512crypt",
        2500 => "WPA-EAPOL-PBKDF2",
        3200 => "bcrypt",
        5500 => "NetNTLMv1",
        5600 => "NetNTLMv2",
        7500 => "Kerberos 5 AS-REQ Pre-Auth etype 23",
        13100 => "Kerberos 5 TGS-REP etype 23",
        16800 => "WPA-PMKID-PBKDF2",
        22000 => "WPA-PBKDF2-PMKID+EAPOL",
        _ => return None,
    })
}

/// Human-readable rate string for a raw hashes/sec figure.
fn format_speed(speed: u64) -> String {
    const UNITS: [&str; 5] = ["H/s", "kH/s", "MH/s", "GH/s", "TH/s"];
    let mut value = speed as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// Parse one line of hashcat's `--status-json` output.
fn parse_status_line(hash_mode: u32, line: &str) -> Option<(EngineStatus, EngineSnapshot)> {
    let value: serde_json::Value = serde_json::from_str(line.trim()).ok()?;
    let code = value.get("status")?.as_u64()?;
    let status = map_status_code(code);
    let pair = |key: &str| -> (u64, u64) {
        let arr = value.get(key).and_then(|v| v.as_array());
        match arr {
            Some(arr) => (
                arr.first().and_then(|v| v.as_u64()).unwrap_or(0),
                arr.get(1).and_then(|v| v.as_u64()).unwrap_or(0),
            ),
            None => (0, 0),
        }
    };
    let (keyspace_done, keyspace_total) = pair("progress");
    let progress = if keyspace_total == 0 {
        0
    } else {
        keyspace_done * 100 / keyspace_total
    };
    let (digests_done, digests_total) = pair("recovered_hashes");
    let (_, salts_total) = pair("recovered_salts");
    let speed_raw = value
        .get("devices")
        .and_then(|v| v.as_array())
        .map(|devs| {
            devs.iter()
                .filter_map(|d| d.get("speed").and_then(|s| s.as_u64()))
                .sum()
        })
        .unwrap_or(0);
    let snapshot = EngineSnapshot {
        status: format!("{status:?}"),
        hash_mode,
        progress,
        restore_point: value
            .get("restore_point")
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
        speed_raw,
        speed_all: format_speed(speed_raw),
        digests_done,
        digests_total,
        salts_total,
    };
    Some((status, snapshot))
}

/// Build the hashcat argument vector for `params`.
fn build_args(params: &SessionParams) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "--session".into(),
        params.session.as_str().into(),
        "--status".into(),
        "--status-json".into(),
        "--status-timer=10".into(),
        format!("--workload-profile={WORKLOAD_PROFILE}"),
        format!("--custom-charset1={CUSTOM_CHARSET_1}"),
        format!("--custom-charset2={CUSTOM_CHARSET_2}"),
        format!("--custom-charset3={CUSTOM_CHARSET_3}"),
    ];
    match params.mode {
        RunMode::Benchmark => {
            args.push("--benchmark".into());
            args.push("--machine-readable".into());
            args.push(format!("--hash-type={}", params.hash_mode));
            return args;
        }
        RunMode::BenchmarkAll => {
            args.push("--benchmark".into());
            args.push("--benchmark-all".into());
            args.push("--machine-readable".into());
            return args;
        }
        RunMode::Show => args.push("--show".into()),
        RunMode::SpeedOnly => args.push("--speed-only".into()),
        RunMode::Crack => {}
    }
    args.push(format!("--hash-type={}", params.hash_mode));
    if let Some(attack) = params.attack_mode {
        args.push(format!("--attack-mode={attack}"));
    }
    if params.username {
        args.push("--username".into());
    }
    if params.increment {
        args.push("--increment".into());
        if let Some(min) = params.increment_min {
            args.push(format!("--increment-min={min}"));
        }
        if let Some(max) = params.increment_max {
            args.push(format!("--increment-max={max}"));
        }
    }
    if let Some(potfile) = &params.potfile {
        args.push(format!("--potfile-path={}", potfile.display()));
    }
    if let Some(markov) = &params.markov_stats {
        args.push(format!("--markov-hcstat2={}", markov.display()));
    }
    if let Some(outfile) = &params.outfile {
        args.push(format!("--outfile={}", outfile.display()));
    }
    if let Some(skip) = params.restore_point {
        args.push(format!("--skip={skip}"));
    }
    if let Some(brain) = &params.brain {
        args.push("--brain-client".into());
        args.push(format!("--brain-client-features={}", brain.features));
        args.push(format!("--brain-password={}", brain.password));
    }
    for rule in &params.rules {
        args.push(format!("--rules-file={}", rule.display()));
    }
    args.push(params.hash_file.display().to_string());
    // Positional attack inputs: wordlists first, mask last.
    if let Some(wordlist) = &params.wordlist {
        args.push(wordlist.display().to_string());
    }
    if let Some(wordlist2) = &params.wordlist2 {
        args.push(wordlist2.display().to_string());
    }
    if let Some(mask) = &params.mask {
        args.push(mask.clone());
    }
    args
}

/// Parse one `--machine-readable` benchmark result line
/// (`device:hash_mode:...:speed`, all-numeric fields).
fn parse_benchmark_line(line: &str) -> Option<(u32, u64)> {
    let fields: Vec<&str> = line.trim().split(':').collect();
    if fields.len() < 3 || !fields.iter().all(|f| f.bytes().all(|b| b.is_ascii_digit())) {
        return None;
    }
    let hash_mode = fields.get(1)?.parse().ok()?;
    let speed = fields.last()?.parse().ok()?;
    Some((hash_mode, speed))
}

#[derive(Default)]
struct PumpState {
    benchmark: bool,
    show: bool,
    status: Option<EngineStatus>,
    snapshot: Option<EngineSnapshot>,
    events: VecDeque<EngineEvent>,
    log: String,
    saw_first_status: bool,
}

impl PumpState {
    fn ingest(&mut self, hash_mode: u32, line: &str) {
        if self.benchmark {
            if let Some((mode, speed)) = parse_benchmark_line(line) {
                self.snapshot = Some(EngineSnapshot {
                    status: "Running".to_string(),
                    hash_mode: mode,
                    progress: 0,
                    restore_point: 0,
                    speed_raw: speed,
                    speed_all: format_speed(speed),
                    digests_done: 0,
                    digests_total: 0,
                    salts_total: 0,
                });
                self.events.push_back(EngineEvent::CrackerFinished);
                return;
            }
        }
        if let Some((status, snapshot)) = parse_status_line(hash_mode, line) {
            if !self.saw_first_status {
                self.saw_first_status = true;
                self.events.push_back(EngineEvent::Initialized);
            }
            if self.status != Some(status) {
                self.events.push_back(EngineEvent::Any);
            }
            if snapshot.digests_done
                > self
                    .snapshot
                    .as_ref()
                    .map(|s| s.digests_done)
                    .unwrap_or(0)
            {
                self.events.push_back(EngineEvent::HashCracked);
            }
            if matches!(status, EngineStatus::Exhausted | EngineStatus::Cracked)
                && self.status != Some(status)
            {
                self.events.push_back(EngineEvent::CrackerFinished);
            }
            self.status = Some(status);
            self.snapshot = Some(snapshot);
            return;
        }
        if line.contains("WARNING") {
            self.events.push_back(EngineEvent::LogWarning);
        } else if line.contains("ERROR") {
            self.events.push_back(EngineEvent::LogError);
        } else if self.show && line.contains(':') {
            // `hash:plain` potfile match. The plaintext stays out of the
            // log buffer.
            self.events.push_back(EngineEvent::PotfileHashShow);
            return;
        }
        self.log.push_str(line);
        self.log.push('\n');
    }
}

/// Live hashcat process plus the pump publishing its parsed output.
struct HashcatSession {
    binary: PathBuf,
    restore_dir: PathBuf,
    params: SessionParams,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    state: Arc<Mutex<PumpState>>,
}

impl HashcatSession {
    fn state(&self) -> MutexGuard<'_, PumpState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn send_key(&mut self, key: &[u8]) -> Result<(), EngineError> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(EngineError::Protocol("session not executing".to_string()));
        };
        stdin.write_all(key).await?;
        stdin.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl EngineSession for HashcatSession {
    async fn execute(&mut self) -> Result<(), EngineError> {
        let args = build_args(&self.params);
        tracing::debug!(session = %self.params.session, ?args, "spawning engine");
        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| EngineError::Spawn(err.to_string()))?;
        self.stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Spawn("stdout not captured".to_string()))?;

        let state = self.state.clone();
        let hash_mode = self.params.hash_mode;
        let benchmark = matches!(
            self.params.mode,
            RunMode::Benchmark | RunMode::BenchmarkAll
        );
        {
            let mut state = self.state();
            state.benchmark = benchmark;
            state.show = matches!(self.params.mode, RunMode::Show);
        }
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                state
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .ingest(hash_mode, &line);
            }
            if benchmark {
                state
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .events
                    .push_back(EngineEvent::OuterloopFinished);
            }
        });
        self.child = Some(child);
        Ok(())
    }

    async fn status(&mut self) -> EngineStatus {
        self.state().status.unwrap_or(EngineStatus::Waiting)
    }

    async fn snapshot(&mut self) -> Option<EngineSnapshot> {
        self.state().snapshot.clone()
    }

    async fn pause(&mut self) -> Result<(), EngineError> {
        self.send_key(b"p").await
    }

    async fn resume(&mut self) -> Result<(), EngineError> {
        self.send_key(b"r").await
    }

    async fn quit(&mut self) -> Result<(), EngineError> {
        if self.send_key(b"q").await.is_err() {
            // Stdin already gone; fall back to killing the process.
            if let Some(child) = self.child.as_mut() {
                child.kill().await?;
            }
        }
        if let Some(mut child) = self.child.take() {
            let _ = child.wait().await;
        }
        self.stdin = None;
        Ok(())
    }

    async fn reset(&mut self) -> Result<(), EngineError> {
        if let Some(child) = self.child.as_mut() {
            child.kill().await?;
        }
        self.child = None;
        self.stdin = None;
        let restore = self
            .restore_dir
            .join(format!("{}.restore", self.params.session));
        match tokio::fs::remove_file(&restore).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    async fn log_buffer(&mut self) -> String {
        self.state().log.clone()
    }

    fn drain_events(&mut self) -> Vec<EngineEvent> {
        self.state().events.drain(..).collect()
    }
}

/// Factory spawning one [`HashcatSession`] per configured job.
pub struct HashcatEngine {
    binary: PathBuf,
    restore_dir: PathBuf,
}

impl HashcatEngine {
    /// Engine using `binary`, keeping restore files under `restore_dir`.
    pub fn new(binary: impl Into<PathBuf>, restore_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            restore_dir: restore_dir.into(),
        }
    }
}

#[async_trait]
impl CrackEngine for HashcatEngine {
    async fn configure(&self, params: SessionParams) -> Result<Box<dyn EngineSession>, EngineError> {
        Ok(Box::new(HashcatSession {
            binary: self.binary.clone(),
            restore_dir: self.restore_dir.clone(),
            params,
            child: None,
            stdin: None,
            state: Arc::new(Mutex::new(PumpState::default())),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::BrainParams;
    use crackmill_core::SessionId;

    fn params(mode: RunMode) -> SessionParams {
        let mut params = SessionParams::new(SessionId::new("s1"));
        params.mode = mode;
        params.hash_file = "/data/hashes.txt".into();
        params.hash_mode = 1000;
        params
    }

    #[test]
    fn status_codes_map_onto_session_states() {
        assert_eq!(map_status_code(0), EngineStatus::Initializing);
        assert_eq!(map_status_code(3), EngineStatus::Running);
        assert_eq!(map_status_code(4), EngineStatus::Paused);
        assert_eq!(map_status_code(5), EngineStatus::Exhausted);
        assert_eq!(map_status_code(6), EngineStatus::Cracked);
        assert_eq!(map_status_code(9), EngineStatus::Bypass);
        assert_eq!(map_status_code(7), EngineStatus::Aborted);
        assert_eq!(map_status_code(11), EngineStatus::Aborted);
    }

    #[test]
    fn status_line_parses_into_snapshot() {
        let line = r#"{"status": 3, "progress": [7172192, 14344384],
            "restore_point": 2048, "recovered_hashes": [2, 6],
            "recovered_salts": [0, 3],
            "devices": [{"device_id": 1, "speed": 430000},
                        {"device_id": 2, "speed": 70000}]}"#;
        let (status, snap) = parse_status_line(1000, line)
            .unwrap_or_else(|| panic!("line did not parse"));
        assert_eq!(status, EngineStatus::Running);
        assert_eq!(snap.progress, 50);
        assert_eq!(snap.restore_point, 2048);
        assert_eq!(snap.speed_raw, 500_000);
        assert_eq!(snap.speed_all, "500.0 kH/s");
        assert_eq!(snap.digests_done, 2);
        assert_eq!(snap.digests_total, 6);
        assert_eq!(snap.salts_total, 3);
        assert_eq!(snap.hash_mode, 1000);
    }

    #[test]
    fn non_status_lines_feed_log_and_events() {
        let mut state = PumpState::default();
        state.ingest(0, "WARNING: Remove or stagger temperature abort");
        state.ingest(0, "ERROR: clBuildProgram(): CL_BUILD_PROGRAM_FAILURE");
        assert_eq!(
            state.events,
            [EngineEvent::LogWarning, EngineEvent::LogError]
        );
        assert!(state.log.contains("temperature abort"));
        assert!(state.log.contains("CL_BUILD_PROGRAM_FAILURE"));
    }

    #[test]
    fn first_status_line_emits_initialized() {
        let mut state = PumpState::default();
        state.ingest(0, r#"{"status": 2}"#);
        state.ingest(0, r#"{"status": 3}"#);
        let inits = state
            .events
            .iter()
            .filter(|e| **e == EngineEvent::Initialized)
            .count();
        assert_eq!(inits, 1);
    }

    #[test]
    fn cracked_digest_increase_emits_event() {
        let mut state = PumpState::default();
        state.ingest(0, r#"{"status": 3, "recovered_hashes": [0, 6]}"#);
        state.ingest(0, r#"{"status": 3, "recovered_hashes": [1, 6]}"#);
        state.ingest(0, r#"{"status": 3, "recovered_hashes": [1, 6]}"#);
        let cracked = state
            .events
            .iter()
            .filter(|e| **e == EngineEvent::HashCracked)
            .count();
        assert_eq!(cracked, 1);
    }

    #[test]
    fn status_transitions_emit_wildcard_events() {
        let mut state = PumpState::default();
        state.ingest(0, r#"{"status": 3}"#);
        state.ingest(0, r#"{"status": 3}"#);
        state.ingest(0, r#"{"status": 4}"#);
        let any = state
            .events
            .iter()
            .filter(|e| **e == EngineEvent::Any)
            .count();
        assert_eq!(any, 2);
    }

    #[test]
    fn show_mode_pot_lines_emit_events_without_logging() {
        let mut state = PumpState {
            show: true,
            ..PumpState::default()
        };
        state.ingest(0, "8846f7eaee8fb117ad06bdd830b7586c:hunter2");
        state.ingest(0, "WARNING: Remove or stagger temperature abort");
        let hits = state
            .events
            .iter()
            .filter(|e| **e == EngineEvent::PotfileHashShow)
            .count();
        assert_eq!(hits, 1);
        assert!(!state.log.contains("hunter2"));
        assert!(state.log.contains("temperature abort"));
    }

    #[test]
    fn benchmark_lines_parse_and_emit_finished() {
        let mut state = PumpState {
            benchmark: true,
            ..PumpState::default()
        };
        state.ingest(0, "1:1000:1024:1:628000000");
        let snap = state
            .snapshot
            .as_ref()
            .unwrap_or_else(|| panic!("snapshot missing"));
        assert_eq!(snap.hash_mode, 1000);
        assert_eq!(snap.speed_raw, 628_000_000);
        assert_eq!(state.events.back(), Some(&EngineEvent::CrackerFinished));

        // Log lines with colons must not parse as results.
        assert!(parse_benchmark_line("ERROR: something: failed").is_none());
    }

    #[test]
    fn crack_args_carry_attack_inputs_in_order() {
        let mut p = params(RunMode::Crack);
        p.attack_mode = Some(0);
        p.wordlist = Some("/lists/rockyou.txt".into());
        p.rules = vec!["/rules/best64.rule".into()];
        p.brain = Some(BrainParams {
            features: 3,
            password: "cafebabe".into(),
        });
        let args = build_args(&p);
        assert!(args.contains(&"--attack-mode=0".to_string()));
        assert!(args.contains(&"--brain-client".to_string()));
        assert!(args.contains(&"--brain-client-features=3".to_string()));
        let hash_pos = args
            .iter()
            .position(|a| a == "/data/hashes.txt")
            .unwrap_or_else(|| panic!("hash file missing"));
        let list_pos = args
            .iter()
            .position(|a| a == "/lists/rockyou.txt")
            .unwrap_or_else(|| panic!("wordlist missing"));
        assert!(hash_pos < list_pos);
    }

    #[test]
    fn benchmark_args_skip_attack_inputs() {
        let args = build_args(&params(RunMode::Benchmark));
        assert!(args.contains(&"--benchmark".to_string()));
        assert!(args.contains(&"--hash-type=1000".to_string()));
        assert!(!args.iter().any(|a| a.contains("hashes.txt")));

        let all = build_args(&params(RunMode::BenchmarkAll));
        assert!(all.contains(&"--benchmark-all".to_string()));
    }

    #[test]
    fn show_and_speed_only_modes_add_their_flags() {
        assert!(build_args(&params(RunMode::Show)).contains(&"--show".to_string()));
        assert!(
            build_args(&params(RunMode::SpeedOnly)).contains(&"--speed-only".to_string())
        );
    }
}
