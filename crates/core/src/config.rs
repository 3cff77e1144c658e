use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Fixed custom charset preset 1 (`?l?d`).
pub const CUSTOM_CHARSET_1: &str = "?l?d";
/// Fixed custom charset preset 2 (`?l?d?u`).
pub const CUSTOM_CHARSET_2: &str = "?l?d?u";
/// Fixed custom charset preset 3 (`?l?d?s`).
pub const CUSTOM_CHARSET_3: &str = "?l?d?s";
/// Fixed engine workload profile.
pub const WORKLOAD_PROFILE: u8 = 4;

fn default_main_poll_secs() -> f64 {
    10.0
}

fn default_probe_poll_secs() -> f64 {
    1.0
}

fn default_brain_wait_poll_secs() -> f64 {
    5.0
}

fn default_mask_grace_secs() -> f64 {
    30.0
}

fn default_lease_ttl_secs() -> u64 {
    21_600
}

fn default_brain_features() -> u8 {
    3
}

/// File locations this deployment reads and writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesConfig {
    /// Directory holding per-session snapshot, cracked and benchmark files.
    pub log_dir: PathBuf,
    /// Shared potfile path handed to the engine.
    pub potfile: PathBuf,
    /// Markov statistics file handed to the engine.
    pub markov_stats: PathBuf,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("/var/crackmill/logs"),
            potfile: PathBuf::from("/var/crackmill/files/crackmill.pot"),
            markov_stats: PathBuf::from("/var/crackmill/files/crackmill.hcstat"),
        }
    }
}

/// Notification transport settings. Absent disables notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Webhook endpoint notifications are POSTed to.
    pub endpoint: String,
    /// Source label included in notification payloads.
    pub source: String,
    /// Minutes of user inactivity before a notification may fire.
    pub inactive_minutes: i64,
}

/// Brain cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrainConfig {
    /// Per-deployment brain password, generated on first run.
    pub secret: String,
    /// Brain client feature flags handed to the engine.
    #[serde(default = "default_brain_features")]
    pub features: u8,
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            secret: generate_secret(),
            features: default_brain_features(),
        }
    }
}

/// Poll cadences for the worker and probe loops.
///
/// Iteration ceilings are fixed constants in the loops themselves; only
/// the per-iteration periods are configurable (tests shrink them).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Worker loop poll period, seconds.
    #[serde(default = "default_main_poll_secs")]
    pub main_poll_secs: f64,
    /// Probe (show/speed) loop poll period, seconds.
    #[serde(default = "default_probe_poll_secs")]
    pub probe_poll_secs: f64,
    /// Brain-gate wait poll period, seconds.
    #[serde(default = "default_brain_wait_poll_secs")]
    pub brain_wait_poll_secs: f64,
    /// Grace delay before accepting exhaustion on mask-file jobs, seconds.
    #[serde(default = "default_mask_grace_secs")]
    pub mask_grace_secs: f64,
    /// Activity lease time-to-live, seconds.
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            main_poll_secs: default_main_poll_secs(),
            probe_poll_secs: default_probe_poll_secs(),
            brain_wait_poll_secs: default_brain_wait_poll_secs(),
            mask_grace_secs: default_mask_grace_secs(),
            lease_ttl_secs: default_lease_ttl_secs(),
        }
    }
}

impl TimingConfig {
    /// Worker loop poll period.
    pub fn main_poll(&self) -> Duration {
        Duration::from_secs_f64(self.main_poll_secs)
    }

    /// Probe loop poll period.
    pub fn probe_poll(&self) -> Duration {
        Duration::from_secs_f64(self.probe_poll_secs)
    }

    /// Brain-gate wait poll period.
    pub fn brain_wait_poll(&self) -> Duration {
        Duration::from_secs_f64(self.brain_wait_poll_secs)
    }

    /// Mask-file exhaustion grace delay.
    pub fn mask_grace(&self) -> Duration {
        Duration::from_secs_f64(self.mask_grace_secs)
    }

    /// Activity lease time-to-live.
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }
}

/// Runtime configuration, injected into every component at construction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// File locations.
    #[serde(default)]
    pub files: FilesConfig,
    /// Notification settings; `None` disables the gate entirely.
    #[serde(default)]
    pub notify: Option<NotifyConfig>,
    /// Whether engine warnings are surfaced onto job records.
    #[serde(default)]
    pub user_warnings: bool,
    /// Brain cache settings.
    #[serde(default)]
    pub brain: BrainConfig,
    /// Poll cadences.
    #[serde(default)]
    pub timing: TimingConfig,
}

fn generate_secret() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn xdg_config_home() -> anyhow::Result<PathBuf> {
    if let Some(dir) = std::env::var_os("XDG_CONFIG_HOME") {
        let dir = PathBuf::from(dir);
        if dir.as_os_str().is_empty() {
            anyhow::bail!("XDG_CONFIG_HOME is set but empty");
        }
        return Ok(dir);
    }

    let home = std::env::var_os("HOME").ok_or_else(|| anyhow::anyhow!("HOME is not set"))?;
    let home = PathBuf::from(home);
    if home.as_os_str().is_empty() {
        anyhow::bail!("HOME is set but empty");
    }
    Ok(home.join(".config"))
}

/// Default on-disk config location.
pub fn config_path() -> anyhow::Result<PathBuf> {
    Ok(xdg_config_home()?.join("crackmill").join("config.json"))
}

/// Load the config from `path`, `None` when the file does not exist.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<Option<Config>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&raw)?))
}

/// Write the config to `path` atomically (tmp file + rename).
pub fn save_config(path: &std::path::Path, cfg: &Config) -> anyhow::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("invalid config path: {}", path.display()))?;
    std::fs::create_dir_all(dir)?;

    let json = serde_json::to_string_pretty(cfg)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(tmp, path)?;
    Ok(())
}

/// Load the config, creating it with defaults (including a freshly
/// generated brain secret) on first run.
pub fn ensure_config(path: &std::path::Path) -> anyhow::Result<Config> {
    if let Some(cfg) = load_config(path)? {
        return Ok(cfg);
    }
    let cfg = Config::default();
    save_config(path, &cfg)?;
    tracing::info!(path = %path.display(), "wrote initial config with generated brain secret");
    Ok(cfg)
}
