use std::path::PathBuf;

use clap::Parser;

use crackmill_core::SessionId;
use crackmill_engine::{JobRequest, coerce_attack_mode};

#[derive(Debug, Clone, Parser)]
#[command(name = "crackmill", version, about = "crackmill hashcat job worker")]
pub struct Cli {
    /// Session token identifying the job record.
    #[arg(env = "CRACKMILL_SESSION")]
    pub session: String,

    /// File of target hashes (not needed for benchmark runs).
    #[arg(long, env = "CRACKMILL_HASH_FILE")]
    pub hash_file: Option<PathBuf>,

    /// Hashcat hash-mode number.
    #[arg(long, env = "CRACKMILL_HASH_MODE", default_value_t = 0)]
    pub hash_mode: u32,

    /// Hashcat attack mode. Unparseable values are dropped, not fatal.
    #[arg(long)]
    pub attack_mode: Option<String>,

    /// Mask pattern, or a mask-file path with `--mask-file`.
    #[arg(long)]
    pub mask: Option<String>,

    /// Treat `--mask` as a mask-file path.
    #[arg(long, default_value_t = false)]
    pub mask_file: bool,

    /// Primary wordlist.
    #[arg(long)]
    pub wordlist: Option<PathBuf>,

    /// Secondary wordlist (combinator attacks).
    #[arg(long)]
    pub wordlist2: Option<PathBuf>,

    /// Rule file; repeat for multiple.
    #[arg(long = "rule")]
    pub rules: Vec<PathBuf>,

    /// Hash file lines carry `user:hash`.
    #[arg(long, default_value_t = false)]
    pub username: bool,

    /// Enable mask increment mode.
    #[arg(long, default_value_t = false)]
    pub increment: bool,

    /// Increment lower bound.
    #[arg(long)]
    pub increment_min: Option<u32>,

    /// Increment upper bound.
    #[arg(long)]
    pub increment_max: Option<u32>,

    /// Keyspace offset to resume from.
    #[arg(long)]
    pub skip: Option<u64>,

    /// Request the brain cache (subject to the throughput estimate).
    #[arg(long, default_value_t = false)]
    pub brain: bool,

    /// Run the speed-check probe for this session instead of the job.
    #[arg(long, default_value_t = false)]
    pub speed_check: bool,

    /// Benchmark the given hash mode and exit.
    #[arg(long, default_value_t = false)]
    pub benchmark: bool,

    /// Benchmark every hash mode and exit.
    #[arg(long, default_value_t = false)]
    pub benchmark_all: bool,

    /// Hashcat binary to drive.
    #[arg(long, env = "CRACKMILL_HASHCAT", default_value = "hashcat")]
    pub hashcat: PathBuf,

    /// Config file path (defaults to the XDG location).
    #[arg(long, env = "CRACKMILL_CONFIG")]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Project the parsed flags into a worker job request.
    pub fn to_request(&self) -> anyhow::Result<JobRequest> {
        let bench = self.benchmark || self.benchmark_all;
        let hash_file = match &self.hash_file {
            Some(path) => path.clone(),
            None if bench => PathBuf::new(),
            None => anyhow::bail!("--hash-file is required unless benchmarking"),
        };
        let mut req = JobRequest::new(SessionId::new(&self.session), hash_file, self.hash_mode);
        req.attack_mode = self
            .attack_mode
            .as_deref()
            .and_then(|raw| coerce_attack_mode(&serde_json::Value::String(raw.to_string())));
        req.mask = self.mask.clone();
        req.mask_file = self.mask_file;
        req.wordlist = self.wordlist.clone();
        req.wordlist2 = self.wordlist2.clone();
        req.rules = self.rules.clone();
        req.username = self.username;
        req.increment = self.increment;
        req.increment_min = self.increment_min;
        req.increment_max = self.increment_max;
        req.restore = self.skip;
        req.brain_requested = self.brain;
        req.benchmark = self.benchmark;
        req.benchmark_all = self.benchmark_all;
        Ok(req)
    }
}
