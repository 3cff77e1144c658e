/// Per-salt throughput (hashes/sec) above which brain lookups become the
/// bottleneck instead of the GPU.
pub const BRAIN_SPEED_THRESHOLD: u64 = 500_000;

/// Decide whether to enable the engine's brain cache.
///
/// The cache only helps when per-salt candidate throughput is low enough
/// that cache lookups are not themselves the bottleneck.
pub fn brain_check(speed: u64, salts: u64) -> bool {
    tracing::debug!(speed, salts, "running brain check");
    let engaged = if salts > 0 {
        speed / salts < BRAIN_SPEED_THRESHOLD
    } else {
        speed < BRAIN_SPEED_THRESHOLD
    };
    if engaged {
        tracing::debug!("brain engaged");
    } else {
        tracing::debug!("brain disabled, fast candidates would bottleneck");
    }
    engaged
}
