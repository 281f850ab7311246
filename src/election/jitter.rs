use rand::Rng;
use std::time::Duration;

/// Returns the claim interval stretched by up to 20% of random jitter, so
/// replicas restarted by the same orchestrator event do not hammer the
/// leadership table in lockstep.
pub fn jittered_claim_interval(base: Duration) -> Duration {
    let base_ms = base.as_millis() as u64;
    let spread = (base_ms / 5).max(1);
    let jitter_ms = rand::thread_rng().gen_range(0..spread);
    Duration::from_millis(base_ms + jitter_ms)
}
