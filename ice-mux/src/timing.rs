use std::time::Duration;

use rand::Rng as _;

const RECONNECT_JITTER_MS: (u64, u64) = (500, 2000);
const ATTEMPT_TIMEOUT_MS: (u64, u64) = (30_000, 45_000);

/// Uniform jitter the reconnect worker sleeps between attempts, re-sampled
/// every iteration so peers don't synchronize their retries.
pub fn jittered_sleep_duration() -> Duration {
    sample_uniform_ms(RECONNECT_JITTER_MS.0, RECONNECT_JITTER_MS.1)
}

/// Per-attempt ICE negotiation timeout budget, re-sampled every attempt.
pub fn sample_attempt_timeout() -> Duration {
    sample_uniform_ms(ATTEMPT_TIMEOUT_MS.0, ATTEMPT_TIMEOUT_MS.1)
}

fn sample_uniform_ms(low: u64, high: u64) -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(low..=high))
}
