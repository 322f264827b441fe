use std::time::Duration;

use rand::Rng;

const JITTER_WINDOW_MS: u64 = 1_000;

/// Uniform draw from the inclusive range `[min, max]`. Swapped bounds are tolerated.
pub fn random_between(min: u64, max: u64) -> u64 {
    let (low, high) = if min <= max { (min, max) } else { (max, min) };
    rand::thread_rng().gen_range(low..=high)
}

/// Draw a delay from `[base - 1s, base]` so no wait or timeout is ever the same twice.
pub fn jittered_ms(base_ms: u64) -> u64 {
    random_between(base_ms.saturating_sub(JITTER_WINDOW_MS), base_ms)
}

pub fn jittered(base: Duration) -> Duration {
    Duration::from_millis(jittered_ms(base.as_millis() as u64))
}
