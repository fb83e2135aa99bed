//! Retry/backoff policy confined to OSA (spec.md §7, §9: "retries are
//! confined to OSA; no other component re-issues a failed operation").

use super::traits::StoreError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

const BASE_DELAY: Duration = Duration::from_millis(100);
const MAX_DELAY: Duration = Duration::from_secs(30);
const MAX_ATTEMPTS: u32 = 3;

/// Run `op` up to `MAX_ATTEMPTS` times, retrying only on
/// `StoreError::Transient`, with exponential backoff (base 100ms, cap 30s)
/// plus full jitter between attempts.
pub async fn with_backoff<T, F, Fut>(op_name: &str, mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < MAX_ATTEMPTS => {
                let delay = backoff_delay(attempt);
                warn!(op = op_name, attempt, ?delay, %err, "retrying transient object store error");
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let exp = BASE_DELAY.saturating_mul(1 << (attempt - 1).min(16));
    let capped = exp.min(MAX_DELAY);
    let jitter_ms = rand::thread_rng().gen_range(0..=capped.as_millis() as u64);
    Duration::from_millis(jitter_ms)
}
