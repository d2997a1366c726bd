//! Exponential backoff shared by every provider implementation.
//!
//! Transient errors (connection reset, DNS, timeout, 5xx, rate-limit) are
//! retried up to 3 times starting at 2s, doubling, capped at 60s.
//! Non-retryable errors (auth, not-found, permission) fail fast.

use std::future::Future;
use std::time::Duration;

use super::ProviderError;

const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_secs(2);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Run `op` up to `MAX_ATTEMPTS` times, doubling the delay between retryable
/// failures. The first attempt is not delayed.
pub async fn with_backoff<T, F, Fut>(mut op: F) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut delay = INITIAL_BACKOFF;
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < MAX_ATTEMPTS => {
                log::warn!(
                    "provider call failed (attempt {}/{}): {err}; retrying in {:?}",
                    attempt,
                    MAX_ATTEMPTS,
                    delay
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(MAX_BACKOFF);
            }
            Err(err) => return Err(err),
        }
    }
}
