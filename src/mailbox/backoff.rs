//! Exponential backoff for provider calls.
//!
//! Retries on HTTP 429/500/503 and transient transport errors, sleeping
//! `2^attempt` seconds between attempts, up to 5 attempts. Non-retryable
//! errors propagate immediately.

use std::future::Future;
use std::time::Duration;

use crate::mailbox::MailboxError;

pub const MAX_ATTEMPTS: u32 = 5;

/// Run `operation` with exponential backoff.
pub async fn with_backoff<T, F, Fut>(name: &str, mut operation: F) -> Result<T, MailboxError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, MailboxError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < MAX_ATTEMPTS => {
                let delay = Duration::from_secs(1 << attempt);
                log::warn!(
                    "{}: transient error (attempt {}/{}), retrying in {:?}: {}",
                    name,
                    attempt + 1,
                    MAX_ATTEMPTS,
                    delay,
                    err
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
