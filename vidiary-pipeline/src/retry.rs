use std::future::Future;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::{PipelineError, PipelineResult};

/// Token-per-minute limits use a rolling one-minute window; sub-minute
/// retries immediately re-trigger the limit, so every wait is at least this
/// long.
pub const MIN_RETRY_DELAY: Duration = Duration::from_secs(15);
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(90);

/// Matches "try again in 446ms" / "try again in 30s" from provider messages.
static RETRY_AFTER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)try again in (\d+)(ms|s)?").expect("retry-after pattern"));

/// Provider-advised retry interval, if the message carries one.
pub fn parse_retry_after(message: &str) -> Option<Duration> {
    let captures = RETRY_AFTER_RE.captures(message)?;
    let value: u64 = captures.get(1)?.as_str().parse().ok()?;
    match captures.get(2).map(|m| m.as_str().to_lowercase()) {
        Some(unit) if unit == "ms" => Some(Duration::from_millis(value)),
        _ => Some(Duration::from_secs(value)),
    }
}

/// Delay before retry `attempt` (0-based):
/// `max(15s, min(90s, advised | 2^(attempt+4)))`.
pub fn retry_delay(message: &str, attempt: u32) -> Duration {
    let candidate = parse_retry_after(message)
        .unwrap_or_else(|| Duration::from_secs(2u64.saturating_pow(attempt.saturating_add(4))));
    candidate.clamp(MIN_RETRY_DELAY, MAX_RETRY_DELAY)
}

/// Run `operation`, absorbing rate-limit failures with bounded, floored
/// backoff. Non-rate-limit errors propagate immediately; the final
/// rate-limit error propagates after `max_attempts`.
pub async fn with_rate_limit_retry<T, F, Fut>(
    max_attempts: u32,
    mut operation: F,
) -> PipelineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PipelineResult<T>>,
{
    let max_attempts = max_attempts.max(1);
    let mut last_error: Option<PipelineError> = None;

    for attempt in 0..max_attempts {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_rate_limited() && attempt + 1 < max_attempts => {
                let delay = retry_delay(&err.to_string(), attempt);
                warn!(
                    attempt = attempt + 1,
                    max_attempts,
                    ?delay,
                    %err,
                    "rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
                last_error = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_error.unwrap_or_else(|| PipelineError::llm("retry loop exhausted")))
}
