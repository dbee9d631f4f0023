use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

const MAX_ATTEMPTS: usize = 4;
const FIRST_DELAY: Duration = Duration::from_secs(2);
const MAX_DELAY: Duration = Duration::from_secs(30);

/// Whether the TMS asked us to slow down rather than rejecting the request.
pub(crate) fn is_throttled(status: StatusCode, body: &str) -> bool {
    match status.as_u16() {
        429 | 503 | 529 => true,
        _ => {
            let lower = body.to_lowercase();
            lower.contains("rate limit") || lower.contains("too many requests")
        }
    }
}

/// Only the delay-seconds form of `Retry-After` is honoured.
pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Exponential backoff for one TMS operation.
#[derive(Debug)]
pub(crate) struct Backoff<'a> {
    operation: &'a str,
    attempt: usize,
    delay: Duration,
}

impl<'a> Backoff<'a> {
    pub(crate) fn new(operation: &'a str) -> Self {
        Self {
            operation,
            attempt: 1,
            delay: FIRST_DELAY,
        }
    }

    /// Sleeps before the next attempt. Returns false once attempts are used up.
    pub(crate) async fn wait(&mut self, hint: Option<Duration>) -> bool {
        let Some(wait) = self.next_wait(hint) else {
            return false;
        };
        warn!(
            "TMS throttled {}; retrying in {:.1}s (attempt {}/{})",
            self.operation,
            wait.as_secs_f32(),
            self.attempt - 1,
            MAX_ATTEMPTS
        );
        sleep(wait).await;
        true
    }

    fn next_wait(&mut self, hint: Option<Duration>) -> Option<Duration> {
        if self.attempt >= MAX_ATTEMPTS {
            return None;
        }
        let wait = hint.map_or(self.delay, |hint| hint.clamp(self.delay, MAX_DELAY));
        self.attempt += 1;
        self.delay = (self.delay * 2).min(MAX_DELAY);
        Some(wait)
    }
}
