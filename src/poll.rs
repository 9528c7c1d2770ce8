//! Bounded, cancellable polling.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            max_attempts: 300,
        }
    }
}

/// Shared flag a caller can flip to stop an in-flight wait.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Linear backoff for idempotent requests: retry `n` waits `base_delay * n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

/// Repeats `attempt` while `retryable` accepts its outcome and retries remain,
/// then hands back the last outcome unchanged.
pub fn retry_with_backoff<T, E, A, R>(policy: RetryPolicy, mut attempt: A, retryable: R) -> Result<T, E>
where
    A: FnMut() -> Result<T, E>,
    R: Fn(&Result<T, E>) -> bool,
{
    let mut retries = 0u32;
    loop {
        let outcome = attempt();
        if retries >= policy.max_retries || !retryable(&outcome) {
            return outcome;
        }
        retries += 1;
        tracing::debug!(retry = retries, "retrying request");
        thread::sleep(policy.base_delay * retries);
    }
}

/// What a single probe observed.
#[derive(Debug)]
pub enum Probe<T, F> {
    Ready(T),
    Pending,
    Failed(F),
}

#[derive(Debug)]
pub enum PollOutcome<T, F> {
    Ready(T),
    Failed(F),
    Exhausted { attempts: u32 },
    Cancelled,
}

/// Calls `probe` until it reports `Ready` or `Failed`, sleeping `interval`
/// between attempts. Probe errors are logged and count as pending attempts.
pub fn poll_until<T, F, E, P>(
    policy: PollPolicy,
    cancel: &CancelToken,
    mut probe: P,
) -> PollOutcome<T, F>
where
    P: FnMut() -> Result<Probe<T, F>, E>,
    E: std::fmt::Display,
{
    let mut attempts = 0u32;
    loop {
        if cancel.is_cancelled() {
            return PollOutcome::Cancelled;
        }
        match probe() {
            Ok(Probe::Ready(value)) => return PollOutcome::Ready(value),
            Ok(Probe::Failed(failure)) => return PollOutcome::Failed(failure),
            Ok(Probe::Pending) => {}
            Err(err) => {
                tracing::warn!(attempt = attempts + 1, error = %err, "poll probe failed, retrying");
            }
        }
        attempts += 1;
        if attempts >= policy.max_attempts {
            return PollOutcome::Exhausted { attempts };
        }
        thread::sleep(policy.interval);
    }
}
