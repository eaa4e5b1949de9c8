//! Convergence assertions over a [`Probe`]
//!
//! `eventually` waits for a property to become true, `consistently` checks
//! that it stays true for a whole window. Both sleep between attempts on the
//! tokio clock and never run two probes at once.

use crate::harness::probe::{Probe, ProbeError};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// What a single probe attempt produced
#[derive(Debug)]
pub enum Observation<V> {
    Value(V),
    Error(ProbeError),
}

/// Why a convergence assertion failed
#[derive(Error, Debug)]
pub enum PollError<V: fmt::Debug> {
    #[error(
        "condition not met within {timeout:?} ({attempts} attempts, {elapsed:?} elapsed); last observation: {}",
        describe(.last)
    )]
    Timeout {
        timeout: Duration,
        elapsed: Duration,
        attempts: u32,
        last: Observation<V>,
    },

    #[error("condition violated after {elapsed:?} of a {window:?} window (attempt {attempts}): observed {value:?}")]
    Violation {
        value: V,
        window: Duration,
        elapsed: Duration,
        attempts: u32,
    },

    #[error(
        "no successful observation during {window:?} ({attempts} attempts); last error: {}",
        describe_error(.last_error)
    )]
    Unobserved {
        window: Duration,
        attempts: u32,
        last_error: Option<ProbeError>,
    },

    #[error("aborted after {elapsed:?} (attempt {attempts}): {error}")]
    Aborted {
        elapsed: Duration,
        attempts: u32,
        #[source]
        error: ProbeError,
    },
}

impl<V: fmt::Debug> PollError<V> {
    pub fn attempts(&self) -> u32 {
        match self {
            PollError::Timeout { attempts, .. }
            | PollError::Violation { attempts, .. }
            | PollError::Unobserved { attempts, .. }
            | PollError::Aborted { attempts, .. } => *attempts,
        }
    }
}

fn describe<V: fmt::Debug>(last: &Observation<V>) -> String {
    match last {
        Observation::Value(value) => format!("{:?}", value),
        Observation::Error(error) => format!("error: {}", error),
    }
}

fn describe_error(error: &Option<ProbeError>) -> String {
    error
        .as_ref()
        .map_or_else(|| "none".to_string(), ToString::to_string)
}

/// Least time any `eventually` attempt is given, capped by the interval
const MIN_ATTEMPT: Duration = Duration::from_millis(50);

/// Run one observation, abandoning it after `budget`
///
/// A zero budget still polls the probe once, so an answer that is already
/// available is never lost.
async fn attempt<P>(probe: &mut P, budget: Duration) -> Result<P::Output, ProbeError>
where
    P: Probe + ?Sized,
{
    match tokio::time::timeout(budget, probe.observe()).await {
        Ok(result) => result,
        Err(_) => Err(ProbeError::Deadline(budget)),
    }
}

/// Poll until `predicate` holds, returning the first matching value
///
/// Transient probe errors count as non-matches, and so does an attempt still
/// in flight when the bound runs out. A non-retryable error aborts at once.
/// The probe always runs at least once, and the final sleep is clamped so the
/// last attempt lands on the deadline. Returns within `timeout + interval`.
pub async fn eventually<P, F>(
    probe: &mut P,
    timeout: Duration,
    interval: Duration,
    mut predicate: F,
) -> Result<P::Output, PollError<P::Output>>
where
    P: Probe + ?Sized,
    P::Output: fmt::Debug,
    F: FnMut(&P::Output) -> bool + Send,
{
    let start = Instant::now();
    let deadline = start + timeout;
    let floor = interval.min(MIN_ATTEMPT);
    let mut attempts = 0u32;

    loop {
        attempts += 1;

        let budget = deadline.saturating_duration_since(Instant::now()).max(floor);
        let last = match attempt(probe, budget).await {
            Ok(value) if predicate(&value) => {
                info!(
                    attempts,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "eventually: condition met"
                );
                return Ok(value);
            }
            Ok(value) => {
                debug!(attempt = attempts, observed = ?value, "eventually: not yet");
                Observation::Value(value)
            }
            Err(error) if error.is_retryable() => {
                debug!(attempt = attempts, error = %error, "eventually: transient error");
                Observation::Error(error)
            }
            Err(error) => {
                warn!(attempt = attempts, error = %error, "eventually: aborted");
                return Err(PollError::Aborted {
                    elapsed: start.elapsed(),
                    attempts,
                    error,
                });
            }
        };

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            warn!(attempts, timeout_ms = timeout.as_millis() as u64, "eventually: timed out");
            return Err(PollError::Timeout {
                timeout,
                elapsed,
                attempts,
                last,
            });
        }

        sleep(interval.min(timeout - elapsed)).await;
    }
}

/// Check that `predicate` holds on every observation for the whole window
///
/// Fails on the first violating value. Success is only reported once the
/// window has fully elapsed. Transient errors are retried, but a window with
/// no successful observation at all fails with [`PollError::Unobserved`].
/// An attempt still in flight at the end of the window is abandoned, so the
/// check never runs past it.
pub async fn consistently<P, F>(
    probe: &mut P,
    window: Duration,
    interval: Duration,
    mut predicate: F,
) -> Result<(), PollError<P::Output>>
where
    P: Probe + ?Sized,
    P::Output: fmt::Debug,
    F: FnMut(&P::Output) -> bool + Send,
{
    let start = Instant::now();
    let deadline = start + window;
    let mut attempts = 0u32;
    let mut observed = 0u32;
    let mut last_error = None;

    loop {
        attempts += 1;

        let budget = deadline.saturating_duration_since(Instant::now());
        match attempt(probe, budget).await {
            Ok(value) if predicate(&value) => {
                debug!(attempt = attempts, observed = ?value, "consistently: holds");
                observed += 1;
            }
            Ok(value) => {
                let elapsed = start.elapsed();
                warn!(attempt = attempts, observed = ?value, "consistently: violated");
                return Err(PollError::Violation {
                    value,
                    window,
                    elapsed,
                    attempts,
                });
            }
            Err(error) if error.is_retryable() => {
                warn!(attempt = attempts, error = %error, "consistently: transient error");
                last_error = Some(error);
            }
            Err(error) => {
                warn!(attempt = attempts, error = %error, "consistently: aborted");
                return Err(PollError::Aborted {
                    elapsed: start.elapsed(),
                    attempts,
                    error,
                });
            }
        }

        let elapsed = start.elapsed();
        if elapsed >= window {
            break;
        }

        sleep(interval.min(window - elapsed)).await;
    }

    if observed == 0 {
        return Err(PollError::Unobserved {
            window,
            attempts,
            last_error,
        });
    }

    info!(attempts, observed, "consistently: held for {:?}", window);
    Ok(())
}
