//! Polling scheduler for asynchronous container processing
//!
//! Repeatedly asks a [`StatusProbe`] for a container's status until it
//! reaches FINISHED or ERROR, the attempt ceiling or deadline passes, or the
//! job is cancelled. Waiting happens through the injected [`Clock`], so no
//! thread is parked while a container processes.
//!
//! Cancellation only stops local polling. The remote container keeps
//! processing and may still be finalized later by someone else.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::PlatformError;
use crate::types::{ContainerRef, ContainerStatus, MediaContainer};

/// Performs exactly one status check per call
#[async_trait]
pub trait StatusProbe: Send + Sync {
    async fn probe(&self, container: &ContainerRef) -> Result<MediaContainer, PlatformError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PollBackoff {
    /// Constant interval between checks
    Fixed,
    /// Interval multiplied by `factor` after each check, capped at `max_interval`
    Exponential { factor: f64, max_interval: Duration },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
    pub backoff: PollBackoff,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_attempts: 30,
            backoff: PollBackoff::Fixed,
        }
    }
}

impl PollPolicy {
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
            backoff: PollBackoff::Fixed,
        }
    }

    /// Wait after check number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            PollBackoff::Fixed => self.interval,
            PollBackoff::Exponential {
                factor,
                max_interval,
            } => {
                let exponent = attempt.saturating_sub(1).min(64) as i32;
                let scaled = self.interval.as_secs_f64() * factor.max(1.0).powi(exponent);
                if scaled.is_finite() && scaled < max_interval.as_secs_f64() {
                    Duration::from_secs_f64(scaled)
                } else {
                    max_interval
                }
            }
        }
    }

    /// Total polling time the policy allows, used to derive job deadlines
    pub fn ceiling(&self) -> Duration {
        (1..=self.max_attempts).map(|attempt| self.delay_for(attempt)).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// The platform reported FINISHED
    Finished {
        container: MediaContainer,
        attempts: u32,
    },
    /// The platform reported ERROR
    Errored {
        container: MediaContainer,
        attempts: u32,
    },
    /// Attempts or deadline exhausted with the container still processing
    TimedOut {
        attempts: u32,
        last: Option<MediaContainer>,
    },
    Cancelled {
        attempts: u32,
    },
    /// A check failed with a non-transient error
    Failed {
        error: PlatformError,
        attempts: u32,
    },
}

impl PollOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            PollOutcome::Finished { attempts, .. }
            | PollOutcome::Errored { attempts, .. }
            | PollOutcome::TimedOut { attempts, .. }
            | PollOutcome::Cancelled { attempts }
            | PollOutcome::Failed { attempts, .. } => *attempts,
        }
    }
}

pub struct PollingScheduler<'a> {
    clock: &'a dyn Clock,
    policy: &'a PollPolicy,
}

impl<'a> PollingScheduler<'a> {
    pub fn new(clock: &'a dyn Clock, policy: &'a PollPolicy) -> Self {
        Self { clock, policy }
    }

    /// Poll `container` until a terminal status, timeout, or cancellation.
    ///
    /// At least one check is always made, even when `deadline` has already
    /// passed, so a resumed job gets a fresh look at its container. Transient
    /// check failures count as attempts. Status regressions reported by the
    /// platform are ignored.
    pub async fn poll_until_terminal(
        &self,
        probe: &dyn StatusProbe,
        container: &ContainerRef,
        deadline: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> PollOutcome {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempts = 0;
        let mut last: Option<MediaContainer> = None;

        loop {
            if cancel.is_cancelled() {
                return PollOutcome::Cancelled { attempts };
            }

            attempts += 1;
            match probe.probe(container).await {
                Ok(observed) => {
                    let observed = match &last {
                        Some(previous) if observed.status.rank() < previous.status.rank() => {
                            debug!(
                                "Ignoring status regression for {}: {} -> {}",
                                container.container_id, previous.status, observed.status
                            );
                            previous.clone()
                        }
                        _ => observed,
                    };
                    debug!(
                        "Container {} status {} (check {}/{})",
                        container.container_id, observed.status, attempts, max_attempts
                    );

                    match observed.status {
                        ContainerStatus::Finished => {
                            return PollOutcome::Finished {
                                container: observed,
                                attempts,
                            }
                        }
                        ContainerStatus::Error => {
                            return PollOutcome::Errored {
                                container: observed,
                                attempts,
                            }
                        }
                        ContainerStatus::Created | ContainerStatus::Processing => {
                            last = Some(observed);
                        }
                    }
                }
                Err(e) if e.is_transient() => {
                    warn!(
                        "Transient error checking container {} (check {}/{}): {}",
                        container.container_id, attempts, max_attempts, e
                    );
                }
                Err(e) => {
                    return PollOutcome::Failed { error: e, attempts };
                }
            }

            let now = self.clock.now();
            if attempts >= max_attempts || now >= deadline {
                return PollOutcome::TimedOut { attempts, last };
            }

            let remaining = (deadline - now).to_std().unwrap_or_default();
            let delay = self.policy.delay_for(attempts).min(remaining);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return PollOutcome::Cancelled { attempts };
                }
                _ = self.clock.sleep(delay) => {}
            }
        }
    }
}
