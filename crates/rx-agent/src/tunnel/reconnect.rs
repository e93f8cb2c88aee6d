//! Reconnection with exponential backoff

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use rx_core::config::{AuthFailurePolicy, BackoffConfig, TunnelSettings};
use rx_core::{TunnelConfig, TunnelId, TunnelState, TunnelStatus};

use super::session::{SessionEnd, TunnelSession};
use super::transport::Connector;

/// Capped exponential backoff with optional jitter
pub struct ExponentialBackoff {
    /// Delay after the first failure
    initial: Duration,
    /// Maximum delay
    max: Duration,
    /// Multiplier
    multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    jitter: f64,
    /// Consecutive failures so far
    attempt: u32,
}

impl ExponentialBackoff {
    /// Create a new backoff from configuration
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(config.initial, config.max, config.multiplier, config.jitter)
    }

    /// Create a new backoff with custom parameters
    pub fn new(initial: Duration, max: Duration, multiplier: f64, jitter: f64) -> Self {
        Self {
            initial,
            max,
            multiplier: if multiplier.is_finite() {
                multiplier.max(1.0)
            } else {
                1.0
            },
            jitter: if jitter.is_finite() {
                jitter.clamp(0.0, 1.0)
            } else {
                0.0
            },
            attempt: 0,
        }
    }

    /// Get the next delay and advance the backoff
    pub fn next_delay(&mut self) -> Duration {
        let exp = self.multiplier.powi(self.attempt.min(i32::MAX as u32) as i32);
        let raw = (self.initial.as_secs_f64() * exp).max(0.0);
        let base = if raw.is_finite() && raw < self.max.as_secs_f64() {
            Duration::from_secs_f64(raw)
        } else {
            self.max
        };
        self.attempt = self.attempt.saturating_add(1);

        if self.jitter == 0.0 {
            return base;
        }
        let jitter_amount = base.as_secs_f64() * self.jitter * rand::random::<f64>();
        std::cmp::min(base + Duration::from_secs_f64(jitter_amount), self.max)
    }

    /// Back to the initial delay
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Consecutive failures counted since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Keeps one tunnel up until its token is cancelled.
///
/// Each iteration runs a [`TunnelSession`]. A session that reached serving
/// resets the backoff before the next wait. Authentication failures enter
/// `AuthRejected`; under [`AuthFailurePolicy::Stop`] the loop parks there
/// until cancelled instead of retrying.
pub struct ReconnectLoop {
    id: TunnelId,
    config: TunnelConfig,
    connector: Arc<dyn Connector>,
    backoff: BackoffConfig,
    auth_policy: AuthFailurePolicy,
    status: watch::Sender<TunnelStatus>,
}

impl ReconnectLoop {
    pub fn new(
        id: TunnelId,
        config: TunnelConfig,
        connector: Arc<dyn Connector>,
        settings: &TunnelSettings,
        status: watch::Sender<TunnelStatus>,
    ) -> Self {
        Self {
            id,
            config,
            connector,
            backoff: settings.backoff.clone(),
            auth_policy: settings.auth_failure_policy,
            status,
        }
    }

    /// Run until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) {
        let mut backoff = ExponentialBackoff::from_config(&self.backoff);

        while !cancel.is_cancelled() {
            self.status.send_modify(|s| s.state = TunnelState::Connecting);

            let session = TunnelSession::new(&self.id, &self.config, self.connector.as_ref());
            let (served, error) = match session.run(&cancel, &self.status).await {
                SessionEnd::Cancelled => break,
                SessionEnd::Failed { served, error } => (served, error),
            };

            if served {
                backoff.reset();
            }

            let auth_failed = error.is_auth_failure();
            let delay = backoff.next_delay();
            let attempt = backoff.attempt();
            let message = error.to_string();
            self.status.send_modify(|s| {
                s.state = if auth_failed {
                    TunnelState::AuthRejected
                } else {
                    TunnelState::Failed
                };
                s.attempt = attempt;
                s.last_error = Some(message);
            });

            if auth_failed && self.auth_policy == AuthFailurePolicy::Stop {
                tracing::error!(
                    tunnel = %self.id,
                    "Authentication rejected, not retrying until the tunnel is re-added: {}",
                    error
                );
                cancel.cancelled().await;
                break;
            }

            tracing::warn!(
                tunnel = %self.id,
                attempt,
                "Tunnel failed: {}; reconnecting in {:?}",
                error,
                delay
            );
            self.status.send_modify(|s| s.state = TunnelState::BackoffWait);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.status.send_modify(|s| s.state = TunnelState::Cancelled);
        tracing::info!(tunnel = %self.id, "Tunnel stopped");
    }
}
