//! Per-server circuit breaker
//!
//! Tracks consecutive call failures per tool server and stops sending
//! requests to a server that keeps failing. After the recovery timeout a
//! single trial call is let through; its outcome decides whether the circuit
//! closes again.

use crate::config::CircuitBreakerSettings;
use crate::error::ToolClientError;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Breaker state of one server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

/// Bookkeeping for one server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitState {
    pub status: CircuitStatus,
    pub consecutive_failures: u32,
    pub opened_at: Option<Instant>,
    /// A half-open trial call is in flight
    trial_in_flight: bool,
}

impl Default for CircuitState {
    fn default() -> Self {
        Self {
            status: CircuitStatus::Closed,
            consecutive_failures: 0,
            opened_at: None,
            trial_in_flight: false,
        }
    }
}

/// Circuit breaker shared by every call in the process
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    states: Mutex<HashMap<String, CircuitState>>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::from(&CircuitBreakerSettings::default())
    }
}

impl From<&CircuitBreakerSettings> for CircuitBreaker {
    fn from(settings: &CircuitBreakerSettings) -> Self {
        Self::new(
            settings.failure_threshold,
            Duration::from_secs(settings.recovery_timeout_secs),
        )
    }
}

impl CircuitBreaker {
    /// `failure_threshold` of 0 disables the breaker
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            recovery_timeout,
            states: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CircuitState>> {
        self.states.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Ask permission for one call to `server`
    ///
    /// Fails with [`ToolClientError::CircuitOpen`] while the circuit is open,
    /// and while a half-open trial call is already in flight.
    pub fn try_acquire(&self, server: &str) -> Result<(), ToolClientError> {
        if self.failure_threshold == 0 {
            return Ok(());
        }

        let now = Instant::now();
        let mut states = self.lock();
        let state = states.entry(server.to_string()).or_default();

        match state.status {
            CircuitStatus::Closed => Ok(()),
            CircuitStatus::Open => {
                let opened_at = state.opened_at.unwrap_or(now);
                let elapsed = now.saturating_duration_since(opened_at);
                if elapsed >= self.recovery_timeout {
                    info!("Circuit for server '{}' half-open, allowing trial call", server);
                    state.status = CircuitStatus::HalfOpen;
                    state.trial_in_flight = true;
                    Ok(())
                } else {
                    Err(ToolClientError::CircuitOpen {
                        server: server.to_string(),
                        retry_after: self.recovery_timeout - elapsed,
                    })
                }
            }
            CircuitStatus::HalfOpen => {
                if state.trial_in_flight {
                    Err(ToolClientError::CircuitOpen {
                        server: server.to_string(),
                        retry_after: Duration::ZERO,
                    })
                } else {
                    state.trial_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    /// Report a successful call
    pub fn record_success(&self, server: &str) {
        if self.failure_threshold == 0 {
            return;
        }

        let mut states = self.lock();
        let state = states.entry(server.to_string()).or_default();

        if state.status != CircuitStatus::Closed {
            info!("Circuit for server '{}' closed", server);
        }
        *state = CircuitState::default();
    }

    /// Report a failed call; returns `true` when this failure opened the circuit
    pub fn record_failure(&self, server: &str) -> bool {
        if self.failure_threshold == 0 {
            return false;
        }

        let now = Instant::now();
        let mut states = self.lock();
        let state = states.entry(server.to_string()).or_default();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);

        match state.status {
            CircuitStatus::HalfOpen => {
                warn!("Trial call to server '{}' failed, circuit re-opened", server);
                state.status = CircuitStatus::Open;
                state.opened_at = Some(now);
                state.trial_in_flight = false;
                true
            }
            CircuitStatus::Closed if state.consecutive_failures >= self.failure_threshold => {
                warn!(
                    "Circuit for server '{}' opened after {} consecutive failures",
                    server, state.consecutive_failures
                );
                state.status = CircuitStatus::Open;
                state.opened_at = Some(now);
                true
            }
            _ => false,
        }
    }

    /// Release a half-open trial permit without recording an outcome
    ///
    /// Used when the call never reached the server (e.g. argument errors).
    pub fn release(&self, server: &str) {
        let mut states = self.lock();
        if let Some(state) = states.get_mut(server) {
            state.trial_in_flight = false;
        }
    }

    /// Whether calls to `server` are currently being rejected
    ///
    /// Does not transition the state; an open circuit past its recovery
    /// timeout reports `false` since the next call would be let through.
    pub fn is_open(&self, server: &str) -> bool {
        let states = self.lock();
        states.get(server).is_some_and(|state| match state.status {
            CircuitStatus::Open => state
                .opened_at
                .is_some_and(|opened| opened.elapsed() < self.recovery_timeout),
            CircuitStatus::HalfOpen => state.trial_in_flight,
            CircuitStatus::Closed => false,
        })
    }

    /// Current state of `server`
    pub fn snapshot(&self, server: &str) -> CircuitState {
        self.lock().get(server).copied().unwrap_or_default()
    }
}
