//! Oversight routing: an LLM-driven router that only decides *who* decides
//! among {deterministic, full LLM decider, human}. Guarded by a circuit
//! breaker so a flaky oversight call degrades to the deterministic result
//! instead of stalling the governance loop.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open { opened_at: Instant },
    HalfOpen { probes_used: u32 },
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    /// Trips after 3 consecutive failures, cools down for 60 seconds, then
    /// allows a single half-open probe before fully closing again.
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 1,
        }
    }
}

#[derive(Debug, Error)]
#[error("circuit breaker open for {key}, retry after recovery timeout")]
pub struct CircuitOpenError {
    pub key: String,
}

/// A single breaker instance, guarding one shared resource (here: the
/// oversight LLM call).
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Mutex<CircuitState>,
    consecutive_failures: Mutex<u32>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CircuitState::Closed),
            consecutive_failures: Mutex::new(0),
        }
    }

    /// Call before attempting the guarded operation. `Err` means the
    /// breaker is open and the caller should fall back immediately.
    pub fn check(&self, key: &str) -> Result<(), CircuitOpenError> {
        let mut state = self.state.lock();
        match *state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open { opened_at } => {
                if opened_at.elapsed() >= self.config.recovery_timeout {
                    *state = CircuitState::HalfOpen { probes_used: 0 };
                    Ok(())
                } else {
                    Err(CircuitOpenError { key: key.to_string() })
                }
            }
            CircuitState::HalfOpen { probes_used } => {
                if probes_used < self.config.half_open_max_calls {
                    *state = CircuitState::HalfOpen {
                        probes_used: probes_used + 1,
                    };
                    Ok(())
                } else {
                    Err(CircuitOpenError { key: key.to_string() })
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock();
        *state = CircuitState::Closed;
        *self.consecutive_failures.lock() = 0;
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        match *state {
            CircuitState::HalfOpen { .. } => {
                *state = CircuitState::Open {
                    opened_at: Instant::now(),
                };
            }
            CircuitState::Closed => {
                let mut failures = self.consecutive_failures.lock();
                *failures += 1;
                if *failures >= self.config.failure_threshold {
                    *state = CircuitState::Open {
                        opened_at: Instant::now(),
                    };
                }
            }
            CircuitState::Open { .. } => {}
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.state.lock(), CircuitState::Open { .. })
    }
}

/// Where the oversight router decides to send the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OversightRoute {
    AcceptDeterministic,
    EscalateToFullLlmDecider,
    EscalateToHuman,
}

/// A genuine oversight-call failure (network error, non-2xx response,
/// malformed body) as opposed to a deliberate `AcceptDeterministic` route.
/// Surfaced to the caller so the pipeline's shared [`CircuitBreaker`] sees
/// real failures, rather than being swallowed inside the router.
#[derive(Debug, Error)]
#[error("oversight call failed: {0}")]
pub struct OversightError(pub String);

#[async_trait]
pub trait OversightRouter: Send + Sync {
    /// Examines `{proposal_summary, deterministic_result}` and picks a
    /// route. Returns `Err` on a genuine call failure (timeout, transport
    /// error, bad response) so the caller's circuit breaker can record it —
    /// implementations must not swallow failures into a synthetic `Ok`
    /// result, since that would leave the breaker permanently closed.
    async fn route(
        &self,
        proposal_summary: &serde_json::Value,
        deterministic_reason: &str,
    ) -> Result<OversightRoute, OversightError>;
}

/// Used when no LLM is configured, or whenever Phase B is skipped — always
/// accepts the deterministic result.
pub struct NoOversight;

#[async_trait]
impl OversightRouter for NoOversight {
    async fn route(
        &self,
        _proposal_summary: &serde_json::Value,
        _deterministic_reason: &str,
    ) -> Result<OversightRoute, OversightError> {
        Ok(OversightRoute::AcceptDeterministic)
    }
}

/// Calls out to the oversight LLM's routing endpoint over HTTP. Guarded by
/// the pipeline's single shared [`CircuitBreaker`] (§5: "Governance-LLM
/// resource is protected by a single shared circuit breaker to avoid
/// thundering herds") — this router holds no breaker of its own and simply
/// reports the real outcome of each call. The endpoint is expected to
/// expose exactly the three capabilities named in the design notes: route,
/// explain, and escalate — this client only ever calls the first.
#[cfg(feature = "cloud-oversight")]
pub struct HttpOversightRouter {
    client: reqwest::Client,
    endpoint: String,
}

#[cfg(feature = "cloud-oversight")]
impl HttpOversightRouter {
    pub fn new(endpoint: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[cfg(feature = "cloud-oversight")]
#[async_trait]
impl OversightRouter for HttpOversightRouter {
    async fn route(
        &self,
        proposal_summary: &serde_json::Value,
        deterministic_reason: &str,
    ) -> Result<OversightRoute, OversightError> {
        let body = serde_json::json!({
            "proposal_summary": proposal_summary,
            "deterministic_reason": deterministic_reason,
        });
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| OversightError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OversightError(format!("oversight endpoint returned {}", response.status())));
        }
        response
            .json::<OversightRoute>()
            .await
            .map_err(|e| OversightError(format!("malformed oversight response: {e}")))
    }
}
