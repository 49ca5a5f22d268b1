//! Per-service circuit breaker.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: service assumed down, calls fail fast
//! - Half-Open: one trial call tests for recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open:      consecutive failures >= failure_threshold
//! Open → Half-Open:   recovery_timeout elapsed since the last failure
//! Half-Open → Closed: trial call succeeds
//! Half-Open → Open:   trial call fails
//! ```
//!
//! Circuits are created lazily per service name on first use and live for
//! the life of the [`CircuitBreaker`].

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::telemetry;
use crate::{FetchError, Result, UpstreamError};

/// Breaker thresholds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitConfig {
    /// Consecutive failures that open the circuit. Default: 5.
    pub failure_threshold: u32,
    /// Time the circuit stays open before a trial call. Default: 60s.
    pub recovery_timeout: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

impl CircuitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failure_threshold(mut self, n: u32) -> Self {
        self.failure_threshold = n;
        self
    }

    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(FetchError::Configuration(
                "failure_threshold must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Current state of a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of one circuit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_failure: Option<Instant>,
    pub trial_in_flight: bool,
}

#[derive(Debug)]
struct Circuit {
    name: String,
    config: CircuitConfig,
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
}

impl Circuit {
    fn new(name: String, config: CircuitConfig) -> Self {
        Self {
            name,
            config,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure: None,
            trial_in_flight: false,
        }
    }

    fn transition(&mut self, to: CircuitState) {
        if self.state == to {
            return;
        }
        self.state = to;
        metrics::counter!(telemetry::CIRCUIT_TRANSITIONS_TOTAL,
            "circuit" => self.name.clone(),
            "to" => to.as_str(),
        )
        .increment(1);
        match to {
            CircuitState::Open => warn!(
                circuit = %self.name,
                failures = self.consecutive_failures,
                "circuit opened"
            ),
            CircuitState::HalfOpen => debug!(circuit = %self.name, "circuit half-open, admitting trial"),
            CircuitState::Closed => info!(circuit = %self.name, "circuit closed, service recovered"),
        }
    }

    /// Time left before an open circuit admits a trial. Zero once eligible.
    fn remaining_cooldown(&self) -> Duration {
        match self.last_failure {
            Some(at) => self.config.recovery_timeout.saturating_sub(at.elapsed()),
            None => Duration::ZERO,
        }
    }

    fn permits_call(&self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => self.remaining_cooldown().is_zero(),
            CircuitState::HalfOpen => !self.trial_in_flight,
        }
    }

    fn snapshot(&self) -> CircuitSnapshot {
        CircuitSnapshot {
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            last_failure: self.last_failure,
            trial_in_flight: self.trial_in_flight,
        }
    }
}

/// Permission to make one call through a circuit.
///
/// Report the outcome with [`success`](Self::success),
/// [`failure`](Self::failure) or [`release`](Self::release). A trial permit
/// dropped without an outcome frees the trial slot for the next caller.
#[must_use = "report the call outcome on the permit"]
pub struct CallPermit {
    circuit: Arc<Mutex<Circuit>>,
    trial: bool,
    resolved: bool,
}

impl CallPermit {
    /// Whether this permit is the single half-open trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    /// The call succeeded.
    pub fn success(mut self) {
        self.resolved = true;
        let mut circuit = lock(&self.circuit);
        if self.trial {
            circuit.trial_in_flight = false;
            circuit.consecutive_failures = 0;
            circuit.transition(CircuitState::Closed);
        } else if circuit.state == CircuitState::Closed {
            circuit.consecutive_failures = 0;
        }
    }

    /// The call failed in a way that reflects on the service's health.
    pub fn failure(mut self) {
        self.resolved = true;
        let mut circuit = lock(&self.circuit);
        circuit.consecutive_failures = circuit.consecutive_failures.saturating_add(1);
        circuit.last_failure = Some(Instant::now());
        if self.trial {
            circuit.trial_in_flight = false;
            circuit.transition(CircuitState::Open);
        } else if circuit.state == CircuitState::Closed
            && circuit.consecutive_failures >= circuit.config.failure_threshold
        {
            circuit.transition(CircuitState::Open);
        }
    }

    /// The call finished without telling us anything about service health.
    pub fn release(mut self) {
        self.resolved = true;
        if self.trial {
            lock(&self.circuit).trial_in_flight = false;
        }
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if !self.resolved && self.trial {
            lock(&self.circuit).trial_in_flight = false;
        }
    }
}

fn lock(circuit: &Mutex<Circuit>) -> std::sync::MutexGuard<'_, Circuit> {
    circuit.lock().unwrap_or_else(|e| e.into_inner())
}

/// Registry of circuits keyed by service name.
pub struct CircuitBreaker {
    default_config: CircuitConfig,
    circuits: Mutex<HashMap<String, Arc<Mutex<Circuit>>>>,
}

impl CircuitBreaker {
    pub fn new(default_config: CircuitConfig) -> Self {
        Self {
            default_config,
            circuits: Mutex::new(HashMap::new()),
        }
    }

    /// Run `operation` through the circuit named `service`.
    ///
    /// Fails fast with [`FetchError::CircuitOpen`] without calling
    /// `operation` while the circuit is open or a half-open trial is running.
    pub async fn guard<F, Fut, T>(&self, service: &str, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, UpstreamError>>,
    {
        let permit = self.acquire(service)?;
        match operation().await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(e) => {
                if e.trips_breaker() {
                    permit.failure();
                } else {
                    permit.release();
                }
                Err(e.into())
            }
        }
    }

    /// Ask to make a call through `service`, creating the circuit with the
    /// default config if this is its first use.
    pub fn acquire(&self, service: &str) -> Result<CallPermit> {
        self.acquire_with(service, &self.default_config)
    }

    /// Like [`acquire`](Self::acquire), creating the circuit with `config`
    /// if it does not exist yet.
    ///
    /// An existing circuit keeps the config it was created with; a
    /// differing `config` is logged at debug level and otherwise ignored.
    pub fn acquire_with(&self, service: &str, config: &CircuitConfig) -> Result<CallPermit> {
        let handle = self.circuit(service, config);
        let mut circuit = lock(&handle);
        if circuit.config != *config {
            debug!(
                circuit = %service,
                threshold = circuit.config.failure_threshold,
                requested_threshold = config.failure_threshold,
                "circuit already configured, ignoring differing settings"
            );
        }

        let trial = match circuit.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let cooldown = circuit.remaining_cooldown();
                if !cooldown.is_zero() {
                    return Err(FetchError::CircuitOpen {
                        service: service.to_owned(),
                        retry_in: cooldown,
                    });
                }
                circuit.transition(CircuitState::HalfOpen);
                circuit.trial_in_flight = true;
                true
            }
            CircuitState::HalfOpen => {
                if circuit.trial_in_flight {
                    return Err(FetchError::CircuitOpen {
                        service: service.to_owned(),
                        retry_in: Duration::ZERO,
                    });
                }
                circuit.trial_in_flight = true;
                true
            }
        };
        drop(circuit);

        Ok(CallPermit {
            circuit: handle,
            trial,
            resolved: false,
        })
    }

    /// Whether a call to `service` would currently be let through. Does not
    /// change state.
    pub fn is_call_permitted(&self, service: &str) -> bool {
        let circuits = self.circuits.lock().unwrap_or_else(|e| e.into_inner());
        circuits
            .get(service)
            .is_none_or(|circuit| lock(circuit).permits_call())
    }

    /// Remaining open-state cooldown for `service`, zero if none.
    pub fn retry_in(&self, service: &str) -> Duration {
        let circuits = self.circuits.lock().unwrap_or_else(|e| e.into_inner());
        circuits
            .get(service)
            .map(|circuit| {
                let circuit = lock(circuit);
                match circuit.state {
                    CircuitState::Open => circuit.remaining_cooldown(),
                    _ => Duration::ZERO,
                }
            })
            .unwrap_or(Duration::ZERO)
    }

    /// Stored state of `service`. Unknown services are closed.
    pub fn state(&self, service: &str) -> CircuitState {
        self.snapshot(service)
            .map(|s| s.state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn snapshot(&self, service: &str) -> Option<CircuitSnapshot> {
        let circuits = self.circuits.lock().unwrap_or_else(|e| e.into_inner());
        circuits.get(service).map(|circuit| lock(circuit).snapshot())
    }

    /// Force `service` back to closed with a zero failure count.
    pub fn reset(&self, service: &str) {
        let circuits = self.circuits.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = circuits.get(service) {
            let mut circuit = lock(handle);
            circuit.consecutive_failures = 0;
            circuit.last_failure = None;
            circuit.trial_in_flight = false;
            circuit.transition(CircuitState::Closed);
        }
    }

    fn circuit(&self, service: &str, config: &CircuitConfig) -> Arc<Mutex<Circuit>> {
        let mut circuits = self.circuits.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            circuits
                .entry(service.to_owned())
                .or_insert_with(|| Arc::new(Mutex::new(Circuit::new(service.to_owned(), config.clone())))),
        )
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitConfig::default())
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("default_config", &self.default_config)
            .finish_non_exhaustive()
    }
}
