//! Per-dependency circuit breakers.
//!
//! One breaker guards each external dependency class (site access, the
//! catalog/vector store) so a failing dependency trips only the categories
//! that touch it and never starves the rest of the pipeline.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

/// Breaker name for site/content access (HTTP or browser automation).
pub const FETCH_BREAKER: &str = "fetch";

/// Breaker name for the catalog and chunk store.
pub const STORE_BREAKER: &str = "store";

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls allowed; consecutive failures are counted.
    Closed,
    /// Calls denied until the cooldown elapses.
    Open,
    /// Exactly one probe call is allowed through.
    HalfOpen,
}

struct BreakerInner {
    state: BreakerState,
    failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Failure tracker for one external dependency.
///
/// Transitions: Closed opens at the consecutive-failure threshold; Open
/// moves to HalfOpen once the cooldown has elapsed; HalfOpen closes on a
/// successful probe and reopens on a failed one.
pub struct CircuitBreaker {
    name: String,
    threshold: u32,
    cooldown: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    pub fn new(name: impl Into<String>, threshold: u32, cooldown: Duration) -> Self {
        Self {
            name: name.into(),
            threshold: threshold.max(1),
            cooldown,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    /// The dependency this breaker guards.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state (Open flips to HalfOpen lazily inside `can_execute`).
    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("breaker lock").state
    }

    /// Whether a call may proceed right now.
    ///
    /// An Open breaker whose cooldown has elapsed transitions to HalfOpen
    /// and admits the caller as the single probe.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.inner.lock().expect("breaker lock");
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed() >= self.cooldown)
                    .unwrap_or(true);
                if elapsed {
                    debug!(breaker = %self.name, "cooldown elapsed, admitting probe");
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock");
        match inner.state {
            BreakerState::HalfOpen => {
                info!(breaker = %self.name, "probe succeeded, closing");
                inner.state = BreakerState::Closed;
                inner.failures = 0;
                inner.probe_in_flight = false;
                inner.opened_at = None;
            }
            BreakerState::Closed => {
                inner.failures = 0;
            }
            BreakerState::Open => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock");
        match inner.state {
            BreakerState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.threshold {
                    warn!(
                        breaker = %self.name,
                        failures = inner.failures,
                        "failure threshold reached, opening"
                    );
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            BreakerState::HalfOpen => {
                warn!(breaker = %self.name, "probe failed, reopening");
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.probe_in_flight = false;
            }
            BreakerState::Open => {}
        }
    }
}

// ---------------------------------------------------------------------------
// BreakerRegistry
// ---------------------------------------------------------------------------

/// Named breakers, one per external dependency class.
#[derive(Default)]
pub struct BreakerRegistry {
    breakers: HashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the standard `fetch` and `store` breakers.
    pub fn standard(threshold: u32, cooldown: Duration) -> Self {
        let mut registry = Self::new();
        registry.register(CircuitBreaker::new(FETCH_BREAKER, threshold, cooldown));
        registry.register(CircuitBreaker::new(STORE_BREAKER, threshold, cooldown));
        registry
    }

    /// Add a breaker under its own name.
    pub fn register(&mut self, breaker: CircuitBreaker) {
        self.breakers.insert(breaker.name().to_string(), Arc::new(breaker));
    }

    /// Look up a breaker by name.
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).cloned()
    }
}
