use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Circuit breaker state. `Open` records when it tripped so `allow_request`
/// can decide whether the cooldown has elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

/// Per-provider circuit breaker: CLOSED -> OPEN after `failure_threshold`
/// consecutive failures; OPEN rejects for `open_timeout`, then admits a
/// HALF_OPEN probe; `success_threshold` consecutive probe successes close
/// the breaker again. Any failure while HALF_OPEN reopens it immediately.
pub struct CircuitBreaker {
    failure_threshold: u32,
    success_threshold: u32,
    open_timeout: Duration,
    inner: Mutex<Inner>,
}

struct Inner {
    state: State,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    half_open_probe_in_flight: bool,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, success_threshold: u32, open_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            success_threshold,
            open_timeout,
            inner: Mutex::new(Inner {
                state: State::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
                half_open_probe_in_flight: false,
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(5, 2, Duration::from_secs(60))
    }

    /// Whether a new request may proceed right now. Admits exactly one
    /// concurrent probe while HALF_OPEN.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            State::Closed => true,
            State::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.open_timeout {
                    inner.state = State::HalfOpen;
                    inner.consecutive_successes = 0;
                    inner.half_open_probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
            State::HalfOpen => {
                if inner.half_open_probe_in_flight {
                    false
                } else {
                    inner.half_open_probe_in_flight = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            State::Closed => {
                inner.consecutive_failures = 0;
            }
            State::HalfOpen => {
                inner.half_open_probe_in_flight = false;
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.success_threshold {
                    inner.state = State::Closed;
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                }
            }
            State::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            State::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.state = State::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            State::HalfOpen => {
                inner.half_open_probe_in_flight = false;
                inner.state = State::Open;
                inner.opened_at = Some(Instant::now());
                inner.consecutive_successes = 0;
            }
            State::Open => {}
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.inner.lock().unwrap().state, State::Open)
    }
}
