use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Circuit breaker states following the standard pattern
#[derive(Debug, Clone, PartialEq)]
pub enum CircuitState {
    /// Requests flow normally
    Closed,
    /// Broker is excluded from routing
    Open,
    /// Probing whether the broker recovered
    HalfOpen,
}

/// Per-broker circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures within the window before opening
    pub failure_threshold: u32,
    /// Successes needed to close again from half-open
    pub success_threshold: u32,
    /// How long to stay open before probing
    pub cooldown: Duration,
    /// Window over which failures are counted
    pub window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            // One successful call readmits the broker to routing
            success_threshold: 1,
            cooldown: Duration::from_secs(30),
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<Instant>,
    window_start: Instant,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_at: None,
            window_start: Instant::now(),
        }
    }

    fn reset_window_if_expired(&mut self, window: Duration) {
        if self.window_start.elapsed() > window {
            self.failure_count = 0;
            self.window_start = Instant::now();
        }
    }
}

/// Excludes a repeatedly failing broker from routing until it recovers.
///
/// - **Closed**: the broker participates in routing
/// - **Open**: the broker is skipped by every strategy
/// - **HalfOpen**: one probe call is allowed through
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Arc<Mutex<BreakerState>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(BreakerState::new())),
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.state.lock().await.state.clone()
    }

    /// Whether a call may be routed to this broker right now. Moves an
    /// expired Open breaker to HalfOpen as a side effect.
    pub async fn is_call_permitted(&self) -> bool {
        let mut state = self.state.lock().await;
        state.reset_window_if_expired(self.config.window);

        match state.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if let Some(last_failure) = state.last_failure_at {
                    if last_failure.elapsed() >= self.config.cooldown {
                        state.state = CircuitState::HalfOpen;
                        state.success_count = 0;
                        true
                    } else {
                        false
                    }
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => true,
        }
    }

    pub async fn on_success(&self) {
        let mut state = self.state.lock().await;
        match state.state {
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    state.state = CircuitState::Closed;
                    state.failure_count = 0;
                    state.success_count = 0;
                    state.window_start = Instant::now();
                }
            }
            CircuitState::Closed => {
                state.failure_count = 0;
                state.window_start = Instant::now();
            }
            CircuitState::Open => {}
        }
    }

    pub async fn on_failure(&self) {
        let mut state = self.state.lock().await;
        state.reset_window_if_expired(self.config.window);

        match state.state {
            CircuitState::Closed => {
                state.failure_count += 1;
                state.last_failure_at = Some(Instant::now());
                if state.failure_count >= self.config.failure_threshold {
                    state.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                state.state = CircuitState::Open;
                state.success_count = 0;
                state.failure_count = 1;
                state.last_failure_at = Some(Instant::now());
            }
            CircuitState::Open => {
                state.last_failure_at = Some(Instant::now());
            }
        }
    }

    /// Force the breaker back to closed.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        *state = BreakerState::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    fn config(failures: u32, cooldown: Duration) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: failures,
            cooldown,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_starts_closed() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig::default());
        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert!(breaker.is_call_permitted().await);
    }

    #[tokio::test]
    async fn test_opens_after_consecutive_failures() {
        let breaker = CircuitBreaker::new(config(3, Duration::from_secs(30)));
        for _ in 0..3 {
            breaker.on_failure().await;
        }
        assert_eq!(breaker.state().await, CircuitState::Open);
        assert!(!breaker.is_call_permitted().await);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let breaker = CircuitBreaker::new(config(3, Duration::from_secs(30)));
        breaker.on_failure().await;
        breaker.on_failure().await;
        breaker.on_success().await;
        breaker.on_failure().await;
        breaker.on_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_after_cooldown() {
        let breaker = CircuitBreaker::new(config(2, Duration::from_millis(50)));
        breaker.on_failure().await;
        breaker.on_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Open);

        sleep(Duration::from_millis(80)).await;
        assert!(breaker.is_call_permitted().await);
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn test_single_success_closes_from_half_open() {
        let breaker = CircuitBreaker::new(config(2, Duration::from_millis(50)));
        breaker.on_failure().await;
        breaker.on_failure().await;
        sleep(Duration::from_millis(80)).await;
        let _ = breaker.is_call_permitted().await;

        breaker.on_success().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert!(breaker.is_call_permitted().await);
    }

    #[tokio::test]
    async fn test_failure_in_half_open_reopens() {
        let breaker = CircuitBreaker::new(config(2, Duration::from_millis(50)));
        breaker.on_failure().await;
        breaker.on_failure().await;
        sleep(Duration::from_millis(80)).await;
        let _ = breaker.is_call_permitted().await;

        breaker.on_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_reset() {
        let breaker = CircuitBreaker::new(config(1, Duration::from_secs(30)));
        breaker.on_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Open);
        breaker.reset().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }
}
