use std::collections::HashMap;
use std::time::Duration;

use crate::domain::entities::broker::BrokerId;
use crate::domain::entities::exchange::Exchange;

/// Token refresh scheduling parameters.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Floor on the refresh safety margin ahead of session expiry. The
    /// scheduler uses max(lifetime / 10, this floor).
    pub refresh_margin_floor: Duration,
    pub refresh_backoff_initial: Duration,
    pub refresh_backoff_max: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            refresh_margin_floor: Duration::from_secs(60),
            refresh_backoff_initial: Duration::from_secs(1),
            refresh_backoff_max: Duration::from_secs(300),
        }
    }
}

/// Subscription multiplexer parameters.
#[derive(Debug, Clone)]
pub struct MuxConfig {
    /// Symbols registered per subscribe frame.
    pub batch_size: usize,
    /// Pacing between batches, to respect upstream rate limits.
    pub batch_delay: Duration,
    /// How long an idle connection is kept before teardown.
    pub idle_grace: Duration,
    /// Reconnect attempts before surfacing ConnectionLost.
    pub max_reconnect_attempts: u32,
    pub reconnect_backoff_max: Duration,
    /// Capacity of each per-symbol broadcast topic.
    pub topic_capacity: usize,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            batch_delay: Duration::from_millis(250),
            idle_grace: Duration::from_secs(30),
            max_reconnect_attempts: 10,
            reconnect_backoff_max: Duration::from_secs(60),
            topic_capacity: 256,
        }
    }
}

/// Market data cache / poller parameters.
#[derive(Debug, Clone)]
pub struct MarketDataConfig {
    /// Quote freshness while the market is open.
    pub open_ttl: Duration,
    /// REST poll cadence while the market is closed.
    pub closed_poll_interval: Duration,
    /// Upper bound on the closed-market cache TTL.
    pub max_closed_ttl: Duration,
    /// Bound on the number of cached (exchange, symbol) snapshots.
    pub cache_capacity: usize,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            open_ttl: Duration::from_secs(5),
            closed_poll_interval: Duration::from_secs(60),
            max_closed_ttl: Duration::from_secs(3600),
            cache_capacity: 1024,
        }
    }
}

/// Order router parameters.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Per-broker quote query timeout (best-price strategy).
    pub quote_timeout: Duration,
    /// Overall order submission timeout, distinct from the quote timeout.
    pub submit_timeout: Duration,
    /// EWMA smoothing factor for latency averages.
    pub ewma_alpha: f64,
    pub breaker_failure_threshold: u32,
    pub breaker_window: Duration,
    pub breaker_cooldown: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            quote_timeout: Duration::from_millis(1500),
            submit_timeout: Duration::from_secs(5),
            ewma_alpha: 0.3,
            breaker_failure_threshold: 5,
            breaker_window: Duration::from_secs(60),
            breaker_cooldown: Duration::from_secs(30),
        }
    }
}

/// Paper trading parameters.
#[derive(Debug, Clone)]
pub struct PaperConfig {
    pub initial_balance: f64,
    /// Slippage fraction applied to market fills (0.0005 = 0.05%).
    pub slippage: f64,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            initial_balance: 1_000_000.0,
            slippage: 0.0005,
        }
    }
}

/// Top-level configuration, environment-driven.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Brokers enabled for this run.
    pub brokers: Vec<BrokerId>,
    /// Watchlist per exchange.
    pub symbols: HashMap<Exchange, Vec<String>>,
    pub auth: AuthConfig,
    pub mux: MuxConfig,
    pub market_data: MarketDataConfig,
    pub router: RouterConfig,
    pub paper: PaperConfig,
    /// Aggregator refresh cadence.
    pub aggregate_refresh_interval: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        let mut symbols = HashMap::new();
        symbols.insert(
            Exchange::Nse,
            vec![
                "RELIANCE".to_string(),
                "TCS".to_string(),
                "INFY".to_string(),
                "SBIN".to_string(),
            ],
        );
        symbols.insert(Exchange::Bse, vec!["SENSEX".to_string()]);

        AppConfig {
            brokers: BrokerId::all().to_vec(),
            symbols,
            auth: AuthConfig::default(),
            mux: MuxConfig::default(),
            market_data: MarketDataConfig::default(),
            router: RouterConfig::default(),
            paper: PaperConfig::default(),
            aggregate_refresh_interval: Duration::from_secs(10),
        }
    }
}

fn env_u64(name: &str, range: std::ops::RangeInclusive<u64>) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.parse::<u64>() {
        Ok(value) if range.contains(&value) => Some(value),
        Ok(value) => {
            tracing::warn!(
                "Ignoring {}={} (allowed range {:?})",
                name,
                value,
                range
            );
            None
        }
        Err(e) => {
            tracing::warn!("Failed to parse {} '{}': {}", name, raw, e);
            None
        }
    }
}

fn env_f64(name: &str, range: std::ops::RangeInclusive<f64>) -> Option<f64> {
    let raw = std::env::var(name).ok()?;
    match raw.parse::<f64>() {
        Ok(value) if range.contains(&value) => Some(value),
        Ok(value) => {
            tracing::warn!(
                "Ignoring {}={} (allowed range {:?})",
                name,
                value,
                range
            );
            None
        }
        Err(e) => {
            tracing::warn!("Failed to parse {} '{}': {}", name, raw, e);
            None
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or out of range.
    pub fn from_env() -> AppConfig {
        let mut config = AppConfig::default();

        if let Ok(brokers) = std::env::var("DALALI_BROKERS") {
            let parsed: Vec<BrokerId> = brokers
                .split(',')
                .filter_map(|name| match name.trim().parse::<BrokerId>() {
                    Ok(b) => Some(b),
                    Err(e) => {
                        tracing::warn!("Skipping broker in DALALI_BROKERS: {}", e);
                        None
                    }
                })
                .collect();
            if !parsed.is_empty() {
                config.brokers = parsed;
            }
        }

        if let Some(v) = env_u64("DALALI_REFRESH_MARGIN_FLOOR_SECS", 10..=3600) {
            config.auth.refresh_margin_floor = Duration::from_secs(v);
        }
        if let Some(v) = env_u64("DALALI_SUB_BATCH_SIZE", 1..=500) {
            config.mux.batch_size = v as usize;
        }
        if let Some(v) = env_u64("DALALI_SUB_BATCH_DELAY_MS", 0..=5000) {
            config.mux.batch_delay = Duration::from_millis(v);
        }
        if let Some(v) = env_u64("DALALI_IDLE_GRACE_SECS", 0..=600) {
            config.mux.idle_grace = Duration::from_secs(v);
        }
        if let Some(v) = env_u64("DALALI_MAX_RECONNECT_ATTEMPTS", 1..=100) {
            config.mux.max_reconnect_attempts = v as u32;
        }
        if let Some(v) = env_u64("DALALI_OPEN_TTL_SECS", 1..=60) {
            config.market_data.open_ttl = Duration::from_secs(v);
        }
        if let Some(v) = env_u64("DALALI_CLOSED_POLL_SECS", 10..=3600) {
            config.market_data.closed_poll_interval = Duration::from_secs(v);
        }
        if let Some(v) = env_u64("DALALI_QUOTE_TIMEOUT_MS", 100..=30_000) {
            config.router.quote_timeout = Duration::from_millis(v);
        }
        if let Some(v) = env_u64("DALALI_SUBMIT_TIMEOUT_MS", 500..=60_000) {
            config.router.submit_timeout = Duration::from_millis(v);
        }
        if let Some(v) = env_f64("DALALI_EWMA_ALPHA", 0.01..=1.0) {
            config.router.ewma_alpha = v;
        }
        if let Some(v) = env_u64("DALALI_BREAKER_FAILURES", 1..=50) {
            config.router.breaker_failure_threshold = v as u32;
        }
        if let Some(v) = env_u64("DALALI_BREAKER_COOLDOWN_SECS", 1..=3600) {
            config.router.breaker_cooldown = Duration::from_secs(v);
        }
        if let Some(v) = env_f64("DALALI_PAPER_BALANCE", 1000.0..=1e12) {
            config.paper.initial_balance = v;
        }
        if let Some(v) = env_f64("DALALI_PAPER_SLIPPAGE", 0.0..=0.05) {
            config.paper.slippage = v;
        }
        if let Some(v) = env_u64("DALALI_AGGREGATE_REFRESH_SECS", 1..=600) {
            config.aggregate_refresh_interval = Duration::from_secs(v);
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.brokers.len(), 4);
        assert!(config.symbols.contains_key(&Exchange::Nse));
        assert_eq!(config.mux.batch_size, 50);
        assert_eq!(config.paper.initial_balance, 1_000_000.0);
    }

    #[test]
    fn test_env_override_in_range() {
        std::env::set_var("DALALI_SUB_BATCH_SIZE", "25");
        let config = AppConfig::from_env();
        assert_eq!(config.mux.batch_size, 25);
        std::env::remove_var("DALALI_SUB_BATCH_SIZE");
    }

    #[test]
    fn test_env_override_out_of_range_falls_back() {
        std::env::set_var("DALALI_EWMA_ALPHA", "7.5");
        let config = AppConfig::from_env();
        assert_eq!(config.router.ewma_alpha, 0.3);
        std::env::remove_var("DALALI_EWMA_ALPHA");
    }

    #[test]
    fn test_broker_list_from_env() {
        std::env::set_var("DALALI_BROKERS", "zerodha,fyers,notabroker");
        let config = AppConfig::from_env();
        assert_eq!(config.brokers, vec![BrokerId::Zerodha, BrokerId::Fyers]);
        std::env::remove_var("DALALI_BROKERS");
    }
}
