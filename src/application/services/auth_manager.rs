//! Auth Manager and token refresh scheduler.
//!
//! Holds one session per configured broker and renews tokens ahead of
//! expiry without blocking trading. Refresh failures never propagate into
//! caller code paths: the session is marked unauthenticated and retried in
//! the background with exponential backoff while other brokers trade on.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::{error, info, warn};

use crate::config::AuthConfig;
use crate::credentials::CredentialStore;
use crate::domain::entities::broker::BrokerId;
use crate::domain::errors::BrokerError;
use crate::domain::repositories::broker_adapter::{BrokerAdapter, BrokerResult, BrokerSession};

/// Point-in-time view of one session, for the status surface.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub broker: BrokerId,
    pub authenticated: bool,
    pub expires_at: Option<DateTime<Utc>>,
    /// True when background refresh is failing for this broker.
    pub degraded: bool,
}

pub struct AuthManager {
    adapters: HashMap<BrokerId, Arc<dyn BrokerAdapter>>,
    store: Arc<dyn CredentialStore>,
    config: AuthConfig,
    sessions: Arc<RwLock<HashMap<BrokerId, BrokerSession>>>,
    degraded: Arc<RwLock<HashSet<BrokerId>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl AuthManager {
    pub fn new(store: Arc<dyn CredentialStore>, config: AuthConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        AuthManager {
            adapters: HashMap::new(),
            store,
            config,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            degraded: Arc::new(RwLock::new(HashSet::new())),
            shutdown_tx,
        }
    }

    /// Register a broker driver. Call before spawning the scheduler.
    pub fn register_adapter(&mut self, adapter: Arc<dyn BrokerAdapter>) {
        self.adapters.insert(adapter.broker(), adapter);
    }

    pub fn registered_brokers(&self) -> Vec<BrokerId> {
        self.adapters.keys().copied().collect()
    }

    /// Authenticate one broker, replacing any existing session.
    pub async fn authenticate(&self, broker: BrokerId) -> BrokerResult<()> {
        let adapter = self
            .adapters
            .get(&broker)
            .ok_or_else(|| BrokerError::Auth(format!("No adapter registered for {}", broker)))?;
        let credential = self
            .store
            .get(broker)
            .await
            .map_err(|e| BrokerError::Auth(e.to_string()))?;

        let session = adapter.authenticate(&credential).await?;
        info!(
            "Authenticated {} (session expires {})",
            broker, session.expires_at
        );
        self.sessions.write().await.insert(broker, session);
        self.degraded.write().await.remove(&broker);
        Ok(())
    }

    /// Authenticate every registered broker. One broker failing never stops
    /// the others; results are reported per broker.
    pub async fn authenticate_all(&self) -> HashMap<BrokerId, BrokerResult<()>> {
        let mut results = HashMap::new();
        for broker in self.registered_brokers() {
            let result = self.authenticate(broker).await;
            if let Err(e) = &result {
                error!("Authentication failed for {}: {}", broker, e);
                self.degraded.write().await.insert(broker);
            }
            results.insert(broker, result);
        }
        results
    }

    pub async fn is_authenticated(&self, broker: BrokerId) -> bool {
        self.sessions
            .read()
            .await
            .get(&broker)
            .map(|s| s.authenticated && !s.is_expired(Utc::now()))
            .unwrap_or(false)
    }

    /// The adapter for a broker, or None while unauthenticated.
    pub async fn adapter(&self, broker: BrokerId) -> Option<Arc<dyn BrokerAdapter>> {
        if self.is_authenticated(broker).await {
            self.adapters.get(&broker).cloned()
        } else {
            None
        }
    }

    pub async fn authenticated_brokers(&self) -> Vec<BrokerId> {
        let mut brokers = Vec::new();
        for broker in self.adapters.keys().copied() {
            if self.is_authenticated(broker).await {
                brokers.push(broker);
            }
        }
        brokers
    }

    pub async fn session(&self, broker: BrokerId) -> Option<BrokerSession> {
        self.sessions.read().await.get(&broker).cloned()
    }

    pub async fn session_status(&self) -> Vec<SessionStatus> {
        let sessions = self.sessions.read().await;
        let degraded = self.degraded.read().await;
        self.adapters
            .keys()
            .map(|broker| {
                let session = sessions.get(broker);
                SessionStatus {
                    broker: *broker,
                    authenticated: session
                        .map(|s| s.authenticated && !s.is_expired(Utc::now()))
                        .unwrap_or(false),
                    expires_at: session.map(|s| s.expires_at),
                    degraded: degraded.contains(broker),
                }
            })
            .collect()
    }

    /// Drop a session. The adapter stays registered and can re-authenticate.
    pub async fn disconnect(&self, broker: BrokerId) {
        if self.sessions.write().await.remove(&broker).is_some() {
            info!("Disconnected {}", broker);
        }
    }

    /// When a session should be refreshed: ahead of expiry by 10% of the
    /// lifetime, never less than the configured floor.
    fn refresh_at(&self, session: &BrokerSession) -> DateTime<Utc> {
        let lifetime = session.lifetime();
        let floor = ChronoDuration::from_std(self.config.refresh_margin_floor)
            .unwrap_or_else(|_| ChronoDuration::seconds(60));
        let margin = std::cmp::max(lifetime / 10, floor);
        session.expires_at - margin
    }

    /// Spawn one background refresh task per registered broker.
    pub fn spawn_refresh_scheduler(self: &Arc<Self>) {
        for broker in self.registered_brokers() {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                manager.run_refresh_loop(broker).await;
            });
        }
    }

    async fn run_refresh_loop(self: Arc<Self>, broker: BrokerId) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut backoff = self.config.refresh_backoff_initial;

        loop {
            let wait = match self.session(broker).await {
                Some(session) if session.authenticated => {
                    let until = self.refresh_at(&session) - Utc::now();
                    until.to_std().unwrap_or(Duration::ZERO)
                }
                // Unauthenticated or missing session: retry on backoff
                _ => backoff,
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown_rx.recv() => {
                    info!("Refresh scheduler stopped for {}", broker);
                    return;
                }
            }

            match self.try_renew(broker).await {
                Ok(()) => {
                    backoff = self.config.refresh_backoff_initial;
                }
                Err(e) => {
                    warn!(
                        "Token refresh failed for {}: {} (retry in {:?})",
                        broker, e, backoff
                    );
                    self.mark_degraded(broker).await;
                    backoff = (backoff * 2).min(self.config.refresh_backoff_max);
                }
            }
        }
    }

    /// Renew an existing session in place, or fall back to a fresh
    /// authenticate when none is usable.
    async fn try_renew(&self, broker: BrokerId) -> BrokerResult<()> {
        let current = self.session(broker).await;
        match current {
            Some(session) if session.authenticated => {
                let adapter = self.adapters.get(&broker).ok_or_else(|| {
                    BrokerError::Auth(format!("No adapter registered for {}", broker))
                })?;
                let renewed = adapter.refresh_session(&session).await?;
                info!(
                    "Refreshed session for {} (now expires {})",
                    broker, renewed.expires_at
                );
                self.sessions.write().await.insert(broker, renewed);
                self.degraded.write().await.remove(&broker);
                Ok(())
            }
            _ => self.authenticate(broker).await,
        }
    }

    async fn mark_degraded(&self, broker: BrokerId) {
        if let Some(session) = self.sessions.write().await.get_mut(&broker) {
            session.authenticated = false;
        }
        self.degraded.write().await.insert(broker);
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{BrokerCredential, MemoryCredentialStore};
    use crate::domain::entities::exchange::Exchange;
    use crate::domain::entities::order::OrderRequest;
    use crate::domain::entities::position::{Holding, UnifiedPosition};
    use crate::domain::entities::order::UnifiedOrder;
    use crate::domain::market_data::{MarketDepth, Tick};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct MockAdapter {
        broker: BrokerId,
        lifetime: ChronoDuration,
        fail_auth: AtomicBool,
        fail_refresh: AtomicBool,
        refresh_calls: AtomicU32,
    }

    impl MockAdapter {
        fn new(broker: BrokerId, lifetime: ChronoDuration) -> Self {
            MockAdapter {
                broker,
                lifetime,
                fail_auth: AtomicBool::new(false),
                fail_refresh: AtomicBool::new(false),
                refresh_calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl BrokerAdapter for MockAdapter {
        fn broker(&self) -> BrokerId {
            self.broker
        }

        async fn authenticate(&self, _credential: &BrokerCredential) -> BrokerResult<BrokerSession> {
            if self.fail_auth.load(Ordering::SeqCst) {
                return Err(BrokerError::Auth("invalid credentials".to_string()));
            }
            Ok(BrokerSession::new(self.broker, "token", self.lifetime))
        }

        async fn refresh_session(&self, session: &BrokerSession) -> BrokerResult<BrokerSession> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_refresh.load(Ordering::SeqCst) {
                return Err(BrokerError::Network("refresh endpoint down".to_string()));
            }
            Ok(BrokerSession::new(session.broker, "token-2", self.lifetime))
        }

        async fn get_quote(&self, _symbol: &str, _exchange: Exchange) -> BrokerResult<Tick> {
            Err(BrokerError::not_supported(self.broker, "get_quote"))
        }

        async fn get_market_depth(
            &self,
            _symbol: &str,
            _exchange: Exchange,
        ) -> BrokerResult<MarketDepth> {
            Err(BrokerError::not_supported(self.broker, "get_market_depth"))
        }

        async fn place_order(&self, _request: &OrderRequest) -> BrokerResult<String> {
            Ok("mock-order".to_string())
        }

        async fn cancel_order(&self, _order_id: &str) -> BrokerResult<()> {
            Ok(())
        }

        async fn orders(&self) -> BrokerResult<Vec<UnifiedOrder>> {
            Ok(vec![])
        }

        async fn positions(&self) -> BrokerResult<Vec<UnifiedPosition>> {
            Ok(vec![])
        }

        async fn holdings(&self) -> BrokerResult<Vec<Holding>> {
            Ok(vec![])
        }
    }

    async fn store_with(brokers: &[BrokerId]) -> Arc<MemoryCredentialStore> {
        let store = Arc::new(MemoryCredentialStore::new());
        for broker in brokers {
            store
                .put(*broker, BrokerCredential::new("key", "secret-value"))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_adapter_none_before_authentication() {
        let store = store_with(&[BrokerId::Zerodha]).await;
        let mut manager = AuthManager::new(store, AuthConfig::default());
        manager.register_adapter(Arc::new(MockAdapter::new(
            BrokerId::Zerodha,
            ChronoDuration::hours(8),
        )));

        assert!(manager.adapter(BrokerId::Zerodha).await.is_none());
        assert!(!manager.is_authenticated(BrokerId::Zerodha).await);
    }

    #[tokio::test]
    async fn test_authenticate_success() {
        let store = store_with(&[BrokerId::Zerodha]).await;
        let mut manager = AuthManager::new(store, AuthConfig::default());
        manager.register_adapter(Arc::new(MockAdapter::new(
            BrokerId::Zerodha,
            ChronoDuration::hours(8),
        )));

        manager.authenticate(BrokerId::Zerodha).await.unwrap();
        assert!(manager.is_authenticated(BrokerId::Zerodha).await);
        assert!(manager.adapter(BrokerId::Zerodha).await.is_some());
    }

    #[tokio::test]
    async fn test_authenticate_missing_credential() {
        let store = store_with(&[]).await;
        let mut manager = AuthManager::new(store, AuthConfig::default());
        manager.register_adapter(Arc::new(MockAdapter::new(
            BrokerId::Upstox,
            ChronoDuration::hours(8),
        )));

        let result = manager.authenticate(BrokerId::Upstox).await;
        assert!(matches!(result, Err(BrokerError::Auth(_))));
    }

    #[tokio::test]
    async fn test_one_broker_failing_does_not_stop_others() {
        let store = store_with(&[BrokerId::Zerodha, BrokerId::Upstox]).await;
        let mut manager = AuthManager::new(store, AuthConfig::default());
        manager.register_adapter(Arc::new(MockAdapter::new(
            BrokerId::Zerodha,
            ChronoDuration::hours(8),
        )));
        let failing = Arc::new(MockAdapter::new(BrokerId::Upstox, ChronoDuration::hours(8)));
        failing.fail_auth.store(true, Ordering::SeqCst);
        manager.register_adapter(failing);

        let results = manager.authenticate_all().await;
        assert!(results.get(&BrokerId::Zerodha).unwrap().is_ok());
        assert!(results.get(&BrokerId::Upstox).unwrap().is_err());
        assert_eq!(manager.authenticated_brokers().await, vec![BrokerId::Zerodha]);
    }

    #[tokio::test]
    async fn test_refresh_at_uses_ten_percent_margin() {
        let store = store_with(&[BrokerId::Zerodha]).await;
        let manager = AuthManager::new(store, AuthConfig::default());
        let session = BrokerSession::new(BrokerId::Zerodha, "t", ChronoDuration::hours(10));
        let refresh_at = manager.refresh_at(&session);
        // Margin is 1 hour (10% of 10h), well above the 60s floor
        let margin = session.expires_at - refresh_at;
        assert_eq!(margin, ChronoDuration::hours(1));
    }

    #[tokio::test]
    async fn test_refresh_at_respects_floor() {
        let store = store_with(&[BrokerId::Zerodha]).await;
        let manager = AuthManager::new(store, AuthConfig::default());
        let session = BrokerSession::new(BrokerId::Zerodha, "t", ChronoDuration::minutes(5));
        let margin = session.expires_at - manager.refresh_at(&session);
        // 10% would be 30s; the 60s floor wins
        assert_eq!(margin, ChronoDuration::seconds(60));
    }

    #[tokio::test]
    async fn test_refresh_failure_marks_degraded_not_fatal() {
        let store = store_with(&[BrokerId::Zerodha]).await;
        let config = AuthConfig {
            refresh_margin_floor: Duration::from_secs(3600),
            refresh_backoff_initial: Duration::from_millis(10),
            refresh_backoff_max: Duration::from_millis(50),
        };
        let mut manager = AuthManager::new(store, config);
        let adapter = Arc::new(MockAdapter::new(BrokerId::Zerodha, ChronoDuration::minutes(30)));
        adapter.fail_refresh.store(true, Ordering::SeqCst);
        adapter.fail_auth.store(true, Ordering::SeqCst);
        manager.register_adapter(adapter.clone());

        // Margin floor exceeds the lifetime, so refresh fires immediately
        adapter.fail_auth.store(false, Ordering::SeqCst);
        manager.authenticate(BrokerId::Zerodha).await.unwrap();
        adapter.fail_auth.store(true, Ordering::SeqCst);

        let manager = Arc::new(manager);
        manager.spawn_refresh_scheduler();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!manager.is_authenticated(BrokerId::Zerodha).await);
        let status = manager.session_status().await;
        assert!(status.iter().any(|s| s.broker == BrokerId::Zerodha && s.degraded));
        assert!(adapter.refresh_calls.load(Ordering::SeqCst) >= 1);
        manager.shutdown();
    }

    #[tokio::test]
    async fn test_disconnect_destroys_session() {
        let store = store_with(&[BrokerId::Zerodha]).await;
        let mut manager = AuthManager::new(store, AuthConfig::default());
        manager.register_adapter(Arc::new(MockAdapter::new(
            BrokerId::Zerodha,
            ChronoDuration::hours(8),
        )));
        manager.authenticate(BrokerId::Zerodha).await.unwrap();
        manager.disconnect(BrokerId::Zerodha).await;
        assert!(!manager.is_authenticated(BrokerId::Zerodha).await);
    }
}
