//! Subscription multiplexer.
//!
//! Shares one physical streaming connection per broker across many logical
//! subscribers. Symbol interest is reference-counted: the broker is told on
//! the first subscriber and only untold when the last one leaves. Inbound
//! events are fanned out on per-(broker, exchange, symbol) broadcast topics
//! so one slow or failed consumer can never block the others.
//!
//! Connections are established lazily on first subscribe and torn down only
//! after the registry goes idle for a grace period, to avoid thrashing on
//! rapid re-subscribes.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::application::services::auth_manager::AuthManager;
use crate::config::MuxConfig;
use crate::domain::entities::broker::BrokerId;
use crate::domain::entities::exchange::Exchange;
use crate::domain::errors::BrokerError;
use crate::domain::market_data::{MarketEvent, SubscriptionMode};
use crate::domain::services::subscription_registry::{
    Acquire, Release, SubscriptionKey, SubscriptionRegistry,
};
use crate::infrastructure::stream_worker::{
    run_stream_worker, StreamCommand, StreamWorkerConfig,
};
use crate::rate_limit::{per_second, DirectLimiter};

struct WorkerHandle {
    command_tx: mpsc::Sender<StreamCommand>,
    worker: tokio::task::JoinHandle<()>,
    fanout: tokio::task::JoinHandle<()>,
}

pub struct SubscriptionMultiplexer {
    auth: Arc<AuthManager>,
    config: MuxConfig,
    registry: Arc<Mutex<SubscriptionRegistry>>,
    topics: Arc<Mutex<HashMap<SubscriptionKey, broadcast::Sender<MarketEvent>>>>,
    /// Every event, in arrival order, for service-level consumers.
    firehose: broadcast::Sender<MarketEvent>,
    /// ConnectionLost and other lifecycle events.
    control: broadcast::Sender<MarketEvent>,
    workers: Mutex<HashMap<BrokerId, WorkerHandle>>,
    batch_limiter: DirectLimiter,
}

impl SubscriptionMultiplexer {
    pub fn new(auth: Arc<AuthManager>, config: MuxConfig) -> Arc<Self> {
        let (firehose, _) = broadcast::channel(config.topic_capacity.max(16) * 4);
        let (control, _) = broadcast::channel(64);
        let batches_per_second =
            (1000 / config.batch_delay.as_millis().max(1)).clamp(1, 1000) as u32;
        Arc::new(SubscriptionMultiplexer {
            auth,
            config,
            registry: Arc::new(Mutex::new(SubscriptionRegistry::new())),
            topics: Arc::new(Mutex::new(HashMap::new())),
            firehose,
            control,
            workers: Mutex::new(HashMap::new()),
            batch_limiter: per_second(batches_per_second),
        })
    }

    /// Register interest in a batch of symbols on one broker.
    ///
    /// Only first-time symbols are sent upstream, chunked to the configured
    /// batch size and paced to respect broker rate limits.
    pub async fn subscribe(
        self: &Arc<Self>,
        broker: BrokerId,
        symbols: &[(String, Exchange)],
        mode: SubscriptionMode,
    ) -> Result<(), BrokerError> {
        let mut first_time = Vec::new();
        {
            let mut registry = self.registry.lock().await;
            for (symbol, exchange) in symbols {
                let key = SubscriptionKey::new(broker, *exchange, symbol.clone());
                if registry.acquire(key, mode) == Acquire::First {
                    first_time.push((symbol.clone(), *exchange));
                }
            }
        }
        if first_time.is_empty() {
            return Ok(());
        }

        let Some(command_tx) = self.ensure_worker(broker).await? else {
            // No push feed for this broker; the polling fallback serves it
            debug!(
                "{} has no stream protocol; {} symbols tracked for polling",
                broker,
                first_time.len()
            );
            return Ok(());
        };

        for chunk in first_time.chunks(self.config.batch_size.max(1)) {
            self.batch_limiter.until_ready().await;
            command_tx
                .send(StreamCommand::Subscribe {
                    symbols: chunk.to_vec(),
                    mode,
                })
                .await
                .map_err(|e| BrokerError::ConnectionLost(e.to_string()))?;
        }
        info!(
            "Subscribed {} new symbols on {} ({} mode)",
            first_time.len(),
            broker,
            mode
        );
        Ok(())
    }

    /// Drop one reference per symbol. Idempotent: unknown symbols are
    /// ignored. The physical unsubscribe happens only at refcount zero.
    pub async fn unsubscribe(
        self: &Arc<Self>,
        broker: BrokerId,
        symbols: &[(String, Exchange)],
    ) -> Result<(), BrokerError> {
        let mut released = Vec::new();
        let broker_idle;
        {
            let mut registry = self.registry.lock().await;
            for (symbol, exchange) in symbols {
                let key = SubscriptionKey::new(broker, *exchange, symbol.clone());
                if registry.release(&key) == Release::Last {
                    released.push((symbol.clone(), *exchange));
                }
            }
            broker_idle = registry.broker_is_idle(broker);
        }

        if !released.is_empty() {
            if let Some(handle) = self.workers.lock().await.get(&broker) {
                let _ = handle
                    .command_tx
                    .send(StreamCommand::Unsubscribe { symbols: released })
                    .await;
            }
        }

        if broker_idle {
            self.schedule_teardown(broker);
        }
        Ok(())
    }

    /// Receive events for one (broker, exchange, symbol) topic.
    pub async fn events(
        &self,
        broker: BrokerId,
        exchange: Exchange,
        symbol: &str,
    ) -> broadcast::Receiver<MarketEvent> {
        let key = SubscriptionKey::new(broker, exchange, symbol);
        let mut topics = self.topics.lock().await;
        topics
            .entry(key)
            .or_insert_with(|| broadcast::channel(self.config.topic_capacity.max(16)).0)
            .subscribe()
    }

    /// Every tick and depth event from every broker, in arrival order.
    pub fn firehose(&self) -> broadcast::Receiver<MarketEvent> {
        self.firehose.subscribe()
    }

    /// Lifecycle notifications (ConnectionLost).
    pub fn control_events(&self) -> broadcast::Receiver<MarketEvent> {
        self.control.subscribe()
    }

    pub async fn ref_count(&self, broker: BrokerId, exchange: Exchange, symbol: &str) -> u32 {
        self.registry
            .lock()
            .await
            .ref_count(&SubscriptionKey::new(broker, exchange, symbol))
    }

    /// Lazily connect the broker's stream. Returns None when the broker
    /// offers no push feed.
    async fn ensure_worker(
        self: &Arc<Self>,
        broker: BrokerId,
    ) -> Result<Option<mpsc::Sender<StreamCommand>>, BrokerError> {
        if let Some(handle) = self.workers.lock().await.get(&broker) {
            return Ok(Some(handle.command_tx.clone()));
        }

        let adapter = self
            .auth
            .adapter(broker)
            .await
            .ok_or_else(|| BrokerError::Auth(format!("{} is not authenticated", broker)))?;
        let Some(protocol) = adapter.stream_protocol() else {
            return Ok(None);
        };

        let (command_tx, command_rx) = mpsc::channel(128);
        let (event_tx, event_rx) = mpsc::channel(1024);

        let worker = tokio::spawn(run_stream_worker(
            broker,
            protocol,
            Arc::clone(&self.registry),
            command_rx,
            event_tx,
            StreamWorkerConfig {
                batch_size: self.config.batch_size,
                batch_delay: self.config.batch_delay,
                max_reconnect_attempts: self.config.max_reconnect_attempts,
                backoff_max: self.config.reconnect_backoff_max,
            },
        ));
        let fanout = {
            let mux = Arc::clone(self);
            tokio::spawn(async move {
                mux.run_fanout(event_rx).await;
            })
        };

        let handle = WorkerHandle {
            command_tx: command_tx.clone(),
            worker,
            fanout,
        };
        self.workers.lock().await.insert(broker, handle);
        info!("Stream worker started for {}", broker);
        Ok(Some(command_tx))
    }

    async fn run_fanout(self: Arc<Self>, mut event_rx: mpsc::Receiver<MarketEvent>) {
        while let Some(event) = event_rx.recv().await {
            self.dispatch_event(event).await;
        }
    }

    /// Route one event to its topic, the firehose, and (for lifecycle
    /// events) the control channel. Send errors mean no receivers, which
    /// is fine; they never stop delivery to other topics.
    async fn dispatch_event(&self, event: MarketEvent) {
        let topic_key = match &event {
            MarketEvent::Tick { broker, tick } => {
                Some(SubscriptionKey::new(*broker, tick.exchange, tick.symbol.clone()))
            }
            MarketEvent::Depth { broker, depth } => {
                Some(SubscriptionKey::new(*broker, depth.exchange, depth.symbol.clone()))
            }
            MarketEvent::ConnectionLost { broker, reason } => {
                warn!("Connection lost for {}: {}", broker, reason);
                None
            }
        };
        match topic_key {
            Some(key) => {
                if let Some(topic) = self.topics.lock().await.get(&key) {
                    let _ = topic.send(event.clone());
                }
            }
            None => {
                let _ = self.control.send(event.clone());
            }
        }
        let _ = self.firehose.send(event);
    }

    /// Tear the broker's connection down after the idle grace period, if
    /// nothing re-subscribed in the meantime.
    fn schedule_teardown(self: &Arc<Self>, broker: BrokerId) {
        let mux = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(mux.config.idle_grace).await;
            if !mux.registry.lock().await.broker_is_idle(broker) {
                debug!("Teardown for {} cancelled: re-subscribed during grace", broker);
                return;
            }
            if let Some(handle) = mux.workers.lock().await.remove(&broker) {
                let _ = handle.command_tx.send(StreamCommand::Shutdown).await;
                info!("Idle stream torn down for {}", broker);
                // Worker exit closes the event channel, ending fanout
                let _ = handle.worker.await;
                let _ = handle.fanout.await;
            }
        });
    }

    pub async fn shutdown(&self) {
        let mut workers = self.workers.lock().await;
        for (broker, handle) in workers.drain() {
            let _ = handle.command_tx.send(StreamCommand::Shutdown).await;
            handle.worker.abort();
            handle.fanout.abort();
            debug!("Stream worker stopped for {}", broker);
        }
    }
}
