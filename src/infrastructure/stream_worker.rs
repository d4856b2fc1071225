//! Per-broker WebSocket stream worker.
//!
//! One worker owns the single physical connection to one broker's feed. It
//! speaks the adapter's `StreamProtocol`, resubscribes the full referenced
//! set after every reconnect, and backs off exponentially between attempts.
//! After the bounded retry budget is exhausted a `ConnectionLost` event is
//! emitted and the worker exits; until then consumers notice nothing.

use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use crate::domain::entities::broker::BrokerId;
use crate::domain::entities::exchange::Exchange;
use crate::domain::market_data::{MarketEvent, SubscriptionMode};
use crate::domain::repositories::broker_adapter::StreamProtocol;
use crate::domain::services::subscription_registry::SubscriptionRegistry;

#[derive(Debug)]
pub enum StreamCommand {
    Subscribe {
        symbols: Vec<(String, Exchange)>,
        mode: SubscriptionMode,
    },
    Unsubscribe {
        symbols: Vec<(String, Exchange)>,
    },
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct StreamWorkerConfig {
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub max_reconnect_attempts: u32,
    pub backoff_max: Duration,
}

pub async fn run_stream_worker(
    broker: BrokerId,
    protocol: Arc<dyn StreamProtocol>,
    registry: Arc<Mutex<SubscriptionRegistry>>,
    mut command_rx: mpsc::Receiver<StreamCommand>,
    event_tx: mpsc::Sender<MarketEvent>,
    config: StreamWorkerConfig,
) {
    let endpoint = protocol.endpoint();
    if Url::parse(&endpoint).is_err() {
        warn!("Invalid stream endpoint for {}: {}", broker, endpoint);
        return;
    }

    let mut backoff = Duration::from_secs(1);
    let mut attempts: u32 = 0;

    loop {
        info!("Connecting stream for {} ({})", broker, endpoint);
        match try_connection(
            broker,
            &endpoint,
            Arc::clone(&protocol),
            Arc::clone(&registry),
            &mut command_rx,
            &event_tx,
            &config,
        )
        .await
        {
            Ok(ConnectionEnd::Shutdown) => {
                info!("Stream worker for {} shut down", broker);
                return;
            }
            Ok(ConnectionEnd::Closed) => {
                info!("Stream closed by {}, reconnecting", broker);
                backoff = Duration::from_secs(1);
                attempts = 0;
            }
            Err(e) => {
                attempts += 1;
                warn!(
                    "Stream error for {} (attempt {}/{}): {}",
                    broker, attempts, config.max_reconnect_attempts, e
                );
                if attempts >= config.max_reconnect_attempts {
                    let _ = event_tx
                        .send(MarketEvent::ConnectionLost {
                            broker,
                            reason: format!(
                                "Reconnection failed after {} attempts: {}",
                                attempts, e
                            ),
                        })
                        .await;
                    return;
                }
            }
        }

        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(config.backoff_max);
    }
}

enum ConnectionEnd {
    Closed,
    Shutdown,
}

async fn try_connection(
    broker: BrokerId,
    endpoint: &str,
    protocol: Arc<dyn StreamProtocol>,
    registry: Arc<Mutex<SubscriptionRegistry>>,
    command_rx: &mut mpsc::Receiver<StreamCommand>,
    event_tx: &mpsc::Sender<MarketEvent>,
    config: &StreamWorkerConfig,
) -> Result<ConnectionEnd, String> {
    let (stream, _) = connect_async(endpoint)
        .await
        .map_err(|e| format!("Failed to connect: {}", e))?;
    info!("Stream connected for {}", broker);
    let (mut write, mut read) = stream.split();

    // Resubscribe everything currently referenced, in paced batches
    let snapshot = registry.lock().await.snapshot_for(broker);
    for chunk in snapshot.chunks(config.batch_size.max(1)) {
        // One frame per mode present in the chunk
        for mode in [SubscriptionMode::Ltp, SubscriptionMode::Quote, SubscriptionMode::Full] {
            let symbols: Vec<(String, Exchange)> = chunk
                .iter()
                .filter(|(_, _, m)| *m == mode)
                .map(|(symbol, exchange, _)| (symbol.clone(), *exchange))
                .collect();
            if symbols.is_empty() {
                continue;
            }
            if let Some(frame) = protocol.subscribe_frame(&symbols, mode) {
                write
                    .send(Message::Text(frame))
                    .await
                    .map_err(|e| format!("Failed to resubscribe: {}", e))?;
            }
        }
        tokio::time::sleep(config.batch_delay).await;
    }

    loop {
        tokio::select! {
            message = read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(event) = protocol.parse_frame(&text) {
                            if event_tx.send(event).await.is_err() {
                                // Fan-out side gone; treat as shutdown
                                return Ok(ConnectionEnd::Shutdown);
                            }
                        } else {
                            debug!("Unparsed frame from {}: {}", broker, text);
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        write.send(Message::Pong(payload)).await
                            .map_err(|e| format!("Failed to send pong: {}", e))?;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!("Close frame from {}: {:?}", broker, frame);
                        return Ok(ConnectionEnd::Closed);
                    }
                    Some(Ok(other)) => {
                        debug!("Ignoring frame from {}: {:?}", broker, other);
                    }
                    Some(Err(e)) => {
                        return Err(format!("Stream read error: {}", e));
                    }
                    None => {
                        return Ok(ConnectionEnd::Closed);
                    }
                }
            }
            command = command_rx.recv() => {
                match command {
                    Some(StreamCommand::Subscribe { symbols, mode }) => {
                        if let Some(frame) = protocol.subscribe_frame(&symbols, mode) {
                            write.send(Message::Text(frame)).await
                                .map_err(|e| format!("Failed to subscribe: {}", e))?;
                        }
                    }
                    Some(StreamCommand::Unsubscribe { symbols }) => {
                        if let Some(frame) = protocol.unsubscribe_frame(&symbols) {
                            write.send(Message::Text(frame)).await
                                .map_err(|e| format!("Failed to unsubscribe: {}", e))?;
                        }
                    }
                    Some(StreamCommand::Shutdown) | None => {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(ConnectionEnd::Shutdown);
                    }
                }
            }
        }
    }
}
