use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{delete, get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dalali::application::services::order_router::RoutingStrategy;
use dalali::application::services::trading_service::{build, PlacementResult, TradingService};
use dalali::config::AppConfig;
use dalali::credentials::{CredentialStore, EnvCredentialStore, MemoryCredentialStore};
use dalali::credentials::BrokerCredential;
use dalali::domain::entities::broker::BrokerId;
use dalali::domain::entities::exchange::Exchange;
use dalali::domain::entities::order::{OrderRequest, OrderSide, OrderType};
use dalali::domain::market_data::SubscriptionMode;
use dalali::domain::repositories::broker_adapter::BrokerAdapter;
use dalali::infrastructure::adapters::sim_broker::SimBroker;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dalali=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();
    info!(
        "Starting dalali with brokers: {:?}",
        config.brokers.iter().map(|b| b.to_string()).collect::<Vec<_>>()
    );

    // Simulated drivers by default; real drivers are registered here when
    // compiled in. Credentials come from the environment when present.
    let sim_mode = std::env::var("DALALI_SIM")
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(true);
    let store: Arc<dyn CredentialStore> = if sim_mode {
        let store = Arc::new(MemoryCredentialStore::new());
        for broker in &config.brokers {
            store
                .put(*broker, BrokerCredential::new("sim-key", "sim-secret-material"))
                .await?;
        }
        store
    } else {
        Arc::new(EnvCredentialStore)
    };

    let mut adapters: Vec<Arc<dyn BrokerAdapter>> = Vec::new();
    for broker in &config.brokers {
        let sim = SimBroker::new(*broker);
        for (exchange, symbols) in &config.symbols {
            for symbol in symbols {
                sim.seed_price(symbol, *exchange, 1000.0);
            }
        }
        adapters.push(Arc::new(sim));
    }

    let service = build(config, store, adapters);
    service.init().await;

    let app = Router::new()
        .route("/", get(|| async { "dalali multi-broker trading core is running" }))
        .route("/health", get(health))
        .route("/brokers", get(broker_status))
        .route("/quotes/:exchange/:symbol", get(get_quote))
        .route("/orders", get(all_orders).post(place_order))
        .route("/orders/:broker/:order_id", delete(cancel_order))
        .route("/positions", get(all_positions))
        .route("/holdings", get(all_holdings))
        .route("/pnl", get(total_pnl))
        .route("/subscriptions", post(subscribe).delete(unsubscribe))
        .route("/paper/enable", post(paper_enable))
        .route("/paper/disable", post(paper_disable))
        .route("/paper/reset", post(paper_reset))
        .route("/paper/account", get(paper_account))
        .route("/paper/statistics", get(paper_statistics))
        .layer(TraceLayer::new_for_http())
        .layer(GlobalConcurrencyLimitLayer::new(256))
        .layer(RequestBodyLimitLayer::new(64 * 1024))
        .with_state(service.clone());

    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let shutdown_signal = async {
        let ctrl_c = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C signal"),
                Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                    info!("Received SIGTERM signal");
                }
                Err(e) => error!("Failed to install SIGTERM handler: {}", e),
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Server shutting down gracefully");
    service.shutdown().await;
    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn broker_status(State(service): State<Arc<TradingService>>) -> impl IntoResponse {
    let status: Vec<_> = service
        .auth
        .session_status()
        .await
        .into_iter()
        .map(|s| {
            json!({
                "broker": s.broker.to_string(),
                "authenticated": s.authenticated,
                "expires_at": s.expires_at,
                "degraded": s.degraded,
            })
        })
        .collect();
    Json(json!({ "brokers": status }))
}

async fn get_quote(
    State(service): State<Arc<TradingService>>,
    Path((exchange, symbol)): Path<(String, String)>,
) -> impl IntoResponse {
    let Ok(exchange) = exchange.parse::<Exchange>() else {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "unknown exchange"})));
    };
    let brokers = service.auth.authenticated_brokers().await;
    let Some(broker) = brokers.first().copied() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "no authenticated broker"})),
        );
    };
    match service.market_data.get_quote(broker, &symbol, exchange).await {
        Ok(quote) => (
            StatusCode::OK,
            Json(json!({
                "tick": quote.tick,
                "fetched_at": quote.fetched_at,
                "is_stale": quote.is_stale,
            })),
        ),
        Err(e) => (StatusCode::BAD_GATEWAY, Json(json!({"error": e.to_string()}))),
    }
}

#[derive(Debug, Deserialize)]
struct PlaceOrderBody {
    symbol: String,
    exchange: String,
    side: String,
    order_type: String,
    quantity: f64,
    price: Option<f64>,
    strategy: Option<String>,
}

fn parse_strategy(raw: &str) -> Option<RoutingStrategy> {
    match raw {
        "parallel" => Some(RoutingStrategy::Parallel),
        "best-price" => Some(RoutingStrategy::BestPrice),
        "best-latency" => Some(RoutingStrategy::BestLatency),
        "round-robin" => Some(RoutingStrategy::RoundRobin),
        _ => None,
    }
}

async fn place_order(
    State(service): State<Arc<TradingService>>,
    Json(body): Json<PlaceOrderBody>,
) -> impl IntoResponse {
    let Ok(exchange) = body.exchange.parse::<Exchange>() else {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "unknown exchange"})));
    };
    let side = match body.side.to_uppercase().as_str() {
        "BUY" => OrderSide::Buy,
        "SELL" => OrderSide::Sell,
        _ => return (StatusCode::BAD_REQUEST, Json(json!({"error": "side must be BUY or SELL"}))),
    };
    let order_type = match body.order_type.to_uppercase().as_str() {
        "MARKET" => OrderType::Market,
        "LIMIT" => OrderType::Limit,
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "order_type must be MARKET or LIMIT"})),
            )
        }
    };
    let request = match OrderRequest::new(
        body.symbol, exchange, side, order_type, body.quantity, body.price,
    ) {
        Ok(request) => request,
        Err(e) => return (StatusCode::BAD_REQUEST, Json(json!({"error": e.to_string()}))),
    };
    let strategy = body.strategy.as_deref().and_then(parse_strategy);

    match service.place_order(&request, strategy).await {
        Ok(PlacementResult::Paper { order_id }) => (
            StatusCode::OK,
            Json(json!({"mode": "paper", "order_id": order_id})),
        ),
        Ok(PlacementResult::Live(report)) => {
            let outcomes: Vec<_> = report
                .outcomes
                .iter()
                .map(|o| {
                    json!({
                        "broker": o.broker.to_string(),
                        "result": match &o.result {
                            Ok(order_id) => json!({"order_id": order_id}),
                            Err(e) => json!({"error": e.to_string()}),
                        },
                        "round_trip_ms": o.round_trip.as_millis(),
                    })
                })
                .collect();
            (
                StatusCode::OK,
                Json(json!({
                    "mode": "live",
                    "strategy": report.strategy.to_string(),
                    "outcomes": outcomes,
                })),
            )
        }
        Err(e) => (StatusCode::BAD_GATEWAY, Json(json!({"error": e.to_string()}))),
    }
}

async fn cancel_order(
    State(service): State<Arc<TradingService>>,
    Path((broker, order_id)): Path<(String, String)>,
) -> impl IntoResponse {
    let Ok(broker) = broker.parse::<BrokerId>() else {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "unknown broker"})));
    };
    match service.cancel_order(broker, &order_id).await {
        Ok(()) => (StatusCode::OK, Json(json!({"cancelled": order_id}))),
        Err(e) => (StatusCode::BAD_GATEWAY, Json(json!({"error": e.to_string()}))),
    }
}

async fn all_orders(State(service): State<Arc<TradingService>>) -> impl IntoResponse {
    let orders: Vec<_> = service
        .aggregator
        .all_orders()
        .await
        .into_iter()
        .map(|o| {
            json!({
                "broker": o.broker.to_string(),
                "order_id": o.order_id,
                "symbol": o.symbol,
                "exchange": o.exchange.to_string(),
                "side": o.side.to_string(),
                "quantity": o.quantity.value(),
                "price": o.price.map(|p| p.value()),
                "status": o.status.to_string(),
                "created_at": o.created_at,
            })
        })
        .collect();
    Json(json!({ "orders": orders }))
}

async fn all_positions(State(service): State<Arc<TradingService>>) -> impl IntoResponse {
    let positions: Vec<_> = service
        .aggregator
        .all_positions()
        .await
        .into_iter()
        .map(|p| {
            json!({
                "broker": p.broker.to_string(),
                "symbol": p.symbol,
                "exchange": p.exchange.to_string(),
                "side": p.side.to_string(),
                "quantity": p.quantity.value(),
                "average_price": p.average_price.value(),
                "last_price": p.last_price.map(|x| x.value()),
                "realized_pnl": p.realized_pnl.value(),
                "unrealized_pnl": p.unrealized_pnl().map(|x| x.value()),
            })
        })
        .collect();
    Json(json!({ "positions": positions }))
}

async fn all_holdings(State(service): State<Arc<TradingService>>) -> impl IntoResponse {
    let holdings: Vec<_> = service
        .aggregator
        .all_holdings()
        .await
        .into_iter()
        .map(|h| {
            json!({
                "broker": h.broker.to_string(),
                "symbol": h.symbol,
                "exchange": h.exchange.to_string(),
                "quantity": h.quantity.value(),
                "average_price": h.average_price.value(),
                "market_value": h.market_value(),
            })
        })
        .collect();
    Json(json!({ "holdings": holdings }))
}

async fn total_pnl(State(service): State<Arc<TradingService>>) -> impl IntoResponse {
    let total = service.aggregator.total_pnl().await;
    Json(json!({ "total_pnl": total.value() }))
}

#[derive(Debug, Deserialize)]
struct SubscriptionBody {
    broker: String,
    exchange: String,
    symbols: Vec<String>,
    mode: Option<String>,
}

async fn subscribe(
    State(service): State<Arc<TradingService>>,
    Json(body): Json<SubscriptionBody>,
) -> impl IntoResponse {
    let (Ok(broker), Ok(exchange)) = (body.broker.parse::<BrokerId>(), body.exchange.parse::<Exchange>())
    else {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "unknown broker or exchange"})));
    };
    let mode = match body.mode.as_deref() {
        Some("ltp") => SubscriptionMode::Ltp,
        Some("full") => SubscriptionMode::Full,
        _ => SubscriptionMode::Quote,
    };
    let symbols: Vec<(String, Exchange)> =
        body.symbols.into_iter().map(|s| (s, exchange)).collect();
    match service.watch(broker, &symbols, mode).await {
        Ok(()) => (StatusCode::OK, Json(json!({"subscribed": symbols.len()}))),
        Err(e) => (StatusCode::BAD_GATEWAY, Json(json!({"error": e.to_string()}))),
    }
}

async fn unsubscribe(
    State(service): State<Arc<TradingService>>,
    Json(body): Json<SubscriptionBody>,
) -> impl IntoResponse {
    let (Ok(broker), Ok(exchange)) = (body.broker.parse::<BrokerId>(), body.exchange.parse::<Exchange>())
    else {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "unknown broker or exchange"})));
    };
    let symbols: Vec<(String, Exchange)> =
        body.symbols.into_iter().map(|s| (s, exchange)).collect();
    match service.unwatch(broker, &symbols).await {
        Ok(()) => (StatusCode::OK, Json(json!({"unsubscribed": symbols.len()}))),
        Err(e) => (StatusCode::BAD_GATEWAY, Json(json!({"error": e.to_string()}))),
    }
}

async fn paper_enable(State(service): State<Arc<TradingService>>) -> impl IntoResponse {
    service.paper.enable();
    Json(json!({"paper": true}))
}

async fn paper_disable(State(service): State<Arc<TradingService>>) -> impl IntoResponse {
    service.paper.disable();
    Json(json!({"paper": false}))
}

#[derive(Debug, Deserialize)]
struct ResetBody {
    initial_balance: f64,
}

async fn paper_reset(
    State(service): State<Arc<TradingService>>,
    Json(body): Json<ResetBody>,
) -> impl IntoResponse {
    match service.paper.reset_account(body.initial_balance).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({"balance": body.initial_balance})),
        ),
        Err(e) => (StatusCode::BAD_REQUEST, Json(json!({"error": e.to_string()}))),
    }
}

async fn paper_account(State(service): State<Arc<TradingService>>) -> impl IntoResponse {
    let positions: Vec<_> = service
        .paper
        .positions()
        .await
        .into_iter()
        .map(|p| {
            json!({
                "symbol": p.symbol,
                "exchange": p.exchange.to_string(),
                "side": p.side.to_string(),
                "quantity": p.quantity.value(),
                "average_price": p.average_price.value(),
                "unrealized_pnl": p.unrealized_pnl().map(|x| x.value()),
            })
        })
        .collect();
    Json(json!({
        "enabled": service.paper.is_enabled(),
        "balance": service.paper.balance().await,
        "equity": service.paper.equity().await,
        "positions": positions,
        "open_orders": service.paper.open_order_count().await,
    }))
}

async fn paper_statistics(State(service): State<Arc<TradingService>>) -> impl IntoResponse {
    let stats = service.paper.statistics().await;
    Json(json!({
        "total_trades": stats.total_trades,
        "winning_trades": stats.winning_trades,
        "losing_trades": stats.losing_trades,
        "win_rate": stats.win_rate,
        "profit_factor": stats.profit_factor_display(),
        "expectancy": stats.expectancy,
        "kelly_fraction": stats.kelly_fraction,
        "sharpe_ratio": stats.sharpe_ratio,
        "max_drawdown": stats.max_drawdown,
        "net_pnl": stats.net_pnl,
    }))
}
