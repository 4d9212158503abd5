use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::get,
    Router,
};
use std::{sync::Arc, time::Duration};
use storefront_api::{
    config, db,
    events::{self, EventSender},
    metrics,
    payments::StripeGateway,
    tracing as request_tracing, AppState,
};
use tokio::{net::TcpListener, signal, sync::mpsc};
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
};
use tracing::{error, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = config::load_config()?;
    config::init_tracing(config.log_level(), config.log_json);
    info!(
        environment = %config.environment,
        "Starting storefront-api v{}",
        env!("CARGO_PKG_VERSION")
    );

    let db = Arc::new(db::establish_connection_from_app_config(&config).await?);

    let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    tokio::spawn(events::process_events(event_rx));
    let event_sender = Arc::new(EventSender::new(event_tx));

    if config.stripe_secret_key.is_none() {
        warn!("No payment gateway key configured; checkout will fail until one is set");
    }
    if config.stripe_webhook_secret.is_none() {
        warn!("No webhook secret configured; webhook deliveries will be rejected");
    }
    let gateway = Arc::new(StripeGateway::new(
        config.stripe_secret_key.clone().unwrap_or_default(),
    ));

    let config = Arc::new(config);
    let state = AppState::new(db, config.clone(), gateway, event_sender);

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/metrics", get(|| async { metrics::render() }))
        .nest("/api", storefront_api::api_routes())
        .layer(middleware::from_fn(request_tracing::request_id_middleware))
        .layer(request_tracing::configure_http_tracing())
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.request_timeout_secs,
        )))
        .layer(CompressionLayer::new())
        .layer(cors_layer(&config))
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

fn cors_layer(config: &config::AppConfig) -> CorsLayer {
    if config.should_allow_permissive_cors() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .as_deref()
        .unwrap_or("")
        .split(',')
        .filter_map(|origin| {
            let origin = origin.trim();
            if origin.is_empty() {
                return None;
            }
            match origin.parse::<HeaderValue>() {
                Ok(value) => Some(value),
                Err(_) => {
                    error!(origin, "Ignoring unparseable CORS origin");
                    None
                }
            }
        })
        .collect();

    if origins.is_empty() {
        warn!("No CORS origins configured; cross-origin requests will be refused");
    }

    // Wildcards cannot be combined with credentials, so the production
    // layer names its methods and headers explicitly.
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::COOKIE])
        .allow_credentials(true)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", err);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => error!("Failed to install SIGTERM handler: {}", err),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received ctrl-c, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
