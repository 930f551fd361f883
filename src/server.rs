use crate::config::Config;
use crate::error::ProxyError;
use crate::handlers::{
    api_info, get_incident, health_check, readiness_check, route_not_found, search_crime, AppState,
    SharedState,
};
use crate::middleware::logging_middleware;
use crate::rate_limiter::{MemoryStore, RateLimitStore};
use crate::redis::RedisStore;
use crate::retry::{HttpTransport, TokioSleeper};
use crate::selector::{EnvModeSource, Mode};
use axum::routing::get;
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the router around an already assembled state
pub fn create_app(state: SharedState) -> Router {
    Router::new()
        .route("/api/crime/search", get(search_crime))
        .route("/api/crime/incident/:incident_id", get(get_incident))
        .route("/api", get(api_info))
        // Probes and the 404 fallback are not counted against any rate-limit tier.
        .route("/health", get(health_check))
        .route("/readiness", get(readiness_check))
        .fallback(route_not_found)
        .with_state(state.clone())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn_with_state(state, logging_middleware)),
        )
}

/// Production wiring: counters in Redis when configured, otherwise in memory;
/// mode and credential read from the environment per request.
pub fn build_state(config: Config, mode_override: Option<Mode>) -> Result<AppState, ProxyError> {
    config.validate()?;

    let store: Arc<dyn RateLimitStore> = match config.redis_url() {
        Some(url) => {
            tracing::info!("Using Redis rate limit store");
            Arc::new(RedisStore::new(url)?)
        }
        None => {
            tracing::info!("Using in-memory rate limit store");
            Arc::new(MemoryStore::new())
        }
    };

    let modes = Arc::new(match mode_override {
        Some(mode) => EnvModeSource::with_mode_override(mode),
        None => EnvModeSource::new(),
    });

    let http = reqwest::Client::builder()
        .timeout(config.request_timeout())
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ProxyError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

    Ok(AppState::new(
        config,
        store,
        modes,
        Arc::new(HttpTransport::with_client(http)),
        Arc::new(TokioSleeper),
    ))
}

pub struct Server {
    state: SharedState,
    bind_addr: SocketAddr,
}

impl Server {
    pub fn new(config: Config, mode_override: Option<Mode>) -> Result<Self, ProxyError> {
        let bind_addr = config.bind_addr;
        let state = Arc::new(build_state(config, mode_override)?);

        Ok(Self { state, bind_addr })
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;

        let client_info = self.state.selector.describe_selection();
        tracing::info!("Crime proxy listening on {}", self.bind_addr);
        tracing::info!(
            mode = %client_info.mode,
            client_type = client_info.client_type.as_str(),
            environment = %client_info.environment,
            "Initial backend selection"
        );

        let cleanup = spawn_cleanup(self.state.clone());
        let app = create_app(self.state);

        // Run server with graceful shutdown
        let served = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await;

        cleanup.abort();
        served?;

        Ok(())
    }
}

/// Periodically drop expired counters so idle clients don't accumulate
fn spawn_cleanup(state: SharedState) -> JoinHandle<()> {
    let period = state.config.cleanup_interval().max(Duration::from_secs(1));

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;

        loop {
            interval.tick().await;
            match state.limiter.store().purge_expired().await {
                Ok(0) => {}
                Ok(removed) => tracing::debug!(removed, "Purged expired rate limit counters"),
                Err(e) => tracing::warn!(error = %e, "Rate limit counter cleanup failed"),
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
