use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::handlers::AppState;
use crate::response::timestamp;
use crate::selector::ClientSelector;

/// Reported in place of the store error outside development
const STORE_UNREACHABLE: &str = "unreachable";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub environment: String,
    pub mode: String,
    pub services: Services,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Services {
    pub api: ApiServiceStatus,
    pub rate_limit_store: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiServiceStatus {
    #[serde(rename = "type")]
    pub client_type: String,
    pub has_valid_api_key: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessStatus {
    pub status: String,
    pub timestamp: String,
    pub checks: ReadinessChecks,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessChecks {
    pub rate_limit_store: ServiceStatus,
    pub backend: ServiceStatus,
    pub configuration: ServiceStatus,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub status: String,
    pub response_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServiceStatus {
    fn ok(response_time_ms: u64, detail: impl Into<String>) -> Self {
        Self {
            status: "ok".to_string(),
            response_time_ms,
            detail: Some(detail.into()),
            error: None,
        }
    }

    fn failed(response_time_ms: u64, error: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            response_time_ms,
            detail: None,
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

pub struct HealthChecker<'a> {
    state: &'a AppState,
}

impl<'a> HealthChecker<'a> {
    pub fn new(state: &'a AppState) -> Self {
        Self { state }
    }

    pub fn check_health(&self) -> HealthStatus {
        let client_info = self.state.selector.describe_selection();

        HealthStatus {
            status: "healthy".to_string(),
            timestamp: timestamp(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.state.started_at.elapsed().as_secs(),
            environment: client_info.environment,
            mode: client_info.mode,
            services: Services {
                api: ApiServiceStatus {
                    client_type: client_info.client_type.as_str().to_string(),
                    has_valid_api_key: client_info.has_valid_api_key,
                },
                rate_limit_store: self.state.limiter.store().kind().to_string(),
            },
        }
    }

    /// Returns the report and whether every check passed
    pub async fn check_readiness(&self) -> (bool, ReadinessStatus) {
        let settings = self.state.selector.settings();
        let rate_limit_store = self.check_store(settings.is_development()).await;

        // Selection degrades to the mock rather than failing, so the backend
        // check reports which client requests will reach.
        let client_info = ClientSelector::describe(&settings);
        let backend = ServiceStatus::ok(0, client_info.client_type.as_str());

        let configuration = match self.state.config.validate() {
            Ok(()) => ServiceStatus::ok(0, "valid"),
            Err(e) => ServiceStatus::failed(0, e.to_string()),
        };

        let ready = rate_limit_store.is_ok() && configuration.is_ok();

        (
            ready,
            ReadinessStatus {
                status: if ready { "ready" } else { "not ready" }.to_string(),
                timestamp: timestamp(),
                checks: ReadinessChecks {
                    rate_limit_store,
                    backend,
                    configuration,
                },
            },
        )
    }

    /// The raw store error only reaches the report in development.
    async fn check_store(&self, expose_detail: bool) -> ServiceStatus {
        let start = Instant::now();
        let store = self.state.limiter.store();

        match store.ping().await {
            Ok(()) => ServiceStatus::ok(start.elapsed().as_millis() as u64, store.kind()),
            Err(e) => {
                tracing::warn!(
                    target: "crime_proxy::health",
                    store = store.kind(),
                    error = %e,
                    "Rate limit store unreachable"
                );
                let reason = if expose_detail {
                    e.to_string()
                } else {
                    STORE_UNREACHABLE.to_string()
                };
                ServiceStatus::failed(start.elapsed().as_millis() as u64, reason)
            }
        }
    }
}
