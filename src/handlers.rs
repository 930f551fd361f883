//! Request controllers.
//!
//! Each crime endpoint runs validate → rate-limit → select backend → call
//! backend → shape response, stopping at the first failure. Validation runs
//! before any counter is touched.

use axum::extract::rejection::{PathRejection, QueryRejection};
use axum::extract::{OriginalUri, Path, Query, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::sync::Arc;
use std::time::Instant;

use crate::backend::{CrimeDataSource, MockBackend};
use crate::config::Config;
use crate::error::{ApiError, FieldError, ProxyError};
use crate::health::HealthChecker;
use crate::middleware::ClientIp;
use crate::rate_limiter::{RateLimitDecision, RateLimitStore, RateLimitTier, RateLimiter};
use crate::response::{timestamp, ApiInfo, ApiResponse, IncidentMeta, RouteNotFound, SearchMeta};
use crate::retry::{RetryClient, RetryPolicy, Sleeper, Transport};
use crate::sanitize::sanitize;
use crate::selector::{ClientSelector, ModeSettings, ModeSource};
use crate::validation::{RequestValidator, SearchParams};

/// Shared application state
pub type SharedState = Arc<AppState>;

/// Everything a request needs. The rate-limit counters inside `limiter` are
/// the only state shared across requests.
pub struct AppState {
    pub config: Config,
    pub limiter: RateLimiter,
    pub selector: ClientSelector,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn RateLimitStore>,
        modes: Arc<dyn ModeSource>,
        transport: Arc<dyn Transport>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        let limiter = RateLimiter::from_config(store, &config);
        let retry = RetryClient::new(transport, sleeper.clone(), RetryPolicy::from_config(&config));
        let mock = MockBackend::new(sleeper, config.mock_latency);
        let selector = ClientSelector::new(modes, mock, retry, config.upstream_base_url.clone());

        Self {
            config,
            limiter,
            selector,
            started_at: Instant::now(),
        }
    }
}

const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";

fn with_rate_limit_headers(mut response: Response, decision: Option<RateLimitDecision>) -> Response {
    if let Some(decision) = decision {
        let headers = response.headers_mut();
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
        headers.insert(X_RATELIMIT_RESET, HeaderValue::from(decision.reset_secs()));
    }
    response
}

/// Binds errors of one request to its path and the environment's detail policy
struct Failure<'a> {
    path: &'a str,
    expose_detail: bool,
}

impl<'a> Failure<'a> {
    fn new(uri: &'a OriginalUri, settings: &ModeSettings) -> Self {
        Self {
            path: uri.0.path(),
            expose_detail: settings.is_development(),
        }
    }

    fn wrap(&self, error: ProxyError) -> ApiError {
        ApiError::new(error, self.path, self.expose_detail)
    }

    fn rejected(&self, error: ProxyError, client_ip: &str) -> ApiError {
        if let ProxyError::Validation(details) = &error {
            let fields: Vec<&str> = details.iter().map(|d| d.field.as_str()).collect();
            tracing::warn!(
                target: "crime_proxy::handlers",
                path = %self.path,
                client_ip = %client_ip,
                fields = ?fields,
                "Validation failed"
            );
        }
        self.wrap(error)
    }
}

/// `GET /api/crime/search`
pub async fn search_crime(
    State(state): State<SharedState>,
    uri: OriginalUri,
    ClientIp(client_ip): ClientIp,
    query: Result<Query<SearchParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    let settings = state.selector.settings();
    let failure = Failure::new(&uri, &settings);

    let params = match query {
        Ok(Query(params)) => params,
        Err(rejection) => {
            return Err(failure.rejected(
                ProxyError::Validation(vec![FieldError {
                    field: "query".to_string(),
                    message: rejection.body_text(),
                    rejected_value: None,
                }]),
                &client_ip,
            ))
        }
    };

    let query = RequestValidator::validate_search(params)
        .map_err(|e| failure.rejected(e, &client_ip))?;

    let decision = state
        .limiter
        .check_all(&[RateLimitTier::General, RateLimitTier::Search], &client_ip)
        .await
        .map_err(|e| failure.wrap(e))?;

    let backend = state.selector.select_with(&settings);
    let data = backend
        .search_crime_data(&query.location, query.crime_type.as_deref())
        .await
        .map_err(|e| failure.wrap(e))?;

    tracing::info!(
        target: "crime_proxy::handlers",
        client_ip = %client_ip,
        client_type = backend.client_type().as_str(),
        results = data.total,
        "Search completed"
    );

    let meta = SearchMeta {
        location: sanitize(&query.location),
        crime_type: query.crime_type.as_deref().map(sanitize),
        timestamp: timestamp(),
        client_info: ClientSelector::describe(&settings),
    };

    Ok(with_rate_limit_headers(
        Json(ApiResponse::ok(data, meta)).into_response(),
        decision,
    ))
}

/// `GET /api/crime/incident/:incident_id`
pub async fn get_incident(
    State(state): State<SharedState>,
    uri: OriginalUri,
    ClientIp(client_ip): ClientIp,
    path: Result<Path<String>, PathRejection>,
) -> Result<Response, ApiError> {
    let settings = state.selector.settings();
    let failure = Failure::new(&uri, &settings);

    let incident_id = match path {
        Ok(Path(incident_id)) => incident_id,
        Err(rejection) => {
            return Err(failure.rejected(
                ProxyError::Validation(vec![FieldError {
                    field: "incidentId".to_string(),
                    message: rejection.body_text(),
                    rejected_value: None,
                }]),
                &client_ip,
            ))
        }
    };

    let incident_id = RequestValidator::validate_incident_id(&incident_id)
        .map_err(|e| failure.rejected(e, &client_ip))?;

    let decision = state
        .limiter
        .check_all(&[RateLimitTier::General, RateLimitTier::Detail], &client_ip)
        .await
        .map_err(|e| failure.wrap(e))?;

    let backend = state.selector.select_with(&settings);
    let data = backend
        .get_incident_details(&incident_id)
        .await
        .map_err(|e| {
            if matches!(e, ProxyError::NotFound(_)) {
                tracing::info!(
                    target: "crime_proxy::handlers",
                    client_ip = %client_ip,
                    "Incident not found"
                );
            }
            failure.wrap(e)
        })?;

    let meta = IncidentMeta {
        incident_id,
        timestamp: timestamp(),
        client_info: ClientSelector::describe(&settings),
    };

    Ok(with_rate_limit_headers(
        Json(ApiResponse::ok(data, meta)).into_response(),
        decision,
    ))
}

/// `GET /api`
pub async fn api_info(
    State(state): State<SharedState>,
    uri: OriginalUri,
    ClientIp(client_ip): ClientIp,
) -> Result<Response, ApiError> {
    let settings = state.selector.settings();
    let failure = Failure::new(&uri, &settings);

    let decision = state
        .limiter
        .check(RateLimitTier::General, &client_ip)
        .await
        .map_err(|e| failure.wrap(e))?;

    let info = ApiInfo::current(&ClientSelector::describe(&settings));
    Ok(with_rate_limit_headers(Json(info).into_response(), Some(decision)))
}

/// `GET /health`
pub async fn health_check(State(state): State<SharedState>) -> impl IntoResponse {
    Json(HealthChecker::new(&state).check_health())
}

/// `GET /readiness`
pub async fn readiness_check(State(state): State<SharedState>) -> impl IntoResponse {
    let (ready, report) = HealthChecker::new(&state).check_readiness().await;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

/// Fallback for unmatched routes
pub async fn route_not_found(method: Method, uri: OriginalUri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(RouteNotFound::new(uri.0.path(), method.as_str())),
    )
}
