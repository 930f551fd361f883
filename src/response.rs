use serde::Serialize;

use crate::selector::ClientModeState;

/// Success envelope shared by the crime endpoints
#[derive(Debug, Serialize)]
pub struct ApiResponse<T, M> {
    pub success: bool,
    pub data: T,
    pub meta: M,
}

impl<T, M> ApiResponse<T, M> {
    pub fn ok(data: T, meta: M) -> Self {
        Self {
            success: true,
            data,
            meta,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchMeta {
    pub location: String,
    pub crime_type: Option<String>,
    pub timestamp: String,
    pub client_info: ClientModeState,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentMeta {
    pub incident_id: String,
    pub timestamp: String,
    pub client_info: ClientModeState,
}

#[derive(Debug, Serialize)]
pub struct EndpointInfo {
    pub method: &'static str,
    pub path: &'static str,
    pub description: &'static str,
}

/// Body of `GET /api`
#[derive(Debug, Serialize)]
pub struct ApiInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub description: &'static str,
    pub mode: String,
    pub environment: String,
    pub endpoints: Vec<EndpointInfo>,
}

impl ApiInfo {
    pub fn current(client_info: &ClientModeState) -> Self {
        Self {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            description: env!("CARGO_PKG_DESCRIPTION"),
            mode: client_info.mode.clone(),
            environment: client_info.environment.clone(),
            endpoints: vec![
                EndpointInfo {
                    method: "GET",
                    path: "/api/crime/search",
                    description: "Search incidents by location and optional crimeType",
                },
                EndpointInfo {
                    method: "GET",
                    path: "/api/crime/incident/:incidentId",
                    description: "Fetch a single incident",
                },
                EndpointInfo {
                    method: "GET",
                    path: "/health",
                    description: "Service health",
                },
                EndpointInfo {
                    method: "GET",
                    path: "/readiness",
                    description: "Dependency readiness",
                },
            ],
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RouteNotFound {
    pub error: &'static str,
    pub path: String,
    pub method: String,
}

impl RouteNotFound {
    pub fn new(path: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            error: "Route not found",
            path: path.into(),
            method: method.into(),
        }
    }
}

pub fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ClientType;

    #[test]
    fn test_search_envelope_shape() {
        let meta = SearchMeta {
            location: "downtown".to_string(),
            crime_type: None,
            timestamp: "2024-01-15T00:00:00+00:00".to_string(),
            client_info: ClientModeState {
                mode: "mock".to_string(),
                has_valid_api_key: false,
                client_type: ClientType::Mock,
                environment: "test".to_string(),
            },
        };

        let value = serde_json::to_value(ApiResponse::ok(serde_json::json!([]), meta)).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["meta"]["location"], "downtown");
        assert!(value["meta"]["crimeType"].is_null());
        assert_eq!(value["meta"]["clientInfo"]["clientType"], "mock");
    }

    #[test]
    fn test_route_not_found_shape() {
        let value = serde_json::to_value(RouteNotFound::new("/nope", "POST")).unwrap();
        assert_eq!(value["error"], "Route not found");
        assert_eq!(value["path"], "/nope");
        assert_eq!(value["method"], "POST");
    }
}
