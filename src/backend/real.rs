use async_trait::async_trait;
use serde_json::Value;

use super::{CrimeDataSource, IncidentDetails, IncidentRecord, SearchResults};
use crate::error::ProxyError;
use crate::retry::{OutboundRequest, RetryClient, UpstreamResponse};
use crate::sanitize::sanitize;
use crate::selector::validate_api_key;

const API_KEY_HEADER: &str = "X-API-Key";

/// Adapter for the upstream crime-data provider.
#[derive(Clone)]
pub struct RealBackend {
    client: RetryClient,
    base_url: String,
    api_key: String,
}

impl RealBackend {
    pub fn new(client: RetryClient, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    /// Refuses to go to the network with a missing or placeholder key,
    /// independent of what the selector decided.
    fn ensure_credential(&self) -> Result<(), ProxyError> {
        if validate_api_key(Some(&self.api_key)) {
            Ok(())
        } else {
            Err(ProxyError::Configuration(
                "Real backend requires a valid API key".to_string(),
            ))
        }
    }

    fn request(&self, path: &str) -> OutboundRequest {
        OutboundRequest::get(format!("{}{}", self.base_url, path))
            .header(API_KEY_HEADER, self.api_key.as_str())
            .header("Accept", "application/json")
    }

    async fn send(&self, request: OutboundRequest) -> Result<UpstreamResponse, ProxyError> {
        self.client
            .request_with_retry(&request)
            .await
            .map_err(|e| ProxyError::UpstreamUnavailable(e.to_string()))
    }
}

#[async_trait]
impl CrimeDataSource for RealBackend {
    async fn search_crime_data(
        &self,
        location: &str,
        crime_type: Option<&str>,
    ) -> Result<SearchResults, ProxyError> {
        self.ensure_credential()?;

        let mut request = self
            .request("/crimes/search")
            .query("location", sanitize(location));
        if let Some(crime_type) = crime_type {
            request = request.query("crimeType", sanitize(crime_type));
        }

        let response = self.send(request).await?;
        if !response.is_success() {
            return Err(ProxyError::UpstreamUnavailable(format!(
                "search returned HTTP {}",
                response.status
            )));
        }

        let (results, total) = parse_search_body(response.body)?;
        Ok(SearchResults {
            success: true,
            results,
            total,
            mock: false,
        })
    }

    async fn get_incident_details(&self, incident_id: &str) -> Result<IncidentDetails, ProxyError> {
        self.ensure_credential()?;

        let request = self.request(&format!("/incidents/{}", sanitize(incident_id)));
        let response = self.send(request).await?;

        if response.status == 404 {
            return Err(ProxyError::NotFound("Incident not found".to_string()));
        }
        if !response.is_success() {
            return Err(ProxyError::UpstreamUnavailable(format!(
                "incident lookup returned HTTP {}",
                response.status
            )));
        }

        Ok(IncidentDetails {
            success: true,
            data: parse_incident_body(response.body)?,
            mock: false,
        })
    }
}

/// Accepts `{results: [...], total}`, the feed-style `{incidents: [...]}`
/// or a bare array.
fn parse_search_body(body: Value) -> Result<(Vec<IncidentRecord>, usize), ProxyError> {
    let (records, total) = match body {
        Value::Array(items) => (Value::Array(items), None),
        Value::Object(mut map) => {
            let total = map.get("total").and_then(Value::as_u64).map(|t| t as usize);
            let records = map
                .remove("results")
                .or_else(|| map.remove("incidents"))
                .unwrap_or(Value::Array(Vec::new()));
            (records, total)
        }
        _ => return Err(malformed("search body is neither an object nor an array")),
    };

    let results: Vec<IncidentRecord> =
        serde_json::from_value(records).map_err(|e| malformed(&e.to_string()))?;
    let total = total.unwrap_or(results.len());

    Ok((results, total))
}

/// Accepts `{data: {...}}` or a bare record.
fn parse_incident_body(body: Value) -> Result<IncidentRecord, ProxyError> {
    let record = match body {
        Value::Object(mut map) if map.contains_key("data") => map.remove("data").unwrap_or_default(),
        other => other,
    };

    serde_json::from_value(record).map_err(|e| malformed(&e.to_string()))
}

fn malformed(reason: &str) -> ProxyError {
    ProxyError::UpstreamUnavailable(format!("malformed upstream response: {}", reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::{RetryPolicy, TokioSleeper, Transport, TransportError};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio_util::sync::CancellationToken;

    struct CapturingTransport {
        calls: AtomicUsize,
        last: Mutex<Option<OutboundRequest>>,
        reply: UpstreamResponse,
    }

    #[async_trait]
    impl Transport for CapturingTransport {
        async fn send(
            &self,
            request: &OutboundRequest,
            _cancel: CancellationToken,
        ) -> Result<UpstreamResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.lock().unwrap() = Some(request.clone());
            Ok(self.reply.clone())
        }
    }

    fn backend(api_key: &str, status: u16, body: Value) -> (Arc<CapturingTransport>, RealBackend) {
        let transport = Arc::new(CapturingTransport {
            calls: AtomicUsize::new(0),
            last: Mutex::new(None),
            reply: UpstreamResponse::new(status, body),
        });
        let client = RetryClient::new(transport.clone(), Arc::new(TokioSleeper), RetryPolicy::default());
        (transport, RealBackend::new(client, "http://upstream/v1/", api_key))
    }

    fn record_json(id: &str) -> Value {
        json!({
            "id": id,
            "type": "Theft",
            "location": "Downtown",
            "date": "2024-01-15",
            "severity": "Low",
            "status": "Active",
            "description": "test"
        })
    }

    #[tokio::test]
    async fn test_invalid_key_fails_before_network() {
        let (transport, backend) = backend("your_api_key_here", 200, json!([]));

        let err = backend.search_crime_data("downtown", None).await.unwrap_err();
        assert!(matches!(err, ProxyError::Configuration(_)));
        assert!(backend.get_incident_details("INC-001").await.is_err());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_search_sanitizes_and_attaches_key() {
        let (transport, backend) =
            backend("valid-api-key-12345", 200, json!({"results": [record_json("A-1")], "total": 7}));

        let results = backend
            .search_crime_data(" <b>downtown</b> ", Some("theft onclick="))
            .await
            .unwrap();
        assert_eq!(results.total, 7);
        assert!(!results.mock);

        let request = transport.last.lock().unwrap().clone().unwrap();
        assert_eq!(request.url, "http://upstream/v1/crimes/search");
        assert!(request
            .query
            .contains(&("location".to_string(), "bdowntown/b".to_string())));
        assert!(request.query.contains(&("crimeType".to_string(), "theft".to_string())));
        assert!(request
            .headers
            .contains(&(API_KEY_HEADER.to_string(), "valid-api-key-12345".to_string())));
    }

    #[tokio::test]
    async fn test_search_accepts_bare_array() {
        let (_, backend) = backend(
            "valid-api-key-12345",
            200,
            json!([record_json("A-1"), record_json("A-2")]),
        );

        let results = backend.search_crime_data("downtown", None).await.unwrap();
        assert_eq!(results.total, 2);
    }

    #[tokio::test]
    async fn test_search_accepts_incident_feed_envelope() {
        let (_, backend) = backend(
            "valid-api-key-12345",
            200,
            json!({"incidents": [record_json("F-1"), record_json("F-2"), record_json("F-3")]}),
        );

        let results = backend.search_crime_data("downtown", None).await.unwrap();
        assert_eq!(results.total, 3);
        assert_eq!(results.results[2].id, "F-3");
    }

    #[tokio::test]
    async fn test_upstream_404_is_not_found() {
        let (_, backend) = backend("valid-api-key-12345", 404, Value::Null);

        let err = backend.get_incident_details("INC-404").await.unwrap_err();
        assert!(matches!(err, ProxyError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_incident_accepts_wrapped_record() {
        let (transport, backend) =
            backend("valid-api-key-12345", 200, json!({"data": record_json("INC-010")}));

        let details = backend.get_incident_details("INC-010").await.unwrap();
        assert_eq!(details.data.id, "INC-010");
        assert_eq!(
            transport.last.lock().unwrap().as_ref().unwrap().url,
            "http://upstream/v1/incidents/INC-010"
        );
    }

    #[tokio::test]
    async fn test_malformed_body_is_upstream_failure() {
        let (_, backend) = backend("valid-api-key-12345", 200, json!({"results": "nope"}));

        let err = backend.search_crime_data("downtown", None).await.unwrap_err();
        assert!(matches!(err, ProxyError::UpstreamUnavailable(_)));
    }
}
