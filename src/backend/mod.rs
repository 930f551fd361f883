//! Crime-data backends.
//!
//! [`Backend`] is the closed set of data sources the proxy can talk to.
//! Controllers only see the [`CrimeDataSource`] capability and never branch
//! on which variant they were handed.

pub mod mock;
pub mod real;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProxyError;

pub use mock::MockBackend;
pub use real::RealBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IncidentStatus {
    Active,
    #[serde(rename = "Under Investigation")]
    UnderInvestigation,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

/// One reported incident as produced by a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub incident_type: String,
    pub location: String,
    pub date: String,
    pub severity: Severity,
    pub status: IncidentStatus,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub officer_badge: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub witnesses: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    pub success: bool,
    pub results: Vec<IncidentRecord>,
    pub total: usize,
    pub mock: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentDetails {
    pub success: bool,
    pub data: IncidentRecord,
    pub mock: bool,
}

/// Which variant a [`Backend`] is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    Mock,
    Real,
}

impl ClientType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientType::Mock => "mock",
            ClientType::Real => "real",
        }
    }
}

/// Capability shared by every crime-data backend
#[async_trait]
pub trait CrimeDataSource: Send + Sync {
    async fn search_crime_data(
        &self,
        location: &str,
        crime_type: Option<&str>,
    ) -> Result<SearchResults, ProxyError>;

    async fn get_incident_details(&self, incident_id: &str) -> Result<IncidentDetails, ProxyError>;
}

#[derive(Clone)]
pub enum Backend {
    Mock(MockBackend),
    Real(RealBackend),
}

impl Backend {
    pub fn client_type(&self) -> ClientType {
        match self {
            Backend::Mock(_) => ClientType::Mock,
            Backend::Real(_) => ClientType::Real,
        }
    }
}

#[async_trait]
impl CrimeDataSource for Backend {
    async fn search_crime_data(
        &self,
        location: &str,
        crime_type: Option<&str>,
    ) -> Result<SearchResults, ProxyError> {
        match self {
            Backend::Mock(mock) => mock.search_crime_data(location, crime_type).await,
            Backend::Real(real) => real.search_crime_data(location, crime_type).await,
        }
    }

    async fn get_incident_details(&self, incident_id: &str) -> Result<IncidentDetails, ProxyError> {
        match self {
            Backend::Mock(mock) => mock.get_incident_details(incident_id).await,
            Backend::Real(real) => real.get_incident_details(incident_id).await,
        }
    }
}
