use async_trait::async_trait;
use rand::Rng;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use super::{
    Coordinates, CrimeDataSource, IncidentDetails, IncidentRecord, IncidentStatus, SearchResults,
    Severity,
};
use crate::error::ProxyError;
use crate::retry::Sleeper;

const SEARCH_LATENCY_MS: RangeInclusive<u64> = 100..=300;
const DETAIL_LATENCY_MS: RangeInclusive<u64> = 150..=250;

static INCIDENTS: LazyLock<Vec<IncidentRecord>> = LazyLock::new(fixed_incidents);

/// Deterministic stand-in for the upstream provider.
///
/// Answers from a fixed in-memory dataset after a short randomized delay so
/// callers see realistic loading behaviour without a network.
#[derive(Clone)]
pub struct MockBackend {
    sleeper: Arc<dyn Sleeper>,
    simulate_latency: bool,
    invocations: Arc<AtomicU64>,
}

impl MockBackend {
    pub fn new(sleeper: Arc<dyn Sleeper>, simulate_latency: bool) -> Self {
        Self {
            sleeper,
            simulate_latency,
            invocations: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of backend calls served so far, across all clones
    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    pub fn incidents() -> &'static [IncidentRecord] {
        &INCIDENTS
    }

    async fn simulate_delay(&self, range: RangeInclusive<u64>) {
        if !self.simulate_latency {
            return;
        }
        let millis = rand::thread_rng().gen_range(range);
        self.sleeper.sleep(Duration::from_millis(millis)).await;
    }
}

#[async_trait]
impl CrimeDataSource for MockBackend {
    async fn search_crime_data(
        &self,
        location: &str,
        crime_type: Option<&str>,
    ) -> Result<SearchResults, ProxyError> {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        self.simulate_delay(SEARCH_LATENCY_MS).await;

        let location = location.to_lowercase();
        let crime_type = crime_type.map(str::to_lowercase);

        let results: Vec<IncidentRecord> = INCIDENTS
            .iter()
            .filter(|record| record.location.to_lowercase().contains(&location))
            .filter(|record| {
                crime_type
                    .as_deref()
                    .map_or(true, |t| record.incident_type.to_lowercase().contains(t))
            })
            .cloned()
            .collect();

        tracing::debug!(
            target: "crime_proxy::backend::mock",
            matches = results.len(),
            "Mock search served"
        );

        Ok(SearchResults {
            success: true,
            total: results.len(),
            results,
            mock: true,
        })
    }

    async fn get_incident_details(&self, incident_id: &str) -> Result<IncidentDetails, ProxyError> {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        self.simulate_delay(DETAIL_LATENCY_MS).await;

        let record = INCIDENTS
            .iter()
            .find(|record| record.id == incident_id)
            .cloned()
            .ok_or_else(|| ProxyError::NotFound("Incident not found".to_string()))?;

        Ok(IncidentDetails {
            success: true,
            data: record,
            mock: true,
        })
    }
}

fn fixed_incidents() -> Vec<IncidentRecord> {
    vec![
        IncidentRecord {
            id: "INC-001".to_string(),
            incident_type: "Theft".to_string(),
            location: "Downtown - Main Street".to_string(),
            date: "2024-01-15".to_string(),
            severity: Severity::Medium,
            status: IncidentStatus::UnderInvestigation,
            description: "Bicycle stolen from public rack outside the library".to_string(),
            coordinates: Some(Coordinates {
                lat: 40.7128,
                lng: -74.0060,
            }),
            time: Some("14:30".to_string()),
            officer_badge: Some("B-4821".to_string()),
            case_number: Some("CASE-2024-0115".to_string()),
            witnesses: Some(2),
            evidence: Some(vec![
                "Security camera footage".to_string(),
                "Cut lock".to_string(),
            ]),
        },
        IncidentRecord {
            id: "INC-002".to_string(),
            incident_type: "Burglary".to_string(),
            location: "Westside Residential".to_string(),
            date: "2024-01-14".to_string(),
            severity: Severity::High,
            status: IncidentStatus::Active,
            description: "Forced entry through rear window of a single-family home".to_string(),
            coordinates: Some(Coordinates {
                lat: 40.7306,
                lng: -74.0302,
            }),
            time: Some("02:15".to_string()),
            officer_badge: Some("B-3310".to_string()),
            case_number: Some("CASE-2024-0114".to_string()),
            witnesses: Some(0),
            evidence: Some(vec!["Fingerprints".to_string(), "Shoe prints".to_string()]),
        },
        IncidentRecord {
            id: "INC-003".to_string(),
            incident_type: "Vandalism".to_string(),
            location: "Downtown - City Park".to_string(),
            date: "2024-01-13".to_string(),
            severity: Severity::Low,
            status: IncidentStatus::Closed,
            description: "Graffiti on the park pavilion".to_string(),
            coordinates: Some(Coordinates {
                lat: 40.7150,
                lng: -74.0090,
            }),
            time: Some("23:45".to_string()),
            officer_badge: Some("B-2207".to_string()),
            case_number: Some("CASE-2024-0113".to_string()),
            witnesses: Some(1),
            evidence: Some(vec!["Photographs".to_string()]),
        },
        IncidentRecord {
            id: "INC-004".to_string(),
            incident_type: "Vehicle Theft".to_string(),
            location: "Northgate Shopping Center".to_string(),
            date: "2024-01-12".to_string(),
            severity: Severity::High,
            status: IncidentStatus::UnderInvestigation,
            description: "Sedan taken from the north parking structure".to_string(),
            coordinates: Some(Coordinates {
                lat: 40.7580,
                lng: -73.9855,
            }),
            time: Some("18:05".to_string()),
            officer_badge: Some("B-4821".to_string()),
            case_number: Some("CASE-2024-0112".to_string()),
            witnesses: Some(3),
            evidence: Some(vec!["Parking garage footage".to_string()]),
        },
        IncidentRecord {
            id: "INC-005".to_string(),
            incident_type: "Assault".to_string(),
            location: "Downtown - 5th Avenue".to_string(),
            date: "2024-01-11".to_string(),
            severity: Severity::High,
            status: IncidentStatus::Active,
            description: "Altercation outside a bar, one person treated for injuries".to_string(),
            coordinates: None,
            time: Some("01:20".to_string()),
            officer_badge: None,
            case_number: Some("CASE-2024-0111".to_string()),
            witnesses: Some(4),
            evidence: None,
        },
        IncidentRecord {
            id: "INC-006".to_string(),
            incident_type: "Theft".to_string(),
            location: "Riverside Apartments".to_string(),
            date: "2024-01-10".to_string(),
            severity: Severity::Low,
            status: IncidentStatus::Closed,
            description: "Package taken from a building lobby".to_string(),
            coordinates: None,
            time: None,
            officer_badge: None,
            case_number: None,
            witnesses: None,
            evidence: None,
        },
    ]
}
