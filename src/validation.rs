use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use validator::{Validate, ValidationErrors};

use crate::error::{FieldError, ProxyError};

static LOCATION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9,.\- ]+$").expect("location pattern"));

static CRIME_TYPE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z\- ]+$").expect("crime type pattern"));

static INCIDENT_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9-]+$").expect("incident id pattern"));

/// Raw query string of `GET /api/crime/search`.
#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    pub location: Option<String>,
    #[serde(rename = "crimeType")]
    pub crime_type: Option<String>,
}

/// A search request that has passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub location: String,
    pub crime_type: Option<String>,
}

#[derive(Debug, Validate)]
struct SearchRules {
    #[validate(
        required(message = "Location is required"),
        length(min = 2, max = 100, message = "Location must be between 2 and 100 characters"),
        regex(path = *LOCATION_PATTERN, message = "Location contains invalid characters")
    )]
    location: Option<String>,

    #[validate(
        length(min = 2, max = 50, message = "Crime type must be between 2 and 50 characters"),
        regex(path = *CRIME_TYPE_PATTERN, message = "Crime type contains invalid characters")
    )]
    crime_type: Option<String>,
}

#[derive(Debug, Validate)]
struct IncidentRules {
    #[validate(
        length(min = 3, max = 20, message = "Incident ID must be between 3 and 20 characters"),
        regex(path = *INCIDENT_ID_PATTERN, message = "Incident ID contains invalid characters")
    )]
    incident_id: String,
}

/// Request validation utilities
pub struct RequestValidator;

impl RequestValidator {
    /// Validates search parameters.
    ///
    /// Values are trimmed before checking; a blank `crimeType` is treated as
    /// absent while a blank `location` is rejected.
    pub fn validate_search(params: SearchParams) -> Result<SearchQuery, ProxyError> {
        let rules = SearchRules {
            location: params.location.map(|l| l.trim().to_string()),
            crime_type: params
                .crime_type
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty()),
        };

        if let Err(errors) = rules.validate() {
            return Err(ProxyError::Validation(collect_field_errors(
                &errors,
                |field| match field {
                    "location" => ("location", rules.location.clone()),
                    _ => ("crimeType", rules.crime_type.clone()),
                },
            )));
        }

        match rules.location {
            Some(location) => Ok(SearchQuery {
                location,
                crime_type: rules.crime_type,
            }),
            None => Err(ProxyError::Validation(vec![FieldError {
                field: "location".to_string(),
                message: "Location is required".to_string(),
                rejected_value: None,
            }])),
        }
    }

    /// Validates an incident identifier taken from the request path
    pub fn validate_incident_id(incident_id: &str) -> Result<String, ProxyError> {
        let rules = IncidentRules {
            incident_id: incident_id.to_string(),
        };

        rules.validate().map_err(|errors| {
            ProxyError::Validation(collect_field_errors(&errors, |_| {
                ("incidentId", Some(incident_id.to_string()))
            }))
        })?;

        Ok(rules.incident_id)
    }
}

/// Flattens validator output into the wire shape, ordered by field name and
/// then by the order the rules were declared.
fn collect_field_errors<F>(errors: &ValidationErrors, describe: F) -> Vec<FieldError>
where
    F: Fn(&str) -> (&'static str, Option<String>),
{
    let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
    fields.sort_by(|a, b| a.0.cmp(&b.0));

    fields
        .into_iter()
        .flat_map(|(field, field_errors)| {
            let (name, rejected_value) = describe(&field);
            field_errors
                .iter()
                .map(move |err| FieldError {
                    field: name.to_string(),
                    message: err
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("Invalid {name}")),
                    rejected_value: rejected_value.clone(),
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(location: Option<&str>, crime_type: Option<&str>) -> SearchParams {
        SearchParams {
            location: location.map(String::from),
            crime_type: crime_type.map(String::from),
        }
    }

    fn details(err: ProxyError) -> Vec<FieldError> {
        match err {
            ProxyError::Validation(details) => details,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_search() {
        let query =
            RequestValidator::validate_search(params(Some("  Downtown, Main St. "), Some("theft")))
                .unwrap();
        assert_eq!(query.location, "Downtown, Main St.");
        assert_eq!(query.crime_type.as_deref(), Some("theft"));
    }

    #[test]
    fn test_missing_location() {
        let err = RequestValidator::validate_search(params(None, None)).unwrap_err();
        let details = details(err);
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].field, "location");
        assert_eq!(details[0].message, "Location is required");
    }

    #[test]
    fn test_blank_location_is_rejected() {
        let err = RequestValidator::validate_search(params(Some("   "), None)).unwrap_err();
        let details = details(err);
        assert!(details.iter().all(|d| d.field == "location"));
        assert!(details
            .iter()
            .any(|d| d.message == "Location must be between 2 and 100 characters"));
    }

    #[test]
    fn test_location_rejects_markup() {
        let err = RequestValidator::validate_search(params(Some("<script>"), None)).unwrap_err();
        let details = details(err);
        assert_eq!(details[0].field, "location");
        assert_eq!(details[0].message, "Location contains invalid characters");
        assert_eq!(details[0].rejected_value.as_deref(), Some("<script>"));
    }

    #[test]
    fn test_location_length_bounds() {
        assert!(RequestValidator::validate_search(params(Some("a"), None)).is_err());
        assert!(RequestValidator::validate_search(params(Some("ab"), None)).is_ok());
        assert!(RequestValidator::validate_search(params(Some(&"a".repeat(100)), None)).is_ok());
        assert!(RequestValidator::validate_search(params(Some(&"a".repeat(101)), None)).is_err());
    }

    #[test]
    fn test_crime_type_rules() {
        let err =
            RequestValidator::validate_search(params(Some("downtown"), Some("theft2"))).unwrap_err();
        let details = details(err);
        assert_eq!(details[0].field, "crimeType");

        assert!(RequestValidator::validate_search(params(Some("downtown"), Some("x"))).is_err());

        let query =
            RequestValidator::validate_search(params(Some("downtown"), Some("vehicle-theft")))
                .unwrap();
        assert_eq!(query.crime_type.as_deref(), Some("vehicle-theft"));
    }

    #[test]
    fn test_blank_crime_type_is_absent() {
        let query = RequestValidator::validate_search(params(Some("downtown"), Some("  "))).unwrap();
        assert!(query.crime_type.is_none());
    }

    #[test]
    fn test_both_fields_reported() {
        let err = RequestValidator::validate_search(params(Some("!"), Some("1"))).unwrap_err();
        let details = details(err);
        assert!(details.iter().any(|d| d.field == "location"));
        assert!(details.iter().any(|d| d.field == "crimeType"));
    }

    #[test]
    fn test_validate_incident_id() {
        assert_eq!(
            RequestValidator::validate_incident_id("INC-001").unwrap(),
            "INC-001"
        );
        assert!(RequestValidator::validate_incident_id("IN").is_err());
        assert!(RequestValidator::validate_incident_id(&"A".repeat(21)).is_err());

        let err = RequestValidator::validate_incident_id("INC_001").unwrap_err();
        let details = details(err);
        assert_eq!(details[0].field, "incidentId");
        assert_eq!(details[0].rejected_value.as_deref(), Some("INC_001"));
    }
}
