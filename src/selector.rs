//! Per-request choice between the mock and the real backend.
//!
//! Mode, credential and environment are re-read on every call through a
//! [`ModeSource`], so a rotated key or a mode switch applies to the next
//! request. Selection never fails: anything short of a recognised real mode
//! with a usable key falls back to the mock.

use envconfig::Envconfig;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::backend::{Backend, ClientType, MockBackend, RealBackend};
use crate::config::ModeEnv;
use crate::retry::RetryClient;

/// Minimum credential length, exclusive
const MIN_API_KEY_LEN: usize = 10;

/// Fragments found in unedited sample credentials
const PLACEHOLDER_MARKERS: [&str; 2] = ["your_", "example"];

/// Deployment posture
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Mock,
    Staging,
    Prod,
    Unrecognized(String),
}

impl Mode {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "mock" => Mode::Mock,
            "staging" => Mode::Staging,
            "prod" | "production" => Mode::Prod,
            _ => Mode::Unrecognized(value.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Mode::Mock => "mock",
            Mode::Staging => "staging",
            Mode::Prod => "prod",
            Mode::Unrecognized(raw) => raw,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs to backend selection as seen at one instant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeSettings {
    pub mode: Mode,
    pub api_key: String,
    pub environment: String,
    pub ci: bool,
}

impl Default for ModeSettings {
    fn default() -> Self {
        Self {
            mode: Mode::Mock,
            api_key: String::new(),
            environment: "development".to_string(),
            ci: false,
        }
    }
}

impl ModeSettings {
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn is_test_environment(&self) -> bool {
        self.ci || self.environment.eq_ignore_ascii_case("test")
    }
}

pub trait ModeSource: Send + Sync {
    fn current(&self) -> ModeSettings;
}

type ModeLookup = Arc<dyn Fn() -> Result<ModeEnv, envconfig::Error> + Send + Sync>;

/// Reads `CRIME_API_MODE`, `CRIME_API_KEY`, `APP_ENV` and `CI` on each call
#[derive(Clone)]
pub struct EnvModeSource {
    lookup: ModeLookup,
    mode_override: Option<Mode>,
}

impl EnvModeSource {
    pub fn new() -> Self {
        Self::with_lookup(ModeEnv::init_from_env)
    }

    /// Pin the mode regardless of `CRIME_API_MODE`
    pub fn with_mode_override(mode: Mode) -> Self {
        Self {
            mode_override: Some(mode),
            ..Self::new()
        }
    }

    /// Read the settings through `lookup` instead of the process environment
    pub fn with_lookup<F>(lookup: F) -> Self
    where
        F: Fn() -> Result<ModeEnv, envconfig::Error> + Send + Sync + 'static,
    {
        Self {
            lookup: Arc::new(lookup),
            mode_override: None,
        }
    }
}

impl Default for EnvModeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EnvModeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvModeSource")
            .field("mode_override", &self.mode_override)
            .finish_non_exhaustive()
    }
}

fn is_truthy(flag: &str) -> bool {
    matches!(flag.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

impl ModeSource for EnvModeSource {
    fn current(&self) -> ModeSettings {
        match (self.lookup)() {
            Ok(env) => ModeSettings {
                mode: self
                    .mode_override
                    .clone()
                    .unwrap_or_else(|| Mode::parse(&env.mode)),
                api_key: env.api_key,
                environment: env.environment,
                ci: is_truthy(&env.ci),
            },
            Err(e) => {
                tracing::warn!(
                    target: "crime_proxy::selector",
                    error = %e,
                    "Could not read mode settings, defaulting to mock"
                );
                ModeSettings::default()
            }
        }
    }
}

/// A [`ModeSource`] that always returns the same settings
#[derive(Debug, Clone)]
pub struct FixedModeSource(pub ModeSettings);

impl ModeSource for FixedModeSource {
    fn current(&self) -> ModeSettings {
        self.0.clone()
    }
}

/// A credential is usable only if it is longer than ten characters and is
/// not an unedited placeholder.
pub fn validate_api_key(key: Option<&str>) -> bool {
    match key {
        Some(key) => {
            !key.is_empty()
                && key.len() > MIN_API_KEY_LEN
                && !PLACEHOLDER_MARKERS.iter().any(|marker| key.contains(marker))
        }
        None => false,
    }
}

/// Why a client type was chosen, in rule order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionReason {
    MockMode,
    InvalidCredential,
    TestEnvironment,
    RealMode,
    UnrecognizedMode,
}

/// First matching rule wins.
pub fn decide(settings: &ModeSettings) -> (ClientType, SelectionReason) {
    if settings.mode == Mode::Mock {
        return (ClientType::Mock, SelectionReason::MockMode);
    }
    if !validate_api_key(Some(&settings.api_key)) {
        return (ClientType::Mock, SelectionReason::InvalidCredential);
    }
    if settings.is_test_environment() {
        return (ClientType::Mock, SelectionReason::TestEnvironment);
    }
    match settings.mode {
        Mode::Staging | Mode::Prod => (ClientType::Real, SelectionReason::RealMode),
        _ => (ClientType::Mock, SelectionReason::UnrecognizedMode),
    }
}

/// Snapshot of the selection inputs and outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientModeState {
    pub mode: String,
    pub has_valid_api_key: bool,
    pub client_type: ClientType,
    pub environment: String,
}

#[derive(Clone)]
pub struct ClientSelector {
    modes: Arc<dyn ModeSource>,
    mock: MockBackend,
    retry: RetryClient,
    upstream_base_url: String,
}

impl ClientSelector {
    pub fn new(
        modes: Arc<dyn ModeSource>,
        mock: MockBackend,
        retry: RetryClient,
        upstream_base_url: impl Into<String>,
    ) -> Self {
        Self {
            modes,
            mock,
            retry,
            upstream_base_url: upstream_base_url.into(),
        }
    }

    pub fn settings(&self) -> ModeSettings {
        self.modes.current()
    }

    pub fn mock(&self) -> &MockBackend {
        &self.mock
    }

    pub fn select_backend(&self) -> Backend {
        self.select_with(&self.settings())
    }

    /// Select against settings the caller already read, so one request sees
    /// a single consistent snapshot.
    pub fn select_with(&self, settings: &ModeSettings) -> Backend {
        let (client_type, reason) = decide(settings);

        tracing::debug!(
            target: "crime_proxy::selector",
            mode = %settings.mode,
            client_type = client_type.as_str(),
            reason = ?reason,
            "Backend selected"
        );

        match client_type {
            ClientType::Mock => Backend::Mock(self.mock.clone()),
            ClientType::Real => Backend::Real(RealBackend::new(
                self.retry.clone(),
                self.upstream_base_url.as_str(),
                settings.api_key.as_str(),
            )),
        }
    }

    pub fn describe_selection(&self) -> ClientModeState {
        Self::describe(&self.settings())
    }

    pub fn describe(settings: &ModeSettings) -> ClientModeState {
        let (client_type, _) = decide(settings);
        ClientModeState {
            mode: settings.mode.to_string(),
            has_valid_api_key: validate_api_key(Some(&settings.api_key)),
            client_type,
            environment: settings.environment.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::{HttpTransport, RetryPolicy, TokioSleeper};
    use std::collections::HashMap;
    use std::sync::Mutex;

    const VALID_KEY: &str = "valid-api-key-12345";

    /// An [`EnvModeSource`] over a mutable variable map
    fn env_source(vars: &[(&str, &str)]) -> (Arc<Mutex<HashMap<String, String>>>, EnvModeSource) {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let vars = Arc::new(Mutex::new(vars));
        let shared = vars.clone();
        let source = EnvModeSource::with_lookup(move || {
            let vars = shared.lock().unwrap().clone();
            ModeEnv::init_from_hashmap(&vars)
        });
        (vars, source)
    }

    #[test]
    fn test_rotated_key_applies_on_next_read() {
        let (vars, source) = env_source(&[
            ("CRIME_API_MODE", "prod"),
            ("CRIME_API_KEY", "your_api_key_here"),
            ("APP_ENV", "production"),
        ]);

        let before = source.current();
        assert_eq!(decide(&before), (ClientType::Mock, SelectionReason::InvalidCredential));

        vars.lock()
            .unwrap()
            .insert("CRIME_API_KEY".to_string(), VALID_KEY.to_string());

        let after = source.current();
        assert_eq!(after.api_key, VALID_KEY);
        assert_eq!(decide(&after), (ClientType::Real, SelectionReason::RealMode));
    }

    #[test]
    fn test_mode_switch_applies_on_next_read() {
        let (vars, source) = env_source(&[
            ("CRIME_API_MODE", "staging"),
            ("CRIME_API_KEY", VALID_KEY),
            ("APP_ENV", "staging"),
        ]);
        assert_eq!(decide(&source.current()).0, ClientType::Real);

        vars.lock()
            .unwrap()
            .insert("CRIME_API_MODE".to_string(), "mock".to_string());
        assert_eq!(decide(&source.current()), (ClientType::Mock, SelectionReason::MockMode));
    }

    #[test]
    fn test_env_source_defaults() {
        let (_, source) = env_source(&[]);
        let settings = source.current();

        assert_eq!(settings.mode, Mode::Mock);
        assert_eq!(settings.api_key, "");
        assert_eq!(settings.environment, "development");
        assert!(!settings.ci);
    }

    #[test]
    fn test_ci_flag_parsing() {
        for (raw, expected) in [
            ("true", true),
            ("TRUE", true),
            ("1", true),
            (" yes ", true),
            ("false", false),
            ("0", false),
            ("", false),
        ] {
            let (_, source) = env_source(&[("CI", raw)]);
            assert_eq!(source.current().ci, expected, "CI={raw:?}");
        }
    }

    #[test]
    fn test_mode_override_wins_over_env() {
        let (vars, _) = env_source(&[("CRIME_API_MODE", "mock")]);
        let source = EnvModeSource {
            mode_override: Some(Mode::Prod),
            ..EnvModeSource::with_lookup(move || {
                ModeEnv::init_from_hashmap(&vars.lock().unwrap().clone())
            })
        };

        assert_eq!(source.current().mode, Mode::Prod);
    }

    fn settings(mode: &str, key: &str, environment: &str, ci: bool) -> ModeSettings {
        ModeSettings {
            mode: Mode::parse(mode),
            api_key: key.to_string(),
            environment: environment.to_string(),
            ci,
        }
    }

    fn selector(settings: ModeSettings) -> ClientSelector {
        let sleeper = Arc::new(TokioSleeper);
        ClientSelector::new(
            Arc::new(FixedModeSource(settings)),
            MockBackend::new(sleeper.clone(), false),
            RetryClient::new(Arc::new(HttpTransport::new()), sleeper, RetryPolicy::default()),
            "http://upstream/v1",
        )
    }

    #[test]
    fn test_validate_api_key() {
        assert!(!validate_api_key(Some("")));
        assert!(!validate_api_key(None));
        assert!(!validate_api_key(Some("your_api_key_here")));
        assert!(!validate_api_key(Some("example-key-123456")));
        assert!(!validate_api_key(Some("0123456789")));
        assert!(validate_api_key(Some("01234567890")));
        assert!(validate_api_key(Some(VALID_KEY)));
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!(Mode::parse(" MOCK "), Mode::Mock);
        assert_eq!(Mode::parse("staging"), Mode::Staging);
        assert_eq!(Mode::parse("production"), Mode::Prod);
        assert_eq!(Mode::parse("live"), Mode::Unrecognized("live".to_string()));
    }

    #[test]
    fn test_mock_mode_always_selects_mock() {
        for key in ["", "your_api_key_here", VALID_KEY] {
            let (client_type, reason) = decide(&settings("mock", key, "production", false));
            assert_eq!(client_type, ClientType::Mock);
            assert_eq!(reason, SelectionReason::MockMode);
        }
    }

    #[test]
    fn test_invalid_key_always_selects_mock() {
        for mode in ["staging", "prod", "live"] {
            let (client_type, reason) = decide(&settings(mode, "short", "production", false));
            assert_eq!(client_type, ClientType::Mock);
            assert_eq!(reason, SelectionReason::InvalidCredential);
        }
    }

    #[test]
    fn test_test_environment_selects_mock() {
        let (client_type, reason) = decide(&settings("prod", VALID_KEY, "production", true));
        assert_eq!(client_type, ClientType::Mock);
        assert_eq!(reason, SelectionReason::TestEnvironment);

        let (client_type, _) = decide(&settings("prod", VALID_KEY, "test", false));
        assert_eq!(client_type, ClientType::Mock);
    }

    #[test]
    fn test_real_mode_with_valid_key_selects_real() {
        for mode in ["staging", "prod"] {
            let (client_type, reason) = decide(&settings(mode, VALID_KEY, "production", false));
            assert_eq!(client_type, ClientType::Real);
            assert_eq!(reason, SelectionReason::RealMode);
        }
    }

    #[test]
    fn test_unrecognized_mode_falls_back_to_mock() {
        let (client_type, reason) = decide(&settings("live", VALID_KEY, "production", false));
        assert_eq!(client_type, ClientType::Mock);
        assert_eq!(reason, SelectionReason::UnrecognizedMode);
    }

    #[test]
    fn test_select_backend_and_describe() {
        let selector = selector(settings("staging", VALID_KEY, "staging", false));
        assert_eq!(selector.select_backend().client_type(), ClientType::Real);

        let state = selector.describe_selection();
        assert_eq!(state.mode, "staging");
        assert!(state.has_valid_api_key);
        assert_eq!(state.client_type, ClientType::Real);
        assert_eq!(state.environment, "staging");

        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["hasValidApiKey"], true);
        assert_eq!(value["clientType"], "real");
    }

    #[test]
    fn test_development_flag() {
        assert!(settings("mock", "", "Development", false).is_development());
        assert!(!settings("mock", "", "production", false).is_development());
    }
}
