#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, Response};
use axum::Router;
use envconfig::Envconfig;
use http_body_util::BodyExt;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use crime_proxy::config::Config;
use crime_proxy::create_app;
use crime_proxy::handlers::AppState;
use crime_proxy::rate_limiter::{MemoryStore, RateLimitStore, WindowCount};
use crime_proxy::retry::{HttpTransport, TokioSleeper};
use crime_proxy::selector::{FixedModeSource, Mode, ModeSettings};
use crime_proxy::ProxyError;

pub const VALID_KEY: &str = "valid-api-key-12345";

/// Memory store that counts how often the limiter touched it
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryStore,
    hits: AtomicUsize,
}

impl CountingStore {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RateLimitStore for CountingStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, ProxyError> {
        self.hits.fetch_add(1, Ordering::SeqCst);
        self.inner.increment(key, window).await
    }

    async fn ping(&self) -> Result<(), ProxyError> {
        self.inner.ping().await
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}

pub fn config(pairs: &[(&str, &str)]) -> Config {
    let mut vars: HashMap<String, String> = HashMap::new();
    vars.insert("MOCK_LATENCY".to_string(), "false".to_string());
    for (key, value) in pairs {
        vars.insert(key.to_string(), value.to_string());
    }
    Config::init_from_hashmap(&vars).expect("test configuration")
}

pub fn settings(mode: &str, api_key: &str, environment: &str) -> ModeSettings {
    ModeSettings {
        mode: Mode::parse(mode),
        api_key: api_key.to_string(),
        environment: environment.to_string(),
        ci: false,
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub store: Arc<CountingStore>,
}

impl TestApp {
    pub fn new(config: Config, settings: ModeSettings) -> Self {
        let store = Arc::new(CountingStore::default());
        let state = Arc::new(AppState::new(
            config,
            store.clone(),
            Arc::new(FixedModeSource(settings)),
            Arc::new(HttpTransport::new()),
            Arc::new(TokioSleeper),
        ));

        Self {
            router: create_app(state.clone()),
            state,
            store,
        }
    }

    /// Mock mode, production environment, default limits
    pub fn mock() -> Self {
        Self::new(config(&[]), settings("mock", "", "production"))
    }

    pub async fn get(&self, uri: &str) -> (Response<Body>, serde_json::Value) {
        self.get_from(uri, "203.0.113.10").await
    }

    /// GET from a socket peer at `peer_ip`
    pub async fn get_from(&self, uri: &str, peer_ip: &str) -> (Response<Body>, serde_json::Value) {
        self.send(uri, peer_ip, &[]).await
    }

    pub async fn send(
        &self,
        uri: &str,
        peer_ip: &str,
        headers: &[(&str, &str)],
    ) -> (Response<Body>, serde_json::Value) {
        let mut builder = Request::builder().uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let mut request = builder.body(Body::empty()).unwrap();

        let peer: SocketAddr = format!("{}:40000", peer_ip).parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(peer));

        let response = self.router.clone().oneshot(request).await.unwrap();
        let (parts, body) = response.into_parts();
        let bytes = body.collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };

        (Response::from_parts(parts, Body::empty()), json)
    }

    pub fn mock_invocations(&self) -> u64 {
        self.state.selector.mock().invocations()
    }
}
