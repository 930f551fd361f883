pub mod backend;
pub mod config;
pub mod error;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod rate_limiter;
pub mod redis;
pub mod response;
pub mod retry;
pub mod sanitize;
pub mod selector;
pub mod server;
pub mod validation;

pub use config::Config;
pub use error::{ApiError, ProxyError, Result};
pub use response::ApiResponse;
pub use server::create_app;
