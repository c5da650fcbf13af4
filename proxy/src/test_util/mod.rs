use std::collections::HashMap;
use std::sync::Arc;

use crate::auth::{encode_token, Authenticator, Claims};
use crate::config::{
    AuthConfig, BackendConfig, Config, LoggingConfig, SchedulerConfig, ServerConfig, UpstreamConfig,
};
use crate::AppState;

pub const TEST_USER: &str = "alice";
pub const TEST_KEY: &str = "alice-key";
pub const TEST_JWT_KEY: &str = "test-jwt-secret";

/// Backend config named `server{index}`.
pub fn test_backend(index: usize, url: &str) -> BackendConfig {
    BackendConfig {
        name: format!("server{}", index),
        url: url.to_string(),
        model_white_list: Vec::new(),
        model_black_list: Vec::new(),
    }
}

pub fn test_config(backend_urls: &[&str]) -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8000,
        },
        scheduler: SchedulerConfig::default(),
        upstream: UpstreamConfig {
            connect_timeout_secs: 1,
            read_timeout_secs: 5,
        },
        auth: AuthConfig {
            disabled: false,
            users_file: "/nonexistent/authorized_users.txt".to_string(),
            jwt_key: Some(TEST_JWT_KEY.to_string()),
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
        },
        backends: backend_urls
            .iter()
            .enumerate()
            .map(|(i, url)| test_backend(i, url))
            .collect(),
    }
}

pub fn test_authenticator() -> Authenticator {
    let users = HashMap::from([(TEST_USER.to_string(), TEST_KEY.to_string())]);
    Authenticator::new(users, Some(TEST_JWT_KEY))
}

pub fn create_test_state(config: Config) -> Arc<AppState> {
    Arc::new(AppState::new(config, test_authenticator()).expect("Failed to build test state"))
}

/// `Authorization` header value for the test user's key.
pub fn test_bearer() -> String {
    format!("Bearer {}:{}", TEST_USER, TEST_KEY)
}

pub fn generate_test_jwt(user: &str, email: Option<&str>) -> String {
    encode_token(&Claims::new(user, email), TEST_JWT_KEY).expect("Failed to encode JWT")
}
