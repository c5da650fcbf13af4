//! Request authentication.
//!
//! Clients send `Authorization: Bearer <user>:<key>` matched against the
//! authorized users file, or `Authorization: Bearer <jwt>` signed with the
//! configured secret.

pub mod token;

use std::collections::HashMap;
use std::path::Path;

use axum::http::HeaderMap;
use jsonwebtoken::DecodingKey;

use crate::config::AuthConfig;

pub use token::{decode_token, encode_token, Claims, TOKEN_AUDIENCE};

/// User name reported when authentication is disabled.
pub const ANONYMOUS_USER: &str = "unknown";

/// Authenticated user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub name: String,
    pub email: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing Authorization header")]
    MissingHeader,
    #[error("Invalid Authorization header format")]
    InvalidFormat,
    #[error("Unknown user or wrong key")]
    InvalidCredentials,
    #[error("Invalid token: {0}")]
    InvalidToken(String),
    #[error("Failed to read users file {path}: {source}")]
    UsersFile {
        path: String,
        source: std::io::Error,
    },
}

/// Validates bearer credentials.
pub struct Authenticator {
    disabled: bool,
    users: HashMap<String, String>,
    jwt_key: Option<DecodingKey>,
}

impl Authenticator {
    pub fn new(users: HashMap<String, String>, jwt_secret: Option<&str>) -> Self {
        Self {
            disabled: false,
            users,
            jwt_key: jwt_secret.map(|s| DecodingKey::from_secret(s.as_bytes())),
        }
    }

    /// Authenticator that lets every request through.
    pub fn disabled() -> Self {
        Self {
            disabled: true,
            users: HashMap::new(),
            jwt_key: None,
        }
    }

    /// Build from configuration, reading the users file if present.
    pub fn from_config(config: &AuthConfig) -> Result<Self, AuthError> {
        if config.disabled {
            tracing::warn!("Authentication is disabled");
            return Ok(Self::disabled());
        }

        let path = Path::new(&config.users_file);
        let users = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|source| AuthError::UsersFile {
                path: config.users_file.clone(),
                source,
            })?;
            parse_users(&content)
        } else {
            tracing::warn!("Users file {} not found, no user keys loaded", config.users_file);
            HashMap::new()
        };

        if users.is_empty() && config.jwt_key.is_none() {
            tracing::warn!(
                "No user keys and no JWT key configured, every request will be rejected"
            );
        }
        tracing::info!("Loaded {} authorized users", users.len());

        Ok(Self::new(users, config.jwt_key.as_deref()))
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Authenticate a request from its headers.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<AuthUser, AuthError> {
        if self.disabled {
            return Ok(AuthUser {
                name: ANONYMOUS_USER.to_string(),
                email: None,
            });
        }

        let auth_header = headers
            .get("authorization")
            .ok_or(AuthError::MissingHeader)?
            .to_str()
            .map_err(|_| AuthError::InvalidFormat)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(AuthError::InvalidFormat)?
            .trim();

        if let Some((user, key)) = token.split_once(':') {
            return match self.users.get(user) {
                Some(expected) if expected == key => Ok(AuthUser {
                    name: user.to_string(),
                    email: None,
                }),
                _ => Err(AuthError::InvalidCredentials),
            };
        }

        let key = self.jwt_key.as_ref().ok_or(AuthError::InvalidFormat)?;
        let claims = decode_token(token, key).map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        Ok(AuthUser {
            name: claims.user,
            email: claims.email,
        })
    }
}

/// Parse `user:key` lines. Blank and malformed lines are skipped.
pub fn parse_users(content: &str) -> HashMap<String, String> {
    let mut users = HashMap::new();
    for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match line.split_once(':') {
            Some((user, key)) if !user.is_empty() && !key.contains(':') => {
                users.insert(user.to_string(), key.to_string());
            }
            _ => tracing::error!("User entry broken: '{}'", line),
        }
    }
    users
}
