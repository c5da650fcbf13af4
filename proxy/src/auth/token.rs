//! HS256 user tokens.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Audience every user token is issued for.
pub const TOKEN_AUDIENCE: &str = "urn:ollama_proxy";

/// Lifetime of issued tokens (five years).
pub const TOKEN_LIFETIME_WEEKS: i64 = 52 * 5;

/// User token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_uuid: Option<String>,
    #[serde(default)]
    pub aud: serde_json::Value,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    /// Claims for a new user token.
    pub fn new(user: &str, email: Option<&str>) -> Self {
        let now = Utc::now();
        Self {
            user: user.to_string(),
            email: email.map(String::from),
            user_uuid: Some(Uuid::new_v4().to_string()),
            aud: serde_json::json!([TOKEN_AUDIENCE]),
            iat: now.timestamp(),
            exp: (now + Duration::weeks(TOKEN_LIFETIME_WEEKS)).timestamp(),
        }
    }
}

/// Sign claims with the shared secret.
pub fn encode_token(claims: &Claims, secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Validate a token's signature, expiry and audience.
pub fn decode_token(token: &str, key: &DecodingKey) -> Result<Claims, jsonwebtoken::errors::Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[TOKEN_AUDIENCE]);
    decode::<Claims>(token, key, &validation).map(|data| data.claims)
}
