use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, TokenData as JwtTokenData, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bearer token claims. Roles are deliberately absent: they are looked up
/// per request so revocations apply immediately.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,    // Subject (user ID)
    pub exp: i64,     // Expiration time
    pub iat: i64,     // Issued at
}

#[derive(Debug)]
pub struct TokenResponse {
    pub token: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

/// Issue a token for `user_id`. Login lives outside this service; this is
/// used by operational tooling and tests.
pub fn create_jwt(
    user_id: Uuid,
    secret: &str,
    ttl: Duration,
) -> Result<TokenResponse, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let expires_at = now + ttl;

    let claims = Claims {
        sub: user_id,
        exp: expires_at.timestamp(),
        iat: now.timestamp(),
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )?;

    Ok(TokenResponse {
        token,
        expires_at,
    })
}

pub fn verify_jwt(token: &str, secret: &str) -> Result<JwtTokenData<Claims>, jsonwebtoken::errors::Error> {
    let validation = Validation::default();

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &validation,
    )
}
