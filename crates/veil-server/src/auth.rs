//! Bearer-token issuance and verification.
//!
//! Tokens are HS256 JWTs carrying the user id.  The gateway handshake and
//! every HTTP handler decode them with the same shared secret; credential
//! *issuance* beyond this is out of scope for the service.

use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ServerError;

/// Token lifetime: 30 days.
const TOKEN_TTL_SECS: i64 = 30 * 24 * 60 * 60;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: Uuid,
    exp: i64,
}

/// Issue a signed token for the given user.
pub fn issue_token(user_id: Uuid, secret: &str) -> Result<String, ServerError> {
    let claims = Claims {
        sub: user_id,
        exp: Utc::now().timestamp() + TOKEN_TTL_SECS,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ServerError::Internal(format!("token signing failed: {e}")))
}

/// Verify a token and return the user id it was issued to.
pub fn verify_token(token: &str, secret: &str) -> Result<Uuid, ServerError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| ServerError::AuthenticationFailed)?;
    Ok(data.claims.sub)
}

/// Extract and verify the `Authorization: Bearer ...` header.
pub fn bearer_user(
    headers: &axum::http::HeaderMap,
    secret: &str,
) -> Result<Uuid, ServerError> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(ServerError::AuthenticationFailed)?;
    let token = auth.strip_prefix("Bearer ").unwrap_or(auth);
    verify_token(token, secret)
}
