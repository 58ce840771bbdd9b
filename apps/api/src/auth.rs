//! Bearer-token authentication for API routes.
//!
//! The web app signs HS256 tokens with `AUTH_JWT_SECRET`; `sub` is the user id.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::AppError;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    #[serde(default)]
    pub email: Option<String>,
}

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub user_id: String,
}

pub fn verify_token(token: &str, secret: &str) -> Result<AuthUser, AppError> {
    let validation = Validation::new(Algorithm::HS256);
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| {
        debug!("Rejected bearer token: {e}");
        AppError::Unauthorized("invalid or expired token".to_string())
    })?;

    if data.claims.sub.trim().is_empty() {
        return Err(AppError::Unauthorized("token has no subject".to_string()));
    }
    Ok(AuthUser {
        user_id: data.claims.sub,
    })
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("missing Authorization header".to_string()))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::Unauthorized("expected a Bearer token".to_string()))?;

        verify_token(token.trim(), &state.config.auth_jwt_secret)
    }
}

#[cfg(test)]
mod tests {
    use jsonwebtoken::{encode, EncodingKey, Header};

    use super::*;

    const SECRET: &str = "test-secret";

    fn token(sub: &str, exp_offset_secs: i64) -> String {
        let exp = (chrono::Utc::now().timestamp() + exp_offset_secs) as usize;
        encode(
            &Header::default(),
            &Claims {
                sub: sub.to_string(),
                exp,
                email: None,
            },
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_valid_token_yields_user() {
        let user = verify_token(&token("user-42", 3600), SECRET).unwrap();
        assert_eq!(user.user_id, "user-42");
    }

    #[test]
    fn test_wrong_secret_is_unauthorized() {
        let result = verify_token(&token("user-42", 3600), "other-secret");
        assert!(matches!(result, Err(AppError::Unauthorized(_))));
    }

    #[test]
    fn test_expired_token_is_unauthorized() {
        let result = verify_token(&token("user-42", -3600), SECRET);
        assert!(matches!(result, Err(AppError::Unauthorized(_))));
    }

    #[test]
    fn test_blank_subject_is_unauthorized() {
        let result = verify_token(&token(" ", 3600), SECRET);
        assert!(matches!(result, Err(AppError::Unauthorized(_))));
    }
}
