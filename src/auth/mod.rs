//! Bearer token authentication.
//!
//! Identity is optional for the cart endpoints, so two extractors exist:
//! [`MaybeUser`] yields `None` when no `Authorization` header is present,
//! [`AuthUser`] rejects such requests with 401. A header that is present but
//! invalid is always rejected.

use crate::errors::ServiceError;
use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Identifier of an authenticated storefront user.
pub type UserId = i32;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub iat: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

/// Verifies (and, for tooling and tests, issues) HS256 tokens.
#[derive(Clone)]
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    encoding_key: EncodingKey,
    validation: Validation,
    issuer: Option<String>,
}

impl JwtVerifier {
    pub fn new(secret: &str, issuer: Option<String>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        if let Some(iss) = &issuer {
            validation.set_issuer(&[iss.as_str()]);
        }
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            validation,
            issuer,
        }
    }

    pub fn verify(&self, token: &str) -> Result<AuthUser, ServiceError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| ServiceError::Unauthorized(format!("Invalid token: {e}")))?;

        let user_id = data
            .claims
            .sub
            .parse::<UserId>()
            .map_err(|_| ServiceError::Unauthorized("Invalid token subject".to_string()))?;

        Ok(AuthUser {
            user_id,
            email: data.claims.email,
        })
    }

    pub fn issue(&self, user_id: UserId, ttl: chrono::Duration) -> Result<String, ServiceError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            email: None,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            iss: self.issuer.clone(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| ServiceError::InternalError(format!("token encoding failed: {e}")))
    }
}

/// Authenticated user data extracted from the bearer token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: UserId,
    pub email: Option<String>,
}

/// Identity of the caller when authentication is optional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaybeUser(pub Option<AuthUser>);

impl MaybeUser {
    pub fn user_id(&self) -> Option<UserId> {
        self.0.as_ref().map(|user| user.user_id)
    }
}

fn bearer_token(parts: &Parts) -> Result<Option<&str>, ServiceError> {
    let Some(value) = parts.headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| ServiceError::Unauthorized("Malformed Authorization header".to_string()))?;
    value
        .strip_prefix("Bearer ")
        .map(|token| Some(token.trim()))
        .ok_or_else(|| ServiceError::Unauthorized("Expected a Bearer token".to_string()))
}

#[async_trait]
impl<S> FromRequestParts<S> for MaybeUser
where
    S: Send + Sync,
    Arc<JwtVerifier>: FromRef<S>,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let verifier = Arc::<JwtVerifier>::from_ref(state);
        match bearer_token(parts)? {
            Some(token) => verifier.verify(token).map(|user| MaybeUser(Some(user))),
            None => Ok(MaybeUser(None)),
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    Arc<JwtVerifier>: FromRef<S>,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        MaybeUser::from_request_parts(parts, state)
            .await?
            .0
            .ok_or_else(|| ServiceError::Unauthorized("Authentication required".to_string()))
    }
}
