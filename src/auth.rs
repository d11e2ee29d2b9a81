use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ServiceError;

/// Role resolved by the external identity service and carried in the token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Instructor,
    Storekeeper,
    Admin,
}

impl Role {
    /// Roles allowed to submit loan requests.
    pub fn can_create_request(&self) -> bool {
        matches!(self, Role::Student | Role::Instructor)
    }

    /// Instructor requests skip the pending state; stock is reserved at
    /// creation time.
    pub fn is_auto_approved(&self) -> bool {
        matches!(self, Role::Instructor)
    }

    pub fn can_approve(&self) -> bool {
        matches!(self, Role::Instructor | Role::Admin)
    }

    pub fn can_deliver(&self) -> bool {
        matches!(self, Role::Storekeeper | Role::Admin)
    }

    pub fn can_adjust_stock(&self) -> bool {
        matches!(self, Role::Storekeeper | Role::Admin)
    }

    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Instructor | Role::Storekeeper | Role::Admin)
    }
}

/// Claims produced by the external identity service.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id
    pub sub: Uuid,
    /// Resolved role
    pub role: Role,
    /// Expiry (unix seconds)
    pub exp: i64,
}

/// Verification material for incoming bearer tokens.
#[derive(Clone)]
pub struct AuthConfig {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl AuthConfig {
    pub fn new(jwt_secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn verify(&self, token: &str) -> Result<Claims, ServiceError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| ServiceError::Unauthorized(format!("invalid token: {}", e)))
    }
}

/// The identity attached to a request: `{user_id, role}`.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub role: Role,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
    AuthConfig: FromRef<S>,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth = AuthConfig::from_ref(state);

        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                ServiceError::Unauthorized("missing Authorization header".to_string())
            })?;

        let token = header_value
            .strip_prefix("Bearer ")
            .ok_or_else(|| ServiceError::Unauthorized("expected bearer token".to_string()))?
            .trim();

        let claims = auth.verify(token)?;

        Ok(AuthenticatedUser {
            user_id: claims.sub,
            role: claims.role,
        })
    }
}
