use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use ulid::Ulid;

use crate::api::ApiError;
use crate::model::Role;

/// Header carrying the authenticated user's id, set by the auth gateway.
pub const USER_ID_HEADER: &str = "x-user-id";
/// Header carrying the authenticated user's role.
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// The caller as vouched for by the upstream authentication layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedPrincipal {
    pub user_id: Ulid,
    pub role: Role,
}

impl AuthenticatedPrincipal {
    /// Reject unless the caller holds one of `roles`.
    pub fn require(&self, roles: &[Role]) -> Result<(), ApiError> {
        if roles.contains(&self.role) {
            Ok(())
        } else {
            Err(ApiError::Forbidden)
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedPrincipal
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };
        let user_id = header(USER_ID_HEADER)
            .ok_or(ApiError::Unauthorized("Access denied. No token provided or invalid format."))?
            .parse::<Ulid>()
            .map_err(|_| ApiError::Unauthorized("Invalid token"))?;
        let role = header(USER_ROLE_HEADER)
            .ok_or(ApiError::Unauthorized("Access denied. No token provided or invalid format."))?
            .parse::<Role>()
            .map_err(|_| ApiError::Unauthorized("Invalid token"))?;
        Ok(Self { user_id, role })
    }
}
