/// Caller identity extractors
///
/// Authentication happens upstream; the gateway forwards the verified caller
/// in `X-User-Id` and marks administrators with `X-User-Role: admin`.
use crate::{context::AppContext, error::EngineError};
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// The user on whose behalf a request runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
    pub is_admin: bool,
}

impl Caller {
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, EngineError> {
        let user_id = headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| EngineError::Authentication("Missing X-User-Id header".to_string()))?;

        let is_admin = headers
            .get(USER_ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|role| role.trim().eq_ignore_ascii_case("admin"))
            .unwrap_or(false);

        Ok(Caller {
            user_id: user_id.to_string(),
            is_admin,
        })
    }

    pub fn require_admin(&self) -> Result<(), EngineError> {
        if self.is_admin {
            Ok(())
        } else {
            Err(EngineError::Authorization("Administrator role required".to_string()))
        }
    }

    /// Admins act on anyone; everyone else only on themselves.
    pub fn require_self_or_admin(&self, user_id: &str) -> Result<(), EngineError> {
        if self.is_admin || self.user_id == user_id {
            Ok(())
        } else {
            Err(EngineError::Authorization(
                "Cannot act on behalf of another user".to_string(),
            ))
        }
    }
}

#[async_trait]
impl FromRequestParts<AppContext> for Caller {
    type Rejection = EngineError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let caller = Caller::from_headers(&parts.headers)?;
        tracing::debug!(user_id = %caller.user_id, is_admin = caller.is_admin, "caller identified");
        Ok(caller)
    }
}

/// Caller that must hold the admin role
#[derive(Debug, Clone)]
pub struct AdminCaller(pub Caller);

#[async_trait]
impl FromRequestParts<AppContext> for AdminCaller {
    type Rejection = EngineError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let caller = Caller::from_request_parts(parts, state).await?;
        caller.require_admin()?;
        Ok(AdminCaller(caller))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_missing_user_is_authentication_error() {
        let headers = HeaderMap::new();
        assert!(matches!(
            Caller::from_headers(&headers),
            Err(EngineError::Authentication(_))
        ));
    }

    #[test]
    fn test_role_header() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("u1"));
        let caller = Caller::from_headers(&headers).unwrap();
        assert!(!caller.is_admin);
        assert!(caller.require_admin().is_err());
        assert!(caller.require_self_or_admin("u1").is_ok());
        assert!(caller.require_self_or_admin("u2").is_err());

        headers.insert(USER_ROLE_HEADER, HeaderValue::from_static("Admin"));
        let admin = Caller::from_headers(&headers).unwrap();
        assert!(admin.is_admin);
        assert!(admin.require_self_or_admin("u2").is_ok());
    }
}
