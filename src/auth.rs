use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;

use crate::api::{ApiError, AppState};
use crate::model::UserId;

/// Verified caller id, set by the auth gateway in front of this service.
pub const USER_ID_HEADER: &str = "x-user-id";
/// `owner` marks the caller as a vehicle owner.
pub const USER_ROLE_HEADER: &str = "x-user-role";
/// Shared secret proving the request came through the gateway.
pub const GATEWAY_TOKEN_HEADER: &str = "x-gateway-token";

/// Identity of the caller as asserted by the auth collaborator.
/// This service trusts it and never re-derives it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: UserId,
    pub is_owner: bool,
}

/// A caller whose gateway-supplied role is `owner`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerCaller(pub Caller);

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

pub(crate) fn caller_from_headers(
    headers: &HeaderMap,
    gateway_token: Option<&str>,
) -> Result<Caller, ApiError> {
    if let Some(expected) = gateway_token
        && header(headers, GATEWAY_TOKEN_HEADER) != Some(expected)
    {
        return Err(ApiError::Unauthenticated("request did not come through the gateway"));
    }
    let user_id = header(headers, USER_ID_HEADER)
        .ok_or(ApiError::Unauthenticated("please log in"))?
        .to_string();
    let is_owner = header(headers, USER_ROLE_HEADER).is_some_and(|r| r.eq_ignore_ascii_case("owner"));
    Ok(Caller { user_id, is_owner })
}

impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        caller_from_headers(&parts.headers, state.gateway_token.as_deref())
    }
}

impl FromRequestParts<AppState> for OwnerCaller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let caller = Caller::from_request_parts(parts, state).await?;
        if !caller.is_owner {
            return Err(ApiError::Forbidden("owner access required"));
        }
        Ok(OwnerCaller(caller))
    }
}
