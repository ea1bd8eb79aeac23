use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, Request, State},
    http::{
        header::{AUTHORIZATION, COOKIE, SET_COOKIE},
        request::Parts,
        HeaderMap, HeaderValue,
    },
    middleware::Next,
    response::Response,
};
use tracing::warn;
use uuid::Uuid;

use crate::auth::claims::Claims;
use crate::auth::jwt::JwtKeys;
use crate::auth::services::AuthService;
use crate::error::AuthError;
use crate::state::AppState;

/// Identity attached to the request by the auth gate.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
}

impl From<Claims> for CurrentUser {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.sub,
            username: claims.username,
            email: claims.email,
        }
    }
}

/// Extracts the identity placed in request extensions by `auth_gate`.
pub struct AuthUser(pub CurrentUser);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .map(AuthUser)
            .ok_or(AuthError::Unauthorized)
    }
}

pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookies = headers.get(COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

pub fn access_cookie(token: &str, max_age_secs: u64) -> String {
    format!("accessToken={token}; HttpOnly; SameSite=Lax; Path=/; Max-Age={max_age_secs}")
}

pub fn refresh_cookie(token: &str, max_age_secs: u64) -> String {
    format!("refreshToken={token}; HttpOnly; SameSite=Lax; Path=/; Max-Age={max_age_secs}")
}

pub fn clear_cookie(name: &str) -> String {
    format!("{name}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0")
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(str::to_string)
}

pub fn refresh_token_from_headers(headers: &HeaderMap) -> Option<String> {
    cookie_value(headers, "refreshToken").or_else(|| {
        headers
            .get("x-refresh-token")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    })
}

/// Authentication gate for protected routes.
///
/// A valid access token (Authorization header or `accessToken` cookie)
/// attaches the identity and proceeds. When it is absent or expired the gate
/// attempts a silent refresh: the refresh token must verify AND exactly match
/// the stored value. On success a new access token is minted and set as an
/// http-only cookie on the outbound response.
pub async fn auth_gate(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let keys = JwtKeys::from_ref(&state);

    let access = bearer_token(req.headers()).or_else(|| cookie_value(req.headers(), "accessToken"));
    if let Some(token) = access.as_deref() {
        if let Ok(claims) = keys.verify_access(token) {
            req.extensions_mut().insert(CurrentUser::from(claims));
            return Ok(next.run(req).await);
        }
        // Expired or invalid: fall through to the refresh path
    }

    let Some(refresh) = refresh_token_from_headers(req.headers()) else {
        return Err(AuthError::Unauthorized);
    };

    let service = AuthService::from_ref(&state);
    let (access_token, user) = service.refresh_access_token(&refresh).await.map_err(|e| {
        warn!("silent refresh failed");
        e
    })?;

    req.extensions_mut().insert(CurrentUser {
        id: user.id,
        username: user.username.clone(),
        email: user.email.clone(),
    });

    let mut response = next.run(req).await;
    let cookie = access_cookie(&access_token, keys.access_ttl.as_secs());
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        response.headers_mut().append(SET_COOKIE, value);
    }
    Ok(response)
}
