use axum::{
    extract::{FromRef, Query, State},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    middleware,
    response::{AppendHeaders, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use crate::auth::dto::{
    AccessTokenResponse, AuthResponse, ChangePasswordRequest, ForgotPasswordRequest, LoginRequest,
    MessageResponse, RefreshRequest, RegisterRequest, RegisterResponse, ResetPasswordRequest,
    VerifyEmailQuery,
};
use crate::auth::extractors::{
    access_cookie, auth_gate, clear_cookie, refresh_cookie, refresh_token_from_headers, AuthUser,
};
use crate::auth::jwt::JwtKeys;
use crate::auth::services::AuthService;
use crate::error::AuthError;
use crate::state::AppState;

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/verify-email", get(verify_email))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password", post(reset_password))
        .route("/auth/refresh-token", post(refresh_token))
        .route("/auth/logout", post(logout))
}

pub fn protected_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/auth/change-password", post(change_password))
        .route("/users/profile", get(profile))
        .layer(middleware::from_fn_with_state(state, auth_gate))
}

#[instrument(skip(state, payload))]
async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let service = AuthService::from_ref(&state);
    let user = service.register(payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user,
            message: "Registration successful. Please verify your email.".into(),
        }),
    ))
}

#[instrument(skip(state, payload))]
async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let service = AuthService::from_ref(&state);
    let keys = JwtKeys::from_ref(&state);
    let (access_token, refresh_token, user) = service.login(payload).await?;
    let cookies = AppendHeaders([
        (
            SET_COOKIE,
            access_cookie(&access_token, keys.access_ttl.as_secs()),
        ),
        (
            SET_COOKIE,
            refresh_cookie(&refresh_token, keys.refresh_ttl.as_secs()),
        ),
    ]);
    Ok((
        cookies,
        Json(AuthResponse {
            access_token,
            refresh_token,
            user,
        }),
    ))
}

#[instrument(skip(state, query))]
async fn verify_email(
    State(state): State<AppState>,
    Query(query): Query<VerifyEmailQuery>,
) -> Result<Json<MessageResponse>, AuthError> {
    let service = AuthService::from_ref(&state);
    service.verify_email(&query.token, &query.email).await?;
    Ok(Json(MessageResponse::ok("Email verified successfully")))
}

#[instrument(skip(state, payload))]
async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    let service = AuthService::from_ref(&state);
    service.request_password_reset(&payload.email).await?;
    // Same answer whether or not the account exists
    Ok(Json(MessageResponse::ok(
        "If an account with that email exists, a password reset link has been sent",
    )))
}

#[instrument(skip(state, payload))]
async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    let service = AuthService::from_ref(&state);
    service.reset_password(payload).await?;
    Ok(Json(MessageResponse::ok("Password reset successful")))
}

#[instrument(skip(state, headers, payload))]
async fn refresh_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Option<Json<RefreshRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let token = payload
        .and_then(|Json(body)| body.refresh_token)
        .or_else(|| refresh_token_from_headers(&headers))
        .ok_or(AuthError::Unauthorized)?;

    let service = AuthService::from_ref(&state);
    let keys = JwtKeys::from_ref(&state);
    let (access_token, _user) = service.refresh_access_token(&token).await?;
    let cookies = AppendHeaders([(
        SET_COOKIE,
        access_cookie(&access_token, keys.access_ttl.as_secs()),
    )]);
    Ok((cookies, Json(AccessTokenResponse { access_token })))
}

#[instrument(skip(state, headers, payload))]
async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Option<Json<RefreshRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let token = payload
        .and_then(|Json(body)| body.refresh_token)
        .or_else(|| refresh_token_from_headers(&headers));

    let service = AuthService::from_ref(&state);
    service.logout(token.as_deref()).await?;
    let cookies = AppendHeaders([
        (SET_COOKIE, clear_cookie("accessToken")),
        (SET_COOKIE, clear_cookie("refreshToken")),
    ]);
    Ok((cookies, Json(MessageResponse::ok("Logged out"))))
}

#[instrument(skip(state, payload))]
async fn change_password(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let service = AuthService::from_ref(&state);
    service.change_password(user.id, payload).await?;
    let cookies = AppendHeaders([
        (SET_COOKIE, clear_cookie("accessToken")),
        (SET_COOKIE, clear_cookie("refreshToken")),
    ]);
    Ok((
        cookies,
        Json(MessageResponse::ok(
            "Password changed. Please log in again.",
        )),
    ))
}

#[instrument(skip(state))]
async fn profile(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<impl IntoResponse, AuthError> {
    let service = AuthService::from_ref(&state);
    let user = service.profile(user.id).await?;
    Ok(Json(user))
}
