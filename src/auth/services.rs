use std::sync::Arc;

use axum::extract::FromRef;
use lazy_static::lazy_static;
use regex::Regex;
use time::{Duration, OffsetDateTime};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::dto::{
    ChangePasswordRequest, LoginRequest, RegisterRequest, ResetPasswordRequest, SafeUser,
};
use crate::auth::ephemeral::{hash_token, EphemeralToken};
use crate::auth::jwt::JwtKeys;
use crate::auth::password;
use crate::auth::repo::UserStore;
use crate::auth::repo_types::{NewUser, User};
use crate::email::{
    password_changed_email, password_reset_email, verification_email, EmailMessage, Mailer,
};
use crate::error::AuthError;
use crate::state::AppState;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn validate_password_pair(password: &str, confirm: &str) -> Result<(), AuthError> {
    if password.len() < 6 {
        return Err(AuthError::validation(
            "Password must be at least 6 characters long",
        ));
    }
    if password != confirm {
        return Err(AuthError::validation("Passwords do not match"));
    }
    Ok(())
}

/// Argon2 is deliberately slow; keep it off the async workers.
async fn hash_blocking(plain: String) -> Result<String, AuthError> {
    tokio::task::spawn_blocking(move || password::hash_password(&plain))
        .await
        .map_err(|e| AuthError::Internal(e.into()))?
        .map_err(AuthError::Internal)
}

async fn verify_blocking(plain: String, hash: String) -> Result<bool, AuthError> {
    tokio::task::spawn_blocking(move || password::verify_password(&plain, &hash))
        .await
        .map_err(|e| AuthError::Internal(e.into()))?
        .map_err(AuthError::Internal)
}

/// Orchestrates the session/token lifecycle: registration, login, email
/// verification, password reset/change, refresh and logout.
#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn UserStore>,
    mailer: Arc<dyn Mailer>,
    keys: JwtKeys,
    ephemeral_ttl: Duration,
    frontend_url: String,
}

impl FromRef<AppState> for AuthService {
    fn from_ref(state: &AppState) -> Self {
        Self::new(
            state.store.clone(),
            state.mailer.clone(),
            JwtKeys::from_ref(state),
            Duration::minutes(state.config.ephemeral_token_ttl_minutes),
            state.config.frontend_url.clone(),
        )
    }
}

impl AuthService {
    pub fn new(
        store: Arc<dyn UserStore>,
        mailer: Arc<dyn Mailer>,
        keys: JwtKeys,
        ephemeral_ttl: Duration,
        frontend_url: String,
    ) -> Self {
        Self {
            store,
            mailer,
            keys,
            ephemeral_ttl,
            frontend_url,
        }
    }

    /// All notification emails are best-effort: the user record is already
    /// persisted, a transport failure is logged for follow-up only.
    async fn send_best_effort(&self, message: EmailMessage) {
        if let Err(err) = self.mailer.send(message).await {
            error!(error = %err, "email delivery failed");
        }
    }

    pub async fn register(&self, req: RegisterRequest) -> Result<SafeUser, AuthError> {
        let username = req.username.trim().to_string();
        let email = req.email.trim().to_lowercase();

        if username.len() < 3 {
            return Err(AuthError::validation(
                "Username must be at least 3 characters long",
            ));
        }
        if !is_valid_email(&email) {
            return Err(AuthError::validation("Valid email is required"));
        }
        validate_password_pair(&req.password, &req.confirm_password)?;

        // Duplicate email only; usernames may repeat by design
        if self.store.find_by_email(&email).await?.is_some() {
            warn!(email = %email, "email already registered");
            return Err(AuthError::DuplicateEmail);
        }

        let password_hash = hash_blocking(req.password).await?;
        let token = EphemeralToken::generate(self.ephemeral_ttl);

        // A racing insert with the same email still surfaces as DuplicateKey
        let user = self
            .store
            .create(NewUser {
                username,
                email,
                password_hash,
                email_verification_token_hash: token.hashed,
                email_verification_token_expires_at: token.expires_at,
            })
            .await?;

        self.send_best_effort(verification_email(
            &self.frontend_url,
            &user.username,
            &user.email,
            &token.raw,
            self.ephemeral_ttl.whole_minutes(),
        ))
        .await;

        info!(user_id = %user.id, email = %user.email, "user registered");
        Ok(SafeUser::from(user))
    }

    pub async fn login(&self, req: LoginRequest) -> Result<(String, String, SafeUser), AuthError> {
        let email = req.email.trim().to_lowercase();
        if email.is_empty() || req.password.trim().is_empty() {
            return Err(AuthError::validation("email and password are required"));
        }

        // Same error for unknown email and bad password
        let Some(mut user) = self.store.find_by_email(&email).await? else {
            warn!(email = %email, "login unknown email");
            return Err(AuthError::InvalidCredentials);
        };
        if !verify_blocking(req.password, user.password_hash.clone()).await? {
            warn!(user_id = %user.id, "login invalid password");
            return Err(AuthError::InvalidCredentials);
        }

        if !user.is_email_verified {
            // Rotate the verification token and resend before refusing
            let token = EphemeralToken::generate(self.ephemeral_ttl);
            user.email_verification_token_hash = Some(token.hashed.clone());
            user.email_verification_token_expires_at = Some(token.expires_at);
            self.store.save(&user).await?;
            self.send_best_effort(verification_email(
                &self.frontend_url,
                &user.username,
                &user.email,
                &token.raw,
                self.ephemeral_ttl.whole_minutes(),
            ))
            .await;
            return Err(AuthError::EmailNotVerified);
        }

        let access_token = self.keys.sign_access(user.id, &user.username, &user.email)?;
        let refresh_token = self.keys.sign_refresh(user.id, &user.username, &user.email)?;

        // One live refresh token per user: overwriting revokes the prior one
        user.refresh_token = Some(refresh_token.clone());
        self.store.save(&user).await?;

        info!(user_id = %user.id, "user logged in");
        Ok((access_token, refresh_token, SafeUser::from(user)))
    }

    pub async fn verify_email(&self, raw_token: &str, email: &str) -> Result<SafeUser, AuthError> {
        let email = email.trim().to_lowercase();
        let hashed = hash_token(raw_token);
        let Some(mut user) = self
            .store
            .find_by_verification_token(&hashed, &email, OffsetDateTime::now_utc())
            .await?
        else {
            return Err(AuthError::invalid_verification_token());
        };

        user.is_email_verified = true;
        // Single use: clear both fields on consumption
        user.email_verification_token_hash = None;
        user.email_verification_token_expires_at = None;
        self.store.save(&user).await?;

        info!(user_id = %user.id, "email verified");
        Ok(SafeUser::from(user))
    }

    /// Always succeeds with a generic message; only an existing account gets
    /// a token and an email, so callers cannot probe for registered emails.
    pub async fn request_password_reset(&self, email: &str) -> Result<(), AuthError> {
        let email = email.trim().to_lowercase();
        let Some(mut user) = self.store.find_by_email(&email).await? else {
            return Ok(());
        };

        let token = EphemeralToken::generate(self.ephemeral_ttl);
        user.forgot_password_token_hash = Some(token.hashed.clone());
        user.forgot_password_token_expires_at = Some(token.expires_at);
        self.store.save(&user).await?;

        self.send_best_effort(password_reset_email(
            &self.frontend_url,
            &user.username,
            &user.email,
            &token.raw,
        ))
        .await;

        info!(user_id = %user.id, "password reset requested");
        Ok(())
    }

    pub async fn reset_password(&self, req: ResetPasswordRequest) -> Result<(), AuthError> {
        validate_password_pair(&req.password, &req.confirm_password)?;

        let hashed = hash_token(&req.token);
        let Some(mut user) = self
            .store
            .find_by_reset_token(&hashed, OffsetDateTime::now_utc())
            .await?
        else {
            return Err(AuthError::invalid_reset_token());
        };

        user.password_hash = hash_blocking(req.password).await?;
        user.forgot_password_token_hash = None;
        user.forgot_password_token_expires_at = None;
        self.store.save(&user).await?;

        info!(user_id = %user.id, "password reset completed");
        Ok(())
    }

    /// Exchange a valid refresh token for a fresh access token. The refresh
    /// token itself is not rotated. The presented token must exactly match
    /// the stored one, which catches revoked and superseded tokens.
    pub async fn refresh_access_token(
        &self,
        refresh_token: &str,
    ) -> Result<(String, User), AuthError> {
        let claims = self
            .keys
            .verify_refresh(refresh_token)
            .map_err(|_| AuthError::Unauthorized)?;

        let Some(user) = self.store.find_by_id(claims.sub).await? else {
            return Err(AuthError::Unauthorized);
        };
        if user.refresh_token.as_deref() != Some(refresh_token) {
            warn!(user_id = %user.id, "refresh token does not match stored value");
            return Err(AuthError::Unauthorized);
        }

        let access_token = self.keys.sign_access(user.id, &user.username, &user.email)?;
        Ok((access_token, user))
    }

    /// Best-effort: an invalid or already-cleared token still logs out.
    pub async fn logout(&self, refresh_token: Option<&str>) -> Result<(), AuthError> {
        let Some(token) = refresh_token else {
            return Ok(());
        };
        let Ok(claims) = self.keys.verify_refresh(token) else {
            return Ok(());
        };
        if let Some(mut user) = self.store.find_by_id(claims.sub).await? {
            if user.refresh_token.as_deref() == Some(token) {
                user.refresh_token = None;
                self.store.save(&user).await?;
                info!(user_id = %user.id, "user logged out");
            }
        }
        Ok(())
    }

    pub async fn change_password(
        &self,
        user_id: Uuid,
        req: ChangePasswordRequest,
    ) -> Result<(), AuthError> {
        validate_password_pair(&req.new_password, &req.confirm_password)?;

        let Some(mut user) = self.store.find_by_id(user_id).await? else {
            return Err(AuthError::Unauthorized);
        };
        if !verify_blocking(req.old_password, user.password_hash.clone()).await? {
            return Err(AuthError::validation("Current password is incorrect"));
        }

        user.password_hash = hash_blocking(req.new_password).await?;
        // Force re-login everywhere
        user.refresh_token = None;
        self.store.save(&user).await?;

        self.send_best_effort(password_changed_email(&user.username, &user.email))
            .await;

        info!(user_id = %user.id, "password changed");
        Ok(())
    }

    pub async fn profile(&self, user_id: Uuid) -> Result<SafeUser, AuthError> {
        let Some(user) = self.store.find_by_id(user_id).await? else {
            return Err(AuthError::Unauthorized);
        };
        Ok(SafeUser::from(user))
    }
}
