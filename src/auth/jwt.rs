use std::time::Duration;

use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use crate::auth::claims::{Claims, TokenKind};
use crate::config::JwtConfig;
use crate::state::AppState;

/// Why a token failed verification. Expiry must stay distinguishable from a
/// bad signature: an expired access token falls back to the refresh flow,
/// while an invalid one is fatal.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("invalid token")]
    Invalid,
}

/// Signing and verification keys for both token kinds. Access and refresh
/// tokens are signed with distinct secrets.
#[derive(Clone)]
pub struct JwtKeys {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    issuer: String,
    audience: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        Self::from_config(&state.config.jwt)
    }
}

impl JwtKeys {
    pub fn from_config(config: &JwtConfig) -> Self {
        Self {
            access_encoding: EncodingKey::from_secret(config.access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(config.access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(config.refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(config.refresh_secret.as_bytes()),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            access_ttl: Duration::from_secs((config.access_ttl_minutes as u64) * 60),
            refresh_ttl: Duration::from_secs((config.refresh_ttl_days as u64) * 24 * 60 * 60),
        }
    }

    fn sign_with_kind(
        &self,
        user_id: Uuid,
        username: &str,
        email: &str,
        kind: TokenKind,
    ) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let (key, ttl) = match kind {
            TokenKind::Access => (&self.access_encoding, self.access_ttl),
            TokenKind::Refresh => (&self.refresh_encoding, self.refresh_ttl),
        };
        let exp = now + TimeDuration::seconds(ttl.as_secs() as i64);
        let claims = Claims {
            sub: user_id,
            username: username.to_string(),
            email: email.to_string(),
            jti: Uuid::new_v4(),
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind,
        };
        let token = encode(&Header::default(), &claims, key)?;
        debug!(user_id = %user_id, kind = ?kind, "jwt signed");
        Ok(token)
    }

    pub fn sign_access(&self, user_id: Uuid, username: &str, email: &str) -> anyhow::Result<String> {
        self.sign_with_kind(user_id, username, email, TokenKind::Access)
    }

    pub fn sign_refresh(
        &self,
        user_id: Uuid,
        username: &str,
        email: &str,
    ) -> anyhow::Result<String> {
        self.sign_with_kind(user_id, username, email, TokenKind::Refresh)
    }

    fn verify_with_kind(&self, token: &str, kind: TokenKind) -> Result<Claims, TokenError> {
        let key = match kind {
            TokenKind::Access => &self.access_decoding,
            TokenKind::Refresh => &self.refresh_decoding,
        };
        let mut validation = Validation::default();
        validation.leeway = 0;
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<Claims>(token, key, &validation).map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Invalid,
        })?;
        if data.claims.kind != kind {
            return Err(TokenError::Invalid);
        }
        debug!(user_id = %data.claims.sub, kind = ?kind, "jwt verified");
        Ok(data.claims)
    }

    pub fn verify_access(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify_with_kind(token, TokenKind::Access)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify_with_kind(token, TokenKind::Refresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_config() -> JwtConfig {
        JwtConfig {
            access_secret: "access-secret".into(),
            refresh_secret: "refresh-secret".into(),
            issuer: "test-issuer".into(),
            audience: "test-aud".into(),
            access_ttl_minutes: 15,
            refresh_ttl_days: 7,
        }
    }

    fn make_keys() -> JwtKeys {
        JwtKeys::from_config(&make_config())
    }

    #[test]
    fn sign_and_verify_access_token() {
        let keys = make_keys();
        let user_id = Uuid::new_v4();
        let token = keys
            .sign_access(user_id, "alice", "a@x.com")
            .expect("sign access");
        let claims = keys.verify_access(&token).expect("verify token");
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.email, "a@x.com");
        assert_eq!(claims.iss, "test-issuer");
        assert_eq!(claims.aud, "test-aud");
        assert_eq!(claims.kind, TokenKind::Access);
    }

    #[test]
    fn sign_and_verify_refresh_token() {
        let keys = make_keys();
        let user_id = Uuid::new_v4();
        let token = keys
            .sign_refresh(user_id, "alice", "a@x.com")
            .expect("sign refresh");
        let claims = keys.verify_refresh(&token).expect("verify refresh");
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.kind, TokenKind::Refresh);
    }

    #[test]
    fn secrets_are_not_interchangeable() {
        let keys = make_keys();
        let access = keys
            .sign_access(Uuid::new_v4(), "alice", "a@x.com")
            .expect("sign access");
        let refresh = keys
            .sign_refresh(Uuid::new_v4(), "alice", "a@x.com")
            .expect("sign refresh");
        assert_eq!(keys.verify_refresh(&access), Err(TokenError::Invalid));
        assert_eq!(keys.verify_access(&refresh), Err(TokenError::Invalid));
    }

    #[test]
    fn expired_token_is_distinguishable_from_invalid() {
        let keys = make_keys();
        let now = OffsetDateTime::now_utc();
        let claims = Claims {
            sub: Uuid::new_v4(),
            username: "alice".into(),
            email: "a@x.com".into(),
            jti: Uuid::new_v4(),
            iat: (now - TimeDuration::minutes(30)).unix_timestamp() as usize,
            exp: (now - TimeDuration::minutes(15)).unix_timestamp() as usize,
            iss: "test-issuer".into(),
            aud: "test-aud".into(),
            kind: TokenKind::Access,
        };
        let token = encode(&Header::default(), &claims, &keys.access_encoding).expect("encode");
        assert_eq!(keys.verify_access(&token), Err(TokenError::Expired));
        assert_eq!(keys.verify_access("garbage"), Err(TokenError::Invalid));
    }

    #[test]
    fn every_issuance_is_unique_even_within_the_same_second() {
        let keys = make_keys();
        let user_id = Uuid::new_v4();
        let first = keys
            .sign_refresh(user_id, "alice", "a@x.com")
            .expect("sign refresh");
        let second = keys
            .sign_refresh(user_id, "alice", "a@x.com")
            .expect("sign refresh");
        // Re-login revocation relies on the new token differing from the old
        assert_ne!(first, second);
        let a = keys.verify_refresh(&first).expect("verify");
        let b = keys.verify_refresh(&second).expect("verify");
        assert_ne!(a.jti, b.jti);
    }

    #[test]
    fn verify_rejects_wrong_issuer_or_audience() {
        let keys = make_keys();
        let mut other_config = make_config();
        other_config.issuer = "other-issuer".into();
        other_config.audience = "other-aud".into();
        let other_keys = JwtKeys::from_config(&other_config);
        let token = keys
            .sign_access(Uuid::new_v4(), "alice", "a@x.com")
            .expect("sign access");
        assert_eq!(other_keys.verify_access(&token), Err(TokenError::Invalid));
    }

    #[test]
    fn tampered_token_is_invalid() {
        let keys = make_keys();
        let token = keys
            .sign_access(Uuid::new_v4(), "alice", "a@x.com")
            .expect("sign access");
        let mut tampered = token.clone();
        tampered.pop();
        assert_eq!(keys.verify_access(&tampered), Err(TokenError::Invalid));
    }
}
