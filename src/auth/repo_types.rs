use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
///
/// `refresh_token` holds the single currently-valid refresh token; a new
/// login overwrites it and thereby revokes the previous session. The two
/// ephemeral token pairs are present only while their flow is pending and
/// hold SHA-256 digests, never raw tokens.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String, // display only, duplicates allowed
    pub email: String,    // unique, trimmed + lowercased
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_email_verified: bool,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing)]
    pub email_verification_token_hash: Option<String>,
    #[serde(skip_serializing)]
    pub email_verification_token_expires_at: Option<OffsetDateTime>,
    #[serde(skip_serializing)]
    pub forgot_password_token_hash: Option<String>,
    #[serde(skip_serializing)]
    pub forgot_password_token_expires_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Fields needed to insert a fresh, unverified user. The password arrives
/// already hashed; the store never hashes anything itself.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub email_verification_token_hash: String,
    pub email_verification_token_expires_at: OffsetDateTime,
}
