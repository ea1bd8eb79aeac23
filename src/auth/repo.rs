use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::{NewUser, User};

/// Storage failures, decided at the repository boundary. Callers match on
/// `DuplicateKey` instead of inspecting driver error codes.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("duplicate value for field: {0}")]
    DuplicateKey(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Repository contract for user records. Token lookups take `now` explicitly
/// and only return records whose token expiry is strictly in the future.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn find_by_username_or_email(&self, needle: &str) -> Result<Option<User>, StoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn find_by_verification_token(
        &self,
        token_hash: &str,
        email: &str,
        now: OffsetDateTime,
    ) -> Result<Option<User>, StoreError>;
    async fn find_by_reset_token(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
    ) -> Result<Option<User>, StoreError>;
    async fn create(&self, new_user: NewUser) -> Result<User, StoreError>;
    /// Persist every mutable field of an existing record (read-modify-write).
    async fn save(&self, user: &User) -> Result<(), StoreError>;
}

pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const USER_COLUMNS: &str = r#"
    id, username, email, password_hash, is_email_verified, refresh_token,
    email_verification_token_hash, email_verification_token_expires_at,
    forgot_password_token_hash, forgot_password_token_expires_at,
    created_at, updated_at
"#;

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_by_username_or_email(&self, needle: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1 OR username = $1 LIMIT 1"
        ))
        .bind(needle)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_by_verification_token(
        &self,
        token_hash: &str,
        email: &str,
        now: OffsetDateTime,
    ) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS} FROM users
            WHERE email = $1
              AND email_verification_token_hash = $2
              AND email_verification_token_expires_at > $3
            "#
        ))
        .bind(email)
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_by_reset_token(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
    ) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS} FROM users
            WHERE forgot_password_token_hash = $1
              AND forgot_password_token_expires_at > $2
            "#
        ))
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn create(&self, new_user: NewUser) -> Result<User, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (
                username, email, password_hash,
                email_verification_token_hash, email_verification_token_expires_at
            )
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&new_user.username)
        .bind(&new_user.email)
        .bind(&new_user.password_hash)
        .bind(&new_user.email_verification_token_hash)
        .bind(new_user.email_verification_token_expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(into_store_error)?;
        Ok(user)
    }

    async fn save(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE users SET
                username = $2,
                password_hash = $3,
                is_email_verified = $4,
                refresh_token = $5,
                email_verification_token_hash = $6,
                email_verification_token_expires_at = $7,
                forgot_password_token_hash = $8,
                forgot_password_token_expires_at = $9,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.is_email_verified)
        .bind(&user.refresh_token)
        .bind(&user.email_verification_token_hash)
        .bind(user.email_verification_token_expires_at)
        .bind(&user.forgot_password_token_hash)
        .bind(user.forgot_password_token_expires_at)
        .execute(&self.pool)
        .await
        .map_err(into_store_error)?;
        Ok(())
    }
}

fn into_store_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            let field = db
                .constraint()
                .map(|c| if c.contains("email") { "email" } else { c })
                .unwrap_or("unknown")
                .to_string();
            return StoreError::DuplicateKey(field);
        }
    }
    StoreError::Database(err)
}
