use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    /// Stored lower-cased.
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub is_verified: bool,
    pub is_premium: bool,
    /// Present while verification is pending, cleared once verified.
    #[serde(skip_serializing)]
    pub verification_token: Option<String>,
    pub created_at: OffsetDateTime,
    pub premium_expires_at: Option<OffsetDateTime>,
}

/// Column data for a freshly registered, unverified user.
pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub full_name: &'a str,
    pub phone: Option<&'a str>,
    pub verification_token: &'a str,
}

impl User {
    pub async fn find_by_username(db: &PgPool, username: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, full_name, phone,
                   is_verified, is_premium, verification_token, created_at, premium_expires_at
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn find_by_email(db: &PgPool, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, full_name, phone,
                   is_verified, is_premium, verification_token, created_at, premium_expires_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Login lookup: the input is matched verbatim against either column.
    pub async fn find_by_login(db: &PgPool, username_or_email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, full_name, phone,
                   is_verified, is_premium, verification_token, created_at, premium_expires_at
            FROM users
            WHERE username = $1 OR email = $1
            "#,
        )
        .bind(username_or_email)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn find_by_verification_token(
        db: &PgPool,
        token: &str,
    ) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, full_name, phone,
                   is_verified, is_premium, verification_token, created_at, premium_expires_at
            FROM users
            WHERE verification_token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn find_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, full_name, phone,
                   is_verified, is_premium, verification_token, created_at, premium_expires_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn create(db: &PgPool, new: NewUser<'_>) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, email, password_hash, full_name, phone, verification_token)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, username, email, password_hash, full_name, phone,
                      is_verified, is_premium, verification_token, created_at, premium_expires_at
            "#,
        )
        .bind(new.username)
        .bind(new.email)
        .bind(new.password_hash)
        .bind(new.full_name)
        .bind(new.phone)
        .bind(new.verification_token)
        .fetch_one(db)
        .await?;
        Ok(user)
    }

    /// Flips the user to verified and clears the token. Conditional on the
    /// current state so concurrent verifies cannot both apply; returns the
    /// number of rows updated.
    pub async fn mark_verified(db: &PgPool, id: Uuid) -> anyhow::Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET is_verified = TRUE, verification_token = NULL
            WHERE id = $1 AND is_verified = FALSE
            "#,
        )
        .bind(id)
        .execute(db)
        .await?;
        Ok(result.rows_affected())
    }

    /// Replaces the pending verification token. Returns 0 when the user has
    /// been verified in the meantime.
    pub async fn replace_verification_token(
        db: &PgPool,
        id: Uuid,
        token: &str,
    ) -> anyhow::Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET verification_token = $2
            WHERE id = $1 AND is_verified = FALSE
            "#,
        )
        .bind(id)
        .bind(token)
        .execute(db)
        .await?;
        Ok(result.rows_affected())
    }

    /// Grants premium until `expires_at`. Conditional on the current state
    /// so two concurrent upgrades cannot both succeed.
    pub async fn grant_premium(
        db: &PgPool,
        id: Uuid,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET is_premium = TRUE, premium_expires_at = $2
            WHERE id = $1 AND is_premium = FALSE
            "#,
        )
        .bind(id)
        .bind(expires_at)
        .execute(db)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn list(db: &PgPool) -> anyhow::Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, full_name, phone,
                   is_verified, is_premium, verification_token, created_at, premium_expires_at
            FROM users
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(db)
        .await?;
        Ok(users)
    }
}
