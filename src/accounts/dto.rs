use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo::User;

/// Request body for user registration.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub phone: Option<String>,
}

/// Request body for login. `username` also accepts an email address.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Token carrier for both GET (query) and POST (body) verification calls.
#[derive(Debug, Deserialize)]
pub struct VerifyEmailParams {
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResendVerificationRequest {
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct UpgradePremiumRequest {
    #[serde(default)]
    pub payment_reference: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct RegisteredResponse {
    pub message: String,
    pub user_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub message: String,
    pub user: PublicUser,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub user: ProfileUser,
}

#[derive(Debug, Serialize)]
pub struct UpgradeResponse {
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub premium_expires_at: OffsetDateTime,
}

/// Public part of the user returned by login and the listing. Never carries
/// the password hash or verification token.
#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub is_verified: bool,
    pub is_premium: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub premium_expires_at: Option<OffsetDateTime>,
}

/// Profile projection; adds the phone number on top of [`PublicUser`].
#[derive(Debug, Serialize)]
pub struct ProfileUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub is_verified: bool,
    pub is_premium: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub premium_expires_at: Option<OffsetDateTime>,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            is_verified: user.is_verified,
            is_premium: user.is_premium,
            created_at: user.created_at,
            premium_expires_at: user.premium_expires_at,
        }
    }
}

impl From<&User> for ProfileUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            phone: user.phone.clone(),
            is_verified: user.is_verified,
            is_premium: user.is_premium,
            created_at: user.created_at,
            premium_expires_at: user.premium_expires_at,
        }
    }
}
