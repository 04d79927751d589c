use axum::{
    extract::{Query, State},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{AppendHeaders, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tracing::instrument;

use crate::{
    error::AppError,
    sessions::{self, AuthSession},
    state::AppState,
};

use super::dto::{
    LoginRequest, LoginResponse, MessageResponse, ProfileResponse, ProfileUser, PublicUser,
    RegisterRequest, RegisteredResponse, ResendVerificationRequest, UpgradePremiumRequest,
    UpgradeResponse, VerifyEmailParams,
};
use super::services::{self, VerifyOutcome};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_users))
        .route("/register", post(register))
        .route("/verify-email", get(verify_email_get).post(verify_email_post))
        .route("/resend-verification", post(resend_verification))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/profile", get(get_profile))
        .route("/upgrade-premium", post(upgrade_premium))
}

#[instrument(skip(state, payload))]
async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = services::register(&state, payload).await?;
    let message = if outcome.email_sent {
        "Registration successful. Check your email to verify your account."
    } else {
        "Registration successful, but the verification email could not be sent."
    };
    Ok((
        StatusCode::CREATED,
        Json(RegisteredResponse {
            message: message.into(),
            user_id: outcome.user_id,
        }),
    ))
}

#[instrument(skip(state, params))]
async fn verify_email_get(
    State(state): State<AppState>,
    Query(params): Query<VerifyEmailParams>,
) -> Result<Json<MessageResponse>, AppError> {
    verify_email(&state, params).await
}

#[instrument(skip(state, params))]
async fn verify_email_post(
    State(state): State<AppState>,
    Json(params): Json<VerifyEmailParams>,
) -> Result<Json<MessageResponse>, AppError> {
    verify_email(&state, params).await
}

async fn verify_email(
    state: &AppState,
    params: VerifyEmailParams,
) -> Result<Json<MessageResponse>, AppError> {
    let token = params
        .token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Validation("verification token is required".into()))?;

    let message = match services::verify_email(state, token).await? {
        VerifyOutcome::Verified => "Account verified successfully",
        VerifyOutcome::AlreadyVerified => "Account is already verified",
    };
    Ok(Json(MessageResponse {
        message: message.into(),
    }))
}

#[instrument(skip(state, payload))]
async fn resend_verification(
    State(state): State<AppState>,
    Json(payload): Json<ResendVerificationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = services::resend_verification(&state, &payload.email).await?;
    if outcome.email_sent {
        Ok(Json(MessageResponse {
            message: "Verification email resent".into(),
        })
        .into_response())
    } else {
        // The token reissue committed; only the delivery failed.
        Ok((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "Failed to send verification email" })),
        )
            .into_response())
    }
}

#[instrument(skip(state, payload))]
async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (user, token) = services::login(&state, &payload).await?;
    Ok((
        AppendHeaders([(SET_COOKIE, sessions::session_cookie(&token))]),
        Json(LoginResponse {
            message: "Login successful".into(),
            user: PublicUser::from(&user),
        }),
    ))
}

#[instrument(skip(state, headers))]
async fn logout(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Some(token) = sessions::session_token(&headers) {
        state.sessions.destroy(&token).await;
    }
    (
        AppendHeaders([(SET_COOKIE, sessions::clear_session_cookie())]),
        Json(MessageResponse {
            message: "Logged out successfully".into(),
        }),
    )
}

#[instrument(skip(state, auth))]
async fn get_profile(
    State(state): State<AppState>,
    auth: AuthSession,
) -> Result<Json<ProfileResponse>, AppError> {
    let user = services::profile(&state, auth.session.user_id).await?;
    Ok(Json(ProfileResponse {
        user: ProfileUser::from(&user),
    }))
}

#[instrument(skip(state, auth, payload))]
async fn upgrade_premium(
    State(state): State<AppState>,
    auth: AuthSession,
    Json(payload): Json<UpgradePremiumRequest>,
) -> Result<Json<UpgradeResponse>, AppError> {
    let expires_at = services::upgrade_premium(&state, &auth, &payload.payment_reference).await?;
    Ok(Json(UpgradeResponse {
        message: "Premium upgrade successful".into(),
        premium_expires_at: expires_at,
    }))
}

#[instrument(skip(state))]
async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<PublicUser>>, AppError> {
    let users = services::list_users(&state).await?;
    Ok(Json(users.iter().map(PublicUser::from).collect()))
}
