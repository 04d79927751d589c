use lazy_static::lazy_static;
use regex::Regex;
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    error::AppError,
    sessions::{AuthSession, Session},
    state::AppState,
    token,
};

use super::{
    dto::{LoginRequest, RegisterRequest},
    password::{hash_password, verify_password},
    repo::{NewUser, User},
};

/// Verification tokens are honored for 24 hours, measured from account
/// creation, not from the latest token issuance.
pub const VERIFICATION_WINDOW: Duration = Duration::hours(24);

/// Premium entitlement term granted on upgrade.
pub const PREMIUM_TERM: Duration = Duration::days(365);

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex =
            Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Normalized registration input: trimmed, email lower-cased, empty phone
/// dropped.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub phone: Option<String>,
}

pub(crate) fn validate_registration(req: &RegisterRequest) -> Result<Registration, AppError> {
    let username = req.username.trim().to_string();
    let email = req.email.trim().to_lowercase();
    let full_name = req.full_name.trim().to_string();
    let phone = req
        .phone
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from);

    if username.is_empty() {
        return Err(AppError::Validation("username is required".into()));
    }
    if email.is_empty() {
        return Err(AppError::Validation("email is required".into()));
    }
    if req.password.is_empty() {
        return Err(AppError::Validation("password is required".into()));
    }
    if full_name.is_empty() {
        return Err(AppError::Validation("full_name is required".into()));
    }

    if username.chars().count() < 3 {
        return Err(AppError::Validation(
            "username must be at least 3 characters".into(),
        ));
    }
    if !is_valid_email(&email) {
        return Err(AppError::Validation("email is invalid".into()));
    }
    if req.password.chars().count() < 8 {
        return Err(AppError::Validation(
            "password must be at least 8 characters".into(),
        ));
    }

    Ok(Registration {
        username,
        email,
        password: req.password.clone(),
        full_name,
        phone,
    })
}

pub struct RegistrationOutcome {
    pub user_id: Uuid,
    pub email_sent: bool,
}

/// Creates an unverified user and attempts the verification email. A failed
/// send never rolls the creation back; the caller reports it in the message.
pub async fn register(
    state: &AppState,
    req: RegisterRequest,
) -> Result<RegistrationOutcome, AppError> {
    let input = validate_registration(&req)?;

    // Both lookups run before any write.
    let username_taken = User::find_by_username(&state.db, &input.username)
        .await?
        .is_some();
    let email_taken = User::find_by_email(&state.db, &input.email).await?.is_some();
    registration_conflict(username_taken, email_taken)?;

    let password_hash = hash_password(&input.password)?;
    let verification_token = token::generate();

    let user = User::create(
        &state.db,
        NewUser {
            username: &input.username,
            email: &input.email,
            password_hash: &password_hash,
            full_name: &input.full_name,
            phone: input.phone.as_deref(),
            verification_token: &verification_token,
        },
    )
    .await
    .map_err(conflict_on_unique)?;

    let email_sent = state
        .notifier
        .send_verification(&user.email, &user.full_name, &verification_token)
        .await;
    if !email_sent {
        warn!(user_id = %user.id, "verification email could not be sent");
    }

    info!(user_id = %user.id, username = %user.username, "user registered");
    Ok(RegistrationOutcome {
        user_id: user.id,
        email_sent,
    })
}

/// Uniqueness gate for registration. When both are taken, username is
/// reported first, so the caller gets a deterministic first-violated-field
/// error.
pub(crate) fn registration_conflict(
    username_taken: bool,
    email_taken: bool,
) -> Result<(), AppError> {
    if username_taken {
        return Err(AppError::Conflict("username is already taken".into()));
    }
    if email_taken {
        return Err(AppError::Conflict("email is already registered".into()));
    }
    Ok(())
}

/// Maps a unique-constraint violation on INSERT (a registration that lost
/// the race after both pre-checks passed) to a conflict.
fn conflict_on_unique(err: anyhow::Error) -> AppError {
    let is_unique = err
        .downcast_ref::<sqlx::Error>()
        .and_then(|e| e.as_database_error())
        .and_then(|db| db.code())
        .map(|code| code == "23505")
        .unwrap_or(false);
    if is_unique {
        AppError::Conflict("username or email is already in use".into())
    } else {
        AppError::Internal(err)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum VerifyOutcome {
    Verified,
    /// No-op success: the account was verified already.
    AlreadyVerified,
}

/// Pure verification decision for a user matched by token. The
/// already-verified check runs before the expiry check.
pub(crate) fn verification_decision(
    user: &User,
    now: OffsetDateTime,
) -> Result<VerifyOutcome, AppError> {
    if user.is_verified {
        return Ok(VerifyOutcome::AlreadyVerified);
    }
    if now - user.created_at > VERIFICATION_WINDOW {
        return Err(AppError::Expired("verification token has expired".into()));
    }
    Ok(VerifyOutcome::Verified)
}

pub async fn verify_email(state: &AppState, token: &str) -> Result<VerifyOutcome, AppError> {
    let user = User::find_by_verification_token(&state.db, token)
        .await?
        .ok_or_else(|| AppError::NotFound("invalid verification token".into()))?;

    match verification_decision(&user, OffsetDateTime::now_utc())? {
        VerifyOutcome::AlreadyVerified => Ok(VerifyOutcome::AlreadyVerified),
        VerifyOutcome::Verified => {
            let updated = User::mark_verified(&state.db, user.id).await?;
            if updated == 0 {
                // A concurrent verify won the race; same end state.
                return Ok(VerifyOutcome::AlreadyVerified);
            }
            info!(user_id = %user.id, "account verified");
            Ok(VerifyOutcome::Verified)
        }
    }
}

pub struct ResendOutcome {
    pub email_sent: bool,
}

/// Reissues a fresh verification token. The reissue commits regardless of
/// the send outcome.
pub async fn resend_verification(state: &AppState, email: &str) -> Result<ResendOutcome, AppError> {
    let email = email.trim().to_lowercase();
    if email.is_empty() {
        return Err(AppError::Validation("email is required".into()));
    }

    let user = User::find_by_email(&state.db, &email)
        .await?
        .ok_or_else(|| AppError::NotFound("user not found".into()))?;
    resend_decision(&user)?;

    let new_token = token::generate();
    let updated = User::replace_verification_token(&state.db, user.id, &new_token).await?;
    if updated == 0 {
        return Err(AppError::Conflict("account is already verified".into()));
    }

    let email_sent = state
        .notifier
        .send_verification(&user.email, &user.full_name, &new_token)
        .await;

    info!(user_id = %user.id, email_sent, "verification token reissued");
    Ok(ResendOutcome { email_sent })
}

/// A fresh token is only issued while verification is still pending.
pub(crate) fn resend_decision(user: &User) -> Result<(), AppError> {
    if user.is_verified {
        return Err(AppError::Conflict("account is already verified".into()));
    }
    Ok(())
}

fn invalid_credentials() -> AppError {
    AppError::Unauthorized("invalid credentials".into())
}

/// Password and verification-status gate. Unknown user and wrong password
/// produce the same error; the unverified check only runs once the password
/// has been verified, so it never leaks account state to bad credentials.
pub(crate) fn authenticate(user: Option<User>, password: &str) -> Result<User, AppError> {
    let user = match user {
        Some(user) => user,
        None => return Err(invalid_credentials()),
    };

    if !verify_password(password, &user.password_hash)? {
        return Err(invalid_credentials());
    }

    if !user.is_verified {
        return Err(AppError::Unauthorized(
            "you must verify your email before logging in".into(),
        ));
    }

    Ok(user)
}

/// Authenticates and establishes a session, returning the user and the
/// opaque session token for the cookie.
pub async fn login(state: &AppState, req: &LoginRequest) -> Result<(User, String), AppError> {
    let username = req.username.trim();
    if username.is_empty() || req.password.is_empty() {
        return Err(AppError::Validation(
            "username and password are required".into(),
        ));
    }

    let found = User::find_by_login(&state.db, username).await?;
    let user = authenticate(found, &req.password).inspect_err(|_| {
        warn!(login = %username, "login rejected");
    })?;

    let token = state
        .sessions
        .create(Session {
            user_id: user.id,
            username: user.username.clone(),
            is_premium: user.is_premium,
        })
        .await;

    info!(user_id = %user.id, "user logged in");
    Ok((user, token))
}

pub(crate) fn premium_expiry(now: OffsetDateTime) -> OffsetDateTime {
    now + PREMIUM_TERM
}

/// Premium is granted at most once per user.
pub(crate) fn upgrade_decision(user: &User) -> Result<(), AppError> {
    if user.is_premium {
        return Err(AppError::Conflict("user is already premium".into()));
    }
    Ok(())
}

/// Upgrades the session's user to premium and syncs the session's cached
/// flag. The payment reference is accepted as-is; settlement against a
/// payment processor happens outside this service.
pub async fn upgrade_premium(
    state: &AppState,
    auth: &AuthSession,
    payment_reference: &str,
) -> Result<OffsetDateTime, AppError> {
    if payment_reference.trim().is_empty() {
        return Err(AppError::Validation("payment_reference is required".into()));
    }

    let user = User::find_by_id(&state.db, auth.session.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("user not found".into()))?;
    upgrade_decision(&user)?;

    let expires_at = premium_expiry(OffsetDateTime::now_utc());
    let updated = User::grant_premium(&state.db, user.id, expires_at).await?;
    if updated == 0 {
        return Err(AppError::Conflict("user is already premium".into()));
    }

    state.sessions.set_premium(&auth.token, true).await;

    if !state
        .notifier
        .send_premium_confirmation(&user.email, &user.full_name)
        .await
    {
        warn!(user_id = %user.id, "premium confirmation email could not be sent");
    }

    info!(user_id = %user.id, %payment_reference, "premium upgrade applied");
    Ok(expires_at)
}

pub async fn profile(state: &AppState, user_id: Uuid) -> Result<User, AppError> {
    User::find_by_id(&state.db, user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("user not found".into()))
}

pub async fn list_users(state: &AppState) -> Result<Vec<User>, AppError> {
    Ok(User::list(&state.db).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register_request() -> RegisterRequest {
        RegisterRequest {
            username: "ana".into(),
            email: "ANA@x.com".into(),
            password: "longenough1".into(),
            full_name: "Ana Lopez".into(),
            phone: None,
        }
    }

    fn user_created_at(created_at: OffsetDateTime) -> User {
        User {
            id: Uuid::new_v4(),
            username: "ana".into(),
            email: "ana@x.com".into(),
            password_hash: hash_password("longenough1").unwrap(),
            full_name: "Ana Lopez".into(),
            phone: None,
            is_verified: false,
            is_premium: false,
            verification_token: Some(token::generate()),
            created_at,
            premium_expires_at: None,
        }
    }

    mod validation {
        use super::*;

        #[test]
        fn accepts_and_normalizes_valid_input() {
            let mut req = register_request();
            req.email = "  ANA@X.com ".into();
            req.username = " ana ".into();
            req.phone = Some("  ".into());

            let input = validate_registration(&req).unwrap();
            assert_eq!(input.username, "ana");
            assert_eq!(input.email, "ana@x.com");
            assert_eq!(input.full_name, "Ana Lopez");
            assert_eq!(input.phone, None);
        }

        #[test]
        fn keeps_non_empty_phone() {
            let mut req = register_request();
            req.phone = Some(" +34 600 000 000 ".into());
            let input = validate_registration(&req).unwrap();
            assert_eq!(input.phone.as_deref(), Some("+34 600 000 000"));
        }

        #[test]
        fn missing_fields_name_the_offending_field() {
            let cases = [
                (RegisterRequest { username: "".into(), ..register_request() }, "username is required"),
                (RegisterRequest { email: "".into(), ..register_request() }, "email is required"),
                (RegisterRequest { password: "".into(), ..register_request() }, "password is required"),
                (RegisterRequest { full_name: "".into(), ..register_request() }, "full_name is required"),
            ];
            for (req, expected) in cases {
                match validate_registration(&req) {
                    Err(AppError::Validation(msg)) => assert_eq!(msg, expected),
                    other => panic!("expected validation error, got {other:?}"),
                }
            }
        }

        #[test]
        fn rejects_short_username() {
            let mut req = register_request();
            req.username = "yo".into();
            assert!(matches!(
                validate_registration(&req),
                Err(AppError::Validation(msg)) if msg.contains("username")
            ));
        }

        #[test]
        fn rejects_invalid_email() {
            for email in ["not-an-email", "a@b", "a b@c.com", "a@b.c"] {
                let mut req = register_request();
                req.email = email.into();
                assert!(
                    matches!(
                        validate_registration(&req),
                        Err(AppError::Validation(msg)) if msg.contains("email")
                    ),
                    "email {email:?} should be rejected"
                );
            }
        }

        #[test]
        fn rejects_short_password() {
            let mut req = register_request();
            req.password = "short77".into();
            assert!(matches!(
                validate_registration(&req),
                Err(AppError::Validation(msg)) if msg.contains("password")
            ));
        }
    }

    mod verification {
        use super::*;

        #[test]
        fn token_within_window_verifies() {
            let now = OffsetDateTime::now_utc();
            let user = user_created_at(now - Duration::hours(23));
            assert_eq!(
                verification_decision(&user, now).unwrap(),
                VerifyOutcome::Verified
            );
        }

        #[test]
        fn token_past_window_expires() {
            let now = OffsetDateTime::now_utc();
            let user = user_created_at(now - Duration::hours(25));
            assert!(matches!(
                verification_decision(&user, now),
                Err(AppError::Expired(_))
            ));
        }

        #[test]
        fn window_is_measured_from_creation_not_reissue() {
            // A token reissued on day 2 is still judged against created_at.
            let now = OffsetDateTime::now_utc();
            let mut user = user_created_at(now - Duration::hours(40));
            user.verification_token = Some(token::generate());
            assert!(matches!(
                verification_decision(&user, now),
                Err(AppError::Expired(_))
            ));
        }

        #[test]
        fn already_verified_is_noop_success_even_past_window() {
            let now = OffsetDateTime::now_utc();
            let mut user = user_created_at(now - Duration::hours(25));
            user.is_verified = true;
            user.verification_token = None;
            assert_eq!(
                verification_decision(&user, now).unwrap(),
                VerifyOutcome::AlreadyVerified
            );
        }
    }

    mod authentication {
        use super::*;

        fn verified_user() -> User {
            let mut user = user_created_at(OffsetDateTime::now_utc());
            user.is_verified = true;
            user.verification_token = None;
            user
        }

        #[test]
        fn unknown_user_and_wrong_password_are_indistinguishable() {
            let unknown = authenticate(None, "longenough1").unwrap_err();
            let wrong = authenticate(Some(verified_user()), "wrong-password").unwrap_err();
            assert_eq!(unknown.to_string(), wrong.to_string());
            assert_eq!(unknown.status(), wrong.status());
        }

        #[test]
        fn unverified_user_is_rejected_after_password_check() {
            let user = user_created_at(OffsetDateTime::now_utc());
            let err = authenticate(Some(user), "longenough1").unwrap_err();
            match err {
                AppError::Unauthorized(msg) => assert!(msg.contains("verify")),
                other => panic!("expected unauthorized, got {other:?}"),
            }
        }

        #[test]
        fn unverified_user_with_bad_password_gets_generic_error() {
            let user = user_created_at(OffsetDateTime::now_utc());
            let err = authenticate(Some(user), "wrong-password").unwrap_err();
            assert_eq!(err.to_string(), invalid_credentials().to_string());
        }

        #[test]
        fn valid_credentials_pass() {
            let user = verified_user();
            let id = user.id;
            let authed = authenticate(Some(user), "longenough1").unwrap();
            assert_eq!(authed.id, id);
        }
    }

    mod premium {
        use super::*;
        use time::macros::datetime;

        #[test]
        fn expiry_is_exactly_365_days_out() {
            let now = datetime!(2026-03-01 12:00:00 UTC);
            assert_eq!(premium_expiry(now), now + Duration::days(365));
            assert_eq!(premium_expiry(now) - now, Duration::days(365));
        }
    }

    mod conflicts {
        use super::*;

        #[test]
        fn duplicate_username_is_a_conflict() {
            let err = registration_conflict(true, false).unwrap_err();
            assert!(matches!(err, AppError::Conflict(msg) if msg.contains("username")));
        }

        #[test]
        fn duplicate_email_is_a_conflict() {
            let err = registration_conflict(false, true).unwrap_err();
            assert!(matches!(err, AppError::Conflict(msg) if msg.contains("email")));
        }

        #[test]
        fn username_is_reported_first_when_both_are_taken() {
            let err = registration_conflict(true, true).unwrap_err();
            assert!(matches!(err, AppError::Conflict(msg) if msg.contains("username")));
        }

        #[test]
        fn free_username_and_email_pass() {
            assert!(registration_conflict(false, false).is_ok());
        }

        #[test]
        fn upgrade_rejects_already_premium_user() {
            let now = OffsetDateTime::now_utc();
            let mut user = user_created_at(now);
            user.is_verified = true;
            user.verification_token = None;
            user.is_premium = true;
            user.premium_expires_at = Some(premium_expiry(now));

            let err = upgrade_decision(&user).unwrap_err();
            assert!(matches!(err, AppError::Conflict(msg) if msg.contains("premium")));
        }

        #[test]
        fn upgrade_passes_for_non_premium_user() {
            let mut user = user_created_at(OffsetDateTime::now_utc());
            user.is_verified = true;
            user.verification_token = None;
            assert!(upgrade_decision(&user).is_ok());
        }

        #[test]
        fn resend_rejects_already_verified_account() {
            let mut user = user_created_at(OffsetDateTime::now_utc());
            user.is_verified = true;
            user.verification_token = None;

            let err = resend_decision(&user).unwrap_err();
            assert!(matches!(err, AppError::Conflict(msg) if msg.contains("verified")));
        }

        #[test]
        fn resend_passes_while_verification_is_pending() {
            let user = user_created_at(OffsetDateTime::now_utc());
            assert!(resend_decision(&user).is_ok());
        }
    }
}
