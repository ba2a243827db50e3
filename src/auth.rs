use argon2::{
    password_hash::{
        rand_core::{OsRng, RngCore},
        PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
    },
    Argon2,
};
use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use chrono::Utc;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::{
    error::AppError,
    models::{
        session::Session,
        user::{NewUser, User, UserMode},
    },
    state::AppState,
};

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    pub password: String,
    pub full_name: Option<String>,
    pub phone_number: Option<String>,
    #[serde(default)]
    pub user_mode: UserMode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// The caller behind the request's bearer token, if any.
#[derive(Debug, Clone, Default)]
pub struct CurrentUser(pub Option<User>);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Ok(TypedHeader(Authorization(bearer))) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state).await
        else {
            return Ok(Self(None));
        };
        let user = user_from_token(state, bearer.token()).await?;
        Ok(Self(user))
    }
}

impl CurrentUser {
    pub fn require_user(&self) -> Result<&User, AppError> {
        self.0.as_ref().ok_or(AppError::Unauthorized)
    }
}

pub async fn register_user(state: &AppState, request: RegisterRequest) -> Result<User, AppError> {
    let email = request.email.trim().to_lowercase();
    let username = request.username.trim().to_string();
    if !is_plausible_email(&email) {
        return Err(AppError::validation("email is not a valid address"));
    }
    if username.is_empty() {
        return Err(AppError::validation("username must not be empty"));
    }
    if request.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    if state.store.find_user_by_email(&email).await?.is_some() {
        return Err(AppError::bad_request("Email already registered"));
    }
    if state.store.username_taken(&username).await? {
        return Err(AppError::bad_request("Username already taken"));
    }

    let password_hash = hash_password(&request.password)?;
    let user = state
        .store
        .insert_user(NewUser {
            email,
            username,
            password_hash,
            full_name: normalize_optional(request.full_name),
            phone_number: normalize_optional(request.phone_number),
            user_mode: request.user_mode,
        })
        .await?;
    info!(user_id = %user.id, mode = %user.user_mode, "user registered");
    Ok(user)
}

pub async fn authenticate_user(
    state: &AppState,
    email: &str,
    password: &str,
) -> Result<User, AppError> {
    let email = email.trim().to_lowercase();
    let user = state
        .store
        .find_user_by_email(&email)
        .await?
        .ok_or(AppError::Unauthorized)?;
    if !verify_password(password, &user.password_hash) {
        return Err(AppError::Unauthorized);
    }
    Ok(user)
}

/// Opens a session and returns the bearer token. Only its digest is stored.
pub async fn create_session(state: &AppState, user_id: &str) -> Result<String, AppError> {
    let token = generate_token();
    let now = Utc::now();
    let session = Session {
        id: token_digest(&token),
        user_id: user_id.to_string(),
        created_at: now,
        last_seen_at: now,
        expires_at: Some(now + state.config.session_ttl),
    };
    state.store.insert_session(&session).await?;
    Ok(token)
}

pub async fn destroy_session(state: &AppState, token: &str) -> Result<(), AppError> {
    state.store.delete_session(&token_digest(token)).await
}

pub async fn user_from_token(state: &AppState, token: &str) -> Result<Option<User>, AppError> {
    if token.is_empty() {
        return Ok(None);
    }
    state
        .store
        .user_for_session(&token_digest(token), Utc::now())
        .await
}

pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| AppError::Other(anyhow::anyhow!("password hashing failed: {err}")))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

/// 256 random bits, hex encoded.
fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

fn token_digest(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    }
}

pub(crate) fn normalize_optional(input: Option<String>) -> Option<String> {
    input.and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
