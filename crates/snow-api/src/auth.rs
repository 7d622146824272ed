use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::{debug, info};
use uuid::Uuid;

use snow_ai::ChatCompleter;
use snow_db::{Database, DatabaseError};
use snow_types::api::{Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};
use snow_types::models::User;

use crate::error::{Result, ServiceError};
use crate::state::{AppState, run_blocking};

pub const MAX_USERNAME_LEN: usize = 50;

const TOKEN_TTL_DAYS: i64 = 30;

/// Well-formed Argon2id hash that matches no password. Verified against when
/// the username is unknown so both failure paths cost the same.
const DUMMY_HASH: &str =
    "$argon2id$v=19$m=19456,t=2,p=1$lGvb8lcdtTWx+7ifoxKOoA$+/HN1enuZhxbSmD8mQEnsmImNj7BpGU9YGoinRwd0qk";

/// HS256 keys for issuing and checking session tokens.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl JwtKeys {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn issue(&self, user_id: Uuid, username: &str) -> Result<String> {
        let claims = Claims {
            sub: user_id,
            username: username.to_string(),
            exp: (chrono::Utc::now() + chrono::Duration::days(TOKEN_TTL_DAYS)).timestamp() as usize,
        };

        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| ServiceError::Internal(format!("token encoding failed: {}", e)))
    }

    pub fn verify(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(token, &self.decoding, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| {
                debug!("Rejected token: {}", e);
                ServiceError::AuthenticationFailed
            })
    }
}

fn validate_credentials(username: &str, password: &str) -> Result<()> {
    if username.trim().is_empty() {
        return Err(ServiceError::validation("username is required"));
    }
    if username.chars().count() > MAX_USERNAME_LEN {
        return Err(ServiceError::validation(format!(
            "username must be at most {} characters",
            MAX_USERNAME_LEN
        )));
    }
    if password.is_empty() {
        return Err(ServiceError::validation("password is required"));
    }
    Ok(())
}

/// Create a user with an Argon2id hash of `password`.
pub fn register_user(db: &Database, username: &str, password: &str) -> Result<User> {
    validate_credentials(username, password)?;

    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| ServiceError::Internal(format!("password hashing failed: {}", e)))?
        .to_string();

    let user_id = Uuid::new_v4();
    let row = db
        .create_user(&user_id.to_string(), username, &password_hash)
        .map_err(|e| match e {
            DatabaseError::AlreadyExists { .. } => ServiceError::DuplicateUsername,
            other => other.into(),
        })?;

    info!("Registered user {}", username);
    Ok(row.into_user()?)
}

/// Check a username/password pair. Unknown users and wrong passwords fail the
/// same way.
pub fn authenticate(db: &Database, username: &str, password: &str) -> Result<User> {
    let row = db.get_user_by_username(username)?;
    let stored = row.as_ref().map_or(DUMMY_HASH, |r| r.password.as_str());
    let verified = verify_password(password, stored);

    match row {
        Some(row) if verified => Ok(row.into_user()?),
        _ => {
            debug!("Failed login for {}", username);
            Err(ServiceError::AuthenticationFailed)
        }
    }
}

fn verify_password(password: &str, phc: &str) -> bool {
    PasswordHash::new(phc)
        .map(|hash| Argon2::default().verify_password(password.as_bytes(), &hash).is_ok())
        .unwrap_or(false)
}

pub async fn register<C: ChatCompleter + 'static>(
    State(state): State<AppState<C>>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse> {
    let db = state.db.clone();
    let user = run_blocking(move || register_user(&db, &req.username, &req.password)).await?;
    let token = state.jwt.issue(user.id, &user.username)?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_id: user.id,
            token,
        }),
    ))
}

pub async fn login<C: ChatCompleter + 'static>(
    State(state): State<AppState<C>>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse> {
    let db = state.db.clone();
    let user = run_blocking(move || authenticate(&db, &req.username, &req.password)).await?;
    let token = state.jwt.issue(user.id, &user.username)?;

    Ok(Json(LoginResponse {
        user_id: user.id,
        username: user.username,
        token,
    }))
}
