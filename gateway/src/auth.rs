//! HTTP basic authentication against argon2 password hashes.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHasher, SaltString},
    Argon2, PasswordHash, PasswordVerifier,
};
use axum::http::{header, HeaderMap};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use signer::Credential;

use crate::settings::FileSettings;

pub const REALM: &str = "signbox";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing basic credentials")]
    Missing,
    #[error("malformed basic credentials")]
    Malformed,
    #[error("invalid username or password")]
    Rejected,
}

#[derive(Debug, Clone)]
pub struct BasicCredentials {
    pub username: String,
    pub password: Credential,
}

impl BasicCredentials {
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, AuthError> {
        let value = headers
            .get(header::AUTHORIZATION)
            .ok_or(AuthError::Missing)?
            .to_str()
            .map_err(|_| AuthError::Malformed)?;
        let encoded = value
            .strip_prefix("Basic ")
            .or_else(|| value.strip_prefix("basic "))
            .ok_or(AuthError::Missing)?;
        let decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|_| AuthError::Malformed)?;
        let decoded = String::from_utf8(decoded).map_err(|_| AuthError::Malformed)?;
        let (username, password) = decoded.split_once(':').ok_or(AuthError::Malformed)?;
        Ok(Self {
            username: username.to_string(),
            password: Credential::new(password),
        })
    }

    /// Header value for outgoing requests.
    pub fn header_value(username: &str, password: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
    }
}

/// Caller identity after a successful check.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub name: String,
}

/// Check basic credentials from `headers` against the configured users.
pub fn authenticate(
    settings: &FileSettings,
    headers: &HeaderMap,
) -> Result<AuthenticatedUser, AuthError> {
    let creds = BasicCredentials::from_headers(headers)?;
    let Some(user) = settings.user(&creds.username) else {
        // Timing-safe: still do argon2 work before returning
        let salt = SaltString::generate(&mut OsRng);
        let _ = Argon2::default().hash_password(creds.password.expose().as_bytes(), &salt);
        return Err(AuthError::Rejected);
    };
    if !verify_password(&user.password_hash, &creds.password) {
        return Err(AuthError::Rejected);
    }
    Ok(AuthenticatedUser {
        name: creds.username,
    })
}

pub fn verify_password(hash: &str, password: &Credential) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.expose().as_bytes(), &parsed)
        .is_ok()
}

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("argon2 hash error: {e}"))?
        .to_string())
}
