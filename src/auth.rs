//! Password hashing, bearer tokens and permission codenames.

use std::num::NonZeroU32;

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use ring::rand::{SecureRandom, SystemRandom};
use ring::{digest, pbkdf2};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Malformed password hash")]
    MalformedHash,
    #[error("Iteration count must be greater than zero")]
    ZeroIterations,
    #[error("Failed to gather randomness")]
    Random,
}

const ALGORITHM: &str = "pbkdf2_sha256";
const SALT_LEN: usize = 16;
const HASH_LEN: usize = digest::SHA256_OUTPUT_LEN;
const TOKEN_LEN: usize = 32;

pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 260_000;

/// Django permission codenames understood by the API.
pub mod perms {
    pub const ADD_SUBJECT: &str = "courses.add_subject";
    pub const VIEW_SUBJECT: &str = "courses.view_subject";
    pub const CHANGE_SUBJECT: &str = "courses.change_subject";
    pub const DELETE_SUBJECT: &str = "courses.delete_subject";

    pub const ADD_COURSE: &str = "courses.add_course";
    pub const VIEW_COURSE: &str = "courses.view_course";
    pub const CHANGE_COURSE: &str = "courses.change_course";
    pub const DELETE_COURSE: &str = "courses.delete_course";

    pub const ALL: [&str; 8] = [
        ADD_SUBJECT,
        VIEW_SUBJECT,
        CHANGE_SUBJECT,
        DELETE_SUBJECT,
        ADD_COURSE,
        VIEW_COURSE,
        CHANGE_COURSE,
        DELETE_COURSE,
    ];

    pub fn is_known(codename: &str) -> bool {
        ALL.contains(&codename)
    }
}

/// Hash a password as `pbkdf2_sha256$<iterations>$<salt>$<hash>`.
pub fn hash_password(password: &str, iterations: u32) -> Result<String, AuthError> {
    let rounds = NonZeroU32::new(iterations).ok_or(AuthError::ZeroIterations)?;

    let mut salt = [0u8; SALT_LEN];
    SystemRandom::new()
        .fill(&mut salt)
        .map_err(|_| AuthError::Random)?;

    let mut hash = [0u8; HASH_LEN];
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        rounds,
        &salt,
        password.as_bytes(),
        &mut hash,
    );

    Ok(format!(
        "{ALGORITHM}${iterations}${}${}",
        STANDARD.encode(salt),
        STANDARD.encode(hash)
    ))
}

/// Check a password against an encoded hash in constant time.
pub fn verify_password(password: &str, encoded: &str) -> Result<bool, AuthError> {
    let mut parts = encoded.split('$');
    let (Some(algorithm), Some(iterations), Some(salt), Some(hash), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return Err(AuthError::MalformedHash);
    };

    if algorithm != ALGORITHM {
        return Err(AuthError::MalformedHash);
    }
    let rounds = iterations
        .parse::<u32>()
        .ok()
        .and_then(NonZeroU32::new)
        .ok_or(AuthError::MalformedHash)?;
    let salt = STANDARD
        .decode(salt)
        .map_err(|_| AuthError::MalformedHash)?;
    let hash = STANDARD
        .decode(hash)
        .map_err(|_| AuthError::MalformedHash)?;

    Ok(pbkdf2::verify(
        pbkdf2::PBKDF2_HMAC_SHA256,
        rounds,
        &salt,
        password.as_bytes(),
        &hash,
    )
    .is_ok())
}

/// A fresh random bearer token (URL-safe base64).
pub fn generate_token() -> Result<String, AuthError> {
    let mut bytes = [0u8; TOKEN_LEN];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| AuthError::Random)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// The key sessions are stored under; raw tokens are never persisted.
pub fn token_digest(token: &str) -> String {
    let digest = digest::digest(&digest::SHA256, token.as_bytes());
    URL_SAFE_NO_PAD.encode(digest.as_ref())
}
