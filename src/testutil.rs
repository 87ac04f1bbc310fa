//! Shared test helpers for course-manager handler tests.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, Response};
use chrono::{Duration, Utc};

use crate::auth::{generate_token, hash_password, token_digest};
use crate::config::{AuthConfig, Config, ServerConfig, StorageConfig};
use crate::object_store::LocalStore;
use crate::storage::models::{SessionRecord, UserRecord};
use crate::storage::{Database, NewUser};
use crate::AppState;

/// Iterations used for test password hashes
pub const TEST_ITERATIONS: u32 = 1_000;

pub const TEST_PASSWORD: &str = "correct horse battery staple";

/// Create a test AppState with a temporary database and local media store.
pub fn test_state(temp_dir: &tempfile::TempDir) -> Arc<AppState> {
    let data_dir = temp_dir.path().join("data");
    let media_dir = temp_dir.path().join("media");

    let config = Config {
        server: ServerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            data_dir: data_dir.to_string_lossy().to_string(),
        },
        storage: StorageConfig {
            media_root: media_dir.to_string_lossy().to_string(),
            ..StorageConfig::default()
        },
        auth: AuthConfig {
            password_hash_iterations: TEST_ITERATIONS,
            ..AuthConfig::default()
        },
        max_upload_size: 1024 * 1024, // 1MB for tests
    };

    let db = Database::open(&data_dir).expect("Failed to open test database");
    let object_store = LocalStore::new(&media_dir).expect("Failed to create test object store");

    Arc::new(AppState {
        config,
        db,
        object_store: Arc::new(object_store),
    })
}

/// Create an active user holding `permissions`, with [`TEST_PASSWORD`].
pub fn create_user(state: &AppState, username: &str, permissions: &[&str]) -> UserRecord {
    insert_user(state, username, false, false, permissions)
}

pub fn create_staff(state: &AppState, username: &str, permissions: &[&str]) -> UserRecord {
    insert_user(state, username, true, false, permissions)
}

pub fn create_superuser(state: &AppState, username: &str) -> UserRecord {
    insert_user(state, username, true, true, &[])
}

fn insert_user(
    state: &AppState,
    username: &str,
    is_staff: bool,
    is_superuser: bool,
    permissions: &[&str],
) -> UserRecord {
    let password_hash =
        hash_password(TEST_PASSWORD, TEST_ITERATIONS).expect("Failed to hash password");
    state
        .db
        .create_user(NewUser {
            username: username.to_string(),
            password_hash,
            is_staff,
            is_superuser,
            permissions: permissions.iter().map(|p| p.to_string()).collect::<BTreeSet<_>>(),
        })
        .expect("Failed to create user")
        .expect("Username already taken")
}

/// Open a session for `user` and return its bearer token.
pub fn login_token(state: &AppState, user: &UserRecord) -> String {
    let token = generate_token().expect("Failed to generate token");
    let now = Utc::now();
    state
        .db
        .put_session(
            &token_digest(&token),
            &SessionRecord {
                user_id: user.id,
                created_at: now,
                expires_at: now + Duration::hours(1),
            },
        )
        .expect("Failed to store session");
    token
}

/// A request with a JSON body and an optional bearer token.
pub fn json_request(
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: serde_json::Value,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("Failed to build request")
}

/// A bodiless request with an optional bearer token.
pub fn empty_request(method: &str, uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).expect("Failed to build request")
}

pub const BOUNDARY: &str = "course-manager-test-boundary";

/// One part of a multipart body: `(name, file name, content type, data)`.
pub type Part<'a> = (&'a str, Option<&'a str>, Option<&'a str>, &'a str);

/// A multipart/form-data request with a bearer token.
pub fn multipart_request(method: &str, uri: &str, token: &str, parts: &[Part<'_>]) -> Request<Body> {
    let mut body = Vec::new();
    for (name, file_name, content_type, data) in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match file_name {
            Some(file_name) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n"
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n").as_bytes(),
            ),
        }
        if let Some(content_type) = content_type {
            body.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(data.as_bytes());
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method(method)
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::from(body))
        .expect("Failed to build request")
}

/// Collect a response body as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    serde_json::from_slice(&bytes).expect("Response body is not JSON")
}
