use course_manager::auth::{
    generate_token, hash_password, perms, token_digest, verify_password, AuthError,
};

#[test]
fn test_hash_and_verify_password() {
    let encoded = hash_password("s3cret", 1_000).unwrap();

    assert!(encoded.starts_with("pbkdf2_sha256$1000$"));
    assert!(verify_password("s3cret", &encoded).unwrap());
    assert!(!verify_password("S3cret", &encoded).unwrap());
}

#[test]
fn test_hashes_are_salted() {
    let first = hash_password("same", 1_000).unwrap();
    let second = hash_password("same", 1_000).unwrap();

    assert_ne!(first, second);
    assert!(verify_password("same", &first).unwrap());
    assert!(verify_password("same", &second).unwrap());
}

#[test]
fn test_zero_iterations_rejected() {
    assert!(matches!(
        hash_password("pw", 0),
        Err(AuthError::ZeroIterations)
    ));
}

#[test]
fn test_malformed_hashes() {
    for bad in [
        "",
        "plaintext",
        "md5$1$c2FsdA==$aGFzaA==",
        "pbkdf2_sha256$0$c2FsdA==$aGFzaA==",
        "pbkdf2_sha256$many$c2FsdA==$aGFzaA==",
        "pbkdf2_sha256$1000$not base64!$aGFzaA==",
        "pbkdf2_sha256$1000$c2FsdA==$aGFzaA==$extra",
    ] {
        assert!(
            matches!(verify_password("pw", bad), Err(AuthError::MalformedHash)),
            "{bad:?} should be rejected"
        );
    }
}

#[test]
fn test_tokens_are_random_and_url_safe() {
    let first = generate_token().unwrap();
    let second = generate_token().unwrap();

    assert_ne!(first, second);
    assert!(first
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
}

#[test]
fn test_token_digest_is_stable_and_hides_token() {
    let token = generate_token().unwrap();

    assert_eq!(token_digest(&token), token_digest(&token));
    assert_ne!(token_digest(&token), token);
    assert_ne!(token_digest("a"), token_digest("b"));
}

#[test]
fn test_known_permissions() {
    assert!(perms::is_known(perms::ADD_COURSE));
    assert!(perms::is_known("courses.view_subject"));
    assert!(!perms::is_known("courses.add_module"));
    assert!(!perms::is_known("add_course"));
}
