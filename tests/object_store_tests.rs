use bytes::Bytes;
use course_manager::object_store::{
    upload_key, validate_key, LocalStore, ObjectStore, ObjectStoreError,
};

#[tokio::test]
async fn test_local_store_put_get_nested_key() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path()).unwrap();

    let data = Bytes::from("hello world");
    store
        .put("files/abc/notes.txt", data.clone(), "text/plain")
        .await
        .unwrap();

    let retrieved = store.get("files/abc/notes.txt").await.unwrap();
    assert_eq!(retrieved, data);
    assert!(dir.path().join("files").join("abc").join("notes.txt").is_file());
}

#[tokio::test]
async fn test_local_store_exists() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path()).unwrap();

    assert!(!store.exists("images/x/missing.png").await.unwrap());

    store
        .put("images/x/present.png", Bytes::from("data"), "image/png")
        .await
        .unwrap();
    assert!(store.exists("images/x/present.png").await.unwrap());
}

#[tokio::test]
async fn test_local_store_delete_removes_upload_directory() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path()).unwrap();

    store
        .put("files/u1/slides.pdf", Bytes::from("data"), "application/pdf")
        .await
        .unwrap();
    store.delete("files/u1/slides.pdf").await.unwrap();

    assert!(!store.exists("files/u1/slides.pdf").await.unwrap());
    assert!(!dir.path().join("files").join("u1").exists());
}

#[tokio::test]
async fn test_local_store_delete_nonexistent() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path()).unwrap();

    // Deleting a nonexistent key should not error
    store.delete("files/none/nothing.txt").await.unwrap();
}

#[tokio::test]
async fn test_local_store_get_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path()).unwrap();

    let result = store.get("files/none/missing.txt").await;
    assert!(matches!(result, Err(ObjectStoreError::NotFound(_))));
}

#[tokio::test]
async fn test_local_store_rejects_escaping_keys() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path().join("media")).unwrap();

    let result = store
        .put("../outside.txt", Bytes::from("data"), "text/plain")
        .await;
    assert!(matches!(result, Err(ObjectStoreError::InvalidKey(_))));
    assert!(!dir.path().join("outside.txt").exists());
}

#[test]
fn test_validate_key() {
    assert!(validate_key("files/abc/notes.txt").is_ok());

    for bad in ["", "/etc/passwd", "a//b", "a/./b", "a/../b", "a\\b", "files/"] {
        assert!(validate_key(bad).is_err(), "{bad:?} should be rejected");
    }
}

#[test]
fn test_upload_key_is_unique_and_sanitized() {
    let first = upload_key("images", Some("My Diagram (1).png"));
    let second = upload_key("images", Some("My Diagram (1).png"));
    assert_ne!(first, second);

    let segments: Vec<_> = first.split('/').collect();
    assert_eq!(segments.len(), 3);
    assert_eq!(segments[0], "images");
    assert_eq!(segments[2], "My_Diagram__1_.png");
    assert!(validate_key(&first).is_ok());
}

#[test]
fn test_upload_key_drops_client_directories() {
    let key = upload_key("files", Some("C:\\Users\\me\\..\\report.pdf"));
    assert!(key.ends_with("/report.pdf"));

    let key = upload_key("files", Some(".."));
    assert!(key.ends_with("/upload"));

    let key = upload_key("files", None);
    assert!(key.ends_with("/upload"));
}
