use super::*;

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn put_values_upserts_and_reads_back() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage
        .put_values(&[("voiceops_user", "alice"), ("voiceops_token", "t1")])
        .await
        .expect("put");
    storage
        .put_values(&[("voiceops_token", "t2")])
        .await
        .expect("overwrite");

    let values = storage
        .get_values(&["voiceops_user", "voiceops_token", "missing"])
        .await
        .expect("get");
    assert_eq!(values.len(), 2);
    assert_eq!(values["voiceops_user"], "alice");
    assert_eq!(values["voiceops_token"], "t2");
}

#[tokio::test]
async fn delete_values_reports_removed_rows() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage
        .put_values(&[("a", "1"), ("b", "2")])
        .await
        .expect("put");

    let removed = storage.delete_values(&["a", "b", "c"]).await.expect("delete");
    assert_eq!(removed, 2);
    assert!(storage.get_value("a").await.expect("get").is_none());

    let removed_again = storage.delete_values(&["a", "b"]).await.expect("delete");
    assert_eq!(removed_again, 0);
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let suffix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let temp_root = std::env::temp_dir().join(format!("voiceops_storage_test_{suffix}"));
    let db_path = temp_root.join("nested").join("session.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );

    std::fs::remove_dir_all(temp_root).expect("cleanup");
}

#[test]
fn memory_url_has_no_sqlite_path() {
    assert!(sqlite_path("sqlite::memory:").is_none());
    assert_eq!(
        sqlite_path("sqlite://./data/session.db?mode=rwc"),
        Some(PathBuf::from("./data/session.db"))
    );
}
