use storage::Storage;

#[tokio::test]
async fn values_survive_reopening_the_database() {
    let suffix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let temp_root = std::env::temp_dir().join(format!("voiceops_reopen_test_{suffix}"));
    let db_path = temp_root.join("session.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    {
        let storage = Storage::new(&database_url).await.expect("db");
        storage
            .put_values(&[("voiceops_user", "Mr. Raghavendra")])
            .await
            .expect("put");
        storage.pool().close().await;
    }

    let reopened = Storage::new(&database_url).await.expect("reopen");
    let stored = reopened
        .get_value("voiceops_user")
        .await
        .expect("get")
        .expect("value present");
    assert_eq!(stored.value, "Mr. Raghavendra");
    reopened.pool().close().await;

    std::fs::remove_dir_all(temp_root).expect("cleanup");
}
