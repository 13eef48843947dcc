use super::*;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::{collections::HashMap, sync::Arc};
use tokio::{net::TcpListener, sync::Mutex};

#[derive(Clone, Default)]
struct MockStore {
    commands: Arc<Mutex<HashMap<String, serde_json::Value>>>,
    logs: Arc<Mutex<Vec<serde_json::Value>>>,
}

async fn put_command(
    State(state): State<MockStore>,
    Path(file): Path<String>,
    Json(value): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if file == "broken.json" {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    state.commands.lock().await.insert(file, value.clone());
    Ok(Json(value))
}

async fn get_command(
    State(state): State<MockStore>,
    Path(file): Path<String>,
) -> Json<serde_json::Value> {
    Json(
        state
            .commands
            .lock()
            .await
            .get(&file)
            .cloned()
            .unwrap_or(serde_json::Value::Null),
    )
}

async fn post_log(
    State(state): State<MockStore>,
    Json(value): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    state.logs.lock().await.push(value);
    Json(serde_json::json!({ "name": "-log1" }))
}

async fn spawn_mock_store() -> (String, MockStore) {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let state = MockStore::default();
    let app = Router::new()
        .route("/commands/:file", get(get_command).put(put_command))
        .route("/logs.json", post(post_log))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), state)
}

fn store_for(base_url: String) -> HttpDeviceStore {
    HttpDeviceStore::new(DeviceStoreConfig {
        base_url,
        ..DeviceStoreConfig::default()
    })
    .expect("store")
}

#[test]
fn builds_firebase_style_resource_urls() {
    let store = store_for("https://example.test/root/".to_string());
    assert_eq!(
        store.command_url(&DeviceId::from("fan")).expect("url").as_str(),
        "https://example.test/root/commands/fan.json"
    );
    assert_eq!(
        store.logs_url().expect("url").as_str(),
        "https://example.test/root/logs.json"
    );
}

#[test]
fn device_ids_cannot_escape_the_commands_collection() {
    let store = store_for("https://example.test".to_string());
    let url = store
        .command_url(&DeviceId::from("../logs"))
        .expect("url");
    assert!(url.path().starts_with("/commands/"), "{url}");
}

#[test]
fn rejects_non_hierarchical_base_url() {
    let result = HttpDeviceStore::new(DeviceStoreConfig {
        base_url: "mailto:ops@example.test".into(),
        ..DeviceStoreConfig::default()
    });
    assert!(result.is_err());
}

#[tokio::test]
async fn write_then_read_round_trips_through_remote() {
    let (base_url, mock) = spawn_mock_store().await;
    let store = store_for(base_url);
    let fan = DeviceId::from("fan");

    assert_eq!(store.read_state(&fan).await.expect("read"), PowerState::Off);
    store
        .write_state(&fan, PowerState::On)
        .await
        .expect("write");
    assert_eq!(store.read_state(&fan).await.expect("read"), PowerState::On);
    assert_eq!(
        mock.commands.lock().await.get("fan.json"),
        Some(&serde_json::json!("on"))
    );
}

#[tokio::test]
async fn write_surfaces_remote_failure() {
    let (base_url, _mock) = spawn_mock_store().await;
    let store = store_for(base_url);
    let err = store
        .write_state(&DeviceId::from("broken"), PowerState::On)
        .await
        .expect_err("must fail");
    assert!(err.to_string().contains("broken"), "{err:#}");
}

#[tokio::test]
async fn append_log_posts_audit_record() {
    let (base_url, mock) = spawn_mock_store().await;
    let store = store_for(base_url);
    store
        .append_log(&AuditRecord {
            user: "Mr. Raghavendra".into(),
            action: "office_access".into(),
            timestamp: chrono::Utc::now(),
            devices: vec![DeviceId::from("light"), DeviceId::from("fan")],
            status: "activated".into(),
        })
        .await
        .expect("log");

    let logs = mock.logs.lock().await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0]["action"], "office_access");
    assert_eq!(logs[0]["devices"], serde_json::json!(["light", "fan"]));
}
