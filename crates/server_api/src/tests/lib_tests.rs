use super::*;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;

#[derive(Default)]
struct FakeStore {
    values: Mutex<HashMap<DeviceId, PowerState>>,
    writes: Mutex<Vec<(DeviceId, PowerState)>>,
    logs: Mutex<Vec<AuditRecord>>,
    failing: HashSet<String>,
    fail_logs: bool,
}

impl FakeStore {
    fn failing(devices: &[&str]) -> Self {
        Self {
            failing: devices.iter().map(|d| d.to_string()).collect(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl DeviceStateStore for FakeStore {
    async fn read_state(&self, device: &DeviceId) -> anyhow::Result<PowerState> {
        if self.failing.contains(device.as_str()) {
            anyhow::bail!("store offline");
        }
        Ok(self
            .values
            .lock()
            .await
            .get(device)
            .copied()
            .unwrap_or_default())
    }

    async fn write_state(&self, device: &DeviceId, state: PowerState) -> anyhow::Result<()> {
        if self.failing.contains(device.as_str()) {
            anyhow::bail!("remote store returned 503");
        }
        self.values.lock().await.insert(device.clone(), state);
        self.writes.lock().await.push((device.clone(), state));
        Ok(())
    }

    async fn append_log(&self, record: &AuditRecord) -> anyhow::Result<()> {
        if self.fail_logs {
            anyhow::bail!("log collection unavailable");
        }
        self.logs.lock().await.push(record.clone());
        Ok(())
    }
}

fn context(store: Arc<FakeStore>) -> ApiContext {
    ApiContext {
        devices: store,
        credential: ScanCredential::default(),
        token: SessionTokenConfig::default(),
    }
}

fn scan(payload: &str) -> ScanAuthRequest {
    ScanAuthRequest {
        qr_data: payload.into(),
    }
}

#[tokio::test]
async fn matching_scan_opens_door_and_lights() {
    let store = Arc::new(FakeStore::default());
    let ctx = context(store.clone());

    let response = authenticate_scan(&ctx, &scan("http://en.m.wikipedia.org"))
        .await
        .expect("auth");

    assert!(response.success);
    assert_eq!(response.message, DOOR_OPENED_MESSAGE);
    assert_eq!(response.user.display_name, "Mr. Raghavendra");
    assert_eq!(
        response.devices,
        vec![DeviceId::from("servo"), DeviceId::from("lights")]
    );
    assert!(response.warning.is_none());
    assert!(!response.token.is_empty());
    assert!(response.expires_at > Utc::now());

    let mut writes = store.writes.lock().await.clone();
    writes.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        writes,
        vec![
            (DeviceId::from("lights"), PowerState::On),
            (DeviceId::from("servo"), PowerState::On),
        ]
    );
}

#[tokio::test]
async fn device_failure_still_authenticates_with_warning() {
    let store = Arc::new(FakeStore::failing(&["servo"]));
    let ctx = context(store.clone());

    let response = authenticate_scan(&ctx, &scan("http://en.m.wikipedia.org"))
        .await
        .expect("auth");

    assert!(response.success);
    assert_eq!(response.message, AUTHENTICATED_MESSAGE);
    assert_eq!(response.warning.as_deref(), Some(DEVICE_WARNING));
    assert!(response.devices.is_empty());
    assert!(!response.token.is_empty());
}

#[tokio::test]
async fn near_miss_payload_is_rejected_without_writes() {
    let store = Arc::new(FakeStore::default());
    let ctx = context(store.clone());

    for payload in ["garbage", "https://en.m.wikipedia.org", "http://en.m.wikipedia.org/"] {
        let err = authenticate_scan(&ctx, &scan(payload))
            .await
            .expect_err("mismatch");
        assert_eq!(err.code, ErrorCode::Validation);
        assert_eq!(err.message, SCAN_MISMATCH_MESSAGE);
    }
    assert!(store.writes.lock().await.is_empty());
}

#[tokio::test]
async fn office_access_turns_on_light_and_fan_then_logs() {
    let store = Arc::new(FakeStore::default());
    let ctx = context(store.clone());

    let response = office_access(
        &ctx,
        &OfficeAccessRequest {
            action: OFFICE_WELCOME_ACTION.into(),
        },
    )
    .await
    .expect("office");

    assert_eq!(response.message, OFFICE_WELCOME_MESSAGE);
    assert_eq!(
        *store.writes.lock().await,
        vec![
            (DeviceId::from("light"), PowerState::On),
            (DeviceId::from("fan"), PowerState::On),
        ]
    );
    let logs = store.logs.lock().await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].action, "office_access");
    assert_eq!(logs[0].status, "activated");
    assert_eq!(logs[0].user, "Mr. Raghavendra");
}

#[tokio::test]
async fn office_access_rejects_unknown_action() {
    let ctx = context(Arc::new(FakeStore::default()));
    let err = office_access(
        &ctx,
        &OfficeAccessRequest {
            action: "open_sesame".into(),
        },
    )
    .await
    .expect_err("invalid");
    assert_eq!(err.code, ErrorCode::Validation);
    assert_eq!(err.message, "Invalid action");
}

#[tokio::test]
async fn office_access_store_failure_is_internal() {
    let store = Arc::new(FakeStore {
        fail_logs: true,
        ..FakeStore::default()
    });
    let ctx = context(store);
    let err = office_access(
        &ctx,
        &OfficeAccessRequest {
            action: OFFICE_WELCOME_ACTION.into(),
        },
    )
    .await
    .expect_err("failure");
    assert_eq!(err.code, ErrorCode::Internal);
    assert_eq!(err.message, OFFICE_FAILED_MESSAGE);
}

#[tokio::test]
async fn control_device_writes_through_and_reads_back() {
    let store = Arc::new(FakeStore::default());
    let ctx = context(store.clone());

    let response = control_device(&ctx, &DeviceControlRequest::new("fan", "ON"))
        .await
        .expect("control");
    assert!(response.success);
    assert!(response.timestamp.is_some());

    let state = read_device(&ctx, DeviceId::from("fan")).await.expect("read");
    assert_eq!(state.state, PowerState::On);
}

#[tokio::test]
async fn control_device_validates_command_and_device() {
    let ctx = context(Arc::new(FakeStore::default()));

    let err = control_device(&ctx, &DeviceControlRequest::new("fan", "dim"))
        .await
        .expect_err("bad command");
    assert_eq!(err.code, ErrorCode::Validation);

    let err = control_device(&ctx, &DeviceControlRequest::new("  ", "on"))
        .await
        .expect_err("no device");
    assert_eq!(err.code, ErrorCode::Validation);
}

#[tokio::test]
async fn store_failures_surface_as_unavailable() {
    let ctx = context(Arc::new(FakeStore::failing(&["buzzer"])));

    let err = control_device(&ctx, &DeviceControlRequest::new("buzzer", "on"))
        .await
        .expect_err("write");
    assert_eq!(err.code, ErrorCode::Unavailable);

    let err = read_device(&ctx, DeviceId::from("buzzer"))
        .await
        .expect_err("read");
    assert_eq!(err.code, ErrorCode::Unavailable);
}
