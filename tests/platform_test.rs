use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use capkit::bridge::NativeBridge;
use capkit::capabilities::{
    account::{LOGIN_COMPLETE, LOGOUT_COMPLETE},
    storage::UPLOAD_COMPLETE,
    AccountCapability, StorageCapability,
};
use capkit::config::PlatformConfig;
use capkit::coordinator::{Outcome, StartStatus};
use capkit::dispatcher::Listener;
use capkit::event_bus::{Event, OriginId, Value};
use capkit::event_registry::{builtin, EventType};
use capkit::system::Platform;
use capkit::types::{Capability, CapabilityError};
use capkit::Error;

#[ctor::ctor]
fn init_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Answers every operation right away and remembers what it was asked.
#[derive(Default)]
struct EchoBridge {
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl NativeBridge for EchoBridge {
    async fn call(&self, operation: &str, args: HashMap<String, Value>) -> Outcome {
        self.calls.lock().unwrap().push(operation.to_string());
        match operation {
            "login" => Outcome::success_with(
                "user_id",
                Value::from(format!("id-{}", args["username"].as_str().unwrap_or(""))),
            ),
            "upload" => {
                let mut response = HashMap::new();
                response.insert("path".to_string(), args["path"].clone());
                response.insert("size".to_string(), Value::Integer(0));
                Outcome::Success(response)
            }
            "logout" => Outcome::success(),
            _ => Outcome::failure(404, "unknown operation"),
        }
    }
}

fn platform() -> (Platform, Arc<EchoBridge>) {
    let bridge = Arc::new(EchoBridge::default());
    let platform =
        Platform::with_reference_capabilities(PlatformConfig::default(), bridge.clone()).unwrap();
    (platform, bridge)
}

#[tokio::test]
async fn test_login_round_trip_through_platform() {
    let (platform, bridge) = platform();
    let account: Arc<AccountCapability> = platform.get(AccountCapability::ID).unwrap();
    let (mut tap, _) = account.subscribe();

    assert_eq!(
        account.login("alice", "pw").unwrap(),
        StartStatus::PreconditionFailed
    );
    assert!(bridge.calls.lock().unwrap().is_empty());

    let user_ids = Arc::new(Mutex::new(Vec::new()));
    let sink = user_ids.clone();
    let listener = Listener::infallible(move |event| {
        if let Some(user_id) = event.get("user_id").and_then(|v| v.as_str()) {
            sink.lock().unwrap().push(user_id.to_string());
        }
    });
    account.register(LOGIN_COMPLETE, &listener, None);

    assert!(account.login("alice", "pw").unwrap().is_accepted());
    let event = tokio::time::timeout(
        Duration::from_secs(5),
        tap.recv_type(&EventType::from(LOGIN_COMPLETE)),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(event.origin(), account.core().origin());
    assert_eq!(*user_ids.lock().unwrap(), vec!["id-alice".to_string()]);
    assert_eq!(*bridge.calls.lock().unwrap(), vec!["login".to_string()]);
}

#[tokio::test]
async fn test_same_instance_everywhere() {
    let (platform, _) = platform();
    let typed: Arc<StorageCapability> = platform.get(StorageCapability::ID).unwrap();
    let erased = platform.get_instance(StorageCapability::ID).unwrap();
    assert!(Arc::ptr_eq(typed.core(), erased.core()));

    // listeners registered through one handle are visible through the other
    erased.register(UPLOAD_COMPLETE, &Listener::infallible(|_| {}), None);
    assert!(typed.upload("a.txt", "").unwrap().is_accepted());
}

#[tokio::test]
async fn test_shutdown_drains_and_reports_lifecycle() {
    let (platform, _) = platform();
    let lifecycle = Arc::new(Mutex::new(Vec::new()));
    let sink = lifecycle.clone();
    let listener = Listener::infallible(move |event| {
        sink.lock()
            .unwrap()
            .push(event.event_type().as_str().to_string())
    });
    let registry = platform.registry();
    registry
        .lifecycle()
        .register(builtin::CAPABILITY_CONSTRUCTED, &listener, None);
    registry
        .lifecycle()
        .register(builtin::CAPABILITY_SHUTDOWN, &listener, None);

    let account: Arc<AccountCapability> = platform.get(AccountCapability::ID).unwrap();
    account.register(LOGOUT_COMPLETE, &Listener::infallible(|_| {}), None);
    platform.get_instance(StorageCapability::ID).unwrap();

    assert_eq!(platform.shutdown(), 2);
    assert!(!account.has_listener(LOGOUT_COMPLETE));
    assert_eq!(account.logout(), StartStatus::PreconditionFailed);
    assert_eq!(
        *lifecycle.lock().unwrap(),
        vec![
            builtin::CAPABILITY_CONSTRUCTED,
            builtin::CAPABILITY_CONSTRUCTED,
            builtin::CAPABILITY_SHUTDOWN,
            builtin::CAPABILITY_SHUTDOWN,
        ]
    );
}

#[test]
fn test_disabled_capability() {
    let config = PlatformConfig {
        disabled_capabilities: vec![StorageCapability::ID.to_string()],
        ..Default::default()
    };
    let platform =
        Platform::with_reference_capabilities(config, Arc::new(EchoBridge::default())).unwrap();

    assert!(platform.is_supported(AccountCapability::ID));
    assert!(!platform.is_supported(StorageCapability::ID));
    assert!(matches!(
        platform.get_instance(StorageCapability::ID),
        Err(CapabilityError::Unsupported(_))
    ));
    assert!(matches!(
        platform.get_instance("camera"),
        Err(CapabilityError::NotFound(_))
    ));
}

#[test]
fn test_platform_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("platform.json");
    std::fs::write(&path, r#"{"operation_timeout": 125, "event_buffer_size": 4}"#).unwrap();

    let platform = Platform::from_file(&path).unwrap();
    assert_eq!(platform.config().event_buffer_size, 4);
    assert_eq!(
        platform.coordinator().operation_timeout(),
        Some(Duration::from_millis(125))
    );

    assert!(matches!(
        Platform::from_file(dir.path().join("missing.json")),
        Err(Error::Config(_))
    ));
}

#[tokio::test]
async fn test_logout_completes_without_payload() {
    let (platform, _) = platform();
    let account: Arc<AccountCapability> = platform.get(AccountCapability::ID).unwrap();
    let (mut tap, _) = account.subscribe();
    account.register(LOGOUT_COMPLETE, &Listener::infallible(|_| {}), None);

    assert!(account.logout().is_accepted());
    let event = tap
        .recv_type(&EventType::from(LOGOUT_COMPLETE))
        .await
        .unwrap();
    assert_eq!(event.is_success(), Some(true));
    assert_eq!(event.error_code(), None);
    assert!(!account.core().is_pending("logout"));
}

#[test]
fn test_event_time_counts_from_platform_start() {
    let _platform = Platform::new(PlatformConfig::default());
    std::thread::sleep(Duration::from_millis(5));
    let event = Event::new("Tick", OriginId::new());
    assert!(event.timestamp().as_millis() >= 5.0);
}
