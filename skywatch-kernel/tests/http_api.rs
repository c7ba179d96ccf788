use serde_json::Value;
use skywatch_devkit::{MessageBuilder, TestHarness};
use skywatch_kernel::health::HealthTracker;
use skywatch_kernel::http::{build_router, AppState};
use skywatch_kernel::models::DeviceType;
use std::time::Duration;

struct Server {
    base: String,
    harness: TestHarness,
}

async fn spawn_server() -> Server {
    let harness = TestHarness::new();
    let ingest = harness.start_ingest_loop(64);
    let state = AppState {
        kernel: harness.kernel.clone(),
        health: HealthTracker::new(),
        ingest,
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, build_router(state)).await.unwrap();
    });

    Server {
        base: format!("http://{addr}"),
        harness,
    }
}

async fn wait_for_events(client: &reqwest::Client, url: &str, count: usize) -> Vec<Value> {
    for _ in 0..50 {
        let events: Vec<Value> = client.get(url).send().await.unwrap().json().await.unwrap();
        if events.len() >= count {
            return events;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("telemetry never reached {url}");
}

#[tokio::test]
async fn test_ingest_then_query() {
    let server = spawn_server().await;
    server
        .harness
        .publish_devices(vec![MessageBuilder::device("d1", DeviceType::Sensor, "Paris")])
        .await
        .unwrap();
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/ingest/sensors.data", server.base))
        .json(&MessageBuilder::sensor_reading("d1", "Paris", 22.5, 48.0, 7.0))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 202);

    let events = wait_for_events(&client, &format!("{}/telemetry?limit=5", server.base), 1).await;
    assert_eq!(events[0]["device_id"], "d1");
    assert_eq!(events[0]["city"], "Paris");
    assert_eq!(events[0]["temperature"], 22.5);

    let view: Value = client
        .get(format!("{}/views/location/Paris?focus=d1", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(view["chart"]["source"], "device_telemetry");
    assert_eq!(view["forecast"]["status"], "fresh");
    assert_eq!(view["devices"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn test_error_statuses() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();

    let missing = client.get(format!("{}/devices/ghost", server.base)).send().await.unwrap();
    assert_eq!(missing.status(), 404);

    let bad_type = client.get(format!("{}/views/type/Toaster", server.base)).send().await.unwrap();
    assert_eq!(bad_type.status(), 400);

    let bad_body = client
        .post(format!("{}/ingest/sensors.data", server.base))
        .body("not json")
        .send()
        .await
        .unwrap();
    assert_eq!(bad_body.status(), 400);

    let no_device = client
        .post(format!("{}/ingest/device.telemetry", server.base))
        .json(&serde_json::json!({"timestamp": 1.0}))
        .send()
        .await
        .unwrap();
    assert_eq!(no_device.status(), 400);

    let no_timestamp = client
        .post(format!("{}/ingest/sensors.data", server.base))
        .json(&serde_json::json!({"device_id": "d1", "temperature": 20.0}))
        .send()
        .await
        .unwrap();
    assert_eq!(no_timestamp.status(), 400);
    assert_eq!(server.harness.kernel.dispatcher.stats().received, 0);

    let bad_scope = client.get(format!("{}/events?scope=planet:mars", server.base)).send().await.unwrap();
    assert_eq!(bad_scope.status(), 400);

    let health = client.get(format!("{}/health", server.base)).send().await.unwrap();
    assert_eq!(health.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn test_event_stream_delivers_scoped_notifications() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();

    let mut stream = client
        .get(format!("{}/events?scope=device:d1", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(stream.status(), 200);

    client
        .post(format!("{}/ingest/device.telemetry", server.base))
        .json(&MessageBuilder::sensor_reading("d1", "Rabat", 30.0, 35.0, 1.0))
        .send()
        .await
        .unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), async {
        let mut body = String::new();
        while let Some(chunk) = stream.chunk().await.unwrap() {
            body.push_str(&String::from_utf8_lossy(&chunk));
            if body.contains("telemetry_appended") && body.contains("d1") {
                return body;
            }
        }
        body
    })
    .await
    .unwrap();

    assert!(received.contains("telemetry_appended"));
    assert!(received.contains("d1"));
}

#[tokio::test]
async fn test_system_health_reports_counters() {
    let server = spawn_server().await;
    server
        .harness
        .send_telemetry(&MessageBuilder::sensor_reading("d9", "Oslo", 1.0, 80.0, 1.0))
        .await
        .unwrap();

    let health: Value = reqwest::get(format!("{}/system/health", server.base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(health["mqtt_status"], "connecting");
    assert_eq!(health["ingest"]["appended"], 1);
    assert_eq!(health["buffers"]["global_events"], 1);
}
