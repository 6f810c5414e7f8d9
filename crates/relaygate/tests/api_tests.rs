//! API integration tests.

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use serde_json::{Value, json};
use tower::ServiceExt;
use wiremock::matchers::{header as header_eq, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod common;
use common::{DEVICE_PASSWORD, DEVICE_USER, loopback_kit, named_kit, test_app};

const AUTHORIZE_PATH: &str = "/api/user/authorize.json";

async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().uri(uri).method(method);
    let body = match body {
        Some(json) => {
            request = request.header(header::CONTENT_TYPE, "application/json");
            Body::from(serde_json::to_string(&json).unwrap())
        }
        None => Body::empty(),
    };

    let response = router
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn mount_authorize(server: &MockServer, token: &str) {
    Mock::given(method("GET"))
        .and(path(AUTHORIZE_PATH))
        .and(query_param("user", DEVICE_USER))
        .and(query_param("password", DEVICE_PASSWORD))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"result": "ok", "data": {"token": token}})),
        )
        .mount(server)
        .await;
}

fn base_of(server: &MockServer) -> String {
    format!("http://127.0.0.1:{}", server.address().port())
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = test_app(vec![]);
    let (status, json) = send(&app.router, Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_security_headers_applied() {
    let app = test_app(vec![]);
    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let headers = response.headers();
    assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
    assert_eq!(headers[header::X_FRAME_OPTIONS], "SAMEORIGIN");
    assert_eq!(
        headers[header::REFERRER_POLICY],
        "strict-origin-when-cross-origin"
    );
}

#[tokio::test]
async fn test_list_kits_defaults_to_first() {
    let app = test_app(vec![named_kit("kit1", 3), named_kit("kit2", 25)]);
    let (status, json) = send(&app.router, Method::GET, "/api/kits", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["activeKitId"], "kit1");
    assert_eq!(json["kits"].as_array().unwrap().len(), 2);
    assert_eq!(json["kits"][1]["kitId"], "kit2");
    assert_eq!(json["kits"][1]["count"], 25);
}

#[tokio::test]
async fn test_active_kit_expands_devices() {
    let app = test_app(vec![named_kit("kit1", 3)]);
    let (status, json) = send(&app.router, Method::GET, "/api/kit", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["kitId"], "kit1");
    let devices = json["devices"].as_array().unwrap();
    assert_eq!(devices.len(), 3);
    assert_eq!(devices[0]["id"], "kit1-k01");
    assert_eq!(devices[0]["host"], "vg-01.local");
    assert_eq!(devices[2]["base"], "http://vg-03.local");
}

#[tokio::test]
async fn test_empty_inventory() {
    let app = test_app(vec![]);
    let (_, kits) = send(&app.router, Method::GET, "/api/kits", None).await;
    assert_eq!(kits["activeKitId"], Value::Null);

    let (status, kit) = send(&app.router, Method::GET, "/api/kit", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(kit["kitId"], Value::Null);
    assert_eq!(kit["devices"], json!([]));
}

#[tokio::test]
async fn test_set_active_kit_validation() {
    let app = test_app(vec![named_kit("kit1", 1)]);

    let (status, json) = send(&app.router, Method::POST, "/api/kit/active", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["msg"], "kitId required");

    let (status, json) = send(
        &app.router,
        Method::POST,
        "/api/kit/active",
        Some(json!({"kitId": "kit9"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["msg"], "Unknown kitId: kit9");
    assert!(!app.state_file().exists());
}

#[tokio::test]
async fn test_set_active_kit_body_shapes() {
    let app = test_app(vec![named_kit("kit1", 1), named_kit("2", 1)]);

    let (status, json) = send(&app.router, Method::POST, "/api/kit/active", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["msg"], "kitId required");

    let (status, json) = send(
        &app.router,
        Method::POST,
        "/api/kit/active",
        Some(json!({"kitId": 2})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!({"ok": true, "activeKitId": "2"}));
}

#[tokio::test]
async fn test_set_active_kit_persists_and_drops_tokens() {
    let device = MockServer::start().await;
    mount_authorize(&device, "tok-1").await;
    let app = test_app(vec![loopback_kit("kit1", device.address().port()), named_kit("kit2", 2)]);

    let base = base_of(&device);
    app.state.gateway.authorize(&base).await.unwrap();
    assert!(app.state.gateway.has_token(&base));

    let (status, json) = send(
        &app.router,
        Method::POST,
        "/api/kit/active",
        Some(json!({"kitId": "kit2"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!({"ok": true, "activeKitId": "kit2"}));
    assert!(!app.state.gateway.has_token(&base));

    let saved: Value =
        serde_json::from_str(&std::fs::read_to_string(app.state_file()).unwrap()).unwrap();
    assert_eq!(saved["activeKitId"], "kit2");

    let (_, kits) = send(&app.router, Method::GET, "/api/kits", None).await;
    assert_eq!(kits["activeKitId"], "kit2");
}

#[tokio::test]
async fn test_unknown_device_is_not_found() {
    let app = test_app(vec![named_kit("kit1", 2)]);
    let (status, json) = send(&app.router, Method::GET, "/kiloview/kit1-k07/presets", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["msg"], "Unknown deviceId for active kit");
}

#[tokio::test]
async fn test_presets_pass_through_with_session_cookie() {
    let device = MockServer::start().await;
    mount_authorize(&device, "tok-1").await;
    let presets = json!({"result": "ok", "data": [{"id": 0, "name": "Stage"}]});
    Mock::given(method("GET"))
        .and(path("/api/decoder/preset/status.json"))
        .and(header_eq("cookie", "token=tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(presets.clone()))
        .expect(1)
        .mount(&device)
        .await;

    let app = test_app(vec![loopback_kit("kit1", device.address().port())]);
    let (status, json) = send(&app.router, Method::GET, "/kiloview/kit1-k01/presets", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, presets);
}

#[tokio::test]
async fn test_current_status() {
    let device = MockServer::start().await;
    mount_authorize(&device, "tok-1").await;
    Mock::given(method("GET"))
        .and(path("/api/decoder/current/status.json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"result": "ok", "data": {"name": "cam"}})),
        )
        .mount(&device)
        .await;

    let app = test_app(vec![loopback_kit("kit1", device.address().port())]);
    let (status, json) = send(&app.router, Method::GET, "/kiloview/kit1-k01/current", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["name"], "cam");
}

#[tokio::test]
async fn test_decode_with_preset() {
    let device = MockServer::start().await;
    mount_authorize(&device, "tok-1").await;
    Mock::given(method("POST"))
        .and(path("/api/decoder/current/set.json"))
        .and(query_param("id", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "ok"})))
        .expect(1)
        .mount(&device)
        .await;

    let app = test_app(vec![loopback_kit("kit1", device.address().port())]);
    let (status, json) = send(
        &app.router,
        Method::POST,
        "/kiloview/kit1-k01/decode",
        Some(json!({"presetId": "3"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["result"], "ok");
}

#[tokio::test]
async fn test_decode_with_source() {
    let device = MockServer::start().await;
    mount_authorize(&device, "tok-1").await;
    Mock::given(method("POST"))
        .and(path("/api/decoder/current/set.json"))
        .and(query_param("name", "Stage L"))
        .and(query_param("url", "srt://10.0.0.9:9000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "ok"})))
        .expect(1)
        .mount(&device)
        .await;

    let app = test_app(vec![loopback_kit("kit1", device.address().port())]);
    let (status, _) = send(
        &app.router,
        Method::POST,
        "/kiloview/kit1-k01/decode",
        Some(json!({"source": {"name": "Stage L", "url": "srt://10.0.0.9:9000"}})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_decode_rejects_bad_input_without_device_traffic() {
    let device = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(AUTHORIZE_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&device)
        .await;

    let app = test_app(vec![loopback_kit("kit1", device.address().port())]);

    let (status, json) = send(
        &app.router,
        Method::POST,
        "/kiloview/kit1-k01/decode",
        Some(json!({"presetId": 12})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["msg"], "presetId must be an integer 0–9");

    let (status, json) = send(
        &app.router,
        Method::POST,
        "/kiloview/kit1-k01/decode",
        Some(json!({"source": {"name": "no-url"}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["msg"], "Provide presetId OR source:{name,url}");
}

#[tokio::test]
async fn test_reboot_drops_token() {
    let device = MockServer::start().await;
    mount_authorize(&device, "tok-1").await;
    Mock::given(method("POST"))
        .and(path("/api/sys/reboot.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "ok"})))
        .expect(1)
        .mount(&device)
        .await;

    let app = test_app(vec![loopback_kit("kit1", device.address().port())]);
    let (status, json) = send(&app.router, Method::POST, "/kiloview/kit1-k01/reboot", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["result"], "ok");
    assert!(!app.state.gateway.has_token(&base_of(&device)));
}

#[tokio::test]
async fn test_reboot_with_unreadable_reply_is_bad_gateway() {
    let device = MockServer::start().await;
    mount_authorize(&device, "tok-1").await;
    Mock::given(method("POST"))
        .and(path("/api/sys/reboot.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>rebooting</html>"))
        .expect(1)
        .mount(&device)
        .await;

    let app = test_app(vec![loopback_kit("kit1", device.address().port())]);
    let base = base_of(&device);
    app.state.gateway.authorize(&base).await.unwrap();
    assert!(app.state.gateway.has_token(&base));

    let (status, json) = send(&app.router, Method::POST, "/kiloview/kit1-k01/reboot", None).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["result"], "error");
    assert_eq!(json["code"], "DEVICE_BAD_RESPONSE");
    assert!(json["msg"].as_str().unwrap().contains("<html>rebooting</html>"));
    assert!(!app.state.gateway.has_token(&base));
}

#[tokio::test]
async fn test_decode_without_body_is_bad_request() {
    let device = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(AUTHORIZE_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&device)
        .await;

    let app = test_app(vec![loopback_kit("kit1", device.address().port())]);

    let (status, json) = send(&app.router, Method::POST, "/kiloview/kit1-k01/decode", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["msg"], "Provide presetId OR source:{name,url}");

    let (status, json) = send(
        &app.router,
        Method::POST,
        "/kiloview/kit1-k01/decode",
        Some(json!({"source": "rtsp://cam"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["msg"].as_str().unwrap().starts_with("Invalid decode request"));
}

#[tokio::test]
async fn test_auth_failure_is_bad_gateway() {
    let device = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(AUTHORIZE_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"result": "error", "msg": "bad password"})),
        )
        .mount(&device)
        .await;

    let app = test_app(vec![loopback_kit("kit1", device.address().port())]);
    let (status, json) = send(&app.router, Method::GET, "/kiloview/kit1-k01/presets", None).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["result"], "error");
    assert!(json["msg"].is_string());
}

#[tokio::test]
async fn test_upstream_error_passes_through() {
    let device = MockServer::start().await;
    mount_authorize(&device, "tok-1").await;
    let failure = json!({"result": "error", "msg": "decoder busy"});
    Mock::given(method("GET"))
        .and(path("/api/decoder/current/status.json"))
        .respond_with(ResponseTemplate::new(503).set_body_json(failure.clone()))
        .mount(&device)
        .await;

    let app = test_app(vec![loopback_kit("kit1", device.address().port())]);
    let (status, json) = send(&app.router, Method::GET, "/kiloview/kit1-k01/current", None).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json, failure);
}

#[tokio::test]
async fn test_auth_rejected_reply_evicts_token() {
    let device = MockServer::start().await;
    mount_authorize(&device, "tok-1").await;
    Mock::given(method("GET"))
        .and(path("/api/decoder/preset/status.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "auth-failed"})))
        .mount(&device)
        .await;

    let app = test_app(vec![loopback_kit("kit1", device.address().port())]);
    let (status, json) = send(&app.router, Method::GET, "/kiloview/kit1-k01/presets", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["result"], "auth-failed");
    assert!(!app.state.gateway.has_token(&base_of(&device)));
}
