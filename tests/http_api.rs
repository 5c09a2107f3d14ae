//! HTTP surface tests: routing, auth, error shaping, and the snapshot
//! endpoint end-to-end against a mock CDP browser.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower::ServiceExt as _;

use pinchtab::cdp::{CdpClient, CdpConfig};
use pinchtab::config::{Config, ConfigFile};
use pinchtab::handlers::AppState;
use pinchtab::registry::Bridge;
use pinchtab::server::create_router;

/// Minimal mock browser: one page target, canned page-level replies.
async fn start_mock_browser() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                let (mut sink, mut source) = ws.split();
                while let Some(Ok(msg)) = source.next().await {
                    if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
                        let cmd: Value = serde_json::from_str(&text).unwrap();
                        let result = mock_result(&cmd);
                        let response = json!({"id": cmd["id"], "result": result});
                        sink.send(tokio_tungstenite::tungstenite::Message::Text(
                            response.to_string().into(),
                        ))
                        .await
                        .unwrap();
                    }
                }
            });
        }
    });
    addr
}

fn mock_result(cmd: &Value) -> Value {
    match cmd["method"].as_str().unwrap_or_default() {
        "Target.getTargets" => json!({
            "targetInfos": [
                {"targetId": "tab-1", "type": "page", "url": "https://example.com", "title": "Example"}
            ]
        }),
        "Target.attachToTarget" => json!({"sessionId": "sess-tab-1"}),
        "Runtime.evaluate" => {
            let value = match cmd["params"]["expression"].as_str().unwrap_or_default() {
                "1" => json!(1),
                "document.title" => json!("Example"),
                "location.href" => json!("https://example.com"),
                "document.body.innerText" => json!("hello world"),
                _ => json!(true),
            };
            json!({"result": {"value": value}})
        }
        "Accessibility.getFullAXTree" => json!({
            "nodes": [
                {
                    "nodeId": "1",
                    "ignored": false,
                    "role": {"value": "RootWebArea"},
                    "name": {"value": "Example"},
                    "childIds": ["2"],
                    "backendDOMNodeId": 1
                },
                {
                    "nodeId": "2",
                    "ignored": false,
                    "role": {"value": "button"},
                    "name": {"value": "Go"},
                    "childIds": [],
                    "backendDOMNodeId": 40
                }
            ]
        }),
        _ => json!({}),
    }
}

async fn test_app(token: &str) -> Router {
    let addr = start_mock_browser().await;
    let cdp_config = CdpConfig {
        connect_timeout: Duration::from_secs(2),
        command_timeout: Duration::from_millis(800),
        channel_capacity: 32,
    };
    let client = CdpClient::connect(&format!("ws://{addr}"), cdp_config)
        .await
        .unwrap();
    let bridge = Arc::new(Bridge::new(client));

    let mut config = Config::resolve(&ConfigFile::default(), |_| None);
    config.token = token.to_owned();

    create_router(Arc::new(AppState::new(bridge, Arc::new(config))))
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_reports_ok_and_tab_count() {
    let app = test_app("").await;
    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["tabs"], 1);
}

#[tokio::test]
async fn tabs_lists_page_targets() {
    let app = test_app("").await;
    let response = app.oneshot(get("/tabs")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["tabs"][0]["id"], "tab-1");
    assert_eq!(body["tabs"][0]["type"], "page");
}

#[tokio::test]
async fn snapshot_returns_nodes_and_count() {
    let app = test_app("").await;
    let response = app.oneshot(get("/snapshot")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["count"], 2);
    assert_eq!(body["nodes"][0]["ref"], "e0");
    assert_eq!(body["nodes"][1]["role"], "button");
    assert_eq!(body["url"], "https://example.com");
}

#[tokio::test]
async fn snapshot_interactive_filter_narrows_nodes() {
    let app = test_app("").await;
    let response = app
        .oneshot(get("/snapshot?filter=interactive"))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["nodes"][0]["role"], "button");
    assert_eq!(body["nodes"][0]["ref"], "e0");
}

#[tokio::test]
async fn text_returns_inner_text() {
    let app = test_app("").await;
    let response = app.oneshot(get("/text")).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["text"], "hello world");
    assert_eq!(body["title"], "Example");
}

#[tokio::test]
async fn action_with_stale_ref_is_400() {
    let app = test_app("").await;
    let response = app
        .oneshot(post("/action", json!({"kind": "click", "ref": "e0"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(
        body["error"]
            .as_str()
            .unwrap()
            .contains("take a snapshot first")
    );
}

#[tokio::test]
async fn snapshot_then_action_by_ref_succeeds() {
    let app = test_app("").await;
    let snap = app.clone().oneshot(get("/snapshot")).await.unwrap();
    let snap_body = body_json(snap).await;
    let button_ref = snap_body["nodes"][1]["ref"].as_str().unwrap().to_owned();

    let response = app
        .oneshot(post(
            "/action",
            json!({"kind": "click", "ref": button_ref}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["clicked"], true);
}

#[tokio::test]
async fn action_with_unknown_kind_is_400() {
    let app = test_app("").await;
    let response = app
        .oneshot(post("/action", json!({"kind": "drag", "selector": "#x"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "unknown action: drag");
}

#[tokio::test]
async fn action_with_conflicting_targets_is_400() {
    let app = test_app("").await;
    let response = app
        .oneshot(post(
            "/action",
            json!({"kind": "click", "ref": "e0", "selector": "#x"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("exactly one"));
}

#[tokio::test]
async fn targetless_focus_is_rejected() {
    let app = test_app("").await;
    let response = app
        .oneshot(post("/action", json!({"kind": "focus"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("focus"));
}

#[tokio::test]
async fn navigate_requires_url() {
    let app = test_app("").await;
    let response = app.oneshot(post("/navigate", json!({}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "url required");
}

#[tokio::test]
async fn evaluate_requires_expression() {
    let app = test_app("").await;
    let response = app.oneshot(post("/evaluate", json!({}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn evaluate_returns_result_value() {
    let app = test_app("").await;
    let response = app
        .oneshot(post("/evaluate", json!({"expression": "document.title"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["result"], "Example");
}

#[tokio::test]
async fn tab_action_must_be_new_or_close() {
    let app = test_app("").await;
    let response = app
        .oneshot(post("/tab", json!({"action": "explode"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("'new' or 'close'"));
}

#[tokio::test]
async fn tab_close_requires_tab_id() {
    let app = test_app("").await;
    let response = app
        .oneshot(post("/tab", json!({"action": "close"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn missing_token_is_unauthorized() {
    let app = test_app("hunter2").await;
    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn bearer_token_is_accepted() {
    let app = test_app("hunter2").await;
    let request = Request::builder()
        .uri("/health")
        .header("authorization", "Bearer hunter2")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn bridge_token_header_is_accepted() {
    let app = test_app("hunter2").await;
    let request = Request::builder()
        .uri("/health")
        .header("x-bridge-token", "hunter2")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn wrong_token_is_unauthorized() {
    let app = test_app("hunter2").await;
    let request = Request::builder()
        .uri("/health")
        .header("authorization", "Bearer nope")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn requests_after_shutdown_get_503() {
    let addr = start_mock_browser().await;
    let client = CdpClient::connect(
        &format!("ws://{addr}"),
        CdpConfig {
            connect_timeout: Duration::from_secs(2),
            command_timeout: Duration::from_millis(800),
            channel_capacity: 32,
        },
    )
    .await
    .unwrap();
    let bridge = Arc::new(Bridge::new(client));
    let config = Config::resolve(&ConfigFile::default(), |_| None);
    let state = Arc::new(AppState::new(bridge, Arc::new(config)));
    let app = create_router(Arc::clone(&state));

    state.begin_shutdown();

    let response = app.oneshot(get("/tabs")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("shutting down"));
}

#[tokio::test]
async fn snapshot_text_format_is_plain_text() {
    let app = test_app("").await;
    let response = app.oneshot(get("/snapshot?format=text")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_owned();
    assert!(content_type.starts_with("text/plain"));
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("- RootWebArea \"Example\" [e0]"));
    assert!(text.contains("- button \"Go\" [e1]"));
}

#[tokio::test]
async fn second_snapshot_diff_of_static_page_is_empty() {
    let app = test_app("").await;
    app.clone().oneshot(get("/snapshot")).await.unwrap();
    let response = app.oneshot(get("/snapshot?diff=true")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["diff"], true);
    assert_eq!(body["counts"]["added"], 0);
    assert_eq!(body["counts"]["changed"], 0);
    assert_eq!(body["counts"]["removed"], 0);
}
