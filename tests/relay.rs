//! End-to-end tests against a running relay on random local ports.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tower::util::ServiceExt;

use presence_relay::admin::{self, AdminState};
use presence_relay::{ConnectionRegistry, Relay, RelayConfig};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Helpers
// ============================================================================

async fn start_relay() -> Result<Relay> {
    let config = RelayConfig::new()
        .with_ws_addr("127.0.0.1:0".parse()?)
        .with_admin_addr("127.0.0.1:0".parse()?);
    Ok(Relay::start(config).await?)
}

async fn connect(relay: &Relay, query: &str) -> Result<Client> {
    let url = format!("{}/?{}", relay.ws_url(), query);
    let (client, _) = connect_async(url).await?;
    Ok(client)
}

/// Connects as a teacher and consumes the `connected` frame.
async fn admit(relay: &Relay, user_id: &str) -> Result<Client> {
    let mut client = connect(relay, &format!("userId={user_id}&role=teacher")).await?;
    let frame: Value = serde_json::from_str(&next_text(&mut client).await?)?;
    assert_eq!(frame["type"], "connected");
    assert!(frame["message"].is_string());
    Ok(client)
}

async fn next_message(client: &mut Client) -> Result<Message> {
    loop {
        let message = timeout(FRAME_TIMEOUT, client.next())
            .await
            .context("timed out waiting for frame")?
            .context("stream ended")??;
        if !matches!(message, Message::Ping(_) | Message::Pong(_)) {
            return Ok(message);
        }
    }
}

async fn next_text(client: &mut Client) -> Result<String> {
    match next_message(client).await? {
        Message::Text(text) => Ok(text.as_str().to_owned()),
        other => bail!("expected text frame, got {other:?}"),
    }
}

async fn next_close(client: &mut Client) -> Result<CloseFrame> {
    match next_message(client).await? {
        Message::Close(Some(frame)) => Ok(frame),
        other => bail!("expected close frame, got {other:?}"),
    }
}

async fn wait_for_size(registry: &ConnectionRegistry, expected: usize) -> Result<()> {
    timeout(FRAME_TIMEOUT, async {
        while registry.size() != expected {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .with_context(|| format!("registry size stayed at {}, expected {expected}", registry.size()))
}

async fn admin_call(registry: &Arc<ConnectionRegistry>, request: Request<Body>) -> Result<(StatusCode, Value)> {
    let app = admin::router(AdminState::new(Arc::clone(registry)));
    let response = app.oneshot(request).await?;
    let status = response.status();
    let bytes = body::to_bytes(response.into_body(), usize::MAX).await?;
    Ok((status, serde_json::from_slice(&bytes)?))
}

fn push_request(body: Value) -> Result<Request<Body>> {
    Ok(Request::builder()
        .method("POST")
        .uri("/push")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))?)
}

fn get_request(uri: &str) -> Result<Request<Body>> {
    Ok(Request::builder().uri(uri).body(Body::empty())?)
}

// ============================================================================
// Handshake
// ============================================================================

#[tokio::test]
async fn valid_handshake_registers_client() -> Result<()> {
    let relay = start_relay().await?;

    let _client = admit(&relay, "t1").await?;

    assert_eq!(relay.registry().size(), 1);
    assert!(relay.registry().keys().iter().any(|id| id.as_str() == "t1"));

    relay.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn missing_user_id_is_rejected_with_policy_close() -> Result<()> {
    let relay = start_relay().await?;

    let mut client = connect(&relay, "role=teacher").await?;
    let frame = next_close(&mut client).await?;

    assert_eq!(u16::from(frame.code), 1008);
    assert!(!frame.reason.as_str().is_empty());
    assert!(relay.registry().is_empty());

    relay.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn wrong_role_is_rejected_with_policy_close() -> Result<()> {
    let relay = start_relay().await?;

    let mut client = connect(&relay, "userId=s1&role=student").await?;
    let frame = next_close(&mut client).await?;

    assert_eq!(u16::from(frame.code), 1008);
    assert!(relay.registry().is_empty());

    relay.shutdown().await;
    Ok(())
}

// ============================================================================
// Liveness
// ============================================================================

#[tokio::test]
async fn ping_yields_exactly_one_pong() -> Result<()> {
    let relay = start_relay().await?;
    let mut client = admit(&relay, "t1").await?;

    client.send(Message::Text(r#"{"type":"ping"}"#.into())).await?;
    assert_eq!(next_text(&mut client).await?, r#"{"type":"pong"}"#);

    // Nothing else queued
    assert!(timeout(Duration::from_millis(200), client.next()).await.is_err());
    assert_eq!(relay.registry().size(), 1);

    relay.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn malformed_frames_do_not_close_connection() -> Result<()> {
    let relay = start_relay().await?;
    let mut client = admit(&relay, "t1").await?;

    client.send(Message::Text("{not json".into())).await?;
    client.send(Message::Text(r#"{"type":"hello"}"#.into())).await?;
    client.send(Message::Text(r#"{"type":"ping"}"#.into())).await?;

    assert_eq!(next_text(&mut client).await?, r#"{"type":"pong"}"#);
    assert_eq!(relay.registry().size(), 1);

    relay.shutdown().await;
    Ok(())
}

// ============================================================================
// Push
// ============================================================================

#[tokio::test]
async fn push_reaches_connected_client() -> Result<()> {
    let relay = start_relay().await?;
    let mut client = admit(&relay, "t1").await?;

    let (status, body) = admin_call(
        relay.registry(),
        push_request(json!({ "teacherId": "t1", "message": { "a": 1 } }))?,
    )
    .await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(next_text(&mut client).await?, r#"{"a":1}"#);

    // The next frame is the pong, so exactly one push frame arrived
    client.send(Message::Text(r#"{"type":"ping"}"#.into())).await?;
    assert_eq!(next_text(&mut client).await?, r#"{"type":"pong"}"#);

    relay.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn push_to_unknown_target_is_not_connected() -> Result<()> {
    let relay = start_relay().await?;
    let _client = admit(&relay, "t1").await?;

    let (status, body) = admin_call(
        relay.registry(),
        push_request(json!({ "teacherId": "X", "message": "hi" }))?,
    )
    .await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "target_not_connected");
    assert_eq!(relay.registry().size(), 1);

    relay.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn push_without_message_is_bad_request() -> Result<()> {
    let relay = start_relay().await?;
    let _client = admit(&relay, "t1").await?;

    let (status, body) =
        admin_call(relay.registry(), push_request(json!({ "teacherId": "t1" }))?).await?;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "missing_parameter");
    assert_eq!(relay.registry().size(), 1);

    relay.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn push_after_close_is_not_connected() -> Result<()> {
    let relay = start_relay().await?;
    let mut client = admit(&relay, "t1").await?;

    client.close(None).await?;
    wait_for_size(relay.registry(), 0).await?;

    let (status, body) = admin_call(
        relay.registry(),
        push_request(json!({ "teacherId": "t1", "message": { "a": 1 } }))?,
    )
    .await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], "target_not_connected");

    relay.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn dropped_socket_is_removed() -> Result<()> {
    let relay = start_relay().await?;
    let client = admit(&relay, "t1").await?;

    drop(client);
    wait_for_size(relay.registry(), 0).await?;

    relay.shutdown().await;
    Ok(())
}

// ============================================================================
// Displacement
// ============================================================================

#[tokio::test]
async fn newer_connection_displaces_older() -> Result<()> {
    let relay = start_relay().await?;
    let mut first = admit(&relay, "t1").await?;
    let mut second = admit(&relay, "t1").await?;

    let frame = next_close(&mut first).await?;
    assert_eq!(u16::from(frame.code), 4000);

    // The displaced connection's exit path must not remove the new entry
    sleep(Duration::from_millis(100)).await;
    assert_eq!(relay.registry().size(), 1);

    let (_, body) = admin_call(
        relay.registry(),
        push_request(json!({ "teacherId": "t1", "message": "to-second" }))?,
    )
    .await?;
    assert_eq!(body["success"], true);
    assert_eq!(next_text(&mut second).await?, r#""to-second""#);

    relay.shutdown().await;
    Ok(())
}

// ============================================================================
// Status Queries
// ============================================================================

#[tokio::test]
async fn health_counts_online_teachers() -> Result<()> {
    let relay = start_relay().await?;
    let _a = admit(&relay, "a").await?;
    let mut b = admit(&relay, "b").await?;
    let _c = admit(&relay, "c").await?;

    b.close(None).await?;
    wait_for_size(relay.registry(), 2).await?;

    let (status, body) = admin_call(relay.registry(), get_request("/health")?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["onlineTeachers"], 2);

    let (_, body) = admin_call(relay.registry(), get_request("/online")?).await?;
    assert_eq!(body, json!({ "count": 2, "teachers": ["a", "c"] }));

    relay.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn admin_listener_serves_health_over_http() -> Result<()> {
    let relay = start_relay().await?;
    let _client = admit(&relay, "t1").await?;

    let mut stream = TcpStream::connect(relay.admin_addr()).await?;
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await?;

    let mut raw = String::new();
    timeout(FRAME_TIMEOUT, stream.read_to_string(&mut raw)).await??;

    assert!(raw.starts_with("HTTP/1.1 200"));
    assert!(raw.contains(r#""onlineTeachers":1"#));

    relay.shutdown().await;
    Ok(())
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn shutdown_closes_registered_clients() -> Result<()> {
    let relay = start_relay().await?;
    let mut client = admit(&relay, "t1").await?;

    relay.shutdown().await;

    let frame = next_close(&mut client).await?;
    assert_eq!(u16::from(frame.code), 1001);
    assert!(relay.registry().is_empty());
    Ok(())
}

#[tokio::test]
async fn shutdown_is_bounded_when_a_push_is_stuck_on_a_stalled_client() -> Result<()> {
    let relay = start_relay().await?;
    // Never read from again
    let _stalled = admit(&relay, "t1").await?;

    let payload = json!("x".repeat(1 << 20));
    for _ in 0..64 {
        let dispatcher = relay.dispatcher();
        let payload = payload.clone();
        tokio::spawn(async move {
            let _ = dispatcher.push(Some("t1"), Some(&payload)).await;
        });
    }

    // An admin request waiting on the same client keeps the admin server busy
    let body = r#"{"teacherId":"t1","message":"late"}"#;
    let mut admin = TcpStream::connect(relay.admin_addr()).await?;
    admin
        .write_all(
            format!(
                "POST /push HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
                body.len()
            )
            .as_bytes(),
        )
        .await?;
    sleep(Duration::from_millis(200)).await;

    timeout(Duration::from_secs(5), relay.shutdown())
        .await
        .context("shutdown did not complete")?;
    assert!(relay.registry().is_empty());

    drop(admin);
    Ok(())
}
