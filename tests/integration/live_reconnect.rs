// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::match_same_arms,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! Integration tests for the live channel: authentication on connect,
//! message application, reconnect after abnormal closure, the attempt
//! budget, manual retry and clean shutdown.
//!
//! Each test runs an in-process WebSocket server built on
//! `tokio_tungstenite::accept_hdr_async`. Accepted sockets are handed to the
//! test body together with the request URI so the test can play the
//! backend's side of the conversation.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tasklist::config::ReconnectConfig;
use tasklist::connection::{EXHAUSTED_MESSAGE, RETRY_REASON, SHUTDOWN_REASON};
use tasklist::net::{self, LiveConfig, LiveEvent, LiveHandle};
use tasklist::session::Session;
use tasklist::sync::LocalState;
use tasklist_proto::{ListId, TaskId, UserId};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

const ME: UserId = UserId::new(7);
const LIST: ListId = ListId::new(10);
const TIMEOUT: Duration = Duration::from_secs(5);

type ServerSocket = WebSocketStream<TcpStream>;

// =============================================================================
// Helpers
// =============================================================================

/// An accepted connection: the request URI and the server end of the socket.
struct Accepted {
    uri: String,
    ws: ServerSocket,
}

/// Accepts WebSocket connections on `listener` until the test ends.
fn serve(listener: TcpListener) -> mpsc::UnboundedReceiver<Accepted> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let mut uri = String::new();
            let accepted = tokio_tungstenite::accept_hdr_async(
                stream,
                |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                    uri = req.uri().to_string();
                    Ok(resp)
                },
            )
            .await;
            if let Ok(ws) = accepted
                && tx.send(Accepted { uri, ws }).is_err()
            {
                break;
            }
        }
    });
    rx
}

async fn start_server() -> (String, mpsc::UnboundedReceiver<Accepted>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    (url, serve(listener))
}

fn fast_config(ws_url: &str) -> LiveConfig {
    LiveConfig {
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            max_attempts: 2,
        },
        connect_timeout: Duration::from_secs(2),
        dedup_capacity: 100,
        ..LiveConfig::new(ws_url)
    }
}

fn session() -> Session {
    Session::new("secret", ME, "ana")
}

fn initial_state() -> LocalState {
    let mut state = LocalState::new(ME);
    let _ = state.select_list(LIST, Vec::new());
    state
}

fn spawn(url: &str) -> (LiveHandle, mpsc::UnboundedReceiver<LiveEvent>) {
    net::spawn_live(&fast_config(url), &session(), initial_state()).unwrap()
}

async fn accept(rx: &mut mpsc::UnboundedReceiver<Accepted>) -> Accepted {
    tokio::time::timeout(TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for a connection")
        .expect("server stopped")
}

/// Waits for the first event matching `pred`, skipping others.
async fn wait_for<F>(rx: &mut mpsc::UnboundedReceiver<LiveEvent>, mut pred: F) -> LiveEvent
where
    F: FnMut(&LiveEvent) -> bool,
{
    tokio::time::timeout(TIMEOUT, async {
        loop {
            let event = rx.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

async fn send_text(ws: &mut ServerSocket, text: &str) {
    ws.send(Message::Text(text.to_string().into())).await.unwrap();
}

/// Reads frames until a close frame arrives and returns it.
async fn read_close(ws: &mut ServerSocket) -> Option<CloseFrame> {
    tokio::time::timeout(TIMEOUT, async {
        while let Some(frame) = ws.next().await {
            if let Ok(Message::Close(close)) = frame {
                return close;
            }
        }
        None
    })
    .await
    .expect("timed out waiting for close frame")
}

fn created(id: i64) -> String {
    format!(r#"{{"action":"todo_created","data":{{"Id":{id},"TodoListId":10,"TaskName":"task {id}"}}}}"#)
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn token_is_sent_as_query_parameter() {
    let (url, mut server) = start_server().await;
    let (handle, mut events) = spawn(&url);

    let conn = accept(&mut server).await;
    assert_eq!(conn.uri, "/ws?token=secret");
    assert_eq!(
        wait_for(&mut events, |_| true).await,
        LiveEvent::Connected { reconnect: false }
    );
    assert!(handle.is_connected());
    handle.shutdown().await;
}

#[tokio::test]
async fn broadcasts_update_cache_and_duplicates_are_silent() {
    let (url, mut server) = start_server().await;
    let (handle, mut events) = spawn(&url);
    let mut conn = accept(&mut server).await;
    wait_for(&mut events, |e| matches!(e, LiveEvent::Connected { .. })).await;

    send_text(&mut conn.ws, &created(5)).await;
    send_text(&mut conn.ws, &created(5)).await;
    send_text(
        &mut conn.ws,
        r#"{"action":"todo_updated","data":{"Id":5,"TodoListId":10,"TaskName":"renamed"}}"#,
    )
    .await;

    assert_eq!(
        wait_for(&mut events, |_| true).await,
        LiveEvent::StateChanged {
            kind: "task_created",
            entity: Some(5)
        }
    );
    // The duplicate produced no event; the next one is the update.
    assert_eq!(
        wait_for(&mut events, |_| true).await,
        LiveEvent::StateChanged {
            kind: "task_updated",
            entity: Some(5)
        }
    );
    let name = handle.with_state(|s| s.task(TaskId::new(5)).map(|t| t.name.clone()));
    assert_eq!(name.as_deref(), Some("renamed"));
    handle.shutdown().await;
}

#[tokio::test]
async fn malformed_frame_surfaces_error_and_channel_survives() {
    let (url, mut server) = start_server().await;
    let (handle, mut events) = spawn(&url);
    let mut conn = accept(&mut server).await;
    wait_for(&mut events, |e| matches!(e, LiveEvent::Connected { .. })).await;

    send_text(&mut conn.ws, "{definitely not json").await;
    send_text(&mut conn.ws, &created(1)).await;

    assert_eq!(
        wait_for(&mut events, |_| true).await,
        LiveEvent::Error(net::PARSE_ERROR_MESSAGE.to_string())
    );
    assert!(matches!(
        wait_for(&mut events, |_| true).await,
        LiveEvent::StateChanged { .. }
    ));
    assert!(handle.is_connected());
    handle.shutdown().await;
}

#[tokio::test]
async fn abrupt_drop_reconnects_and_clears_dedup() {
    let (url, mut server) = start_server().await;
    let (handle, mut events) = spawn(&url);
    let mut conn = accept(&mut server).await;
    wait_for(&mut events, |e| matches!(e, LiveEvent::Connected { .. })).await;

    send_text(&mut conn.ws, &created(5)).await;
    wait_for(&mut events, |e| matches!(e, LiveEvent::StateChanged { .. })).await;

    // Drop without a close frame.
    drop(conn);

    assert!(matches!(
        wait_for(&mut events, |_| true).await,
        LiveEvent::Disconnected {
            will_reconnect: true,
            ..
        }
    ));
    assert!(matches!(
        wait_for(&mut events, |_| true).await,
        LiveEvent::Reconnecting { attempt: 1, max_attempts: 2, .. }
    ));

    let mut conn = accept(&mut server).await;
    assert_eq!(
        wait_for(&mut events, |e| matches!(e, LiveEvent::Connected { .. })).await,
        LiveEvent::Connected { reconnect: true }
    );

    // Same identity as before the drop: applied again on the new connection.
    send_text(&mut conn.ws, &created(5)).await;
    assert_eq!(
        wait_for(&mut events, |_| true).await,
        LiveEvent::StateChanged {
            kind: "task_created",
            entity: Some(5)
        }
    );
    assert_eq!(handle.with_state(|s| s.tasks().len()), 1);
    handle.shutdown().await;
}

#[tokio::test]
async fn server_normal_close_does_not_reconnect() {
    let (url, mut server) = start_server().await;
    let (handle, mut events) = spawn(&url);
    let mut conn = accept(&mut server).await;
    wait_for(&mut events, |e| matches!(e, LiveEvent::Connected { .. })).await;

    conn.ws
        .close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "bye".into(),
        }))
        .await
        .unwrap();

    assert_eq!(
        wait_for(&mut events, |_| true).await,
        LiveEvent::Disconnected {
            code: 1000,
            reason: "bye".into(),
            will_reconnect: false
        }
    );
    let nothing = tokio::time::timeout(Duration::from_millis(200), server.recv()).await;
    assert!(nothing.is_err(), "client reconnected after a normal close");

    // A manual retry still works from here.
    handle.retry().unwrap();
    let _conn = accept(&mut server).await;
    assert_eq!(
        wait_for(&mut events, |e| matches!(e, LiveEvent::Connected { .. })).await,
        LiveEvent::Connected { reconnect: true }
    );
    handle.shutdown().await;
}

#[tokio::test]
async fn abnormal_close_code_reconnects() {
    let (url, mut server) = start_server().await;
    let (handle, mut events) = spawn(&url);
    let mut conn = accept(&mut server).await;
    wait_for(&mut events, |e| matches!(e, LiveEvent::Connected { .. })).await;

    conn.ws
        .close(Some(CloseFrame {
            code: CloseCode::Away,
            reason: "restarting".into(),
        }))
        .await
        .unwrap();

    assert_eq!(
        wait_for(&mut events, |_| true).await,
        LiveEvent::Disconnected {
            code: 1001,
            reason: "restarting".into(),
            will_reconnect: true
        }
    );
    let _conn = accept(&mut server).await;
    handle.shutdown().await;
}

#[tokio::test]
async fn exhausted_budget_waits_for_manual_retry() {
    // Reserve a port, then free it so every attempt is refused.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let url = format!("ws://{addr}/ws");

    let (handle, mut events) = spawn(&url);

    let mut attempts = Vec::new();
    let failed = wait_for(&mut events, |e| {
        if let LiveEvent::Reconnecting { attempt, .. } = e {
            attempts.push(*attempt);
        }
        matches!(e, LiveEvent::ReconnectFailed { .. })
    })
    .await;
    assert_eq!(attempts, vec![1, 2]);
    assert_eq!(
        failed,
        LiveEvent::ReconnectFailed {
            message: EXHAUSTED_MESSAGE.to_string()
        }
    );
    assert!(handle.send("ping").await.is_err());

    // Bring the server up and retry by hand.
    let mut server = serve(TcpListener::bind(addr).await.unwrap());
    handle.retry().unwrap();
    let _conn = accept(&mut server).await;
    assert_eq!(
        wait_for(&mut events, |e| matches!(e, LiveEvent::Connected { .. })).await,
        LiveEvent::Connected { reconnect: false }
    );
    handle.shutdown().await;
}

#[tokio::test]
async fn retry_while_connected_closes_with_retry_reason() {
    let (url, mut server) = start_server().await;
    let (handle, mut events) = spawn(&url);
    let mut first = accept(&mut server).await;
    wait_for(&mut events, |e| matches!(e, LiveEvent::Connected { .. })).await;

    handle.retry().unwrap();
    let close = read_close(&mut first.ws).await.unwrap();
    assert_eq!(close.code, CloseCode::Normal);
    assert_eq!(close.reason.as_str(), RETRY_REASON);

    let _second = accept(&mut server).await;
    assert_eq!(
        wait_for(&mut events, |e| matches!(e, LiveEvent::Connected { .. })).await,
        LiveEvent::Connected { reconnect: true }
    );
    handle.shutdown().await;
}

#[tokio::test]
async fn shutdown_sends_normal_close_and_stays_down() {
    let (url, mut server) = start_server().await;
    let (handle, mut events) = spawn(&url);
    let mut conn = accept(&mut server).await;
    wait_for(&mut events, |e| matches!(e, LiveEvent::Connected { .. })).await;

    handle.shutdown().await;

    let close = read_close(&mut conn.ws).await.unwrap();
    assert_eq!(close.code, CloseCode::Normal);
    assert_eq!(close.reason.as_str(), SHUTDOWN_REASON);

    let nothing = tokio::time::timeout(Duration::from_millis(200), server.recv()).await;
    assert!(nothing.is_err(), "client reconnected after shutdown");
    // The supervisor is gone, so the event stream ends.
    assert!(events.recv().await.is_none());
}

#[tokio::test]
async fn outbound_frames_reach_the_server() {
    let (url, mut server) = start_server().await;
    let (handle, mut events) = spawn(&url);
    let mut conn = accept(&mut server).await;
    wait_for(&mut events, |e| matches!(e, LiveEvent::Connected { .. })).await;

    handle
        .send(r#"{"action":"todo_assigned","data":{"Id":5}}"#)
        .await
        .unwrap();
    let frame = tokio::time::timeout(TIMEOUT, conn.ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(
        frame,
        Message::Text(r#"{"action":"todo_assigned","data":{"Id":5}}"#.into())
    );
    handle.shutdown().await;
}

#[tokio::test]
async fn notification_for_session_user_is_queued() {
    let (url, mut server) = start_server().await;
    let (handle, mut events) = spawn(&url);
    let mut conn = accept(&mut server).await;
    wait_for(&mut events, |e| matches!(e, LiveEvent::Connected { .. })).await;

    let other = r#"{"TodoId":41,"TaskName":"theirs","Assignment":{"UserId":8,"CanEdit":true,"AssignedAt":"t1"}}"#;
    let mine = r#"{"TodoId":42,"TaskName":"mine","Creator":{"UserId":1,"UserName":"boss"},"Assignment":{"UserId":7,"CanEdit":true,"AssignedAt":"t2"}}"#;
    send_text(&mut conn.ws, other).await;
    send_text(&mut conn.ws, mine).await;

    assert_eq!(
        wait_for(&mut events, |_| true).await,
        LiveEvent::NotificationReceived {
            task_id: TaskId::new(42)
        }
    );
    let queued: Vec<i64> = handle.with_state(|s| {
        s.notifications().iter().map(|n| n.task_id.get()).collect()
    });
    assert_eq!(queued, vec![42]);

    assert!(handle.dismiss(TaskId::new(42)).is_applied());
    assert!(handle.snapshot().notifications().is_empty());
    handle.shutdown().await;
}
