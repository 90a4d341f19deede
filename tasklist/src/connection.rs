//! Live-update channel with supervised reconnection.
//!
//! [`connect`] spawns a supervisor task that owns the WebSocket. The task
//! reports everything that happens to the channel through a callback, in
//! order, from a single execution context. After an abnormal closure it
//! reconnects with exponential backoff until the attempt budget runs out,
//! then waits for [`ConnectionHandle::retry`] or [`ConnectionHandle::close`].
//!
//! Only one socket exists at a time: a new one is opened only after the
//! previous one has been dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use crate::config::ReconnectConfig;
use crate::session::Session;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

type WsSender = futures_util::stream::SplitSink<WsStream, Message>;

/// Close code used when the stream ends without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Close code for a normal, intentional closure.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close reason sent when the client shuts the channel down.
pub const SHUTDOWN_REASON: &str = "component unmounting";

/// Close reason sent when the user asks for an immediate reconnect.
pub const RETRY_REASON: &str = "manual retry";

/// Message surfaced once the reconnect budget is spent.
pub const EXHAUSTED_MESSAGE: &str = "Max reconnection attempts reached. Please refresh the page.";

/// Errors from opening or using the live channel.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The session has no bearer token.
    #[error("not authenticated: the session has no token")]
    NotAuthenticated,

    /// The configured endpoint is not a valid URL.
    #[error("invalid live endpoint URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The endpoint URL uses a scheme the channel cannot speak.
    #[error("unsupported live endpoint scheme: {0}")]
    UnsupportedScheme(String),

    /// A connection attempt did not complete within the connect timeout.
    #[error("live channel connect timed out")]
    Timeout,

    /// The server could not be reached.
    #[error("live endpoint unreachable: {0}")]
    Unreachable(String),

    /// The WebSocket handshake failed.
    #[error("live channel handshake failed: {0}")]
    Handshake(String),

    /// There is no open channel to send on.
    #[error("live channel is not connected")]
    NotConnected,

    /// Writing an outbound frame failed.
    #[error("failed to send on live channel: {0}")]
    Send(String),

    /// The supervisor task has stopped.
    #[error("live channel has been closed")]
    Closed,
}

/// Something that happened to the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A socket was opened. `reconnect` is true for every open after the first.
    Opened {
        /// Whether a previous socket existed.
        reconnect: bool,
    },
    /// A text frame arrived.
    Message(String),
    /// The socket closed.
    Closed {
        /// Close code (1006 when no close frame was received).
        code: u16,
        /// Close reason, or the transport error.
        reason: String,
        /// Whether the closure was normal; only abnormal closures reconnect.
        clean: bool,
    },
    /// A reconnect attempt is scheduled.
    Reconnecting {
        /// 1-based attempt number.
        attempt: u32,
        /// Attempt budget.
        max_attempts: u32,
        /// Wait before the attempt.
        delay: Duration,
    },
    /// The attempt budget is spent; waiting for a manual retry.
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// User-facing message.
        message: String,
    },
}

/// Settings for one live channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Live endpoint (`ws`, `wss`, `http` or `https`).
    pub ws_url: String,
    /// Backoff and attempt budget.
    pub reconnect: ReconnectConfig,
    /// Bound on each connection attempt.
    pub connect_timeout: Duration,
}

enum Control {
    Send(String, oneshot::Sender<Result<(), ConnectionError>>),
    Retry,
    Close,
}

/// Handle to a running channel supervisor.
///
/// Dropping the handle closes the channel the same way [`close`](Self::close)
/// does, without waiting for the supervisor to finish.
#[derive(Debug)]
pub struct ConnectionHandle {
    control: mpsc::UnboundedSender<Control>,
    connected: Arc<AtomicBool>,
    task: tokio::task::JoinHandle<()>,
}

impl std::fmt::Debug for Control {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Send(text, _) => f.debug_tuple("Send").field(&text.len()).finish(),
            Self::Retry => f.write_str("Retry"),
            Self::Close => f.write_str("Close"),
        }
    }
}

impl ConnectionHandle {
    /// Whether a socket is currently open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Sends a text frame on the open socket.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NotConnected`] when no socket is open,
    /// [`ConnectionError::Send`] if the write fails and
    /// [`ConnectionError::Closed`] after shutdown.
    pub async fn send(&self, text: impl Into<String>) -> Result<(), ConnectionError> {
        if !self.is_connected() {
            return Err(ConnectionError::NotConnected);
        }
        let (reply, result) = oneshot::channel();
        self.control
            .send(Control::Send(text.into(), reply))
            .map_err(|_| ConnectionError::Closed)?;
        result.await.map_err(|_| ConnectionError::Closed)?
    }

    /// Closes the current socket (if any) with reason "manual retry", resets
    /// the attempt counter and reconnects immediately.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Closed`] after shutdown.
    pub fn retry(&self) -> Result<(), ConnectionError> {
        self.control
            .send(Control::Retry)
            .map_err(|_| ConnectionError::Closed)
    }

    /// Closes the channel with code 1000 and waits for the supervisor to exit.
    pub async fn close(self) {
        let _ = self.control.send(Control::Close);
        if let Err(e) = self.task.await {
            tracing::warn!(err = %e, "live channel supervisor panicked");
        }
    }
}

/// Builds the channel URL: the configured endpoint with `token` appended.
///
/// `http`/`https` endpoints are mapped to `ws`/`wss`.
///
/// # Errors
///
/// Returns [`ConnectionError::NotAuthenticated`] for an empty token and
/// [`ConnectionError::InvalidUrl`] / [`ConnectionError::UnsupportedScheme`]
/// for a bad endpoint.
pub fn channel_url(ws_url: &str, token: &str) -> Result<Url, ConnectionError> {
    if token.is_empty() {
        return Err(ConnectionError::NotAuthenticated);
    }
    let mut url = Url::parse(ws_url)?;
    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => return Err(ConnectionError::UnsupportedScheme(other.to_string())),
    };
    if url.scheme() != scheme && url.set_scheme(scheme).is_err() {
        return Err(ConnectionError::UnsupportedScheme(url.scheme().to_string()));
    }
    url.query_pairs_mut().append_pair("token", token);
    Ok(url)
}

/// Opens the live channel for `session` and starts supervising it.
///
/// `on_event` is called from the supervisor task for every
/// [`ChannelEvent`], one at a time. Must be called inside a tokio runtime.
///
/// # Errors
///
/// Fails without spawning anything if the session has no token or the
/// endpoint URL is invalid. Connection failures are reported through
/// `on_event` and retried, not returned.
pub fn connect<F>(
    config: &ChannelConfig,
    session: &Session,
    on_event: F,
) -> Result<ConnectionHandle, ConnectionError>
where
    F: FnMut(ChannelEvent) + Send + 'static,
{
    let url = channel_url(&config.ws_url, session.token())?;
    let (control, control_rx) = mpsc::unbounded_channel();
    let connected = Arc::new(AtomicBool::new(false));

    let supervisor = Supervisor {
        url,
        reconnect: config.reconnect,
        connect_timeout: config.connect_timeout,
        control: control_rx,
        connected: Arc::clone(&connected),
    };
    let task = tokio::spawn(supervisor.run(on_event));

    Ok(ConnectionHandle {
        control,
        connected,
        task,
    })
}

/// How a socket's lifetime ended.
enum SocketEnd {
    /// The server closed or the stream failed.
    Remote { code: u16, reason: String, clean: bool },
    /// The user asked for an immediate reconnect.
    Retry,
    /// The user shut the channel down.
    Shutdown,
}

/// What to do after waiting.
enum Resume {
    Reconnect,
    ResetAndReconnect,
    Stop,
}

struct Supervisor {
    url: Url,
    reconnect: ReconnectConfig,
    connect_timeout: Duration,
    control: mpsc::UnboundedReceiver<Control>,
    connected: Arc<AtomicBool>,
}

impl Supervisor {
    async fn run<F: FnMut(ChannelEvent)>(mut self, mut on_event: F) {
        let mut failures: u32 = 0;
        let mut opened_before = false;

        loop {
            match self.open().await {
                Ok(ws) => {
                    failures = 0;
                    tracing::info!(endpoint = %redacted(&self.url), "live channel open");
                    self.connected.store(true, Ordering::Relaxed);
                    on_event(ChannelEvent::Opened {
                        reconnect: opened_before,
                    });
                    opened_before = true;

                    let end = self.pump(ws, &mut on_event).await;
                    self.connected.store(false, Ordering::Relaxed);

                    match end {
                        SocketEnd::Shutdown => {
                            tracing::info!("live channel shut down");
                            return;
                        }
                        SocketEnd::Retry => {
                            tracing::info!("manual retry, reconnecting");
                            continue;
                        }
                        SocketEnd::Remote {
                            code,
                            reason,
                            clean,
                        } => {
                            on_event(ChannelEvent::Closed {
                                code,
                                reason: reason.clone(),
                                clean,
                            });
                            if clean {
                                tracing::info!(code, %reason, "live channel closed by server");
                                match self.wait_for_retry().await {
                                    Resume::Stop => return,
                                    Resume::Reconnect | Resume::ResetAndReconnect => continue,
                                }
                            }
                            tracing::warn!(code, %reason, "live channel closed abnormally");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(err = %e, attempt = failures, "live channel connect failed");
                }
            }

            let max_attempts = self.reconnect.max_attempts;
            if failures >= max_attempts {
                tracing::error!(attempts = failures, "live channel reconnect attempts exhausted");
                on_event(ChannelEvent::Exhausted {
                    attempts: failures,
                    message: EXHAUSTED_MESSAGE.to_string(),
                });
                match self.wait_for_retry().await {
                    Resume::Stop => return,
                    Resume::Reconnect | Resume::ResetAndReconnect => {
                        failures = 0;
                        continue;
                    }
                }
            }

            failures += 1;
            let delay = self.reconnect.delay_for(failures);
            tracing::info!(attempt = failures, max_attempts, ?delay, "scheduling reconnect");
            on_event(ChannelEvent::Reconnecting {
                attempt: failures,
                max_attempts,
                delay,
            });
            match self.backoff(delay).await {
                Resume::Stop => return,
                Resume::ResetAndReconnect => failures = 0,
                Resume::Reconnect => {}
            }
        }
    }

    async fn open(&self) -> Result<WsStream, ConnectionError> {
        let attempt = connect_async(self.url.as_str());
        let (ws, _response) = tokio::time::timeout(self.connect_timeout, attempt)
            .await
            .map_err(|_| ConnectionError::Timeout)?
            .map_err(map_ws_connect_error)?;
        Ok(ws)
    }

    /// Moves frames between the socket, the callback and the control channel
    /// until the socket ends.
    async fn pump<F: FnMut(ChannelEvent)>(
        &mut self,
        ws: WsStream,
        on_event: &mut F,
    ) -> SocketEnd {
        let (mut sender, mut reader) = ws.split();
        loop {
            tokio::select! {
                frame = reader.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        on_event(ChannelEvent::Message(text.as_str().to_owned()));
                    }
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => on_event(ChannelEvent::Message(text)),
                        Err(_) => {
                            tracing::warn!(len = data.len(), "dropping non-UTF-8 binary frame");
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        return match frame {
                            Some(frame) => {
                                let code = u16::from(frame.code);
                                SocketEnd::Remote {
                                    code,
                                    reason: frame.reason.as_str().to_owned(),
                                    clean: code == NORMAL_CLOSURE,
                                }
                            }
                            None => SocketEnd::Remote {
                                code: NORMAL_CLOSURE,
                                reason: String::new(),
                                clean: true,
                            },
                        };
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                    Some(Err(e)) => {
                        return SocketEnd::Remote {
                            code: ABNORMAL_CLOSURE,
                            reason: e.to_string(),
                            clean: false,
                        };
                    }
                    None => {
                        return SocketEnd::Remote {
                            code: ABNORMAL_CLOSURE,
                            reason: "stream ended without a close frame".to_string(),
                            clean: false,
                        };
                    }
                },
                control = self.control.recv() => match control {
                    Some(Control::Send(text, reply)) => {
                        let result = sender
                            .send(Message::Text(text.into()))
                            .await
                            .map_err(|e| ConnectionError::Send(e.to_string()));
                        let _ = reply.send(result);
                    }
                    Some(Control::Retry) => {
                        close_socket(&mut sender, RETRY_REASON).await;
                        return SocketEnd::Retry;
                    }
                    Some(Control::Close) | None => {
                        close_socket(&mut sender, SHUTDOWN_REASON).await;
                        return SocketEnd::Shutdown;
                    }
                },
            }
        }
    }

    /// Sleeps for `delay` while still answering control requests.
    async fn backoff(&mut self, delay: Duration) -> Resume {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = &mut sleep => return Resume::Reconnect,
                control = self.control.recv() => match control {
                    Some(Control::Retry) => return Resume::ResetAndReconnect,
                    Some(Control::Send(_, reply)) => {
                        let _ = reply.send(Err(ConnectionError::NotConnected));
                    }
                    Some(Control::Close) | None => return Resume::Stop,
                },
            }
        }
    }

    /// Waits with no socket open until the user retries or shuts down.
    async fn wait_for_retry(&mut self) -> Resume {
        loop {
            match self.control.recv().await {
                Some(Control::Retry) => return Resume::ResetAndReconnect,
                Some(Control::Send(_, reply)) => {
                    let _ = reply.send(Err(ConnectionError::NotConnected));
                }
                Some(Control::Close) | None => return Resume::Stop,
            }
        }
    }
}

async fn close_socket(sender: &mut WsSender, reason: &'static str) {
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: Utf8Bytes::from_static(reason),
    };
    if let Err(e) = sender.send(Message::Close(Some(frame))).await {
        tracing::debug!(err = %e, "close frame not delivered");
    }
}

/// The endpoint without its query string, so tokens stay out of logs.
fn redacted(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.to_string()
}

/// Map a `tokio_tungstenite` connection error to a [`ConnectionError`].
fn map_ws_connect_error(err: tokio_tungstenite::tungstenite::Error) -> ConnectionError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => ConnectionError::Unreachable(io_err.to_string()),
        WsError::Url(e) => ConnectionError::UnsupportedScheme(e.to_string()),
        WsError::Http(response) => {
            ConnectionError::Handshake(format!("HTTP status {}", response.status()))
        }
        other => ConnectionError::Handshake(other.to_string()),
    }
}
