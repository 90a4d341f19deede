//! Live sync wiring between the channel and the local cache.
//!
//! [`spawn_live`] opens the live channel and routes every channel event
//! through a [`SyncEngine`] held behind a mutex. The presentation layer
//! drains [`LiveEvent`]s from the returned receiver and reads state through
//! [`LiveHandle`].
//!
//! # Architecture
//!
//! ```text
//! presentation  ←── LiveEvent ───  channel supervisor ── SyncEngine
//!               ─── LiveHandle →   (retry / send / shutdown / local edits)
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use tasklist_proto::TaskId;

use crate::config::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_DEDUP_CAPACITY, ReconnectConfig};
use crate::connection::{self, ChannelConfig, ChannelEvent, ConnectionError, ConnectionHandle};
use crate::session::Session;
use crate::sync::{Dispatched, LocalState, Outcome, SyncEngine};

/// Banner shown when a live frame cannot be processed.
pub const PARSE_ERROR_MESSAGE: &str =
    "Error processing real-time updates. Please refresh the page.";

/// Events sent from the live channel to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveEvent {
    /// The channel is open.
    Connected {
        /// Whether this follows an earlier connection.
        reconnect: bool,
    },
    /// The channel closed.
    Disconnected {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
        /// Whether a reconnect will follow.
        will_reconnect: bool,
    },
    /// A reconnect is scheduled.
    Reconnecting {
        /// 1-based attempt number.
        attempt: u32,
        /// Attempt budget.
        max_attempts: u32,
        /// Wait before the attempt.
        delay: Duration,
    },
    /// Reconnecting gave up; a manual retry is needed.
    ReconnectFailed {
        /// User-facing message.
        message: String,
    },
    /// Cached state changed because of a live message.
    StateChanged {
        /// Message kind, e.g. `task_created`.
        kind: &'static str,
        /// The entity the message named, if any.
        entity: Option<i64>,
    },
    /// A notification was queued for the session user.
    NotificationReceived {
        /// The assigned task.
        task_id: TaskId,
    },
    /// A live frame could not be processed.
    Error(String),
}

/// Configuration for the live sync layer.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// Live endpoint.
    pub ws_url: String,
    /// Backoff and attempt budget.
    pub reconnect: ReconnectConfig,
    /// Bound on each connection attempt.
    pub connect_timeout: Duration,
    /// Maximum number of identities kept for duplicate suppression.
    pub dedup_capacity: usize,
}

impl LiveConfig {
    /// Creates a `LiveConfig` with default backoff, timeout and dedup capacity.
    #[must_use]
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            reconnect: ReconnectConfig::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
        }
    }

    fn channel(&self) -> ChannelConfig {
        ChannelConfig {
            ws_url: self.ws_url.clone(),
            reconnect: self.reconnect,
            connect_timeout: self.connect_timeout,
        }
    }
}

/// Handle to a running live sync session.
#[derive(Debug)]
pub struct LiveHandle {
    engine: Arc<Mutex<SyncEngine>>,
    connection: ConnectionHandle,
}

impl LiveHandle {
    /// A copy of the current cache.
    #[must_use]
    pub fn snapshot(&self) -> LocalState {
        self.engine.lock().state().clone()
    }

    /// Runs `f` against the cache without copying it.
    pub fn with_state<R>(&self, f: impl FnOnce(&LocalState) -> R) -> R {
        f(self.engine.lock().state())
    }

    /// Applies a local operation (list selection, local edits) to the cache.
    pub fn update<R>(&self, f: impl FnOnce(&mut LocalState) -> R) -> R {
        f(self.engine.lock().state_mut())
    }

    /// Dismisses one notification.
    pub fn dismiss(&self, task: TaskId) -> Outcome {
        self.update(|state| state.dismiss_notification(task))
    }

    /// Dismisses every visible notification.
    pub fn dismiss_all(&self) -> Vec<TaskId> {
        self.update(LocalState::dismiss_all_notifications)
    }

    /// Whether the channel is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Reconnects immediately with a fresh attempt budget.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Closed`] after shutdown.
    pub fn retry(&self) -> Result<(), ConnectionError> {
        self.connection.retry()
    }

    /// Sends a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NotConnected`] while disconnected.
    pub async fn send(&self, text: impl Into<String>) -> Result<(), ConnectionError> {
        self.connection.send(text).await
    }

    /// Closes the channel and waits for the supervisor to exit.
    pub async fn shutdown(self) {
        self.connection.close().await;
    }
}

/// Opens the live channel for `session` on top of an already loaded cache.
///
/// # Errors
///
/// Returns [`ConnectionError`] if the session has no token or the endpoint
/// is invalid. Transport failures after that are reported as
/// [`LiveEvent`]s.
pub fn spawn_live(
    config: &LiveConfig,
    session: &Session,
    state: LocalState,
) -> Result<(LiveHandle, mpsc::UnboundedReceiver<LiveEvent>), ConnectionError> {
    let engine = Arc::new(Mutex::new(SyncEngine::new(state, config.dedup_capacity)));
    let (evt_tx, evt_rx) = mpsc::unbounded_channel();

    let cb_engine = Arc::clone(&engine);
    let connection = connection::connect(&config.channel(), session, move |event| {
        if let Some(live) = translate(&cb_engine, event)
            && evt_tx.send(live).is_err()
        {
            tracing::trace!("live event receiver dropped");
        }
    })?;

    Ok((LiveHandle { engine, connection }, evt_rx))
}

/// Applies a channel event to the engine and maps it to a presentation event.
fn translate(engine: &Mutex<SyncEngine>, event: ChannelEvent) -> Option<LiveEvent> {
    match event {
        ChannelEvent::Opened { reconnect } => {
            engine.lock().on_connected();
            Some(LiveEvent::Connected { reconnect })
        }
        ChannelEvent::Message(raw) => {
            let result = engine.lock().handle_frame(&raw);
            match result {
                Ok(Dispatched::Routed {
                    kind,
                    entity,
                    outcome: Outcome::Applied,
                    ..
                }) => Some(LiveEvent::StateChanged { kind, entity }),
                Ok(Dispatched::Notified {
                    task_id,
                    outcome: Outcome::Applied,
                    ..
                }) => Some(LiveEvent::NotificationReceived { task_id }),
                Ok(_) => None,
                Err(e) => {
                    tracing::error!(err = %e, "failed to process live message");
                    Some(LiveEvent::Error(PARSE_ERROR_MESSAGE.to_string()))
                }
            }
        }
        ChannelEvent::Closed {
            code,
            reason,
            clean,
        } => Some(LiveEvent::Disconnected {
            code,
            reason,
            will_reconnect: !clean,
        }),
        ChannelEvent::Reconnecting {
            attempt,
            max_attempts,
            delay,
        } => Some(LiveEvent::Reconnecting {
            attempt,
            max_attempts,
            delay,
        }),
        ChannelEvent::Exhausted { message, .. } => Some(LiveEvent::ReconnectFailed { message }),
    }
}
