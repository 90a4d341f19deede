//! Routes parsed live messages to the reconciler, dropping duplicates.

use tasklist_proto::{Inbound, LiveMessage, MessageIdentity, ParseError, TaskId};

use super::dedup::SeenMessages;
use super::state::{LocalState, Outcome};

/// Errors that stop a frame from reaching the reconciler.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The frame could not be parsed.
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// What happened to one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    /// The message was routed to its reconciler operation.
    Routed {
        /// Identity the message was recorded under.
        identity: MessageIdentity,
        /// Message kind, see [`LiveMessage::kind`].
        kind: &'static str,
        /// The entity the message names, if any.
        entity: Option<i64>,
        /// Whether the reconciler changed state.
        outcome: Outcome,
    },
    /// A personal assignment was offered to the notification queue.
    Notified {
        /// Identity the message was recorded under.
        identity: MessageIdentity,
        /// The assigned task.
        task_id: TaskId,
        /// Whether the queue changed.
        outcome: Outcome,
    },
    /// The identity was already seen on this connection.
    Duplicate(MessageIdentity),
    /// The action is not one this client handles.
    Unrecognized {
        /// The action string as received.
        action: String,
    },
}

/// Classifies frames and keeps the per-connection dedup set.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    seen: SeenMessages,
    last_fallback_ms: i64,
}

impl Dispatcher {
    /// Creates a dispatcher whose dedup set holds `dedup_capacity` identities.
    #[must_use]
    pub fn new(dedup_capacity: usize) -> Self {
        Self {
            seen: SeenMessages::with_capacity(dedup_capacity),
            last_fallback_ms: 0,
        }
    }

    /// Forgets every seen identity. Called on each (re)connection.
    pub fn reset(&mut self) {
        self.seen.clear();
    }

    /// Number of identities currently remembered.
    #[must_use]
    pub fn seen_len(&self) -> usize {
        self.seen.len()
    }

    /// Parses `raw` and applies it to `state`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Parse`] if the frame is malformed; `state` is
    /// untouched in that case.
    pub fn dispatch(
        &mut self,
        raw: &str,
        state: &mut LocalState,
    ) -> Result<Dispatched, DispatchError> {
        let inbound = Inbound::parse(raw).inspect_err(|e| {
            tracing::warn!(err = %e, "dropping malformed live message");
        })?;
        Ok(self.dispatch_inbound(inbound, state))
    }

    /// Applies an already parsed message to `state`.
    pub fn dispatch_inbound(&mut self, inbound: Inbound, state: &mut LocalState) -> Dispatched {
        let identity = inbound.identity_at(self.next_fallback_ms());
        if !self.seen.insert(identity.clone()) {
            tracing::debug!(%identity, "duplicate live message dropped");
            return Dispatched::Duplicate(identity);
        }

        let kind = inbound.message.kind();
        let entity = inbound.message.entity_id();
        let outcome = match inbound.message {
            LiveMessage::TaskCreated(payload) => state.task_created(&payload),
            LiveMessage::TaskUpdated(payload) => state.task_updated(&payload),
            LiveMessage::StatusChanged(payload) => state.status_changed(&payload),
            LiveMessage::TaskDeleted { task_id } => state.task_deleted(task_id),
            LiveMessage::CommentCreated(comment) => state.comment_created(comment),
            LiveMessage::CommentUpdated(comment) => state.comment_updated(comment),
            LiveMessage::CommentDeleted { comment_id } => state.comment_deleted(comment_id),
            LiveMessage::Assignment(notification) => {
                let task_id = notification.task_id;
                let outcome = state.notification(notification);
                tracing::debug!(%identity, %task_id, ?outcome, "assignment offered");
                return Dispatched::Notified {
                    identity,
                    task_id,
                    outcome,
                };
            }
            LiveMessage::Unrecognized { .. } => {
                let action = inbound.action.unwrap_or_default();
                tracing::warn!(%action, "unrecognised live action");
                return Dispatched::Unrecognized { action };
            }
        };
        tracing::debug!(%identity, kind, ?outcome, "live message applied");
        Dispatched::Routed {
            identity,
            kind,
            entity,
            outcome,
        }
    }

    /// Wall-clock milliseconds for identities of frames that name no
    /// entity, bumped past the previous value so two such frames never
    /// share an identity.
    fn next_fallback_ms(&mut self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        self.last_fallback_ms = now.max(self.last_fallback_ms.saturating_add(1));
        self.last_fallback_ms
    }
}
