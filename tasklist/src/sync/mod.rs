//! Client-side reconciliation of live updates.
//!
//! [`Dispatcher`] classifies and deduplicates raw frames, [`LocalState`]
//! holds the cache and applies each message, and [`SyncEngine`] ties the
//! two to a connection's lifecycle.

pub mod dedup;
pub mod dispatch;
pub mod merge;
pub mod notify;
pub mod state;

pub use dedup::SeenMessages;
pub use dispatch::{DispatchError, Dispatched, Dispatcher};
pub use notify::NotificationQueue;
pub use state::{LocalState, Outcome};

/// Dispatcher and cache for one session.
#[derive(Debug, Clone)]
pub struct SyncEngine {
    dispatcher: Dispatcher,
    state: LocalState,
}

impl SyncEngine {
    /// Wraps an already loaded cache.
    #[must_use]
    pub fn new(state: LocalState, dedup_capacity: usize) -> Self {
        Self {
            dispatcher: Dispatcher::new(dedup_capacity),
            state,
        }
    }

    /// A new connection was established; identities from the previous one
    /// no longer count as seen.
    pub fn on_connected(&mut self) {
        self.dispatcher.reset();
    }

    /// Applies one raw frame.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] if the frame cannot be parsed.
    pub fn handle_frame(&mut self, raw: &str) -> Result<Dispatched, DispatchError> {
        self.dispatcher.dispatch(raw, &mut self.state)
    }

    /// The cache.
    #[must_use]
    pub const fn state(&self) -> &LocalState {
        &self.state
    }

    /// Mutable access for local operations.
    pub const fn state_mut(&mut self) -> &mut LocalState {
        &mut self.state
    }

    /// The dispatcher.
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}
