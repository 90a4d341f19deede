//! Authenticated session context.
//!
//! A [`Session`] is created by a successful login and passed explicitly to
//! everything that talks to the backend (REST client, live channel,
//! reconciler). Logging out, or any `401` from the backend, tears it down.
//!
//! Between CLI invocations the session is kept in a small TOML file managed
//! by [`SessionStore`].

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tasklist_proto::UserId;

/// Errors that can occur when persisting or restoring a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Failed to read or write the session file.
    #[error("session file {path}: {source}")]
    Io {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The session file exists but is not valid TOML.
    #[error("failed to parse session file: {0}")]
    Parse(#[from] toml::de::Error),

    /// The session could not be serialised.
    #[error("failed to serialise session: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Could not determine the user's config directory.
    #[error("could not determine config directory (no HOME or XDG_CONFIG_HOME)")]
    NoConfigDir,
}

/// Identity and credential of the logged-in user.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    token: String,
    user_id: UserId,
    user_name: String,
    #[serde(default = "default_role")]
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    avatar: Option<String>,
}

fn default_role() -> String {
    "User".to_string()
}

impl Session {
    /// Creates a session with the default `User` role and no cached avatar.
    pub fn new(token: impl Into<String>, user_id: UserId, user_name: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            user_id,
            user_name: user_name.into(),
            role: default_role(),
            avatar: None,
        }
    }

    /// Sets the user's role.
    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    /// Caches the user's avatar reference.
    #[must_use]
    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = Some(avatar.into());
        self
    }

    /// The bearer credential.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The logged-in user's identifier.
    #[must_use]
    pub const fn user_id(&self) -> UserId {
        self.user_id
    }

    /// The logged-in user's display name.
    #[must_use]
    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    /// The logged-in user's role (`User` or `Admin`).
    #[must_use]
    pub fn role(&self) -> &str {
        &self.role
    }

    /// The cached avatar reference, if the login response carried one.
    #[must_use]
    pub fn avatar(&self) -> Option<&str> {
        self.avatar.as_deref()
    }

    /// Whether the user holds the admin role.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role.eq_ignore_ascii_case("admin")
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .field("user_id", &self.user_id)
            .field("user_name", &self.user_name)
            .field("role", &self.role)
            .field("avatar", &self.avatar.as_ref().map(|_| "<cached>"))
            .finish()
    }
}

/// File-backed storage for a single [`Session`].
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    /// Uses the given file path.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Uses `~/.config/tasklist/session.toml`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NoConfigDir`] if no config directory exists
    /// for the current user.
    pub fn default_location() -> Result<Self, SessionError> {
        let dir = dirs::config_dir().ok_or(SessionError::NoConfigDir)?;
        Ok(Self::at(dir.join("tasklist").join("session.toml")))
    }

    /// The backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the stored session. A missing file means "logged out".
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the file exists but cannot be read or parsed.
    pub fn load(&self) -> Result<Option<Session>, SessionError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(toml::from_str(&contents)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SessionError::Io {
                path: self.path.clone(),
                source: e,
            }),
        }
    }

    /// Writes the session, creating the parent directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if serialisation or the write fails.
    pub fn save(&self, session: &Session) -> Result<(), SessionError> {
        let contents = toml::to_string(session)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        std::fs::write(&self.path, contents).map_err(|e| self.io_error(e))?;
        tracing::debug!(path = %self.path.display(), "session saved");
        Ok(())
    }

    /// Removes the stored session. Clearing an absent session is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Io`] if the file exists but cannot be removed.
    pub fn clear(&self) -> Result<(), SessionError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "session cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn io_error(&self, source: std::io::Error) -> SessionError {
        SessionError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
