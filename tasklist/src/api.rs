//! REST client for the task-list backend.
//!
//! Covers the calls the sync client needs: login, the initial list and task
//! loads, status edits, comments and avatars. Every authenticated call sends
//! `Authorization: Bearer <token>` from the [`Session`] it is given.

use std::collections::{BTreeSet, HashMap};

use futures_util::future::join_all;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tasklist_proto::{Comment, ListId, StatusId, Task, TaskId, TaskList, TaskStatus, UserId};

use crate::session::Session;

/// Fallback message when a failed login carries no server message.
const LOGIN_FAILED: &str = "Authentication failed";

/// Errors returned by [`ApiClient`].
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The session has no token.
    #[error("not authenticated: log in first")]
    NotAuthenticated,

    /// The backend rejected the session token (HTTP 401).
    #[error("session expired or invalid, log in again")]
    Unauthorized,

    /// Any other non-success status.
    #[error("request failed with status {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Server-provided message, or the status reason.
        message: String,
    },

    /// Connection or body decoding failure.
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A success response without the expected content.
    #[error("unexpected response from server: {0}")]
    UnexpectedResponse(String),

    /// The configured base URL is not a valid URL.
    #[error("invalid API base URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl ApiError {
    /// Whether the caller should drop its session.
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized | Self::NotAuthenticated)
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: Option<String>,
    user: Option<LoginUser>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginUser {
    id: UserId,
    user_name: String,
    role: Option<String>,
    avatar: Option<LoginAvatar>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginAvatar {
    base64_image: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusUpdate {
    status_id: StatusId,
    source: &'static str,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Thin typed wrapper over the backend's REST endpoints.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
}

impl ApiClient {
    /// Creates a client for `base_url` (e.g. `http://localhost:8080/api`).
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidUrl`] if `base_url` does not parse.
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        url::Url::parse(base_url)?;
        Ok(Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// The base URL requests are sent to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Exchanges credentials for a [`Session`].
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Status`] carrying the server's message when the
    /// credentials are rejected.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, ApiError> {
        let response = self
            .http
            .post(self.url("/User/login"))
            .json(&LoginRequest { email, password })
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let message = error_message(response)
                .await
                .unwrap_or_else(|| LOGIN_FAILED.to_string());
            tracing::warn!(status = status.as_u16(), %message, "login rejected");
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body: LoginResponse = response.json().await?;
        let (Some(token), Some(user)) = (body.token.filter(|t| !t.is_empty()), body.user) else {
            return Err(ApiError::UnexpectedResponse(
                "login response has no token".to_string(),
            ));
        };
        let mut session = Session::new(token, user.id, user.user_name)
            .with_role(user.role.unwrap_or_else(|| "User".to_string()));
        if let Some(avatar) = user.avatar.and_then(|a| a.base64_image) {
            session = session.with_avatar(avatar);
        }
        tracing::info!(user_id = %session.user_id(), "logged in");
        Ok(session)
    }

    /// Every list visible to the session user.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on transport failure or a non-success status.
    pub async fn fetch_lists(&self, session: &Session) -> Result<Vec<TaskList>, ApiError> {
        let mut lists: Vec<TaskList> = self.get_json(session, "/TodoList").await?;
        for list in &mut lists {
            list.dedup_assignments();
        }
        Ok(lists)
    }

    /// Tasks of one list. A non-array body is treated as "no tasks".
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on transport failure or a non-success status.
    pub async fn fetch_tasks(
        &self,
        session: &Session,
        list: ListId,
    ) -> Result<Vec<Task>, ApiError> {
        let body: Value = self
            .get_json(session, &format!("/Todo/todos/by-todolist/{list}"))
            .await?;
        if !body.is_array() {
            tracing::warn!(list_id = %list, "task list response is not an array");
            return Ok(Vec::new());
        }
        serde_json::from_value(body).map_err(|e| ApiError::UnexpectedResponse(e.to_string()))
    }

    /// Statuses a task can be moved to.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on transport failure or a non-success status.
    pub async fn fetch_statuses(&self, session: &Session) -> Result<Vec<TaskStatus>, ApiError> {
        self.get_json(session, "/TodoStatus").await
    }

    /// Moves a task to another status.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on transport failure or a non-success status.
    pub async fn update_status(
        &self,
        session: &Session,
        task: TaskId,
        status: StatusId,
    ) -> Result<(), ApiError> {
        let response = self
            .http
            .put(self.url(&format!("/TodoStatus/{task}/status")))
            .bearer_auth(token(session)?)
            .json(&StatusUpdate {
                status_id: status,
                source: "web",
            })
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    /// Comments on one task.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on transport failure or a non-success status.
    pub async fn fetch_comments(
        &self,
        session: &Session,
        task: TaskId,
    ) -> Result<Vec<Comment>, ApiError> {
        self.get_json(session, &format!("/comment/todo/{task}")).await
    }

    /// Raw avatar image bytes for `user`, or `None` if the user has none.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on transport failure or a non-success status
    /// other than 404.
    pub async fn fetch_avatar(&self, user: UserId) -> Result<Option<Vec<u8>>, ApiError> {
        let response = self
            .http
            .get(self.url(&format!("/User/avatar/{user}")))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let bytes = check(response).await?.bytes().await?;
        Ok((!bytes.is_empty()).then(|| bytes.to_vec()))
    }

    /// Fetches avatars for every distinct user concurrently.
    ///
    /// A failed fetch yields `None` for that user.
    pub async fn fetch_avatars(
        &self,
        users: impl IntoIterator<Item = UserId>,
    ) -> HashMap<UserId, Option<Vec<u8>>> {
        let distinct: BTreeSet<UserId> = users.into_iter().collect();
        let fetches = distinct.into_iter().map(|user| async move {
            let avatar = self.fetch_avatar(user).await.unwrap_or_else(|e| {
                tracing::debug!(user_id = %user, err = %e, "avatar fetch failed");
                None
            });
            (user, avatar)
        });
        join_all(fetches).await.into_iter().collect()
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        session: &Session,
        path: &str,
    ) -> Result<T, ApiError> {
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(token(session)?)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }
}

fn token(session: &Session) -> Result<&str, ApiError> {
    let token = session.token();
    if token.is_empty() {
        return Err(ApiError::NotAuthenticated);
    }
    Ok(token)
}

/// Maps a non-success response onto [`ApiError`].
async fn check(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED {
        tracing::warn!("backend rejected session token");
        return Err(ApiError::Unauthorized);
    }
    let message = error_message(response).await.unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    });
    Err(ApiError::Status {
        status: status.as_u16(),
        message,
    })
}

async fn error_message(response: Response) -> Option<String> {
    response
        .json::<ErrorBody>()
        .await
        .ok()
        .and_then(|b| b.message)
        .filter(|m| !m.is_empty())
}
