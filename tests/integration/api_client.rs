// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Integration tests for the REST client against an in-process `axum` stub
//! of the backend.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tasklist::api::{ApiClient, ApiError};
use tasklist::session::Session;
use tasklist_proto::{ListId, StatusId, TaskId, UserId};

const TOKEN: &str = "tok";

#[derive(Clone, Default)]
struct Stub {
    status_updates: Arc<Mutex<Vec<(i64, Value)>>>,
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {TOKEN}"))
}

async fn login(Json(body): Json<Value>) -> Response {
    if body["email"] == "ana@example.com" && body["password"] == "pw" {
        Json(json!({
            "token": TOKEN,
            "user": {"id": 7, "userName": "ana", "role": "Admin", "avatar": {"base64Image": "/9j/AA"}}
        }))
        .into_response()
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"message": "Invalid credentials"})),
        )
            .into_response()
    }
}

async fn lists(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!([{
        "id": 10,
        "listName": "Groceries",
        "userId": 7,
        "createdAt": "2025-01-01T00:00:00",
        "todos": [],
        "assignments": [
            {"userId": 8, "canEdit": true, "assignedAt": "a"},
            {"userId": 8, "canEdit": false, "assignedAt": "b"}
        ]
    }]))
    .into_response()
}

async fn tasks(headers: HeaderMap, Path(list): Path<i64>) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if list == 10 {
        Json(json!([{
            "id": 5,
            "taskName": "Milk",
            "taskDescription": null,
            "statusId": 1,
            "statusName": "Pending",
            "todoListId": 10,
            "userId": 7,
            "todoAssignments": [{"userId": 8, "userName": "bo", "canEdit": false, "assignedAt": "t"}],
            "comments": null
        }]))
        .into_response()
    } else {
        Json(json!({"unexpected": true})).into_response()
    }
}

async fn statuses(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!([{"id": 1, "statusName": "Pending"}, {"id": 3, "statusName": "Done"}])).into_response()
}

async fn update_status(
    State(stub): State<Stub>,
    headers: HeaderMap,
    Path(task): Path<i64>,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if task == 404 {
        return (StatusCode::NOT_FOUND, Json(json!({"message": "Todo not found"}))).into_response();
    }
    stub.status_updates.lock().push((task, body));
    StatusCode::NO_CONTENT.into_response()
}

async fn comments(headers: HeaderMap, Path(task): Path<i64>) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!([{
        "id": 1, "text": "first", "todoId": task, "userId": 8,
        "userName": "bo", "avatarUrl": "", "createdAt": "t"
    }]))
    .into_response()
}

async fn avatar(Path(user): Path<i64>) -> Response {
    match user {
        1 => vec![0xff_u8, 0xd8, 0xff].into_response(),
        2 => StatusCode::NOT_FOUND.into_response(),
        _ => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn start_stub() -> (ApiClient, Stub) {
    let stub = Stub::default();
    let app = Router::new()
        .route("/api/User/login", post(login))
        .route("/api/TodoList", get(lists))
        .route("/api/Todo/todos/by-todolist/{id}", get(tasks))
        .route("/api/TodoStatus", get(statuses))
        .route("/api/TodoStatus/{id}/status", put(update_status))
        .route("/api/comment/todo/{id}", get(comments))
        .route("/api/User/avatar/{id}", get(avatar))
        .with_state(stub.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = ApiClient::new(&format!("http://{addr}/api/")).unwrap();
    (client, stub)
}

fn session() -> Session {
    Session::new(TOKEN, UserId::new(7), "ana")
}

#[tokio::test]
async fn login_builds_session() {
    let (api, _) = start_stub().await;
    let session = api.login("ana@example.com", "pw").await.unwrap();
    assert_eq!(session.token(), TOKEN);
    assert_eq!(session.user_id(), UserId::new(7));
    assert_eq!(session.user_name(), "ana");
    assert!(session.is_admin());
    assert_eq!(session.avatar(), Some("/9j/AA"));
}

#[tokio::test]
async fn failed_login_carries_server_message() {
    let (api, _) = start_stub().await;
    let err = api.login("ana@example.com", "wrong").await.unwrap_err();
    match err {
        ApiError::Status { status, message } => {
            assert_eq!(status, 401);
            assert_eq!(message, "Invalid credentials");
        }
        other => panic!("expected Status, got {other:?}"),
    }
}

#[tokio::test]
async fn stale_token_is_unauthorized() {
    let (api, _) = start_stub().await;
    let stale = Session::new("expired", UserId::new(7), "ana");
    let err = api.fetch_lists(&stale).await.unwrap_err();
    assert!(matches!(err, ApiError::Unauthorized));
    assert!(err.is_unauthorized());
}

#[tokio::test]
async fn lists_are_loaded_with_unique_assignments() {
    let (api, _) = start_stub().await;
    let lists = api.fetch_lists(&session()).await.unwrap();
    assert_eq!(lists.len(), 1);
    assert_eq!(lists[0].id, ListId::new(10));
    assert_eq!(lists[0].assignments.len(), 1);
    assert!(lists[0].assignments[0].can_edit);
}

#[tokio::test]
async fn tasks_of_list_and_non_array_body() {
    let (api, _) = start_stub().await;
    let tasks = api.fetch_tasks(&session(), ListId::new(10)).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].name, "Milk");
    assert_eq!(tasks[0].description, "");
    assert!(tasks[0].comments.is_empty());
    assert_eq!(tasks[0].assignments[0].display_name, "bo");

    let none = api.fetch_tasks(&session(), ListId::new(99)).await.unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn statuses_and_status_update() {
    let (api, stub) = start_stub().await;
    let statuses = api.fetch_statuses(&session()).await.unwrap();
    assert_eq!(statuses.len(), 2);
    assert_eq!(statuses[1].name, "Done");

    api.update_status(&session(), TaskId::new(5), StatusId::new(3))
        .await
        .unwrap();
    let updates = stub.status_updates.lock().clone();
    assert_eq!(updates, vec![(5, json!({"statusId": 3, "source": "web"}))]);

    let err = api
        .update_status(&session(), TaskId::new(404), StatusId::new(3))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ApiError::Status { status: 404, ref message } if message == "Todo not found"
    ));
}

#[tokio::test]
async fn comments_of_task() {
    let (api, _) = start_stub().await;
    let comments = api.fetch_comments(&session(), TaskId::new(5)).await.unwrap();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].task_id, TaskId::new(5));
    assert_eq!(comments[0].author_name, "bo");
}

#[tokio::test]
async fn avatars_are_fetched_once_per_user_and_failures_are_none() {
    let (api, _) = start_stub().await;
    let users = [1, 2, 3, 1].map(UserId::new);
    let avatars = api.fetch_avatars(users).await;
    assert_eq!(avatars.len(), 3);
    assert_eq!(avatars[&UserId::new(1)], Some(vec![0xff, 0xd8, 0xff]));
    assert_eq!(avatars[&UserId::new(2)], None);
    assert_eq!(avatars[&UserId::new(3)], None);
}
