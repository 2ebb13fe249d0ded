//! Integration tests for the HTTP sync client.
//!
//! Runs `HttpSyncClient` against a fake backend served by axum on a random
//! local port. The fake speaks the backend's mixed payload shapes so the
//! tests exercise normalization, status mapping, multipart uploads and the
//! login cookie end to end.
//!
//! Verification command: `cargo test --test http_client`

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Form, Json, Router};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use url::Url;

use vidchat::chat::{ConversationSession, SessionConfig};
use vidchat::poll::PollConfig;
use vidchat::sync::http::{HttpConfig, HttpSyncClient};
use vidchat::sync::{Attachment, SyncClient, SyncError};
use vidchat_proto::message::{ConversationId, Role, Timestamp};

// =============================================================================
// Fake backend
// =============================================================================

const SESSION_COOKIE: &str = "session_id=abc123";

/// One multipart field as received by the fake.
#[derive(Debug, Clone)]
struct ReceivedPart {
    name: String,
    file_name: Option<String>,
    content_type: Option<String>,
    bytes: Vec<u8>,
}

#[derive(Debug, Default)]
struct Recorded {
    since: Vec<Option<String>>,
    posts: Vec<Vec<ReceivedPart>>,
    renamed: Vec<(String, String)>,
    deleted: Vec<String>,
    logouts: usize,
    /// Messages stored by `/send_message`, replayed by the messages route.
    stored: Vec<serde_json::Value>,
}

type Shared = Arc<Mutex<Recorded>>;

#[derive(Deserialize)]
struct LoginForm {
    email: String,
    password: String,
}

#[derive(Deserialize)]
struct TitleForm {
    title: String,
}

fn authenticated(headers: &HeaderMap) -> bool {
    headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|c| c.contains(SESSION_COOKIE))
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"detail": "Not authenticated"})),
    )
        .into_response()
}

async fn login(Form(form): Form<LoginForm>) -> Response {
    if form.email == "coach@example.com" && form.password == "secret" {
        (
            [(header::SET_COOKIE, format!("{SESSION_COOKIE}; Path=/"))],
            Json(json!({"success": true})),
        )
            .into_response()
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "message": "Invalid credentials"})),
        )
            .into_response()
    }
}

async fn logout(State(shared): State<Shared>) -> Response {
    shared.lock().logouts += 1;
    (
        [(header::SET_COOKIE, "session_id=; Max-Age=0; Path=/")],
        Json(json!({"success": true, "message": "Logout successful"})),
    )
        .into_response()
}

async fn auth_status(headers: HeaderMap) -> Json<serde_json::Value> {
    Json(json!({"authenticated": authenticated(&headers)}))
}

async fn create_conversation(headers: HeaderMap, Form(form): Form<TitleForm>) -> Response {
    if !authenticated(&headers) {
        return unauthorized();
    }
    match form.title.as_str() {
        "boom" => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"detail": "database unavailable"})),
        )
            .into_response(),
        "rejected" => Json(json!({"success": false, "message": "quota exceeded"})).into_response(),
        title => Json(json!({
            "success": true,
            "conversation": {"id": 7, "title": title, "created_at": "2024-05-01T10:00:00"}
        }))
        .into_response(),
    }
}

async fn list_conversations() -> Json<serde_json::Value> {
    Json(json!({
        "conversations": [
            {"id": 7, "title": "Match review", "created_at": "2024-05-01T10:00:00"},
            {"id": "abc", "title": "Drills"},
            {"title": "no id"}
        ]
    }))
}

async fn messages(
    State(shared): State<Shared>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    match id.as_str() {
        "7" => {
            let mut recorded = shared.lock();
            recorded.since.push(query.get("since").cloned());
            let mut list = vec![
                json!({"chat_type": "user", "message": "hi", "TIMESTAMP": "2024-05-01T10:00:01"}),
                json!({"role": "assistant", "content": "hello", "createdAt": "2024-05-01T10:00:02Z"}),
                json!({"message": "no timestamp"}),
            ];
            list.extend(recorded.stored.iter().cloned());
            Json(json!({"messages": list})).into_response()
        }
        "slow" => {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Json(json!({"messages": []})).into_response()
        }
        _ => (
            StatusCode::NOT_FOUND,
            Json(json!({"detail": "Conversation not found"})),
        )
            .into_response(),
    }
}

async fn send_message(State(shared): State<Shared>, mut multipart: Multipart) -> Response {
    let mut parts = Vec::new();
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let Ok(bytes) = field.bytes().await else {
            return StatusCode::BAD_REQUEST.into_response();
        };
        parts.push(ReceivedPart {
            name,
            file_name,
            content_type,
            bytes: bytes.to_vec(),
        });
    }
    let text = parts
        .iter()
        .find(|p| p.name == "message")
        .map(|p| String::from_utf8_lossy(&p.bytes).into_owned())
        .unwrap_or_default();

    let mut recorded = shared.lock();
    let id = 100 + recorded.posts.len();
    recorded.stored.push(json!({
        "id": id,
        "chat_type": "user",
        "message": text,
        "TIMESTAMP": "2024-05-01T10:00:03",
    }));
    recorded.posts.push(parts);
    Json(json!({
        "response": "Message received and queued for processing",
        "conversation_id": "7",
        "token_balance": 41
    }))
    .into_response()
}

async fn rename(
    State(shared): State<Shared>,
    Path(id): Path<String>,
    Form(form): Form<TitleForm>,
) -> Json<serde_json::Value> {
    shared.lock().renamed.push((id, form.title));
    Json(json!({"success": true}))
}

async fn delete(State(shared): State<Shared>, Path(id): Path<String>) -> Response {
    if id == "7" {
        shared.lock().deleted.push(id);
        Json(json!({"success": true})).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({"detail": "Conversation not found"})),
        )
            .into_response()
    }
}

/// Starts the fake backend and returns its base URL.
async fn start_backend() -> (Url, Shared) {
    let shared = Shared::default();
    let app = Router::new()
        .route("/api/login", post(login))
        .route("/logout", post(logout))
        .route("/auth_status", get(auth_status))
        .route(
            "/conversations",
            get(list_conversations).post(create_conversation),
        )
        .route("/conversations/{id}", put(rename).delete(delete))
        .route("/conversations/{id}/messages", get(messages))
        .route("/send_message", post(send_message))
        .with_state(Arc::clone(&shared));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (Url::parse(&format!("http://{addr}/")).unwrap(), shared)
}

async fn logged_in_client() -> (HttpSyncClient, Shared) {
    let (url, shared) = start_backend().await;
    let client = HttpSyncClient::new(HttpConfig::new(url)).unwrap();
    client.login("coach@example.com", "secret").await.unwrap();
    (client, shared)
}

// =============================================================================
// Authentication
// =============================================================================

#[tokio::test]
async fn login_cookie_authenticates_later_requests() {
    let (url, _shared) = start_backend().await;
    let client = HttpSyncClient::new(HttpConfig::new(url)).unwrap();

    assert!(!client.auth_status().await.unwrap());
    assert!(matches!(
        client.create_conversation("before login").await,
        Err(SyncError::Unauthorized)
    ));

    client.login("coach@example.com", "secret").await.unwrap();
    assert!(client.auth_status().await.unwrap());
    assert!(client.create_conversation("after login").await.is_ok());
}

#[tokio::test]
async fn bad_credentials_are_unauthorized() {
    let (url, _shared) = start_backend().await;
    let client = HttpSyncClient::new(HttpConfig::new(url)).unwrap();
    assert!(matches!(
        client.login("coach@example.com", "wrong").await,
        Err(SyncError::Unauthorized)
    ));
    assert!(!client.auth_status().await.unwrap());
}

#[tokio::test]
async fn logout_drops_the_session_cookie() {
    let (client, shared) = logged_in_client().await;
    assert!(client.auth_status().await.unwrap());

    client.logout().await.unwrap();
    assert_eq!(shared.lock().logouts, 1);
    assert!(!client.auth_status().await.unwrap());
    assert!(matches!(
        client.create_conversation("after logout").await,
        Err(SyncError::Unauthorized)
    ));
}

// =============================================================================
// Conversations
// =============================================================================

#[tokio::test]
async fn create_normalizes_the_envelope() {
    let (client, _shared) = logged_in_client().await;
    let conv = client.create_conversation("Second half").await.unwrap();
    assert_eq!(conv.id, ConversationId::new("7"));
    assert_eq!(conv.title, "Second half");
    assert_eq!(conv.created_at, Some(Timestamp::parse("2024-05-01T10:00:00Z").unwrap()));
}

#[tokio::test]
async fn create_failures_map_to_sync_errors() {
    let (client, _shared) = logged_in_client().await;
    assert_eq!(
        client.create_conversation("boom").await.unwrap_err(),
        SyncError::Status {
            status: 500,
            detail: "database unavailable".to_string()
        }
    );
    assert_eq!(
        client.create_conversation("rejected").await.unwrap_err(),
        SyncError::Status {
            status: 200,
            detail: "quota exceeded".to_string()
        }
    );
}

#[tokio::test]
async fn list_drops_malformed_records() {
    let (client, _shared) = logged_in_client().await;
    let list = client.list_conversations().await.unwrap();
    let ids: Vec<&str> = list.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["7", "abc"]);
    assert!(list[1].created_at.is_none());
}

#[tokio::test]
async fn rename_and_delete_hit_the_conversation_resource() {
    let (client, shared) = logged_in_client().await;
    let id = ConversationId::new("7");

    client.rename_conversation(&id, "Renamed").await.unwrap();
    client.delete_conversation(&id).await.unwrap();
    assert!(matches!(
        client.delete_conversation(&ConversationId::new("8")).await,
        Err(SyncError::NotFound(d)) if d == "Conversation not found"
    ));

    let recorded = shared.lock();
    assert_eq!(recorded.renamed, vec![("7".to_string(), "Renamed".to_string())]);
    assert_eq!(recorded.deleted, vec!["7".to_string()]);
}

// =============================================================================
// Messages
// =============================================================================

#[tokio::test]
async fn messages_are_normalized_and_malformed_ones_dropped() {
    let (client, _shared) = logged_in_client().await;
    let messages = client
        .get_messages(&ConversationId::new("7"), None)
        .await
        .unwrap();

    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].text, "hi");
    assert_eq!(messages[1].role, Role::Bot);
    assert_eq!(messages[1].text, "hello");
    assert!(messages.iter().all(|m| !m.is_optimistic()));
}

#[tokio::test]
async fn since_hint_is_sent_as_a_query_parameter() {
    let (client, shared) = logged_in_client().await;
    let id = ConversationId::new("7");
    let since = Timestamp::parse("2024-05-01T10:00:02Z").unwrap();

    client.get_messages(&id, None).await.unwrap();
    client.get_messages(&id, Some(since)).await.unwrap();

    assert_eq!(
        shared.lock().since,
        vec![None, Some("2024-05-01T10:00:02.000Z".to_string())]
    );
}

#[tokio::test]
async fn missing_conversation_is_not_found() {
    let (client, _shared) = logged_in_client().await;
    let err = client
        .get_messages(&ConversationId::new("404"), None)
        .await
        .unwrap_err();
    assert_eq!(err, SyncError::NotFound("Conversation not found".to_string()));
    assert!(err.is_benign());
}

#[tokio::test]
async fn slow_responses_time_out() {
    let (url, _shared) = start_backend().await;
    let config = HttpConfig {
        request_timeout: Duration::from_millis(100),
        ..HttpConfig::new(url)
    };
    let client = HttpSyncClient::new(config).unwrap();
    let err = client
        .get_messages(&ConversationId::new("slow"), None)
        .await
        .unwrap_err();
    assert_eq!(err, SyncError::Timeout);
}

#[tokio::test]
async fn post_sends_multipart_with_videos() {
    let (client, shared) = logged_in_client().await;
    let clip = Attachment::new("kickoff.mp4", "video/mp4", vec![1, 2, 3, 4]);

    let receipt = client
        .post_message(&ConversationId::new("7"), "who scored?", &[clip])
        .await
        .unwrap();
    assert_eq!(receipt.token_balance, Some(41));
    assert_eq!(receipt.conversation_id.as_deref(), Some("7"));

    let recorded = shared.lock();
    let parts = &recorded.posts[0];
    let field = |name: &str| parts.iter().find(|p| p.name == name).unwrap();
    assert_eq!(field("message").bytes, b"who scored?");
    assert_eq!(field("conversation_id").bytes, b"7");
    let video = field("videos");
    assert_eq!(video.file_name.as_deref(), Some("kickoff.mp4"));
    assert_eq!(video.content_type.as_deref(), Some("video/mp4"));
    assert_eq!(video.bytes, vec![1, 2, 3, 4]);
}

// =============================================================================
// Session over HTTP
// =============================================================================

#[tokio::test]
async fn session_send_converges_over_http() {
    let (client, shared) = logged_in_client().await;
    let config = SessionConfig {
        poll: PollConfig {
            initial_interval: Duration::from_millis(20),
            max_interval: Duration::from_millis(20),
            ..PollConfig::default()
        },
        ..SessionConfig::default()
    };
    let (session, _events) = ConversationSession::new(client, config);

    session.send_message("who scored?", &[]).await.unwrap();
    assert_eq!(session.active_conversation().unwrap().id, ConversationId::new("7"));
    assert_eq!(session.token_balance(), Some(41));

    let converged = tokio::time::timeout(Duration::from_secs(5), async {
        while session.messages().iter().any(|m| m.is_optimistic()) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(converged.is_ok(), "optimistic message never confirmed");

    let texts: Vec<String> = session.messages().into_iter().map(|m| m.text).collect();
    assert_eq!(texts, vec!["hi", "hello", "who scored?"]);
    assert_eq!(shared.lock().posts.len(), 1);
    session.close();
}
