//! HTTP implementation of [`SyncClient`] for the video-analysis backend.
//!
//! Talks JSON over `reqwest` with a cookie store, so a successful
//! [`login`](HttpSyncClient::login) authenticates every later call.
//! Responses are normalized through [`vidchat_proto::wire`] before they
//! are returned; callers never see raw payloads.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode, multipart};
use serde_json::Value;
use url::Url;

use vidchat_proto::message::{Conversation, ConversationId, Message, Timestamp};
use vidchat_proto::wire::{self, NormalizeError, SendReceipt};

use super::{Attachment, SyncClient, SyncError};

/// Default deadline for JSON requests.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Default deadline for message posts, which may carry video uploads.
const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Connection settings for [`HttpSyncClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpConfig {
    /// Backend root, e.g. `http://127.0.0.1:8000/`.
    pub base_url: Url,
    /// Deadline applied to every request except message posts.
    pub request_timeout: Duration,
    /// Deadline applied to message posts.
    pub upload_timeout: Duration,
}

impl HttpConfig {
    /// Settings for `base_url` with default timeouts.
    #[must_use]
    pub const fn new(base_url: Url) -> Self {
        Self {
            base_url,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

/// `reqwest`-backed backend client.
#[derive(Debug, Clone)]
pub struct HttpSyncClient {
    http: Client,
    config: HttpConfig,
}

impl HttpSyncClient {
    /// Builds a client with its own cookie jar.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Network`] if the HTTP client cannot be
    /// constructed (for example, the TLS backend fails to initialize).
    pub fn new(config: HttpConfig) -> Result<Self, SyncError> {
        let http = Client::builder()
            .cookie_store(true)
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { http, config })
    }

    /// The backend root this client talks to.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.config.base_url
    }

    /// Signs in with email and password, storing the session cookie.
    ///
    /// The backend answers bad credentials with 400 and `success: false`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Unauthorized`] on bad credentials, or any
    /// transport error.
    pub async fn login(&self, email: &str, password: &str) -> Result<(), SyncError> {
        let url = self.endpoint(&["api", "login"])?;
        let request = self
            .http
            .post(url)
            .form(&[("email", email), ("password", password)]);
        let response = self.send(request).await?;
        if response.status() == StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(detail = %status_error(StatusCode::BAD_REQUEST, &body), "sign-in rejected");
            return Err(SyncError::Unauthorized);
        }
        let body = read_json(response).await?;
        if body.get("success").and_then(Value::as_bool) == Some(false) {
            return Err(SyncError::Unauthorized);
        }
        tracing::info!("signed in");
        Ok(())
    }

    /// Ends the server session.
    ///
    /// # Errors
    ///
    /// Returns any transport or status error.
    pub async fn logout(&self) -> Result<(), SyncError> {
        let url = self.endpoint(&["logout"])?;
        let response = self.send(self.http.post(url)).await?;
        expect_success(response).await?;
        tracing::info!("signed out");
        Ok(())
    }

    /// Whether the stored cookie still authenticates.
    ///
    /// # Errors
    ///
    /// Returns any transport or status error.
    pub async fn auth_status(&self) -> Result<bool, SyncError> {
        let url = self.endpoint(&["auth_status"])?;
        let body = read_json(self.send(self.http.get(url)).await?).await?;
        Ok(body
            .get("authenticated")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    /// Builds an absolute URL under the base, one path segment per item.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, SyncError> {
        let mut url = self.config.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| SyncError::Network(format!("unusable base URL {}", self.config.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, SyncError> {
        request.send().await.map_err(|e| {
            let err = SyncError::from(e);
            tracing::debug!(error = %err, "request failed");
            err
        })
    }
}

/// Reads a success body as JSON, or converts an error status.
async fn read_json(response: Response) -> Result<Value, SyncError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<Value>().await?);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, &body))
}

/// Discards a success body, or converts an error status.
async fn expect_success(response: Response) -> Result<(), SyncError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, &body))
}

fn status_error(status: StatusCode, body: &str) -> SyncError {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| wire::error_detail(&v))
        .unwrap_or_else(|| body.trim().to_string());
    match status {
        StatusCode::NOT_FOUND => SyncError::NotFound(detail),
        StatusCode::UNAUTHORIZED => SyncError::Unauthorized,
        _ => SyncError::Status {
            status: status.as_u16(),
            detail,
        },
    }
}

fn normalize_failure(e: NormalizeError) -> SyncError {
    match e {
        NormalizeError::Rejected(detail) => SyncError::Status {
            status: StatusCode::OK.as_u16(),
            detail,
        },
        other => SyncError::Decode(other.to_string()),
    }
}

impl SyncClient for HttpSyncClient {
    async fn create_conversation(&self, title: &str) -> Result<Conversation, SyncError> {
        let url = self.endpoint(&["conversations"])?;
        let response = self.send(self.http.post(url).form(&[("title", title)])).await?;
        let body = read_json(response).await?;
        let conversation = wire::created_conversation(&body).map_err(normalize_failure)?;
        tracing::info!(conversation_id = %conversation.id, "conversation created");
        Ok(conversation)
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>, SyncError> {
        let url = self.endpoint(&["conversations"])?;
        let body = read_json(self.send(self.http.get(url)).await?).await?;
        Ok(wire::normalize_conversations(&body))
    }

    async fn get_messages(
        &self,
        conversation: &ConversationId,
        since: Option<Timestamp>,
    ) -> Result<Vec<Message>, SyncError> {
        let url = self.endpoint(&["conversations", conversation.as_str(), "messages"])?;
        let mut request = self.http.get(url);
        if let Some(since) = since {
            request = request.query(&[("since", since.to_string())]);
        }
        let body = read_json(self.send(request).await?).await?;
        let messages = wire::normalize_messages(&body);
        tracing::debug!(
            conversation_id = %conversation,
            count = messages.len(),
            "fetched messages"
        );
        Ok(messages)
    }

    async fn post_message(
        &self,
        conversation: &ConversationId,
        text: &str,
        attachments: &[Attachment],
    ) -> Result<SendReceipt, SyncError> {
        let url = self.endpoint(&["send_message"])?;
        let mut form = multipart::Form::new()
            .text("message", text.to_string())
            .text("conversation_id", conversation.to_string());
        for attachment in attachments {
            let part = multipart::Part::bytes(attachment.bytes.clone())
                .file_name(attachment.file_name.clone())
                .mime_str(&attachment.content_type)?;
            form = form.part("videos", part);
        }
        let request = self
            .http
            .post(url)
            .timeout(self.config.upload_timeout)
            .multipart(form);
        let response = self.send(request).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }
        let receipt = response.json::<SendReceipt>().await?;
        tracing::debug!(
            conversation_id = %conversation,
            attachments = attachments.len(),
            token_balance = ?receipt.token_balance,
            "message posted"
        );
        Ok(receipt)
    }

    async fn rename_conversation(
        &self,
        conversation: &ConversationId,
        title: &str,
    ) -> Result<(), SyncError> {
        let url = self.endpoint(&["conversations", conversation.as_str()])?;
        let response = self.send(self.http.put(url).form(&[("title", title)])).await?;
        expect_success(response).await
    }

    async fn delete_conversation(&self, conversation: &ConversationId) -> Result<(), SyncError> {
        let url = self.endpoint(&["conversations", conversation.as_str()])?;
        let response = self.send(self.http.delete(url)).await?;
        expect_success(response).await?;
        tracing::info!(conversation_id = %conversation, "conversation deleted");
        Ok(())
    }
}
