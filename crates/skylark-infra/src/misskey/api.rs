//! MisskeyClient -- concrete [`Transport`] over the Misskey HTTP API.
//!
//! Every endpoint is a JSON `POST` to `/api/<endpoint>` with the access
//! token in the body as `i`. The token is held in a [`SecretString`] and
//! never logged.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use skylark_core::transport::Transport;
use skylark_types::config::InstanceConfig;
use skylark_types::error::TransportError;
use skylark_types::event::{Antenna, NoteDraft};
use skylark_types::user::UserRef;

use super::base_url;

/// Per-request timeout.
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Attempts per call, counting the first one. Only connection errors and
/// timeouts are retried.
const MAX_ATTEMPTS: u32 = 3;

const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Misskey HTTP client.
pub struct MisskeyClient {
    client: reqwest::Client,
    base_url: String,
    token: SecretString,
    retry_delay: Duration,
}

impl MisskeyClient {
    pub fn new(instance: &InstanceConfig) -> Result<Self, TransportError> {
        let base_url = base_url(&instance.url)
            .ok_or_else(|| TransportError::Connection("instance url is empty".into()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| TransportError::Connection(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            token: SecretString::from(instance.access_token.clone()),
            retry_delay: INITIAL_RETRY_DELAY,
        })
    }

    /// Override the first retry delay (doubles per attempt).
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/api/{}", self.base_url, endpoint)
    }

    /// Call `endpoint` with `params`, retrying transient failures.
    pub async fn call(&self, endpoint: &str, params: Map<String, Value>) -> Result<Value, TransportError> {
        let mut body = params;
        body.insert(
            "i".to_string(),
            Value::String(self.token.expose_secret().to_string()),
        );
        let body = Value::Object(body);

        let mut delay = self.retry_delay;
        let mut attempt = 1;
        loop {
            match self.call_once(endpoint, &body).await {
                Ok(value) => return Ok(value),
                Err(err @ (TransportError::Connection(_) | TransportError::Timeout(_)))
                    if attempt < MAX_ATTEMPTS =>
                {
                    tracing::warn!(
                        endpoint,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Misskey request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn call_once(&self, endpoint: &str, body: &Value) -> Result<Value, TransportError> {
        let response = self
            .client
            .post(self.url(endpoint))
            .json(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        let text = response.text().await.map_err(map_reqwest_error)?;

        if !status.is_success() {
            let message = error_message(&text);
            return Err(match status.as_u16() {
                401 | 403 => TransportError::Authentication(message),
                429 => TransportError::RateLimited(message),
                code => TransportError::Rejected {
                    endpoint: endpoint.to_string(),
                    status: code,
                    message,
                },
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| TransportError::Malformed(format!("{endpoint}: invalid JSON response: {e}")))
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(REQUEST_TIMEOUT_SECS)
    } else {
        TransportError::Connection(err.without_url().to_string())
    }
}

/// `CODE: message` from a Misskey error body, or the raw body.
fn error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: ErrorDetail,
    }
    #[derive(Deserialize)]
    struct ErrorDetail {
        #[serde(default)]
        code: Option<String>,
        #[serde(default)]
        message: Option<String>,
    }

    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody { error }) => match (error.code, error.message) {
            (Some(code), Some(message)) => format!("{code}: {message}"),
            (Some(code), None) => code,
            (None, Some(message)) => message,
            (None, None) => body.to_string(),
        },
        Err(_) => body.chars().take(200).collect(),
    }
}

fn note_params(draft: &NoteDraft) -> Map<String, Value> {
    let mut params = Map::new();
    if let Some(text) = &draft.text {
        params.insert("text".into(), json!(text));
    }
    if let Some(visibility) = draft.visibility {
        params.insert("visibility".into(), json!(visibility.as_str()));
    }
    if draft.local_only {
        params.insert("localOnly".into(), json!(true));
    }
    if let Some(reply_id) = &draft.reply_id {
        params.insert("replyId".into(), json!(reply_id));
    }
    if let Some(renote_id) = &draft.renote_id {
        params.insert("renoteId".into(), json!(renote_id));
    }
    params
}

fn params(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedNote {
    created_note: NoteId,
}

#[derive(Deserialize)]
struct NoteId {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Me {
    id: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    is_bot: bool,
}

fn decode<T: for<'de> Deserialize<'de>>(endpoint: &str, value: Value) -> Result<T, TransportError> {
    serde_json::from_value(value)
        .map_err(|e| TransportError::Malformed(format!("{endpoint}: unexpected response shape: {e}")))
}

// MisskeyClient intentionally does NOT derive Debug; it holds the token.

impl Transport for MisskeyClient {
    async fn create_note(&self, draft: &NoteDraft) -> Result<String, TransportError> {
        let value = self.call("notes/create", note_params(draft)).await?;
        let created: CreatedNote = decode("notes/create", value)?;
        tracing::debug!(note_id = %created.created_note.id, "Note created");
        Ok(created.created_note.id)
    }

    async fn react(&self, note_id: &str, reaction: &str) -> Result<(), TransportError> {
        self.call(
            "notes/reactions/create",
            params(json!({ "noteId": note_id, "reaction": reaction })),
        )
        .await?;
        Ok(())
    }

    async fn send_chat(&self, user_id: &str, text: &str) -> Result<(), TransportError> {
        self.call(
            "chat/messages/create-to-user",
            params(json!({ "toUserId": user_id, "text": text })),
        )
        .await?;
        Ok(())
    }

    async fn send_room_chat(&self, room_id: &str, text: &str) -> Result<(), TransportError> {
        self.call(
            "chat/messages/create-to-room",
            params(json!({ "toRoomId": room_id, "text": text })),
        )
        .await?;
        Ok(())
    }

    async fn list_antennas(&self) -> Result<Vec<Antenna>, TransportError> {
        let value = self.call("antennas/list", Map::new()).await?;
        decode("antennas/list", value)
    }

    async fn current_user(&self) -> Result<UserRef, TransportError> {
        let value = self.call("i", Map::new()).await?;
        let me: Me = decode("i", value)?;
        Ok(UserRef {
            id: me.id,
            username: me.username,
            host: me.host,
            is_bot: me.is_bot,
        })
    }
}
