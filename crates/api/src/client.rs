use serde::de::DeserializeOwned;
use snafu::ResultExt;

use crate::error::{ApiResult, DecodeBodySnafu, RequestSnafu, StatusSnafu};
use crate::stream::{SendStreamHandle, open_send_stream};
use crate::types::{ChatMessage, ChatSession};

/// Client for the coder API surface: chat sessions, transcripts, and the
/// streaming send endpoint.
///
/// Cloning is cheap; the underlying connection pool is shared.
#[derive(Debug, Clone)]
pub struct CoderClient {
    http: reqwest::Client,
    base_url: String,
}

impl CoderClient {
    /// Creates a client rooted at the coder API prefix,
    /// e.g. `http://127.0.0.1:8000/api/coder`.
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Creates a new session on the backend. The server assigns the id and
    /// timestamps; an empty name is allowed and means "untitled".
    pub async fn create_session(&self, name: Option<&str>) -> ApiResult<ChatSession> {
        let url = self.endpoint("sessions/");
        let body = serde_json::json!({
            "name": name.unwrap_or(""),
            "metadata": {},
        });

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .context(RequestSnafu {
                stage: "create-session",
                url: url.clone(),
            })?;

        decode_json(response, &url, "create-session").await
    }

    pub async fn get_session(&self, session_id: &str) -> ApiResult<ChatSession> {
        let url = self.endpoint(&format!("sessions/{session_id}/"));
        get_json(&self.http, &url, "get-session").await
    }

    /// Lists all sessions in server order (most recently used first).
    pub async fn list_sessions(&self) -> ApiResult<Vec<ChatSession>> {
        let url = self.endpoint("sessions/");
        get_json(&self.http, &url, "list-sessions").await
    }

    /// Fetches the transcript for one session.
    ///
    /// The backing endpoint may return a superset, so messages whose
    /// `session_id` does not match are dropped before the result is handed
    /// to the caller.
    pub async fn list_messages(&self, session_id: &str) -> ApiResult<Vec<ChatMessage>> {
        let url = self.endpoint(&format!("messages/?session_id={session_id}"));
        let messages: Vec<ChatMessage> = get_json(&self.http, &url, "list-messages").await?;
        Ok(retain_session_messages(messages, session_id))
    }

    /// Opens the streaming send call for one outgoing user message.
    ///
    /// Never fails synchronously; open and transport failures surface as a
    /// terminal [`crate::StreamEvent::Error`] on the returned stream.
    pub fn open_send_stream(&self, session_id: &str, content: &str) -> SendStreamHandle {
        let url = self.endpoint("send-to-claude/");
        open_send_stream(self.http.clone(), url, session_id, content)
    }

    /// Signals the backend to stop server-side generation.
    ///
    /// Fire and forget: local stream cancellation never waits on this call,
    /// and callers are expected to tolerate its failure.
    pub async fn request_abort(&self) -> ApiResult<()> {
        let url = self.endpoint("abort-claude-commands/");
        let response = self.http.post(&url).send().await.context(RequestSnafu {
            stage: "request-abort",
            url: url.clone(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return StatusSnafu {
                stage: "request-abort",
                url,
                status: status.as_u16(),
                body,
            }
            .fail();
        }

        Ok(())
    }
}

/// Drops messages that belong to a different session, preserving order.
fn retain_session_messages(messages: Vec<ChatMessage>, session_id: &str) -> Vec<ChatMessage> {
    let total = messages.len();
    let kept: Vec<ChatMessage> = messages
        .into_iter()
        .filter(|message| message.session_id == session_id)
        .collect();

    if kept.len() != total {
        tracing::warn!(
            session_id = %session_id,
            dropped = total - kept.len(),
            "message listing contained rows for other sessions"
        );
    }

    kept
}

pub(crate) async fn get_json<T: DeserializeOwned>(
    http: &reqwest::Client,
    url: &str,
    stage: &'static str,
) -> ApiResult<T> {
    let response = http.get(url).send().await.context(RequestSnafu {
        stage,
        url: url.to_string(),
    })?;
    decode_json(response, url, stage).await
}

pub(crate) async fn decode_json<T: DeserializeOwned>(
    response: reqwest::Response,
    url: &str,
    stage: &'static str,
) -> ApiResult<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return StatusSnafu {
            stage,
            url: url.to_string(),
            status: status.as_u16(),
            body,
        }
        .fail();
    }

    response.json::<T>().await.context(DecodeBodySnafu {
        stage,
        url: url.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::types::ChatRole;

    fn message(id: &str, session_id: &str) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            session_id: session_id.to_string(),
            content: format!("content-{id}"),
            role: ChatRole::User,
            metadata: serde_json::json!({}),
            claude_response: serde_json::json!({}),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn retain_session_messages_drops_foreign_rows_in_order() {
        let raw = vec![
            message("a", "41"),
            message("b", "42"),
            message("c", "43"),
            message("d", "42"),
        ];

        let kept = retain_session_messages(raw, "42");
        let ids: Vec<&str> = kept.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "d"]);
        assert!(kept.iter().all(|m| m.session_id == "42"));
    }

    #[test]
    fn retain_session_messages_keeps_clean_payload_untouched() {
        let raw = vec![message("a", "7"), message("b", "7")];
        let kept = retain_session_messages(raw, "7");
        assert_eq!(kept.len(), 2);
    }
}
