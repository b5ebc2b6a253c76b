//! Slack Web API client.
//!
//! The relay needs exactly three operations against Slack: list what is
//! new in a channel, re-fetch one message's full text, and post. They are
//! expressed as the `ChannelClient` trait so the poll loop and the debug
//! runner can be driven against a scripted client in tests; `SlackClient`
//! is the real implementation over `conversations.history` and
//! `chat.postMessage`.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::SlackError;

const API_BASE: &str = "https://slack.com/api";

/// One message from a history listing.
///
/// Listings can omit or truncate the body, so only `ts` is load-bearing
/// here; the full text is re-fetched per message before rule evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Message {
    /// Channel-unique timestamp id, e.g. `"1724300000.000100"`. Slack
    /// orders and addresses messages by this string.
    pub ts: String,
    /// Body text, when the listing carried one.
    #[serde(default)]
    pub text: Option<String>,
}

/// The backend operations the relay consumes.
#[async_trait]
pub trait ChannelClient: Send + Sync {
    /// List messages in `channel` newer than `oldest`, newest first.
    ///
    /// `oldest` is a `ts` (or a Unix-seconds string); `None` asks for the
    /// backend's default horizon. `inclusive` controls whether a message
    /// at exactly `oldest` is returned; the poll loop always passes
    /// `false` so the watermark message is never reprocessed.
    async fn fetch_since(
        &self,
        channel: &str,
        oldest: Option<&str>,
        inclusive: bool,
        limit: u32,
    ) -> Result<Vec<Message>, SlackError>;

    /// Fetch the full text of the message at `ts`, if the message still
    /// exists and has any.
    async fn fetch_one(&self, channel: &str, ts: &str) -> Result<Option<String>, SlackError>;

    /// Post `text` to `channel`.
    async fn post(&self, channel: &str, text: &str) -> Result<(), SlackError>;
}

// ── Wire envelopes ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct PostResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Map the `{ok, error}` envelope every Web API method shares onto a
/// `SlackError::Api` when `ok` is false.
fn check_envelope(method: &str, ok: bool, error: Option<String>) -> Result<(), SlackError> {
    if ok {
        Ok(())
    } else {
        Err(SlackError::Api {
            method: method.to_string(),
            reason: error.unwrap_or_else(|| "unknown".to_string()),
        })
    }
}

// ── Real client ─────────────────────────────────────────────────────

/// Slack Web API client backed by reqwest.
pub struct SlackClient {
    token: SecretString,
    client: reqwest::Client,
}

impl SlackClient {
    pub fn new(token: SecretString) -> Self {
        Self {
            token,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(method: &str) -> String {
        format!("{API_BASE}/{method}")
    }

    /// Shared `conversations.history` call; `fetch_since` and `fetch_one`
    /// are both windows over it.
    async fn history(&self, params: &[(&str, &str)]) -> Result<Vec<Message>, SlackError> {
        const METHOD: &str = "conversations.history";

        let response = self
            .client
            .get(Self::api_url(METHOD))
            .bearer_auth(self.token.expose_secret())
            .query(params)
            .send()
            .await
            .map_err(|e| SlackError::Http {
                method: METHOD.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(SlackError::Http {
                method: METHOD.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let body: HistoryResponse = response.json().await.map_err(|e| SlackError::Http {
            method: METHOD.to_string(),
            reason: e.to_string(),
        })?;

        check_envelope(METHOD, body.ok, body.error)?;
        Ok(body.messages)
    }
}

#[async_trait]
impl ChannelClient for SlackClient {
    async fn fetch_since(
        &self,
        channel: &str,
        oldest: Option<&str>,
        inclusive: bool,
        limit: u32,
    ) -> Result<Vec<Message>, SlackError> {
        let limit = limit.to_string();
        let inclusive = if inclusive { "true" } else { "false" };

        let mut params = vec![
            ("channel", channel),
            ("inclusive", inclusive),
            ("limit", limit.as_str()),
        ];
        if let Some(oldest) = oldest {
            params.push(("oldest", oldest));
        }

        self.history(&params).await
    }

    async fn fetch_one(&self, channel: &str, ts: &str) -> Result<Option<String>, SlackError> {
        // latest + inclusive + limit 1 addresses exactly the message at ts
        let params = [
            ("channel", channel),
            ("latest", ts),
            ("inclusive", "true"),
            ("limit", "1"),
        ];

        let messages = self.history(&params).await?;
        Ok(messages.into_iter().next().and_then(|m| m.text))
    }

    async fn post(&self, channel: &str, text: &str) -> Result<(), SlackError> {
        const METHOD: &str = "chat.postMessage";

        let body = serde_json::json!({
            "channel": channel,
            "text": text,
        });

        let response = self
            .client
            .post(Self::api_url(METHOD))
            .bearer_auth(self.token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| SlackError::Http {
                method: METHOD.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(SlackError::Http {
                method: METHOD.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let body: PostResponse = response.json().await.map_err(|e| SlackError::Http {
            method: METHOD.to_string(),
            reason: e.to_string(),
        })?;

        check_envelope(METHOD, body.ok, body.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_url_appends_method() {
        assert_eq!(
            SlackClient::api_url("conversations.history"),
            "https://slack.com/api/conversations.history"
        );
        assert_eq!(
            SlackClient::api_url("chat.postMessage"),
            "https://slack.com/api/chat.postMessage"
        );
    }

    #[test]
    fn history_envelope_parses_messages_newest_first() {
        let body: HistoryResponse = serde_json::from_str(
            r#"{
                "ok": true,
                "messages": [
                    {"ts": "1724300002.000200", "text": "second"},
                    {"ts": "1724300001.000100"}
                ]
            }"#,
        )
        .unwrap();

        check_envelope("conversations.history", body.ok, body.error).unwrap();
        assert_eq!(body.messages.len(), 2);
        assert_eq!(body.messages[0].ts, "1724300002.000200");
        assert_eq!(body.messages[0].text.as_deref(), Some("second"));
        // Listings may omit the body entirely
        assert_eq!(body.messages[1].text, None);
    }

    #[test]
    fn envelope_error_becomes_api_error() {
        let body: HistoryResponse =
            serde_json::from_str(r#"{"ok": false, "error": "channel_not_found"}"#).unwrap();

        let err = check_envelope("conversations.history", body.ok, body.error).unwrap_err();
        match err {
            SlackError::Api { method, reason } => {
                assert_eq!(method, "conversations.history");
                assert_eq!(reason, "channel_not_found");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[test]
    fn envelope_error_without_reason_reads_unknown() {
        let err = check_envelope("chat.postMessage", false, None).unwrap_err();
        match err {
            SlackError::Api { reason, .. } => assert_eq!(reason, "unknown"),
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[test]
    fn post_envelope_ignores_extra_fields() {
        let body: PostResponse = serde_json::from_str(
            r#"{"ok": true, "channel": "C0TARGET", "ts": "1724300009.000900"}"#,
        )
        .unwrap();
        assert!(body.ok);
        assert!(body.error.is_none());
    }

    #[test]
    fn message_ignores_unmodeled_fields() {
        let message: Message = serde_json::from_str(
            r#"{"type": "message", "user": "U0USER", "ts": "1724300001.000100", "text": "hi"}"#,
        )
        .unwrap();
        assert_eq!(message.ts, "1724300001.000100");
        assert_eq!(message.text.as_deref(), Some("hi"));
    }
}
