use std::sync::OnceLock;

use anyhow::Context;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio_tungstenite::tungstenite::Message;

use super::traits::{ChatEvent, ChatTransport};
use crate::error::TransportError;

const WORKING_REACTION: &str = "thinking_face";

/// Slack frontend — Socket Mode for inbound events (envelopes acknowledged
/// by id), Web API for everything outbound. The bot's own identity is
/// resolved once via `auth.test` and cached for the process lifetime.
pub struct SlackTransport {
    bot_token: String,
    app_token: String,
    bot_user_id: OnceLock<String>,
    client: reqwest::Client,
}

impl SlackTransport {
    pub fn new(bot_token: String, app_token: String) -> Self {
        Self {
            bot_token,
            app_token,
            bot_user_id: OnceLock::new(),
            client: reqwest::Client::new(),
        }
    }

    /// Slack returns 200 for most app-level errors; check the JSON `ok`
    /// field on top of the HTTP status.
    fn check_api_response(call: &str, status: reqwest::StatusCode, body: &str) -> anyhow::Result<()> {
        let fail = |message: String| TransportError::Send {
            channel: "slack".into(),
            message,
        };

        if !status.is_success() {
            return Err(fail(format!("{call} failed ({status}): {body}")).into());
        }
        let parsed: Value = serde_json::from_str(body).unwrap_or_default();
        if parsed.get("ok") == Some(&Value::Bool(false)) {
            let err = parsed
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or("unknown");
            return Err(fail(format!("{call} failed: {err}")).into());
        }
        Ok(())
    }

    async fn call_web_api(&self, call: &str, body: Value) -> anyhow::Result<()> {
        let resp = self
            .client
            .post(format!("https://slack.com/api/{call}"))
            .bearer_auth(&self.bot_token)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("send Slack {call} request"))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .unwrap_or_else(|e| format!("<failed to read response body: {e}>"));
        Self::check_api_response(call, status, &body)
    }

    /// Resolve and cache the bot's own user id.
    async fn resolve_bot_user_id(&self) -> Option<String> {
        if let Some(id) = self.bot_user_id.get() {
            return Some(id.clone());
        }

        let resp: Value = self
            .client
            .get("https://slack.com/api/auth.test")
            .bearer_auth(&self.bot_token)
            .send()
            .await
            .ok()?
            .json()
            .await
            .ok()?;

        let id = resp.get("user_id").and_then(|u| u.as_str())?;
        let _ = self.bot_user_id.set(id.to_string());
        Some(id.to_string())
    }

    /// Open a Socket Mode connection and return its WebSocket URL.
    async fn open_socket_url(&self) -> anyhow::Result<String> {
        let resp = self
            .client
            .post("https://slack.com/api/apps.connections.open")
            .bearer_auth(&self.app_token)
            .send()
            .await
            .context("open Slack Socket Mode connection")?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .unwrap_or_else(|e| format!("<failed to read response body: {e}>"));
        Self::check_api_response("apps.connections.open", status, &body)?;

        let parsed: Value = serde_json::from_str(&body).context("parse apps.connections.open")?;
        parsed
            .get("url")
            .and_then(|u| u.as_str())
            .map(String::from)
            .ok_or_else(|| anyhow::anyhow!("apps.connections.open returned no url"))
    }

    fn event_from_payload(event: &Value) -> Option<ChatEvent> {
        // Edits, joins etc. carry a subtype; only plain messages route.
        if event.get("subtype").is_some() || event.get("bot_id").is_some() {
            return None;
        }

        let kind = event.get("type").and_then(|t| t.as_str())?;
        let direct = match kind {
            "app_mention" => false,
            "message" => {
                if event.get("channel_type").and_then(|c| c.as_str()) != Some("im") {
                    return None;
                }
                true
            }
            _ => return None,
        };

        let author = event.get("user").and_then(|u| u.as_str())?;
        let text = event.get("text").and_then(|t| t.as_str()).unwrap_or("");
        let channel = event.get("channel").and_then(|c| c.as_str())?;
        let ts = event.get("ts").and_then(|t| t.as_str()).unwrap_or("");
        if text.is_empty() {
            return None;
        }

        Some(ChatEvent {
            platform: "slack".to_string(),
            author: author.to_string(),
            channel: channel.to_string(),
            text: text.to_string(),
            timestamp: ts.split('.').next().and_then(|s| s.parse().ok()).unwrap_or(0),
            mentions: parse_mentions(text),
            direct,
            message_ref: if ts.is_empty() {
                None
            } else {
                Some(ts.to_string())
            },
        })
    }
}

/// Collect user ids from `<@U…>` / `<@U…|name>` mention tokens.
fn parse_mentions(text: &str) -> Vec<String> {
    let mut mentions = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("<@") {
        rest = &rest[start + 2..];
        let Some(end) = rest.find('>') else { break };
        let id = rest[..end].split('|').next().unwrap_or("");
        if !id.is_empty() {
            mentions.push(id.to_string());
        }
        rest = &rest[end + 1..];
    }
    mentions
}

#[async_trait]
impl ChatTransport for SlackTransport {
    fn name(&self) -> &str {
        "slack"
    }

    fn self_id(&self) -> Option<String> {
        self.bot_user_id.get().cloned()
    }

    fn max_message_length(&self) -> usize {
        3000
    }

    /// LLM answers address whoever asked.
    fn format_llm_reply(&self, event: &ChatEvent, text: &str) -> String {
        format!("<@{}> {text}", event.author)
    }

    async fn send_reply(&self, channel: &str, text: &str) -> anyhow::Result<()> {
        self.call_web_api(
            "chat.postMessage",
            json!({ "channel": channel, "text": text }),
        )
        .await
    }

    async fn set_working_indicator(&self, event: &ChatEvent) -> Option<String> {
        let ts = event.message_ref.clone()?;
        let body = json!({
            "channel": event.channel,
            "timestamp": ts,
            "name": WORKING_REACTION
        });
        match self.call_web_api("reactions.add", body).await {
            Ok(()) => Some(ts),
            Err(e) => {
                tracing::debug!("Slack reactions.add failed: {e}");
                None
            }
        }
    }

    async fn clear_working_indicator(&self, event: &ChatEvent, token: &str) {
        let body = json!({
            "channel": event.channel,
            "timestamp": token,
            "name": WORKING_REACTION
        });
        if let Err(e) = self.call_web_api("reactions.remove", body).await {
            tracing::debug!("Slack reactions.remove failed: {e}");
        }
    }

    async fn health_check(&self) -> bool {
        self.client
            .get("https://slack.com/api/auth.test")
            .bearer_auth(&self.bot_token)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    async fn listen(&self, tx: tokio::sync::mpsc::Sender<ChatEvent>) -> anyhow::Result<()> {
        if self.resolve_bot_user_id().await.is_none() {
            tracing::warn!("Slack: auth.test failed; self-check will be degraded");
        }

        let ws_url = self.open_socket_url().await?;
        tracing::info!("Slack: connecting Socket Mode...");

        let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
            .await
            .map_err(|e| TransportError::Connection {
                channel: "slack".into(),
                message: e.to_string(),
            })?;
        let (mut write, mut read) = ws_stream.split();

        while let Some(msg) = read.next().await {
            let msg = match msg {
                Ok(Message::Text(t)) => t,
                Ok(Message::Ping(data)) => {
                    if write.send(Message::Pong(data)).await.is_err() {
                        break;
                    }
                    continue;
                }
                Ok(Message::Close(_)) | Err(_) => break,
                _ => continue,
            };

            let frame: Value = match serde_json::from_str(&msg) {
                Ok(v) => v,
                Err(_) => continue,
            };

            match frame.get("type").and_then(|t| t.as_str()) {
                Some("hello") => {
                    tracing::info!("Slack: Socket Mode connected");
                    continue;
                }
                // The server is cycling this connection; reconnect fresh.
                Some("disconnect") => break,
                Some("events_api") => {}
                _ => continue,
            }

            // Acknowledge receipt before doing anything with the payload.
            if let Some(envelope_id) = frame.get("envelope_id").and_then(|e| e.as_str()) {
                let ack = json!({ "envelope_id": envelope_id });
                if write.send(Message::Text(ack.to_string().into())).await.is_err() {
                    break;
                }
            }

            let Some(event) = frame
                .get("payload")
                .and_then(|p| p.get("event"))
                .and_then(Self::event_from_payload)
            else {
                continue;
            };

            if tx.send(event).await.is_err() {
                break;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> SlackTransport {
        SlackTransport::new("xoxb-fake".into(), "xapp-fake".into())
    }

    #[test]
    fn transport_name() {
        let t = transport();
        assert_eq!(t.name(), "slack");
        assert_eq!(t.max_message_length(), 3000);
    }

    #[test]
    fn llm_replies_address_the_requester() {
        let t = transport();
        let event = ChatEvent {
            platform: "slack".into(),
            author: "U123".into(),
            channel: "C9".into(),
            text: "<@UBOT> hi".into(),
            timestamp: 0,
            mentions: vec!["UBOT".into()],
            direct: false,
            message_ref: None,
        };
        assert_eq!(t.format_llm_reply(&event, "hello there"), "<@U123> hello there");
    }

    #[test]
    fn self_id_unknown_until_resolved() {
        let t = transport();
        assert_eq!(t.self_id(), None);
        t.bot_user_id.set("UBOT".to_string()).unwrap();
        assert_eq!(t.self_id(), Some("UBOT".to_string()));
    }

    #[test]
    fn mention_parsing_handles_plain_and_labelled() {
        assert_eq!(parse_mentions("<@U1> hi"), vec!["U1".to_string()]);
        assert_eq!(
            parse_mentions("<@U1|claw> and <@U2>"),
            vec!["U1".to_string(), "U2".to_string()]
        );
        assert!(parse_mentions("no mentions here").is_empty());
        assert!(parse_mentions("broken <@U1").is_empty());
    }

    #[test]
    fn app_mention_becomes_event() {
        let payload = json!({
            "type": "app_mention",
            "user": "U123",
            "text": "<@UBOT> open claw",
            "channel": "C9",
            "ts": "1712345678.000200"
        });
        let event = SlackTransport::event_from_payload(&payload).unwrap();
        assert_eq!(event.platform, "slack");
        assert_eq!(event.author, "U123");
        assert_eq!(event.channel, "C9");
        assert!(!event.direct);
        assert_eq!(event.timestamp, 1_712_345_678);
        assert_eq!(event.mentions, vec!["UBOT".to_string()]);
        assert_eq!(event.message_ref.as_deref(), Some("1712345678.000200"));
    }

    #[test]
    fn im_message_is_direct() {
        let payload = json!({
            "type": "message",
            "channel_type": "im",
            "user": "U123",
            "text": "close claw",
            "channel": "D1",
            "ts": "1.2"
        });
        let event = SlackTransport::event_from_payload(&payload).unwrap();
        assert!(event.direct);
        assert!(event.mentions.is_empty());
    }

    #[test]
    fn channel_message_without_mention_is_not_routed() {
        let payload = json!({
            "type": "message",
            "channel_type": "channel",
            "user": "U123",
            "text": "chatter",
            "channel": "C9",
            "ts": "1.2"
        });
        assert!(SlackTransport::event_from_payload(&payload).is_none());
    }

    #[test]
    fn bot_and_subtype_events_are_dropped() {
        let edited = json!({
            "type": "message",
            "channel_type": "im",
            "subtype": "message_changed",
            "user": "U123",
            "text": "edit",
            "channel": "D1",
            "ts": "1.2"
        });
        assert!(SlackTransport::event_from_payload(&edited).is_none());

        let from_bot = json!({
            "type": "app_mention",
            "bot_id": "B1",
            "user": "U999",
            "text": "<@UBOT> hi",
            "channel": "C9",
            "ts": "1.2"
        });
        assert!(SlackTransport::event_from_payload(&from_bot).is_none());
    }

    #[test]
    fn api_ok_false_is_an_error() {
        let err = SlackTransport::check_api_response(
            "chat.postMessage",
            reqwest::StatusCode::OK,
            r#"{"ok":false,"error":"channel_not_found"}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("channel_not_found"));

        assert!(
            SlackTransport::check_api_response(
                "chat.postMessage",
                reqwest::StatusCode::OK,
                r#"{"ok":true}"#,
            )
            .is_ok()
        );
    }
}
