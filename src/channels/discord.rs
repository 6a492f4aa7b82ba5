use anyhow::Context;
use async_trait::async_trait;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::tungstenite::Message;

use super::traits::{ChatEvent, ChatTransport};
use crate::error::TransportError;

/// GUILDS | GUILD_MESSAGES | DIRECT_MESSAGES | MESSAGE_CONTENT
const GATEWAY_INTENTS: u64 = 37377;

/// Discord frontend — receives messages over the Gateway WebSocket, replies
/// via the REST API. The working indicator is the typing cue, which Discord
/// clears on its own once a message lands.
pub struct DiscordTransport {
    bot_token: String,
    bot_user_id: Option<String>,
    client: reqwest::Client,
}

impl DiscordTransport {
    pub fn new(bot_token: String) -> Self {
        let bot_user_id = bot_user_id_from_token(&bot_token);
        if bot_user_id.is_none() {
            tracing::warn!("Discord: could not derive bot user id from token");
        }
        Self {
            bot_token,
            bot_user_id,
            client: reqwest::Client::new(),
        }
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.bot_token)
    }

    fn parse_mentions(d: &serde_json::Value) -> Vec<String> {
        d.get("mentions")
            .and_then(|m| m.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|user| user.get("id")?.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// The first dot-separated token segment is the base64-encoded user id.
fn bot_user_id_from_token(token: &str) -> Option<String> {
    let part = token.split('.').next()?;
    let engine = base64::engine::general_purpose::STANDARD_NO_PAD;
    let bytes = engine
        .decode(part)
        .or_else(|_| base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(part))
        .ok()?;
    let id = String::from_utf8(bytes).ok()?;
    if !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()) {
        Some(id)
    } else {
        None
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[async_trait]
impl ChatTransport for DiscordTransport {
    fn name(&self) -> &str {
        "discord"
    }

    fn self_id(&self) -> Option<String> {
        self.bot_user_id.clone()
    }

    fn max_message_length(&self) -> usize {
        2000
    }

    async fn send_reply(&self, channel: &str, text: &str) -> anyhow::Result<()> {
        let url = format!("https://discord.com/api/v10/channels/{channel}/messages");
        let body = json!({ "content": text });

        let resp = self
            .client
            .post(&url)
            .header("Authorization", self.auth_header())
            .json(&body)
            .send()
            .await
            .context("send Discord message request")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err = resp
                .text()
                .await
                .unwrap_or_else(|e| format!("<failed to read response body: {e}>"));
            return Err(TransportError::Send {
                channel: "discord".into(),
                message: format!("({status}): {err}"),
            }
            .into());
        }

        Ok(())
    }

    async fn set_working_indicator(&self, event: &ChatEvent) -> Option<String> {
        let url = format!(
            "https://discord.com/api/v10/channels/{}/typing",
            event.channel
        );
        if let Err(e) = self
            .client
            .post(&url)
            .header("Authorization", self.auth_header())
            .send()
            .await
        {
            tracing::debug!("Discord typing indicator failed: {e}");
        }
        // The typing cue expires by itself; nothing to clear.
        None
    }

    async fn health_check(&self) -> bool {
        self.client
            .get("https://discord.com/api/v10/users/@me")
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    async fn listen(&self, tx: tokio::sync::mpsc::Sender<ChatEvent>) -> anyhow::Result<()> {
        // Get Gateway URL
        let gw_resp: serde_json::Value = self
            .client
            .get("https://discord.com/api/v10/gateway/bot")
            .header("Authorization", self.auth_header())
            .send()
            .await
            .context("fetch Discord gateway URL")?
            .json()
            .await
            .context("parse Discord gateway response")?;

        let gw_url = gw_resp
            .get("url")
            .and_then(|u| u.as_str())
            .unwrap_or("wss://gateway.discord.gg");

        let ws_url = format!("{gw_url}/?v=10&encoding=json");
        tracing::info!("Discord: connecting to gateway...");

        let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
            .await
            .map_err(|e| TransportError::Connection {
                channel: "discord".into(),
                message: e.to_string(),
            })?;
        let (mut write, mut read) = ws_stream.split();

        // Read Hello (opcode 10)
        let hello = read
            .next()
            .await
            .ok_or(anyhow::anyhow!("No hello"))
            .context("read Discord gateway hello message")??;
        let hello_data: serde_json::Value = serde_json::from_str(&hello.to_string())
            .context("parse Discord gateway hello event")?;
        let heartbeat_interval = hello_data
            .get("d")
            .and_then(|d| d.get("heartbeat_interval"))
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(41250);

        // Send Identify (opcode 2)
        let identify = json!({
            "op": 2,
            "d": {
                "token": self.bot_token,
                "intents": GATEWAY_INTENTS,
                "properties": {
                    "os": "linux",
                    "browser": "openclaw",
                    "device": "openclaw"
                }
            }
        });
        write
            .send(Message::Text(identify.to_string().into()))
            .await
            .context("send Discord gateway identify")?;

        tracing::info!("Discord: connected and identified");

        // Last sequence number for heartbeats; only touched in the select!
        // loop below, so a plain i64 suffices.
        let mut sequence: i64 = -1;

        // Heartbeat timer — sends a tick signal, the actual heartbeat is
        // assembled in the select! loop where `sequence` lives.
        let (hb_tx, mut hb_rx) = tokio::sync::mpsc::channel::<()>(1);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_millis(heartbeat_interval));
            loop {
                interval.tick().await;
                if hb_tx.send(()).await.is_err() {
                    break;
                }
            }
        });

        loop {
            tokio::select! {
                _ = hb_rx.recv() => {
                    let d = if sequence >= 0 { json!(sequence) } else { json!(null) };
                    let hb = json!({"op": 1, "d": d});
                    if write.send(Message::Text(hb.to_string().into())).await.is_err() {
                        break;
                    }
                }
                msg = read.next() => {
                    let msg = match msg {
                        Some(Ok(Message::Text(t))) => t,
                        Some(Ok(Message::Close(_))) | None => break,
                        _ => continue,
                    };

                    let event: serde_json::Value = match serde_json::from_str(&msg) {
                        Ok(e) => e,
                        Err(_) => continue,
                    };

                    if let Some(s) = event.get("s").and_then(serde_json::Value::as_i64) {
                        sequence = s;
                    }

                    let op = event.get("op").and_then(serde_json::Value::as_u64).unwrap_or(0);

                    match op {
                        // Op 1: server requests an immediate heartbeat
                        1 => {
                            let d = if sequence >= 0 { json!(sequence) } else { json!(null) };
                            let hb = json!({"op": 1, "d": d});
                            if write.send(Message::Text(hb.to_string().into())).await.is_err() {
                                break;
                            }
                            continue;
                        }
                        // Op 7: Reconnect
                        7 => {
                            tracing::warn!("Discord: received Reconnect (op 7), closing for restart");
                            break;
                        }
                        // Op 9: Invalid Session
                        9 => {
                            tracing::warn!("Discord: received Invalid Session (op 9), closing for restart");
                            break;
                        }
                        _ => {}
                    }

                    let event_type = event.get("t").and_then(|t| t.as_str()).unwrap_or("");
                    if event_type != "MESSAGE_CREATE" {
                        continue;
                    }

                    let Some(d) = event.get("d") else {
                        continue;
                    };

                    // Other bots never get routed; our own messages are
                    // dropped again by the router's self-check.
                    if d.get("author").and_then(|a| a.get("bot")).and_then(serde_json::Value::as_bool).unwrap_or(false) {
                        continue;
                    }

                    let author = d.get("author").and_then(|a| a.get("id")).and_then(|i| i.as_str()).unwrap_or("");
                    let content = d.get("content").and_then(|c| c.as_str()).unwrap_or("");
                    let channel_id = d.get("channel_id").and_then(|c| c.as_str()).unwrap_or("");
                    if author.is_empty() || content.is_empty() || channel_id.is_empty() {
                        continue;
                    }

                    let chat_event = ChatEvent {
                        platform: "discord".to_string(),
                        author: author.to_string(),
                        channel: channel_id.to_string(),
                        text: content.to_string(),
                        timestamp: unix_now(),
                        mentions: Self::parse_mentions(d),
                        // DMs are the only dispatches without a guild.
                        direct: d.get("guild_id").is_none(),
                        message_ref: d.get("id").and_then(|i| i.as_str()).map(String::from),
                    };

                    if tx.send(chat_event).await.is_err() {
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_name() {
        let t = DiscordTransport::new("fake".into());
        assert_eq!(t.name(), "discord");
        assert_eq!(t.max_message_length(), 2000);
    }

    #[test]
    fn bot_user_id_extraction() {
        // Token format: base64(user_id).timestamp.hmac
        let token = "MTIzNDU2.fake.hmac";
        assert_eq!(bot_user_id_from_token(token), Some("123456".to_string()));
    }

    #[test]
    fn garbage_token_yields_no_id() {
        assert_eq!(bot_user_id_from_token(""), None);
        assert_eq!(bot_user_id_from_token("!!!!.x.y"), None);
        // decodes, but not to a numeric id
        assert_eq!(bot_user_id_from_token("aGVsbG8.x.y"), None);
    }

    #[test]
    fn self_id_comes_from_token() {
        let t = DiscordTransport::new("MTIzNDU2.fake.hmac".into());
        assert_eq!(t.self_id(), Some("123456".to_string()));

        let anon = DiscordTransport::new("garbage".into());
        assert_eq!(anon.self_id(), None);
    }

    #[test]
    fn gateway_intents_include_direct_messages() {
        // GUILDS(1) | GUILD_MESSAGES(512) | DIRECT_MESSAGES(4096) | MESSAGE_CONTENT(32768)
        assert_ne!(GATEWAY_INTENTS & 1, 0, "GUILDS");
        assert_ne!(GATEWAY_INTENTS & 512, 0, "GUILD_MESSAGES");
        assert_ne!(GATEWAY_INTENTS & 4096, 0, "DIRECT_MESSAGES");
        assert_ne!(GATEWAY_INTENTS & 32768, 0, "MESSAGE_CONTENT");
    }

    #[test]
    fn mentions_parsed_from_dispatch_payload() {
        let d = serde_json::json!({
            "mentions": [
                { "id": "111", "username": "openclaw" },
                { "id": "222", "username": "someone" }
            ]
        });
        assert_eq!(
            DiscordTransport::parse_mentions(&d),
            vec!["111".to_string(), "222".to_string()]
        );
    }

    #[test]
    fn missing_mentions_field_is_empty() {
        let d = serde_json::json!({ "content": "hello" });
        assert!(DiscordTransport::parse_mentions(&d).is_empty());
    }
}
