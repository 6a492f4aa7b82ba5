use async_trait::async_trait;

/// An inbound chat event, normalized across platforms.
///
/// Owned by the originating platform — read-only per event. `channel` is the
/// reply target (channel or DM conversation id); `message_ref` is the
/// platform-native handle to the message itself (e.g. a Slack timestamp),
/// used to anchor working indicators.
#[derive(Debug, Clone)]
pub struct ChatEvent {
    /// Transport that produced the event ("discord", "slack").
    pub platform: String,
    /// Platform user id of the author.
    pub author: String,
    /// Channel or conversation the event arrived on.
    pub channel: String,
    /// Raw message text as delivered by the platform.
    pub text: String,
    /// Seconds since the epoch.
    pub timestamp: u64,
    /// User ids explicitly mentioned in the message.
    pub mentions: Vec<String>,
    /// True for direct/private messages.
    pub direct: bool,
    /// Platform-native message reference, when the platform has one.
    pub message_ref: Option<String>,
}

/// Capability set a chat platform must provide — implement for any
/// messaging platform. Routing logic lives in [`super::router`] and is
/// identical across implementations.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Human-readable transport name; also the `ChatEvent::platform` tag.
    fn name(&self) -> &str;

    /// The bot's own user id on this platform, once known.
    fn self_id(&self) -> Option<String>;

    /// Send a plain-text reply to a channel.
    async fn send_reply(&self, channel: &str, text: &str) -> anyhow::Result<()>;

    /// Start listening for incoming events (long-running).
    async fn listen(&self, tx: tokio::sync::mpsc::Sender<ChatEvent>) -> anyhow::Result<()>;

    /// Check if the transport is healthy.
    async fn health_check(&self) -> bool {
        true
    }

    fn max_message_length(&self) -> usize {
        usize::MAX
    }

    /// Platform-specific dressing for an LLM reply, e.g. addressing the
    /// requester. Hardware confirmations are always sent verbatim.
    fn format_llm_reply(&self, _event: &ChatEvent, text: &str) -> String {
        text.to_string()
    }

    /// Show a transient "working on it" cue for the given event. Returns a
    /// token when the cue must be cleared explicitly later.
    async fn set_working_indicator(&self, _event: &ChatEvent) -> Option<String> {
        None
    }

    async fn clear_working_indicator(&self, _event: &ChatEvent, _token: &str) {}

    /// Send a reply in platform-sized chunks.
    async fn send_chunked(&self, channel: &str, text: &str) -> anyhow::Result<()> {
        for chunk in super::split_reply(text, self.max_message_length()) {
            self.send_reply(channel, &chunk).await?;
        }
        Ok(())
    }
}
