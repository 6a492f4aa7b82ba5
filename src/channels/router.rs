//! Shared decision flow for inbound chat events.
//!
//! Both frontends feed normalized [`ChatEvent`]s through one router, so the
//! command/LLM routing rules exist exactly once. Per event: ignore our own
//! messages, answer `!claw` commands from anywhere, then — only when
//! addressed — either drive the claw or forward the text to the LLM.

use std::sync::Arc;

use crate::channels::traits::{ChatEvent, ChatTransport};
use crate::hardware::Claw;
use crate::llm::OllamaClient;

pub const COMMAND_PREFIX: &str = "!claw";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClawCommand {
    Status,
    Open,
    Close,
}

/// Returns the text after the `!claw` prefix, if the message is a command
/// invocation. `!clawopen` is not a command; `!claw open` is.
pub fn strip_command_prefix(text: &str) -> Option<&str> {
    let rest = text.trim().strip_prefix(COMMAND_PREFIX)?;
    if rest.is_empty() || rest.starts_with(char::is_whitespace) {
        Some(rest.trim_start())
    } else {
        None
    }
}

pub fn parse_subcommand(rest: &str) -> Option<ClawCommand> {
    match rest.split_whitespace().next()? {
        "status" => Some(ClawCommand::Status),
        "open" => Some(ClawCommand::Open),
        "close" => Some(ClawCommand::Close),
        _ => None,
    }
}

pub struct Router {
    claw: Arc<Claw>,
    llm: Arc<OllamaClient>,
}

impl Router {
    pub fn new(claw: Arc<Claw>, llm: Arc<OllamaClient>) -> Self {
        Self { claw, llm }
    }

    /// Direct command invocation — the `!claw` surface is a thin alias over
    /// the actuator, returning the same confirmation strings as freeform
    /// hardware requests.
    pub async fn dispatch_command(&self, command: ClawCommand) -> String {
        match command {
            ClawCommand::Status => format!("Status: {}", self.claw.status().await),
            ClawCommand::Open => self.claw.open().await,
            ClawCommand::Close => self.claw.close().await,
        }
    }

    pub async fn handle_event(&self, transport: &dyn ChatTransport, event: &ChatEvent) {
        let self_id = transport.self_id();

        // Never react to our own messages.
        if let Some(id) = &self_id
            && &event.author == id
        {
            return;
        }

        // Command surface: prefixed messages are answered (or swallowed)
        // from any channel, addressed or not.
        if let Some(rest) = strip_command_prefix(&event.text) {
            if let Some(command) = parse_subcommand(rest) {
                let reply = self.dispatch_command(command).await;
                self.reply(transport, event, &reply).await;
            }
            return;
        }

        // Only addressed messages proceed: a DM, or an explicit mention.
        let mentioned = self_id
            .as_deref()
            .is_some_and(|id| event.mentions.iter().any(|m| m == id));
        if !event.direct && !mentioned {
            return;
        }

        // A bare mention has nothing to answer; skip the LLM entirely.
        let prompt = strip_self_mentions(&event.text, self_id.as_deref());
        if prompt.is_empty() {
            return;
        }

        let lowered = prompt.to_lowercase();
        if lowered.contains("open claw") {
            let reply = self.claw.open().await;
            self.reply(transport, event, &reply).await;
            return;
        }
        if lowered.contains("close claw") {
            let reply = self.claw.close().await;
            self.reply(transport, event, &reply).await;
            return;
        }

        let token = transport.set_working_indicator(event).await;
        let answer = self.llm.complete(&prompt).await;
        self.reply(transport, event, &transport.format_llm_reply(event, &answer))
            .await;
        if let Some(token) = token {
            transport.clear_working_indicator(event, &token).await;
        }
    }

    /// Transport failures are logged, never propagated — a dead channel
    /// must not take the process with it.
    async fn reply(&self, transport: &dyn ChatTransport, event: &ChatEvent, text: &str) {
        if let Err(e) = transport.send_chunked(&event.channel, text).await {
            tracing::error!(
                channel = %event.channel,
                "failed to reply on {}: {e}",
                transport.name()
            );
        }
    }
}

/// Strip the bot's own mention token(s) and surrounding whitespace.
fn strip_self_mentions(text: &str, self_id: Option<&str>) -> String {
    let Some(id) = self_id else {
        return text.trim().to_string();
    };
    text.replace(&format!("<@{id}>"), "")
        .replace(&format!("<@!{id}>"), "")
        .trim()
        .to_string()
}
