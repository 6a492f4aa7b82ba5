//! Chat frontends.
//!
//! Each platform implements the [`ChatTransport`] capability set; the
//! decision flow for inbound events lives in [`router`] and is shared by
//! all of them. Listeners run under [`runtime::spawn_supervised_listener`]
//! so a gateway disconnect restarts the connection instead of silencing
//! the frontend.

pub mod discord;
pub mod router;
pub mod runtime;
pub mod slack;
pub mod traits;

pub use discord::DiscordTransport;
pub use router::Router;
pub use slack::SlackTransport;
pub use traits::{ChatEvent, ChatTransport};

/// Split a reply into chunks of at most `max_chars` characters, preferring
/// newline and space boundaries over hard cuts.
pub fn split_reply(text: &str, max_chars: usize) -> Vec<String> {
    if max_chars == 0 || text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let window_end = rest
            .char_indices()
            .nth(max_chars)
            .map_or(rest.len(), |(idx, _)| idx);

        let mut cut = window_end;
        if window_end < rest.len()
            && let Some(pos) = rest[..window_end]
                .rfind('\n')
                .or_else(|| rest[..window_end].rfind(' '))
            && pos > 0
        {
            cut = pos + 1;
        }

        let chunk = rest[..cut].trim_end();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }
        rest = rest[cut..].trim_start_matches('\n');
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_reply_passes_through() {
        assert_eq!(split_reply("hello", 2000), vec!["hello".to_string()]);
    }

    #[test]
    fn long_reply_respects_limit() {
        let text = "word ".repeat(100);
        let chunks = split_reply(&text, 32);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 32);
        }
    }

    #[test]
    fn prefers_newline_boundaries() {
        let text = "first line\nsecond line";
        let chunks = split_reply(text, 15);
        assert_eq!(chunks[0], "first line");
    }

    #[test]
    fn hard_splits_unbroken_text() {
        let text = "x".repeat(50);
        let chunks = split_reply(&text, 20);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 20);
    }

    #[test]
    fn nothing_is_lost() {
        let text = "alpha beta gamma delta epsilon zeta";
        let rejoined = split_reply(text, 12).join(" ");
        assert_eq!(rejoined, text);
    }
}
