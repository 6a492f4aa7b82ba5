use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for OpenClaw.
///
/// Each subsystem defines its own error variant. Library callers can match on
/// these to decide recovery strategy; internal code continues to use
/// `anyhow::Result` for ad-hoc context chains.
#[derive(Debug, Error)]
pub enum ClawError {
    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Hardware ─────────────────────────────────────────────────────────
    #[error("hardware: {0}")]
    Hardware(#[from] HardwareError),

    // ── Transport / Channel ─────────────────────────────────────────────
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// Neither Discord nor Slack credentials are present. Startup aborts
    /// with a dedicated exit code so orchestrators can tell "no bot
    /// configured" apart from runtime faults.
    #[error(
        "no chat credentials configured (set DISCORD_TOKEN or SLACK_BOT_TOKEN + SLACK_APP_TOKEN)"
    )]
    NoChannels,
}

// ─── Hardware errors ────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("pwm: {0}")]
    Pwm(String),
}

// ─── Transport errors ───────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("channel {channel} connection failed: {message}")]
    Connection { channel: String, message: String },

    #[error("channel {channel} send failed: {message}")]
    Send { channel: String, message: String },
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, ClawError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_displays_correctly() {
        let err = ClawError::Config(ConfigError::Validation("bad scheme".into()));
        assert!(err.to_string().contains("validation failed"));
        assert!(err.to_string().contains("bad scheme"));
    }

    #[test]
    fn no_channels_names_both_env_vars() {
        let err = ClawError::Config(ConfigError::NoChannels);
        assert!(err.to_string().contains("DISCORD_TOKEN"));
        assert!(err.to_string().contains("SLACK_BOT_TOKEN"));
    }

    #[test]
    fn transport_send_displays_channel() {
        let err = ClawError::Transport(TransportError::Send {
            channel: "slack".into(),
            message: "chat.postMessage failed".into(),
        });
        assert!(err.to_string().contains("slack"));
        assert!(err.to_string().contains("chat.postMessage"));
    }

    #[test]
    fn anyhow_interop() {
        let anyhow_err = anyhow::anyhow!("something went wrong");
        let claw_err: ClawError = anyhow_err.into();
        assert!(claw_err.to_string().contains("something went wrong"));
    }
}
