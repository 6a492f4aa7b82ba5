use crate::error::ConfigError;

pub const DEFAULT_OLLAMA_HOST: &str = "http://ollama:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3:8b-instruct-q4_K_M";

/// Runtime configuration, sourced entirely from the environment.
///
/// Empty variables are treated as unset so `DISCORD_TOKEN=""` in a service
/// file behaves the same as an absent variable.
#[derive(Debug, Clone)]
pub struct Config {
    pub ollama_host: String,
    pub ollama_model: String,
    pub discord_token: Option<String>,
    pub slack_bot_token: Option<String>,
    pub slack_app_token: Option<String>,
    pub claw: ClawConfig,
}

#[derive(Debug, Clone, Default)]
pub struct ClawConfig {
    /// Sysfs PWM channel carrying the servo signal.
    pub pwm_channel: u8,
    /// Skip the hardware probe entirely and run with a simulated servo.
    pub force_mock: bool,
}

fn env_nonempty(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

impl Config {
    pub fn from_env() -> Self {
        let claw = ClawConfig {
            pwm_channel: env_nonempty("CLAW_PWM_CHANNEL")
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(0),
            force_mock: env_nonempty("CLAW_MOCK").is_some(),
        };

        let slack_bot_token = env_nonempty("SLACK_BOT_TOKEN");
        let slack_app_token = env_nonempty("SLACK_APP_TOKEN");

        Self {
            ollama_host: env_nonempty("OLLAMA_HOST")
                .unwrap_or_else(|| DEFAULT_OLLAMA_HOST.to_string()),
            ollama_model: env_nonempty("OLLAMA_MODEL")
                .unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.to_string()),
            discord_token: env_nonempty("DISCORD_TOKEN"),
            slack_bot_token,
            slack_app_token,
            claw,
        }
    }

    /// Slack needs both the bot token and the app-level (Socket Mode) token.
    pub fn slack_credentials(&self) -> Option<(String, String)> {
        match (&self.slack_bot_token, &self.slack_app_token) {
            (Some(bot), Some(app)) => Some((bot.clone(), app.clone())),
            (Some(_), None) | (None, Some(_)) => {
                tracing::warn!(
                    "Slack half-configured: both SLACK_BOT_TOKEN and SLACK_APP_TOKEN are required; skipping Slack"
                );
                None
            }
            (None, None) => None,
        }
    }

    pub fn has_channels(&self) -> bool {
        self.discord_token.is_some() || self.slack_credentials().is_some()
    }

    /// Startup gate: a process with no frontend configured has nothing to do.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.has_channels() {
            Ok(())
        } else {
            Err(ConfigError::NoChannels)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_config() -> Config {
        Config {
            ollama_host: DEFAULT_OLLAMA_HOST.to_string(),
            ollama_model: DEFAULT_OLLAMA_MODEL.to_string(),
            discord_token: None,
            slack_bot_token: None,
            slack_app_token: None,
            claw: ClawConfig::default(),
        }
    }

    #[test]
    fn no_credentials_fails_validation() {
        let cfg = bare_config();
        assert!(matches!(cfg.validate(), Err(ConfigError::NoChannels)));
    }

    #[test]
    fn discord_alone_is_enough() {
        let cfg = Config {
            discord_token: Some("token".into()),
            ..bare_config()
        };
        assert!(cfg.validate().is_ok());
        assert!(cfg.slack_credentials().is_none());
    }

    #[test]
    fn slack_needs_both_tokens() {
        let cfg = Config {
            slack_bot_token: Some("xoxb-1".into()),
            ..bare_config()
        };
        assert!(cfg.slack_credentials().is_none());
        assert!(cfg.validate().is_err());

        let cfg = Config {
            slack_bot_token: Some("xoxb-1".into()),
            slack_app_token: Some("xapp-1".into()),
            ..bare_config()
        };
        let (bot, app) = cfg.slack_credentials().expect("both tokens set");
        assert_eq!(bot, "xoxb-1");
        assert_eq!(app, "xapp-1");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn app_token_alone_is_not_slack() {
        let cfg = Config {
            slack_app_token: Some("xapp-1".into()),
            ..bare_config()
        };
        assert!(cfg.slack_credentials().is_none());
    }
}
