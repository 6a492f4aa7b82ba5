#![warn(clippy::all, clippy::pedantic)]

use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use openclaw::error::{ClawError, ConfigError};
use openclaw::{Config, daemon};

#[derive(Parser)]
#[command(
    name = "openclaw",
    version,
    about = "Chat-controlled servo claw with a local LLM brain"
)]
struct Cli {
    /// Run with a simulated servo even when a PWM line is present.
    #[arg(long)]
    mock_claw: bool,
}

#[tokio::main]
async fn main() {
    // Install default crypto provider for Rustls TLS.
    // This prevents the error: "could not automatically determine the process-level CryptoProvider"
    // when both aws-lc-rs and ring features are available (or neither is explicitly selected).
    if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
        eprintln!("Warning: Failed to install default crypto provider: {e:?}");
    }

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if cli.mock_claw {
        config.claw.force_mock = true;
    }

    if let Err(e) = daemon::run(config).await {
        tracing::error!("{e}");
        let code = match e {
            ClawError::Config(ConfigError::NoChannels) => 2,
            _ => 1,
        };
        std::process::exit(code);
    }
}
