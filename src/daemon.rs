//! Process supervisor.
//!
//! Startup order: config gate, LLM endpoint validation, hardware probe,
//! LLM liveness check (logged, non-fatal), then one supervised listener
//! task per configured frontend.
//! A single consumer drains the shared event queue, so each event's routing
//! runs to completion before the next one starts. On SIGINT/SIGTERM every
//! listener is cancelled and the claw's PWM line is released,
//! unconditionally, before exit.

use std::sync::Arc;

use crate::channels::runtime::spawn_supervised_listener;
use crate::channels::{ChatEvent, ChatTransport, DiscordTransport, Router, SlackTransport};
use crate::config::Config;
use crate::error::Result;
use crate::hardware::Claw;
use crate::llm::OllamaClient;

pub async fn run(config: Config) -> Result<()> {
    config.validate()?;

    tracing::info!("Initializing OpenClaw system...");

    // All fallible setup happens before the PWM line is acquired; once the
    // probe has run, every path out of this function goes through
    // `claw.shutdown()`.
    let llm = Arc::new(OllamaClient::new(&config.ollama_host, &config.ollama_model)?);

    let claw = Arc::new(Claw::connect(&config.claw));

    if llm.check_connectivity().await {
        tracing::info!("Connected to local LLM at {}", llm.host());
    } else {
        tracing::warn!("Could not connect to Ollama; AI features will be limited");
    }

    let router = Router::new(Arc::clone(&claw), Arc::clone(&llm));

    let mut transports: Vec<Arc<dyn ChatTransport>> = Vec::new();
    if let Some(token) = &config.discord_token {
        tracing::info!("Starting Discord frontend...");
        transports.push(Arc::new(DiscordTransport::new(token.clone())));
    }
    if let Some((bot_token, app_token)) = config.slack_credentials() {
        tracing::info!("Starting Slack frontend (Socket Mode)...");
        transports.push(Arc::new(SlackTransport::new(bot_token, app_token)));
    }

    let (tx, mut rx) = tokio::sync::mpsc::channel::<ChatEvent>(100);
    let handles: Vec<_> = transports
        .iter()
        .map(|t| spawn_supervised_listener(Arc::clone(t), tx.clone()))
        .collect();
    drop(tx);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            signal = &mut shutdown => {
                if let Err(e) = signal {
                    tracing::error!("signal listener failed: {e}");
                } else {
                    tracing::info!("Received exit signal");
                }
                break;
            }
            event = rx.recv() => {
                let Some(event) = event else { break };
                if let Some(transport) =
                    transports.iter().find(|t| t.name() == event.platform)
                {
                    router.handle_event(transport.as_ref(), &event).await;
                }
            }
        }
    }

    tracing::info!("Shutting down services...");
    for handle in &handles {
        handle.abort();
    }
    for handle in handles {
        let _ = handle.await;
    }

    claw.shutdown().await;
    llm.close();
    tracing::info!("OpenClaw stopped.");
    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut term =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = term.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
