use std::sync::Arc;
use std::time::Duration;

use super::traits::{ChatEvent, ChatTransport};

const INITIAL_BACKOFF_SECS: u64 = 2;
const MAX_BACKOFF_SECS: u64 = 60;

/// Run a transport's listen loop forever, restarting it with doubling
/// backoff after disconnects or errors. A clean exit (e.g. a gateway
/// reconnect request) resets the backoff. Reconnect attempts are gated on
/// the platform's health probe so a dead API is not hammered with full
/// connection handshakes. Exits once the event queue is gone, i.e. on
/// shutdown.
pub fn spawn_supervised_listener(
    transport: Arc<dyn ChatTransport>,
    tx: tokio::sync::mpsc::Sender<ChatEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut backoff = INITIAL_BACKOFF_SECS;

        'supervise: loop {
            tracing::debug!("channel {} listener starting", transport.name());
            let result = transport.listen(tx.clone()).await;

            if tx.is_closed() {
                break;
            }

            match result {
                Ok(()) => {
                    tracing::warn!("Channel {} disconnected; restarting", transport.name());
                    backoff = INITIAL_BACKOFF_SECS;
                }
                Err(e) => {
                    tracing::error!("Channel {} error: {e}; restarting", transport.name());
                }
            }

            tokio::time::sleep(Duration::from_secs(backoff)).await;
            // Double AFTER sleeping so the first failure waits the initial backoff.
            backoff = backoff.saturating_mul(2).min(MAX_BACKOFF_SECS);

            while !transport.health_check().await {
                if tx.is_closed() {
                    break 'supervise;
                }
                tracing::warn!(
                    "Channel {} still unhealthy, delaying reconnect",
                    transport.name()
                );
                tokio::time::sleep(Duration::from_secs(backoff)).await;
                backoff = backoff.saturating_mul(2).min(MAX_BACKOFF_SECS);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct AlwaysFailTransport {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ChatTransport for AlwaysFailTransport {
        fn name(&self) -> &str {
            "always-fail"
        }

        fn self_id(&self) -> Option<String> {
            None
        }

        async fn send_reply(&self, _channel: &str, _text: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn listen(
            &self,
            _tx: tokio::sync::mpsc::Sender<ChatEvent>,
        ) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("listen boom")
        }
    }

    #[tokio::test]
    async fn supervised_listener_restarts_on_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let transport: Arc<dyn ChatTransport> = Arc::new(AlwaysFailTransport {
            calls: Arc::clone(&calls),
        });

        let (tx, rx) = tokio::sync::mpsc::channel::<ChatEvent>(1);
        let handle = spawn_supervised_listener(transport, tx);

        tokio::time::sleep(Duration::from_millis(80)).await;
        drop(rx);
        handle.abort();
        let _ = handle.await;

        assert!(calls.load(Ordering::SeqCst) >= 1);
    }

    struct UnhealthyTransport {
        listens: Arc<AtomicUsize>,
        probes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ChatTransport for UnhealthyTransport {
        fn name(&self) -> &str {
            "unhealthy"
        }

        fn self_id(&self) -> Option<String> {
            None
        }

        async fn send_reply(&self, _channel: &str, _text: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn listen(
            &self,
            _tx: tokio::sync::mpsc::Sender<ChatEvent>,
        ) -> anyhow::Result<()> {
            self.listens.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("listen boom")
        }

        async fn health_check(&self) -> bool {
            self.probes.fetch_add(1, Ordering::SeqCst);
            false
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unhealthy_transport_is_not_reconnected() {
        let listens = Arc::new(AtomicUsize::new(0));
        let probes = Arc::new(AtomicUsize::new(0));
        let transport: Arc<dyn ChatTransport> = Arc::new(UnhealthyTransport {
            listens: Arc::clone(&listens),
            probes: Arc::clone(&probes),
        });

        let (tx, rx) = tokio::sync::mpsc::channel::<ChatEvent>(1);
        let handle = spawn_supervised_listener(transport, tx);

        // Virtual time: backoff sleeps auto-advance, so plenty of reconnect
        // windows pass while the probe keeps failing.
        tokio::time::sleep(Duration::from_secs(600)).await;

        assert_eq!(listens.load(Ordering::SeqCst), 1);
        assert!(probes.load(Ordering::SeqCst) >= 2);

        // Once the queue is gone, the health wait exits the supervisor.
        drop(rx);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(handle.is_finished());
    }

    #[tokio::test]
    async fn supervised_listener_stops_when_queue_closes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let transport: Arc<dyn ChatTransport> = Arc::new(AlwaysFailTransport {
            calls: Arc::clone(&calls),
        });

        let (tx, rx) = tokio::sync::mpsc::channel::<ChatEvent>(1);
        drop(rx);
        let handle = spawn_supervised_listener(transport, tx);

        // Queue already closed: the supervisor must exit after one attempt.
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("supervisor exits on closed queue")
            .expect("task completes cleanly");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
