//! Periodic background tasks with explicit shutdown.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// A spawned loop that runs `tick` every `period` until stopped.
#[derive(Debug)]
pub struct PeriodicWorker {
    name: &'static str,
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl PeriodicWorker {
    /// Spawn the loop. The first run happens one `period` after spawning.
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("{name} worker shutting down");
                        break;
                    }
                    _ = interval.tick() => tick().await,
                }
            }
        });
        tracing::debug!("{name} worker started with period {}ms", period.as_millis());

        Self {
            name,
            shutdown_tx,
            handle,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Signal shutdown and wait for an in-progress tick to finish.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(error) = self.handle.await {
            tracing::warn!("{} worker ended abnormally: {error}", self.name);
        }
    }
}
