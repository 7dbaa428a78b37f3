//! Fixed-interval pass scheduling
//!
//! Each pass runs as its own task. A pass that errors or panics is logged and
//! the next tick runs normally, so one scanner can never take down the other.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

/// Read side of the process shutdown flag
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

/// Write side of the process shutdown flag
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is triggered or the trigger is dropped
    pub async fn wait(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Run `pass` now and then every `period` until shutdown.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: Shutdown,
    mut pass: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval(period.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.wait() => break,
            }

            let started = Instant::now();
            match tokio::spawn(pass()).await {
                Ok(Ok(())) => {
                    info!(
                        target: "SCHEDULER",
                        pass = name,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Pass complete"
                    );
                }
                Ok(Err(e)) => {
                    error!(target: "SCHEDULER", pass = name, "Pass failed: {:#}", e);
                }
                Err(e) if e.is_panic() => {
                    error!(target: "SCHEDULER", pass = name, "Pass panicked, will retry on next tick");
                }
                Err(e) => {
                    warn!(target: "SCHEDULER", pass = name, "Pass cancelled: {}", e);
                }
            }

            if shutdown.is_triggered() {
                break;
            }
        }

        info!(target: "SCHEDULER", pass = name, "Stopped");
    })
}
