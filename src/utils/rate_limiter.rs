//! Per-chain minimum spacing between explorer requests

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

use crate::config::{Chain, Config};

struct Slot {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

/// Enforces a minimum delay between calls per chain.
///
/// The chain's lock is held while sleeping, so concurrent callers on the same
/// chain are released one interval apart.
#[derive(Clone)]
pub struct RateLimiter {
    slots: Arc<HashMap<Chain, Slot>>,
}

impl RateLimiter {
    pub fn new(intervals: impl IntoIterator<Item = (Chain, Duration)>) -> Self {
        let slots = intervals
            .into_iter()
            .map(|(chain, interval)| {
                (
                    chain,
                    Slot {
                        interval,
                        last: Mutex::new(None),
                    },
                )
            })
            .collect();

        Self {
            slots: Arc::new(slots),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(Chain::ALL.iter().map(|&c| (c, config.rate_limit(c))))
    }

    /// Wait until at least the chain's interval has passed since the previous call
    pub async fn wait(&self, chain: Chain) {
        let Some(slot) = self.slots.get(&chain) else {
            return;
        };

        let mut last = slot.last.lock().await;
        if let Some(prev) = *last {
            sleep_until(prev + slot.interval).await;
        }
        *last = Some(Instant::now());
    }
}
