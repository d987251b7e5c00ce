//! Bounded polling.
//!
//! Every wait in the engine (catalog visibility after a create, catalog
//! absence after a drop, archive moves, chunk drain) polls on a fixed
//! interval and gives up with [`WaitTimeout`] after `max_wait`.

use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::warn;

/// A poll gave up before its condition held.
#[derive(Debug, Clone, Error)]
#[error("timed out after {waited:?} waiting for {what}")]
pub struct WaitTimeout {
    pub what: String,
    pub waited: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub interval: Duration,
    pub max_wait: Duration,
}

impl WaitPolicy {
    pub fn new(interval: Duration, max_wait: Duration) -> Self {
        Self { interval, max_wait }
    }

    /// Poll `check` until it reports true. Check errors end the wait
    /// immediately. A warning is logged once half of `max_wait` has passed.
    pub fn wait_until<E, F>(&self, what: &str, mut check: F) -> Result<(), E>
    where
        E: From<WaitTimeout>,
        F: FnMut() -> Result<bool, E>,
    {
        let start = Instant::now();
        let mut warned = false;

        loop {
            if check()? {
                return Ok(());
            }

            let waited = start.elapsed();
            if waited >= self.max_wait {
                return Err(WaitTimeout {
                    what: what.to_string(),
                    waited,
                }
                .into());
            }
            if !warned && waited >= self.max_wait / 2 {
                warn!(waited_ms = waited.as_millis() as u64, "still waiting for {}", what);
                warned = true;
            }

            thread::sleep(self.interval.min(self.max_wait - waited));
        }
    }
}
