//! # Eviction Sweeper
//!
//! Background thread that periodically drops idle clients from a
//! [`ClientRegistry`].
//!
//! ```text
//!     ┌──────────────────────┐  every interval   ┌──────────────────┐
//!     │ clientgate-sweeper   │ ────────────────► │ registry.sweep() │
//!     │ recv_timeout(stop)   │                   └──────────────────┘
//!     └──────────────────────┘
//!             ▲
//!             │ stop() / drop
//! ```
//!
//! The first sweep runs one full interval after spawning.

use super::{error::LimiterError, registry::ClientRegistry};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Handle to a running sweeper thread.
///
/// Dropping the handle stops the thread and waits for it to exit.
#[derive(Debug)]
pub struct EvictionSweeper {
    handle: Option<JoinHandle<()>>,
    stop_tx: Option<mpsc::Sender<()>>,
}

impl EvictionSweeper {
    /// Starts sweeping `registry` every `interval`, using the registry's
    /// configured idle threshold.
    ///
    /// # Errors
    ///
    /// Returns [`LimiterError::SweeperSpawn`] if the OS refuses the thread.
    ///
    /// # Example
    ///
    /// ```rust
    /// use clientgate::{ClientRegistry, EvictionSweeper, LimiterConfig};
    /// use std::sync::Arc;
    /// use std::time::Duration;
    ///
    /// let registry = Arc::new(ClientRegistry::new(LimiterConfig::default()).unwrap());
    /// let sweeper = EvictionSweeper::spawn(registry, Duration::from_secs(60)).unwrap();
    /// assert!(sweeper.is_running());
    /// sweeper.stop();
    /// ```
    pub fn spawn(registry: Arc<ClientRegistry>, interval: Duration) -> Result<Self, LimiterError> {
        let (stop_tx, stop_rx) = mpsc::channel();

        let handle = thread::Builder::new()
            .name("clientgate-sweeper".to_string())
            .spawn(move || {
                info!(
                    "Started eviction sweeper (interval: {}ms, idle threshold: {}ms)",
                    interval.as_millis(),
                    registry.config().idle_threshold_ms
                );

                loop {
                    match stop_rx.recv_timeout(interval) {
                        Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                            info!("Eviction sweeper stopping");
                            break;
                        }
                        Err(mpsc::RecvTimeoutError::Timeout) => {
                            let removed = registry.sweep();
                            debug!(removed, active = registry.len(), "Sweep finished");
                        }
                    }
                }
            })?;

        Ok(Self {
            handle: Some(handle),
            stop_tx: Some(stop_tx),
        })
    }

    /// `true` while the thread has not exited.
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Signals the thread and waits for it to finish its current sweep.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            // the thread may already be gone; a closed channel also stops it
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Eviction sweeper panicked");
            }
        }
    }
}

impl Drop for EvictionSweeper {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limiter::{config::LimiterConfig, identity::ClientIdentity, utils::ManualClock};
    use std::time::Instant;

    fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_sweeper_evicts_idle_clients() {
        let clock = Arc::new(ManualClock::new(0));
        let config = LimiterConfig::new(2, 4).with_idle_threshold_ms(1_000);
        let registry = Arc::new(ClientRegistry::with_clock(config, clock.clone()).unwrap());

        let idle: ClientIdentity = "10.0.0.1".parse().unwrap();
        registry.try_admit(&idle);
        clock.advance_ms(1_001);

        let sweeper = EvictionSweeper::spawn(registry.clone(), Duration::from_millis(10)).unwrap();
        assert!(wait_until(Duration::from_secs(5), || registry.is_empty()));
        sweeper.stop();

        assert_eq!(registry.stats().total_evicted, 1);
    }

    #[test]
    fn test_sweeper_keeps_active_clients() {
        let clock = Arc::new(ManualClock::new(0));
        let config = LimiterConfig::new(2, 4).with_idle_threshold_ms(1_000);
        let registry = Arc::new(ClientRegistry::with_clock(config, clock.clone()).unwrap());

        let active: ClientIdentity = "10.0.0.2".parse().unwrap();
        registry.try_admit(&active);
        clock.advance_ms(500);

        let sweeper = EvictionSweeper::spawn(registry.clone(), Duration::from_millis(5)).unwrap();
        thread::sleep(Duration::from_millis(50));
        sweeper.stop();

        assert!(registry.contains(&active));
    }

    #[test]
    fn test_stop_cleanup_thread() {
        let registry = Arc::new(ClientRegistry::new(LimiterConfig::default()).unwrap());

        // a long interval must not delay shutdown
        let sweeper = EvictionSweeper::spawn(registry, Duration::from_secs(3_600)).unwrap();
        assert!(sweeper.is_running());

        let start = Instant::now();
        sweeper.stop();
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_drop_stops_thread() {
        let registry = Arc::new(ClientRegistry::new(LimiterConfig::default()).unwrap());
        let sweeper = EvictionSweeper::spawn(registry.clone(), Duration::from_secs(3_600)).unwrap();
        drop(sweeper);

        // the thread held the only other reference
        assert_eq!(Arc::strong_count(&registry), 1);
    }
}
