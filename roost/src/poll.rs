//! Periodic background refresh scheduling.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, warn};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::Result;

/// Drives recurring background work such as feed refresh.
///
/// Each timer is identified by a key; starting a key that is already
/// running replaces the old timer. Ticks run strictly sequentially per
/// key, so a slow refresh suppresses the ticks that would otherwise have
/// piled up behind it.
#[derive(Debug, Default, Clone)]
pub struct PollScheduler {
    tasks: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl PollScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a recurring timer. `tick` is invoked once per interval; its
    /// errors are logged and the timer keeps running.
    pub fn start<F, Fut>(&self, key: impl Into<String>, every: Duration, tick: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let key = key.into();
        debug!("starting poll timer {} every {:?}", key, every);

        let log_key = key.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick of a tokio interval fires immediately; the
            // caller already loaded, so skip it.
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(err) = tick().await {
                    warn!("poll timer {} tick failed: {}", log_key, err);
                }
            }
        });

        if let Some(previous) = self.tasks.lock().unwrap().insert(key, handle) {
            previous.abort();
        }
    }

    /// Stop one timer. Returns false if no timer was running for the key.
    pub fn cancel(&self, key: &str) -> bool {
        match self.tasks.lock().unwrap().remove(key) {
            Some(handle) => {
                debug!("cancelling poll timer {}", key);
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Stop every timer.
    pub fn cancel_all(&self) {
        let mut tasks = self.tasks.lock().unwrap();
        for (key, handle) in tasks.drain() {
            debug!("cancelling poll timer {}", key);
            handle.abort();
        }
    }

    /// Whether a timer is currently registered for the key.
    pub fn is_active(&self, key: &str) -> bool {
        self.tasks.lock().unwrap().contains_key(key)
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        if Arc::strong_count(&self.tasks) == 1 {
            self.cancel_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_ticks_fire_on_interval() {
        let scheduler = PollScheduler::new();
        let ticks = Arc::new(AtomicUsize::new(0));

        let counter = ticks.clone();
        scheduler.start("feed", Duration::from_secs(10), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        assert!(scheduler.is_active("feed"));

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_tick_suppresses_backlog() {
        let scheduler = PollScheduler::new();
        let ticks = Arc::new(AtomicUsize::new(0));

        let counter = ticks.clone();
        scheduler.start("feed", Duration::from_secs(10), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                // A tick that overruns three intervals.
                tokio::time::sleep(Duration::from_secs(35)).await;
                Ok(())
            }
        });

        // Four intervals of wall time, but the first tick swallowed three
        // of them.
        tokio::time::sleep(Duration::from_secs(45)).await;
        assert!(ticks.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_timer() {
        let scheduler = PollScheduler::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = first.clone();
        scheduler.start("feed", Duration::from_secs(10), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let counter = second.clone();
        scheduler.start("feed", Duration::from_secs(10), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_ticks() {
        let scheduler = PollScheduler::new();
        let ticks = Arc::new(AtomicUsize::new(0));

        let counter = ticks.clone();
        scheduler.start("feed", Duration::from_secs(10), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert!(scheduler.cancel("feed"));
        assert!(!scheduler.is_active("feed"));
        assert!(!scheduler.cancel("feed"));

        let before = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), before);
    }
}
