//! Timed gate between "start requested" and "recording begins".

use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountdownConfig {
    /// First number shown; the gate counts down to zero from here.
    pub from: u32,
    pub unit: Duration,
    /// Delay between reaching zero and firing, while the overlay fades.
    pub fade: Duration,
}

impl Default for CountdownConfig {
    fn default() -> Self {
        Self {
            from: 3,
            unit: Duration::from_secs(1),
            fade: Duration::from_millis(500),
        }
    }
}

impl CountdownConfig {
    pub fn total(&self) -> Duration {
        self.unit * self.from + self.fade
    }
}

/// Shows `from → … → 1` one unit apart, then fires its callback exactly once.
///
/// Cancelling, re-arming or dropping the gate aborts the pending timer. A
/// callback already executing when the abort lands cannot be recalled, so
/// callers that need a hard guarantee tag what the callback does (the session
/// controller tags it with the session generation).
pub struct CountdownGate {
    config: CountdownConfig,
    task: Option<JoinHandle<()>>,
}

impl CountdownGate {
    pub fn new(config: CountdownConfig) -> Self {
        Self { config, task: None }
    }

    pub fn config(&self) -> CountdownConfig {
        self.config
    }

    /// Starts the countdown. `on_tick` sees every displayed number and a final
    /// `0` when the fade begins; `on_elapsed` runs once after the fade.
    pub fn arm<T, F>(&mut self, mut on_tick: T, on_elapsed: F)
    where
        T: FnMut(u32) + Send + 'static,
        F: FnOnce() + Send + 'static,
    {
        self.cancel();
        let config = self.config;
        self.task = Some(tokio::spawn(async move {
            let mut remaining = config.from;
            on_tick(remaining);
            while remaining > 0 {
                tokio::time::sleep(config.unit).await;
                remaining -= 1;
                on_tick(remaining);
            }
            tokio::time::sleep(config.fade).await;
            on_elapsed();
        }));
    }

    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            if !task.is_finished() {
                debug!("Countdown cancelled");
            }
            task.abort();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for CountdownGate {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counters() -> (Arc<Mutex<Vec<u32>>>, Arc<AtomicUsize>) {
        (Arc::new(Mutex::new(Vec::new())), Arc::new(AtomicUsize::new(0)))
    }

    fn arm(gate: &mut CountdownGate, ticks: &Arc<Mutex<Vec<u32>>>, fired: &Arc<AtomicUsize>) {
        let ticks = ticks.clone();
        let fired = fired.clone();
        gate.arm(
            move |n| ticks.lock().push(n),
            move || {
                fired.fetch_add(1, Ordering::SeqCst);
            },
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_after_countdown_and_fade() {
        let (ticks, fired) = counters();
        let mut gate = CountdownGate::new(CountdownConfig::default());
        arm(&mut gate, &ticks, &fired);

        tokio::time::sleep(Duration::from_millis(3400)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(*ticks.lock(), vec![3, 2, 1, 0]);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!gate.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_countdown_never_fires() {
        let (ticks, fired) = counters();
        let mut gate = CountdownGate::new(CountdownConfig::default());
        arm(&mut gate, &ticks, &fired);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(gate.is_armed());
        gate.cancel();
        assert!(!gate.is_armed());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(*ticks.lock(), vec![3, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_pending_countdown() {
        let (ticks, fired) = counters();
        let mut gate = CountdownGate::new(CountdownConfig::default());
        arm(&mut gate, &ticks, &fired);
        tokio::time::sleep(Duration::from_secs(2)).await;
        arm(&mut gate, &ticks, &fired);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let (ticks, fired) = counters();
        let mut gate = CountdownGate::new(CountdownConfig::default());
        arm(&mut gate, &ticks, &fired);
        drop(gate);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_total_duration() {
        assert_eq!(CountdownConfig::default().total(), Duration::from_millis(3500));
    }
}
