//! Explicit, process-scoped timing registry.
//!
//! Algorithms hold an `Arc<TimerRegistry>` and wrap their phases in
//! [`TimerRegistry::scoped`] guards. Nothing is recorded until the registry is
//! [initialized](TimerRegistry::initialize); [`TimerRegistry::finalize`] stops
//! recording and hands back the accumulated statistics.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Accumulated statistics of one named timer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TimerStats {
    pub count: u64,
    pub total: Duration,
    pub max: Duration,
}

#[derive(Debug, Default)]
struct RegistryState {
    active: bool,
    timers: BTreeMap<&'static str, TimerStats>,
}

#[derive(Debug, Default)]
pub struct TimerRegistry {
    state: Mutex<RegistryState>,
}

impl TimerRegistry {
    /// An inactive registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears previous statistics and starts recording.
    pub fn initialize(&self) {
        let mut s = self.state.lock();
        s.active = true;
        s.timers.clear();
    }

    /// Stops recording and returns every timer, sorted by name.
    pub fn finalize(&self) -> Vec<(&'static str, TimerStats)> {
        let mut s = self.state.lock();
        s.active = false;
        std::mem::take(&mut s.timers).into_iter().collect()
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    /// Starts timing `name`; the interval is recorded when the guard drops.
    pub fn scoped(&self, name: &'static str) -> TimerGuard<'_> {
        TimerGuard {
            registry: self,
            name,
            start: self.is_active().then(Instant::now),
        }
    }

    pub fn stats(&self, name: &str) -> Option<TimerStats> {
        self.state.lock().timers.get(name).copied()
    }

    fn record(&self, name: &'static str, elapsed: Duration) {
        let mut s = self.state.lock();
        if !s.active {
            return;
        }
        let t = s.timers.entry(name).or_default();
        t.count += 1;
        t.total += elapsed;
        t.max = t.max.max(elapsed);
    }
}

/// RAII guard returned by [`TimerRegistry::scoped`].
#[must_use = "the interval ends when the guard is dropped"]
pub struct TimerGuard<'a> {
    registry: &'a TimerRegistry,
    name: &'static str,
    start: Option<Instant>,
}

impl Drop for TimerGuard<'_> {
    fn drop(&mut self) {
        if let Some(start) = self.start {
            self.registry.record(self.name, start.elapsed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inactive_registry_records_nothing() {
        let reg = TimerRegistry::new();
        drop(reg.scoped("phase"));
        assert!(reg.stats("phase").is_none());
    }

    #[test]
    fn initialize_then_finalize() {
        let reg = TimerRegistry::new();
        reg.initialize();
        for _ in 0..3 {
            let _g = reg.scoped("phase");
        }
        assert_eq!(reg.stats("phase").unwrap().count, 3);
        let all = reg.finalize();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].0, "phase");
        assert!(!reg.is_active());
        assert!(reg.stats("phase").is_none());
    }
}
