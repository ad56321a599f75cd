//! Performance measurement tools.

use std::{
    fmt, mem,
    sync::{Mutex, PoisonError},
    time::Instant,
};

const EMA_ALPHA: f32 = 0.3;

/// A timer that can measure and average the time an operation takes.
///
/// Measurements are smoothed with an exponential moving average. The average is reset when the
/// timer is displayed using `{}` ([`std::fmt::Display`]).
pub struct Timer {
    name: &'static str,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    /// The current average time in seconds, or `None` if nothing was measured since the last reset.
    avg: Option<f32>,
    /// The number of time measurements that contributed to the current `avg`.
    count: usize,
}

impl Timer {
    /// Creates a new timer.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Mutex::new(State::default()),
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Invokes a closure, measuring and recording the time it takes.
    pub fn time<T>(&self, timee: impl FnOnce() -> T) -> T {
        let _guard = self.start();
        timee()
    }

    /// Starts timing an operation using a drop guard.
    ///
    /// When the returned [`TimerGuard`] is dropped, the time between the call to `start` and the
    /// drop is measured and recorded.
    pub fn start(&self) -> TimerGuard<'_> {
        TimerGuard {
            start: Instant::now(),
            timer: self,
        }
    }

    /// Returns the number of measurements since the last reset.
    pub fn count(&self) -> usize {
        self.state().count
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stop(&self, start: Instant) {
        let secs = start.elapsed().as_secs_f32();
        let mut state = self.state();
        state.avg = Some(match state.avg {
            Some(prev) => prev + EMA_ALPHA * (secs - prev),
            None => secs,
        });
        state.count += 1;
    }
}

/// Displays the average recorded time and resets it.
impl fmt::Display for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut state = self.state();
        let avg = mem::take(&mut state.avg).unwrap_or(0.0);
        let len = mem::take(&mut state.count);
        let avg_ms = avg * 1000.0;

        write!(f, "{}: {len}x{avg_ms:.01}ms", self.name)
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer").field("name", &self.name).finish()
    }
}

/// Guard returned by [`Timer::start`]. Stops timing the operation when dropped.
pub struct TimerGuard<'a> {
    start: Instant,
    timer: &'a Timer,
}

impl Drop for TimerGuard<'_> {
    fn drop(&mut self) {
        self.timer.stop(self.start);
    }
}

/// Timers for the stages of hand keypoint extraction.
#[derive(Debug)]
pub struct StageTimers {
    /// Backend inference, one measurement per scale.
    pub infer: Timer,
    /// Resampling and max-merging the per-scale heatmaps.
    pub merge: Timer,
    pub decode: Timer,
}

impl StageTimers {
    pub(crate) fn new() -> Self {
        Self {
            infer: Timer::new("infer"),
            merge: Timer::new("merge"),
            decode: Timer::new("decode"),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Timer> {
        [&self.infer, &self.merge, &self.decode].into_iter()
    }
}

/// Displays (and resets) all stage timers, separated by commas.
impl fmt::Display for StageTimers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, timer) in self.iter().enumerate() {
            if i != 0 {
                f.write_str(", ")?;
            }
            write!(f, "{timer}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_resets() {
        let timer = Timer::new("work");
        timer.time(|| ());
        timer.time(|| ());
        assert_eq!(timer.count(), 2);

        let shown = timer.to_string();
        assert!(shown.starts_with("work: 2x"), "{shown}");
        assert_eq!(timer.count(), 0);
        assert_eq!(timer.to_string(), "work: 0x0.0ms");
    }

    #[test]
    fn guard_records_on_drop() {
        let timer = Timer::new("guarded");
        {
            let _guard = timer.start();
            assert_eq!(timer.count(), 0);
        }
        assert_eq!(timer.count(), 1);
    }

    #[test]
    fn stage_timers_display() {
        let timers = StageTimers::new();
        timers.decode.time(|| ());
        let shown = timers.to_string();
        assert!(shown.starts_with("infer: 0x"), "{shown}");
        assert!(shown.contains(", decode: 1x"), "{shown}");
    }
}
