use std::time::{Duration, Instant};

/// Stopwatch accumulating the wall time of repeated runs (train / val epochs).
#[derive(Debug, Default)]
pub struct Timer {
    start: Option<Instant>,
    calls: usize,
    total: Duration,
    diff: Duration,
}

#[allow(dead_code)]
impl Timer {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn tic(&mut self) {
        self.start = Some(Instant::now());
    }

    /// Stops the clock. Returns the average over all calls when `average` is set,
    /// otherwise the duration of this call. Without a preceding `tic` nothing is recorded.
    pub fn toc(&mut self, average: bool) -> Duration {
        if let Some(start) = self.start.take() {
            self.diff = start.elapsed();
            self.total += self.diff;
            self.calls += 1;
        }
        if average {
            self.average_time()
        } else {
            self.diff
        }
    }

    /// Duration of the last completed `tic`/`toc` pair.
    pub fn diff(&self) -> Duration {
        self.diff
    }

    pub fn total(&self) -> Duration {
        self.total
    }

    pub fn calls(&self) -> usize {
        self.calls
    }

    pub fn average_time(&self) -> Duration {
        match self.calls {
            0 => Duration::ZERO,
            n => self.total / n as u32,
        }
    }

    pub fn clear(&mut self) {
        *self = Default::default();
    }
}
