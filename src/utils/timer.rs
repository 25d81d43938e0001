//! Wall-clock timing for tests and run phases

use std::time::{Duration, Instant};

/// Measures one unit test
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    label: String,
}

impl Timer {
    pub fn start(label: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            label: label.into(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Stop the timer, logging and returning the elapsed milliseconds
    pub fn stop(self) -> u64 {
        let elapsed = self.elapsed_ms();
        tracing::debug!("{} took {}ms", self.label, elapsed);
        elapsed
    }
}

/// Records cumulative lap marks, one per run phase
#[derive(Debug)]
pub struct Stopwatch {
    start: Instant,
    laps: Vec<(String, Duration)>,
}

impl Stopwatch {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            laps: Vec::new(),
        }
    }

    pub fn lap(&mut self, label: impl Into<String>) {
        self.laps.push((label.into(), self.start.elapsed()));
    }

    pub fn total(&self) -> Duration {
        self.start.elapsed()
    }

    /// Duration of each lap on its own
    pub fn lap_times(&self) -> Vec<(String, Duration)> {
        let mut prev = Duration::ZERO;
        self.laps
            .iter()
            .map(|(label, cumulative)| {
                let lap = cumulative.saturating_sub(prev);
                prev = *cumulative;
                (label.clone(), lap)
            })
            .collect()
    }

    pub fn format(&self) -> String {
        let mut output = String::new();
        for (label, duration) in self.lap_times() {
            output.push_str(&format!("  {:<10} {}ms\n", label, duration.as_millis()));
        }
        output.push_str(&format!("  {:<10} {}ms", "total", self.total().as_millis()));
        output
    }
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_timer() {
        let timer = Timer::start("unit test");
        sleep(Duration::from_millis(10));
        assert!(timer.elapsed_ms() >= 10);
        assert!(timer.stop() >= 10);
    }

    #[test]
    fn test_stopwatch_laps_are_not_cumulative() {
        let mut sw = Stopwatch::new();
        sleep(Duration::from_millis(10));
        sw.lap("setup");
        sleep(Duration::from_millis(10));
        sw.lap("execute");

        let laps = sw.lap_times();
        assert_eq!(laps.len(), 2);
        assert_eq!(laps[0].0, "setup");
        assert!(laps[1].1 < sw.total());

        let formatted = sw.format();
        assert!(formatted.contains("setup"));
        assert!(formatted.contains("total"));
    }
}
