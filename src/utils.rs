use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

/// A helper structure to track statistics, with both
/// *all-time* counters and a *sliding 1 s window* rate.
#[derive(Debug, Clone)]
pub struct Counter {
    /// All-time total bytes
    pub total_size: usize,
    /// All-time number of events
    pub n_events: usize,
    /// Time when this counter was created or last reset
    pub t_begin: Instant,

    // --- sliding window fields ---
    window: Duration,
    events: VecDeque<(Instant, usize)>,
    bytes_in_window: usize,
}

impl Default for Counter {
    fn default() -> Self {
        Self::with_window(Duration::from_secs(1))
    }
}

impl Counter {
    pub fn with_window(window: Duration) -> Self {
        Counter {
            total_size: 0,
            n_events: 0,
            t_begin: Instant::now(),
            window,
            events: VecDeque::new(),
            bytes_in_window: 0,
        }
    }

    /// Long-term average data rate since t_begin, in MB/s
    pub fn average_rate(&self) -> f64 {
        let secs = self.t_begin.elapsed().as_secs_f64().max(1e-6);
        (self.total_size as f64 / secs) / (1024.0 * 1024.0)
    }

    /// Sliding-window data rate, in MB/s
    pub fn rate(&self) -> f64 {
        let secs = self.window.as_secs_f64().max(1e-6);
        (self.bytes_in_window as f64 / secs) / (1024.0 * 1024.0)
    }

    /// Sliding-window event rate, in Hz
    pub fn event_rate(&self) -> f64 {
        let secs = self.window.as_secs_f64().max(1e-6);
        self.events.len() as f64 / secs
    }

    /// Record an event of `size` bytes.
    pub fn increment(&mut self, size: usize) {
        let now = Instant::now();
        self.total_size += size;
        self.n_events += 1;
        self.events.push_back((now, size));
        self.bytes_in_window += size;
        self.evict(now);
    }

    /// Drops window entries older than the window. Call before reading the
    /// rates when no event arrived for a while.
    pub fn evict(&mut self, now: Instant) {
        while let Some(&(ts, sz)) = self.events.front() {
            if now.duration_since(ts) > self.window {
                self.events.pop_front();
                self.bytes_in_window -= sz;
            } else {
                break;
            }
        }
    }

    /// Reset both all-time counters and the sliding window.
    pub fn reset(&mut self) {
        self.total_size = 0;
        self.n_events = 0;
        self.t_begin = Instant::now();
        self.events.clear();
        self.bytes_in_window = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_and_window() {
        let mut c = Counter::with_window(Duration::from_millis(50));
        c.increment(1024 * 1024);
        c.increment(1024 * 1024);
        assert_eq!(c.n_events, 2);
        assert_eq!(c.total_size, 2 * 1024 * 1024);
        // 2 MiB within 50 ms
        assert!((c.rate() - 40.0).abs() < 1e-9);
        assert!((c.event_rate() - 40.0).abs() < 1e-9);
        assert!(c.average_rate() > 0.0);

        std::thread::sleep(Duration::from_millis(60));
        c.evict(Instant::now());
        assert_eq!(c.rate(), 0.0);
        assert_eq!(c.n_events, 2);

        c.reset();
        assert_eq!(c.n_events, 0);
        assert_eq!(c.total_size, 0);
    }
}
