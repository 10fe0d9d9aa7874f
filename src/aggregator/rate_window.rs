use std::collections::VecDeque;

/// Sliding window over per-cycle message counts.
///
/// Tracks the rate of incoming messages across the last `window` flush
/// cycles, determining whether the number received within the window has
/// reached the paging limit. Owned and driven by the cycle coordinator's
/// single thread, so it needs no internal locking.
#[derive(Debug)]
pub struct RateWindow {
    window: usize,
    limit: u64,
    counts: VecDeque<u64>,
}

impl RateWindow {
    /// Create a window spanning `window` cycles with paging limit `limit`.
    pub fn new(window: usize, limit: u64) -> Self {
        Self {
            window,
            limit,
            counts: VecDeque::with_capacity(window),
        }
    }

    /// Append a cycle's count, evicting the oldest entry first when the
    /// window is full, and check the running sum against the limit.
    ///
    /// Returns `(crossed, sum)` where `crossed` is true iff the sum of all
    /// counts currently in the window has reached the limit (>=, not >).
    pub fn record_and_check(&mut self, count: u64) -> (bool, u64) {
        if self.counts.len() >= self.window {
            self.counts.pop_front();
        }
        self.counts.push_back(count);
        let sum: u64 = self.counts.iter().sum();
        (sum >= self.limit, sum)
    }

    /// Forget all recorded counts.
    ///
    /// Called after a page is sent, so a persisting condition pages again
    /// only once a fresh window fills back up to the limit.
    pub fn reset(&mut self) {
        self.counts.clear();
    }

    /// Number of cycle counts currently in the window.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// True if no counts have been recorded since creation or reset.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_uses_greater_or_equal() {
        let mut window = RateWindow::new(3, 3);
        assert_eq!(window.record_and_check(1), (false, 1));
        assert_eq!(window.record_and_check(0), (false, 1));
        assert_eq!(window.record_and_check(1), (false, 2));
        assert_eq!(window.record_and_check(1), (false, 2));
        assert_eq!(window.record_and_check(5), (true, 7));
    }

    #[test]
    fn test_exact_limit_crosses() {
        let mut window = RateWindow::new(5, 10);
        assert_eq!(window.record_and_check(9), (false, 9));
        assert_eq!(window.record_and_check(1), (true, 10));
    }

    #[test]
    fn test_oldest_entries_are_evicted() {
        let mut window = RateWindow::new(2, 100);
        window.record_and_check(10);
        window.record_and_check(20);
        // 10 falls out of the window here.
        let (crossed, sum) = window.record_and_check(30);
        assert!(!crossed);
        assert_eq!(sum, 50);
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn test_reset_clears_counts() {
        let mut window = RateWindow::new(3, 3);
        window.record_and_check(1);
        window.record_and_check(1);
        window.record_and_check(5);
        window.reset();
        assert!(window.is_empty());
        assert_eq!(window.record_and_check(2), (false, 2));
    }

    #[test]
    fn test_window_of_one() {
        let mut window = RateWindow::new(1, 5);
        assert_eq!(window.record_and_check(3), (false, 3));
        assert_eq!(window.record_and_check(7), (true, 7));
        assert_eq!(window.len(), 1);
    }
}
