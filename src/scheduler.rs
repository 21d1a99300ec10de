// src/scheduler.rs
#[cfg(feature = "waterwheel-scheduler")]
use std::sync::atomic::AtomicU64;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Picks a worker for each accepted descriptor.
///
/// The counter is intentionally relaxed: the policy is a hint, and an
/// occasional racy update costs nothing more than a slightly uneven spread.
pub struct Scheduler {
    counter: AtomicUsize,
    workers: usize,
    #[cfg(feature = "waterwheel-scheduler")]
    rng: AtomicU64,
}

impl Scheduler {
    pub fn new(workers: usize) -> Self {
        Self {
            counter: AtomicUsize::new(0),
            workers,
            #[cfg(feature = "waterwheel-scheduler")]
            rng: AtomicU64::new(0x9E37_79B9_7F4A_7C15),
        }
    }

    /// Round-robin: every accepted connection advances the wheel by one.
    #[cfg(not(feature = "waterwheel-scheduler"))]
    pub fn next_worker(&self) -> usize {
        self.counter.fetch_add(1, Ordering::Relaxed) % self.workers
    }

    /// Waterwheel: a 4-bit draw decides whether the wheel turns forward or
    /// back. The stochastic walk still touches every worker but resists
    /// phase-lock with periodic client arrival patterns.
    #[cfg(feature = "waterwheel-scheduler")]
    pub fn next_worker(&self) -> usize {
        let n = if self.draw() & 15 > 7 {
            self.counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
        } else {
            self.counter.fetch_sub(1, Ordering::Relaxed).wrapping_sub(1)
        };
        n % self.workers
    }

    // xorshift64, racy by design like the counter itself.
    #[cfg(feature = "waterwheel-scheduler")]
    fn draw(&self) -> u64 {
        let mut x = self.rng.load(Ordering::Relaxed);
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng.store(x, Ordering::Relaxed);
        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(feature = "waterwheel-scheduler"))]
    #[test]
    fn round_robin_cycles_every_worker() {
        let scheduler = Scheduler::new(4);
        let picks: Vec<usize> = (0..8).map(|_| scheduler.next_worker()).collect();
        assert_eq!(picks, vec![0, 1, 2, 3, 0, 1, 2, 3]);
    }

    #[cfg(feature = "waterwheel-scheduler")]
    #[test]
    fn waterwheel_stays_in_range_and_spreads() {
        let scheduler = Scheduler::new(4);
        let mut seen = [false; 4];
        for _ in 0..10_000 {
            let pick = scheduler.next_worker();
            assert!(pick < 4);
            seen[pick] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }
}
