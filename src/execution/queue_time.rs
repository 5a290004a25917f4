//! Connection-acquisition wait samples, for diagnostics only.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Ring buffer of the most recent acquisition waits.
#[derive(Debug)]
pub struct QueueTimeSampler {
    capacity: usize,
    samples: Mutex<VecDeque<Duration>>,
}

impl QueueTimeSampler {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn record(&self, waited: Duration) {
        if self.capacity == 0 {
            return;
        }
        let mut samples = self.samples.lock().expect("queue time mutex poisoned");
        if samples.len() == self.capacity {
            samples.pop_front();
        }
        samples.push_back(waited);
    }

    /// Samples from oldest to newest.
    pub fn samples(&self) -> Vec<Duration> {
        self.samples
            .lock()
            .expect("queue time mutex poisoned")
            .iter()
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_most_recent() {
        let sampler = QueueTimeSampler::new(3);
        for ms in 1..=5 {
            sampler.record(Duration::from_millis(ms));
        }
        assert_eq!(
            sampler.samples(),
            vec![
                Duration::from_millis(3),
                Duration::from_millis(4),
                Duration::from_millis(5)
            ]
        );
    }

    #[test]
    fn zero_capacity_records_nothing() {
        let sampler = QueueTimeSampler::new(0);
        sampler.record(Duration::from_millis(1));
        assert!(sampler.samples().is_empty());
    }
}
