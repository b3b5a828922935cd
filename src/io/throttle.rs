use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::core::config::ThrottleConfig;

/// Aggregate I/O counters for one index, shared across its readers
/// and writers.
#[derive(Default)]
pub struct IoStats {
    pub read_ops: AtomicU64,
    pub read_bytes: AtomicU64,
    pub read_time_us: AtomicU64,
    pub write_ops: AtomicU64,
    pub write_bytes: AtomicU64,
    pub write_time_us: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IoStatsSnapshot {
    pub read_ops: u64,
    pub read_bytes: u64,
    pub read_time_us: u64,
    pub write_ops: u64,
    pub write_bytes: u64,
    pub write_time_us: u64,
}

impl IoStats {
    pub fn record_read(&self, bytes: u64, elapsed: Duration) {
        self.read_ops.fetch_add(1, Ordering::Relaxed);
        self.read_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.read_time_us.fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_write(&self, bytes: u64, elapsed: Duration) {
        self.write_ops.fetch_add(1, Ordering::Relaxed);
        self.write_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.write_time_us.fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IoStatsSnapshot {
        IoStatsSnapshot {
            read_ops: self.read_ops.load(Ordering::Relaxed),
            read_bytes: self.read_bytes.load(Ordering::Relaxed),
            read_time_us: self.read_time_us.load(Ordering::Relaxed),
            write_ops: self.write_ops.load(Ordering::Relaxed),
            write_bytes: self.write_bytes.load(Ordering::Relaxed),
            write_time_us: self.write_time_us.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.read_ops.store(0, Ordering::Relaxed);
        self.read_bytes.store(0, Ordering::Relaxed);
        self.read_time_us.store(0, Ordering::Relaxed);
        self.write_ops.store(0, Ordering::Relaxed);
        self.write_bytes.store(0, Ordering::Relaxed);
        self.write_time_us.store(0, Ordering::Relaxed);
    }
}

/// Paces individual I/O calls to stay under the configured ops/s and
/// bytes/s caps. Sleeping here is the only suspension point of the
/// read/write path.
pub struct Throttle {
    pub config: ThrottleConfig,
    pub stats: Arc<IoStats>,
    last_op: Option<Instant>,
}

impl Throttle {
    pub fn new(config: ThrottleConfig, stats: Arc<IoStats>) -> Self {
        Throttle { config, stats, last_op: None }
    }

    /// Largest single I/O the caller may issue; bigger requests must
    /// be chunked so the byte cap stays accurate.
    pub fn chunk_size(&self) -> usize {
        if self.config.max_iosize > 0 {
            self.config.max_iosize as usize
        } else {
            usize::MAX
        }
    }

    /// Sleep long enough that this op keeps the rates under the caps.
    pub fn pace(&mut self, bytes: usize) {
        let mut min_gap = Duration::ZERO;
        if self.config.max_iops > 0 {
            min_gap = Duration::from_secs(1) / self.config.max_iops;
        }
        if self.config.max_iosize > 0 && bytes > 0 {
            let byte_gap = Duration::from_secs_f64(bytes as f64 / self.config.max_iosize as f64);
            if byte_gap > min_gap {
                min_gap = byte_gap;
            }
        }
        if min_gap.is_zero() {
            self.last_op = Some(Instant::now());
            return;
        }
        if let Some(last) = self.last_op {
            let elapsed = last.elapsed();
            if elapsed < min_gap {
                std::thread::sleep(min_gap - elapsed);
            }
        }
        self.last_op = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unthrottled_never_sleeps() {
        let stats = Arc::new(IoStats::default());
        let mut throttle = Throttle::new(ThrottleConfig::default(), stats);
        let start = Instant::now();
        for _ in 0..1000 {
            throttle.pace(4096);
        }
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(throttle.chunk_size(), usize::MAX);
    }

    #[test]
    fn test_iops_cap_spaces_ops() {
        let stats = Arc::new(IoStats::default());
        let config = ThrottleConfig { max_iops: 100, max_iosize: 0 };
        let mut throttle = Throttle::new(config, stats);
        let start = Instant::now();
        for _ in 0..5 {
            throttle.pace(1);
        }
        // Four 10ms gaps after the first op
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_stats_accumulate() {
        let stats = IoStats::default();
        stats.record_read(100, Duration::from_micros(5));
        stats.record_read(50, Duration::from_micros(5));
        stats.record_write(10, Duration::from_micros(1));
        let snap = stats.snapshot();
        assert_eq!(snap.read_ops, 2);
        assert_eq!(snap.read_bytes, 150);
        assert_eq!(snap.write_ops, 1);
        stats.reset();
        assert_eq!(stats.snapshot(), IoStatsSnapshot::default());
    }
}
