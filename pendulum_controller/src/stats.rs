//! Update-loop latency statistics.
//!
//! Recording is O(1) and never allocates, so it is safe to call from the
//! timer callback. The histogram has fixed-width bins; samples beyond the
//! last bin are counted in an overflow bucket.

use std::io::{self, Write};

/// Width of one histogram bin [ns].
pub const HISTOGRAM_BIN_NS: i64 = 10_000;

/// Number of regular histogram bins (covers 0..640 µs).
pub const HISTOGRAM_BINS: usize = 64;

/// Number of worst samples kept.
pub const TOP_N: usize = 10;

/// Wake-up latency statistics for a periodic callback.
#[derive(Debug, Clone)]
pub struct LatencyStats {
    /// Samples recorded.
    pub count: u64,
    /// Most recent latency [ns].
    pub last_ns: i64,
    pub min_ns: i64,
    pub max_ns: i64,
    sum_ns: i64,
    sum_sq_ns: i128,
    /// Callbacks that started after their deadline.
    pub missed_deadlines: u64,
    /// Periods skipped entirely because the loop fell behind.
    pub skipped_periods: u64,
    histogram: [u64; HISTOGRAM_BINS],
    overflow: u64,
    /// Worst samples, descending.
    top: heapless::Vec<i64, TOP_N>,
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyStats {
    pub const fn new() -> Self {
        Self {
            count: 0,
            last_ns: 0,
            min_ns: i64::MAX,
            max_ns: 0,
            sum_ns: 0,
            sum_sq_ns: 0,
            missed_deadlines: 0,
            skipped_periods: 0,
            histogram: [0; HISTOGRAM_BINS],
            overflow: 0,
            top: heapless::Vec::new(),
        }
    }

    /// Record one sample. `deadline_ns` of 0 disables deadline accounting.
    #[inline]
    pub fn record(&mut self, latency_ns: i64, deadline_ns: i64, skipped: u64) {
        let latency_ns = latency_ns.max(0);
        self.count += 1;
        self.last_ns = latency_ns;
        self.min_ns = self.min_ns.min(latency_ns);
        self.max_ns = self.max_ns.max(latency_ns);
        self.sum_ns = self.sum_ns.saturating_add(latency_ns);
        self.sum_sq_ns += (latency_ns as i128) * (latency_ns as i128);
        self.skipped_periods += skipped;
        if deadline_ns > 0 && latency_ns > deadline_ns {
            self.missed_deadlines += 1;
        }

        let bin = (latency_ns / HISTOGRAM_BIN_NS) as usize;
        match self.histogram.get_mut(bin) {
            Some(slot) => *slot += 1,
            None => self.overflow += 1,
        }
        self.insert_top(latency_ns);
    }

    fn insert_top(&mut self, latency_ns: i64) {
        let pos = self.top.iter().position(|&v| latency_ns > v);
        match pos {
            Some(pos) => {
                if self.top.is_full() {
                    self.top.pop();
                }
                // Cannot fail: one slot was freed above if needed.
                let _ = self.top.insert(pos, latency_ns);
            }
            None => {
                let _ = self.top.push(latency_ns);
            }
        }
    }

    /// Average latency [ns] (0 if empty).
    #[inline]
    pub fn avg_ns(&self) -> i64 {
        if self.count == 0 {
            0
        } else {
            self.sum_ns / self.count as i64
        }
    }

    /// Population standard deviation [ns] (0 if empty).
    pub fn stddev_ns(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let n = self.count as f64;
        let mean = self.sum_ns as f64 / n;
        let var = self.sum_sq_ns as f64 / n - mean * mean;
        var.max(0.0).sqrt()
    }

    /// Smallest sample, or 0 if empty.
    #[inline]
    pub fn min_or_zero(&self) -> i64 {
        if self.count == 0 { 0 } else { self.min_ns }
    }

    pub fn histogram(&self) -> &[u64; HISTOGRAM_BINS] {
        &self.histogram
    }

    pub fn overflow(&self) -> u64 {
        self.overflow
    }

    pub fn top(&self) -> &[i64] {
        &self.top
    }

    /// Write summary, top-N and histogram as CSV.
    pub fn write_csv<W: Write>(&self, mut out: W) -> io::Result<()> {
        writeln!(out, "metric,value")?;
        writeln!(out, "count,{}", self.count)?;
        writeln!(out, "min_ns,{}", self.min_or_zero())?;
        writeln!(out, "max_ns,{}", self.max_ns)?;
        writeln!(out, "avg_ns,{}", self.avg_ns())?;
        writeln!(out, "stddev_ns,{:.1}", self.stddev_ns())?;
        writeln!(out, "missed_deadlines,{}", self.missed_deadlines)?;
        writeln!(out, "skipped_periods,{}", self.skipped_periods)?;
        writeln!(out)?;

        writeln!(out, "rank,latency_ns")?;
        for (rank, v) in self.top.iter().enumerate() {
            writeln!(out, "{},{v}", rank + 1)?;
        }
        writeln!(out)?;

        writeln!(out, "bin_start_ns,count")?;
        for (i, n) in self.histogram.iter().enumerate().filter(|(_, n)| **n > 0) {
            writeln!(out, "{},{n}", i as i64 * HISTOGRAM_BIN_NS)?;
        }
        if self.overflow > 0 {
            writeln!(
                out,
                "{}+,{}",
                HISTOGRAM_BINS as i64 * HISTOGRAM_BIN_NS,
                self.overflow
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_stats() {
        let s = LatencyStats::new();
        assert_eq!(s.avg_ns(), 0);
        assert_eq!(s.min_or_zero(), 0);
        assert_eq!(s.stddev_ns(), 0.0);
        assert!(s.top().is_empty());
    }

    #[test]
    fn min_max_avg() {
        let mut s = LatencyStats::new();
        for v in [1_000, 3_000, 2_000] {
            s.record(v, 0, 0);
        }
        assert_eq!(s.count, 3);
        assert_eq!(s.min_ns, 1_000);
        assert_eq!(s.max_ns, 3_000);
        assert_eq!(s.avg_ns(), 2_000);
        assert_eq!(s.last_ns, 2_000);
        assert!((s.stddev_ns() - 816.5).abs() < 1.0);
    }

    #[test]
    fn deadlines_and_skips() {
        let mut s = LatencyStats::new();
        s.record(500, 1_000, 0);
        s.record(1_500, 1_000, 2);
        assert_eq!(s.missed_deadlines, 1);
        assert_eq!(s.skipped_periods, 2);
    }

    #[test]
    fn top_keeps_worst_descending() {
        let mut s = LatencyStats::new();
        for v in 0..100 {
            s.record(v * 10, 0, 0);
        }
        assert_eq!(s.top().len(), TOP_N);
        assert_eq!(s.top()[0], 990);
        assert_eq!(s.top()[TOP_N - 1], 900);
    }

    #[test]
    fn histogram_bins_and_overflow() {
        let mut s = LatencyStats::new();
        s.record(5_000, 0, 0);
        s.record(15_000, 0, 0);
        s.record(HISTOGRAM_BINS as i64 * HISTOGRAM_BIN_NS, 0, 0);
        assert_eq!(s.histogram()[0], 1);
        assert_eq!(s.histogram()[1], 1);
        assert_eq!(s.overflow(), 1);
    }

    #[test]
    fn csv_contains_sections() {
        let mut s = LatencyStats::new();
        s.record(12_000, 10_000, 0);
        let mut buf = Vec::new();
        s.write_csv(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("count,1"));
        assert!(text.contains("missed_deadlines,1"));
        assert!(text.contains("1,12000"));
        assert!(text.contains("10000,1"));
    }
}
