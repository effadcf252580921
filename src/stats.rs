use std::time::{Duration, Instant};

/// Running tally of exchanges for a CLI session.
#[derive(Debug, Clone)]
pub struct Stats {
    pub sent: u64,
    pub acked: u64,
    pub unexpected: u64,
    pub failed: u64,
    rtt_total: Duration,
    rtt_max: Duration,
    t0: Instant,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Self {
            sent: 0,
            acked: 0,
            unexpected: 0,
            failed: 0,
            rtt_total: Duration::ZERO,
            rtt_max: Duration::ZERO,
            t0: Instant::now(),
        }
    }
    pub fn inc_sent(&mut self) {
        self.sent += 1;
    }
    pub fn inc_failed(&mut self) {
        self.failed += 1;
    }
    pub fn inc_unexpected(&mut self) {
        self.unexpected += 1;
    }
    pub fn add_ack(&mut self, rtt: Duration) {
        self.acked += 1;
        self.rtt_total += rtt;
        self.rtt_max = self.rtt_max.max(rtt);
    }

    pub fn mean_rtt(&self) -> Option<Duration> {
        u32::try_from(self.acked)
            .ok()
            .filter(|&n| n > 0)
            .map(|n| self.rtt_total / n)
    }

    pub fn max_rtt(&self) -> Duration {
        self.rtt_max
    }

    pub fn summary(&self) -> String {
        let mean_ms = self
            .mean_rtt()
            .map(|d| format!("{:.1}", d.as_secs_f64() * 1000.0))
            .unwrap_or_else(|| "-".into());
        format!(
            "sent={} acked={} unexpected={} failed={} rtt_mean={}ms rtt_max={:.1}ms over {:.1}s",
            self.sent,
            self.acked,
            self.unexpected,
            self.failed,
            mean_ms,
            self.rtt_max.as_secs_f64() * 1000.0,
            self.t0.elapsed().as_secs_f64(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtt_mean_and_max() {
        let mut s = Stats::new();
        assert_eq!(s.mean_rtt(), None);
        s.inc_sent();
        s.add_ack(Duration::from_millis(10));
        s.inc_sent();
        s.add_ack(Duration::from_millis(30));
        assert_eq!(s.mean_rtt(), Some(Duration::from_millis(20)));
        assert_eq!(s.max_rtt(), Duration::from_millis(30));
        assert!(s.summary().starts_with("sent=2 acked=2 unexpected=0 failed=0 rtt_mean=20.0ms"));
    }
}
