//! Periodic display refresh driven by the deterministic device clock.

use tracing::trace;

use crate::compose::FrameReport;
use crate::display::DisplayConnector;
use crate::error::Result;
use crate::VgaDevice;

const NS_PER_MS: u64 = 1_000_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct RefreshTimer {
    interval_ms: u32,
    /// `None` while stopped.
    deadline_ns: Option<u64>,
}

impl RefreshTimer {
    /// A timer armed at `interval_ms` from clock zero, or stopped when `interval_ms` is zero.
    pub fn new(interval_ms: u32) -> Self {
        let mut timer = Self::default();
        timer.arm(interval_ms, 0);
        timer
    }

    pub fn arm(&mut self, interval_ms: u32, now_ns: u64) {
        self.interval_ms = interval_ms;
        self.deadline_ns = (interval_ms != 0).then(|| now_ns.saturating_add(self.interval_ns()));
    }

    pub fn interval_ms(&self) -> u32 {
        self.interval_ms
    }

    fn interval_ns(&self) -> u64 {
        u64::from(self.interval_ms) * NS_PER_MS
    }

    /// Consumes an expired deadline and schedules the next one.
    ///
    /// Deadlines missed by more than one period are dropped rather than replayed.
    pub fn expire(&mut self, now_ns: u64) -> bool {
        let Some(deadline) = self.deadline_ns else {
            return false;
        };
        if now_ns < deadline {
            return false;
        }
        let mut next = deadline.saturating_add(self.interval_ns());
        if next <= now_ns {
            next = now_ns.saturating_add(self.interval_ns());
        }
        self.deadline_ns = Some(next);
        true
    }
}

impl VgaDevice {
    /// Arms the refresh timer with a new period; zero stops it (event driven updates).
    pub fn set_refresh_interval(&mut self, interval_ms: u32) {
        trace!(interval_ms, "vga refresh interval");
        self.refresh.arm(interval_ms, self.clock_ns);
    }

    pub fn refresh_interval_ms(&self) -> u32 {
        self.refresh.interval_ms()
    }

    /// Composes a frame and notifies the connector if the refresh period has elapsed.
    pub fn poll_refresh(&mut self, conn: &mut dyn DisplayConnector) -> Result<Option<FrameReport>> {
        if !self.refresh.expire(self.clock_ns) {
            return Ok(None);
        }
        let report = self.compose_frame(conn, false)?;
        conn.refresh();
        Ok(Some(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopped_timer_never_fires() {
        let mut timer = RefreshTimer::new(0);
        assert!(!timer.expire(u64::MAX));
    }

    #[test]
    fn periodic_deadlines() {
        let mut timer = RefreshTimer::new(20);
        assert!(!timer.expire(19 * NS_PER_MS));
        assert!(timer.expire(20 * NS_PER_MS));
        assert!(!timer.expire(39 * NS_PER_MS));
        assert!(timer.expire(40 * NS_PER_MS));

        // A long stall fires once and re-arms relative to now.
        assert!(timer.expire(500 * NS_PER_MS));
        assert!(!timer.expire(519 * NS_PER_MS));
        assert!(timer.expire(520 * NS_PER_MS));
    }

    #[test]
    fn rearming_restarts_the_period() {
        let mut timer = RefreshTimer::new(10);
        timer.arm(50, 5 * NS_PER_MS);
        assert_eq!(timer.interval_ms(), 50);
        assert!(!timer.expire(54 * NS_PER_MS));
        assert!(timer.expire(55 * NS_PER_MS));
    }
}
