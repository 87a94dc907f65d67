// src/scheduler.rs
//
// Capture scheduling as an explicit state machine. The async driver in
// the session owns the actual tokio interval; every tick lands in
// `on_tick`, which enforces single-in-flight backpressure. There is no
// queue — a busy tick is dropped and the system degrades to
// most-recent-snapshot semantics.

use tracing::debug;

/// Fixed delay between a tick firing and the frame grab, so we never
/// sample a frame mid-update.
pub const SETTLE_DELAY_MS: u64 = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickDecision {
    /// Grab a frame (after the settle delay) and submit it.
    Capture,
    /// A recognition request is still outstanding; tick dropped silently.
    DroppedBusy,
    /// No active frame source; tick dropped silently.
    DroppedNoSource,
    /// Scheduler is stopped.
    Idle,
}

pub struct CaptureScheduler {
    rate_fps: u32,
    running: bool,
    source_present: bool,
    in_flight: bool,

    total_ticks: u64,
    captures: u64,
    dropped_busy: u64,
    dropped_no_source: u64,
}

impl CaptureScheduler {
    pub fn new(rate_fps: u32) -> Self {
        Self {
            rate_fps: rate_fps.max(1),
            running: false,
            source_present: false,
            in_flight: false,
            total_ticks: 0,
            captures: 0,
            dropped_busy: 0,
            dropped_no_source: 0,
        }
    }

    /// Begin periodic capture at the given rate. No-op without an active
    /// frame source. Calling this while running replaces the interval
    /// without touching the in-flight flag.
    pub fn start(&mut self, rate_fps: u32) -> bool {
        if !self.source_present {
            debug!("start ignored — no active frame source");
            return false;
        }
        self.rate_fps = rate_fps.max(1);
        self.running = true;
        true
    }

    /// Cancel the capture timer. Idempotent. A request already in flight
    /// is not aborted.
    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn on_tick(&mut self) -> TickDecision {
        if !self.running {
            return TickDecision::Idle;
        }
        self.total_ticks += 1;
        if !self.source_present {
            self.dropped_no_source += 1;
            return TickDecision::DroppedNoSource;
        }
        if self.in_flight {
            self.dropped_busy += 1;
            return TickDecision::DroppedBusy;
        }
        self.in_flight = true;
        self.captures += 1;
        TickDecision::Capture
    }

    /// Release the backpressure flag. Called on every completed or
    /// failed request, including ones whose response is discarded.
    pub fn clear_in_flight(&mut self) {
        self.in_flight = false;
    }

    pub fn set_source_present(&mut self, present: bool) {
        self.source_present = present;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn interval_ms(&self) -> u64 {
        (1000 / self.rate_fps as u64).max(1)
    }

    pub fn rate_fps(&self) -> u32 {
        self.rate_fps
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            total_ticks: self.total_ticks,
            captures: self.captures,
            dropped_busy: self.dropped_busy,
            dropped_no_source: self.dropped_no_source,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerStats {
    pub total_ticks: u64,
    pub captures: u64,
    pub dropped_busy: u64,
    pub dropped_no_source: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_scheduler(rate: u32) -> CaptureScheduler {
        let mut s = CaptureScheduler::new(rate);
        s.set_source_present(true);
        assert!(s.start(rate));
        s
    }

    #[test]
    fn test_start_requires_source() {
        let mut s = CaptureScheduler::new(2);
        assert!(!s.start(2));
        assert!(!s.is_running());

        s.set_source_present(true);
        assert!(s.start(2));
        assert!(s.is_running());
    }

    #[test]
    fn test_interval_from_rate() {
        assert_eq!(running_scheduler(1).interval_ms(), 1000);
        assert_eq!(running_scheduler(2).interval_ms(), 500);
        assert_eq!(running_scheduler(10).interval_ms(), 100);
    }

    #[test]
    fn test_single_in_flight_backpressure() {
        let mut s = running_scheduler(5);

        assert_eq!(s.on_tick(), TickDecision::Capture);
        // Every subsequent tick is dropped until the request resolves,
        // regardless of how many fire.
        for _ in 0..20 {
            assert_eq!(s.on_tick(), TickDecision::DroppedBusy);
        }
        s.clear_in_flight();
        assert_eq!(s.on_tick(), TickDecision::Capture);

        let stats = s.stats();
        assert_eq!(stats.captures, 2);
        assert_eq!(stats.dropped_busy, 20);
    }

    #[test]
    fn test_restart_replaces_rate_and_keeps_in_flight() {
        let mut s = running_scheduler(2);
        assert_eq!(s.on_tick(), TickDecision::Capture);
        assert!(s.in_flight());

        assert!(s.start(8));
        assert_eq!(s.interval_ms(), 125);
        assert!(s.in_flight(), "restart must not lose the outstanding request");
        assert_eq!(s.on_tick(), TickDecision::DroppedBusy);
    }

    #[test]
    fn test_stop_is_idempotent_and_silences_ticks() {
        let mut s = running_scheduler(2);
        s.stop();
        s.stop();
        assert_eq!(s.on_tick(), TickDecision::Idle);
        assert_eq!(s.stats().total_ticks, 0);
    }

    #[test]
    fn test_tick_without_source_is_dropped() {
        let mut s = running_scheduler(2);
        s.set_source_present(false);
        assert_eq!(s.on_tick(), TickDecision::DroppedNoSource);
    }
}
