use std::time::{Duration, Instant};

/// Seconds since the session clock was started.
pub type Seconds = f64;

/// Monotonic session clock shared by every component that timestamps events.
#[derive(Clone, Copy, Debug)]
pub struct SessionClock {
    origin: Instant,
}

impl SessionClock {
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn origin(&self) -> Instant {
        self.origin
    }

    pub fn now(&self) -> Seconds {
        self.origin.elapsed().as_secs_f64()
    }

    pub fn instant_to_sec(&self, t: Instant) -> Seconds {
        t.saturating_duration_since(self.origin).as_secs_f64()
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::start()
    }
}

pub fn sec_to_duration(s: Seconds) -> Duration {
    if !s.is_finite() || s <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(s)
}

/// Fixed-rate frame pacing against absolute deadlines.
///
/// Each tick advances the deadline by exactly one interval, so sleep jitter
/// does not accumulate. When the caller falls more than one interval behind,
/// the schedule is re-anchored to now instead of bursting to catch up.
#[derive(Debug)]
pub struct FrameTicker {
    interval: Duration,
    next_deadline: Instant,
    frames: u64,
    late_frames: u64,
}

impl FrameTicker {
    pub fn new(frame_rate: f64) -> Self {
        let rate = if frame_rate.is_finite() && frame_rate > 0.0 {
            frame_rate
        } else {
            60.0
        };
        let interval = Duration::from_secs_f64(1.0 / rate);
        Self {
            interval,
            next_deadline: Instant::now() + interval,
            frames: 0,
            late_frames: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn late_frames(&self) -> u64 {
        self.late_frames
    }

    /// Block until the current frame's deadline and schedule the next one.
    pub fn tick(&mut self) {
        let now = Instant::now();
        if now < self.next_deadline {
            std::thread::sleep(self.next_deadline - now);
            self.next_deadline += self.interval;
        } else if now - self.next_deadline > self.interval {
            self.late_frames += 1;
            self.next_deadline = now + self.interval;
        } else {
            self.next_deadline += self.interval;
        }
        self.frames += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sec_to_duration_rejects_negative_and_nan() {
        assert_eq!(sec_to_duration(-1.0), Duration::ZERO);
        assert_eq!(sec_to_duration(f64::NAN), Duration::ZERO);
        assert_eq!(sec_to_duration(0.25), Duration::from_millis(250));
    }

    #[test]
    fn ticker_does_not_drift() {
        let mut ticker = FrameTicker::new(200.0);
        let start = Instant::now();
        for _ in 0..40 {
            ticker.tick();
        }
        let elapsed = start.elapsed().as_secs_f64();
        // 40 frames at 5 ms; allow scheduler slack but no per-frame accumulation.
        assert!(elapsed >= 0.195, "elapsed={elapsed}");
        assert!(elapsed < 0.6, "elapsed={elapsed}");
        assert_eq!(ticker.frames(), 40);
    }

    #[test]
    fn clock_is_monotonic() {
        let clock = SessionClock::start();
        let a = clock.now();
        std::thread::sleep(Duration::from_millis(2));
        let b = clock.now();
        assert!(b > a);
        assert!(clock.instant_to_sec(clock.origin()) == 0.0);
    }
}
