use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp};

use crate::core::sign::Sign;
use crate::hardware::{HardwareBridge, HardwareError, ResponseEvent, lock};

struct Licking {
    rng: StdRng,
    interval: Exp<f64>,
    next: Instant,
}

/// In-process stand-in for the rig.
///
/// Events come from [`SimulatedBridge::inject`] or, when a lick rate is set,
/// from a Poisson process with a random side per lick. Rewards and indicator
/// changes are recorded for inspection.
pub struct SimulatedBridge {
    pending: Mutex<VecDeque<ResponseEvent>>,
    licking: Mutex<Option<Licking>>,
    rewards: Mutex<Vec<(Sign, f64)>>,
    indicators: Mutex<Vec<(Sign, bool)>>,
    fail_writes: AtomicBool,
    refuse_connect: AtomicBool,
}

impl SimulatedBridge {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            licking: Mutex::new(None),
            rewards: Mutex::new(Vec::new()),
            indicators: Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
            refuse_connect: AtomicBool::new(false),
        }
    }

    /// Spontaneous licks at `rate_hz` on a random side.
    pub fn with_lick_rate(rate_hz: f64, seed: u64) -> Self {
        let bridge = Self::new();
        if !(rate_hz.is_finite() && rate_hz > 0.0) {
            return bridge;
        }
        if let Ok(interval) = Exp::new(rate_hz) {
            let mut rng = StdRng::seed_from_u64(seed);
            let first = interval.sample(&mut rng);
            *lock(&bridge.licking) = Some(Licking {
                rng,
                interval,
                next: Instant::now() + Duration::from_secs_f64(first),
            });
        }
        bridge
    }

    pub fn inject(&self, side: Sign) {
        lock(&self.pending).push_back(ResponseEvent::now(side));
    }

    pub fn inject_event(&self, event: ResponseEvent) {
        lock(&self.pending).push_back(event);
    }

    /// Make every subsequent reward and indicator write fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make the next `connect` fail, as an unplugged rig would.
    pub fn set_refuse_connect(&self, refuse: bool) {
        self.refuse_connect.store(refuse, Ordering::SeqCst);
    }

    pub fn rewards(&self) -> Vec<(Sign, f64)> {
        lock(&self.rewards).clone()
    }

    pub fn indicators(&self) -> Vec<(Sign, bool)> {
        lock(&self.indicators).clone()
    }

    fn spontaneous(&self) -> Option<ResponseEvent> {
        let mut guard = lock(&self.licking);
        let licking = guard.as_mut()?;
        let now = Instant::now();
        if now < licking.next {
            return None;
        }
        let side = if licking.rng.random::<bool>() {
            Sign::Right
        } else {
            Sign::Left
        };
        let event = ResponseEvent {
            side,
            timestamp: licking.next,
        };
        let gap = licking.interval.sample(&mut licking.rng);
        licking.next = now + Duration::from_secs_f64(gap.max(0.0));
        Some(event)
    }
}

impl Default for SimulatedBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareBridge for SimulatedBridge {
    fn connect(&self) -> Result<(), HardwareError> {
        if self.refuse_connect.load(Ordering::SeqCst) {
            return Err(HardwareError::Connect("simulated rig unplugged".into()));
        }
        Ok(())
    }

    fn read_event(&self) -> Option<ResponseEvent> {
        if let Some(ev) = lock(&self.pending).pop_front() {
            return Some(ev);
        }
        self.spontaneous()
    }

    fn deliver_reward(&self, side: Sign, volume_ul: f64) -> Result<(), HardwareError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(HardwareError::Write(format!("reward {volume_ul:.2} uL to {side}")));
        }
        lock(&self.rewards).push((side, volume_ul));
        Ok(())
    }

    fn set_indicator(&self, side: Sign, on: bool) -> Result<(), HardwareError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(HardwareError::Write(format!("indicator {side}")));
        }
        lock(&self.indicators).push((side, on));
        Ok(())
    }
}
