use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::MonitorConfig;
use crate::core::sign::Sign;
use crate::core::timebase::{Seconds, SessionClock};
use crate::hardware::{HardwareBridge, ResponseEvent, lock};

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("response window armed while another is outstanding")]
    AlreadyArmed,
    #[error("response monitor thread is not running")]
    Stopped,
    #[error("failed to spawn response monitor: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Hardware event as written to the response log.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoggedEvent {
    pub side: Sign,
    pub time: Seconds,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WaitOutcome {
    /// A qualifying event was latched.
    Responded {
        side: Sign,
        at: Seconds,
        elapsed: Duration,
    },
    TimedOut {
        elapsed: Duration,
    },
    /// The session stop flag was raised while waiting.
    Interrupted {
        elapsed: Duration,
    },
}

impl WaitOutcome {
    pub fn side(&self) -> Option<Sign> {
        match self {
            WaitOutcome::Responded { side, .. } => Some(*side),
            _ => None,
        }
    }
}

struct ArmedWindow {
    id: u64,
    accepted: Vec<Sign>,
    armed_at: Instant,
    tx: Sender<ResponseEvent>,
}

struct Shared {
    armed: Mutex<Option<ArmedWindow>>,
    recent: Mutex<VecDeque<LoggedEvent>>,
    running: AtomicBool,
    next_window: AtomicU64,
}

/// Receiving end of an armed window; hand it to [`ResponseMonitor::wait`].
/// Dropping it closes the window.
pub struct Armed {
    shared: Arc<Shared>,
    id: u64,
    rx: Receiver<ResponseEvent>,
    armed_at: Instant,
}

impl Drop for Armed {
    fn drop(&mut self) {
        let mut slot = lock(&self.shared.armed);
        if slot.as_ref().is_some_and(|w| w.id == self.id) {
            *slot = None;
        }
    }
}

/// Polls the bridge on its own thread and latches the first event that
/// matches the armed window. At most one window is armed at a time.
pub struct ResponseMonitor {
    shared: Arc<Shared>,
    stop: Arc<AtomicBool>,
    clock: SessionClock,
    wait_slice: Duration,
    handle: Option<JoinHandle<()>>,
}

impl ResponseMonitor {
    pub fn spawn(
        bridge: Arc<dyn HardwareBridge>,
        cfg: &MonitorConfig,
        clock: SessionClock,
        stop: Arc<AtomicBool>,
        log_tx: Option<Sender<LoggedEvent>>,
    ) -> Result<Self, MonitorError> {
        let shared = Arc::new(Shared {
            armed: Mutex::new(None),
            recent: Mutex::new(VecDeque::with_capacity(cfg.recent_capacity)),
            running: AtomicBool::new(true),
            next_window: AtomicU64::new(0),
        });
        let poll = Duration::from_millis(cfg.poll_interval_ms.max(1));
        let capacity = cfg.recent_capacity;
        let shared_for_thread = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("response-monitor".into())
            .spawn(move || {
                poll_loop(bridge, shared_for_thread, clock, poll, capacity, log_tx)
            })?;
        Ok(Self {
            shared,
            stop,
            clock,
            wait_slice: Duration::from_millis(cfg.wait_slice_ms.max(1)),
            handle: Some(handle),
        })
    }

    /// Open a window for `accepted`. Fails if one is already open.
    pub fn arm(&self, accepted: &[Sign]) -> Result<Armed, MonitorError> {
        if !self.shared.running.load(Ordering::SeqCst) {
            return Err(MonitorError::Stopped);
        }
        let mut armed = lock(&self.shared.armed);
        if armed.is_some() {
            return Err(MonitorError::AlreadyArmed);
        }
        let (tx, rx) = bounded(1);
        let armed_at = Instant::now();
        let id = self.shared.next_window.fetch_add(1, Ordering::Relaxed);
        *armed = Some(ArmedWindow {
            id,
            accepted: accepted.to_vec(),
            armed_at,
            tx,
        });
        Ok(Armed {
            shared: Arc::clone(&self.shared),
            id,
            rx,
            armed_at,
        })
    }

    /// Block until a response, `deadline`, or the stop flag; whichever is
    /// first. The window is closed on return.
    pub fn wait(&self, armed: Armed, deadline: Instant) -> Result<WaitOutcome, MonitorError> {
        loop {
            let now = Instant::now();
            let slice = deadline.saturating_duration_since(now).min(self.wait_slice);
            match armed.rx.recv_timeout(slice) {
                Ok(ev) => return Ok(self.responded(&armed, ev)),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    // The window was taken without a send: monitor shut down.
                    return Err(MonitorError::Stopped);
                }
            }

            if self.stop.load(Ordering::SeqCst) {
                if let Some(ev) = self.close(&armed) {
                    return Ok(self.responded(&armed, ev));
                }
                return Ok(WaitOutcome::Interrupted {
                    elapsed: armed.armed_at.elapsed(),
                });
            }
            if Instant::now() >= deadline {
                if let Some(ev) = self.close(&armed) {
                    return Ok(self.responded(&armed, ev));
                }
                return Ok(WaitOutcome::TimedOut {
                    elapsed: armed.armed_at.elapsed(),
                });
            }
        }
    }

    pub fn arm_and_wait(
        &self,
        accepted: &[Sign],
        deadline: Instant,
    ) -> Result<WaitOutcome, MonitorError> {
        let armed = self.arm(accepted)?;
        self.wait(armed, deadline)
    }

    /// Close the window. Returns an event that was latched before the lock
    /// was taken, so a response racing the deadline is not lost.
    fn close(&self, armed: &Armed) -> Option<ResponseEvent> {
        let mut slot = lock(&self.shared.armed);
        if slot.as_ref().is_some_and(|w| w.id == armed.id) {
            *slot = None;
            None
        } else {
            drop(slot);
            armed.rx.try_recv().ok()
        }
    }

    fn responded(&self, armed: &Armed, ev: ResponseEvent) -> WaitOutcome {
        WaitOutcome::Responded {
            side: ev.side,
            at: self.clock.instant_to_sec(ev.timestamp),
            elapsed: ev.timestamp.saturating_duration_since(armed.armed_at),
        }
    }

    pub fn is_armed(&self) -> bool {
        lock(&self.shared.armed).is_some()
    }

    /// Events seen recently, oldest first.
    pub fn recent(&self) -> Vec<LoggedEvent> {
        lock(&self.shared.recent).iter().copied().collect()
    }

    pub fn shutdown(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ResponseMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn poll_loop(
    bridge: Arc<dyn HardwareBridge>,
    shared: Arc<Shared>,
    clock: SessionClock,
    poll: Duration,
    recent_capacity: usize,
    log_tx: Option<Sender<LoggedEvent>>,
) {
    debug!(target: "monitor", "response monitor started");
    while shared.running.load(Ordering::SeqCst) {
        let mut drained = false;
        while let Some(ev) = bridge.read_event() {
            drained = true;
            let logged = LoggedEvent {
                side: ev.side,
                time: clock.instant_to_sec(ev.timestamp),
            };
            {
                let mut recent = lock(&shared.recent);
                if recent_capacity > 0 {
                    if recent.len() == recent_capacity {
                        recent.pop_front();
                    }
                    recent.push_back(logged);
                }
            }
            if let Some(tx) = &log_tx {
                match tx.try_send(logged) {
                    Ok(()) | Err(TrySendError::Disconnected(_)) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!(target: "monitor", "response log full; event dropped")
                    }
                }
            }

            let mut armed = lock(&shared.armed);
            let qualifies = armed
                .as_ref()
                .is_some_and(|w| ev.timestamp >= w.armed_at && w.accepted.contains(&ev.side));
            if qualifies {
                if let Some(window) = armed.take() {
                    let _ = window.tx.try_send(ev);
                }
            }
        }
        if !drained {
            thread::sleep(poll);
        }
    }
    // Wake any waiter: dropping the sender disconnects its receiver.
    lock(&shared.armed).take();
    debug!(target: "monitor", "response monitor stopped");
}
