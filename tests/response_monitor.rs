use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::thread;
use std::time::{Duration, Instant};

use trialrig::config::MonitorConfig;
use trialrig::core::sign::Sign;
use trialrig::core::timebase::SessionClock;
use trialrig::hardware::{HardwareBridge, ResponseEvent};
use trialrig::hardware::monitor::{MonitorError, ResponseMonitor, WaitOutcome};
use trialrig::hardware::sim::SimulatedBridge;

fn spawn(bridge: &Arc<SimulatedBridge>) -> ResponseMonitor {
    let bridge: Arc<dyn HardwareBridge> = Arc::clone(bridge) as Arc<dyn HardwareBridge>;
    ResponseMonitor::spawn(
        bridge,
        &MonitorConfig::default(),
        SessionClock::start(),
        Arc::new(AtomicBool::new(false)),
        None,
    )
    .unwrap()
}

#[test]
fn arming_twice_is_a_protocol_error() {
    let bridge = Arc::new(SimulatedBridge::new());
    let monitor = spawn(&bridge);
    let armed = monitor.arm(&[Sign::Left]).unwrap();
    assert!(matches!(
        monitor.arm(&[Sign::Right]),
        Err(MonitorError::AlreadyArmed)
    ));
    let out = monitor
        .wait(armed, Instant::now() + Duration::from_millis(10))
        .unwrap();
    assert!(matches!(out, WaitOutcome::TimedOut { .. }));
    // closed again after the wait
    assert!(monitor.arm(&[Sign::Right]).is_ok());
}

#[test]
fn deadline_releases_with_no_response() {
    let bridge = Arc::new(SimulatedBridge::new());
    let monitor = spawn(&bridge);
    let out = monitor
        .arm_and_wait(&[Sign::Left, Sign::Right], Instant::now() + Duration::from_millis(40))
        .unwrap();
    match out {
        WaitOutcome::TimedOut { elapsed } => assert!(elapsed >= Duration::from_millis(40)),
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(out.side(), None);
}

#[test]
fn first_accepted_response_is_latched() {
    let bridge = Arc::new(SimulatedBridge::new());
    let monitor = spawn(&bridge);
    let b = Arc::clone(&bridge);
    let feeder = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        b.inject(Sign::Left);
        b.inject(Sign::Right);
    });
    let out = monitor
        .arm_and_wait(&[Sign::Left, Sign::Right], Instant::now() + Duration::from_secs(2))
        .unwrap();
    feeder.join().unwrap();
    assert_eq!(out.side(), Some(Sign::Left));
}

#[test]
fn events_from_before_arming_do_not_count() {
    let bridge = Arc::new(SimulatedBridge::new());
    let stale = ResponseEvent {
        side: Sign::Right,
        timestamp: Instant::now(),
    };
    thread::sleep(Duration::from_millis(5));
    let monitor = spawn(&bridge);
    let armed = monitor.arm(&[Sign::Right]).unwrap();
    bridge.inject_event(stale);
    let out = monitor
        .wait(armed, Instant::now() + Duration::from_millis(40))
        .unwrap();
    assert!(matches!(out, WaitOutcome::TimedOut { .. }));
}
