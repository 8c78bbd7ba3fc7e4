use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::support::{blank, pattern, FakeDevice, Workspace};
use crate::context::{InstanceContext, Resolution};
use crate::platforms::DeviceShell;
use crate::screen::ScreenCapture;
use crate::watchdog::{FreezeWatchdog, Health, WatchdogPhase, WatchdogState};

const STALENESS: Duration = Duration::from_secs(60);

#[test]
fn one_stall_is_reported_once() {
    let start = Instant::now();
    let hash = blake3::hash(b"frozen");
    let mut state = WatchdogState::new(start);

    assert!(!state.observe(hash, start, STALENESS));
    assert!(!state.observe(hash, start + Duration::from_secs(30), STALENESS));
    assert!(state.observe(hash, start + Duration::from_secs(61), STALENESS));
    assert_eq!(state.phase, WatchdogPhase::Stalled);

    // The stall clock restarted at 61s; the same frame is tolerated for a full
    // window again.
    for second in 62..=121 {
        assert!(!state.observe(hash, start + Duration::from_secs(second), STALENESS));
    }
    assert!(state.observe(hash, start + Duration::from_secs(122), STALENESS));
}

#[test]
fn changing_frames_keep_the_state_active() {
    let start = Instant::now();
    let mut state = WatchdogState::new(start);
    for second in 0..300u64 {
        let hash = blake3::hash(&second.to_le_bytes());
        assert!(!state.observe(hash, start + Duration::from_secs(second), STALENESS));
    }
    assert_eq!(state.phase, WatchdogPhase::Active);
}

#[test]
fn change_after_stall_returns_to_active() {
    let start = Instant::now();
    let mut state = WatchdogState::new(start);
    let frozen = blake3::hash(b"a");
    state.observe(frozen, start, STALENESS);
    assert!(state.observe(frozen, start + Duration::from_secs(61), STALENESS));
    assert!(!state.observe(blake3::hash(b"b"), start + Duration::from_secs(62), STALENESS));
    assert_eq!(state.phase, WatchdogPhase::Active);
}

#[tokio::test(start_paused = true)]
async fn frozen_screen_triggers_a_single_restart() {
    let workspace = Workspace::new();
    let device = FakeDevice::new(Resolution::new(160, 120), blank(160, 120, 90));
    let shell: Arc<dyn DeviceShell> = device.clone();
    let context = Arc::new(
        InstanceContext::new(
            7,
            Resolution::new(160, 120),
            Resolution::new(160, 120),
            "com.example.app",
        )
        .unwrap(),
    );
    let capture = ScreenCapture::new(shell.clone(), 7, workspace.screens(), workspace.errors());
    let mut watchdog = FreezeWatchdog::new(shell, context, capture, STALENESS);

    assert_eq!(watchdog.check_and_recover().await.unwrap(), Health::Healthy);
    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(watchdog.check_and_recover().await.unwrap(), Health::Restarted);
    assert_eq!(watchdog.phase(), WatchdogPhase::Stalled);
    assert_eq!(device.app_stops.load(Ordering::SeqCst), 1);
    assert_eq!(device.app_starts.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_secs(5)).await;
    assert_eq!(watchdog.check_and_recover().await.unwrap(), Health::Healthy);
    assert_eq!(device.app_stops.load(Ordering::SeqCst), 1);

    // The application renders again.
    device.set_frame(pattern(160, 120, 1));
    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(watchdog.check_and_recover().await.unwrap(), Health::Healthy);
    assert_eq!(watchdog.phase(), WatchdogPhase::Active);
    assert_eq!(device.app_starts.load(Ordering::SeqCst), 1);
}
