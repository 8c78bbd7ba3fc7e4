use crate::context::{InstanceContext, Normalizer, Resolution};
use crate::errors::AutomationError;

#[test]
fn reference_point_lands_on_scaled_device_pixel() {
    let normalizer = Normalizer::new(Resolution::new(1280, 720), Resolution::new(1920, 1080)).unwrap();
    assert_eq!(normalizer.normalize(640, 360), (960, 540));
    assert_eq!(normalizer.normalize(0, 0), (0, 0));
    assert_eq!(normalizer.normalize(1280, 720), (1920, 1080));
}

#[test]
fn equal_resolutions_are_identity() {
    let res = Resolution::new(1280, 720);
    let normalizer = Normalizer::new(res, res).unwrap();
    for x in (0..=1280).step_by(37) {
        for y in (0..=720).step_by(29) {
            assert_eq!(normalizer.normalize(x, y), (x, y));
        }
    }
}

#[test]
fn axes_scale_independently() {
    let normalizer = Normalizer::new(Resolution::new(1000, 1000), Resolution::new(2000, 500)).unwrap();
    assert_eq!(normalizer.normalize(100, 100), (200, 50));
    assert_eq!(normalizer.scale(), (2.0, 0.5));
}

#[test]
fn larger_actual_resolution_never_moves_points_backwards() {
    let reference = Resolution::new(1280, 720);
    let points = [(1, 1), (17, 5), (640, 360), (1279, 719)];
    for &(x, y) in &points {
        let mut previous = (0, 0);
        for width in (640..=3840).step_by(64) {
            let height = width * 9 / 16;
            let normalizer = Normalizer::new(reference, Resolution::new(width, height)).unwrap();
            let current = normalizer.normalize(x, y);
            assert!(current.0 >= previous.0 && current.1 >= previous.1);
            previous = current;
        }
        // Doubling the actual resolution strictly increases any non-zero point.
        let base = Normalizer::new(reference, Resolution::new(1280, 720)).unwrap();
        let doubled = Normalizer::new(reference, Resolution::new(2560, 1440)).unwrap();
        let (bx, by) = base.normalize(x, y);
        let (dx, dy) = doubled.normalize(x, y);
        assert!(dx > bx && dy > by);
    }
}

#[test]
fn zero_reference_dimension_is_rejected() {
    let result = Normalizer::new(Resolution::new(0, 720), Resolution::new(1920, 1080));
    assert!(matches!(result, Err(AutomationError::InvalidResolution(_))));
    let result = InstanceContext::new(1, Resolution::new(1280, 0), Resolution::new(1920, 1080), "pkg");
    assert!(matches!(result, Err(AutomationError::InvalidResolution(_))));
}

#[test]
fn real_points_bypass_normalization() {
    let context = InstanceContext::new(
        3,
        Resolution::new(1280, 720),
        Resolution::new(1920, 1080),
        "pkg",
    )
    .unwrap();
    assert_eq!(context.to_device(640, 360, true), (640, 360));
    assert_eq!(context.to_device(640, 360, false), (960, 540));
}
