//! Plan Loading Integration Tests
//!
//! The shipped production plan and plan-file features: circle expansion,
//! per-step overrides and validation errors.

use std::path::Path;

use cinchseal::domain::{Motion, SafeMove, SequencePlan};

fn production_plan() -> SequencePlan {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("plans/cinchseal.yaml");
    SequencePlan::from_file(&path).unwrap()
}

#[test]
fn test_production_plan_shape() {
    let plan = production_plan();

    assert_eq!(plan.name(), "cinchseal");
    assert_eq!(plan.len(), 32);
    assert_eq!(plan.home_speed(), 1000.0);
    assert_eq!(plan.home_accel(), 400.0);

    match plan.safe_move() {
        SafeMove::Path { poses, .. } => assert_eq!(poses.len(), 16),
        other => panic!("expected a path safe move, got {:?}", other),
    }
}

#[test]
fn test_production_wipes_are_consistent() {
    let plan = production_plan();

    for pair in plan.steps().chunks(2) {
        let (position, wipe) = (&pair[0], &pair[1]);

        let pin = match &position.motion {
            Motion::MoveTo { pose } => *pose,
            other => panic!("expected move_to, got {:?}", other),
        };
        assert!(!position.wait);
        assert_eq!(position.dwell_ms, 1000);

        match &wipe.motion {
            Motion::ArcThrough { via, to, percent } => {
                assert!(wipe.wait);
                assert_eq!(*percent, 100.0);
                // Every wipe passes 50mm beyond its pin, 3.5mm either side
                assert!((via.y - pin.y - 50.0).abs() < 1e-6);
                assert!((to.y - pin.y - 50.0).abs() < 1e-6);
                assert!((via.x - pin.x - 3.5).abs() < 1e-6);
                assert!((pin.x - to.x - 3.5).abs() < 1e-6);
                assert_eq!(via.z, pin.z);
            }
            other => panic!("expected arc_through, got {:?}", other),
        }
    }
}

#[test]
fn test_production_fingerprint_is_stable() {
    let a = production_plan().fingerprint();
    let b = production_plan().fingerprint();

    assert_eq!(a, b);
    assert_eq!(a.len(), 16);
}

#[test]
fn test_circle_step_expands_to_arc() {
    let yaml = r#"
name: circle_demo
speed: 150
accel: 1000
steps:
  - type: circle
    label: wipe
    start: [378.0, 254.0, -9.9, -180.0, 0.0, -29.9]
    diameter: 100
    speed: 80
"#;

    let plan = SequencePlan::from_yaml(yaml).unwrap();
    let step = &plan.steps()[0];

    assert_eq!(step.speed, 80.0);
    assert_eq!(step.accel, 1000.0);
    match &step.motion {
        Motion::ArcThrough { via, to, .. } => {
            assert_eq!((via.x, via.y), (428.0, 204.0));
            assert_eq!((to.x, to.y), (328.0, 204.0));
            assert_eq!(via.z, -9.9);
        }
        other => panic!("expected arc_through, got {:?}", other),
    }
}

#[test]
fn test_invalid_plans_rejected() {
    let no_steps = "name: empty\nsteps: []\n";
    assert!(SequencePlan::from_yaml(no_steps).is_err());

    let zero_speed = r#"
name: bad
steps:
  - type: move_to
    pose: [0, 0, 400, 180, 0, 0]
    speed: 0
"#;
    let err = SequencePlan::from_yaml(zero_speed).unwrap_err();
    assert!(err.to_string().contains("speed"));

    let degenerate = r#"
name: bad
steps:
  - type: arc_through
    via: [1, 2, 400, 180, 0, 0]
    to: [1, 2, 400, 180, 0, 0]
"#;
    assert!(SequencePlan::from_yaml(degenerate).is_err());
}
