use super::*;
use crate::{
    desk::state::PhaseKind,
    ranging::runner::RunnerPhase,
    testing::{Plant, Rig},
};

fn is_in(kind: PhaseKind) -> impl Fn(&Rig) -> bool {
    move |rig| rig.desk.phase().kind() == kind
}

fn idle(rig: &Rig) -> bool {
    !rig.desk.is_moving()
}

fn assert_rests_at(rig: &Rig, target: u16) {
    assert_eq!(rig.desk.phase(), Phase::Idle);
    assert_eq!(rig.desk.stop_reason(), Some(StopReason::Reached));
    assert_eq!(rig.desk.moving_direction(), Direction::Stopped);
    assert_eq!(rig.plant().output, Direction::Stopped);
    assert!(!rig.ranging.is_held(Consumer::Desk));

    let height = rig.desk.current_height().unwrap();
    assert!(
        height.abs_diff(target) <= DESK_HEIGHT_TOLERANCE_MM,
        "stopped at {} mm, wanted {} mm",
        height,
        target
    );
}

#[test]
fn rejects_targets_outside_the_range() {
    let rig = Rig::new();

    assert_eq!(
        rig.desk.adjust_height(DESK_HEIGHT_MIN_MM - 1, "remote"),
        Err(DeskError::TargetOutOfRange {
            target: DESK_HEIGHT_MIN_MM - 1,
            min: DESK_HEIGHT_MIN_MM,
            max: DESK_HEIGHT_MAX_MM,
        })
    );
    assert!(rig.desk.adjust_height(DESK_HEIGHT_MAX_MM + 1, "remote").is_err());

    assert_eq!(rig.desk.phase(), Phase::Idle);
    assert_eq!(rig.desk.target(), None);
    assert!(!rig.ranging.has_demand());
    assert!(!rig.plant().energized());
}

#[test]
fn moves_up_to_target() {
    let mut rig = Rig::new();
    rig.desk.adjust_height(900, "remote").unwrap();
    assert_eq!(rig.desk.phase().kind(), PhaseKind::Locating);
    assert!(rig.ranging.is_held(Consumer::Desk));

    assert!(rig.run_until(1000, is_in(PhaseKind::CalibratingSpeed)));
    assert_eq!(rig.desk.moving_direction(), Direction::Up);

    assert!(rig.run_until(2000, is_in(PhaseKind::Moving)));
    let speed = rig.desk.speed().unwrap();
    assert!((30.0..=36.0).contains(&speed), "speed {}", speed);

    assert!(rig.run_until(20_000, idle));
    assert_rests_at(&rig, 900);
    assert!(!rig.plant().direct_reversal);

    let status = rig.desk.status();
    assert_eq!(status.phase, PhaseKind::Idle);
    assert_eq!(status.target, Some(900));
    assert_eq!(status.requester.as_str(), "remote");
    assert_eq!(rig.diagnostics.stop_reason().as_str(), "reached");
    assert!(rig.diagnostics.last_error().is_empty());
}

#[test]
fn moves_down_to_target() {
    let mut rig = Rig::with_plant(Plant::at(1000.0));
    rig.desk.adjust_height(700, "remote").unwrap();

    assert!(rig.run_until(2000, is_in(PhaseKind::CalibratingSpeed)));
    assert_eq!(rig.desk.moving_direction(), Direction::Down);

    assert!(rig.run_until(20_000, idle));
    assert_rests_at(&rig, 700);
}

#[test]
fn already_at_target_never_drives() {
    let mut rig = Rig::new();
    rig.desk.adjust_height(651, "remote").unwrap();

    assert!(rig.run_until(1000, idle));
    assert_eq!(rig.desk.stop_reason(), Some(StopReason::AlreadyAtTarget));
    assert!(!rig.plant().energized());
    assert!(!rig.ranging.is_held(Consumer::Desk));
}

#[test]
fn short_move_skips_calibration() {
    let mut rig = Rig::new();
    rig.desk.adjust_height(665, "remote").unwrap();

    let mut calibrated = false;
    assert!(rig.run_until(DESK_FINE_ADJUST_TIMEOUT_MS + 1000, |rig| {
        !matches!(rig.desk.phase(), Phase::Locating { .. })
    }));
    while rig.desk.is_moving() && rig.now_ms() < 60_000 {
        calibrated |= rig.desk.phase().kind() == PhaseKind::CalibratingSpeed;
        rig.step();
    }

    assert!(!calibrated);
    assert_eq!(rig.desk.speed(), None);
    assert_rests_at(&rig, 665);
}

#[test]
fn stop_while_calibrating() {
    let mut rig = Rig::new();
    rig.desk.adjust_height(900, "remote").unwrap();
    assert!(rig.run_until(1000, is_in(PhaseKind::CalibratingSpeed)));
    assert_eq!(rig.plant().output, Direction::Up);

    rig.desk.stop();
    assert_eq!(rig.desk.phase(), Phase::Idle);
    assert_eq!(rig.plant().output, Direction::Stopped);
    assert_eq!(rig.desk.stop_reason(), Some(StopReason::Requested));
    assert!(!rig.ranging.is_held(Consumer::Desk));

    let drives = rig.plant().drives.len();
    rig.desk.stop();
    rig.run_ms(100);
    assert_eq!(rig.desk.phase(), Phase::Idle);
    assert_eq!(rig.desk.stop_reason(), Some(StopReason::Requested));
    assert_eq!(rig.plant().output, Direction::Stopped);
    assert_eq!(rig.plant().drives.len(), drives + 1);
}

#[test]
fn stop_while_fine_adjusting() {
    let mut rig = Rig::new();
    rig.desk.adjust_height(900, "remote").unwrap();
    assert!(rig.run_until(20_000, is_in(PhaseKind::FineAdjusting)));

    rig.desk.stop();
    assert_eq!(rig.desk.phase(), Phase::Idle);
    assert_eq!(rig.desk.stop_reason(), Some(StopReason::Requested));
    assert_eq!(rig.plant().output, Direction::Stopped);
    assert_eq!(rig.desk.deadline(), None);
}

#[test]
fn stop_when_idle_keeps_the_last_reason() {
    let mut rig = Rig::new();
    rig.desk.adjust_height(651, "remote").unwrap();
    assert!(rig.run_until(1000, idle));

    rig.desk.stop();
    assert_eq!(rig.desk.stop_reason(), Some(StopReason::AlreadyAtTarget));
}

#[test]
fn stop_while_moving() {
    let mut rig = Rig::new();
    rig.desk.adjust_height(900, "remote").unwrap();
    assert!(rig.run_until(2000, is_in(PhaseKind::Moving)));
    assert_eq!(rig.plant().output, Direction::Up);

    rig.desk.stop();
    assert_eq!(rig.desk.phase(), Phase::Idle);
    assert_eq!(rig.desk.stop_reason(), Some(StopReason::Requested));
    assert_eq!(rig.desk.moving_direction(), Direction::Stopped);
    assert_eq!(rig.plant().output, Direction::Stopped);
    assert_eq!(rig.desk.deadline(), None);
    assert!(!rig.ranging.is_held(Consumer::Desk));
}

#[test]
fn stop_while_locating() {
    let mut rig = Rig::new();
    rig.desk.adjust_height(900, "remote").unwrap();
    rig.step();
    assert_eq!(rig.desk.phase().kind(), PhaseKind::Locating);

    rig.desk.stop();
    assert_eq!(rig.desk.phase(), Phase::Idle);
    assert_eq!(rig.desk.stop_reason(), Some(StopReason::Requested));
    assert!(!rig.ranging.is_held(Consumer::Desk));

    rig.run_ms(500);
    assert_eq!(rig.desk.phase(), Phase::Idle);
    assert!(!rig.plant().energized());
}

#[test]
fn stop_after_a_fault_keeps_the_fault() {
    let mut plant = Plant::at(650.0);
    plant.stalled = true;
    let mut rig = Rig::with_plant(plant);
    rig.desk.adjust_height(900, "remote").unwrap();
    assert!(rig.run_until(5000, idle));
    assert_eq!(rig.desk.phase(), Phase::ErrorStopped);

    rig.desk.stop();
    assert_eq!(rig.desk.phase(), Phase::Idle);
    assert_eq!(rig.desk.stop_reason(), Some(StopReason::Stall));
    assert_eq!(rig.plant().output, Direction::Stopped);
    assert!(rig.diagnostics.last_error().starts_with("Stall"));
    assert!(!rig.ranging.is_held(Consumer::Desk));
}

#[test]
fn locating_ignores_a_sample_from_the_command_instant() {
    let mut rig = Rig::new();
    rig.desk.adjust_height(900, "remote").unwrap();
    rig.ranging.publish(700, rig.clock.now());

    rig.desk.tick();
    assert_eq!(rig.desk.phase().kind(), PhaseKind::Locating);

    assert!(rig.run_until(1000, is_in(PhaseKind::CalibratingSpeed)));
}

#[test]
fn stall_after_every_calibration_try() {
    let mut plant = Plant::at(650.0);
    plant.stalled = true;
    let mut rig = Rig::with_plant(plant);
    rig.desk.adjust_height(900, "remote").unwrap();

    assert!(rig.run_until(5000, idle));
    assert_eq!(rig.desk.phase(), Phase::ErrorStopped);
    assert_eq!(rig.desk.stop_reason(), Some(StopReason::Stall));
    assert!(rig.diagnostics.last_error().starts_with("Stall"));
    assert_eq!(rig.diagnostics.stop_reason().as_str(), "stall");
    assert_eq!(rig.plant().output, Direction::Stopped);
    assert!(!rig.ranging.is_held(Consumer::Desk));
    // Calibration windows plus locating
    assert!(rig.now_ms() - 10_000 >= DESK_SPEED_TRIES as u64 * DESK_CALCULATE_SPEED_TIME_MS);
}

#[test]
fn last_calibration_try_can_succeed() {
    let mut plant = Plant::at(650.0);
    plant.stalled = true;
    let mut rig = Rig::with_plant(plant);
    rig.desk.adjust_height(900, "remote").unwrap();

    assert!(rig.run_until(5000, |rig| matches!(
        rig.desk.phase(),
        Phase::CalibratingSpeed { attempt: 2, .. }
    )));
    rig.plant_mut().stalled = false;

    assert!(rig.run_until(2000, is_in(PhaseKind::Moving)));
    assert!(rig.desk.speed().is_some());
}

#[test]
fn timeout_when_the_desk_slows_down() {
    let mut rig = Rig::new();
    rig.desk.adjust_height(900, "remote").unwrap();
    assert!(rig.run_until(2000, is_in(PhaseKind::Moving)));

    let height = rig.desk.current_height().unwrap();
    let deadline = rig.desk.deadline().unwrap();
    assert_eq!(deadline, rig.clock.now() + travel_budget(900 - height));

    rig.plant_mut().speed = 0.001;
    assert!(rig.run_until(30_000, idle));

    assert_eq!(rig.desk.phase(), Phase::ErrorStopped);
    assert_eq!(rig.desk.stop_reason(), Some(StopReason::Timeout));
    assert!(rig.clock.now() >= deadline);
    assert!(rig.clock.now() < deadline + Duration::millis(20));
    assert_eq!(rig.plant().output, Direction::Stopped);
    assert!(rig.diagnostics.last_error().starts_with("Timeout"));
}

#[test]
fn sensor_loss_while_moving() {
    let mut rig = Rig::new();
    rig.desk.adjust_height(900, "remote").unwrap();
    assert!(rig.run_until(2000, is_in(PhaseKind::Moving)));

    rig.plant_mut().frozen = true;
    assert!(rig.run_until(DESK_RANGING_TIMEOUT_MS + 200, idle));

    assert_eq!(rig.desk.phase(), Phase::ErrorStopped);
    assert_eq!(rig.desk.stop_reason(), Some(StopReason::SensorFault));
    assert_eq!(rig.plant().output, Direction::Stopped);
    assert!(!rig.ranging.is_held(Consumer::Desk));
}

#[test]
fn no_sensor_at_all() {
    let mut plant = Plant::at(650.0);
    plant.init_failures = u8::MAX;
    let mut rig = Rig::with_plant(plant);
    rig.desk.adjust_height(900, "remote").unwrap();

    assert!(rig.run_until(2000, idle));
    assert_eq!(rig.desk.stop_reason(), Some(StopReason::SensorFault));
    assert!(rig.diagnostics.last_error().starts_with("No height"));
    assert!(!rig.plant().energized());

    rig.step();
    assert_eq!(rig.runner.phase(), RunnerPhase::Idle);
    assert!(!rig.ranging.has_demand());
}

#[test]
fn new_target_in_the_same_direction_keeps_moving() {
    let mut rig = Rig::new();
    rig.desk.adjust_height(900, "remote").unwrap();
    assert!(rig.run_until(2000, is_in(PhaseKind::Moving)));
    let speed = rig.desk.speed();

    rig.desk.adjust_height(1000, "app").unwrap();
    let height = rig.desk.current_height().unwrap();

    assert_eq!(rig.desk.phase().kind(), PhaseKind::Moving);
    assert_eq!(rig.desk.speed(), speed);
    assert_eq!(
        rig.desk.deadline(),
        Some(rig.clock.now() + travel_budget(1000 - height))
    );
    assert_eq!(rig.desk.status().requester.as_str(), "app");
}

#[test]
fn reversing_passes_through_neutral() {
    let mut rig = Rig::new();
    rig.desk.adjust_height(900, "remote").unwrap();
    assert!(rig.run_until(2000, is_in(PhaseKind::Moving)));

    rig.desk.adjust_height(660, "remote").unwrap();
    assert_eq!(rig.desk.moving_direction(), Direction::Down);

    let drives = rig.plant().drives.clone();
    assert_eq!(
        drives[drives.len() - 3..],
        [Direction::Up, Direction::Stopped, Direction::Down]
    );

    assert!(rig.run_until(20_000, idle));
    assert_rests_at(&rig, 660);
    assert!(!rig.plant().direct_reversal);
}

#[test]
fn replan_into_the_fine_band_keeps_the_travel_deadline() {
    let mut rig = Rig::new();
    rig.desk.adjust_height(900, "remote").unwrap();
    assert!(rig.run_until(2000, is_in(PhaseKind::Moving)));
    let deadline = rig.desk.deadline().unwrap();

    // Crawl until the travel deadline is closer than a full fine adjust
    rig.plant_mut().speed = 0.001;
    let fine_adjust = Duration::millis(DESK_FINE_ADJUST_TIMEOUT_MS);
    assert!(rig.run_until(20_000, |rig| {
        rig.clock.now() + fine_adjust > deadline + Duration::millis(1000)
    }));
    assert_eq!(rig.desk.phase().kind(), PhaseKind::Moving);

    let height = rig.desk.current_height().unwrap();
    rig.desk.adjust_height(height + 10, "remote").unwrap();

    assert_eq!(rig.desk.phase().kind(), PhaseKind::FineAdjusting);
    assert_eq!(rig.desk.deadline(), Some(deadline));
}

#[test]
fn command_after_a_sensor_fault_retries_the_sensor() {
    // Boot init and every reinit of the first move fail
    let mut plant = Plant::at(650.0);
    plant.init_failures = 1 + RANGING_REINIT_ATTEMPTS;
    let mut rig = Rig::with_plant(plant);
    rig.desk.adjust_height(900, "remote").unwrap();

    assert!(rig.run_until(2000, idle));
    assert_eq!(rig.desk.stop_reason(), Some(StopReason::SensorFault));
    assert_eq!(rig.runner.phase(), RunnerPhase::Faulted);

    // Sent before the ranging loop saw the demand drop
    rig.desk.adjust_height(900, "remote").unwrap();
    rig.step();
    assert_eq!(rig.runner.phase(), RunnerPhase::Acquiring);

    assert!(rig.run_until(1000, is_in(PhaseKind::CalibratingSpeed)));
}

#[test]
fn new_command_clears_diagnostics() {
    let mut plant = Plant::at(650.0);
    plant.stalled = true;
    let mut rig = Rig::with_plant(plant);
    rig.desk.adjust_height(900, "remote").unwrap();
    assert!(rig.run_until(5000, idle));
    assert!(!rig.diagnostics.last_error().is_empty());

    rig.plant_mut().stalled = false;
    rig.desk.adjust_height(700, "remote").unwrap();
    assert!(rig.diagnostics.last_error().is_empty());
    assert!(rig.diagnostics.stop_reason().is_empty());
    assert_eq!(rig.desk.stop_reason(), None);

    assert!(rig.run_until(20_000, idle));
    assert_rests_at(&rig, 700);
}
