mod common;

use std::{thread, time::Duration};

use common::{fast_timing, FakeBus, FakeServo};
use dxl_arm_controller::{
    start_control_loop, ControlError, ControlLoopConfig, Controller, MotorCommand, SerialController,
    ServoKind, SimulatedController,
};

fn sim_arm() -> Box<dyn Controller> {
    let mut sim = SimulatedController::no_wait();
    sim.add_motor(1, "base", ServoKind::Base).unwrap();
    sim.add_motor(2, "shoulder", ServoKind::Shoulder).unwrap();
    sim.add_motor(3, "elbow", ServoKind::Elbow).unwrap();
    Box::new(sim)
}

#[test]
fn control_loop_updates_snapshot() {
    let cfg = ControlLoopConfig { read_period: Duration::from_millis(5), channel_capacity: 32 };
    let handle = start_control_loop(sim_arm(), cfg).unwrap();

    handle.push(MotorCommand::SetPositions(vec![100, 2000, 3000])).unwrap();
    thread::sleep(Duration::from_millis(40));

    let snap = handle.last_snapshot().unwrap();
    assert_eq!(snap.ids, vec![1, 2, 3]);
    assert_eq!(snap.positions, vec![100, 2000, 3000]);
    assert!(snap.goal_reached);
    assert!(snap.in_movement.iter().all(|m| !m));
    assert!(snap.timestamp_s > 0.0);

    handle.push(MotorCommand::AddPositions(vec![10, 10, -10])).unwrap();
    thread::sleep(Duration::from_millis(40));
    assert_eq!(handle.last_snapshot().unwrap().positions, vec![110, 2010, 2990]);

    let controller = handle.join().unwrap();
    assert_eq!(controller.registry().get(3).unwrap().target_position, 2990);
}

#[test]
fn rejected_command_keeps_loop_running() {
    let cfg = ControlLoopConfig { read_period: Duration::from_millis(5), channel_capacity: 8 };
    let handle = start_control_loop(sim_arm(), cfg).unwrap();

    handle.push(MotorCommand::SetPositions(vec![100, 0, 3000])).unwrap();
    handle.push(MotorCommand::GoToBackhoe).unwrap();
    thread::sleep(Duration::from_millis(40));
    assert_eq!(handle.last_snapshot().unwrap().positions, vec![2048, 2048, 2048]);

    handle.push(MotorCommand::SetTorque { enabled: false }).unwrap();
    thread::sleep(Duration::from_millis(40));
    let controller = handle.join().unwrap();
    assert!(controller.registry().iter().all(|s| !s.torque_enabled));
}

#[test]
fn control_loop_rejects_missing_motors() {
    let mut absent = FakeServo::new(2);
    absent.silent = true;
    let mut serial = SerialController::new(FakeBus::with([FakeServo::new(1), absent])).with_timing(fast_timing());
    serial.add_motor(1, "base", ServoKind::Base).unwrap();
    serial.add_motor(2, "shoulder", ServoKind::Shoulder).unwrap();

    let err = start_control_loop(Box::new(serial), ControlLoopConfig::default()).err().unwrap();
    match err {
        ControlError::MissingMotors(ids) => assert_eq!(ids, vec![2]),
        other => panic!("unexpected error: {other:?}"),
    }
}
