use std::{thread, time::Duration};

use dxl_arm_controller::{
    start_control_loop, ControlLoopConfig, Controller, MotorCommand, ServoKind, SimulatedController,
    SimulationConfig,
};

fn main() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let mut arm = SimulatedController::new(SimulationConfig::default());
    arm.add_motor(1, "base", ServoKind::Base)?;
    arm.add_motor(2, "shoulder", ServoKind::Shoulder)?;
    arm.add_motor(3, "elbow", ServoKind::Elbow)?;
    arm.add_motor(4, "wrist angle", ServoKind::WristAngle)?;
    arm.add_motor(5, "wrist rotate", ServoKind::WristRotate)?;
    arm.add_motor(6, "gripper", ServoKind::Gripper)?;
    arm.connect()?;
    arm.change_speed_all(400)?;

    let handle = start_control_loop(Box::new(arm), ControlLoopConfig::default())?;
    handle.push(MotorCommand::GoToBackhoe)?;
    for _ in 0..10 {
        thread::sleep(Duration::from_millis(100));
        let snap = handle.last_snapshot()?;
        println!("t={:.2} goal={} {:?}", snap.timestamp_s, snap.goal_reached, snap.positions);
    }

    handle.push(MotorCommand::GoToSleep)?;
    thread::sleep(Duration::from_millis(50));
    let mut arm = handle.join()?;
    let reached = arm.wait_feedback(Duration::from_secs(3))?;
    println!("sleep pose reached: {reached}, error {:.1}", arm.position_sum_squared_error());
    Ok(())
}
