use std::{
    thread,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    error::ControlError,
    model::{check_position, check_speed, ServoKind},
    registry::DeviceRegistry,
    servo::ServoState,
};

/// Highest id a servo can be given. 0xFE is the broadcast id.
pub const MAX_ID: u8 = 0xFD;

/// How a controller surfaces a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    /// Return `false`, say nothing.
    Silent,
    /// Return `false` and log a warning.
    #[default]
    Report,
    /// Log a warning and return the error.
    Strict,
}

impl DisplayMode {
    /// Turn the outcome of an operation into what the caller sees.
    pub fn settle(self, op: &str, outcome: Result<(), ControlError>) -> Result<bool, ControlError> {
        self.settle_or(op, outcome.map(|()| true), false)
    }

    pub fn settle_or<T>(
        self,
        op: &str,
        outcome: Result<T, ControlError>,
        fallback: T,
    ) -> Result<T, ControlError> {
        match outcome {
            Ok(v) => Ok(v),
            Err(e) => match self {
                DisplayMode::Silent => Ok(fallback),
                DisplayMode::Report => {
                    warn!(op, "{e}");
                    Ok(fallback)
                }
                DisplayMode::Strict => {
                    warn!(op, "{e}");
                    Err(e)
                }
            },
        }
    }
}

/// The operation set shared by the serial and simulated backends.
///
/// Operations returning `Result<bool, _>` follow the controller's
/// [`DisplayMode`]: `Ok(true)` on success, `Ok(false)` on failure in
/// silent/report mode, `Err` on failure in strict mode.
pub trait Controller: Send {
    fn registry(&self) -> &DeviceRegistry;

    fn display_mode(&self) -> DisplayMode;

    fn set_display_mode(&mut self, mode: DisplayMode);

    /// Discover which registered servos are present. Returns how many are
    /// online. Fails with [`ControlError::ConnectionFailed`] whatever the
    /// display mode when none answers. Safe to call again to pick up late
    /// joiners.
    fn connect(&mut self) -> Result<usize, ControlError>;

    fn ping(&mut self, id: u8) -> Result<bool, ControlError>;

    fn add_motor(&mut self, id: u8, name: &str, kind: ServoKind) -> Result<bool, ControlError>;

    fn remove_motor(&mut self, id: u8) -> Result<bool, ControlError>;

    /// Change a servo's bus id. The registry is re-keyed only once the
    /// servo acknowledged its new id.
    fn change_id(&mut self, old: u8, new: u8) -> Result<bool, ControlError>;

    /// No-op when the cached LED state already matches.
    fn turn_led(&mut self, id: u8, on: bool) -> Result<bool, ControlError>;

    fn toggle_led(&mut self, id: u8) -> Result<bool, ControlError>;

    fn change_speed(&mut self, id: u8, speed: u16) -> Result<bool, ControlError>;

    fn set_position(&mut self, id: u8, position: i32) -> Result<bool, ControlError>;

    /// One position per servo, in registry order. Nothing is sent unless
    /// every value is valid.
    fn set_positions(&mut self, positions: &[i32]) -> Result<bool, ControlError>;

    fn enable_torque(&mut self, id: u8, enable: bool) -> Result<bool, ControlError>;

    fn torque_enabled(&mut self, id: u8) -> Result<bool, ControlError>;

    /// Refresh telemetry and re-derive the status from the torque state.
    fn update_infos(&mut self, id: u8) -> Result<bool, ControlError>;

    fn feedback_interval(&self) -> Duration {
        Duration::from_millis(20)
    }

    fn change_speed_all(&mut self, speed: u16) -> Result<bool, ControlError> {
        let mode = self.display_mode();
        if let Err(e) = check_speed(0xFE, speed) {
            return mode.settle("change_speed_all", Err(e));
        }
        let mut all = true;
        for id in self.registry().ids() {
            all &= self.change_speed(id, speed)?;
        }
        Ok(all)
    }

    fn add_position(&mut self, id: u8, delta: i32) -> Result<bool, ControlError> {
        let target = self
            .registry()
            .get(id)
            .ok_or(ControlError::UnknownId(id))
            .and_then(|s| offset_target(s, delta));
        match target {
            Ok(target) => self.set_position(id, target),
            Err(e) => self.display_mode().settle("add_position", Err(e)),
        }
    }

    fn add_positions(&mut self, deltas: &[i32]) -> Result<bool, ControlError> {
        let expected = self.registry().len();
        if deltas.len() != expected {
            let e = ControlError::LengthMismatch { expected, got: deltas.len() };
            return self.display_mode().settle("add_positions", Err(e));
        }
        let targets: Result<Vec<i32>, ControlError> = self
            .registry()
            .iter()
            .zip(deltas)
            .map(|(s, &d)| offset_target(s, d))
            .collect();
        match targets {
            Ok(targets) => self.set_positions(&targets),
            Err(e) => self.display_mode().settle("add_positions", Err(e)),
        }
    }

    fn go_to_backhoe(&mut self) -> Result<bool, ControlError> {
        let pose = preset(self.registry(), ServoKind::backhoe_position);
        self.set_positions(&pose)
    }

    fn go_to_sleep(&mut self) -> Result<bool, ControlError> {
        let pose = preset(self.registry(), ServoKind::sleep_position);
        self.set_positions(&pose)
    }

    fn update_all_infos(&mut self) -> Result<bool, ControlError> {
        let mut all = true;
        for id in self.registry().ids() {
            all &= self.update_infos(id)?;
        }
        Ok(all)
    }

    /// True when no servo reported movement on its last refresh.
    fn goal_reached(&self) -> bool {
        self.registry().iter().all(ServoState::target_reached)
    }

    /// Euclidean distance between target and measured positions.
    fn position_sum_squared_error(&self) -> f64 {
        self.registry()
            .iter()
            .map(|s| s.position_error().powi(2))
            .sum::<f64>()
            .sqrt()
    }

    /// Last measured positions, in registry order.
    fn positions(&self) -> Vec<u16> {
        self.registry().iter().map(|s| s.position).collect()
    }

    /// Refresh telemetry until the goal is reached or `timeout` runs out.
    fn wait_feedback(&mut self, timeout: Duration) -> Result<bool, ControlError> {
        // a timeout too large for the clock means no deadline
        let deadline = Instant::now().checked_add(timeout);
        loop {
            self.update_all_infos()?;
            if self.goal_reached() {
                return Ok(true);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(false);
            }
            thread::sleep(self.feedback_interval());
        }
    }
}

/// Target `delta` ticks away from the servo's current target, range-checked
/// without overflowing.
fn offset_target(servo: &ServoState, delta: i32) -> Result<i32, ControlError> {
    let target = i64::from(servo.target_position) + i64::from(delta);
    check_position(servo.id, servo.kind, target).map(i32::from)
}

fn preset(registry: &DeviceRegistry, pick: fn(ServoKind) -> u16) -> Vec<i32> {
    registry.iter().map(|s| i32::from(pick(s.kind))).collect()
}

/// Validate a full pose against the registry before anything is sent.
pub(crate) fn plan_positions(
    registry: &DeviceRegistry,
    positions: &[i32],
) -> Result<Vec<(u8, u16)>, ControlError> {
    if positions.len() != registry.len() {
        return Err(ControlError::LengthMismatch { expected: registry.len(), got: positions.len() });
    }
    registry
        .iter()
        .zip(positions)
        .map(|(s, &p)| Ok((s.id, check_position(s.id, s.kind, i64::from(p))?)))
        .collect()
}

/// Validate an id change against the registry.
pub(crate) fn check_rename(registry: &DeviceRegistry, old: u8, new: u8) -> Result<(), ControlError> {
    if !registry.contains(old) {
        return Err(ControlError::UnknownId(old));
    }
    if registry.contains(new) {
        return Err(ControlError::DuplicateId(new));
    }
    if new > MAX_ID {
        return Err(ControlError::OutOfRange {
            id: old,
            what: "id",
            value: i64::from(new),
            min: 0,
            max: i64::from(MAX_ID),
        });
    }
    Ok(())
}

/// Look up the kind of a registered servo and range-check a target.
pub(crate) fn checked_target(
    registry: &DeviceRegistry,
    id: u8,
    position: i32,
) -> Result<u16, ControlError> {
    let servo = registry.get(id).ok_or(ControlError::UnknownId(id))?;
    check_position(id, servo.kind, i64::from(position))
}
