//! Controller without hardware.
//!
//! Telemetry is fabricated from the commanded targets: on every refresh a
//! servo covers the distance its target speed allows in the time elapsed
//! since its previous refresh. The no-wait variant jumps straight to the
//! target.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    clock::{Clock, SystemClock},
    controller::{check_rename, checked_target, plan_positions, Controller, DisplayMode},
    error::ControlError,
    model::{check_speed, ServoKind, ServoStatus},
    registry::{Access, DeviceRegistry},
    servo::ServoState,
};

/// Model number the simulated servos report.
pub const SIM_MODEL_NUMBER: u16 = 0x001D;
pub const SIM_FIRMWARE_VERSION: u8 = 0x24;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Ticks per second covered per unit of commanded speed
    /// (0.111 rpm per unit on a 4096-tick revolution).
    pub ticks_per_speed_unit: f64,
    /// Tenths of a volt.
    pub supply_voltage: u8,
    pub temperature: u8,
    /// Skip interpolation and report every target as reached at once.
    pub no_wait: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self { ticks_per_speed_unit: 0.111 * 4096.0 / 60.0, supply_voltage: 120, temperature: 35, no_wait: false }
    }
}

pub struct SimulatedController {
    registry: DeviceRegistry,
    mode: DisplayMode,
    cfg: SimulationConfig,
    clock: Box<dyn Clock>,
}

impl SimulatedController {
    pub fn new(cfg: SimulationConfig) -> Self {
        Self::with_clock(cfg, SystemClock)
    }

    /// Every refresh reports the target as reached.
    pub fn no_wait() -> Self {
        Self::new(SimulationConfig { no_wait: true, ..SimulationConfig::default() })
    }

    pub fn with_clock(cfg: SimulationConfig, clock: impl Clock + 'static) -> Self {
        Self { registry: DeviceRegistry::new(), mode: DisplayMode::default(), cfg, clock: Box::new(clock) }
    }

    pub fn with_display_mode(mut self, mode: DisplayMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.cfg
    }

    fn connected(&mut self, id: u8) -> Result<&mut ServoState, ControlError> {
        self.registry.resolve(id, Access::Connected)
    }
}

impl Default for SimulatedController {
    fn default() -> Self {
        Self::new(SimulationConfig::default())
    }
}

/// Advance one servo's fabricated telemetry to `now`.
fn step(servo: &mut ServoState, cfg: &SimulationConfig, now: Instant) {
    servo.voltage = cfg.supply_voltage;
    servo.temperature = cfg.temperature;
    servo.load = 0;
    servo.instruction_registered = false;

    let remaining = i32::from(servo.target_position) - i32::from(servo.position);
    if !servo.torque_enabled {
        // limp: nothing drives the joint
        servo.speed = 0;
        servo.in_movement = false;
        servo.last_update = now;
        return;
    }

    let elapsed = now.saturating_duration_since(servo.last_update);
    let reach = f64::from(servo.target_speed) * cfg.ticks_per_speed_unit * elapsed.as_secs_f64();
    if cfg.no_wait || reach >= f64::from(remaining.abs()) {
        servo.position = servo.target_position;
        servo.speed = 0;
        servo.in_movement = false;
        servo.last_update = now;
        return;
    }

    servo.in_movement = true;
    servo.speed = servo.target_speed;
    // whole ticks only; leftover time carries into the next refresh
    let moved = reach.floor() as i32;
    if moved > 0 {
        let next = i32::from(servo.position) + moved * remaining.signum();
        servo.position = next as u16;
        servo.last_update = now;
    }
}

impl Controller for SimulatedController {
    fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    fn display_mode(&self) -> DisplayMode {
        self.mode
    }

    fn set_display_mode(&mut self, mode: DisplayMode) {
        self.mode = mode;
    }

    fn feedback_interval(&self) -> Duration {
        Duration::from_millis(10)
    }

    /// The simulated arm boots with torque on, so every servo goes
    /// straight to activated.
    fn connect(&mut self) -> Result<usize, ControlError> {
        if self.registry.is_empty() {
            return Err(ControlError::ConnectionFailed);
        }
        let now = self.clock.now();
        for servo in self.registry.iter_mut().filter(|s| !s.is_online()) {
            servo.status = ServoStatus::Connected;
            servo.model_number = Some(SIM_MODEL_NUMBER);
            servo.firmware_version = Some(SIM_FIRMWARE_VERSION);
            servo.last_update = now;
            servo.apply_torque(true);
            debug!(id = servo.id, "simulated servo online");
        }
        let online = self.registry.len();
        info!(online, no_wait = self.cfg.no_wait, "simulated arm connected");
        Ok(online)
    }

    fn ping(&mut self, id: u8) -> Result<bool, ControlError> {
        let outcome = self.registry.resolve(id, Access::Registered).map(|_| ());
        self.mode.settle("ping", outcome)
    }

    fn add_motor(&mut self, id: u8, name: &str, kind: ServoKind) -> Result<bool, ControlError> {
        let outcome = self.registry.insert(ServoState::new(id, name, kind, self.clock.now()));
        self.mode.settle("add_motor", outcome)
    }

    fn remove_motor(&mut self, id: u8) -> Result<bool, ControlError> {
        let outcome = self.registry.remove(id).map(|_| ());
        self.mode.settle("remove_motor", outcome)
    }

    fn change_id(&mut self, old: u8, new: u8) -> Result<bool, ControlError> {
        let outcome = check_rename(&self.registry, old, new)
            .and_then(|()| self.connected(old).map(|_| ()))
            .and_then(|()| self.registry.rename(old, new));
        self.mode.settle("change_id", outcome)
    }

    fn turn_led(&mut self, id: u8, on: bool) -> Result<bool, ControlError> {
        let outcome = self.connected(id).map(|s| s.active_led = on);
        self.mode.settle("turn_led", outcome)
    }

    fn toggle_led(&mut self, id: u8) -> Result<bool, ControlError> {
        let outcome = self.connected(id).map(|s| s.active_led = !s.active_led);
        self.mode.settle("toggle_led", outcome)
    }

    fn change_speed(&mut self, id: u8, speed: u16) -> Result<bool, ControlError> {
        let outcome = check_speed(id, speed).and_then(|()| {
            self.connected(id)?.target_speed = speed;
            Ok(())
        });
        self.mode.settle("change_speed", outcome)
    }

    fn set_position(&mut self, id: u8, position: i32) -> Result<bool, ControlError> {
        let outcome = checked_target(&self.registry, id, position)
            .and_then(|pos| self.connected(id).map(|s| s.target_position = pos));
        self.mode.settle("set_position", outcome)
    }

    fn set_positions(&mut self, positions: &[i32]) -> Result<bool, ControlError> {
        let outcome = plan_positions(&self.registry, positions).and_then(|plan| {
            // every servo must be reachable before any target moves
            for &(id, _) in &plan {
                self.connected(id)?;
            }
            for (id, pos) in plan {
                self.connected(id)?.target_position = pos;
            }
            Ok(())
        });
        self.mode.settle("set_positions", outcome)
    }

    fn enable_torque(&mut self, id: u8, enable: bool) -> Result<bool, ControlError> {
        let outcome = self.connected(id).map(|s| s.apply_torque(enable));
        self.mode.settle("enable_torque", outcome)
    }

    fn torque_enabled(&mut self, id: u8) -> Result<bool, ControlError> {
        let outcome = self.connected(id).map(|s| s.torque_enabled);
        self.mode.settle_or("torque_enabled", outcome, false)
    }

    fn update_infos(&mut self, id: u8) -> Result<bool, ControlError> {
        let now = self.clock.now();
        let cfg = self.cfg;
        let outcome = self.connected(id).map(|s| step(s, &cfg, now));
        self.mode.settle("update_infos", outcome)
    }
}
