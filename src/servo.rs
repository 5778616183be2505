use std::time::{Instant, SystemTime};

use crate::{
    conversion::EncoderConversion,
    model::{ServoKind, ServoStatus, DEFAULT_SPEED},
};

/// Everything the controller knows about one servo.
///
/// `target_*` fields hold the last accepted command; the telemetry fields
/// only change on a refresh.
#[derive(Debug, Clone)]
pub struct ServoState {
    pub id: u8,
    pub name: String,
    pub kind: ServoKind,
    pub status: ServoStatus,

    pub target_speed: u16,
    pub target_position: u16,

    pub position: u16,
    pub speed: u16,
    pub load: u16,
    /// Tenths of a volt.
    pub voltage: u8,
    /// Degrees Celsius.
    pub temperature: u8,
    pub instruction_registered: bool,
    pub in_movement: bool,

    pub active_led: bool,
    pub torque_enabled: bool,
    pub model_number: Option<u16>,
    pub firmware_version: Option<u8>,

    pub created_at: SystemTime,
    pub last_update: Instant,
}

impl ServoState {
    pub fn new(id: u8, name: impl Into<String>, kind: ServoKind, now: Instant) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            status: ServoStatus::Offline,
            target_speed: DEFAULT_SPEED,
            target_position: 0,
            position: 0,
            speed: 0,
            load: 0,
            voltage: 0,
            temperature: 0,
            instruction_registered: false,
            in_movement: false,
            active_led: false,
            torque_enabled: false,
            model_number: None,
            firmware_version: None,
            created_at: SystemTime::now(),
            last_update: now,
        }
    }

    pub fn is_online(&self) -> bool {
        self.status != ServoStatus::Offline
    }

    /// Record a confirmed torque state. Offline servos stay offline.
    pub fn apply_torque(&mut self, enabled: bool) {
        self.torque_enabled = enabled;
        if self.is_online() {
            self.status = if enabled { ServoStatus::Activated } else { ServoStatus::Connected };
        }
    }

    pub fn position_error(&self) -> f64 {
        f64::from(self.target_position) - f64::from(self.position)
    }

    pub fn target_reached(&self) -> bool {
        !self.in_movement
    }

    pub fn voltage_volts(&self) -> f32 {
        f32::from(self.voltage) / 10.0
    }

    pub fn angle_deg(&self, conversion: &EncoderConversion) -> f64 {
        conversion.ticks_to_deg(self.position)
    }

    pub fn angle_rad(&self, conversion: &EncoderConversion) -> f64 {
        conversion.ticks_to_rad(self.position)
    }
}
