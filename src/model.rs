use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ControlError;

/// Commandable speed interval, inclusive on both ends.
pub const SPEED_MIN: u16 = 1;
pub const SPEED_MAX: u16 = 1023;

/// Speed a freshly registered servo assumes until told otherwise.
pub const DEFAULT_SPEED: u16 = 100;

/// Joint role of a servo within the arm. The role fixes the legal
/// position interval and the preset poses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServoKind {
    Base,
    Shoulder,
    Elbow,
    WristAngle,
    WristRotate,
    Gripper,
}

/// Position limits in encoder ticks, grouped per joint role.
pub mod ranges {
    pub const BASE: (u16, u16) = (0, 4095);
    pub const SHOULDER: (u16, u16) = (1024, 3072);
    pub const ELBOW: (u16, u16) = (1024, 3072);
    pub const WRIST_ANGLE: (u16, u16) = (1024, 3072);
    pub const WRIST_ROTATE: (u16, u16) = (0, 4095);
    pub const GRIPPER: (u16, u16) = (1800, 2800);
}

/// Named reference poses, one tick value per joint role.
pub mod presets {
    pub const BACKHOE: [u16; 6] = [2048, 2048, 2048, 2048, 2048, 2300];
    pub const SLEEP: [u16; 6] = [2048, 1100, 2970, 2400, 2048, 2048];
}

impl ServoKind {
    pub const ALL: [ServoKind; 6] = [
        ServoKind::Base,
        ServoKind::Shoulder,
        ServoKind::Elbow,
        ServoKind::WristAngle,
        ServoKind::WristRotate,
        ServoKind::Gripper,
    ];

    fn index(self) -> usize {
        match self {
            ServoKind::Base => 0,
            ServoKind::Shoulder => 1,
            ServoKind::Elbow => 2,
            ServoKind::WristAngle => 3,
            ServoKind::WristRotate => 4,
            ServoKind::Gripper => 5,
        }
    }

    /// `(pos_min, pos_max)`; both bounds are excluded from valid targets.
    pub fn position_range(self) -> (u16, u16) {
        match self {
            ServoKind::Base => ranges::BASE,
            ServoKind::Shoulder => ranges::SHOULDER,
            ServoKind::Elbow => ranges::ELBOW,
            ServoKind::WristAngle => ranges::WRIST_ANGLE,
            ServoKind::WristRotate => ranges::WRIST_ROTATE,
            ServoKind::Gripper => ranges::GRIPPER,
        }
    }

    pub fn accepts_position(self, position: i64) -> bool {
        let (min, max) = self.position_range();
        i64::from(min) < position && position < i64::from(max)
    }

    pub fn backhoe_position(self) -> u16 {
        presets::BACKHOE[self.index()]
    }

    pub fn sleep_position(self) -> u16 {
        presets::SLEEP[self.index()]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ServoKind::Base => "base",
            ServoKind::Shoulder => "shoulder",
            ServoKind::Elbow => "elbow",
            ServoKind::WristAngle => "wrist_angle",
            ServoKind::WristRotate => "wrist_rotate",
            ServoKind::Gripper => "gripper",
        }
    }
}

impl fmt::Display for ServoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServoKind {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "base" => Ok(ServoKind::Base),
            "shoulder" => Ok(ServoKind::Shoulder),
            "elbow" => Ok(ServoKind::Elbow),
            "wrist_angle" | "wristangle" => Ok(ServoKind::WristAngle),
            "wrist_rotate" | "wristrotate" => Ok(ServoKind::WristRotate),
            "gripper" => Ok(ServoKind::Gripper),
            _ => Err(ControlError::Unsupported(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ServoStatus {
    Offline,
    Connected,
    Activated,
}

pub fn check_speed(id: u8, speed: u16) -> Result<(), ControlError> {
    if (SPEED_MIN..=SPEED_MAX).contains(&speed) {
        Ok(())
    } else {
        Err(ControlError::OutOfRange {
            id,
            what: "speed",
            value: i64::from(speed),
            min: i64::from(SPEED_MIN),
            max: i64::from(SPEED_MAX),
        })
    }
}

pub fn check_position(id: u8, kind: ServoKind, position: i64) -> Result<u16, ControlError> {
    if kind.accepts_position(position) {
        // accepted positions sit strictly inside a u16 interval
        Ok(position as u16)
    } else {
        let (min, max) = kind.position_range();
        Err(ControlError::OutOfRange {
            id,
            what: "position",
            value: position,
            min: i64::from(min),
            max: i64::from(max),
        })
    }
}
