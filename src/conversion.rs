use std::f64::consts::TAU;

use serde::{Deserialize, Serialize};

pub const TICKS_PER_REV: u16 = 4096;

/// Maps raw encoder ticks to joint angles centred on a calibration tick.
///
/// Angles are signed: ticks above `zero_tick` are positive. Nothing wraps,
/// so an angle converted back to ticks can land outside the servo's range
/// and be rejected by the position check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EncoderConversion {
    pub zero_tick: u16,
}

impl Default for EncoderConversion {
    fn default() -> Self {
        Self { zero_tick: TICKS_PER_REV / 2 }
    }
}

impl EncoderConversion {
    pub fn new(zero_tick: u16) -> Self {
        Self { zero_tick }
    }

    pub fn ticks_to_rad(&self, ticks: u16) -> f64 {
        let rel = i32::from(ticks) - i32::from(self.zero_tick);
        f64::from(rel) * TAU / f64::from(TICKS_PER_REV)
    }

    pub fn ticks_to_deg(&self, ticks: u16) -> f64 {
        self.ticks_to_rad(ticks).to_degrees()
    }

    pub fn rad_to_ticks(&self, rad: f64) -> i64 {
        let rel = (rad * f64::from(TICKS_PER_REV) / TAU).round() as i64;
        i64::from(self.zero_tick) + rel
    }

    pub fn deg_to_ticks(&self, deg: f64) -> i64 {
        self.rad_to_ticks(deg.to_radians())
    }
}
