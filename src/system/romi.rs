//! Physical properties of the Romi chassis

use core::f32::consts::PI;

/// Wheel radius in mm
pub const WHEEL_RADIUS: f32 = 34.75;

/// Distance between the wheel contact patches in mm
pub const TRACK_WIDTH: f32 = 141.0;

/// Half the track width in mm, the lever arm of each wheel about the centre
pub const HALF_TRACK: f32 = TRACK_WIDTH / 2.0;

/// Motor shaft revolutions per wheel revolution
pub const GEAR_RATIO: f32 = 119.7576;

/// Encoder ticks per motor shaft revolution
pub const COUNTS_PER_REV: f32 = 12.0;

/// Wheel rotation in radians per encoder tick
pub const RADIANS_PER_TICK: f32 = (2.0 * PI) / (COUNTS_PER_REV * GEAR_RATIO);

/// Nominal battery voltage (six NiMH cells, charged)
pub const NOMINAL_VOLTAGE: f32 = 8.5;

/// Battery ADC reading at nominal voltage
pub const NOMINAL_BATTERY_RAW: f32 = 3210.0;

/// Spacing between reflectance channels in mm
pub const IR_PITCH: f32 = 8.0;
