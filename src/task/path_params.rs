//! Path director parameters
//!
//! Parameter slots the function segments read. A course segment (or the
//! operator, through a segment jump) fills the slots, names the segment to
//! continue with in `next_state`, then switches to a function segment.
//!
//! | segment              | var_1          | var_2     | var_3  | var_4  |
//! |----------------------|----------------|-----------|--------|--------|
//! | FIXED_FORWARD        | distance (mm)  |           |        |        |
//! | TURN_ANGLE           | angle (deg)    | (target)  |        |        |
//! | FOLLOW_LINE_FOR_TIME | duration (ms)  |           |        |        |
//! | GO_TO_POINT          | X (mm)         | Y (mm)    | skip X | skip Y |
//! | FOLLOW_LINE_TO_POINT | X (mm)         | Y (mm)    | skip X | skip Y |
//!
//! Skip flags are true when nonzero. TURN_ANGLE keeps its absolute target
//! heading (rad) in `var_2` once the segment has started.

use crate::system::share::LocalShare;

/// Cruise speed in mm/s the director returns to after a turn
pub const DEFAULT_V_REF: f32 = 200.0;

pub struct PathParams {
    /// Cruise speed in mm/s
    pub v_ref: LocalShare<f32>,
    /// Segment a function segment continues with
    pub next_state: LocalShare<u16>,
    pub var_1: LocalShare<f32>,
    pub var_2: LocalShare<f32>,
    pub var_3: LocalShare<f32>,
    pub var_4: LocalShare<f32>,
}

impl PathParams {
    pub const fn new() -> Self {
        Self {
            v_ref: LocalShare::new("v_ref", DEFAULT_V_REF),
            next_state: LocalShare::new("next state", 0),
            var_1: LocalShare::new("var 1", 0.0),
            var_2: LocalShare::new("var 2", 0.0),
            var_3: LocalShare::new("var 3", 0.0),
            var_4: LocalShare::new("var 4", 0.0),
        }
    }

    /// Parameter slot by its 1-based number
    pub fn var(&self, index: u8) -> Option<&LocalShare<f32>> {
        match index {
            1 => Some(&self.var_1),
            2 => Some(&self.var_2),
            3 => Some(&self.var_3),
            4 => Some(&self.var_4),
            _ => None,
        }
    }

    /// Fill the point slots for GO_TO_POINT or FOLLOW_LINE_TO_POINT
    pub fn point(&self, x: f32, y: f32, skip_x: bool, skip_y: bool) {
        self.var_1.put(x);
        self.var_2.put(y);
        self.var_3.put(if skip_x { 1.0 } else { 0.0 });
        self.var_4.put(if skip_y { 1.0 } else { 0.0 });
    }

    pub fn skip_x(&self) -> bool {
        self.var_3.get() != 0.0
    }

    pub fn skip_y(&self) -> bool {
        self.var_4.get() != 0.0
    }

    pub fn restore_v_ref(&self) {
        self.v_ref.put(DEFAULT_V_REF);
    }
}

impl Default for PathParams {
    fn default() -> Self {
        Self::new()
    }
}
