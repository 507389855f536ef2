//! Discrete state observer
//!
//! Linear state-space estimator for the Romi drivetrain, discretised for a
//! fixed 20 ms step. The matrices are only valid at that rate: run the
//! observer at [`OBSERVER_PERIOD`] or re-derive them.
//!
//! ```text
//! x = [Ω_L, Ω_R, s, ψ]                 wheel speeds (rad/s), centre travel (mm), heading (rad)
//! u = [v_L, v_R, s_L, s_R, ψ, ψ̇]       motor voltages (V), wheel travel (mm), IMU heading and rate
//! y = [s_L, s_R, ψ, ψ̇]
//!
//! y_k     = C · x_k
//! x_(k+1) = A · x_k + B · u_k
//! ```
//!
//! Each [`Observer::step`] returns the output of the state it started from,
//! so `y_k` never depends on `u_k`.

use embassy_time::Duration;

/// Step the matrices were discretised for
pub const OBSERVER_PERIOD: Duration = Duration::from_millis(20);

/// Discrete state matrix
pub const A_D: [[f32; 4]; 4] = [
    [0.0012, 0.0012, 0.0140, 0.0],
    [0.0012, 0.0012, 0.0140, 0.0],
    [-0.0001, -0.0001, 0.0039, 0.0],
    [0.0, 0.0, 0.0, 0.0],
];

/// Discrete input matrix
pub const B_D: [[f32; 6]; 4] = [
    [0.0506, 0.0436, -0.0070, -0.0070, 0.0, -2.0241],
    [0.0436, 0.0506, -0.0070, -0.0070, 0.0, 2.0241],
    [0.0029, 0.0029, 0.4980, 0.4980, 0.0, 0.0],
    [0.0, 0.0, 0.0, 0.0, 1.0, 0.02],
];

/// Output matrix
pub const C: [[f32; 4]; 4] = [
    [0.0, 0.0, 1.0, -70.5],
    [0.0, 0.0, 1.0, 70.5],
    [0.0, 0.0, 0.0, 1.0],
    [-0.2465, 0.2465, 0.0, 0.0],
];

/// Measurements folded into the state each step
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ObserverInput {
    /// Voltage applied to the left motor (V)
    pub left_voltage: f32,
    /// Voltage applied to the right motor (V)
    pub right_voltage: f32,
    /// Left wheel travel (mm)
    pub left_travel: f32,
    /// Right wheel travel (mm)
    pub right_travel: f32,
    /// IMU heading (rad)
    pub heading: f32,
    /// IMU yaw rate (rad/s)
    pub yaw_rate: f32,
}

impl ObserverInput {
    fn vector(&self) -> [f32; 6] {
        [
            self.left_voltage,
            self.right_voltage,
            self.left_travel,
            self.right_travel,
            self.heading,
            self.yaw_rate,
        ]
    }
}

/// Estimated outputs
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ObserverOutput {
    /// Left wheel travel (mm)
    pub left_position: f32,
    /// Right wheel travel (mm)
    pub right_position: f32,
    /// Heading (rad)
    pub heading: f32,
    /// Yaw rate (rad/s)
    pub yaw_rate: f32,
}

/// State estimator over fixed discrete matrices
#[derive(Debug, Clone)]
pub struct Observer {
    a: [[f32; 4]; 4],
    b: [[f32; 6]; 4],
    c: [[f32; 4]; 4],
    state: [f32; 4],
}

impl Observer {
    /// Observer for the Romi drivetrain, starting from rest
    pub const fn new() -> Self {
        Self::with_matrices(A_D, B_D, C)
    }

    pub const fn with_matrices(a: [[f32; 4]; 4], b: [[f32; 6]; 4], c: [[f32; 4]; 4]) -> Self {
        Self {
            a,
            b,
            c,
            state: [0.0; 4],
        }
    }

    pub fn state(&self) -> [f32; 4] {
        self.state
    }

    /// Estimated centre travel in mm
    pub fn center_position(&self) -> f32 {
        self.state[2]
    }

    /// Output of the current state
    pub fn output(&self) -> ObserverOutput {
        let y = mul(&self.c, &self.state);
        ObserverOutput {
            left_position: y[0],
            right_position: y[1],
            heading: y[2],
            yaw_rate: y[3],
        }
    }

    /// Fold one input into the state. Returns the output of the state
    /// before the update.
    pub fn step(&mut self, input: &ObserverInput) -> ObserverOutput {
        let output = self.output();
        let ax = mul(&self.a, &self.state);
        let bu = mul(&self.b, &input.vector());
        for (x, (ax, bu)) in self.state.iter_mut().zip(ax.into_iter().zip(bu)) {
            *x = ax + bu;
        }
        output
    }
}

impl Default for Observer {
    fn default() -> Self {
        Self::new()
    }
}

/// Matrix-vector product
fn mul<const R: usize, const K: usize>(m: &[[f32; K]; R], v: &[f32; K]) -> [f32; R] {
    core::array::from_fn(|row| m[row].iter().zip(v).map(|(a, b)| a * b).sum())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(k: usize) -> ObserverInput {
        let k = k as f32;
        ObserverInput {
            left_voltage: 3.0 + 0.1 * k,
            right_voltage: 3.2 - 0.05 * k,
            left_travel: 4.0 * k,
            right_travel: 4.5 * k,
            heading: 0.01 * k,
            yaw_rate: 0.5,
        }
    }

    #[test]
    fn output_comes_from_state_before_the_input() {
        let mut observer = Observer::new();
        for k in 0..20 {
            let before = observer.state();
            let expected = mul(&C, &before);

            // A different input on a cloned observer must give the same y_k
            let mut other = observer.clone();
            let alt = other.step(&ObserverInput {
                left_voltage: 100.0,
                ..input(k)
            });

            let y = observer.step(&input(k));
            assert_eq!([y.left_position, y.right_position, y.heading, y.yaw_rate], expected);
            assert_eq!(y, alt);
            assert_ne!(observer.state(), other.state());
        }
    }

    #[test]
    fn first_step_from_rest_is_pure_input() {
        let mut observer = Observer::new();
        let u = input(3);
        let y = observer.step(&u);
        assert_eq!(y, ObserverOutput::default());
        assert_eq!(observer.state(), mul(&B_D, &u.vector()));
    }

    #[test]
    fn heading_state_tracks_imu_input() {
        let mut observer = Observer::new();
        let u = ObserverInput {
            heading: 1.0,
            yaw_rate: 0.5,
            ..ObserverInput::default()
        };
        observer.step(&u);
        // ψ row of B passes the IMU heading plus one step of yaw rate
        assert!((observer.state()[3] - 1.01).abs() < 1e-6);
        let y = observer.step(&u);
        assert!((y.heading - 1.01).abs() < 1e-6);
    }

    #[test]
    fn straight_drive_reports_equal_wheel_travel() {
        let mut observer = Observer::new();
        let u = ObserverInput {
            left_voltage: 4.0,
            right_voltage: 4.0,
            left_travel: 100.0,
            right_travel: 100.0,
            ..ObserverInput::default()
        };
        observer.step(&u);
        let y = observer.step(&u);
        assert!((y.left_position - y.right_position).abs() < 1e-4);
        assert!(y.left_position > 90.0);
    }
}
