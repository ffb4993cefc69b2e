//! Frame conventions between the simulation and the autopilot.
//!
//! The simulation reports body quantities in FLU (forward, left, up) and
//! world quantities in ENU (east, north, up). The autopilot expects FRD
//! (forward, right, down) and NED (north, east, down). Both changes of
//! basis are carried as rotations so other conventions can be plugged in.

use core::f64::consts::{FRAC_1_SQRT_2, PI};

use nalgebra::{Quaternion, Unit, UnitQuaternion, Vector3};

/// Rotation taking FLU body vectors to FRD.
pub fn flu_to_frd() -> UnitQuaternion<f64> {
    UnitQuaternion::from_axis_angle(&Vector3::x_axis(), PI)
}

/// Rotation taking ENU world vectors to NED.
pub fn enu_to_ned() -> UnitQuaternion<f64> {
    Unit::new_normalize(Quaternion::new(0.0, FRAC_1_SQRT_2, FRAC_1_SQRT_2, 0.0))
}

/// Converts vectors and orientations from simulation frames to autopilot frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameConverter {
    /// Simulation body frame to autopilot body frame.
    body: UnitQuaternion<f64>,
    /// Simulation world frame to autopilot world frame.
    world: UnitQuaternion<f64>,
}

impl FrameConverter {
    pub fn new(body: UnitQuaternion<f64>, world: UnitQuaternion<f64>) -> Self {
        Self { body, world }
    }

    /// Re-express a body-frame vector in the autopilot body frame.
    pub fn body_vector(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.body * v
    }

    /// Re-express an autopilot body-frame vector in the simulation body frame.
    pub fn body_vector_inverse(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.body.inverse() * v
    }

    /// Re-express a world-frame vector in the autopilot world frame.
    pub fn world_vector(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.world * v
    }

    pub fn world_vector_inverse(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.world.inverse() * v
    }

    /// Convert a simulation body-to-world rotation into the autopilot's
    /// body-to-world rotation (e.g. `q_FLU_to_ENU` into `q_FRD_to_NED`).
    pub fn orientation(&self, q_sim: &UnitQuaternion<f64>) -> UnitQuaternion<f64> {
        self.world * q_sim * self.body.inverse()
    }

    /// Inverse of [`FrameConverter::orientation`].
    pub fn inverse_orientation(&self, q_autopilot: &UnitQuaternion<f64>) -> UnitQuaternion<f64> {
        self.world.inverse() * q_autopilot * self.body
    }
}

impl Default for FrameConverter {
    fn default() -> Self {
        Self::new(flu_to_frd(), enu_to_ned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::f64::consts::FRAC_PI_2;

    const EPS: f64 = 1e-9;

    fn assert_vec_eq(a: Vector3<f64>, b: Vector3<f64>) {
        assert!((a - b).norm() < EPS, "expected {b:?}, got {a:?}");
    }

    #[test]
    fn test_body_vector_flu_to_frd() {
        let conv = FrameConverter::default();
        assert_vec_eq(
            conv.body_vector(&Vector3::new(1.0, 2.0, 3.0)),
            Vector3::new(1.0, -2.0, -3.0),
        );
    }

    #[test]
    fn test_world_vector_enu_to_ned() {
        let conv = FrameConverter::default();
        assert_vec_eq(
            conv.world_vector(&Vector3::new(1.0, 2.0, 3.0)),
            Vector3::new(2.0, 1.0, -3.0),
        );
    }

    #[test]
    fn test_gravity_reaction_points_up_in_frd() {
        // A level vehicle at rest measures +9.8 on FLU z, which is -9.8 on FRD z.
        let conv = FrameConverter::default();
        let accel = conv.body_vector(&Vector3::new(0.0, 0.0, 9.8));
        assert_vec_eq(accel, Vector3::new(0.0, 0.0, -9.8));
    }

    #[test]
    fn test_facing_north_is_identity_in_ned() {
        let conv = FrameConverter::default();
        let q_flu_to_enu = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), FRAC_PI_2);
        let q_frd_to_ned = conv.orientation(&q_flu_to_enu);
        assert!(q_frd_to_ned.angle_to(&UnitQuaternion::identity()) < EPS);
    }

    #[test]
    fn test_facing_east_is_ninety_degrees_yaw() {
        let conv = FrameConverter::default();
        let q_frd_to_ned = conv.orientation(&UnitQuaternion::identity());
        let (roll, pitch, yaw) = q_frd_to_ned.euler_angles();
        assert!(roll.abs() < EPS);
        assert!(pitch.abs() < EPS);
        assert!((yaw - FRAC_PI_2).abs() < EPS);
    }

    #[test]
    fn test_orientation_round_trip() {
        let conv = FrameConverter::default();
        let q = UnitQuaternion::from_euler_angles(0.3, -0.7, 2.1);
        let back = conv.inverse_orientation(&conv.orientation(&q));
        assert!(back.angle_to(&q) < EPS);
    }

    #[test]
    fn test_vector_round_trip() {
        let conv = FrameConverter::default();
        let v = Vector3::new(-4.0, 0.5, 7.25);
        assert_vec_eq(conv.body_vector_inverse(&conv.body_vector(&v)), v);
        assert_vec_eq(conv.world_vector_inverse(&conv.world_vector(&v)), v);
    }

    #[test]
    fn test_orientation_consistent_with_vectors() {
        // Rotating a body vector with the converted attitude must match
        // rotating in the simulation frames and converting afterwards.
        let conv = FrameConverter::default();
        let q = UnitQuaternion::from_euler_angles(0.1, 0.2, 0.3);
        let v_flu = Vector3::new(1.0, -2.0, 0.5);
        let via_sim = conv.world_vector(&(q * v_flu));
        let via_autopilot = conv.orientation(&q) * conv.body_vector(&v_flu);
        assert_vec_eq(via_sim, via_autopilot);
    }
}
