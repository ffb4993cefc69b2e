//! Seam between the bridge and the host simulation's actuator interface.

use crate::actuator::{ActuatorOutputs, CmdVel, ExternalCommand, ServoTarget};

/// Publication target for computed actuator values.
///
/// Implemented by whatever owns the simulated vehicle. Motor velocities and
/// servo positions go out on separate paths.
pub trait ActuatorSink {
    /// Rotor velocity targets, one per motor channel in channel order.
    fn publish_motor_velocities(&mut self, velocities: &[f64]);

    fn publish_servo_targets(&mut self, targets: &[ServoTarget]);

    /// Normalized commands for actuators driven by an external controller.
    fn publish_external_commands(&mut self, commands: &[ExternalCommand]);

    fn publish_cmd_vel(&mut self, cmd: CmdVel);
}

/// Push one tick's outputs into `sink`. Empty paths are not published.
pub fn publish_outputs(sink: &mut dyn ActuatorSink, outputs: &ActuatorOutputs) {
    if let Some(cmd) = outputs.cmd_vel {
        sink.publish_cmd_vel(cmd);
        return;
    }
    if !outputs.motor_velocities.is_empty() {
        sink.publish_motor_velocities(&outputs.motor_velocities);
    }
    if !outputs.servos.is_empty() {
        sink.publish_servo_targets(&outputs.servos);
    }
    if !outputs.external.is_empty() {
        sink.publish_external_commands(&outputs.external);
    }
}
