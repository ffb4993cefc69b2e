//! Actuator command dispatch.
//!
//! Maps the autopilot's command vector through the channel table into motor
//! velocities, servo positions, normalized commands for external joint
//! controllers, or a single thrust/torque pair in cmd_vel mode.

use tracing::{debug, info};

use crate::config::{
    BridgeConfig, ChannelConfig, ChannelRole, CmdVelConfig, ControlType, ExternalControllers,
};
use crate::error::ConfigError;
use crate::types::ActuatorControls;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServoTarget {
    /// Index into the channel table.
    pub channel: usize,
    pub position: f64,
}

/// Command for an actuator whose loop is closed outside the bridge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExternalCommand {
    pub channel: usize,
    pub role: ChannelRole,
    /// Command in [-1, 1].
    pub normalized: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CmdVel {
    pub thrust: f64,
    pub torque: f64,
}

/// Everything the dispatcher publishes for one tick.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActuatorOutputs {
    pub motor_velocities: Vec<f64>,
    pub servos: Vec<ServoTarget>,
    pub external: Vec<ExternalCommand>,
    pub cmd_vel: Option<CmdVel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchStats {
    pub commands_received: u64,
    /// Channel values that fell back to their disarmed default.
    pub malformed_channels: u64,
    /// Messages rejected outright (empty command vector).
    pub rejected_commands: u64,
}

#[derive(Debug)]
pub struct ActuatorDispatcher {
    channels: Vec<ChannelConfig>,
    cmd_vel: Option<CmdVelConfig>,
    external: ExternalControllers,
    received_first_actuator: bool,
    armed: bool,
    controls: Vec<f32>,
    stats: DispatchStats,
}

impl ActuatorDispatcher {
    pub fn new(config: &BridgeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            channels: config.channels.clone(),
            cmd_vel: config.cmd_vel.clone(),
            external: config.external_controllers,
            received_first_actuator: false,
            armed: false,
            controls: Vec::new(),
            stats: DispatchStats::default(),
        })
    }

    /// Whether any valid command has been received. Never resets.
    pub fn received_first_actuator(&self) -> bool {
        self.received_first_actuator
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Take a received command as the new last-known state.
    ///
    /// Returns `false` if the message carried no command vector.
    pub fn apply(&mut self, controls: &ActuatorControls) -> bool {
        if controls.controls.is_empty() {
            self.stats.rejected_commands += 1;
            debug!(t = controls.time_us, "ignoring empty actuator command");
            return false;
        }
        if !self.received_first_actuator {
            info!(armed = controls.armed, "first actuator command received");
            self.received_first_actuator = true;
        }
        self.stats.commands_received += 1;
        self.stats.malformed_channels += self.count_malformed(&controls.controls);
        self.armed = controls.armed;
        self.controls.clone_from(&controls.controls);
        true
    }

    /// Apply a command and compute the resulting targets.
    pub fn dispatch(&mut self, controls: &ActuatorControls) -> ActuatorOutputs {
        self.apply(controls);
        self.outputs()
    }

    /// Targets for the last-known command, or the disarmed defaults if none
    /// has arrived yet. Pure with respect to dispatcher state.
    pub fn outputs(&self) -> ActuatorOutputs {
        if let Some(cmd_vel) = &self.cmd_vel {
            return ActuatorOutputs {
                cmd_vel: Some(self.cmd_vel_target(cmd_vel)),
                ..Default::default()
            };
        }

        let mut out = ActuatorOutputs::default();
        for (i, channel) in self.channels.iter().enumerate() {
            if channel.control_type == ControlType::PassThrough
                || self.external.handles(channel.role)
            {
                out.external.push(ExternalCommand {
                    channel: i,
                    role: channel.role,
                    normalized: self.normalized_target(channel),
                });
                continue;
            }
            let target = self.channel_target(channel);
            match channel.control_type {
                ControlType::Motor => out.motor_velocities.push(target),
                ControlType::Servo => out.servos.push(ServoTarget {
                    channel: i,
                    position: target,
                }),
                ControlType::PassThrough => {}
            }
        }
        out
    }

    fn active(&self) -> bool {
        self.received_first_actuator && self.armed
    }

    /// Commanded value at `index`, if present and finite.
    fn command(&self, index: usize) -> Option<f64> {
        self.controls
            .get(index)
            .map(|&v| v as f64)
            .filter(|v| v.is_finite())
    }

    fn channel_target(&self, channel: &ChannelConfig) -> f64 {
        if !self.active() {
            return channel.zero_position_disarmed;
        }
        self.command(channel.input_index)
            .map(|u| (u + channel.input_offset) * channel.input_scaling + channel.zero_position_armed)
            .filter(|v| v.is_finite())
            .unwrap_or(channel.zero_position_disarmed)
    }

    fn normalized_target(&self, channel: &ChannelConfig) -> f64 {
        let fallback = channel.zero_position_disarmed.clamp(-1.0, 1.0);
        if !self.active() {
            return fallback;
        }
        self.command(channel.input_index)
            .map(|u| (u + channel.input_offset).clamp(-1.0, 1.0))
            .filter(|v| v.is_finite())
            .unwrap_or(fallback)
    }

    fn cmd_vel_target(&self, config: &CmdVelConfig) -> CmdVel {
        if !self.active() {
            return CmdVel::default();
        }
        let scaled = |index: usize, scaling: f64| {
            self.command(index)
                .map(|u| u * scaling)
                .filter(|v| v.is_finite())
                .unwrap_or(0.0)
        };
        CmdVel {
            thrust: scaled(config.thrust_index, config.thrust_scaling),
            torque: scaled(config.torque_index, config.torque_scaling),
        }
    }

    fn count_malformed(&self, controls: &[f32]) -> u64 {
        let valid = |index: usize| controls.get(index).is_some_and(|v| v.is_finite());
        let indices: Vec<usize> = match &self.cmd_vel {
            Some(c) => vec![c.thrust_index, c.torque_index],
            None => self.channels.iter().map(|c| c.input_index).collect(),
        };
        indices.into_iter().filter(|&i| !valid(i)).count() as u64
    }
}
