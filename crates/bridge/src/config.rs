//! Bridge configuration, loaded from JSON and validated before anything starts.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::noise::NoiseParams;
use crate::types::MAX_CHANNELS;

/// How a channel's command reaches the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlType {
    /// Rotor velocity target.
    Motor,
    /// Joint position target on the servo output path.
    Servo,
    /// Normalized command forwarded to an external joint controller.
    PassThrough,
}

/// Airframe role of a channel. Roles with an enabled external PID are
/// forwarded as normalized commands instead of direct targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelRole {
    #[default]
    Generic,
    Propeller,
    Elevator,
    LeftElevon,
    RightElevon,
}

fn unit_scaling() -> f64 {
    1.0
}

/// One actuator output.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChannelConfig {
    pub control_type: ControlType,
    /// Position in the received command vector.
    pub input_index: usize,
    #[serde(default = "unit_scaling")]
    pub input_scaling: f64,
    #[serde(default)]
    pub input_offset: f64,
    #[serde(default)]
    pub zero_position_disarmed: f64,
    #[serde(default)]
    pub zero_position_armed: f64,
    #[serde(default)]
    pub role: ChannelRole,
    /// Host topic for servo and pass-through outputs.
    #[serde(default)]
    pub topic: Option<String>,
}

impl ChannelConfig {
    pub fn motor(input_index: usize, input_scaling: f64) -> Self {
        Self {
            control_type: ControlType::Motor,
            input_index,
            input_scaling,
            input_offset: 0.0,
            zero_position_disarmed: 0.0,
            zero_position_armed: 0.0,
            role: ChannelRole::Generic,
            topic: None,
        }
    }

    pub fn servo(input_index: usize, input_scaling: f64) -> Self {
        Self {
            control_type: ControlType::Servo,
            ..Self::motor(input_index, input_scaling)
        }
    }

    fn validate(&self, channel: usize) -> Result<(), ConfigError> {
        if self.input_index >= MAX_CHANNELS {
            return Err(ConfigError::ChannelIndexOutOfRange {
                channel,
                index: self.input_index,
                max: MAX_CHANNELS,
            });
        }
        let fields = [
            ("input_scaling", self.input_scaling),
            ("input_offset", self.input_offset),
            ("zero_position_disarmed", self.zero_position_disarmed),
            ("zero_position_armed", self.zero_position_armed),
        ];
        for (field, value) in fields {
            if !value.is_finite() {
                return Err(ConfigError::NonFiniteChannelValue { channel, field });
            }
        }
        Ok(())
    }
}

/// Aggregate thrust/torque input mode, replacing per-channel mapping.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CmdVelConfig {
    pub thrust_index: usize,
    pub torque_index: usize,
    pub thrust_scaling: f64,
    pub torque_scaling: f64,
}

impl Default for CmdVelConfig {
    fn default() -> Self {
        Self {
            thrust_index: 0,
            torque_index: 1,
            thrust_scaling: 1.0,
            torque_scaling: 1.0,
        }
    }
}

/// Which airframe roles are driven by an external closed-loop controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct ExternalControllers {
    pub use_propeller_pid: bool,
    pub use_elevator_pid: bool,
    pub use_left_elevon_pid: bool,
    pub use_right_elevon_pid: bool,
}

impl ExternalControllers {
    pub fn handles(&self, role: ChannelRole) -> bool {
        match role {
            ChannelRole::Generic => false,
            ChannelRole::Propeller => self.use_propeller_pid,
            ChannelRole::Elevator => self.use_elevator_pid,
            ChannelRole::LeftElevon => self.use_left_elevon_pid,
            ChannelRole::RightElevon => self.use_right_elevon_pid,
        }
    }
}

/// Host topic names, relative to the namespace.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TopicNames {
    pub pose: String,
    pub imu: String,
    pub gps: String,
    pub magnetometer: String,
    pub barometer: String,
    pub cmd_vel: String,
    pub motor_speed: String,
}

impl Default for TopicNames {
    fn default() -> Self {
        Self {
            pose: "/pose".into(),
            imu: "/imu".into(),
            gps: "/gps".into(),
            magnetometer: "/magnetometer".into(),
            barometer: "/air_pressure".into(),
            cmd_vel: "/cmd_vel".into(),
            motor_speed: "/gazebo/command/motor_speed".into(),
        }
    }
}

impl TopicNames {
    /// Prefix `topic` with `namespace`, e.g. `("iris", "/imu")` -> `/iris/imu`.
    pub fn qualified(namespace: &str, topic: &str) -> String {
        let namespace = namespace.trim_matches('/');
        let topic = topic.trim_start_matches('/');
        if namespace.is_empty() {
            format!("/{topic}")
        } else {
            format!("/{namespace}/{topic}")
        }
    }
}

/// Geodetic reference used for flat-earth projections.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct GeoPoint {
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub alt_m: f64,
}

impl Default for GeoPoint {
    fn default() -> Self {
        Self {
            lat_deg: 47.397742,
            lon_deg: 8.545594,
            alt_m: 488.0,
        }
    }
}

/// Per-field noise applied by the sensor assembler.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct NoiseConfig {
    pub baro_pressure_hpa: NoiseParams,
    pub baro_temperature_c: NoiseParams,
    pub mag_gauss: NoiseParams,
    pub gps_horizontal_m: NoiseParams,
    pub gps_vertical_m: NoiseParams,
    pub gps_velocity_ms: NoiseParams,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            baro_pressure_hpa: NoiseParams::new(0.0, 0.01),
            baro_temperature_c: NoiseParams::new(0.0, 0.05),
            mag_gauss: NoiseParams::new(0.0, 0.001),
            gps_horizontal_m: NoiseParams::NONE,
            gps_vertical_m: NoiseParams::NONE,
            gps_velocity_ms: NoiseParams::NONE,
        }
    }
}

impl NoiseConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.baro_pressure_hpa.validate("baro_pressure_hpa")?;
        self.baro_temperature_c.validate("baro_temperature_c")?;
        self.mag_gauss.validate("mag_gauss")?;
        self.gps_horizontal_m.validate("gps_horizontal_m")?;
        self.gps_vertical_m.validate("gps_vertical_m")?;
        self.gps_velocity_ms.validate("gps_velocity_ms")
    }
}

/// Retry policy for autopilot host name resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ResolverSettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 2_000,
        }
    }
}

/// Complete bridge configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub namespace: String,
    pub topics: TopicNames,
    /// Autopilot host name or address.
    pub hostname: String,
    /// Autopilot UDP port.
    pub port: u16,
    /// Local UDP port (0 = ephemeral).
    pub local_port: u16,
    pub protocol_version: f32,
    pub enable_lockstep: bool,
    pub speed_factor: f64,
    pub update_skip_factor: u8,
    /// IMU send interval in free-running mode.
    pub imu_update_interval_s: f64,
    pub baro_update_interval_s: f64,
    pub mag_update_interval_s: f64,
    pub gps_update_interval_s: f64,
    pub heartbeat_interval_s: f64,
    pub lockstep_timeout_ms: u64,
    pub gravity: [f64; 3],
    pub home: GeoPoint,
    pub noise: NoiseConfig,
    pub channels: Vec<ChannelConfig>,
    pub cmd_vel: Option<CmdVelConfig>,
    pub external_controllers: ExternalControllers,
    pub resolver: ResolverSettings,
    /// Seed for the noise generator. `None` draws from entropy.
    pub random_seed: Option<u64>,
    /// Host link names to scan for range sensors.
    pub range_sensor_links: Vec<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            topics: TopicNames::default(),
            hostname: "localhost".into(),
            port: 4560,
            local_port: 0,
            protocol_version: 2.0,
            enable_lockstep: false,
            speed_factor: 1.0,
            update_skip_factor: 1,
            imu_update_interval_s: 0.004,
            baro_update_interval_s: 0.02,
            mag_update_interval_s: 0.02,
            gps_update_interval_s: 0.2,
            heartbeat_interval_s: 1.0,
            lockstep_timeout_ms: 500,
            gravity: [0.0, 0.0, -9.8],
            home: GeoPoint::default(),
            noise: NoiseConfig::default(),
            channels: Vec::new(),
            cmd_vel: None,
            external_controllers: ExternalControllers::default(),
            resolver: ResolverSettings::default(),
            random_seed: None,
            range_sensor_links: Vec::new(),
        }
    }
}

impl BridgeConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Check every startup invariant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channels.len() > MAX_CHANNELS {
            return Err(ConfigError::TooManyChannels {
                count: self.channels.len(),
                max: MAX_CHANNELS,
            });
        }
        for (i, channel) in self.channels.iter().enumerate() {
            channel.validate(i)?;
        }
        if self.update_skip_factor == 0 {
            return Err(ConfigError::InvalidSkipFactor);
        }
        if !self.speed_factor.is_finite() || self.speed_factor <= 0.0 {
            return Err(ConfigError::InvalidSpeedFactor(self.speed_factor));
        }
        let intervals = [
            ("imu_update_interval_s", self.imu_update_interval_s),
            ("baro_update_interval_s", self.baro_update_interval_s),
            ("mag_update_interval_s", self.mag_update_interval_s),
            ("gps_update_interval_s", self.gps_update_interval_s),
            ("heartbeat_interval_s", self.heartbeat_interval_s),
        ];
        for (name, value) in intervals {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidInterval(name));
            }
        }
        if self.gravity.iter().any(|g| !g.is_finite()) {
            return Err(ConfigError::InvalidInterval("gravity"));
        }
        if let Some(cmd_vel) = &self.cmd_vel {
            if cmd_vel.thrust_index >= MAX_CHANNELS || cmd_vel.torque_index >= MAX_CHANNELS {
                return Err(ConfigError::InvalidCmdVel(format!(
                    "indices ({}, {}) must be below {MAX_CHANNELS}",
                    cmd_vel.thrust_index, cmd_vel.torque_index
                )));
            }
            if !cmd_vel.thrust_scaling.is_finite() || !cmd_vel.torque_scaling.is_finite() {
                return Err(ConfigError::InvalidCmdVel("scaling must be finite".into()));
            }
        }
        self.noise.validate()
    }

    pub fn lockstep_timeout(&self) -> Duration {
        Duration::from_millis(self.lockstep_timeout_ms)
    }

    /// Fully qualified host topic for `topic`.
    pub fn topic(&self, topic: &str) -> String {
        TopicNames::qualified(&self.namespace, topic)
    }
}

/// Seconds to whole microseconds.
pub(crate) fn secs_to_us(secs: f64) -> u64 {
    (secs * 1_000_000.0).round() as u64
}
