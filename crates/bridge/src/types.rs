use nalgebra::{UnitQuaternion, Vector3};

use crate::discovery::RangeSensorKind;

/// Length of the actuator command vector carried by one autopilot message.
pub const MAX_CHANNELS: usize = 16;

/// Per-tick timing supplied by the host simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateInfo {
    /// Simulation time at the start of this tick, in microseconds.
    pub sim_time_us: u64,
    /// Tick length in microseconds.
    pub dt_us: u64,
    /// Whether the host simulation is paused.
    pub paused: bool,
}

/// Sensor category, one pending snapshot slot per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    Pose,
    Imu,
    Barometer,
    Magnetometer,
    Gps,
}

/// Model pose from the host, world frame ENU, body frame FLU.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseSample {
    pub timestamp_us: u64,
    /// Position in metres (east, north, up) relative to the world origin.
    pub position_enu: Vector3<f64>,
    /// Rotation from body FLU to world ENU.
    pub orientation: UnitQuaternion<f64>,
}

/// Raw IMU reading in body FLU.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuSample {
    pub timestamp_us: u64,
    /// Angular velocity in rad/s.
    pub angular_velocity: Vector3<f64>,
    /// Specific force in m/s².
    pub linear_acceleration: Vector3<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarometerSample {
    pub timestamp_us: u64,
    /// Static pressure in pascal.
    pub pressure_pa: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MagnetometerSample {
    pub timestamp_us: u64,
    /// Magnetic field in tesla, body FLU.
    pub field_tesla: Vector3<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsSample {
    pub timestamp_us: u64,
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    /// Altitude above mean sea level in metres.
    pub altitude_m: f64,
    /// Velocity in m/s (east, north, up).
    pub velocity_enu: Vector3<f64>,
}

/// Distance reading from a discovered range sensor link.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeSample {
    pub timestamp_us: u64,
    pub distance_m: f64,
}

/// Latest measurement delivered by a host sensor callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorSnapshot {
    Pose(PoseSample),
    Imu(ImuSample),
    Barometer(BarometerSample),
    Magnetometer(MagnetometerSample),
    Gps(GpsSample),
}

impl SensorSnapshot {
    pub fn kind(&self) -> SensorKind {
        match self {
            Self::Pose(_) => SensorKind::Pose,
            Self::Imu(_) => SensorKind::Imu,
            Self::Barometer(_) => SensorKind::Barometer,
            Self::Magnetometer(_) => SensorKind::Magnetometer,
            Self::Gps(_) => SensorKind::Gps,
        }
    }

    pub fn timestamp_us(&self) -> u64 {
        match self {
            Self::Pose(s) => s.timestamp_us,
            Self::Imu(s) => s.timestamp_us,
            Self::Barometer(s) => s.timestamp_us,
            Self::Magnetometer(s) => s.timestamp_us,
            Self::Gps(s) => s.timestamp_us,
        }
    }
}

/// IMU data ready for the autopilot, body FRD.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuMessage {
    pub time_us: u64,
    /// Wrapping sample counter, stamped when the sample arrived.
    pub seq: u8,
    pub accel_mss: Vector3<f64>,
    pub gyro_rads: Vector3<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarometerMessage {
    pub time_us: u64,
    pub abs_pressure_hpa: f64,
    pub pressure_alt_m: f64,
    pub temperature_c: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MagnetometerMessage {
    pub time_us: u64,
    /// Field in gauss, body FRD.
    pub field_gauss: Vector3<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsMessage {
    pub time_us: u64,
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub alt_m: f64,
    /// Velocity in m/s (north, east, down).
    pub velocity_ned: Vector3<f64>,
    /// Horizontal position accuracy in metres.
    pub eph_m: f64,
    /// Vertical position accuracy in metres.
    pub epv_m: f64,
    pub fix_type: u8,
    pub satellites: u8,
}

/// Simulator truth state, used by the autopilot for estimator validation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroundTruthMessage {
    pub time_us: u64,
    /// Rotation from body FRD to world NED.
    pub attitude: UnitQuaternion<f64>,
    /// Body rates in rad/s, FRD.
    pub angular_velocity: Vector3<f64>,
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub alt_m: f64,
    pub velocity_ned: Vector3<f64>,
    /// Specific force in m/s², body FRD.
    pub accel_mss: Vector3<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeMessage {
    pub time_us: u64,
    pub kind: RangeSensorKind,
    pub distance_m: f64,
    pub min_distance_m: f64,
    pub max_distance_m: f64,
}

/// One protocol-ready message for the autopilot link.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorMessage {
    Heartbeat,
    Imu(ImuMessage),
    Barometer(BarometerMessage),
    Magnetometer(MagnetometerMessage),
    Gps(GpsMessage),
    GroundTruth(GroundTruthMessage),
    Range(RangeMessage),
}

/// Decoded actuator command received from the autopilot.
#[derive(Debug, Clone, PartialEq)]
pub struct ActuatorControls {
    /// Autopilot timestamp in microseconds.
    pub time_us: u64,
    /// Command vector, normally in [-1, 1].
    pub controls: Vec<f32>,
    pub armed: bool,
}
