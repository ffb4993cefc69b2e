//! Built-in kinematic vehicle used as the host simulation.
//!
//! Self-contained stand-in for the physics engine, suitable for CI and for
//! running the bridge without Gazebo. Models vertical thrust and yaw only:
//! motor velocities produce thrust and reaction torque, the vehicle stays
//! level. Sensors are synthesized from the integrated state in the host's
//! conventions (world ENU, body FLU).

use nalgebra::{UnitQuaternion, Vector3};

use crate::actuator::{CmdVel, ExternalCommand, ServoTarget};
use crate::atmosphere::StandardAtmosphere;
use crate::bridge::{MavlinkBridge, SyncStatus};
use crate::config::{BridgeConfig, GeoPoint};
use crate::host::ActuatorSink;
use crate::noise::{NoiseInjector, NoiseParams};
use crate::types::{
    BarometerSample, GpsSample, ImuSample, MagnetometerSample, PoseSample, RangeSample,
    SensorSnapshot, UpdateInfo,
};

/// Parameters of the kinematic vehicle.
#[derive(Debug, Clone)]
pub struct KinematicConfig {
    /// Physics step in microseconds.
    pub step_us: u64,
    pub mass_kg: f64,
    /// Thrust per squared rotor velocity, N/(rad/s)².
    pub motor_constant: f64,
    /// Reaction torque per unit thrust, m.
    pub moment_constant: f64,
    pub max_rotor_velocity: f64,
    /// Yaw moment of inertia, kg·m².
    pub inertia_z: f64,
    /// Gravity in world ENU, m/s².
    pub gravity: Vector3<f64>,
    pub home: GeoPoint,
    /// Earth magnetic field in world ENU, tesla.
    pub magnetic_field: Vector3<f64>,
    pub accel_noise: NoiseParams,
    pub gyro_noise: NoiseParams,
    /// RNG seed for deterministic mode. None = random.
    pub seed: Option<u64>,
}

impl Default for KinematicConfig {
    fn default() -> Self {
        Self {
            step_us: 4_000,
            mass_kg: 1.5,
            motor_constant: 8.54858e-6,
            moment_constant: 0.016,
            max_rotor_velocity: 1_100.0,
            inertia_z: 0.03,
            gravity: Vector3::new(0.0, 0.0, -9.8),
            home: GeoPoint::default(),
            magnetic_field: Vector3::new(0.0, 2.1e-5, -4.2e-5),
            accel_noise: NoiseParams::NONE,
            gyro_noise: NoiseParams::NONE,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct VehicleState {
    /// Height above ground, m.
    altitude: f64,
    climb_rate: f64,
    vertical_accel: f64,
    /// Heading in radians (0 = east, CCW positive).
    yaw: f64,
    yaw_rate: f64,
}

impl KinematicConfig {
    /// Share gravity, home position and seed with the bridge.
    pub fn from_bridge(config: &BridgeConfig) -> Self {
        let [x, y, z] = config.gravity;
        Self {
            gravity: Vector3::new(x, y, z),
            home: config.home,
            seed: config.random_seed,
            ..Default::default()
        }
    }
}

/// Kinematic host vehicle.
pub struct KinematicHost {
    config: KinematicConfig,
    state: VehicleState,
    noise: NoiseInjector,
    atmosphere: StandardAtmosphere,
    sim_time_us: u64,
    paused: bool,
    rotor_velocities: Vec<f64>,
    cmd_vel: Option<CmdVel>,
    servo_positions: Vec<ServoTarget>,
    external_commands: Vec<ExternalCommand>,
}

impl KinematicHost {
    pub fn new(config: KinematicConfig) -> Self {
        Self {
            noise: NoiseInjector::new(config.seed),
            config,
            state: VehicleState::default(),
            atmosphere: StandardAtmosphere::default(),
            sim_time_us: 0,
            paused: false,
            rotor_velocities: Vec::new(),
            cmd_vel: None,
            servo_positions: Vec::new(),
            external_commands: Vec::new(),
        }
    }

    pub fn sim_time_us(&self) -> u64 {
        self.sim_time_us
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// Timing of the tick about to run.
    pub fn update_info(&self) -> UpdateInfo {
        UpdateInfo {
            sim_time_us: self.sim_time_us,
            dt_us: self.config.step_us,
            paused: self.paused,
        }
    }

    pub fn altitude(&self) -> f64 {
        self.state.altitude
    }

    pub fn yaw(&self) -> f64 {
        self.state.yaw
    }

    pub fn rotor_velocities(&self) -> &[f64] {
        &self.rotor_velocities
    }

    pub fn servo_positions(&self) -> &[ServoTarget] {
        &self.servo_positions
    }

    pub fn external_commands(&self) -> &[ExternalCommand] {
        &self.external_commands
    }

    /// Thrust (N) and yaw torque (N·m) from the current actuator state.
    fn thrust_and_torque(&self) -> (f64, f64) {
        if let Some(cmd) = self.cmd_vel {
            return (cmd.thrust, cmd.torque);
        }
        self.rotor_velocities
            .iter()
            .enumerate()
            .fold((0.0, 0.0), |(thrust, torque), (i, &w)| {
                let w = w.clamp(-self.config.max_rotor_velocity, self.config.max_rotor_velocity);
                let f = self.config.motor_constant * w * w;
                // Even rotors spin CCW, odd CW.
                let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
                (thrust + f, torque + sign * self.config.moment_constant * f)
            })
    }

    /// Integrate one physics step.
    pub fn advance(&mut self) {
        if self.paused {
            return;
        }
        let dt = self.config.step_us as f64 / 1_000_000.0;
        let (thrust, torque) = self.thrust_and_torque();

        let mut accel = thrust / self.config.mass_kg + self.config.gravity.z;
        if self.state.altitude <= 0.0 && accel < 0.0 {
            accel = 0.0;
            self.state.climb_rate = self.state.climb_rate.max(0.0);
        }
        self.state.vertical_accel = accel;
        self.state.climb_rate += accel * dt;
        self.state.altitude += self.state.climb_rate * dt;
        if self.state.altitude < 0.0 {
            self.state.altitude = 0.0;
            self.state.climb_rate = 0.0;
            self.state.vertical_accel = 0.0;
        }

        let on_ground = self.state.altitude <= 0.0;
        self.state.yaw_rate = if on_ground {
            0.0
        } else {
            self.state.yaw_rate + torque / self.config.inertia_z * dt
        };
        self.state.yaw = normalize_angle(self.state.yaw + self.state.yaw_rate * dt);

        self.sim_time_us += self.config.step_us;
    }

    fn orientation(&self) -> UnitQuaternion<f64> {
        UnitQuaternion::from_axis_angle(&Vector3::z_axis(), self.state.yaw)
    }

    /// Sensor samples for the current state.
    pub fn sensor_snapshots(&mut self) -> Vec<SensorSnapshot> {
        let t = self.sim_time_us;
        let q = self.orientation();
        let velocity = Vector3::new(0.0, 0.0, self.state.climb_rate);
        let accel_world = Vector3::new(0.0, 0.0, self.state.vertical_accel);
        let specific_force = q.inverse() * (accel_world - self.config.gravity);
        let (accel_noise, gyro_noise) = (self.config.accel_noise, self.config.gyro_noise);
        let amsl = self.config.home.alt_m + self.state.altitude;

        vec![
            SensorSnapshot::Pose(PoseSample {
                timestamp_us: t,
                position_enu: Vector3::new(0.0, 0.0, self.state.altitude),
                orientation: q,
            }),
            SensorSnapshot::Imu(ImuSample {
                timestamp_us: t,
                angular_velocity: Vector3::new(0.0, 0.0, self.state.yaw_rate)
                    .map(|v| self.noise.add(v, gyro_noise)),
                linear_acceleration: specific_force.map(|v| self.noise.add(v, accel_noise)),
            }),
            SensorSnapshot::Barometer(BarometerSample {
                timestamp_us: t,
                pressure_pa: self.atmosphere.pressure_at(amsl),
            }),
            SensorSnapshot::Magnetometer(MagnetometerSample {
                timestamp_us: t,
                field_tesla: q.inverse() * self.config.magnetic_field,
            }),
            SensorSnapshot::Gps(GpsSample {
                timestamp_us: t,
                latitude_deg: self.config.home.lat_deg,
                longitude_deg: self.config.home.lon_deg,
                altitude_m: amsl,
                velocity_enu: velocity,
            }),
        ]
    }

    /// Downward range reading, identical for every range sensor.
    pub fn range_sample(&self) -> RangeSample {
        RangeSample {
            timestamp_us: self.sim_time_us,
            distance_m: self.state.altitude,
        }
    }
}

impl ActuatorSink for KinematicHost {
    fn publish_motor_velocities(&mut self, velocities: &[f64]) {
        self.rotor_velocities.clear();
        self.rotor_velocities.extend_from_slice(velocities);
    }

    fn publish_servo_targets(&mut self, targets: &[ServoTarget]) {
        self.servo_positions.clear();
        self.servo_positions.extend_from_slice(targets);
    }

    fn publish_external_commands(&mut self, commands: &[ExternalCommand]) {
        self.external_commands.clear();
        self.external_commands.extend_from_slice(commands);
    }

    fn publish_cmd_vel(&mut self, cmd: CmdVel) {
        self.cmd_vel = Some(cmd);
    }
}

impl std::fmt::Debug for KinematicHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KinematicHost")
            .field("sim_time_us", &self.sim_time_us)
            .field("altitude", &self.state.altitude)
            .field("yaw", &self.state.yaw)
            .finish()
    }
}

/// Run one full host tick: actuators in, physics step, sensors out.
pub async fn step(bridge: &mut MavlinkBridge, host: &mut KinematicHost) -> SyncStatus {
    let status = bridge.pre_update(&host.update_info(), host).await;
    if status == SyncStatus::Shutdown {
        return status;
    }
    host.advance();

    for snapshot in host.sensor_snapshots() {
        bridge.on_sensor(snapshot);
    }
    let range = host.range_sample();
    let links: Vec<String> = bridge.range_sensors().map(|s| s.link_name.clone()).collect();
    for link in &links {
        bridge.on_range(link, range);
    }

    bridge.post_update(&host.update_info()).await;
    status
}

/// Normalize angle to [-pi, pi].
fn normalize_angle(angle: f64) -> f64 {
    use std::f64::consts::{PI, TAU};
    let a = (angle + PI).rem_euclid(TAU);
    a - PI
}
