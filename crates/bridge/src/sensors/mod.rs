//! Sensor message assembly.
//!
//! Host callbacks drop samples into per-category slots (latest wins). Once per
//! send cycle the assembler turns the eligible slots into autopilot messages,
//! applying frame conversion, unit conversion and noise.

pub mod snapshot;

use nalgebra::{UnitQuaternion, Vector3};
use tracing::{debug, warn};

pub use snapshot::{ImuHandle, SnapshotSlot, StampedImu};

use crate::atmosphere::StandardAtmosphere;
use crate::config::{secs_to_us, BridgeConfig, GeoPoint, NoiseConfig};
use crate::discovery::RangeSensorLink;
use crate::frame::FrameConverter;
use crate::noise::NoiseInjector;
use crate::types::{
    BarometerMessage, BarometerSample, GpsMessage, GpsSample, GroundTruthMessage, ImuMessage,
    MagnetometerMessage, MagnetometerSample, PoseSample, RangeMessage, RangeSample, SensorKind,
    SensorMessage, SensorSnapshot,
};

const METERS_PER_DEG_LAT: f64 = 111_320.0;
const GAUSS_PER_TESLA: f64 = 10_000.0;
const GPS_FIX_3D: u8 = 3;
const GPS_SATELLITES: u8 = 10;
const MIN_EPH_M: f64 = 1.0;
const MIN_EPV_M: f64 = 1.5;

/// What the scheduler wants from one send cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CyclePlan {
    /// Current simulation time in microseconds.
    pub now_us: u64,
    /// Whether the pending IMU sample goes out this cycle.
    pub send_imu: bool,
    /// Expected IMU sequence increment between sends, if it is fixed.
    pub expected_imu_step: Option<u8>,
}

/// Counters kept by the assembler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblerStats {
    /// IMU sends whose sequence did not advance by the expected step.
    pub imu_seq_gaps: u64,
    /// Samples dropped for being older than the last sent one.
    pub stale_dropped: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct LastSent {
    imu: Option<u64>,
    pose: Option<u64>,
    barometer: Option<u64>,
    magnetometer: Option<u64>,
    gps: Option<u64>,
}

impl LastSent {
    fn get(&self, kind: SensorKind) -> Option<u64> {
        match kind {
            SensorKind::Imu => self.imu,
            SensorKind::Pose => self.pose,
            SensorKind::Barometer => self.barometer,
            SensorKind::Magnetometer => self.magnetometer,
            SensorKind::Gps => self.gps,
        }
    }

    fn is_stale(&self, kind: SensorKind, timestamp_us: u64) -> bool {
        self.get(kind).is_some_and(|last| timestamp_us < last)
    }

    fn elapsed(&self, kind: SensorKind, now_us: u64, interval_us: u64) -> bool {
        self.get(kind)
            .map_or(true, |last| now_us.saturating_sub(last) >= interval_us)
    }
}

#[derive(Debug, Clone, Copy)]
struct Intervals {
    barometer_us: u64,
    magnetometer_us: u64,
    gps_us: u64,
}

#[derive(Debug)]
struct RangeChannel {
    link: RangeSensorLink,
    slot: SnapshotSlot<RangeSample>,
    last_sent: Option<u64>,
}

/// Motion state from the previous ground-truth send.
#[derive(Debug, Clone, Copy)]
struct PreviousPose {
    sample: PoseSample,
    velocity_enu: Vector3<f64>,
}

pub struct SensorAssembler {
    frame: FrameConverter,
    noise: NoiseInjector,
    noise_config: NoiseConfig,
    atmosphere: StandardAtmosphere,
    home: GeoPoint,
    gravity_enu: Vector3<f64>,
    intervals: Intervals,
    imu: ImuHandle,
    pose: SnapshotSlot<PoseSample>,
    barometer: SnapshotSlot<BarometerSample>,
    magnetometer: SnapshotSlot<MagnetometerSample>,
    gps: SnapshotSlot<GpsSample>,
    ranges: Vec<RangeChannel>,
    last_sent: LastSent,
    previous_imu_seq: Option<u8>,
    previous_pose: Option<PreviousPose>,
    stats: AssemblerStats,
}

impl SensorAssembler {
    pub fn new(config: &BridgeConfig, range_sensors: Vec<RangeSensorLink>) -> Self {
        let [gx, gy, gz] = config.gravity;
        Self {
            frame: FrameConverter::default(),
            noise: NoiseInjector::new(config.random_seed),
            noise_config: config.noise,
            atmosphere: StandardAtmosphere::default(),
            home: config.home,
            gravity_enu: Vector3::new(gx, gy, gz),
            intervals: Intervals {
                barometer_us: secs_to_us(config.baro_update_interval_s),
                magnetometer_us: secs_to_us(config.mag_update_interval_s),
                gps_us: secs_to_us(config.gps_update_interval_s),
            },
            imu: ImuHandle::new(),
            pose: SnapshotSlot::new(),
            barometer: SnapshotSlot::new(),
            magnetometer: SnapshotSlot::new(),
            gps: SnapshotSlot::new(),
            ranges: range_sensors
                .into_iter()
                .map(|link| RangeChannel {
                    link,
                    slot: SnapshotSlot::new(),
                    last_sent: None,
                })
                .collect(),
            last_sent: LastSent::default(),
            previous_imu_seq: None,
            previous_pose: None,
            stats: AssemblerStats::default(),
        }
    }

    /// Handle for delivering IMU samples from another thread.
    pub fn imu_handle(&self) -> ImuHandle {
        self.imu.clone()
    }

    pub fn stats(&self) -> AssemblerStats {
        self.stats
    }

    pub fn range_sensors(&self) -> impl Iterator<Item = &RangeSensorLink> {
        self.ranges.iter().map(|r| &r.link)
    }

    /// Store a sensor callback sample. Returns `false` if it was dropped as stale.
    pub fn on_snapshot(&mut self, snapshot: SensorSnapshot) -> bool {
        if self
            .last_sent
            .is_stale(snapshot.kind(), snapshot.timestamp_us())
        {
            self.stats.stale_dropped += 1;
            debug!(kind = ?snapshot.kind(), t = snapshot.timestamp_us(), "dropping stale sample");
            return false;
        }
        match snapshot {
            SensorSnapshot::Pose(s) => self.pose.store(s),
            SensorSnapshot::Imu(s) => {
                self.imu.store(s);
            }
            SensorSnapshot::Barometer(s) => self.barometer.store(s),
            SensorSnapshot::Magnetometer(s) => self.magnetometer.store(s),
            SensorSnapshot::Gps(s) => self.gps.store(s),
        }
        true
    }

    /// Store a distance sample for a discovered range sensor link.
    pub fn on_range(&mut self, link_name: &str, sample: RangeSample) -> bool {
        let Some(channel) = self
            .ranges
            .iter_mut()
            .find(|r| r.link.link_name == link_name)
        else {
            return false;
        };
        if channel.last_sent.is_some_and(|last| sample.timestamp_us < last) {
            self.stats.stale_dropped += 1;
            return false;
        }
        channel.slot.store(sample);
        true
    }

    /// Forget the IMU sequence history, e.g. after a reconnect.
    pub fn reset_sequence(&mut self) {
        self.previous_imu_seq = None;
    }

    /// Build the messages due this cycle, consuming their snapshots.
    pub fn assemble(&mut self, plan: CyclePlan) -> Vec<SensorMessage> {
        let mut out = Vec::new();

        if plan.send_imu {
            if let Some(msg) = self.assemble_imu(plan.expected_imu_step) {
                out.push(SensorMessage::Imu(msg));
            }
        }

        if self.barometer.is_updated()
            && self.last_sent.elapsed(
                SensorKind::Barometer,
                plan.now_us,
                self.intervals.barometer_us,
            )
        {
            if let Some(sample) = self.barometer.take() {
                self.last_sent.barometer = Some(sample.timestamp_us);
                out.push(SensorMessage::Barometer(self.barometer_message(&sample)));
            }
        }

        if self.magnetometer.is_updated()
            && self.last_sent.elapsed(
                SensorKind::Magnetometer,
                plan.now_us,
                self.intervals.magnetometer_us,
            )
        {
            if let Some(sample) = self.magnetometer.take() {
                self.last_sent.magnetometer = Some(sample.timestamp_us);
                out.push(SensorMessage::Magnetometer(self.magnetometer_message(&sample)));
            }
        }

        if self.gps.is_updated()
            && self
                .last_sent
                .elapsed(SensorKind::Gps, plan.now_us, self.intervals.gps_us)
        {
            if let Some(sample) = self.gps.take() {
                self.last_sent.gps = Some(sample.timestamp_us);
                out.push(SensorMessage::Gps(self.gps_message(&sample)));
            }
        }

        if let Some(sample) = self.pose.take() {
            self.last_sent.pose = Some(sample.timestamp_us);
            out.push(SensorMessage::GroundTruth(self.ground_truth_message(&sample)));
        }

        for channel in &mut self.ranges {
            if let Some(sample) = channel.slot.take() {
                channel.last_sent = Some(sample.timestamp_us);
                let (min, max) = channel.link.kind.limits_m();
                out.push(SensorMessage::Range(RangeMessage {
                    time_us: sample.timestamp_us,
                    kind: channel.link.kind,
                    distance_m: sample.distance_m.clamp(min, max),
                    min_distance_m: min,
                    max_distance_m: max,
                }));
            }
        }

        out
    }

    fn assemble_imu(&mut self, expected_step: Option<u8>) -> Option<ImuMessage> {
        let stamped = self.imu.take()?;
        if self
            .last_sent
            .is_stale(SensorKind::Imu, stamped.sample.timestamp_us)
        {
            self.stats.stale_dropped += 1;
            return None;
        }

        if let (Some(previous), Some(step)) = (self.previous_imu_seq, expected_step) {
            let advanced = stamped.seq.wrapping_sub(previous);
            if advanced != step {
                self.stats.imu_seq_gaps += 1;
                warn!(
                    previous,
                    seq = stamped.seq,
                    expected = step,
                    "IMU sequence gap"
                );
            }
        }
        self.previous_imu_seq = Some(stamped.seq);
        self.last_sent.imu = Some(stamped.sample.timestamp_us);

        Some(ImuMessage {
            time_us: stamped.sample.timestamp_us,
            seq: stamped.seq,
            accel_mss: self.frame.body_vector(&stamped.sample.linear_acceleration),
            gyro_rads: self.frame.body_vector(&stamped.sample.angular_velocity),
        })
    }

    fn barometer_message(&mut self, sample: &BarometerSample) -> BarometerMessage {
        let abs_pressure_hpa = self
            .noise
            .add(sample.pressure_pa * 0.01, self.noise_config.baro_pressure_hpa);
        let pressure_pa = abs_pressure_hpa * 100.0;
        let temperature_c = self.noise.add(
            self.atmosphere.temperature_celsius_for_pressure(pressure_pa),
            self.noise_config.baro_temperature_c,
        );
        BarometerMessage {
            time_us: sample.timestamp_us,
            abs_pressure_hpa,
            pressure_alt_m: self.atmosphere.pressure_altitude(pressure_pa),
            temperature_c,
        }
    }

    fn magnetometer_message(&mut self, sample: &MagnetometerSample) -> MagnetometerMessage {
        let field = self.frame.body_vector(&sample.field_tesla) * GAUSS_PER_TESLA;
        let params = self.noise_config.mag_gauss;
        MagnetometerMessage {
            time_us: sample.timestamp_us,
            field_gauss: field.map(|v| self.noise.add(v, params)),
        }
    }

    fn gps_message(&mut self, sample: &GpsSample) -> GpsMessage {
        let noise = self.noise_config;
        let north_m = self.noise.sample(noise.gps_horizontal_m);
        let east_m = self.noise.sample(noise.gps_horizontal_m);
        let meters_per_deg_lon = METERS_PER_DEG_LAT * sample.latitude_deg.to_radians().cos();
        let velocity_ned = self
            .frame
            .world_vector(&sample.velocity_enu)
            .map(|v| self.noise.add(v, noise.gps_velocity_ms));

        GpsMessage {
            time_us: sample.timestamp_us,
            lat_deg: sample.latitude_deg + north_m / METERS_PER_DEG_LAT,
            lon_deg: sample.longitude_deg + east_m / meters_per_deg_lon.max(f64::EPSILON),
            alt_m: self.noise.add(sample.altitude_m, noise.gps_vertical_m),
            velocity_ned,
            eph_m: noise.gps_horizontal_m.stddev.max(MIN_EPH_M),
            epv_m: noise.gps_vertical_m.stddev.max(MIN_EPV_M),
            fix_type: GPS_FIX_3D,
            satellites: GPS_SATELLITES,
        }
    }

    fn ground_truth_message(&mut self, sample: &PoseSample) -> GroundTruthMessage {
        let mut velocity_enu = Vector3::zeros();
        let mut accel_enu = Vector3::zeros();
        let mut rates_flu = Vector3::zeros();

        if let Some(prev) = &self.previous_pose {
            let dt = sample
                .timestamp_us
                .saturating_sub(prev.sample.timestamp_us) as f64
                / 1_000_000.0;
            if dt > 0.0 {
                velocity_enu = (sample.position_enu - prev.sample.position_enu) / dt;
                accel_enu = (velocity_enu - prev.velocity_enu) / dt;
                let delta: UnitQuaternion<f64> = prev.sample.orientation.inverse() * sample.orientation;
                rates_flu = delta.scaled_axis() / dt;
            } else {
                velocity_enu = prev.velocity_enu;
            }
        }
        self.previous_pose = Some(PreviousPose {
            sample: *sample,
            velocity_enu,
        });

        // Specific force: what an accelerometer would read.
        let specific_force_flu = sample.orientation.inverse() * (accel_enu - self.gravity_enu);
        let position = sample.position_enu;
        let meters_per_deg_lon = METERS_PER_DEG_LAT * self.home.lat_deg.to_radians().cos();

        GroundTruthMessage {
            time_us: sample.timestamp_us,
            attitude: self.frame.orientation(&sample.orientation),
            angular_velocity: self.frame.body_vector(&rates_flu),
            lat_deg: self.home.lat_deg + position.y / METERS_PER_DEG_LAT,
            lon_deg: self.home.lon_deg + position.x / meters_per_deg_lon.max(f64::EPSILON),
            alt_m: self.home.alt_m + position.z,
            velocity_ned: self.frame.world_vector(&velocity_enu),
            accel_mss: self.frame.body_vector(&specific_force_flu),
        }
    }
}

impl std::fmt::Debug for SensorAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorAssembler")
            .field("stats", &self.stats)
            .field("range_sensors", &self.ranges.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::RangeSensorKind;
    use crate::noise::NoiseParams;
    use core::f64::consts::FRAC_PI_2;

    const EPS: f64 = 1e-6;

    fn quiet_config() -> BridgeConfig {
        BridgeConfig {
            random_seed: Some(1),
            noise: NoiseConfig {
                baro_pressure_hpa: NoiseParams::NONE,
                baro_temperature_c: NoiseParams::NONE,
                mag_gauss: NoiseParams::NONE,
                gps_horizontal_m: NoiseParams::NONE,
                gps_vertical_m: NoiseParams::NONE,
                gps_velocity_ms: NoiseParams::NONE,
            },
            ..Default::default()
        }
    }

    fn plan(now_us: u64) -> CyclePlan {
        CyclePlan {
            now_us,
            send_imu: true,
            expected_imu_step: Some(1),
        }
    }

    fn imu(t: u64) -> SensorSnapshot {
        SensorSnapshot::Imu(crate::types::ImuSample {
            timestamp_us: t,
            angular_velocity: Vector3::new(0.1, 0.2, 0.3),
            linear_acceleration: Vector3::new(0.0, 0.0, 9.8),
        })
    }

    fn baro(t: u64, pressure_pa: f64) -> SensorSnapshot {
        SensorSnapshot::Barometer(BarometerSample {
            timestamp_us: t,
            pressure_pa,
        })
    }

    #[test]
    fn test_imu_rotated_to_frd() {
        let mut asm = SensorAssembler::new(&quiet_config(), Vec::new());
        asm.on_snapshot(imu(1_000));
        let msgs = asm.assemble(plan(1_000));
        let SensorMessage::Imu(msg) = msgs[0] else {
            panic!("Expected IMU message, got: {msgs:?}");
        };
        assert!((msg.gyro_rads - Vector3::new(0.1, -0.2, -0.3)).norm() < EPS);
        assert!((msg.accel_mss - Vector3::new(0.0, 0.0, -9.8)).norm() < EPS);
        assert_eq!(msg.seq, 0);
    }

    #[test]
    fn test_imu_not_sent_when_not_planned() {
        let mut asm = SensorAssembler::new(&quiet_config(), Vec::new());
        asm.on_snapshot(imu(1_000));
        let msgs = asm.assemble(CyclePlan {
            send_imu: false,
            ..plan(1_000)
        });
        assert!(msgs.is_empty());
        // Still pending for the next cycle.
        assert_eq!(asm.assemble(plan(2_000)).len(), 1);
    }

    #[test]
    fn test_latest_wins_no_backlog() {
        let mut asm = SensorAssembler::new(&quiet_config(), Vec::new());
        for t in [1_000, 2_000, 3_000] {
            asm.on_snapshot(baro(t, 101_325.0));
        }
        let msgs = asm.assemble(plan(3_000));
        assert_eq!(msgs.len(), 1);
        let SensorMessage::Barometer(msg) = msgs[0] else {
            panic!("Expected barometer message");
        };
        assert_eq!(msg.time_us, 3_000);
        assert!(asm.assemble(plan(100_000)).is_empty());
    }

    #[test]
    fn test_barometer_altitude_and_temperature() {
        let mut asm = SensorAssembler::new(&quiet_config(), Vec::new());
        let atm = StandardAtmosphere::default();
        asm.on_snapshot(baro(1_000, atm.pressure_at(488.0)));
        let msgs = asm.assemble(plan(1_000));
        let SensorMessage::Barometer(msg) = msgs[0] else {
            panic!("Expected barometer message");
        };
        assert!((msg.pressure_alt_m - 488.0).abs() < 1e-3);
        assert!((msg.abs_pressure_hpa - atm.pressure_at(488.0) / 100.0).abs() < 1e-9);
        assert!((msg.temperature_c - (15.0 - 0.0065 * 488.0)).abs() < 1e-3);
    }

    #[test]
    fn test_barometer_interval_gating() {
        let config = BridgeConfig {
            baro_update_interval_s: 0.05,
            ..quiet_config()
        };
        let mut asm = SensorAssembler::new(&config, Vec::new());
        asm.on_snapshot(baro(0, 100_000.0));
        assert_eq!(asm.assemble(plan(0)).len(), 1);

        asm.on_snapshot(baro(20_000, 100_000.0));
        assert!(asm.assemble(plan(20_000)).is_empty());

        asm.on_snapshot(baro(50_000, 100_000.0));
        let msgs = asm.assemble(plan(50_000));
        assert_eq!(msgs.len(), 1);
        assert!(matches!(msgs[0], SensorMessage::Barometer(m) if m.time_us == 50_000));
    }

    #[test]
    fn test_stale_sample_dropped() {
        let mut asm = SensorAssembler::new(&quiet_config(), Vec::new());
        asm.on_snapshot(baro(5_000, 100_000.0));
        asm.assemble(plan(5_000));
        assert!(!asm.on_snapshot(baro(4_000, 100_000.0)));
        assert_eq!(asm.stats().stale_dropped, 1);
        assert!(asm.assemble(plan(100_000)).is_empty());
    }

    #[test]
    fn test_magnetometer_units_and_frame() {
        let mut asm = SensorAssembler::new(&quiet_config(), Vec::new());
        asm.on_snapshot(SensorSnapshot::Magnetometer(MagnetometerSample {
            timestamp_us: 1,
            field_tesla: Vector3::new(2e-5, 1e-5, -4e-5),
        }));
        let msgs = asm.assemble(plan(1));
        let SensorMessage::Magnetometer(msg) = msgs[0] else {
            panic!("Expected magnetometer message");
        };
        assert!((msg.field_gauss - Vector3::new(0.2, -0.1, 0.4)).norm() < EPS);
    }

    #[test]
    fn test_magnetometer_noise_bounded() {
        let mut config = quiet_config();
        config.noise.mag_gauss = NoiseParams::new(0.0, 0.01);
        let mut asm = SensorAssembler::new(&config, Vec::new());
        let mut values = Vec::new();
        for t in 0..50u64 {
            asm.on_snapshot(SensorSnapshot::Magnetometer(MagnetometerSample {
                timestamp_us: t * 100_000,
                field_tesla: Vector3::zeros(),
            }));
            if let Some(SensorMessage::Magnetometer(m)) = asm.assemble(plan(t * 100_000)).first() {
                values.push(m.field_gauss.x);
            }
        }
        assert_eq!(values.len(), 50);
        assert!(values.iter().all(|v| v.abs() <= 0.03 + 1e-12));
        assert!(values.windows(2).any(|w| w[0] != w[1]));
    }

    #[test]
    fn test_gps_velocity_ned() {
        let mut asm = SensorAssembler::new(&quiet_config(), Vec::new());
        asm.on_snapshot(SensorSnapshot::Gps(GpsSample {
            timestamp_us: 1,
            latitude_deg: 47.0,
            longitude_deg: 8.0,
            altitude_m: 500.0,
            velocity_enu: Vector3::new(1.0, 2.0, 3.0),
        }));
        let msgs = asm.assemble(plan(1));
        let SensorMessage::Gps(msg) = msgs[0] else {
            panic!("Expected GPS message");
        };
        assert!((msg.velocity_ned - Vector3::new(2.0, 1.0, -3.0)).norm() < EPS);
        assert_eq!(msg.lat_deg, 47.0);
        assert_eq!(msg.alt_m, 500.0);
        assert_eq!(msg.fix_type, 3);
    }

    #[test]
    fn test_ground_truth_velocity_from_poses() {
        let mut asm = SensorAssembler::new(&quiet_config(), Vec::new());
        let facing_north = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), FRAC_PI_2);
        for (t, north) in [(0u64, 0.0), (100_000, 0.5)] {
            asm.on_snapshot(SensorSnapshot::Pose(PoseSample {
                timestamp_us: t,
                position_enu: Vector3::new(0.0, north, 10.0),
                orientation: facing_north,
            }));
            let msgs = asm.assemble(plan(t));
            let Some(SensorMessage::GroundTruth(gt)) = msgs.last() else {
                panic!("Expected ground truth");
            };
            if t == 100_000 {
                assert!((gt.velocity_ned - Vector3::new(5.0, 0.0, 0.0)).norm() < EPS);
                assert!(gt.attitude.angle_to(&UnitQuaternion::identity()) < EPS);
                assert!((gt.alt_m - 498.0).abs() < EPS);
                assert!(gt.lat_deg > quiet_config().home.lat_deg);
            }
        }
    }

    #[test]
    fn test_ground_truth_at_rest_reads_gravity() {
        let mut asm = SensorAssembler::new(&quiet_config(), Vec::new());
        for t in [0u64, 10_000, 20_000] {
            asm.on_snapshot(SensorSnapshot::Pose(PoseSample {
                timestamp_us: t,
                position_enu: Vector3::zeros(),
                orientation: UnitQuaternion::identity(),
            }));
            let msgs = asm.assemble(plan(t));
            let Some(SensorMessage::GroundTruth(gt)) = msgs.last() else {
                panic!("Expected ground truth");
            };
            assert!((gt.accel_mss - Vector3::new(0.0, 0.0, -9.8)).norm() < EPS);
            assert!(gt.angular_velocity.norm() < EPS);
        }
    }

    #[test]
    fn test_imu_sequence_gap_counted() {
        let mut asm = SensorAssembler::new(&quiet_config(), Vec::new());
        asm.on_snapshot(imu(1));
        asm.assemble(plan(1));
        // Two samples arrive but only the latest goes out.
        asm.on_snapshot(imu(2));
        asm.on_snapshot(imu(3));
        let msgs = asm.assemble(plan(3));
        assert!(matches!(msgs[0], SensorMessage::Imu(m) if m.seq == 2));
        assert_eq!(asm.stats().imu_seq_gaps, 1);
    }

    #[test]
    fn test_imu_skip_factor_step_not_a_gap() {
        let mut asm = SensorAssembler::new(&quiet_config(), Vec::new());
        let skip = CyclePlan {
            expected_imu_step: Some(2),
            ..plan(0)
        };
        asm.on_snapshot(imu(1));
        asm.assemble(skip);
        asm.on_snapshot(imu(2));
        asm.on_snapshot(imu(3));
        asm.assemble(skip);
        assert_eq!(asm.stats().imu_seq_gaps, 0);
    }

    #[test]
    fn test_range_sensor_messages() {
        let link = RangeSensorLink {
            link_name: "sonar::link".into(),
            kind: RangeSensorKind::Sonar,
        };
        let mut asm = SensorAssembler::new(&quiet_config(), vec![link]);
        assert!(!asm.on_range(
            "lidar::link",
            RangeSample {
                timestamp_us: 1,
                distance_m: 1.0
            }
        ));
        assert!(asm.on_range(
            "sonar::link",
            RangeSample {
                timestamp_us: 1,
                distance_m: 50.0
            }
        ));
        let msgs = asm.assemble(plan(1));
        let SensorMessage::Range(msg) = msgs[0] else {
            panic!("Expected range message");
        };
        assert_eq!(msg.kind, RangeSensorKind::Sonar);
        assert_eq!(msg.distance_m, 7.65);
    }
}
