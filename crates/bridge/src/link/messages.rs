//! MAVLink message builders for bridge sensor messages.

use mavlink::common::*;

use crate::discovery::RangeSensorKind;
use crate::types::{
    ActuatorControls, BarometerMessage, GpsMessage, GroundTruthMessage, ImuMessage,
    MagnetometerMessage, RangeMessage, SensorMessage,
};

const STANDARD_GRAVITY: f64 = 9.80665;

// HIL_SENSOR fields_updated bits.
const UPDATED_ACCEL: u32 = 0b111;
const UPDATED_GYRO: u32 = 0b111 << 3;
const UPDATED_MAG: u32 = 0b111 << 6;
const UPDATED_ABS_PRESSURE: u32 = 1 << 9;
const UPDATED_PRESSURE_ALT: u32 = 1 << 11;
const UPDATED_TEMPERATURE: u32 = 1 << 12;

pub fn build_heartbeat() -> MavMessage {
    MavMessage::HEARTBEAT(HEARTBEAT_DATA {
        custom_mode: 0,
        mavtype: MavType::MAV_TYPE_GENERIC,
        autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
        base_mode: MavModeFlag::empty(),
        system_status: MavState::MAV_STATE_ACTIVE,
        mavlink_version: 3,
    })
}

fn empty_hil_sensor(time_usec: u64, fields_updated: u32) -> HIL_SENSOR_DATA {
    HIL_SENSOR_DATA {
        time_usec,
        xacc: 0.0,
        yacc: 0.0,
        zacc: 0.0,
        xgyro: 0.0,
        ygyro: 0.0,
        zgyro: 0.0,
        xmag: 0.0,
        ymag: 0.0,
        zmag: 0.0,
        abs_pressure: 0.0,
        diff_pressure: 0.0,
        pressure_alt: 0.0,
        temperature: 0.0,
        fields_updated: HilSensorUpdatedFlags::from_bits_truncate(fields_updated),
        id: 0,
    }
}

pub fn build_hil_sensor_imu(imu: &ImuMessage) -> MavMessage {
    MavMessage::HIL_SENSOR(HIL_SENSOR_DATA {
        xacc: imu.accel_mss.x as f32,
        yacc: imu.accel_mss.y as f32,
        zacc: imu.accel_mss.z as f32,
        xgyro: imu.gyro_rads.x as f32,
        ygyro: imu.gyro_rads.y as f32,
        zgyro: imu.gyro_rads.z as f32,
        ..empty_hil_sensor(imu.time_us, UPDATED_ACCEL | UPDATED_GYRO)
    })
}

pub fn build_hil_sensor_baro(baro: &BarometerMessage) -> MavMessage {
    MavMessage::HIL_SENSOR(HIL_SENSOR_DATA {
        abs_pressure: baro.abs_pressure_hpa as f32,
        pressure_alt: baro.pressure_alt_m as f32,
        temperature: baro.temperature_c as f32,
        ..empty_hil_sensor(
            baro.time_us,
            UPDATED_ABS_PRESSURE | UPDATED_PRESSURE_ALT | UPDATED_TEMPERATURE,
        )
    })
}

pub fn build_hil_sensor_mag(mag: &MagnetometerMessage) -> MavMessage {
    MavMessage::HIL_SENSOR(HIL_SENSOR_DATA {
        xmag: mag.field_gauss.x as f32,
        ymag: mag.field_gauss.y as f32,
        zmag: mag.field_gauss.z as f32,
        ..empty_hil_sensor(mag.time_us, UPDATED_MAG)
    })
}

/// Course over ground in centidegrees, 0..36000.
fn course_cdeg(north: f64, east: f64) -> u16 {
    if north == 0.0 && east == 0.0 {
        return 0;
    }
    let deg = east.atan2(north).to_degrees().rem_euclid(360.0);
    ((deg * 100.0).round() as u16) % 36_000
}

pub fn build_hil_gps(gps: &GpsMessage) -> MavMessage {
    let v = gps.velocity_ned;
    MavMessage::HIL_GPS(HIL_GPS_DATA {
        time_usec: gps.time_us,
        lat: (gps.lat_deg * 1e7).round() as i32,
        lon: (gps.lon_deg * 1e7).round() as i32,
        alt: (gps.alt_m * 1000.0).round() as i32,
        eph: (gps.eph_m * 100.0).round() as u16,
        epv: (gps.epv_m * 100.0).round() as u16,
        vel: (v.xy().norm() * 100.0).round() as u16,
        vn: (v.x * 100.0).round() as i16,
        ve: (v.y * 100.0).round() as i16,
        vd: (v.z * 100.0).round() as i16,
        cog: course_cdeg(v.x, v.y),
        fix_type: gps.fix_type,
        satellites_visible: gps.satellites,
        id: 0,
        yaw: 0,
    })
}

pub fn build_hil_state_quaternion(truth: &GroundTruthMessage) -> MavMessage {
    let q = truth.attitude.quaternion();
    let milli_g = |a: f64| (a / STANDARD_GRAVITY * 1000.0).round() as i16;
    let airspeed = (truth.velocity_ned.norm() * 100.0).round() as u16;
    MavMessage::HIL_STATE_QUATERNION(HIL_STATE_QUATERNION_DATA {
        time_usec: truth.time_us,
        attitude_quaternion: [q.w as f32, q.i as f32, q.j as f32, q.k as f32],
        rollspeed: truth.angular_velocity.x as f32,
        pitchspeed: truth.angular_velocity.y as f32,
        yawspeed: truth.angular_velocity.z as f32,
        lat: (truth.lat_deg * 1e7).round() as i32,
        lon: (truth.lon_deg * 1e7).round() as i32,
        alt: (truth.alt_m * 1000.0).round() as i32,
        vx: (truth.velocity_ned.x * 100.0).round() as i16,
        vy: (truth.velocity_ned.y * 100.0).round() as i16,
        vz: (truth.velocity_ned.z * 100.0).round() as i16,
        ind_airspeed: airspeed,
        true_airspeed: airspeed,
        xacc: milli_g(truth.accel_mss.x),
        yacc: milli_g(truth.accel_mss.y),
        zacc: milli_g(truth.accel_mss.z),
    })
}

/// Downward-facing distance sensor reading; `id` tells sensors apart.
pub fn build_distance_sensor(range: &RangeMessage, id: u8) -> MavMessage {
    let cm = |m: f64| (m * 100.0).round() as u16;
    MavMessage::DISTANCE_SENSOR(DISTANCE_SENSOR_DATA {
        time_boot_ms: (range.time_us / 1000) as u32,
        min_distance: cm(range.min_distance_m),
        max_distance: cm(range.max_distance_m),
        current_distance: cm(range.distance_m),
        mavtype: match range.kind {
            RangeSensorKind::Lidar => MavDistanceSensor::MAV_DISTANCE_SENSOR_LASER,
            RangeSensorKind::Sonar => MavDistanceSensor::MAV_DISTANCE_SENSOR_ULTRASOUND,
        },
        id,
        orientation: MavSensorOrientation::MAV_SENSOR_ROTATION_PITCH_270,
        covariance: 0,
        horizontal_fov: 0.0,
        vertical_fov: 0.0,
        quaternion: [0.0; 4],
        signal_quality: 0,
    })
}

/// MAVLink encoding of one bridge message.
pub fn build_message(message: &SensorMessage) -> MavMessage {
    match message {
        SensorMessage::Heartbeat => build_heartbeat(),
        SensorMessage::Imu(m) => build_hil_sensor_imu(m),
        SensorMessage::Barometer(m) => build_hil_sensor_baro(m),
        SensorMessage::Magnetometer(m) => build_hil_sensor_mag(m),
        SensorMessage::Gps(m) => build_hil_gps(m),
        SensorMessage::GroundTruth(m) => build_hil_state_quaternion(m),
        SensorMessage::Range(m) => build_distance_sensor(m, range_sensor_id(m.kind)),
    }
}

fn range_sensor_id(kind: RangeSensorKind) -> u8 {
    match kind {
        RangeSensorKind::Lidar => 0,
        RangeSensorKind::Sonar => 1,
    }
}

/// Decode an actuator command. Armed state comes from the mode flags.
pub fn actuator_controls_from(data: &HIL_ACTUATOR_CONTROLS_DATA) -> ActuatorControls {
    ActuatorControls {
        time_us: data.time_usec,
        controls: data.controls.to_vec(),
        armed: data.mode.contains(MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED),
    }
}
