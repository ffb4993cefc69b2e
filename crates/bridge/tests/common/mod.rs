#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use gz_mavlink_bridge::actuator::{CmdVel, ExternalCommand, ServoTarget};
use gz_mavlink_bridge::config::ResolverSettings;
use gz_mavlink_bridge::link::ControlsSender;
use gz_mavlink_bridge::types::ImuSample;
use gz_mavlink_bridge::{
    ActuatorControls, ActuatorSink, AutopilotLink, BridgeConfig, BridgeError, ChannelConfig,
    HostLookup, SensorMessage, SensorSnapshot,
};
use nalgebra::Vector3;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
pub struct LinkState {
    pub open: bool,
    pub opens: u32,
    pub closes: u32,
    pub sent: Vec<SensorMessage>,
    pub controls_tx: Option<ControlsSender>,
    /// Sent back whenever an IMU message goes out, stamped with the IMU
    /// time as a lockstep autopilot does.
    pub auto_reply: Option<ActuatorControls>,
    /// Make `open` fail as if the socket could not be bound.
    pub fail_open: bool,
}

/// In-memory autopilot link. The test keeps a handle to its state.
#[derive(Debug, Clone, Default)]
pub struct MockLink {
    state: Arc<Mutex<LinkState>>,
}

impl MockLink {
    pub fn new() -> (Self, LinkHandle) {
        let link = Self::default();
        let handle = LinkHandle(link.state.clone());
        (link, handle)
    }
}

#[derive(Debug, Clone)]
pub struct LinkHandle(Arc<Mutex<LinkState>>);

impl LinkHandle {
    pub fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.0.lock().unwrap()
    }

    /// Deliver a command as if it came from the autopilot.
    pub fn inject(&self, controls: ActuatorControls) {
        let tx = self.lock().controls_tx.clone().expect("link not open");
        tx.send_replace(Some(controls));
    }

    pub fn set_auto_reply(&self, reply: Option<ActuatorControls>) {
        self.lock().auto_reply = reply;
    }

    pub fn sent_count(&self) -> usize {
        self.lock().sent.len()
    }

    pub fn count_sent(&self, pred: impl Fn(&SensorMessage) -> bool) -> usize {
        self.lock().sent.iter().filter(|m| pred(m)).count()
    }
}

#[async_trait]
impl AutopilotLink for MockLink {
    fn link_type(&self) -> &'static str {
        "mock"
    }

    async fn open(
        &mut self,
        _remote: SocketAddr,
        controls_tx: ControlsSender,
        _cancel: CancellationToken,
    ) -> Result<(), BridgeError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_open {
            return Err(BridgeError::ConnectionFailed("bind refused".into()));
        }
        state.open = true;
        state.opens += 1;
        state.controls_tx = Some(controls_tx);
        Ok(())
    }

    async fn send(&mut self, message: &SensorMessage) -> Result<(), BridgeError> {
        let mut state = self.state.lock().unwrap();
        if !state.open {
            return Err(BridgeError::NotReady);
        }
        state.sent.push(*message);
        if let SensorMessage::Imu(imu) = message {
            if let (Some(mut reply), Some(tx)) = (state.auto_reply.clone(), state.controls_tx.as_ref()) {
                reply.time_us = imu.time_us;
                tx.send_replace(Some(reply));
            }
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BridgeError> {
        let mut state = self.state.lock().unwrap();
        if state.open {
            state.closes += 1;
        }
        state.open = false;
        state.controls_tx = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.lock().unwrap().open
    }
}

/// Records what the bridge publishes.
#[derive(Debug, Default)]
pub struct MockSink {
    pub motors: Vec<f64>,
    pub servos: Vec<ServoTarget>,
    pub external: Vec<ExternalCommand>,
    pub cmd_vel: Option<CmdVel>,
    pub publishes: u32,
}

impl ActuatorSink for MockSink {
    fn publish_motor_velocities(&mut self, velocities: &[f64]) {
        self.motors = velocities.to_vec();
        self.publishes += 1;
    }

    fn publish_servo_targets(&mut self, targets: &[ServoTarget]) {
        self.servos = targets.to_vec();
        self.publishes += 1;
    }

    fn publish_external_commands(&mut self, commands: &[ExternalCommand]) {
        self.external = commands.to_vec();
        self.publishes += 1;
    }

    fn publish_cmd_vel(&mut self, cmd: CmdVel) {
        self.cmd_vel = Some(cmd);
        self.publishes += 1;
    }
}

pub struct FixedLookup(pub SocketAddr);

#[async_trait]
impl HostLookup for FixedLookup {
    async fn lookup(&self, _host: &str, _port: u16) -> io::Result<Vec<SocketAddr>> {
        Ok(vec![self.0])
    }
}

pub fn localhost() -> Arc<FixedLookup> {
    Arc::new(FixedLookup("127.0.0.1:4560".parse().unwrap()))
}

/// Always fails and counts its calls.
#[derive(Default)]
pub struct FailingLookup {
    pub calls: AtomicU32,
}

impl FailingLookup {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HostLookup for FailingLookup {
    async fn lookup(&self, _host: &str, _port: u16) -> io::Result<Vec<SocketAddr>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(io::Error::new(io::ErrorKind::NotFound, "no such host"))
    }
}

pub fn fast_resolver(max_attempts: u32) -> ResolverSettings {
    ResolverSettings {
        max_attempts,
        initial_backoff_ms: 1,
        max_backoff_ms: 4,
    }
}

/// Four motors scaled to rad/s plus one servo resting at 0.25 when disarmed.
pub fn quad_config(lockstep: bool) -> BridgeConfig {
    let mut servo = ChannelConfig::servo(4, 1.0);
    servo.zero_position_disarmed = 0.25;
    BridgeConfig {
        enable_lockstep: lockstep,
        lockstep_timeout_ms: 20,
        random_seed: Some(1),
        resolver: fast_resolver(3),
        channels: vec![
            ChannelConfig::motor(0, 1000.0),
            ChannelConfig::motor(1, 1000.0),
            ChannelConfig::motor(2, 1000.0),
            ChannelConfig::motor(3, 1000.0),
            servo,
        ],
        ..Default::default()
    }
}

pub fn controls(values: &[f32], armed: bool) -> ActuatorControls {
    ActuatorControls {
        time_us: 0,
        controls: values.to_vec(),
        armed,
    }
}

/// A reply answering the sensor send stamped `time_us`.
pub fn reply_at(time_us: u64, values: &[f32]) -> ActuatorControls {
    ActuatorControls {
        time_us,
        ..controls(values, true)
    }
}

pub fn imu(timestamp_us: u64) -> SensorSnapshot {
    SensorSnapshot::Imu(ImuSample {
        timestamp_us,
        angular_velocity: Vector3::zeros(),
        linear_acceleration: Vector3::new(0.0, 0.0, 9.8),
    })
}
