pub mod lockstep;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub use lockstep::{LockstepScheduler, LockstepStats, SyncOutcome, SyncStatus, TimeMode};

use crate::actuator::ActuatorDispatcher;
use crate::config::BridgeConfig;
use crate::connection::ConnectionLifecycle;
use crate::discovery::{discover_range_sensors, RangeSensorLink, DEFAULT_PATTERNS};
use crate::error::BridgeError;
use crate::host::{publish_outputs, ActuatorSink};
use crate::link::{controls_channel, AutopilotLink, ControlsReceiver};
use crate::resolver::{HostLookup, ResolutionState, TokioLookup};
use crate::sensors::{ImuHandle, SensorAssembler};
use crate::types::{RangeSample, SensorMessage, SensorSnapshot, UpdateInfo};

/// Counters for everything that degrades instead of failing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeDiagnostics {
    pub lockstep_timeouts: u64,
    pub late_replies: u64,
    pub degraded_sync: bool,
    pub imu_seq_gaps: u64,
    pub stale_dropped: u64,
    pub malformed_channels: u64,
    pub rejected_commands: u64,
    pub send_failures: u64,
    pub open_failures: u64,
    pub messages_sent: u64,
    pub connection_epoch: u64,
}

/// Simulation to autopilot bridge.
///
/// The host calls [`pre_update`](Self::pre_update) before stepping physics
/// and [`post_update`](Self::post_update) after, delivering sensor samples
/// in between through [`on_sensor`](Self::on_sensor) or the IMU handle.
pub struct MavlinkBridge {
    config: BridgeConfig,
    assembler: SensorAssembler,
    dispatcher: ActuatorDispatcher,
    scheduler: LockstepScheduler,
    connection: ConnectionLifecycle,
    controls_rx: ControlsReceiver,
    messages_sent: u64,
}

impl MavlinkBridge {
    /// Validate `config` and build the bridge around `link`.
    ///
    /// Configuration errors are returned before anything is started.
    pub fn configure(config: BridgeConfig, link: Box<dyn AutopilotLink>) -> Result<Self, BridgeError> {
        Self::configure_with_lookup(config, link, Arc::new(TokioLookup))
    }

    pub fn configure_with_lookup(
        config: BridgeConfig,
        link: Box<dyn AutopilotLink>,
        lookup: Arc<dyn HostLookup>,
    ) -> Result<Self, BridgeError> {
        config.validate()?;
        let dispatcher = ActuatorDispatcher::new(&config)?;

        let range_sensors = discover_range_sensors(
            config.range_sensor_links.iter().map(String::as_str),
            DEFAULT_PATTERNS,
        );
        for sensor in &range_sensors {
            info!(link = %sensor.link_name, kind = ?sensor.kind, "range sensor discovered");
        }

        let (controls_tx, controls_rx) = controls_channel();
        let connection = ConnectionLifecycle::new(
            &config,
            link,
            lookup,
            controls_tx,
            CancellationToken::new(),
        );
        let scheduler = LockstepScheduler::new(&config);
        debug!(
            imu = %config.topic(&config.topics.imu),
            pose = %config.topic(&config.topics.pose),
            motor_speed = %config.topic(&config.topics.motor_speed),
            "host topics"
        );
        info!(
            host = %config.hostname,
            port = config.port,
            mode = ?scheduler.mode(),
            channels = config.channels.len(),
            "bridge configured"
        );

        Ok(Self {
            assembler: SensorAssembler::new(&config, range_sensors),
            dispatcher,
            scheduler,
            connection,
            controls_rx,
            messages_sent: 0,
            config,
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Handle for IMU delivery from another thread.
    pub fn imu_handle(&self) -> ImuHandle {
        self.assembler.imu_handle()
    }

    /// Store a host sensor sample. Returns `false` if it was stale.
    pub fn on_sensor(&mut self, snapshot: SensorSnapshot) -> bool {
        self.assembler.on_snapshot(snapshot)
    }

    pub fn on_range(&mut self, link_name: &str, sample: RangeSample) -> bool {
        self.assembler.on_range(link_name, sample)
    }

    pub fn range_sensors(&self) -> impl Iterator<Item = &RangeSensorLink> {
        self.assembler.range_sensors()
    }

    /// Start resolving the autopilot address. Must run inside a tokio runtime.
    pub fn start(&mut self) -> Result<(), BridgeError> {
        self.connection.start()
    }

    /// Cancelling this token stops the bridge at its next check.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.connection.shutdown_token()
    }

    pub fn resolution_state(&self) -> ResolutionState {
        self.connection.resolution_state()
    }

    pub async fn wait_resolved(&self) -> ResolutionState {
        self.connection.wait_resolved().await
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_ready()
    }

    /// Armed state from the last applied command.
    pub fn is_armed(&self) -> bool {
        self.dispatcher.is_armed()
    }

    pub fn scheduler(&self) -> &LockstepScheduler {
        &self.scheduler
    }

    pub async fn reconnect(&mut self) -> Result<(), BridgeError> {
        let result = self.connection.reconnect().await;
        self.sync_epoch();
        result
    }

    fn sync_epoch(&mut self) {
        if self.scheduler.on_epoch(self.connection.epoch()) {
            self.assembler.reset_sequence();
        }
    }

    /// Before the physics step: obtain this tick's actuator state and
    /// publish the resulting targets into `sink`.
    pub async fn pre_update(&mut self, info: &UpdateInfo, sink: &mut dyn ActuatorSink) -> SyncStatus {
        let cancel = self.connection.shutdown_token();
        if cancel.is_cancelled() {
            return SyncStatus::Shutdown;
        }
        if info.paused {
            return SyncStatus::Holding;
        }
        self.connection.poll_ready().await;
        self.sync_epoch();

        let received_first = self.dispatcher.received_first_actuator();
        let outcome = self
            .scheduler
            .await_controls(&mut self.controls_rx, received_first, &cancel)
            .await;
        if outcome.status == SyncStatus::Shutdown {
            return outcome.status;
        }
        if let Some(controls) = &outcome.controls {
            self.dispatcher.apply(controls);
        }
        publish_outputs(sink, &self.dispatcher.outputs());
        outcome.status
    }

    /// After the physics step: send whatever sensor data is due. Returns the
    /// number of messages sent. Nothing is assembled while the link is down,
    /// so only the latest sample per category goes out once it comes up.
    pub async fn post_update(&mut self, info: &UpdateInfo) -> usize {
        if info.paused || self.connection.is_shutdown() {
            return 0;
        }
        if !self.connection.poll_ready().await {
            return 0;
        }
        self.sync_epoch();
        let Some(plan) = self.scheduler.plan_cycle(info) else {
            return 0;
        };

        let mut messages = Vec::new();
        if self.scheduler.heartbeat_due(info.sim_time_us) {
            messages.push(SensorMessage::Heartbeat);
        }
        messages.extend(self.assembler.assemble(plan));

        let mut sent = 0;
        let mut imu_sent = None;
        for message in &messages {
            match self.connection.send(message).await {
                Ok(()) => {
                    sent += 1;
                    if let SensorMessage::Imu(imu) = message {
                        imu_sent = Some(imu.time_us);
                    }
                }
                Err(BridgeError::Shutdown) => break,
                Err(e) => debug!("sensor send failed: {e}"),
            }
        }
        self.scheduler.mark_sent(info.sim_time_us, imu_sent);
        self.messages_sent += sent as u64;
        sent
    }

    pub fn diagnostics(&self) -> BridgeDiagnostics {
        let lockstep = self.scheduler.stats();
        let assembler = self.assembler.stats();
        let dispatch = self.dispatcher.stats();
        BridgeDiagnostics {
            lockstep_timeouts: lockstep.lockstep_timeouts,
            late_replies: lockstep.late_replies,
            degraded_sync: lockstep.degraded,
            imu_seq_gaps: assembler.imu_seq_gaps,
            stale_dropped: assembler.stale_dropped,
            malformed_channels: dispatch.malformed_channels,
            rejected_commands: dispatch.rejected_commands,
            send_failures: self.connection.send_failures(),
            open_failures: self.connection.open_failures(),
            messages_sent: self.messages_sent,
            connection_epoch: self.connection.epoch(),
        }
    }

    /// Stop sending, join the resolver and close the link.
    pub async fn shutdown(&mut self) {
        self.connection.shutdown().await;
        info!(diagnostics = ?self.diagnostics(), "bridge stopped");
    }
}

impl std::fmt::Debug for MavlinkBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MavlinkBridge")
            .field("connection", &self.connection)
            .field("mode", &self.scheduler.mode())
            .field("diagnostics", &self.diagnostics())
            .finish()
    }
}
