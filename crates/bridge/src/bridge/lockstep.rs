//! Per-tick ordering between the simulation and the autopilot.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{secs_to_us, BridgeConfig};
use crate::link::ControlsReceiver;
use crate::sensors::CyclePlan;
use crate::types::{ActuatorControls, UpdateInfo};

/// Time synchronization mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeMode {
    /// Simulation runs independently, paced at `speed_factor` times real time.
    FreeRunning { speed_factor: f64 },
    /// Each tick waits for the autopilot's reply to the last sensor send,
    /// up to `timeout`.
    Lockstep { timeout: Duration },
}

impl TimeMode {
    pub fn from_config(config: &BridgeConfig) -> Self {
        if config.enable_lockstep {
            Self::Lockstep {
                timeout: config.lockstep_timeout(),
            }
        } else {
            Self::FreeRunning {
                speed_factor: config.speed_factor,
            }
        }
    }
}

impl Default for TimeMode {
    fn default() -> Self {
        Self::FreeRunning { speed_factor: 1.0 }
    }
}

/// How the actuator state for a tick was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// Free-running; whatever had arrived was taken without waiting.
    FreeRunning,
    /// A reply to the last sensor send arrived.
    Acknowledged,
    /// Nothing to wait for this tick, or only a late reply arrived;
    /// last-known (or default) state holds.
    Holding,
    /// No reply within the timeout. The tick proceeds on last-known state.
    TimedOut,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutcome {
    /// Newest command received, if any.
    pub controls: Option<ActuatorControls>,
    pub status: SyncStatus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockstepStats {
    pub cycles: u64,
    pub acknowledged: u64,
    pub lockstep_timeouts: u64,
    /// Replies stamped before the last IMU send, dropped.
    pub late_replies: u64,
    /// Set by a timeout, cleared by a reply to the current send.
    pub degraded: bool,
}

#[derive(Debug)]
pub struct LockstepScheduler {
    mode: TimeMode,
    skip_factor: u8,
    imu_interval_us: u64,
    heartbeat_interval_us: u64,
    last_planned_us: Option<u64>,
    last_imu_sent_us: Option<u64>,
    last_heartbeat_us: Option<u64>,
    /// Timestamp of the last IMU message sent in lockstep. The autopilot
    /// echoes it in its reply.
    last_send_us: Option<u64>,
    awaiting_ack: bool,
    epoch: u64,
    stats: LockstepStats,
}

/// The newest command not seen yet, if any.
fn take_latest(rx: &mut ControlsReceiver) -> Option<ActuatorControls> {
    match rx.has_changed() {
        Ok(true) => rx.borrow_and_update().clone(),
        _ => None,
    }
}

impl LockstepScheduler {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            mode: TimeMode::from_config(config),
            skip_factor: config.update_skip_factor.max(1),
            imu_interval_us: secs_to_us(config.imu_update_interval_s),
            heartbeat_interval_us: secs_to_us(config.heartbeat_interval_s),
            last_planned_us: None,
            last_imu_sent_us: None,
            last_heartbeat_us: None,
            last_send_us: None,
            awaiting_ack: false,
            epoch: 0,
            stats: LockstepStats::default(),
        }
    }

    pub fn mode(&self) -> TimeMode {
        self.mode
    }

    pub fn is_lockstep(&self) -> bool {
        matches!(self.mode, TimeMode::Lockstep { .. })
    }

    pub fn stats(&self) -> LockstepStats {
        self.stats
    }

    /// Whether a reply to the last sensor send is still outstanding.
    pub fn awaiting_ack(&self) -> bool {
        self.awaiting_ack
    }

    /// Decide what goes out this tick. `None` if this tick was already
    /// planned or the simulation is paused.
    pub fn plan_cycle(&mut self, info: &UpdateInfo) -> Option<CyclePlan> {
        if info.paused || self.last_planned_us == Some(info.sim_time_us) {
            return None;
        }
        let cycle = self.stats.cycles;
        self.stats.cycles += 1;
        self.last_planned_us = Some(info.sim_time_us);

        let plan = match self.mode {
            TimeMode::Lockstep { .. } => CyclePlan {
                now_us: info.sim_time_us,
                send_imu: cycle % u64::from(self.skip_factor) == 0,
                expected_imu_step: Some(self.skip_factor),
            },
            TimeMode::FreeRunning { .. } => CyclePlan {
                now_us: info.sim_time_us,
                send_imu: self.last_imu_sent_us.map_or(true, |last| {
                    info.sim_time_us.saturating_sub(last) >= self.imu_interval_us
                }),
                expected_imu_step: None,
            },
        };
        Some(plan)
    }

    /// Record the outcome of a send cycle. `imu_time_us` is the timestamp
    /// of the IMU message that went out, if one did.
    pub fn mark_sent(&mut self, now_us: u64, imu_time_us: Option<u64>) {
        let Some(imu_time_us) = imu_time_us else {
            return;
        };
        self.last_imu_sent_us = Some(now_us);
        if self.is_lockstep() {
            self.last_send_us = Some(imu_time_us);
            self.awaiting_ack = true;
        }
    }

    /// Whether `reply` answers the last IMU send rather than an earlier one.
    fn answers_last_send(&self, reply: &ActuatorControls) -> bool {
        self.last_send_us.map_or(true, |sent| reply.time_us >= sent)
    }

    fn acknowledge(&mut self) {
        self.awaiting_ack = false;
        self.stats.acknowledged += 1;
        if self.stats.degraded {
            info!("lockstep sync recovered");
        }
        self.stats.degraded = false;
    }

    fn note_late(&mut self, reply: &ActuatorControls) {
        self.stats.late_replies += 1;
        debug!(
            reply_us = reply.time_us,
            sent_us = ?self.last_send_us,
            "dropping late actuator reply"
        );
    }

    /// Whether a heartbeat is due at `now_us`. Claims the slot if so.
    pub fn heartbeat_due(&mut self, now_us: u64) -> bool {
        let due = self
            .last_heartbeat_us
            .map_or(true, |last| now_us.saturating_sub(last) >= self.heartbeat_interval_us);
        if due {
            self.last_heartbeat_us = Some(now_us);
        }
        due
    }

    /// Wall-clock time one tick of `dt_us` should take. `None` in lockstep,
    /// where the autopilot sets the pace.
    pub fn pacing_delay(&self, dt_us: u64) -> Option<Duration> {
        match self.mode {
            TimeMode::FreeRunning { speed_factor } => Some(Duration::from_secs_f64(
                dt_us as f64 / 1_000_000.0 / speed_factor,
            )),
            TimeMode::Lockstep { .. } => None,
        }
    }

    /// Forget in-flight state after the link was reopened.
    ///
    /// Returns `true` if `epoch` is new.
    pub fn on_epoch(&mut self, epoch: u64) -> bool {
        if epoch == self.epoch {
            return false;
        }
        if self.epoch != 0 {
            info!(from = self.epoch, to = epoch, "link reopened, resetting lockstep state");
        }
        self.epoch = epoch;
        self.awaiting_ack = false;
        self.last_send_us = None;
        self.last_imu_sent_us = None;
        self.last_heartbeat_us = None;
        self.stats.degraded = false;
        true
    }

    /// Get the actuator state for this tick.
    ///
    /// In lockstep mode, once the autopilot has sent its first command, a
    /// sensor send is followed by a bounded wait for the reply. Before that
    /// the tick holds on the default state instead of blocking. Replies
    /// stamped before the last IMU send are late: they are dropped, except
    /// that one may serve as the very first command.
    pub async fn await_controls(
        &mut self,
        rx: &mut ControlsReceiver,
        received_first_actuator: bool,
        cancel: &CancellationToken,
    ) -> SyncOutcome {
        if cancel.is_cancelled() {
            return SyncOutcome {
                controls: None,
                status: SyncStatus::Shutdown,
            };
        }

        let timeout = match self.mode {
            TimeMode::FreeRunning { .. } => {
                return SyncOutcome {
                    controls: take_latest(rx),
                    status: SyncStatus::FreeRunning,
                };
            }
            TimeMode::Lockstep { timeout } => timeout,
        };

        if !self.awaiting_ack || !received_first_actuator {
            return match take_latest(rx) {
                Some(reply) if self.answers_last_send(&reply) => {
                    self.acknowledge();
                    SyncOutcome {
                        controls: Some(reply),
                        status: SyncStatus::Acknowledged,
                    }
                }
                Some(reply) => {
                    self.note_late(&reply);
                    SyncOutcome {
                        controls: (!received_first_actuator).then_some(reply),
                        status: SyncStatus::Holding,
                    }
                }
                None => SyncOutcome {
                    controls: None,
                    status: SyncStatus::Holding,
                },
            };
        }

        // `changed` resolves at once for a reply that is already waiting.
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let changed = tokio::select! {
                _ = cancel.cancelled() => {
                    return SyncOutcome {
                        controls: None,
                        status: SyncStatus::Shutdown,
                    };
                }
                changed = tokio::time::timeout_at(deadline, rx.changed()) => changed,
            };

            match changed {
                Ok(Ok(())) => {
                    let Some(reply) = rx.borrow_and_update().clone() else {
                        continue;
                    };
                    if !self.answers_last_send(&reply) {
                        self.note_late(&reply);
                        continue;
                    }
                    self.acknowledge();
                    debug!(waited = ?started.elapsed(), "lockstep reply");
                    return SyncOutcome {
                        controls: Some(reply),
                        status: SyncStatus::Acknowledged,
                    };
                }
                Ok(Err(_)) => {
                    self.awaiting_ack = false;
                    return SyncOutcome {
                        controls: None,
                        status: SyncStatus::Holding,
                    };
                }
                Err(_) => {
                    self.awaiting_ack = false;
                    self.stats.lockstep_timeouts += 1;
                    self.stats.degraded = true;
                    warn!(
                        timeout = ?timeout,
                        total = self.stats.lockstep_timeouts,
                        "no actuator reply within lockstep timeout"
                    );
                    return SyncOutcome {
                        controls: None,
                        status: SyncStatus::TimedOut,
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::controls_channel;

    fn lockstep_config(timeout_ms: u64, skip: u8) -> BridgeConfig {
        BridgeConfig {
            enable_lockstep: true,
            lockstep_timeout_ms: timeout_ms,
            update_skip_factor: skip,
            ..Default::default()
        }
    }

    fn tick(t: u64) -> UpdateInfo {
        UpdateInfo {
            sim_time_us: t,
            dt_us: 4_000,
            paused: false,
        }
    }

    fn reply(time_us: u64, v: f32) -> ActuatorControls {
        ActuatorControls {
            time_us,
            controls: vec![v; 4],
            armed: true,
        }
    }

    #[test]
    fn test_plan_once_per_tick() {
        let mut scheduler = LockstepScheduler::new(&lockstep_config(10, 1));
        assert!(scheduler.plan_cycle(&tick(4_000)).is_some());
        assert!(scheduler.plan_cycle(&tick(4_000)).is_none());
        assert!(scheduler.plan_cycle(&tick(8_000)).is_some());
        assert_eq!(scheduler.stats().cycles, 2);
    }

    #[test]
    fn test_paused_tick_not_planned() {
        let mut scheduler = LockstepScheduler::new(&BridgeConfig::default());
        let info = UpdateInfo {
            paused: true,
            ..tick(0)
        };
        assert!(scheduler.plan_cycle(&info).is_none());
    }

    #[test]
    fn test_skip_factor_gates_imu() {
        let mut scheduler = LockstepScheduler::new(&lockstep_config(10, 3));
        let sends: Vec<bool> = (0..7u64)
            .map(|i| scheduler.plan_cycle(&tick(i * 4_000)).unwrap().send_imu)
            .collect();
        assert_eq!(sends, vec![true, false, false, true, false, false, true]);
        let plan = scheduler.plan_cycle(&tick(100_000)).unwrap();
        assert_eq!(plan.expected_imu_step, Some(3));
    }

    #[test]
    fn test_free_running_imu_interval() {
        let config = BridgeConfig {
            imu_update_interval_s: 0.01,
            ..Default::default()
        };
        let mut scheduler = LockstepScheduler::new(&config);
        let plan = scheduler.plan_cycle(&tick(0)).unwrap();
        assert!(plan.send_imu);
        assert_eq!(plan.expected_imu_step, None);
        scheduler.mark_sent(0, Some(0));
        assert!(!scheduler.plan_cycle(&tick(4_000)).unwrap().send_imu);
        assert!(scheduler.plan_cycle(&tick(10_000)).unwrap().send_imu);
        // Free-running never waits for a reply.
        assert!(!scheduler.awaiting_ack());
    }

    #[test]
    fn test_heartbeat_interval() {
        let mut scheduler = LockstepScheduler::new(&BridgeConfig::default());
        assert!(scheduler.heartbeat_due(0));
        assert!(!scheduler.heartbeat_due(500_000));
        assert!(scheduler.heartbeat_due(1_000_000));
    }

    #[test]
    fn test_pacing_delay() {
        let config = BridgeConfig {
            speed_factor: 2.0,
            ..Default::default()
        };
        let scheduler = LockstepScheduler::new(&config);
        assert_eq!(scheduler.pacing_delay(4_000), Some(Duration::from_millis(2)));
        let lockstep = LockstepScheduler::new(&lockstep_config(10, 1));
        assert_eq!(lockstep.pacing_delay(4_000), None);
    }

    #[tokio::test]
    async fn test_timeout_advances_and_flags_degraded() {
        let mut scheduler = LockstepScheduler::new(&lockstep_config(10, 1));
        let (_tx, mut rx) = controls_channel();
        let cancel = CancellationToken::new();
        scheduler.mark_sent(0, Some(0));

        let started = Instant::now();
        let outcome = scheduler.await_controls(&mut rx, true, &cancel).await;
        let waited = started.elapsed();

        assert_eq!(outcome.status, SyncStatus::TimedOut);
        assert!(outcome.controls.is_none());
        assert!(waited >= Duration::from_millis(10), "waited {waited:?}");
        assert!(waited < Duration::from_millis(500), "waited {waited:?}");
        assert_eq!(scheduler.stats().lockstep_timeouts, 1);
        assert!(scheduler.stats().degraded);

        // One timeout per outstanding send; the next tick does not wait again.
        let outcome = scheduler.await_controls(&mut rx, true, &cancel).await;
        assert_eq!(outcome.status, SyncStatus::Holding);
        assert_eq!(scheduler.stats().lockstep_timeouts, 1);
    }

    #[tokio::test]
    async fn test_reply_clears_degraded() {
        let mut scheduler = LockstepScheduler::new(&lockstep_config(10, 1));
        let (tx, mut rx) = controls_channel();
        let cancel = CancellationToken::new();

        scheduler.mark_sent(0, Some(0));
        scheduler.await_controls(&mut rx, true, &cancel).await;
        assert!(scheduler.stats().degraded);

        scheduler.mark_sent(4_000, Some(4_000));
        tx.send_replace(Some(reply(4_000, 0.5)));
        let outcome = scheduler.await_controls(&mut rx, true, &cancel).await;
        assert_eq!(outcome.status, SyncStatus::Acknowledged);
        assert_eq!(outcome.controls, Some(reply(4_000, 0.5)));
        assert!(!scheduler.stats().degraded);
        assert_eq!(scheduler.stats().acknowledged, 1);
    }

    #[tokio::test]
    async fn test_holds_before_first_actuator() {
        let mut scheduler = LockstepScheduler::new(&lockstep_config(1_000, 1));
        let (_tx, mut rx) = controls_channel();
        scheduler.mark_sent(0, Some(0));
        let started = Instant::now();
        let outcome = scheduler
            .await_controls(&mut rx, false, &CancellationToken::new())
            .await;
        assert_eq!(outcome.status, SyncStatus::Holding);
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_wait() {
        let mut scheduler = LockstepScheduler::new(&lockstep_config(5_000, 1));
        let (_tx, mut rx) = controls_channel();
        let cancel = CancellationToken::new();
        scheduler.mark_sent(0, Some(0));

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            canceller.cancel();
        });
        let started = Instant::now();
        let outcome = scheduler.await_controls(&mut rx, true, &cancel).await;
        assert_eq!(outcome.status, SyncStatus::Shutdown);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_free_running_takes_latest() {
        let mut scheduler = LockstepScheduler::new(&BridgeConfig::default());
        let (tx, mut rx) = controls_channel();
        tx.send_replace(Some(reply(0, 0.1)));
        tx.send_replace(Some(reply(0, 0.2)));
        let outcome = scheduler
            .await_controls(&mut rx, true, &CancellationToken::new())
            .await;
        assert_eq!(outcome.status, SyncStatus::FreeRunning);
        assert_eq!(outcome.controls, Some(reply(0, 0.2)));
    }

    #[test]
    fn test_epoch_change_resets_pending_ack() {
        let mut scheduler = LockstepScheduler::new(&lockstep_config(10, 1));
        assert!(scheduler.on_epoch(1));
        scheduler.mark_sent(0, Some(0));
        assert!(scheduler.awaiting_ack());
        assert!(!scheduler.on_epoch(1));
        assert!(scheduler.awaiting_ack());
        assert!(scheduler.on_epoch(2));
        assert!(!scheduler.awaiting_ack());
    }

    #[tokio::test]
    async fn test_late_reply_does_not_acknowledge_next_send() {
        let mut scheduler = LockstepScheduler::new(&lockstep_config(10, 1));
        let (tx, mut rx) = controls_channel();
        let cancel = CancellationToken::new();

        scheduler.mark_sent(4_000, Some(4_000));
        assert_eq!(
            scheduler.await_controls(&mut rx, true, &cancel).await.status,
            SyncStatus::TimedOut
        );

        // The reply to 4000 shows up after the next send went out.
        scheduler.mark_sent(8_000, Some(8_000));
        tx.send_replace(Some(reply(4_000, 0.9)));
        let started = Instant::now();
        let outcome = scheduler.await_controls(&mut rx, true, &cancel).await;
        assert_eq!(outcome.status, SyncStatus::TimedOut);
        assert!(outcome.controls.is_none());
        assert!(started.elapsed() >= Duration::from_millis(10));
        let stats = scheduler.stats();
        assert_eq!(stats.late_replies, 1);
        assert_eq!(stats.lockstep_timeouts, 2);
        assert_eq!(stats.acknowledged, 0);
        assert!(stats.degraded);
    }

    #[tokio::test]
    async fn test_wait_continues_past_late_reply() {
        let mut scheduler = LockstepScheduler::new(&lockstep_config(2_000, 1));
        let (tx, mut rx) = controls_channel();
        let cancel = CancellationToken::new();
        scheduler.mark_sent(8_000, Some(8_000));
        tx.send_replace(Some(reply(4_000, 0.9)));

        let sender = tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            sender.send_replace(Some(reply(8_000, 0.5)));
        });
        let outcome = scheduler.await_controls(&mut rx, true, &cancel).await;
        assert_eq!(outcome.status, SyncStatus::Acknowledged);
        assert_eq!(outcome.controls, Some(reply(8_000, 0.5)));
        assert_eq!(scheduler.stats().late_replies, 1);
        assert!(!scheduler.awaiting_ack());
    }

    #[tokio::test]
    async fn test_unwaited_reply_updates_stats() {
        let mut scheduler = LockstepScheduler::new(&lockstep_config(10, 1));
        let (tx, mut rx) = controls_channel();
        let cancel = CancellationToken::new();
        scheduler.mark_sent(0, Some(0));
        scheduler.await_controls(&mut rx, true, &cancel).await;
        assert!(scheduler.stats().degraded);

        // The answer to that send lands on a tick with nothing outstanding.
        tx.send_replace(Some(reply(0, 0.3)));
        let outcome = scheduler.await_controls(&mut rx, true, &cancel).await;
        assert_eq!(outcome.status, SyncStatus::Acknowledged);
        assert_eq!(scheduler.stats().acknowledged, 1);
        assert!(!scheduler.stats().degraded);
    }

    #[tokio::test]
    async fn test_late_reply_bootstraps_first_command() {
        let mut scheduler = LockstepScheduler::new(&lockstep_config(10, 1));
        let (tx, mut rx) = controls_channel();
        let cancel = CancellationToken::new();
        scheduler.mark_sent(8_000, Some(8_000));
        tx.send_replace(Some(reply(4_000, 0.4)));

        let outcome = scheduler.await_controls(&mut rx, false, &cancel).await;
        assert_eq!(outcome.status, SyncStatus::Holding);
        assert_eq!(outcome.controls, Some(reply(4_000, 0.4)));
        assert_eq!(scheduler.stats().late_replies, 1);
        assert!(scheduler.awaiting_ack());
    }
}
