pub mod mavlink_udp;
pub mod messages;

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

pub use mavlink_udp::{MavlinkUdpConfig, MavlinkUdpLink};

use crate::error::BridgeError;
use crate::types::{ActuatorControls, SensorMessage};

/// Publishing side of the actuator channel. Only the newest command is
/// kept, so a slow consumer never stalls the receive path.
pub type ControlsSender = Arc<watch::Sender<Option<ActuatorControls>>>;
pub type ControlsReceiver = watch::Receiver<Option<ActuatorControls>>;

pub fn controls_channel() -> (ControlsSender, ControlsReceiver) {
    let (tx, rx) = watch::channel(None);
    (Arc::new(tx), rx)
}

/// Transport to the autopilot.
///
/// Message encoding stays behind this trait; the bridge only deals in
/// [`SensorMessage`] and [`ActuatorControls`]. Implementations must be
/// `Send + Sync` so a link can be stored as `Box<dyn AutopilotLink>`.
#[async_trait]
pub trait AutopilotLink: Send + Sync {
    /// Short identifier for logs (e.g. "mavlink_udp").
    fn link_type(&self) -> &'static str;

    /// Open the link towards `remote`.
    ///
    /// Received actuator commands replace the value in `controls_tx` until
    /// the link is closed or `cancel` fires.
    async fn open(
        &mut self,
        remote: SocketAddr,
        controls_tx: ControlsSender,
        cancel: CancellationToken,
    ) -> Result<(), BridgeError>;

    async fn send(&mut self, message: &SensorMessage) -> Result<(), BridgeError>;

    /// Stop the receive path and release the socket.
    async fn close(&mut self) -> Result<(), BridgeError>;

    fn is_open(&self) -> bool;
}
