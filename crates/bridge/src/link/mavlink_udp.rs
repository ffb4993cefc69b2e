//! MAVLink over UDP.

use std::io::Cursor;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use mavlink::common::MavMessage;
use mavlink::peek_reader::PeekReader;
use mavlink::MavHeader;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::messages::{actuator_controls_from, build_message};
use super::{AutopilotLink, ControlsSender};
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::types::SensorMessage;

/// Largest MAVLink v2 frame, including signature.
const MAX_FRAME_LEN: usize = 280;
const RECV_BUF_LEN: usize = 2048;

#[derive(Debug, Clone, PartialEq)]
pub struct MavlinkUdpConfig {
    /// Local UDP port (0 = ephemeral).
    pub local_port: u16,
    pub protocol_version: f32,
    pub system_id: u8,
    pub component_id: u8,
}

impl Default for MavlinkUdpConfig {
    fn default() -> Self {
        Self {
            local_port: 0,
            protocol_version: 2.0,
            system_id: 1,
            component_id: 200,
        }
    }
}

impl MavlinkUdpConfig {
    pub fn from_bridge(config: &BridgeConfig) -> Self {
        Self {
            local_port: config.local_port,
            protocol_version: config.protocol_version,
            ..Default::default()
        }
    }

    pub fn use_v2(&self) -> bool {
        self.protocol_version >= 2.0
    }
}

pub struct MavlinkUdpLink {
    config: MavlinkUdpConfig,
    socket: Option<Arc<UdpSocket>>,
    remote: Option<SocketAddr>,
    sequence: u8,
    recv_cancel: Option<CancellationToken>,
    recv_task: Option<JoinHandle<()>>,
}

impl MavlinkUdpLink {
    pub fn new(config: MavlinkUdpConfig) -> Self {
        Self {
            config,
            socket: None,
            remote: None,
            sequence: 0,
            recv_cancel: None,
            recv_task: None,
        }
    }

    /// Local address of the open socket.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    fn encode(&mut self, msg: &MavMessage) -> Result<Vec<u8>, BridgeError> {
        let header = MavHeader {
            system_id: self.config.system_id,
            component_id: self.config.component_id,
            sequence: self.sequence,
        };
        self.sequence = self.sequence.wrapping_add(1);

        let mut buf = Cursor::new(Vec::with_capacity(MAX_FRAME_LEN));
        let written = if self.config.use_v2() {
            mavlink::write_v2_msg(&mut buf, header, msg)
        } else {
            mavlink::write_v1_msg(&mut buf, header, msg)
        };
        written.map_err(|e| BridgeError::ProtocolError(format!("{e:?}")))?;
        Ok(buf.into_inner())
    }
}

impl std::fmt::Debug for MavlinkUdpLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MavlinkUdpLink")
            .field("remote", &self.remote)
            .field("open", &self.is_open())
            .field("v2", &self.config.use_v2())
            .finish()
    }
}

/// Every message in one datagram, in order. Undecodable trailing bytes are
/// dropped.
pub fn decode_datagram(data: &[u8], use_v2: bool) -> Vec<MavMessage> {
    let mut reader = PeekReader::new(Cursor::new(data));
    let mut messages = Vec::new();
    loop {
        let result = if use_v2 {
            mavlink::read_v2_msg::<MavMessage, _>(&mut reader)
        } else {
            mavlink::read_v1_msg::<MavMessage, _>(&mut reader)
        };
        match result {
            Ok((_, msg)) => messages.push(msg),
            Err(_) => break,
        }
    }
    messages
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    use_v2: bool,
    controls_tx: ControlsSender,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; RECV_BUF_LEN];
    loop {
        let len = tokio::select! {
            _ = cancel.cancelled() => break,
            received = socket.recv(&mut buf) => match received {
                Ok(len) => len,
                Err(e) => {
                    debug!("autopilot receive error: {e}");
                    continue;
                }
            },
        };

        for msg in decode_datagram(&buf[..len], use_v2) {
            let MavMessage::HIL_ACTUATOR_CONTROLS(data) = msg else {
                continue;
            };
            controls_tx.send_replace(Some(actuator_controls_from(&data)));
        }
        if controls_tx.is_closed() {
            debug!("actuator receiver dropped, stopping receive loop");
            return;
        }
    }
    debug!("autopilot receive loop stopped");
}

#[async_trait]
impl AutopilotLink for MavlinkUdpLink {
    fn link_type(&self) -> &'static str {
        "mavlink_udp"
    }

    async fn open(
        &mut self,
        remote: SocketAddr,
        controls_tx: ControlsSender,
        cancel: CancellationToken,
    ) -> Result<(), BridgeError> {
        if self.is_open() {
            self.close().await?;
        }

        let bind_addr: SocketAddr = if remote.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, self.config.local_port).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, self.config.local_port).into()
        };
        let socket = UdpSocket::bind(bind_addr).await.map_err(|e| {
            BridgeError::ConnectionFailed(format!("Failed to bind {bind_addr}: {e}"))
        })?;
        socket.connect(remote).await.map_err(|e| {
            BridgeError::ConnectionFailed(format!("Failed to connect to {remote}: {e}"))
        })?;

        let socket = Arc::new(socket);
        let recv_cancel = cancel.child_token();
        self.recv_task = Some(tokio::spawn(receive_loop(
            socket.clone(),
            self.config.use_v2(),
            controls_tx,
            recv_cancel.clone(),
        )));
        self.recv_cancel = Some(recv_cancel);
        self.socket = Some(socket);
        self.remote = Some(remote);
        self.sequence = 0;

        info!(%remote, local = ?self.local_addr(), v2 = self.config.use_v2(), "MAVLink link open");
        Ok(())
    }

    async fn send(&mut self, message: &SensorMessage) -> Result<(), BridgeError> {
        if self.socket.is_none() {
            return Err(BridgeError::NotReady);
        }
        let frame = self.encode(&build_message(message))?;
        let socket = self.socket.as_ref().ok_or(BridgeError::NotReady)?;
        socket.send(&frame).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BridgeError> {
        if let Some(cancel) = self.recv_cancel.take() {
            cancel.cancel();
        }
        if let Some(task) = self.recv_task.take() {
            if let Err(e) = task.await {
                warn!("receive task failed: {e}");
            }
        }
        if self.socket.take().is_some() {
            info!(remote = ?self.remote, "MAVLink link closed");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.socket.is_some()
    }
}
