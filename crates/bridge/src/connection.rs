//! Autopilot connection lifecycle: resolve, open, send, reconnect, shut down.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{BridgeConfig, ResolverSettings};
use crate::error::BridgeError;
use crate::link::{AutopilotLink, ControlsSender};
use crate::resolver::{AddressResolver, HostLookup, ResolutionState};
use crate::types::SensorMessage;

/// Owns the link handle and the resolver task.
///
/// Every loop boundary and every send checks the shutdown token first; once
/// it is cancelled nothing else goes out.
pub struct ConnectionLifecycle {
    host: String,
    port: u16,
    settings: ResolverSettings,
    lookup: Arc<dyn HostLookup>,
    link: Box<dyn AutopilotLink>,
    resolver: Option<AddressResolver>,
    controls_tx: ControlsSender,
    shutdown: CancellationToken,
    epoch: u64,
    send_failures: u64,
    open_failures: u64,
    unavailable_reported: bool,
    open_failure_reported: bool,
}

impl ConnectionLifecycle {
    pub fn new(
        config: &BridgeConfig,
        link: Box<dyn AutopilotLink>,
        lookup: Arc<dyn HostLookup>,
        controls_tx: ControlsSender,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            host: config.hostname.clone(),
            port: config.port,
            settings: config.resolver,
            lookup,
            link,
            resolver: None,
            controls_tx,
            shutdown,
            epoch: 0,
            send_failures: 0,
            open_failures: 0,
            unavailable_reported: false,
            open_failure_reported: false,
        }
    }

    /// Kick off address resolution. No-op if already started.
    pub fn start(&mut self) -> Result<(), BridgeError> {
        if self.shutdown.is_cancelled() {
            return Err(BridgeError::Shutdown);
        }
        if self.resolver.is_none() {
            self.spawn_resolver();
        }
        Ok(())
    }

    fn spawn_resolver(&mut self) {
        debug!(host = %self.host, port = self.port, link = self.link.link_type(), "starting resolver");
        self.unavailable_reported = false;
        self.resolver = Some(AddressResolver::spawn(
            self.host.clone(),
            self.port,
            self.lookup.clone(),
            self.settings,
            self.shutdown.child_token(),
        ));
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn resolution_state(&self) -> ResolutionState {
        self.resolver
            .as_ref()
            .map_or(ResolutionState::Idle, AddressResolver::state)
    }

    /// Whether the resolver task is alive, regardless of its outcome.
    pub fn resolver_running(&self) -> bool {
        self.resolver.as_ref().is_some_and(AddressResolver::is_running)
    }

    /// Wait for the resolver to settle. Returns `Idle` if it was never started.
    pub async fn wait_resolved(&self) -> ResolutionState {
        match &self.resolver {
            Some(resolver) => resolver.wait_settled().await,
            None => ResolutionState::Idle,
        }
    }

    pub fn is_ready(&self) -> bool {
        !self.shutdown.is_cancelled() && self.link.is_open()
    }

    /// Number of times the link has been (re)opened.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn send_failures(&self) -> u64 {
        self.send_failures
    }

    /// Failed attempts to open the link on a resolved address.
    pub fn open_failures(&self) -> u64 {
        self.open_failures
    }

    /// Open the link once the address is known. Never waits on resolution.
    pub async fn poll_ready(&mut self) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }
        if self.link.is_open() {
            return true;
        }
        match self.resolved_remote() {
            Ok(remote) => self.open(remote).await.is_ok(),
            Err(e @ BridgeError::ResolutionFailed { .. }) => {
                if !self.unavailable_reported {
                    self.unavailable_reported = true;
                    warn!("{e}, running without link");
                }
                false
            }
            Err(_) => false,
        }
    }

    /// The autopilot address, or why there is none yet.
    pub fn resolved_remote(&self) -> Result<SocketAddr, BridgeError> {
        match self.resolution_state() {
            ResolutionState::Resolved(remote) => Ok(remote),
            ResolutionState::Unavailable { attempts } => Err(BridgeError::ResolutionFailed {
                host: self.host.clone(),
                attempts,
            }),
            ResolutionState::Cancelled => Err(BridgeError::Shutdown),
            ResolutionState::Idle | ResolutionState::Resolving { .. } => Err(BridgeError::NotReady),
        }
    }

    async fn open(&mut self, remote: SocketAddr) -> Result<(), BridgeError> {
        let opened = self
            .link
            .open(remote, self.controls_tx.clone(), self.shutdown.clone())
            .await;
        match opened {
            Ok(()) => {
                self.epoch += 1;
                self.open_failure_reported = false;
                info!(%remote, epoch = self.epoch, "autopilot connection ready");
                Ok(())
            }
            Err(e) => {
                self.open_failures += 1;
                // Retried every tick; warn once until the link comes up.
                if self.open_failure_reported {
                    debug!(%remote, failures = self.open_failures, "failed to open autopilot link: {e}");
                } else {
                    self.open_failure_reported = true;
                    warn!(%remote, "failed to open autopilot link: {e}");
                }
                Err(e)
            }
        }
    }

    pub async fn send(&mut self, message: &SensorMessage) -> Result<(), BridgeError> {
        if self.shutdown.is_cancelled() {
            return Err(BridgeError::Shutdown);
        }
        if !self.link.is_open() {
            return Err(BridgeError::NotReady);
        }
        self.link.send(message).await.map_err(|e| {
            self.send_failures += 1;
            e
        })
    }

    /// Drop the current link and open it again.
    ///
    /// Reuses the resolved address if there is one, otherwise restarts
    /// resolution and reports `NotReady`.
    pub async fn reconnect(&mut self) -> Result<(), BridgeError> {
        if self.shutdown.is_cancelled() {
            return Err(BridgeError::Shutdown);
        }
        self.link.close().await?;
        match self.resolution_state() {
            ResolutionState::Resolved(remote) => self.open(remote).await,
            ResolutionState::Idle | ResolutionState::Resolving { .. } if self.resolver_running() => {
                Err(BridgeError::NotReady)
            }
            _ => {
                if let Some(mut old) = self.resolver.take() {
                    old.join().await;
                }
                self.spawn_resolver();
                Err(BridgeError::NotReady)
            }
        }
    }

    /// Cancel everything, join the resolver and close the link.
    pub async fn shutdown(&mut self) {
        self.shutdown.cancel();
        if let Some(resolver) = self.resolver.as_mut() {
            resolver.join().await;
        }
        if let Err(e) = self.link.close().await {
            warn!("error closing autopilot link: {e}");
        }
        info!("autopilot connection shut down");
    }
}

impl std::fmt::Debug for ConnectionLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionLifecycle")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("link", &self.link.link_type())
            .field("state", &self.resolution_state())
            .field("epoch", &self.epoch)
            .finish()
    }
}
