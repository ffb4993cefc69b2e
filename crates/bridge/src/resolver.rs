//! Autopilot host name resolution on a background task.
//!
//! The tick thread never waits on DNS. It polls [`AddressResolver::state`]
//! (or awaits [`AddressResolver::wait_settled`]) and only opens the link once
//! an address has been published.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ResolverSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionState {
    Idle,
    Resolving { attempt: u32 },
    Resolved(SocketAddr),
    /// Every attempt failed. The bridge keeps running without a link.
    Unavailable { attempts: u32 },
    Cancelled,
}

impl ResolutionState {
    /// Whether the worker has stopped changing this state.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            Self::Resolved(_) | Self::Unavailable { .. } | Self::Cancelled
        )
    }
}

/// Name lookup backend.
#[async_trait]
pub trait HostLookup: Send + Sync + 'static {
    async fn lookup(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>>;
}

/// System resolver via `tokio::net::lookup_host`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioLookup;

#[async_trait]
impl HostLookup for TokioLookup {
    async fn lookup(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        Ok(tokio::net::lookup_host((host, port)).await?.collect())
    }
}

pub struct AddressResolver {
    host: String,
    state_rx: watch::Receiver<ResolutionState>,
    handle: Option<JoinHandle<ResolutionState>>,
}

impl AddressResolver {
    /// Start resolving `host` in the background.
    pub fn spawn(
        host: impl Into<String>,
        port: u16,
        lookup: Arc<dyn HostLookup>,
        settings: ResolverSettings,
        cancel: CancellationToken,
    ) -> Self {
        let host = host.into();
        let (state_tx, state_rx) = watch::channel(ResolutionState::Idle);
        let handle = tokio::spawn(resolve_worker(
            host.clone(),
            port,
            lookup,
            settings,
            state_tx,
            cancel,
        ));
        Self {
            host,
            state_rx,
            handle: Some(handle),
        }
    }

    /// Whether the worker task is still alive. Says nothing about success.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn state(&self) -> ResolutionState {
        *self.state_rx.borrow()
    }

    /// Wait until the worker reaches a final state.
    pub async fn wait_settled(&self) -> ResolutionState {
        let mut rx = self.state_rx.clone();
        let settled = rx.wait_for(ResolutionState::is_settled).await.map(|s| *s);
        // The sender is gone once the worker exits; its last value stands.
        settled.unwrap_or_else(|_| *rx.borrow())
    }

    /// Wait for the worker task to exit.
    pub async fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!(host = %self.host, "resolver task failed: {e}");
            }
        }
    }
}

impl std::fmt::Debug for AddressResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressResolver")
            .field("host", &self.host)
            .field("state", &self.state())
            .field("running", &self.is_running())
            .finish()
    }
}

/// IPv4 first, matching how autopilot SITL instances usually bind.
fn pick_address(addrs: &[SocketAddr]) -> Option<SocketAddr> {
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
}

async fn resolve_worker(
    host: String,
    port: u16,
    lookup: Arc<dyn HostLookup>,
    settings: ResolverSettings,
    state_tx: watch::Sender<ResolutionState>,
    cancel: CancellationToken,
) -> ResolutionState {
    let finish = |state: ResolutionState| {
        state_tx.send_replace(state);
        state
    };

    let attempts = settings.max_attempts.max(1);
    let max_backoff = Duration::from_millis(settings.max_backoff_ms);
    let mut backoff = Duration::from_millis(settings.initial_backoff_ms).min(max_backoff);

    for attempt in 1..=attempts {
        if cancel.is_cancelled() {
            return finish(ResolutionState::Cancelled);
        }
        state_tx.send_replace(ResolutionState::Resolving { attempt });
        debug!(%host, port, attempt, "resolving autopilot address");

        let result = tokio::select! {
            _ = cancel.cancelled() => return finish(ResolutionState::Cancelled),
            result = lookup.lookup(&host, port) => result,
        };

        match result {
            Ok(addrs) => match pick_address(&addrs) {
                Some(addr) => {
                    info!(%host, %addr, attempt, "autopilot address resolved");
                    return finish(ResolutionState::Resolved(addr));
                }
                None => warn!(%host, attempt, "lookup returned no addresses"),
            },
            Err(e) => warn!(%host, attempt, "lookup failed: {e}"),
        }

        if attempt < attempts {
            tokio::select! {
                _ = cancel.cancelled() => return finish(ResolutionState::Cancelled),
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(max_backoff);
        }
    }

    error!(%host, attempts, "autopilot address unavailable");
    finish(ResolutionState::Unavailable { attempts })
}
