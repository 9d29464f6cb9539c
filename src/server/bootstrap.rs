//! Session startup: port selection, descriptor publication, server spawn.

use super::{http, RpcService};
use crate::error::AffinityError;
use crate::expand_path;
use crate::host::handlers::session::host_identity;
use crate::host::{Affinity, MainThread};
use crate::session::{write_descriptor, DescriptorError, SessionIdentity, SyncQueue};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// First port tried when no other is configured.
pub const BASE_PORT: u16 = 18861;

pub const DEFAULT_DESCRIPTOR_DIR: &str = "~/.binsync/sessions";

#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("No free port between {from} and 65535")]
    PortExhausted { from: u16 },

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error("Failed to read session identity: {0}")]
    Host(#[from] AffinityError),
}

#[derive(Debug, Clone)]
pub struct ServeConfig {
    pub bind_host: IpAddr,
    pub base_port: u16,
    pub descriptor_dir: PathBuf,
    /// Per-call timeout for peer RPCs; `None` waits indefinitely.
    pub peer_timeout: Option<Duration>,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            bind_host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            base_port: BASE_PORT,
            descriptor_dir: expand_path(DEFAULT_DESCRIPTOR_DIR),
            peer_timeout: None,
        }
    }
}

/// Bind the first free port at or above `base`.
pub async fn bind_from(host: IpAddr, base: u16) -> Result<(TcpListener, u16), BootstrapError> {
    let mut port = base;
    loop {
        match TcpListener::bind((host, port)).await {
            Ok(listener) => {
                let bound = listener.local_addr().map(|a| a.port()).unwrap_or(port);
                return Ok((listener, bound));
            }
            Err(e) => {
                warn!(port, error = %e, "Port unavailable, trying next");
                port = port
                    .checked_add(1)
                    .ok_or(BootstrapError::PortExhausted { from: base })?;
            }
        }
    }
}

/// A published session whose RPC server is running.
pub struct RunningSession {
    pub identity: SessionIdentity,
    pub descriptor_path: PathBuf,
    pub service: RpcService,
    cancel: CancellationToken,
    server: JoinHandle<()>,
}

impl RunningSession {
    pub fn port(&self) -> u16 {
        self.identity.rpc_port
    }

    /// Stop accepting connections.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Wait for the accept loop to exit.
    pub async fn join(self) {
        if let Err(e) = self.server.await {
            warn!(error = %e, "RPC server task failed");
        }
    }
}

/// Read the host identity, bind, publish the descriptor and start serving.
pub async fn launch(
    main: MainThread,
    sync: SyncQueue,
    config: &ServeConfig,
) -> Result<RunningSession, BootstrapError> {
    let host = main
        .execute(Affinity::Read, |host| Ok(host_identity(host)))
        .await?;
    let (listener, port) = bind_from(config.bind_host, config.base_port).await?;
    let identity = SessionIdentity::new(host, port);
    let descriptor_path = write_descriptor(&config.descriptor_dir, &identity.descriptor())?;

    info!(
        port,
        content_hash = %identity.content_hash,
        root_filename = %identity.root_filename,
        descriptor = %descriptor_path.display(),
        "Session RPC service listening"
    );

    let service = RpcService::new(main, identity.clone(), sync);
    let cancel = CancellationToken::new();
    let server = tokio::spawn(http::serve(listener, service.clone(), cancel.clone()));

    Ok(RunningSession {
        identity,
        descriptor_path,
        service,
        cancel,
        server,
    })
}
