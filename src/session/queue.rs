//! Outbound sync command queue and its worker.

use super::broker::{PeerConnector, PeerLink, SessionBroker};
use super::types::SyncCommand;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Producer handle. Enqueueing never blocks.
#[derive(Clone, Debug)]
pub struct SyncQueue {
    tx: mpsc::UnboundedSender<SyncCommand>,
}

impl SyncQueue {
    /// Queue a command for the worker. Returns `false` once the worker is
    /// gone.
    pub fn enqueue(&self, command: SyncCommand) -> bool {
        match self.tx.send(command) {
            Ok(()) => true,
            Err(e) => {
                warn!(peer = %e.0.target(), "Sync worker stopped, dropping command");
                false
            }
        }
    }
}

pub fn sync_queue() -> (SyncQueue, mpsc::UnboundedReceiver<SyncCommand>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (SyncQueue { tx }, rx)
}

/// Single consumer of the sync queue. Owns the connection cache.
pub struct SyncWorker<C: PeerConnector> {
    rx: mpsc::UnboundedReceiver<SyncCommand>,
    broker: SessionBroker<C>,
}

impl<C: PeerConnector> SyncWorker<C> {
    pub fn new(rx: mpsc::UnboundedReceiver<SyncCommand>, connector: C) -> Self {
        Self {
            rx,
            broker: SessionBroker::new(connector),
        }
    }

    /// Process commands in order until every [`SyncQueue`] is dropped.
    pub async fn run(mut self) -> SessionBroker<C> {
        while let Some(command) = self.rx.recv().await {
            self.dispatch(command).await;
        }
        debug!("Sync queue closed");
        self.broker
    }

    pub fn spawn(self) -> JoinHandle<SessionBroker<C>> {
        tokio::spawn(self.run())
    }

    /// Deliver one command. Failures are logged and the command is dropped.
    async fn dispatch(&mut self, command: SyncCommand) {
        let peer = command.target().to_string();
        let Some(link) = self.broker.connect(&peer).await else {
            return;
        };

        let result = match &command {
            SyncCommand::Jumpto { address, .. } => link.jumpto(*address).await,
        };
        if let Err(e) = result {
            warn!(peer = %peer, error = %e, "Sync command failed");
            self.broker.evict(&peer);
        }
    }
}
