//! Fan-out bus for chain events: a closed set of typed variants, each with its own broadcast
//! channel so subscribers only pay for the kinds they care about.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;
use types::{
    Attestation, BlobSidecar, Checkpoint, DataColumnSidecar, Epoch, Hash256, SignedVoluntaryExit,
    Slot,
};

const DEFAULT_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub struct SseHead {
    pub slot: Slot,
    pub block: Hash256,
    pub state: Hash256,
    pub epoch_transition: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SseBlock {
    pub slot: Slot,
    pub block: Hash256,
    pub execution_optimistic: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SseFinalizedCheckpoint {
    pub block: Hash256,
    pub state: Hash256,
    pub epoch: Epoch,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SseChainReorg {
    pub slot: Slot,
    pub depth: u64,
    pub old_head_block: Hash256,
    pub new_head_block: Hash256,
    pub epoch: Epoch,
}

/// The closed set of chain events the core emits.
#[derive(Debug, Clone)]
pub enum EventKind {
    Head(SseHead),
    Block(SseBlock),
    FinalizedCheckpoint(SseFinalizedCheckpoint),
    ChainReorg(SseChainReorg),
    BlobSidecar(Arc<BlobSidecar>),
    DataColumnSidecar(Arc<DataColumnSidecar>),
    Attestation(Box<Attestation>),
    VoluntaryExit(Box<SignedVoluntaryExit>),
    FinalizedCheckpointProcessed(Checkpoint),
}

/// Per-kind broadcast channels. Sending to a kind with no subscribers is a no-op.
pub struct ChainEventHandler {
    head_tx: broadcast::Sender<EventKind>,
    block_tx: broadcast::Sender<EventKind>,
    finalized_tx: broadcast::Sender<EventKind>,
    reorg_tx: broadcast::Sender<EventKind>,
    blob_sidecar_tx: broadcast::Sender<EventKind>,
    data_column_sidecar_tx: broadcast::Sender<EventKind>,
    attestation_tx: broadcast::Sender<EventKind>,
    exit_tx: broadcast::Sender<EventKind>,
}

impl Default for ChainEventHandler {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl ChainEventHandler {
    pub fn new(capacity: usize) -> Self {
        Self {
            head_tx: broadcast::channel(capacity).0,
            block_tx: broadcast::channel(capacity).0,
            finalized_tx: broadcast::channel(capacity).0,
            reorg_tx: broadcast::channel(capacity).0,
            blob_sidecar_tx: broadcast::channel(capacity).0,
            data_column_sidecar_tx: broadcast::channel(capacity).0,
            attestation_tx: broadcast::channel(capacity).0,
            exit_tx: broadcast::channel(capacity).0,
        }
    }

    pub fn register(&self, kind: EventKind) {
        let result = match &kind {
            EventKind::Head(_) => self.head_tx.send(kind),
            EventKind::Block(_) => self.block_tx.send(kind),
            EventKind::FinalizedCheckpoint(_) | EventKind::FinalizedCheckpointProcessed(_) => {
                self.finalized_tx.send(kind)
            }
            EventKind::ChainReorg(_) => self.reorg_tx.send(kind),
            EventKind::BlobSidecar(_) => self.blob_sidecar_tx.send(kind),
            EventKind::DataColumnSidecar(_) => self.data_column_sidecar_tx.send(kind),
            EventKind::Attestation(_) => self.attestation_tx.send(kind),
            EventKind::VoluntaryExit(_) => self.exit_tx.send(kind),
        };
        if let Err(e) = result {
            trace!(error = ?e, "No receivers for chain event");
        }
    }

    pub fn subscribe_head(&self) -> broadcast::Receiver<EventKind> {
        self.head_tx.subscribe()
    }

    pub fn subscribe_block(&self) -> broadcast::Receiver<EventKind> {
        self.block_tx.subscribe()
    }

    pub fn subscribe_finalized(&self) -> broadcast::Receiver<EventKind> {
        self.finalized_tx.subscribe()
    }

    pub fn subscribe_reorg(&self) -> broadcast::Receiver<EventKind> {
        self.reorg_tx.subscribe()
    }

    pub fn subscribe_blob_sidecar(&self) -> broadcast::Receiver<EventKind> {
        self.blob_sidecar_tx.subscribe()
    }

    pub fn subscribe_data_column_sidecar(&self) -> broadcast::Receiver<EventKind> {
        self.data_column_sidecar_tx.subscribe()
    }

    pub fn subscribe_attestation(&self) -> broadcast::Receiver<EventKind> {
        self.attestation_tx.subscribe()
    }

    pub fn subscribe_exit(&self) -> broadcast::Receiver<EventKind> {
        self.exit_tx.subscribe()
    }

    pub fn has_head_subscribers(&self) -> bool {
        self.head_tx.receiver_count() > 0
    }

    pub fn has_blob_sidecar_subscribers(&self) -> bool {
        self.blob_sidecar_tx.receiver_count() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_only_matching_subscribers() {
        let handler = ChainEventHandler::default();
        let mut head_rx = handler.subscribe_head();
        let mut block_rx = handler.subscribe_block();

        handler.register(EventKind::Head(SseHead {
            slot: Slot::new(1),
            block: Hash256::default(),
            state: Hash256::default(),
            epoch_transition: false,
        }));

        assert!(matches!(head_rx.try_recv().unwrap(), EventKind::Head(_)));
        assert!(block_rx.try_recv().is_err());
    }

    #[test]
    fn register_without_subscribers_is_a_noop() {
        let handler = ChainEventHandler::default();
        handler.register(EventKind::Block(SseBlock {
            slot: Slot::new(1),
            block: Hash256::default(),
            execution_optimistic: false,
        }));
    }
}
