//! Throttled reconstruction of missing data-column sidecars.
//!
//! When at least half the columns of a block are present, the rest can be recovered locally
//! instead of waiting for gossip. Reconstruction is expensive, so at most one runs at a time,
//! repeated attempts for the same block root are suppressed, and each attempt starts after a
//! randomized slot-relative delay to give gossip a chance to deliver the columns for free.

use crate::block_input::BlockInput;
use crate::events::{ChainEventHandler, EventKind};
use crate::kzg_utils::reconstruct_data_columns;
use crate::metrics;
use kzg::Kzg;
use parking_lot::Mutex;
use rand::Rng;
use slot_clock::SlotClock;
use std::sync::Arc;
use tracing::debug;
use types::{ChainSpec, Hash256};

/// Bounds of the random pre-reconstruction delay, in basis points of the slot duration.
pub const RECONSTRUCTION_DELAY_MIN_BPS: u64 = 1000;
pub const RECONSTRUCTION_DELAY_MAX_BPS: u64 = 3000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconstructionOutcome {
    /// The block predates PeerDAS; there are no columns to reconstruct.
    PreFulu,
    /// The input was already fully available.
    NotAttemptedFull,
    /// The block has no blob commitments.
    NotAttemptedNoBlobs,
    /// Fewer than half the columns are present; recovery is not possible yet.
    NullResponse,
    /// Reconstruction completed and resolved the input's availability.
    SuccessResolved,
    /// Reconstruction completed after gossip had already resolved the input.
    SuccessLate,
    /// The recovery computation failed.
    Failed,
}

struct TrackerState {
    running: bool,
    last_block_root: Option<Hash256>,
}

/// Enforces the single-in-flight, deduplicated-by-root reconstruction discipline.
pub struct ColumnReconstructionTracker<S> {
    kzg: Arc<Kzg>,
    spec: Arc<ChainSpec>,
    slot_clock: S,
    events: Arc<ChainEventHandler>,
    state: Mutex<TrackerState>,
}

impl<S: SlotClock> ColumnReconstructionTracker<S> {
    pub fn new(
        kzg: Arc<Kzg>,
        spec: Arc<ChainSpec>,
        slot_clock: S,
        events: Arc<ChainEventHandler>,
    ) -> Self {
        Self {
            kzg,
            spec,
            slot_clock,
            events,
            state: Mutex::new(TrackerState {
                running: false,
                last_block_root: None,
            }),
        }
    }

    /// Schedule a reconstruction attempt for `block_input`.
    ///
    /// Returns `None` when the attempt was suppressed: another reconstruction is running, or
    /// this block root was already attempted.
    pub async fn trigger_column_reconstruction(
        &self,
        block_input: Arc<BlockInput>,
    ) -> Option<ReconstructionOutcome> {
        let block_root = block_input.block_root();
        {
            let mut state = self.state.lock();
            if state.running || state.last_block_root == Some(block_root) {
                return None;
            }
            state.running = true;
            state.last_block_root = Some(block_root);
        }

        // Random back-off within the slot so that gossip can complete the columns for free.
        let delay_bps =
            rand::rng().random_range(RECONSTRUCTION_DELAY_MIN_BPS..=RECONSTRUCTION_DELAY_MAX_BPS);
        tokio::time::sleep(self.slot_clock.duration_of_bps(delay_bps)).await;

        let outcome = self.attempt_reconstruction(&block_input);

        // Clear the running flag regardless of outcome; the root stays recorded so repeat
        // triggers for the same block remain no-ops.
        self.state.lock().running = false;

        metrics::inc_counter(&metrics::KZG_DATA_COLUMN_RECONSTRUCTION_ATTEMPTS);
        if outcome == ReconstructionOutcome::Failed {
            metrics::inc_counter(&metrics::KZG_DATA_COLUMN_RECONSTRUCTION_FAILURES);
        }
        Some(outcome)
    }

    fn attempt_reconstruction(&self, block_input: &BlockInput) -> ReconstructionOutcome {
        if !self
            .spec
            .is_peer_das_enabled_for_epoch(block_input.epoch())
        {
            return ReconstructionOutcome::PreFulu;
        }
        if block_input.block().num_expected_blobs() == 0 {
            return ReconstructionOutcome::NotAttemptedNoBlobs;
        }
        let was_available = block_input.is_available();
        if was_available && block_input.cached_columns().len() >= self.spec.number_of_columns as usize
        {
            return ReconstructionOutcome::NotAttemptedFull;
        }

        let available_columns = block_input.cached_columns();
        if (available_columns.len() as u64) < self.spec.number_of_columns / 2 {
            return ReconstructionOutcome::NullResponse;
        }

        debug!(
            block_root = ?block_input.block_root(),
            columns = available_columns.len(),
            "Reconstructing data columns"
        );

        let recovered = match reconstruct_data_columns(&self.kzg, &available_columns, &self.spec) {
            Ok(recovered) => recovered,
            Err(e) => {
                debug!(error = ?e, "Data column reconstruction failed");
                return ReconstructionOutcome::Failed;
            }
        };

        let existing = block_input.cached_column_indices().unwrap_or_default();
        for column in recovered {
            if !existing.contains(&column.index) {
                self.events
                    .register(EventKind::DataColumnSidecar(column.clone()));
                if block_input.add_custody_column(column).is_err() {
                    return ReconstructionOutcome::Failed;
                }
            }
        }

        if was_available {
            ReconstructionOutcome::SuccessLate
        } else {
            ReconstructionOutcome::SuccessResolved
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_input::BlockSource;
    use bls::Signature;
    use slot_clock::ManualSlotClock;
    use ssz_types::VariableList;
    use std::time::Duration;
    use types::{BeaconBlock, KzgCommitment, SignedBeaconBlock, Slot};

    fn tracker() -> ColumnReconstructionTracker<ManualSlotClock> {
        // A tiny slot duration keeps the random delay near-instant in tests.
        let clock = ManualSlotClock::new(
            Slot::new(0),
            Duration::from_secs(0),
            Duration::from_millis(10),
        );
        let mut spec = ChainSpec::mainnet();
        spec.fulu_fork_epoch = Some(types::Epoch::new(0));
        ColumnReconstructionTracker::new(
            Arc::new(Kzg::new()),
            Arc::new(spec),
            clock,
            Arc::new(ChainEventHandler::default()),
        )
    }

    fn column_input(slot: u64) -> Arc<BlockInput> {
        let mut block = BeaconBlock::empty();
        block.slot = Slot::new(slot);
        block.body.blob_kzg_commitments = VariableList::from(vec![KzgCommitment::empty()]);
        let block = Arc::new(SignedBeaconBlock::from_block(block, Signature::empty()));
        let root = block.canonical_root();
        BlockInput::with_column_promise(block, root, BlockSource::Gossip, None, vec![0, 1])
    }

    #[tokio::test]
    async fn repeat_triggers_for_same_root_are_deduplicated() {
        let tracker = tracker();
        let input = column_input(0);

        // The first call runs (and reports too-few-columns); the second for the same root is
        // suppressed.
        let first = tracker.trigger_column_reconstruction(input.clone()).await;
        assert_eq!(first, Some(ReconstructionOutcome::NullResponse));
        let second = tracker.trigger_column_reconstruction(input.clone()).await;
        assert_eq!(second, None);

        // A different root proceeds independently.
        let other = column_input(1);
        let third = tracker.trigger_column_reconstruction(other).await;
        assert_eq!(third, Some(ReconstructionOutcome::NullResponse));
    }

    #[tokio::test]
    async fn pre_fulu_inputs_are_not_reconstructed() {
        let clock = ManualSlotClock::new(
            Slot::new(0),
            Duration::from_secs(0),
            Duration::from_millis(10),
        );
        // Fulu not scheduled.
        let tracker = ColumnReconstructionTracker::new(
            Arc::new(Kzg::new()),
            Arc::new(ChainSpec::mainnet()),
            clock,
            Arc::new(ChainEventHandler::default()),
        );
        let outcome = tracker
            .trigger_column_reconstruction(column_input(0))
            .await;
        assert_eq!(outcome, Some(ReconstructionOutcome::PreFulu));
    }
}
