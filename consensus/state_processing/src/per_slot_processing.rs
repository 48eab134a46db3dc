use crate::per_epoch_processing::{
    EpochProcessingError, EpochProcessingSummary, process_epoch,
};
use types::consts::SLOTS_PER_EPOCH;
use types::{BeaconState, BeaconStateError, ChainSpec, FixedBytesExtended, Hash256};

#[derive(Debug, PartialEq, Clone)]
pub enum SlotProcessingError {
    BeaconState(BeaconStateError),
    EpochProcessing(EpochProcessingError),
}

impl From<BeaconStateError> for SlotProcessingError {
    fn from(e: BeaconStateError) -> Self {
        Self::BeaconState(e)
    }
}

impl From<EpochProcessingError> for SlotProcessingError {
    fn from(e: EpochProcessingError) -> Self {
        Self::EpochProcessing(e)
    }
}

/// Advance `state` by a single slot, performing epoch processing at epoch boundaries.
///
/// If the root of the state at the current slot is already known it may be passed as
/// `state_root`, saving a tree-hash. This is always a win when replaying blocks whose state
/// roots are trusted.
pub fn per_slot_processing(
    state: &mut BeaconState,
    state_root: Option<Hash256>,
    spec: &ChainSpec,
) -> Result<Option<EpochProcessingSummary>, SlotProcessingError> {
    let previous_state_root = state_root.unwrap_or_else(|| state.canonical_root());

    // Cache the state root.
    let slot = state.slot;
    state.set_state_root(slot, previous_state_root);

    // A block from this slot was missing if the header's state root was never filled in.
    if state.latest_block_header.state_root == Hash256::zero() {
        state.latest_block_header.state_root = previous_state_root;
    }

    // Cache the block root.
    let latest_block_root = state.latest_block_header.canonical_root();
    state.set_block_root(slot, latest_block_root);

    let summary = if (state.slot + 1).as_u64() % SLOTS_PER_EPOCH == 0 {
        let summary = process_epoch(state, spec)?;
        state.advance_caches();
        Some(summary)
    } else {
        None
    };

    state.slot += 1u64;

    Ok(summary)
}
