use types::{BeaconState, BeaconStateError, Hash256, IndexedAttestation, SignedBeaconBlock, Slot};

/// Values computed during block processing that later stages want to reuse without
/// recomputation: the block root, the proposer index and the indexed attestations.
#[derive(Debug, Clone)]
pub struct ConsensusContext {
    /// Slot to act as an identifier/safeguard.
    slot: Slot,
    /// Proposer index of the block at `slot`.
    proposer_index: Option<u64>,
    /// Block root of the block at `slot`.
    current_block_root: Option<Hash256>,
    /// The attestations of the block, resolved to validator indices.
    indexed_attestations: Vec<IndexedAttestation>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum ContextError {
    BeaconState(BeaconStateError),
    SlotMismatch { slot: Slot, expected: Slot },
}

impl From<BeaconStateError> for ContextError {
    fn from(e: BeaconStateError) -> Self {
        Self::BeaconState(e)
    }
}

impl ConsensusContext {
    pub fn new(slot: Slot) -> Self {
        Self {
            slot,
            proposer_index: None,
            current_block_root: None,
            indexed_attestations: vec![],
        }
    }

    pub fn set_proposer_index(mut self, proposer_index: u64) -> Self {
        self.proposer_index = Some(proposer_index);
        self
    }

    pub fn set_current_block_root(mut self, block_root: Hash256) -> Self {
        self.current_block_root = Some(block_root);
        self
    }

    fn check_slot(&self, slot: Slot) -> Result<(), ContextError> {
        if slot == self.slot {
            Ok(())
        } else {
            Err(ContextError::SlotMismatch {
                slot,
                expected: self.slot,
            })
        }
    }

    pub fn get_proposer_index(
        &mut self,
        state: &BeaconState,
        spec: &types::ChainSpec,
    ) -> Result<u64, ContextError> {
        self.check_slot(state.slot)?;
        if let Some(proposer_index) = self.proposer_index {
            return Ok(proposer_index);
        }
        let proposer_index = state.get_beacon_proposer_index(self.slot, spec)? as u64;
        self.proposer_index = Some(proposer_index);
        Ok(proposer_index)
    }

    /// Compute (and memoize) the root of `block`.
    pub fn get_current_block_root(
        &mut self,
        block: &SignedBeaconBlock,
    ) -> Result<Hash256, ContextError> {
        self.check_slot(block.slot())?;
        if let Some(current_block_root) = self.current_block_root {
            return Ok(current_block_root);
        }
        let current_block_root = block.canonical_root();
        self.current_block_root = Some(current_block_root);
        Ok(current_block_root)
    }

    pub fn add_indexed_attestation(&mut self, indexed_attestation: IndexedAttestation) {
        self.indexed_attestations.push(indexed_attestation);
    }

    pub fn indexed_attestations(&self) -> &[IndexedAttestation] {
        &self.indexed_attestations
    }

    pub fn into_indexed_attestations(self) -> Vec<IndexedAttestation> {
        self.indexed_attestations
    }
}
