//! The concrete `ForkChoiceStore` for the beacon node, backed by the state cache and the
//! database.

use crate::regen::Regen;
use crate::state_cache::StateCache;
use fork_choice::ForkChoiceStore;
use proto_array::JustifiedBalances;
use std::collections::BTreeSet;
use std::sync::Arc;
use store::{HotColdDB, KeyValueStore};
use types::{BeaconState, Checkpoint, FixedBytesExtended, Hash256, SignedBeaconBlock, Slot};

#[derive(Debug)]
pub enum Error {
    UnableToReadSlot,
    UnableToReadTime,
    InvalidGenesisSnapshot(Slot),
    /// The state of the new justified checkpoint could not be found.
    MissingJustifiedState(Hash256),
    FailedToReadBlock(Hash256),
    FailedToComputeBalances(Hash256),
    RegenError(String),
}

/// Approximates the `Store` object from the fork choice spec, persisting through the beacon
/// database and regenerating justified balances through the state cache.
pub struct BeaconForkChoiceStore<Hot: KeyValueStore, Cold: KeyValueStore> {
    store: Arc<HotColdDB<Hot, Cold>>,
    state_cache: Arc<StateCache>,
    time: Slot,
    justified_checkpoint: Checkpoint,
    justified_balances: JustifiedBalances,
    finalized_checkpoint: Checkpoint,
    unrealized_justified_checkpoint: Checkpoint,
    unrealized_finalized_checkpoint: Checkpoint,
    proposer_boost_root: Hash256,
    equivocating_indices: BTreeSet<u64>,
}

impl<Hot: KeyValueStore, Cold: KeyValueStore> BeaconForkChoiceStore<Hot, Cold> {
    /// Initializes the store from the anchor state: the checkpoints all point at the anchor.
    pub fn from_anchor(
        store: Arc<HotColdDB<Hot, Cold>>,
        state_cache: Arc<StateCache>,
        anchor_block_root: Hash256,
        anchor_state: &BeaconState,
    ) -> Result<Self, Error> {
        let checkpoint = Checkpoint {
            epoch: anchor_state.current_epoch(),
            root: anchor_block_root,
        };
        let justified_balances = JustifiedBalances::from_justified_state(anchor_state)
            .map_err(|_| Error::FailedToComputeBalances(anchor_block_root))?;

        Ok(Self {
            store,
            state_cache,
            time: anchor_state.slot,
            justified_checkpoint: checkpoint,
            justified_balances,
            finalized_checkpoint: checkpoint,
            unrealized_justified_checkpoint: checkpoint,
            unrealized_finalized_checkpoint: checkpoint,
            proposer_boost_root: Hash256::zero(),
            equivocating_indices: BTreeSet::new(),
        })
    }

    fn justified_state(&self, checkpoint: Checkpoint) -> Result<BeaconState, Error> {
        let regen = Regen::new(self.store.clone(), self.state_cache.clone());
        regen
            .get_state_by_block_root(checkpoint.root)
            .map_err(|e| Error::RegenError(format!("{e:?}")))
    }
}

impl<Hot: KeyValueStore, Cold: KeyValueStore> ForkChoiceStore
    for BeaconForkChoiceStore<Hot, Cold>
{
    type Error = Error;

    fn get_current_slot(&self) -> Slot {
        self.time
    }

    fn set_current_slot(&mut self, slot: Slot) {
        self.time = slot;
    }

    fn on_verified_block(
        &mut self,
        _block: &SignedBeaconBlock,
        block_root: Hash256,
        state: &BeaconState,
    ) -> Result<(), Self::Error> {
        // Keep the post-state warm for descendants and future justified-balance updates.
        self.state_cache
            .put_block_state(block_root, Arc::new(state.clone()));
        Ok(())
    }

    fn justified_checkpoint(&self) -> &Checkpoint {
        &self.justified_checkpoint
    }

    fn justified_balances(&self) -> &JustifiedBalances {
        &self.justified_balances
    }

    fn finalized_checkpoint(&self) -> &Checkpoint {
        &self.finalized_checkpoint
    }

    fn unrealized_justified_checkpoint(&self) -> &Checkpoint {
        &self.unrealized_justified_checkpoint
    }

    fn unrealized_finalized_checkpoint(&self) -> &Checkpoint {
        &self.unrealized_finalized_checkpoint
    }

    fn proposer_boost_root(&self) -> Hash256 {
        self.proposer_boost_root
    }

    fn set_finalized_checkpoint(&mut self, checkpoint: Checkpoint) {
        self.finalized_checkpoint = checkpoint;
    }

    fn set_justified_checkpoint(&mut self, checkpoint: Checkpoint) -> Result<(), Self::Error> {
        let justified_state = self.justified_state(checkpoint)?;
        self.justified_balances = JustifiedBalances::from_justified_state(&justified_state)
            .map_err(|_| Error::FailedToComputeBalances(checkpoint.root))?;
        self.justified_checkpoint = checkpoint;
        Ok(())
    }

    fn set_unrealized_justified_checkpoint(&mut self, checkpoint: Checkpoint) {
        self.unrealized_justified_checkpoint = checkpoint;
    }

    fn set_unrealized_finalized_checkpoint(&mut self, checkpoint: Checkpoint) {
        self.unrealized_finalized_checkpoint = checkpoint;
    }

    fn set_proposer_boost_root(&mut self, proposer_boost_root: Hash256) {
        self.proposer_boost_root = proposer_boost_root;
    }

    fn equivocating_indices(&self) -> &BTreeSet<u64> {
        &self.equivocating_indices
    }

    fn extend_equivocating_indices(&mut self, indices: impl IntoIterator<Item = u64>) {
        self.equivocating_indices.extend(indices);
    }
}
