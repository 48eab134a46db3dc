//! State regeneration: produce the state needed to verify a block or serve a checkpoint,
//! either from cache, from disk, or by replaying blocks over the nearest stored ancestor
//! state.

use crate::state_cache::StateCache;
use state_processing::{BlockReplayer, per_slot_processing};
use std::sync::Arc;
use store::{HotColdDB, KeyValueStore};
use tracing::debug;
use types::consts::SLOTS_PER_EPOCH;
use types::{BeaconState, Checkpoint, Hash256, SignedBeaconBlock, Slot};

/// The maximum number of blocks regen will replay in one request. Deeper requests indicate a
/// pruned or corrupt hot database.
pub const MAX_REPLAY_DEPTH: usize = 4096;

#[derive(Debug)]
pub enum RegenError {
    /// Neither the cache nor the database holds a state on the requested chain.
    StateUnavailable(Hash256),
    /// A block on the replay path is missing from the database.
    MissingBlock(Hash256),
    ReplayDepthExceeded { depth: usize },
    Replay(state_processing::BlockReplayError),
    SlotProcessing(state_processing::SlotProcessingError),
    Store(store::Error),
}

impl From<store::Error> for RegenError {
    fn from(e: store::Error) -> Self {
        Self::Store(e)
    }
}

impl From<state_processing::BlockReplayError> for RegenError {
    fn from(e: state_processing::BlockReplayError) -> Self {
        Self::Replay(e)
    }
}

/// A union result allowing archival code to skip deserialization when it will immediately
/// re-serialize.
pub enum StateOrBytes {
    State(Arc<BeaconState>),
    Bytes(Vec<u8>),
}

pub struct Regen<Hot, Cold> {
    store: Arc<HotColdDB<Hot, Cold>>,
    state_cache: Arc<StateCache>,
}

impl<Hot: KeyValueStore, Cold: KeyValueStore> Regen<Hot, Cold> {
    pub fn new(store: Arc<HotColdDB<Hot, Cold>>, state_cache: Arc<StateCache>) -> Self {
        Self { store, state_cache }
    }

    pub fn state_cache(&self) -> &Arc<StateCache> {
        &self.state_cache
    }

    /// Return the post-state of `block.parent_root`, advanced with empty-slot processing so
    /// that the next `per_block_processing` call can apply `block` directly.
    pub fn get_pre_state(&self, block: &SignedBeaconBlock) -> Result<BeaconState, RegenError> {
        let parent_root = block.parent_root();
        let mut state = self.get_state_by_block_root(parent_root)?;

        // Advance through empty slots up to the block's slot.
        while state.slot < block.slot() {
            per_slot_processing(&mut state, None, self.store.spec())
                .map_err(RegenError::SlotProcessing)?;
        }
        Ok(state)
    }

    /// Return the post-state of the given block root, replaying from the nearest cached or
    /// stored ancestor state when necessary.
    pub fn get_state_by_block_root(&self, block_root: Hash256) -> Result<BeaconState, RegenError> {
        if let Some(state) = self.state_cache.get_block_state(&block_root) {
            return Ok((*state).clone());
        }

        // Walk back through hot blocks until a cached/stored state is found.
        let mut blocks_to_replay: Vec<SignedBeaconBlock> = Vec::new();
        let mut current_root = block_root;
        let seed_state = loop {
            if blocks_to_replay.len() > MAX_REPLAY_DEPTH {
                return Err(RegenError::ReplayDepthExceeded {
                    depth: blocks_to_replay.len(),
                });
            }
            if let Some(state) = self.state_cache.get_block_state(&current_root) {
                break (*state).clone();
            }

            let block = self
                .store
                .get_block(&current_root)?
                .ok_or(RegenError::MissingBlock(current_root))?;

            // A state stored on disk for this block short-circuits the walk.
            if let Some(state) = self.store.get_state(&block.state_root())? {
                break state;
            }

            current_root = block.parent_root();
            blocks_to_replay.push(block);
        };

        if blocks_to_replay.is_empty() {
            self.state_cache
                .put_block_state(block_root, Arc::new(seed_state.clone()));
            return Ok(seed_state);
        }

        blocks_to_replay.reverse();
        debug!(
            %block_root,
            blocks = blocks_to_replay.len(),
            from_slot = %seed_state.slot,
            "Replaying blocks for state regeneration"
        );

        // Replayed blocks are trusted: they were fully verified before they were persisted.
        let state = BlockReplayer::new(seed_state, self.store.spec())
            .no_signature_verification()
            .minimal_block_root_verification()
            .apply_blocks(blocks_to_replay, None)?
            .into_state();

        self.state_cache
            .put_block_state(block_root, Arc::new(state.clone()));
        Ok(state)
    }

    /// Return the state of a checkpoint (the state at the first slot of `checkpoint.epoch` on
    /// the chain of `checkpoint.root`), or its serialized bytes when only those are needed.
    pub fn get_checkpoint_state_or_bytes(
        &self,
        checkpoint: &Checkpoint,
    ) -> Result<Option<StateOrBytes>, RegenError> {
        if let Some(state) = self.state_cache.get_checkpoint_state(checkpoint) {
            return Ok(Some(StateOrBytes::State(state)));
        }

        // The post-state of the checkpoint block, if stored, can be served as raw bytes when
        // the checkpoint epoch starts right after the block.
        let Some(block) = self.store.get_block(&checkpoint.root)? else {
            return Ok(None);
        };
        let checkpoint_slot = checkpoint.epoch.start_slot(SLOTS_PER_EPOCH);
        if block.slot() == checkpoint_slot
            && let Some(bytes) = self.store.get_state_bytes(&block.state_root())?
        {
            return Ok(Some(StateOrBytes::Bytes(bytes)));
        }

        // Otherwise regenerate and advance to the checkpoint slot.
        let mut state = self.get_state_by_block_root(checkpoint.root)?;
        while state.slot < checkpoint_slot {
            per_slot_processing(&mut state, None, self.store.spec())
                .map_err(RegenError::SlotProcessing)?;
        }
        let state = Arc::new(state);
        self.state_cache
            .put_checkpoint_state(*checkpoint, state.clone());
        Ok(Some(StateOrBytes::State(state)))
    }

    /// Cache housekeeping when the justified checkpoint advances.
    pub fn prune_on_checkpoint(&self, justified_epoch: types::Epoch) {
        self.state_cache.prune_on_checkpoint(justified_epoch);
    }

    /// Cache housekeeping on finalization: pin the finalized state and drop conflicting
    /// entries.
    pub fn prune_on_finalized(&self, finalized_root: Hash256, finalized_epoch: types::Epoch) {
        self.state_cache
            .prune_on_finalized(finalized_root, finalized_epoch);
    }

    /// The slot below which regeneration cannot proceed from the hot database.
    pub fn earliest_hot_slot(&self) -> Slot {
        self.store.get_split_slot()
    }
}
