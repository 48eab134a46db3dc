//! Caches of recently-used beacon states.
//!
//! States are held behind `Arc` and cloned on use; the cache is the strong retainer.
//! Finalized-checkpoint states are pinned so that regen always has a nearby seed, while the
//! rest of the cache follows LRU order.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use types::{BeaconState, Checkpoint, Epoch, Hash256};

pub const DEFAULT_STATE_CACHE_SIZE: NonZeroUsize = NonZeroUsize::new(32).expect("non-zero");

/// Key states by the root of the block they are the post-state of.
pub struct StateCache {
    /// Post-states of recent blocks, LRU-evicted.
    block_states: Mutex<LruCache<Hash256, Arc<BeaconState>>>,
    /// Epoch-boundary states by checkpoint, pruned on finalization.
    checkpoint_states: Mutex<Vec<(Checkpoint, Arc<BeaconState>)>>,
    /// The most recent finalized state, pinned outside LRU order.
    finalized_state: Mutex<Option<(Hash256, Arc<BeaconState>)>>,
}

impl Default for StateCache {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_CACHE_SIZE)
    }
}

impl StateCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            block_states: Mutex::new(LruCache::new(capacity)),
            checkpoint_states: Mutex::new(Vec::new()),
            finalized_state: Mutex::new(None),
        }
    }

    pub fn put_block_state(&self, block_root: Hash256, state: Arc<BeaconState>) {
        self.block_states.lock().put(block_root, state);
    }

    pub fn get_block_state(&self, block_root: &Hash256) -> Option<Arc<BeaconState>> {
        if let Some((finalized_root, state)) = &*self.finalized_state.lock()
            && finalized_root == block_root
        {
            return Some(state.clone());
        }
        self.block_states.lock().get(block_root).cloned()
    }

    pub fn contains_block_state(&self, block_root: &Hash256) -> bool {
        self.block_states.lock().contains(block_root)
            || self
                .finalized_state
                .lock()
                .as_ref()
                .is_some_and(|(root, _)| root == block_root)
    }

    pub fn put_checkpoint_state(&self, checkpoint: Checkpoint, state: Arc<BeaconState>) {
        let mut cache = self.checkpoint_states.lock();
        if !cache.iter().any(|(existing, _)| *existing == checkpoint) {
            cache.push((checkpoint, state));
        }
    }

    pub fn get_checkpoint_state(&self, checkpoint: &Checkpoint) -> Option<Arc<BeaconState>> {
        self.checkpoint_states
            .lock()
            .iter()
            .find(|(existing, _)| existing == checkpoint)
            .map(|(_, state)| state.clone())
    }

    /// Pin the state of the new finalized block and drop everything that conflicts with
    /// finality.
    pub fn prune_on_finalized(&self, finalized_root: Hash256, finalized_epoch: Epoch) {
        let mut block_states = self.block_states.lock();
        if let Some(state) = block_states.pop(&finalized_root) {
            *self.finalized_state.lock() = Some((finalized_root, state));
        }

        self.checkpoint_states
            .lock()
            .retain(|(checkpoint, _)| checkpoint.epoch >= finalized_epoch);
    }

    /// Drop checkpoint states older than `epoch`, keeping the justified neighbourhood.
    pub fn prune_on_checkpoint(&self, epoch: Epoch) {
        self.checkpoint_states
            .lock()
            .retain(|(checkpoint, _)| checkpoint.epoch.saturating_add(1u64) >= epoch);
    }

    pub fn len(&self) -> usize {
        self.block_states.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::{ChainSpec, FixedBytesExtended, PublicKeyBytes};

    fn test_state() -> Arc<BeaconState> {
        Arc::new(
            state_processing::genesis::interop_genesis_state(
                &[PublicKeyBytes::empty(); 2],
                0,
                &ChainSpec::mainnet(),
            )
            .unwrap(),
        )
    }

    #[test]
    fn finalized_state_survives_lru_pressure() {
        let cache = StateCache::new(NonZeroUsize::new(2).unwrap());
        let finalized_root = Hash256::from_low_u64_be(1);
        cache.put_block_state(finalized_root, test_state());
        cache.prune_on_finalized(finalized_root, Epoch::new(0));

        // Evict everything in the LRU.
        for i in 2..10 {
            cache.put_block_state(Hash256::from_low_u64_be(i), test_state());
        }
        assert!(cache.get_block_state(&finalized_root).is_some());
    }

    #[test]
    fn checkpoint_states_prune_by_epoch() {
        let cache = StateCache::default();
        let old = Checkpoint {
            epoch: Epoch::new(1),
            root: Hash256::from_low_u64_be(1),
        };
        let new = Checkpoint {
            epoch: Epoch::new(5),
            root: Hash256::from_low_u64_be(2),
        };
        cache.put_checkpoint_state(old, test_state());
        cache.put_checkpoint_state(new, test_state());

        cache.prune_on_finalized(Hash256::from_low_u64_be(9), Epoch::new(5));
        assert!(cache.get_checkpoint_state(&old).is_none());
        assert!(cache.get_checkpoint_state(&new).is_some());
    }
}
