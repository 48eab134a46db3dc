use crate::consts::{
    MAX_COMMITTEES_PER_SLOT, SLOTS_PER_EPOCH, TARGET_COMMITTEE_SIZE,
};
use crate::{BeaconState, BeaconStateError, ChainSpec, Domain, Epoch, Slot};
use swap_or_not_shuffle::shuffle_list;

/// A committee of validators attesting in a slot.
#[derive(Debug, Clone, PartialEq)]
pub struct BeaconCommittee<'a> {
    pub slot: Slot,
    pub index: u64,
    pub committee: &'a [usize],
}

/// Computes and stores the shuffling for an epoch.
///
/// The cache is cheap to clone behind an `Arc` and is rotated (not rebuilt) across epoch
/// boundaries.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CommitteeCache {
    initialized_epoch: Option<Epoch>,
    shuffling: Vec<usize>,
    committees_per_slot: u64,
}

impl CommitteeCache {
    /// Return a fully initialized cache for the committees of `epoch`.
    pub fn initialized(
        state: &BeaconState,
        epoch: Epoch,
        spec: &ChainSpec,
    ) -> Result<CommitteeCache, BeaconStateError> {
        let active_validator_indices = state.get_active_validator_indices(epoch);
        if active_validator_indices.is_empty() {
            return Err(BeaconStateError::InsufficientValidators);
        }

        let committees_per_slot =
            Self::committees_per_slot_for(active_validator_indices.len() as u64);

        let seed = state.get_seed(epoch, Domain::BeaconAttester, spec);
        let shuffling = shuffle_list(
            active_validator_indices,
            spec.shuffle_round_count,
            seed.as_slice(),
            false,
        )
        .ok_or(BeaconStateError::ShuffleFailure)?;

        Ok(CommitteeCache {
            initialized_epoch: Some(epoch),
            shuffling,
            committees_per_slot,
        })
    }

    fn committees_per_slot_for(active_validator_count: u64) -> u64 {
        (active_validator_count / SLOTS_PER_EPOCH / TARGET_COMMITTEE_SIZE)
            .clamp(1, MAX_COMMITTEES_PER_SLOT)
    }

    pub fn is_initialized_at(&self, epoch: Epoch) -> bool {
        self.initialized_epoch == Some(epoch)
    }

    pub fn initialized_epoch(&self) -> Option<Epoch> {
        self.initialized_epoch
    }

    pub fn committees_per_slot(&self) -> u64 {
        self.committees_per_slot
    }

    pub fn epoch_committee_count(&self) -> u64 {
        self.committees_per_slot * SLOTS_PER_EPOCH
    }

    pub fn active_validator_count(&self) -> usize {
        self.shuffling.len()
    }

    /// Return the committee for `(slot, index)`, if the cache covers that slot's epoch.
    pub fn get_beacon_committee(&self, slot: Slot, index: u64) -> Option<BeaconCommittee<'_>> {
        let epoch = self.initialized_epoch?;
        if slot.epoch(SLOTS_PER_EPOCH) != epoch || index >= self.committees_per_slot {
            return None;
        }

        let committee_count = self.epoch_committee_count();
        let committee_index =
            (slot.as_u64() % SLOTS_PER_EPOCH) * self.committees_per_slot + index;
        let committee = self.compute_committee(committee_index, committee_count)?;

        Some(BeaconCommittee {
            slot,
            index,
            committee,
        })
    }

    /// Slice out committee `index` of `count` from the shuffling.
    fn compute_committee(&self, index: u64, count: u64) -> Option<&[usize]> {
        let len = self.shuffling.len() as u64;
        let start = (len * index / count) as usize;
        let end = (len * (index + 1) / count) as usize;
        self.shuffling.get(start..end)
    }

    /// Every committee of the epoch, in `(slot, index)` order.
    pub fn get_all_beacon_committees(&self) -> Result<Vec<BeaconCommittee<'_>>, BeaconStateError> {
        let epoch = self
            .initialized_epoch
            .ok_or(BeaconStateError::CommitteeCacheUninitialized(None))?;

        let mut committees =
            Vec::with_capacity((SLOTS_PER_EPOCH * self.committees_per_slot) as usize);
        for slot in epoch.slot_iter(SLOTS_PER_EPOCH) {
            for index in 0..self.committees_per_slot {
                committees.push(self.get_beacon_committee(slot, index).ok_or(
                    BeaconStateError::NoCommittee { slot, index },
                )?);
            }
        }
        Ok(committees)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn committees_per_slot_clamping() {
        assert_eq!(CommitteeCache::committees_per_slot_for(0), 1);
        assert_eq!(CommitteeCache::committees_per_slot_for(4096), 1);
        assert_eq!(
            CommitteeCache::committees_per_slot_for(32 * 128 * 2),
            2
        );
        assert_eq!(
            CommitteeCache::committees_per_slot_for(u64::MAX / 2),
            MAX_COMMITTEES_PER_SLOT
        );
    }

    #[test]
    fn uninitialized_cache_returns_no_committee() {
        let cache = CommitteeCache::default();
        assert!(cache.get_beacon_committee(Slot::new(0), 0).is_none());
    }
}
