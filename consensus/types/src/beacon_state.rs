use crate::consts::typenum_sizes::{
    EpochsPerHistoricalVector, JustificationBitsLength, SlotsPerHistoricalRoot,
    ValidatorRegistryLimit,
};
use crate::consts::{EPOCHS_PER_HISTORICAL_VECTOR, SLOTS_PER_EPOCH, SLOTS_PER_HISTORICAL_ROOT};
use crate::{
    BeaconBlockHeader, ChainSpec, Checkpoint, Domain, Epoch, ExecutionPayloadHeader, Fork,
    Hash256, RelativeEpoch, RelativeEpochError, Slot, Validator,
};
use ethereum_hashing::hash;
use int_to_bytes::int_to_bytes8;
use serde::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use ssz_types::{BitVector, FixedVector, VariableList};
use std::sync::Arc;
use swap_or_not_shuffle::compute_shuffled_index;
use tree_hash::TreeHash;
use tree_hash_derive::TreeHash;

pub mod committee_cache;
pub mod participation_flags;

pub use committee_cache::{BeaconCommittee, CommitteeCache};

pub const CACHED_EPOCHS: usize = 3;

#[derive(Debug, PartialEq, Clone)]
pub enum BeaconStateError {
    UnknownValidator(usize),
    SlotOutOfBounds,
    EpochOutOfBounds,
    InsufficientValidators,
    ShuffleFailure,
    CommitteeCacheUninitialized(Option<RelativeEpoch>),
    NoCommittee { slot: Slot, index: u64 },
    RelativeEpochError(RelativeEpochError),
    ParticipationOutOfBounds(usize),
    InvalidFlagIndex(usize),
    InvalidBitfield,
}

impl From<RelativeEpochError> for BeaconStateError {
    fn from(e: RelativeEpochError) -> Self {
        BeaconStateError::RelativeEpochError(e)
    }
}

/// The state of the `BeaconChain` at some slot.
///
/// A single post-Deneb container shape is used; derived caches are excluded from
/// serialization and hashing and rebuilt on demand.
#[derive(Debug, Clone, Serialize, Deserialize, Encode, Decode, TreeHash)]
pub struct BeaconState {
    // Versioning
    #[serde(with = "serde_utils::quoted_u64")]
    pub genesis_time: u64,
    pub genesis_validators_root: Hash256,
    pub slot: Slot,
    pub fork: Fork,

    // History
    pub latest_block_header: BeaconBlockHeader,
    pub block_roots: FixedVector<Hash256, SlotsPerHistoricalRoot>,
    pub state_roots: FixedVector<Hash256, SlotsPerHistoricalRoot>,

    // Registry
    pub validators: VariableList<Validator, ValidatorRegistryLimit>,
    #[serde(with = "quoted_u64_var_list")]
    pub balances: VariableList<u64, ValidatorRegistryLimit>,

    // Randomness
    pub randao_mixes: FixedVector<Hash256, EpochsPerHistoricalVector>,

    // Participation
    pub previous_epoch_participation: VariableList<u8, ValidatorRegistryLimit>,
    pub current_epoch_participation: VariableList<u8, ValidatorRegistryLimit>,

    // Finality
    pub justification_bits: BitVector<JustificationBitsLength>,
    pub previous_justified_checkpoint: Checkpoint,
    pub current_justified_checkpoint: Checkpoint,
    pub finalized_checkpoint: Checkpoint,

    // Execution
    pub latest_execution_payload_header: ExecutionPayloadHeader,

    // Caching (not in the spec)
    #[serde(skip_serializing, skip_deserializing)]
    #[ssz(skip_serializing, skip_deserializing)]
    #[tree_hash(skip_hashing)]
    pub committee_caches: [Arc<CommitteeCache>; CACHED_EPOCHS],
}

impl PartialEq for BeaconState {
    fn eq(&self, other: &Self) -> bool {
        // Caches are derived state and excluded from equality.
        self.genesis_time == other.genesis_time
            && self.genesis_validators_root == other.genesis_validators_root
            && self.slot == other.slot
            && self.fork == other.fork
            && self.latest_block_header == other.latest_block_header
            && self.block_roots == other.block_roots
            && self.state_roots == other.state_roots
            && self.validators == other.validators
            && self.balances == other.balances
            && self.randao_mixes == other.randao_mixes
            && self.previous_epoch_participation == other.previous_epoch_participation
            && self.current_epoch_participation == other.current_epoch_participation
            && self.justification_bits == other.justification_bits
            && self.previous_justified_checkpoint == other.previous_justified_checkpoint
            && self.current_justified_checkpoint == other.current_justified_checkpoint
            && self.finalized_checkpoint == other.finalized_checkpoint
            && self.latest_execution_payload_header == other.latest_execution_payload_header
    }
}

impl BeaconState {
    /// The epoch corresponding to `self.slot`.
    pub fn current_epoch(&self) -> Epoch {
        self.slot.epoch(SLOTS_PER_EPOCH)
    }

    /// The epoch prior to `self.current_epoch()`, saturating at genesis.
    pub fn previous_epoch(&self) -> Epoch {
        self.current_epoch().saturating_sub(1u64)
    }

    pub fn next_epoch(&self) -> Epoch {
        self.current_epoch().saturating_add(1u64)
    }

    /// The canonical root of this state.
    pub fn canonical_root(&self) -> Hash256 {
        self.tree_hash_root()
    }

    /*
     * History accessors
     */

    fn historical_root_index(slot: Slot) -> usize {
        (slot.as_u64() % SLOTS_PER_HISTORICAL_ROOT) as usize
    }

    /// Return the block root at a recent `slot`.
    pub fn get_block_root(&self, slot: Slot) -> Result<Hash256, BeaconStateError> {
        if slot < self.slot && self.slot <= slot + SLOTS_PER_HISTORICAL_ROOT {
            Ok(self.block_roots[Self::historical_root_index(slot)])
        } else {
            Err(BeaconStateError::SlotOutOfBounds)
        }
    }

    /// Return the block root of the start slot of a recent `epoch`.
    pub fn get_block_root_at_epoch(&self, epoch: Epoch) -> Result<Hash256, BeaconStateError> {
        let slot = epoch.start_slot(SLOTS_PER_EPOCH);
        if slot == self.slot {
            // The target of an attestation in the first slot of an epoch is the block at that
            // slot, which is not yet in `block_roots`.
            Ok(self.latest_block_header.canonical_root())
        } else {
            self.get_block_root(slot)
        }
    }

    pub fn set_block_root(&mut self, slot: Slot, root: Hash256) {
        self.block_roots[Self::historical_root_index(slot)] = root;
    }

    pub fn get_state_root(&self, slot: Slot) -> Result<Hash256, BeaconStateError> {
        if slot < self.slot && self.slot <= slot + SLOTS_PER_HISTORICAL_ROOT {
            Ok(self.state_roots[Self::historical_root_index(slot)])
        } else {
            Err(BeaconStateError::SlotOutOfBounds)
        }
    }

    pub fn set_state_root(&mut self, slot: Slot, root: Hash256) {
        self.state_roots[Self::historical_root_index(slot)] = root;
    }

    /*
     * Randomness
     */

    pub fn get_randao_mix(&self, epoch: Epoch) -> Hash256 {
        self.randao_mixes[epoch.position_in_historical_vector(EPOCHS_PER_HISTORICAL_VECTOR)]
    }

    /// Mix a revealed randao value into the current epoch's mix.
    pub fn update_randao_mix(&mut self, epoch: Epoch, randao_reveal_hash: Hash256) {
        let index = epoch.position_in_historical_vector(EPOCHS_PER_HISTORICAL_VECTOR);
        let mut mixed = [0u8; 32];
        for (i, byte) in mixed.iter_mut().enumerate() {
            *byte = self.randao_mixes[index].as_slice()[i] ^ randao_reveal_hash.as_slice()[i];
        }
        self.randao_mixes[index] = Hash256::from(mixed);
    }

    /// Generate a seed for the given `epoch` and `domain`.
    pub fn get_seed(&self, epoch: Epoch, domain: Domain, spec: &ChainSpec) -> Hash256 {
        // The mix is from an epoch in the past so it is stable during the epoch.
        let mix_epoch = epoch.saturating_add(
            EPOCHS_PER_HISTORICAL_VECTOR - spec.min_seed_lookahead.as_u64() - 1,
        );
        let mix = self.randao_mixes[mix_epoch.position_in_historical_vector(EPOCHS_PER_HISTORICAL_VECTOR)];

        let mut preimage = Vec::with_capacity(4 + 8 + 32);
        preimage.extend_from_slice(&spec.domain_type_bytes(domain));
        preimage.extend_from_slice(&int_to_bytes8(epoch.as_u64()));
        preimage.extend_from_slice(mix.as_slice());
        Hash256::from_slice(&hash(&preimage))
    }

    /*
     * Registry
     */

    pub fn get_active_validator_indices(&self, epoch: Epoch) -> Vec<usize> {
        self.validators
            .iter()
            .enumerate()
            .filter(|(_, validator)| validator.is_active_at(epoch))
            .map(|(index, _)| index)
            .collect()
    }

    pub fn get_validator(&self, index: usize) -> Result<&Validator, BeaconStateError> {
        self.validators
            .get(index)
            .ok_or(BeaconStateError::UnknownValidator(index))
    }

    pub fn get_balance(&self, index: usize) -> Result<u64, BeaconStateError> {
        self.balances
            .get(index)
            .copied()
            .ok_or(BeaconStateError::UnknownValidator(index))
    }

    /// The sum of active validators' effective balances, floored at one increment.
    pub fn get_total_active_balance(&self, spec: &ChainSpec) -> u64 {
        let total: u64 = self
            .get_active_validator_indices(self.current_epoch())
            .iter()
            .map(|&index| self.validators[index].effective_balance)
            .sum();
        std::cmp::max(total, spec.effective_balance_increment)
    }

    /*
     * Committees and proposers
     */

    /// Build the committee cache for `relative_epoch` if it is not already built.
    pub fn build_committee_cache(
        &mut self,
        relative_epoch: RelativeEpoch,
        spec: &ChainSpec,
    ) -> Result<(), BeaconStateError> {
        let epoch = relative_epoch.into_epoch(self.current_epoch());
        let index = Self::cache_index(relative_epoch);
        if !self.committee_caches[index].is_initialized_at(epoch) {
            self.committee_caches[index] = Arc::new(CommitteeCache::initialized(self, epoch, spec)?);
        }
        Ok(())
    }

    pub fn build_all_committee_caches(&mut self, spec: &ChainSpec) -> Result<(), BeaconStateError> {
        self.build_committee_cache(RelativeEpoch::Previous, spec)?;
        self.build_committee_cache(RelativeEpoch::Current, spec)?;
        self.build_committee_cache(RelativeEpoch::Next, spec)
    }

    const fn cache_index(relative_epoch: RelativeEpoch) -> usize {
        match relative_epoch {
            RelativeEpoch::Previous => 0,
            RelativeEpoch::Current => 1,
            RelativeEpoch::Next => 2,
        }
    }

    /// Get the already-built committee cache for `relative_epoch`.
    pub fn committee_cache(
        &self,
        relative_epoch: RelativeEpoch,
    ) -> Result<&Arc<CommitteeCache>, BeaconStateError> {
        let epoch = relative_epoch.into_epoch(self.current_epoch());
        let cache = &self.committee_caches[Self::cache_index(relative_epoch)];
        if cache.is_initialized_at(epoch) {
            Ok(cache)
        } else {
            Err(BeaconStateError::CommitteeCacheUninitialized(Some(
                relative_epoch,
            )))
        }
    }

    /// Rotate the committee caches across an epoch boundary: previous <- current <- next.
    pub fn advance_caches(&mut self) {
        self.committee_caches.rotate_left(1);
        self.committee_caches[Self::cache_index(RelativeEpoch::Next)] =
            Arc::new(CommitteeCache::default());
    }

    pub fn get_beacon_committee(
        &self,
        slot: Slot,
        index: u64,
    ) -> Result<BeaconCommittee<'_>, BeaconStateError> {
        let epoch = slot.epoch(SLOTS_PER_EPOCH);
        let relative_epoch = RelativeEpoch::from_epoch(self.current_epoch(), epoch)?;
        let cache = self.committee_cache(relative_epoch)?;
        cache
            .get_beacon_committee(slot, index)
            .ok_or(BeaconStateError::NoCommittee { slot, index })
    }

    pub fn get_committee_count_per_slot(
        &self,
        relative_epoch: RelativeEpoch,
    ) -> Result<u64, BeaconStateError> {
        Ok(self.committee_cache(relative_epoch)?.committees_per_slot())
    }

    /// Compute the proposer of the block at `slot`.
    pub fn get_beacon_proposer_index(
        &self,
        slot: Slot,
        spec: &ChainSpec,
    ) -> Result<usize, BeaconStateError> {
        let epoch = slot.epoch(SLOTS_PER_EPOCH);
        let indices = self.get_active_validator_indices(epoch);
        if indices.is_empty() {
            return Err(BeaconStateError::InsufficientValidators);
        }

        let mut preimage = self
            .get_seed(epoch, Domain::BeaconProposer, spec)
            .as_slice()
            .to_vec();
        preimage.extend_from_slice(&int_to_bytes8(slot.as_u64()));
        let seed = hash(&preimage);

        self.compute_proposer_index(&indices, &seed, spec)
    }

    /// Acceptance-sample a proposer from `indices`, weighted by effective balance.
    fn compute_proposer_index(
        &self,
        indices: &[usize],
        seed: &[u8],
        spec: &ChainSpec,
    ) -> Result<usize, BeaconStateError> {
        const MAX_RANDOM_BYTE: u64 = u8::MAX as u64;

        let mut i = 0usize;
        loop {
            let shuffled_index =
                compute_shuffled_index(i % indices.len(), indices.len(), seed, spec.shuffle_round_count)
                    .ok_or(BeaconStateError::ShuffleFailure)?;
            let candidate_index = indices[shuffled_index];

            let mut preimage = seed.to_vec();
            preimage.extend_from_slice(&int_to_bytes8((i / 32) as u64));
            let random_byte = hash(&preimage)[i % 32] as u64;

            let effective_balance = self.get_validator(candidate_index)?.effective_balance;
            if effective_balance * MAX_RANDOM_BYTE >= spec.max_effective_balance * random_byte {
                return Ok(candidate_index);
            }
            i += 1;
        }
    }
}

/// Serialize a variable list of `u64` such that each int is quoted.
mod quoted_u64_var_list {
    use serde::ser::SerializeSeq;
    use serde::{Deserializer, Serializer};
    use serde_utils::quoted_u64_vec::{QuotedIntVecVisitor, QuotedIntWrapper};
    use ssz_types::VariableList;
    use ssz_types::typenum::Unsigned;

    pub fn serialize<S, T>(value: &VariableList<u64, T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Unsigned,
    {
        let mut seq = serializer.serialize_seq(Some(value.len()))?;
        for &int in value.iter() {
            seq.serialize_element(&QuotedIntWrapper { int })?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<VariableList<u64, T>, D::Error>
    where
        D: Deserializer<'de>,
        T: Unsigned,
    {
        deserializer
            .deserialize_any(QuotedIntVecVisitor)
            .and_then(|vec| {
                VariableList::new(vec)
                    .map_err(|e| serde::de::Error::custom(format!("invalid length: {:?}", e)))
            })
    }
}
