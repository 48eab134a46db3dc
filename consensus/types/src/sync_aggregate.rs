use crate::consts::typenum_sizes::SyncCommitteeSize;
use bls::Signature;
use serde::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use ssz_types::BitVector;
use tree_hash_derive::TreeHash;

/// The aggregated sync-committee contribution included in a block body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode, TreeHash)]
pub struct SyncAggregate {
    pub sync_committee_bits: BitVector<SyncCommitteeSize>,
    pub sync_committee_signature: Signature,
}

impl SyncAggregate {
    /// New aggregate to be used as the seed for aggregating other signatures.
    pub fn new() -> Self {
        Self {
            sync_committee_bits: BitVector::new(),
            sync_committee_signature: Signature::infinity(),
        }
    }

    pub fn num_set_bits(&self) -> usize {
        self.sync_committee_bits.num_set_bits()
    }
}

impl Default for SyncAggregate {
    fn default() -> Self {
        Self::new()
    }
}
