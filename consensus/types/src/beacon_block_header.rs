use crate::{Hash256, SignedBeaconBlockHeader, Slot};
use bls::Signature;
use serde::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use tree_hash::TreeHash;
use tree_hash_derive::TreeHash;

/// A header of a `BeaconBlock`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode, TreeHash,
)]
pub struct BeaconBlockHeader {
    pub slot: Slot,
    #[serde(with = "serde_utils::quoted_u64")]
    pub proposer_index: u64,
    pub parent_root: Hash256,
    pub state_root: Hash256,
    pub body_root: Hash256,
}

impl BeaconBlockHeader {
    pub fn empty() -> Self {
        Self {
            slot: Slot::new(0),
            proposer_index: 0,
            parent_root: Hash256::default(),
            state_root: Hash256::default(),
            body_root: Hash256::default(),
        }
    }

    /// Returns the `tree_hash_root` of the header: the block root.
    pub fn canonical_root(&self) -> Hash256 {
        self.tree_hash_root()
    }

    /// Given a `signature`, produce a `SignedBeaconBlockHeader`.
    pub fn into_signed(self, signature: Signature) -> SignedBeaconBlockHeader {
        SignedBeaconBlockHeader {
            message: self,
            signature,
        }
    }
}
