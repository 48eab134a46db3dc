use crate::consts::SLOTS_PER_EPOCH;
use crate::{BeaconBlockBody, BeaconBlockHeader, Epoch, Hash256, Slot};
use serde::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use tree_hash::TreeHash;
use tree_hash_derive::TreeHash;

/// A block of the `BeaconChain`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode, TreeHash)]
pub struct BeaconBlock {
    pub slot: Slot,
    #[serde(with = "serde_utils::quoted_u64")]
    pub proposer_index: u64,
    pub parent_root: Hash256,
    pub state_root: Hash256,
    pub body: BeaconBlockBody,
}

impl BeaconBlock {
    /// Returns an "empty" block at slot zero.
    pub fn empty() -> Self {
        Self {
            slot: Slot::new(0),
            proposer_index: 0,
            parent_root: Hash256::default(),
            state_root: Hash256::default(),
            body: BeaconBlockBody::empty(),
        }
    }

    pub fn epoch(&self) -> Epoch {
        self.slot.epoch(SLOTS_PER_EPOCH)
    }

    /// Returns the `tree_hash_root` of the block: its identity.
    pub fn canonical_root(&self) -> Hash256 {
        self.tree_hash_root()
    }

    /// Returns a full `BeaconBlockHeader` of this block.
    ///
    /// Note: performs a full tree-hash of `self.body`.
    pub fn block_header(&self) -> BeaconBlockHeader {
        BeaconBlockHeader {
            slot: self.slot,
            proposer_index: self.proposer_index,
            parent_root: self.parent_root,
            state_root: self.state_root,
            body_root: self.body.tree_hash_root(),
        }
    }

    /// Returns a "temporary" header, where the `state_root` is `Hash256::zero()`.
    pub fn temporary_block_header(&self) -> BeaconBlockHeader {
        BeaconBlockHeader {
            state_root: Hash256::default(),
            ..self.block_header()
        }
    }
}
