use crate::Hash256;
use serde::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use tree_hash::TreeHash;
use tree_hash_derive::TreeHash;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Encode, Decode, TreeHash)]
pub struct SigningData {
    pub object_root: Hash256,
    pub domain: Hash256,
}

pub trait SignedRoot: TreeHash {
    /// The root that is signed: `hash_tree_root(SigningData { object_root, domain })`.
    fn signing_root(&self, domain: Hash256) -> Hash256 {
        SigningData {
            object_root: self.tree_hash_root(),
            domain,
        }
        .tree_hash_root()
    }
}

impl SignedRoot for crate::BeaconBlock {}
impl SignedRoot for crate::BeaconBlockHeader {}
impl SignedRoot for crate::AttestationData {}
impl SignedRoot for crate::VoluntaryExit {}
impl SignedRoot for crate::BlsToExecutionChange {}
impl SignedRoot for crate::Epoch {}
impl SignedRoot for crate::Hash256 {}
