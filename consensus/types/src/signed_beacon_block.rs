use crate::consts::SLOTS_PER_EPOCH;
use crate::{
    BeaconBlock, BeaconBlockHeader, Epoch, ExecutionBlockHash, Hash256,
    KzgCommitmentsInclusionProof, MerkleTreeError, SignedBeaconBlockHeader, Slot,
};
use bls::Signature;
use serde::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use tree_hash::TreeHash;
use tree_hash_derive::TreeHash;

/// A `BeaconBlock` and a signature from its proposer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode, TreeHash)]
pub struct SignedBeaconBlock {
    pub message: BeaconBlock,
    pub signature: Signature,
}

impl SignedBeaconBlock {
    pub fn from_block(block: BeaconBlock, signature: Signature) -> Self {
        Self {
            message: block,
            signature,
        }
    }

    pub fn message(&self) -> &BeaconBlock {
        &self.message
    }

    pub fn slot(&self) -> Slot {
        self.message.slot
    }

    pub fn epoch(&self) -> Epoch {
        self.slot().epoch(SLOTS_PER_EPOCH)
    }

    pub fn parent_root(&self) -> Hash256 {
        self.message.parent_root
    }

    pub fn state_root(&self) -> Hash256 {
        self.message.state_root
    }

    /// Returns the `tree_hash_root` of the block message.
    ///
    /// The signature is deliberately excluded: a block's identity is the root of its message.
    pub fn canonical_root(&self) -> Hash256 {
        self.message.canonical_root()
    }

    pub fn block_header(&self) -> BeaconBlockHeader {
        self.message.block_header()
    }

    pub fn signed_block_header(&self) -> SignedBeaconBlockHeader {
        SignedBeaconBlockHeader {
            message: self.block_header(),
            signature: self.signature,
        }
    }

    /// The number of blobs this block commits to.
    pub fn num_expected_blobs(&self) -> usize {
        self.message.body.blob_kzg_commitments.len()
    }

    /// The execution block hash of the payload carried by this block.
    pub fn execution_block_hash(&self) -> ExecutionBlockHash {
        self.message.body.execution_payload.block_hash
    }

    /// The signed header together with the commitments inclusion proof, as needed to build
    /// sidecars.
    pub fn signed_block_header_and_kzg_commitments_proof(
        &self,
    ) -> Result<(SignedBeaconBlockHeader, KzgCommitmentsInclusionProof), MerkleTreeError> {
        let header = self.signed_block_header();
        let proof = self.message.body.kzg_commitments_merkle_proof()?;
        Ok((header, proof))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ssz::{Decode, Encode};

    #[test]
    fn canonical_root_ignores_signature() {
        let block = BeaconBlock::empty();
        let signed_a = SignedBeaconBlock::from_block(block.clone(), Signature::empty());
        let signed_b = SignedBeaconBlock::from_block(block, Signature::infinity());
        assert_eq!(signed_a.canonical_root(), signed_b.canonical_root());
    }

    #[test]
    fn header_root_equals_block_root() {
        let signed = SignedBeaconBlock::from_block(BeaconBlock::empty(), Signature::empty());
        assert_eq!(
            signed.block_header().canonical_root(),
            signed.canonical_root()
        );
    }

    #[test]
    fn ssz_round_trip() {
        let signed = SignedBeaconBlock::from_block(BeaconBlock::empty(), Signature::empty());
        let bytes = signed.as_ssz_bytes();
        assert_eq!(SignedBeaconBlock::from_ssz_bytes(&bytes).unwrap(), signed);
    }
}
