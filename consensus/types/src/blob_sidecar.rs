use crate::consts::typenum_sizes::BytesPerBlob;
use crate::consts::{
    BLOB_KZG_COMMITMENTS_INDEX, KZG_COMMITMENT_INCLUSION_PROOF_DEPTH,
    KZG_COMMITMENTS_INCLUSION_PROOF_DEPTH, SLOTS_PER_EPOCH,
};
use crate::{
    Epoch, Hash256, KzgCommitmentInclusionProof, MerkleTreeError, SignedBeaconBlock,
    SignedBeaconBlockHeader, Slot,
};
use kzg::{KzgCommitment, KzgProof};
use merkle_proof::verify_merkle_proof;
use serde::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use ssz_types::FixedVector;
use std::sync::Arc;
use tree_hash::TreeHash;
use tree_hash_derive::TreeHash;

pub type Blob = FixedVector<u8, BytesPerBlob>;
pub type BlobSidecarList = Vec<Arc<BlobSidecar>>;
/// A slot of blobs indexed by blob index; `None` for blobs we have not yet received.
pub type FixedBlobSidecarList = Vec<Option<Arc<BlobSidecar>>>;

/// Unique identifier for a blob: `(block_root, index)`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode, TreeHash,
)]
pub struct BlobIdentifier {
    pub block_root: Hash256,
    #[serde(with = "serde_utils::quoted_u64")]
    pub index: u64,
}

#[derive(Debug)]
pub enum BlobSidecarError {
    IndexOutOfBounds { index: usize, commitments: usize },
    MerkleTree(MerkleTreeError),
}

impl From<MerkleTreeError> for BlobSidecarError {
    fn from(e: MerkleTreeError) -> Self {
        Self::MerkleTree(e)
    }
}

/// A blob and the proofs tying it to a specific beacon block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode, TreeHash)]
pub struct BlobSidecar {
    #[serde(with = "serde_utils::quoted_u64")]
    pub index: u64,
    #[serde(with = "ssz_types::serde_utils::hex_fixed_vec")]
    pub blob: Blob,
    pub kzg_commitment: KzgCommitment,
    pub kzg_proof: KzgProof,
    pub signed_block_header: SignedBeaconBlockHeader,
    pub kzg_commitment_inclusion_proof: KzgCommitmentInclusionProof,
}

impl BlobSidecar {
    /// Build a sidecar for blob `index` of `block`, where the KZG proof has already been
    /// produced (by the proposer, or fetched from the engine).
    pub fn new_with_existing_proof(
        index: usize,
        blob: Blob,
        block: &SignedBeaconBlock,
        signed_block_header: SignedBeaconBlockHeader,
        kzg_proof: KzgProof,
    ) -> Result<Self, BlobSidecarError> {
        let commitments = &block.message().body.blob_kzg_commitments;
        let kzg_commitment = *commitments
            .get(index)
            .ok_or(BlobSidecarError::IndexOutOfBounds {
                index,
                commitments: commitments.len(),
            })?;
        let kzg_commitment_inclusion_proof =
            block.message().body.kzg_commitment_merkle_proof(index)?;

        Ok(Self {
            index: index as u64,
            blob,
            kzg_commitment,
            kzg_proof,
            signed_block_header,
            kzg_commitment_inclusion_proof,
        })
    }

    pub fn id(&self) -> BlobIdentifier {
        BlobIdentifier {
            block_root: self.block_root(),
            index: self.index,
        }
    }

    pub fn slot(&self) -> Slot {
        self.signed_block_header.message.slot
    }

    pub fn epoch(&self) -> Epoch {
        self.slot().epoch(SLOTS_PER_EPOCH)
    }

    pub fn block_root(&self) -> Hash256 {
        self.signed_block_header.message.tree_hash_root()
    }

    pub fn block_parent_root(&self) -> Hash256 {
        self.signed_block_header.message.parent_root
    }

    pub fn block_proposer_index(&self) -> u64 {
        self.signed_block_header.message.proposer_index
    }

    /// The generalized index of this sidecar's commitment within the block body.
    fn kzg_commitment_inclusion_proof_index(&self) -> usize {
        (BLOB_KZG_COMMITMENTS_INDEX
            << (KZG_COMMITMENT_INCLUSION_PROOF_DEPTH - KZG_COMMITMENTS_INCLUSION_PROOF_DEPTH))
            | self.index as usize
    }

    /// Verifies the Merkle proof of the commitment's inclusion in the block body.
    pub fn verify_blob_sidecar_inclusion_proof(&self) -> bool {
        verify_merkle_proof(
            self.kzg_commitment.tree_hash_root(),
            &self.kzg_commitment_inclusion_proof,
            KZG_COMMITMENT_INCLUSION_PROOF_DEPTH,
            self.kzg_commitment_inclusion_proof_index(),
            self.signed_block_header.message.body_root,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BeaconBlock;
    use bls::Signature;
    use ssz::{Decode, Encode};
    use ssz_types::VariableList;

    #[test]
    fn sidecar_round_trip_and_inclusion_proof() {
        let mut block = BeaconBlock::empty();
        block.body.blob_kzg_commitments =
            VariableList::from(vec![KzgCommitment::empty(), KzgCommitment([3; 48])]);
        let signed = SignedBeaconBlock::from_block(block, Signature::empty());
        let header = signed.signed_block_header();

        for index in 0..2usize {
            let sidecar = BlobSidecar::new_with_existing_proof(
                index,
                Blob::default(),
                &signed,
                header.clone(),
                KzgProof::empty(),
            )
            .unwrap();

            assert_eq!(sidecar.block_root(), signed.canonical_root());
            assert!(sidecar.verify_blob_sidecar_inclusion_proof());

            let bytes = sidecar.as_ssz_bytes();
            assert_eq!(BlobSidecar::from_ssz_bytes(&bytes).unwrap(), sidecar);
        }
    }

    #[test]
    fn tampered_proof_fails() {
        let mut block = BeaconBlock::empty();
        block.body.blob_kzg_commitments = VariableList::from(vec![KzgCommitment::empty()]);
        let signed = SignedBeaconBlock::from_block(block, Signature::empty());
        let header = signed.signed_block_header();

        let mut sidecar = BlobSidecar::new_with_existing_proof(
            0,
            Blob::default(),
            &signed,
            header,
            KzgProof::empty(),
        )
        .unwrap();
        sidecar.kzg_commitment = KzgCommitment([9; 48]);
        assert!(!sidecar.verify_blob_sidecar_inclusion_proof());
    }
}
