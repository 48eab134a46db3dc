use crate::consts::typenum_sizes::{BytesPerCell, MaxBlobCommitmentsPerBlock, NumberOfColumns};
use crate::consts::{
    BLOB_KZG_COMMITMENTS_INDEX, KZG_COMMITMENTS_INCLUSION_PROOF_DEPTH, NUMBER_OF_COLUMNS,
    SLOTS_PER_EPOCH,
};
use crate::{
    Epoch, Hash256, KzgCommitments, KzgCommitmentsInclusionProof, SignedBeaconBlockHeader, Slot,
};
use kzg::KzgProof;
use merkle_proof::verify_merkle_proof;
use serde::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use ssz_types::{FixedVector, VariableList};
use std::sync::Arc;
use tree_hash::TreeHash;
use tree_hash_derive::TreeHash;

pub type ColumnIndex = u64;
pub type Cell = FixedVector<u8, BytesPerCell>;
pub type DataColumn = VariableList<Cell, MaxBlobCommitmentsPerBlock>;
pub type DataColumnSidecarList = Vec<Arc<DataColumnSidecar>>;

/// Unique identifier for a data column: `(block_root, index)`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode, TreeHash,
)]
pub struct DataColumnIdentifier {
    pub block_root: Hash256,
    #[serde(with = "serde_utils::quoted_u64")]
    pub index: ColumnIndex,
}

/// Identifies a set of data columns associated with a specific beacon block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode, TreeHash)]
pub struct DataColumnsByRootIdentifier {
    pub block_root: Hash256,
    pub columns: VariableList<ColumnIndex, NumberOfColumns>,
}

/// A single column of the extended blob matrix, sampled for data availability from Fulu
/// onwards.
///
/// The sidecar carries one cell per blob, the full commitment list of the block and a proof of
/// that list's inclusion in the block body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode, TreeHash)]
pub struct DataColumnSidecar {
    #[serde(with = "serde_utils::quoted_u64")]
    pub index: ColumnIndex,
    #[serde(with = "ssz_types::serde_utils::list_of_hex_fixed_vec")]
    pub column: DataColumn,
    /// All the KZG commitments associated with the block, used for verifying sample cells.
    pub kzg_commitments: KzgCommitments,
    pub kzg_proofs: VariableList<KzgProof, MaxBlobCommitmentsPerBlock>,
    pub signed_block_header: SignedBeaconBlockHeader,
    /// An inclusion proof, proving the inclusion of `blob_kzg_commitments` in the block body.
    pub kzg_commitments_inclusion_proof: KzgCommitmentsInclusionProof,
}

#[derive(Debug)]
pub enum DataColumnSidecarError {
    ColumnIndexOutOfBounds { index: ColumnIndex },
    InconsistentLengths { cells: usize, commitments: usize, proofs: usize },
    KzgError(kzg::Error),
    MissingBlock,
    BuildSidecarFailed(String),
}

impl From<kzg::Error> for DataColumnSidecarError {
    fn from(e: kzg::Error) -> Self {
        Self::KzgError(e)
    }
}

impl DataColumnSidecar {
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

    pub fn id(&self) -> DataColumnIdentifier {
        DataColumnIdentifier {
            block_root: self.block_root(),
            index: self.index,
        }
    }

    /// Structural validity: index bound and internal length agreement.
    pub fn validate_structure(&self) -> Result<(), DataColumnSidecarError> {
        if self.index >= NUMBER_OF_COLUMNS {
            return Err(DataColumnSidecarError::ColumnIndexOutOfBounds { index: self.index });
        }
        if self.column.len() != self.kzg_commitments.len()
            || self.column.len() != self.kzg_proofs.len()
        {
            return Err(DataColumnSidecarError::InconsistentLengths {
                cells: self.column.len(),
                commitments: self.kzg_commitments.len(),
                proofs: self.kzg_proofs.len(),
            });
        }
        Ok(())
    }

    /// Verifies the kzg commitments inclusion merkle proof.
    pub fn verify_inclusion_proof(&self) -> bool {
        verify_merkle_proof(
            self.kzg_commitments.tree_hash_root(),
            &self.kzg_commitments_inclusion_proof,
            KZG_COMMITMENTS_INCLUSION_PROOF_DEPTH,
            BLOB_KZG_COMMITMENTS_INDEX,
            self.signed_block_header.message.body_root,
        )
    }

    /// Clone the block metadata of an existing sidecar, replacing the column payload.
    ///
    /// Used when constructing sidecars from engine blobs without the full block at hand.
    pub fn with_column(
        &self,
        index: ColumnIndex,
        column: DataColumn,
        kzg_proofs: VariableList<KzgProof, MaxBlobCommitmentsPerBlock>,
    ) -> Self {
        Self {
            index,
            column,
            kzg_commitments: self.kzg_commitments.clone(),
            kzg_proofs,
            signed_block_header: self.signed_block_header.clone(),
            kzg_commitments_inclusion_proof: self.kzg_commitments_inclusion_proof.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BeaconBlock, SignedBeaconBlock};
    use bls::Signature;
    use kzg::KzgCommitment;
    use ssz::{Decode, Encode};

    fn sidecar_for_block(commitment_count: usize, index: ColumnIndex) -> DataColumnSidecar {
        let mut block = BeaconBlock::empty();
        block.body.blob_kzg_commitments =
            VariableList::from(vec![KzgCommitment::empty(); commitment_count]);
        let signed = SignedBeaconBlock::from_block(block, Signature::empty());
        let (header, proof) = signed
            .signed_block_header_and_kzg_commitments_proof()
            .unwrap();

        DataColumnSidecar {
            index,
            column: VariableList::from(vec![Cell::default(); commitment_count]),
            kzg_commitments: signed.message().body.blob_kzg_commitments.clone(),
            kzg_proofs: VariableList::from(vec![KzgProof::empty(); commitment_count]),
            signed_block_header: header,
            kzg_commitments_inclusion_proof: proof,
        }
    }

    #[test]
    fn structure_and_inclusion_proof() {
        let sidecar = sidecar_for_block(2, 5);
        sidecar.validate_structure().unwrap();
        assert!(sidecar.verify_inclusion_proof());
    }

    #[test]
    fn out_of_bounds_index_is_rejected() {
        let sidecar = sidecar_for_block(1, NUMBER_OF_COLUMNS);
        assert!(matches!(
            sidecar.validate_structure(),
            Err(DataColumnSidecarError::ColumnIndexOutOfBounds { .. })
        ));
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let mut sidecar = sidecar_for_block(2, 0);
        sidecar.kzg_proofs = VariableList::from(vec![KzgProof::empty()]);
        assert!(matches!(
            sidecar.validate_structure(),
            Err(DataColumnSidecarError::InconsistentLengths { .. })
        ));
    }

    #[test]
    fn ssz_round_trip() {
        let sidecar = sidecar_for_block(1, 3);
        let bytes = sidecar.as_ssz_bytes();
        assert_eq!(DataColumnSidecar::from_ssz_bytes(&bytes).unwrap(), sidecar);
    }
}
