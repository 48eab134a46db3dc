use crate::consts::typenum_sizes::{
    MaxAttestations, MaxAttesterSlashings, MaxBlobCommitmentsPerBlock, MaxBlsToExecutionChanges,
    MaxProposerSlashings, MaxVoluntaryExits,
};
use crate::consts::{
    BLOB_KZG_COMMITMENTS_INDEX, KZG_COMMITMENT_INCLUSION_PROOF_DEPTH,
    KZG_COMMITMENTS_INCLUSION_PROOF_DEPTH,
};
use crate::{
    Attestation, AttesterSlashing, Deposit, Eth1Data, ExecutionPayload, Hash256, ProposerSlashing,
    SignedBlsToExecutionChange, SignedVoluntaryExit, SyncAggregate,
};
use bls::Signature;
use kzg::KzgCommitment;
use merkle_proof::MerkleTreeError;
use serde::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use ssz_types::VariableList;
use ssz_types::typenum::U16;
use tree_hash::TreeHash;
use tree_hash_derive::TreeHash;

pub type KzgCommitments = VariableList<KzgCommitment, MaxBlobCommitmentsPerBlock>;
pub type KzgCommitmentsInclusionProof =
    ssz_types::FixedVector<Hash256, crate::consts::typenum_sizes::KzgCommitmentsInclusionProofDepth>;
pub type KzgCommitmentInclusionProof =
    ssz_types::FixedVector<Hash256, crate::consts::typenum_sizes::KzgCommitmentInclusionProofDepth>;
pub type Graffiti = Hash256;

/// The body of a `BeaconBlock`.
///
/// The field order is consensus-critical: `blob_kzg_commitments` must stay at generalized
/// index `BLOB_KZG_COMMITMENTS_INDEX` for sidecar inclusion proofs to verify.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode, TreeHash)]
pub struct BeaconBlockBody {
    pub randao_reveal: Signature,
    pub eth1_data: Eth1Data,
    pub graffiti: Graffiti,
    pub proposer_slashings: VariableList<ProposerSlashing, MaxProposerSlashings>,
    pub attester_slashings: VariableList<AttesterSlashing, MaxAttesterSlashings>,
    pub attestations: VariableList<Attestation, MaxAttestations>,
    pub deposits: VariableList<Deposit, U16>,
    pub voluntary_exits: VariableList<SignedVoluntaryExit, MaxVoluntaryExits>,
    pub sync_aggregate: SyncAggregate,
    pub execution_payload: ExecutionPayload,
    pub bls_to_execution_changes: VariableList<SignedBlsToExecutionChange, MaxBlsToExecutionChanges>,
    pub blob_kzg_commitments: KzgCommitments,
}

impl BeaconBlockBody {
    pub fn empty() -> Self {
        Self {
            randao_reveal: Signature::empty(),
            eth1_data: Eth1Data::default(),
            graffiti: Graffiti::default(),
            proposer_slashings: VariableList::empty(),
            attester_slashings: VariableList::empty(),
            attestations: VariableList::empty(),
            deposits: VariableList::empty(),
            voluntary_exits: VariableList::empty(),
            sync_aggregate: SyncAggregate::new(),
            execution_payload: ExecutionPayload::default(),
            bls_to_execution_changes: VariableList::empty(),
            blob_kzg_commitments: VariableList::empty(),
        }
    }

    /// The `tree_hash_root`s of each field, in order. These are the leaves of the body's
    /// Merkle tree.
    fn field_roots(&self) -> Vec<Hash256> {
        vec![
            self.randao_reveal.tree_hash_root(),
            self.eth1_data.tree_hash_root(),
            self.graffiti.tree_hash_root(),
            self.proposer_slashings.tree_hash_root(),
            self.attester_slashings.tree_hash_root(),
            self.attestations.tree_hash_root(),
            self.deposits.tree_hash_root(),
            self.voluntary_exits.tree_hash_root(),
            self.sync_aggregate.tree_hash_root(),
            self.execution_payload.tree_hash_root(),
            self.bls_to_execution_changes.tree_hash_root(),
            self.blob_kzg_commitments.tree_hash_root(),
        ]
    }

    /// Produce the Merkle proof of the `blob_kzg_commitments` list root within this body, for
    /// inclusion in data-column sidecars.
    pub fn kzg_commitments_merkle_proof(
        &self,
    ) -> Result<KzgCommitmentsInclusionProof, MerkleTreeError> {
        let proof = merkle_proof::merkle_proof_from_leaves(
            &self.field_roots(),
            KZG_COMMITMENTS_INCLUSION_PROOF_DEPTH,
            BLOB_KZG_COMMITMENTS_INDEX,
        )?;
        Ok(KzgCommitmentsInclusionProof::from(proof))
    }

    /// Produce the Merkle proof of the single commitment at `index` within this body, for
    /// inclusion in blob sidecars.
    ///
    /// The proof is the commitment's path through the commitments list (12 levels), the list's
    /// length mix-in (1 level) and finally the body fields (4 levels).
    pub fn kzg_commitment_merkle_proof(
        &self,
        index: usize,
    ) -> Result<KzgCommitmentInclusionProof, MerkleTreeError> {
        let leaves = self
            .blob_kzg_commitments
            .iter()
            .map(|commitment| commitment.tree_hash_root())
            .collect::<Vec<_>>();
        let mut proof = merkle_proof::merkle_proof_from_leaves(
            &leaves,
            KZG_COMMITMENT_INCLUSION_PROOF_DEPTH - KZG_COMMITMENTS_INCLUSION_PROOF_DEPTH - 1,
            index,
        )?;

        // The mix-in sibling: the list length as a little-endian chunk.
        let mut length_chunk = [0u8; 32];
        length_chunk[..8].copy_from_slice(&(self.blob_kzg_commitments.len() as u64).to_le_bytes());
        proof.push(Hash256::from(length_chunk));

        proof.extend(
            merkle_proof::merkle_proof_from_leaves(
                &self.field_roots(),
                KZG_COMMITMENTS_INCLUSION_PROOF_DEPTH,
                BLOB_KZG_COMMITMENTS_INDEX,
            )?
            .into_iter(),
        );
        Ok(KzgCommitmentInclusionProof::from(proof))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use merkle_proof::verify_merkle_proof;

    #[test]
    fn kzg_commitments_proof_verifies_against_body_root() {
        let mut body = BeaconBlockBody::empty();
        body.blob_kzg_commitments = VariableList::from(vec![KzgCommitment::empty()]);

        let proof = body.kzg_commitments_merkle_proof().unwrap();
        assert!(verify_merkle_proof(
            body.blob_kzg_commitments.tree_hash_root(),
            &proof,
            KZG_COMMITMENTS_INCLUSION_PROOF_DEPTH,
            BLOB_KZG_COMMITMENTS_INDEX,
            body.tree_hash_root(),
        ));
    }

    #[test]
    fn single_commitment_proof_verifies_against_body_root() {
        let mut body = BeaconBlockBody::empty();
        body.blob_kzg_commitments =
            VariableList::from(vec![KzgCommitment::empty(), KzgCommitment([1; 48])]);

        for index in 0..2usize {
            let proof = body.kzg_commitment_merkle_proof(index).unwrap();
            let gindex = (BLOB_KZG_COMMITMENTS_INDEX
                << (KZG_COMMITMENT_INCLUSION_PROOF_DEPTH - KZG_COMMITMENTS_INCLUSION_PROOF_DEPTH))
                | index;
            assert!(verify_merkle_proof(
                body.blob_kzg_commitments[index].tree_hash_root(),
                &proof,
                KZG_COMMITMENT_INCLUSION_PROOF_DEPTH,
                gindex,
                body.tree_hash_root(),
            ));
        }
    }
}
