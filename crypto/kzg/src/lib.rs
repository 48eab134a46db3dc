//! An immutable, thread-safe handle over the KZG backends: `c-kzg` for blob proofs and
//! `rust_eth_kzg` for PeerDAS cell operations.
//!
//! The handle is built once at process start and never mutated afterwards; every component that
//! needs commitment math shares it behind an `Arc`.

mod types;

pub use types::{KzgCommitment, KzgProof, VERSIONED_HASH_VERSION_KZG};

use c_kzg::KzgSettings;
use rust_eth_kzg::{DASContext, TrustedSetup, UsePrecomp};
use std::fmt::Debug;

/// The number of bytes in a single blob.
pub const BYTES_PER_BLOB: usize = c_kzg::BYTES_PER_BLOB;
/// The number of bytes in a single PeerDAS cell.
pub const BYTES_PER_CELL: usize = 2048;
/// Cells per extended blob: twice the number of field elements after extension, grouped.
pub const CELLS_PER_EXT_BLOB: usize = 128;

pub type Cell = Box<[u8; BYTES_PER_CELL]>;
pub type CellRef<'a> = &'a [u8; BYTES_PER_CELL];
pub type CellsAndKzgProofs = (Vec<Cell>, Vec<KzgProof>);

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// An error raised by the `c-kzg` backend.
    Kzg(String),
    /// An error raised by the `rust_eth_kzg` (PeerDAS) backend.
    PeerDasKzg(String),
    /// A blob or cell had an unexpected byte length.
    InvalidLength(String),
    /// The proof or commitment failed verification.
    KzgVerificationFailed,
    /// Number of cells and proofs did not match.
    InconsistentArrayLength(String),
}

impl From<c_kzg::Error> for Error {
    fn from(e: c_kzg::Error) -> Self {
        Error::Kzg(format!("{e:?}"))
    }
}

/// The KZG context handle.
pub struct Kzg {
    trusted_setup: &'static KzgSettings,
    context: DASContext,
}

impl Debug for Kzg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Kzg")
    }
}

impl Default for Kzg {
    fn default() -> Self {
        Self::new()
    }
}

impl Kzg {
    /// Build a context from the Ethereum mainnet trusted setup embedded in the backends.
    pub fn new() -> Self {
        Self {
            trusted_setup: c_kzg::ethereum_kzg_settings(0),
            context: DASContext::new(&TrustedSetup::default(), UsePrecomp::No),
        }
    }

    fn context(&self) -> &DASContext {
        &self.context
    }

    /// Compute the kzg commitment for a given blob.
    pub fn blob_to_kzg_commitment(&self, blob: &[u8]) -> Result<KzgCommitment, Error> {
        let blob = c_kzg::Blob::from_bytes(blob)?;
        let commitment = self.trusted_setup.blob_to_kzg_commitment(&blob)?;
        Ok(KzgCommitment(commitment.to_bytes().into_inner()))
    }

    /// Compute the kzg proof for a given blob and its kzg commitment.
    pub fn compute_blob_kzg_proof(
        &self,
        blob: &[u8],
        kzg_commitment: KzgCommitment,
    ) -> Result<KzgProof, Error> {
        let blob = c_kzg::Blob::from_bytes(blob)?;
        let proof = self
            .trusted_setup
            .compute_blob_kzg_proof(&blob, &kzg_commitment.into())?;
        Ok(KzgProof(proof.to_bytes().into_inner()))
    }

    /// Verify a kzg proof for the given blob and commitment.
    pub fn verify_blob_kzg_proof(
        &self,
        blob: &[u8],
        kzg_commitment: KzgCommitment,
        kzg_proof: KzgProof,
    ) -> Result<(), Error> {
        let blob = c_kzg::Blob::from_bytes(blob)?;
        if self.trusted_setup.verify_blob_kzg_proof(
            &blob,
            &kzg_commitment.into(),
            &kzg_proof.into(),
        )? {
            Ok(())
        } else {
            Err(Error::KzgVerificationFailed)
        }
    }

    /// Verify a batch of blob-commitment-proof triplets.
    pub fn verify_blob_kzg_proof_batch(
        &self,
        blobs: &[&[u8]],
        kzg_commitments: &[KzgCommitment],
        kzg_proofs: &[KzgProof],
    ) -> Result<(), Error> {
        if blobs.len() != kzg_commitments.len() || blobs.len() != kzg_proofs.len() {
            return Err(Error::InconsistentArrayLength(format!(
                "blobs: {}, commitments: {}, proofs: {}",
                blobs.len(),
                kzg_commitments.len(),
                kzg_proofs.len()
            )));
        }
        let blobs = blobs
            .iter()
            .map(|blob| c_kzg::Blob::from_bytes(blob))
            .collect::<Result<Vec<_>, _>>()?;
        let commitments = kzg_commitments
            .iter()
            .map(|&c| c.into())
            .collect::<Vec<c_kzg::Bytes48>>();
        let proofs = kzg_proofs
            .iter()
            .map(|&p| p.into())
            .collect::<Vec<c_kzg::Bytes48>>();

        if self
            .trusted_setup
            .verify_blob_kzg_proof_batch(&blobs, &commitments, &proofs)?
        {
            Ok(())
        } else {
            Err(Error::KzgVerificationFailed)
        }
    }

    /// Compute the extended cells and cell proofs for a blob.
    pub fn compute_cells_and_proofs(&self, blob: &[u8]) -> Result<CellsAndKzgProofs, Error> {
        let blob: &[u8; BYTES_PER_BLOB] = blob
            .try_into()
            .map_err(|_| Error::InvalidLength(format!("blob length {}", blob.len())))?;
        let (cells, proofs) = self
            .context()
            .compute_cells_and_kzg_proofs(blob)
            .map_err(|e| Error::PeerDasKzg(format!("{e:?}")))?;
        Ok((
            cells.into_iter().collect(),
            proofs.iter().map(|p| KzgProof(*p)).collect(),
        ))
    }

    /// Verify a batch of cells against their commitments and proofs.
    pub fn verify_cell_proof_batch(
        &self,
        cells: &[CellRef<'_>],
        kzg_proofs: &[KzgProof],
        cell_indices: &[u64],
        kzg_commitments: &[KzgCommitment],
    ) -> Result<(), Error> {
        let proofs = kzg_proofs.iter().map(|p| &p.0).collect::<Vec<_>>();
        let commitments = kzg_commitments.iter().map(|c| &c.0).collect::<Vec<_>>();
        self.context()
            .verify_cell_kzg_proof_batch(
                commitments,
                cell_indices,
                cells.to_vec(),
                proofs,
            )
            .map_err(|e| Error::PeerDasKzg(format!("{e:?}")))
    }

    /// Recover all cells and proofs of an extended blob from at least half of its cells.
    pub fn recover_cells_and_compute_kzg_proofs(
        &self,
        cell_indices: &[u64],
        cells: &[CellRef<'_>],
    ) -> Result<CellsAndKzgProofs, Error> {
        let (cells, proofs) = self
            .context()
            .recover_cells_and_kzg_proofs(cell_indices.to_vec(), cells.to_vec())
            .map_err(|e| Error::PeerDasKzg(format!("{e:?}")))?;
        Ok((
            cells.into_iter().collect(),
            proofs.iter().map(|p| KzgProof(*p)).collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_commitment_proof_round_trip() {
        let kzg = Kzg::new();
        // A blob of zeroes is a valid polynomial.
        let blob = vec![0u8; BYTES_PER_BLOB];
        let commitment = kzg.blob_to_kzg_commitment(&blob).unwrap();
        let proof = kzg.compute_blob_kzg_proof(&blob, commitment).unwrap();
        kzg.verify_blob_kzg_proof(&blob, commitment, proof).unwrap();
        kzg.verify_blob_kzg_proof_batch(&[&blob], &[commitment], &[proof])
            .unwrap();
    }

    #[test]
    fn cells_round_trip_through_recovery() {
        let kzg = Kzg::new();
        let blob = vec![0u8; BYTES_PER_BLOB];
        let (cells, proofs) = kzg.compute_cells_and_proofs(&blob).unwrap();
        assert_eq!(cells.len(), CELLS_PER_EXT_BLOB);
        assert_eq!(proofs.len(), CELLS_PER_EXT_BLOB);

        // Recover from the first half of the cells.
        let half = CELLS_PER_EXT_BLOB / 2;
        let indices: Vec<u64> = (0..half as u64).collect();
        let cell_refs: Vec<CellRef> = cells.iter().take(half).map(|c| c.as_ref()).collect();
        let (recovered, _) = kzg
            .recover_cells_and_compute_kzg_proofs(&indices, &cell_refs)
            .unwrap();
        assert_eq!(recovered.len(), CELLS_PER_EXT_BLOB);
        assert_eq!(recovered[half], cells[half]);
    }
}
