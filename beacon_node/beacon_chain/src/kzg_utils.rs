//! Thin wrappers coupling the KZG backend to the sidecar container types.

use kzg::{CELLS_PER_EXT_BLOB, CellRef, Kzg, KzgProof};
use ssz_types::VariableList;
use std::sync::Arc;
use types::{
    Blob, BlobSidecar, Cell, ChainSpec, DataColumn, DataColumnSidecar, DataColumnSidecarError,
    DataColumnSidecarList, KzgCommitment, SignedBeaconBlock,
};

/// Validate a single blob-commitment-proof triplet from a `BlobSidecar`.
pub fn validate_blob(
    kzg: &Kzg,
    blob: &Blob,
    kzg_commitment: KzgCommitment,
    kzg_proof: KzgProof,
) -> Result<(), kzg::Error> {
    kzg.verify_blob_kzg_proof(&blob[..], kzg_commitment, kzg_proof)
}

/// Validate a batch of blob sidecars in a single pairing.
pub fn validate_blobs(kzg: &Kzg, blobs: &[Arc<BlobSidecar>]) -> Result<(), kzg::Error> {
    let blob_refs = blobs.iter().map(|b| &b.blob[..]).collect::<Vec<_>>();
    let commitments = blobs.iter().map(|b| b.kzg_commitment).collect::<Vec<_>>();
    let proofs = blobs.iter().map(|b| b.kzg_proof).collect::<Vec<_>>();
    kzg.verify_blob_kzg_proof_batch(&blob_refs, &commitments, &proofs)
}

/// Validate the cells of a list of data-column sidecars in a single batch.
pub fn validate_data_columns(
    kzg: &Kzg,
    data_columns: &[Arc<DataColumnSidecar>],
) -> Result<(), kzg::Error> {
    let mut cells: Vec<CellRef> = Vec::new();
    let mut proofs: Vec<KzgProof> = Vec::new();
    let mut cell_indices: Vec<u64> = Vec::new();
    let mut commitments: Vec<KzgCommitment> = Vec::new();

    for column in data_columns {
        for (row, cell) in column.column.iter().enumerate() {
            let cell_bytes: CellRef = (&cell[..])
                .try_into()
                .map_err(|_| kzg::Error::InvalidLength("cell length".to_string()))?;
            cells.push(cell_bytes);
            proofs.push(*column.kzg_proofs.get(row).ok_or_else(|| {
                kzg::Error::InconsistentArrayLength("missing cell proof".to_string())
            })?);
            cell_indices.push(column.index);
            commitments.push(*column.kzg_commitments.get(row).ok_or_else(|| {
                kzg::Error::InconsistentArrayLength("missing commitment".to_string())
            })?);
        }
    }

    kzg.verify_cell_proof_batch(&cells, &proofs, &cell_indices, &commitments)
}

/// Build the full set of data-column sidecars from a block's blobs and cell proofs.
///
/// `cell_proofs` is the flattened list of `CELLS_PER_EXT_BLOB` proofs per blob, as returned by
/// `engine_getBlobsV2` or computed locally by the proposer.
pub fn blobs_to_data_column_sidecars(
    blobs: &[&Blob],
    cell_proofs: Vec<KzgProof>,
    block: &SignedBeaconBlock,
    kzg: &Kzg,
    spec: &ChainSpec,
) -> Result<DataColumnSidecarList, DataColumnSidecarError> {
    if blobs.is_empty() {
        return Ok(vec![]);
    }
    if cell_proofs.len() != blobs.len() * CELLS_PER_EXT_BLOB {
        return Err(DataColumnSidecarError::BuildSidecarFailed(format!(
            "expected {} cell proofs, got {}",
            blobs.len() * CELLS_PER_EXT_BLOB,
            cell_proofs.len()
        )));
    }

    let kzg_commitments = &block.message().body.blob_kzg_commitments;
    let (signed_block_header, kzg_commitments_inclusion_proof) = block
        .signed_block_header_and_kzg_commitments_proof()
        .map_err(|e| DataColumnSidecarError::BuildSidecarFailed(format!("{e:?}")))?;

    // Compute the cells of each blob's extended polynomial.
    let mut rows_of_cells = Vec::with_capacity(blobs.len());
    for blob in blobs {
        let (cells, _proofs) = kzg.compute_cells_and_proofs(&blob[..])?;
        rows_of_cells.push(cells);
    }

    // Transpose rows into columns.
    let number_of_columns = spec.number_of_columns as usize;
    let mut sidecars = Vec::with_capacity(number_of_columns);
    for column_index in 0..number_of_columns {
        let column_cells: Vec<Cell> = rows_of_cells
            .iter()
            .map(|row| Cell::from(row[column_index].to_vec()))
            .collect();
        let column_proofs: Vec<KzgProof> = (0..blobs.len())
            .map(|row| cell_proofs[row * CELLS_PER_EXT_BLOB + column_index])
            .collect();

        sidecars.push(Arc::new(DataColumnSidecar {
            index: column_index as u64,
            column: DataColumn::from(column_cells),
            kzg_commitments: kzg_commitments.clone(),
            kzg_proofs: VariableList::from(column_proofs),
            signed_block_header: signed_block_header.clone(),
            kzg_commitments_inclusion_proof: kzg_commitments_inclusion_proof.clone(),
        }));
    }

    Ok(sidecars)
}

/// Recover the full set of column sidecars from at least half of them.
///
/// The metadata (header, commitments, inclusion proof) is cloned from one of the available
/// sidecars.
pub fn reconstruct_data_columns(
    kzg: &Kzg,
    available_columns: &[Arc<DataColumnSidecar>],
    spec: &ChainSpec,
) -> Result<DataColumnSidecarList, DataColumnSidecarError> {
    let template = available_columns
        .first()
        .ok_or(DataColumnSidecarError::MissingBlock)?;
    let num_rows = template.column.len();
    let number_of_columns = spec.number_of_columns as usize;

    // Recover each blob row independently.
    let mut recovered_rows_cells: Vec<Vec<kzg::Cell>> = Vec::with_capacity(num_rows);
    let mut recovered_rows_proofs: Vec<Vec<KzgProof>> = Vec::with_capacity(num_rows);
    for row in 0..num_rows {
        let mut cell_indices = Vec::with_capacity(available_columns.len());
        let mut cells: Vec<CellRef> = Vec::with_capacity(available_columns.len());
        for column in available_columns {
            let cell = column
                .column
                .get(row)
                .ok_or(DataColumnSidecarError::MissingBlock)?;
            cells.push((&cell[..]).try_into().map_err(|_| {
                DataColumnSidecarError::BuildSidecarFailed("invalid cell length".to_string())
            })?);
            cell_indices.push(column.index);
        }
        let (row_cells, row_proofs) = kzg.recover_cells_and_compute_kzg_proofs(&cell_indices, &cells)?;
        recovered_rows_cells.push(row_cells);
        recovered_rows_proofs.push(row_proofs);
    }

    let mut sidecars = Vec::with_capacity(number_of_columns);
    for column_index in 0..number_of_columns {
        let column_cells: Vec<Cell> = recovered_rows_cells
            .iter()
            .map(|row| Cell::from(row[column_index].to_vec()))
            .collect();
        let column_proofs: Vec<KzgProof> = recovered_rows_proofs
            .iter()
            .map(|row| row[column_index])
            .collect();

        sidecars.push(Arc::new(template.with_column(
            column_index as u64,
            DataColumn::from(column_cells),
            VariableList::from(column_proofs),
        )));
    }

    Ok(sidecars)
}
