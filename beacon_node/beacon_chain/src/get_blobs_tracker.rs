//! Deduplicated fetching of blobs from the execution engine.
//!
//! If a blob has already been seen in the public mempool it is often unnecessary to wait for
//! it to arrive on gossip: `engine_getBlobsV1`/`V2` load it straight from the EL's blob pool.
//! At most one fetch is in flight per block root, and V2 responses are written through a small
//! pool of preallocated buffers.

use crate::block_input::BlockInput;
use crate::errors::BeaconChainError;
use crate::events::{ChainEventHandler, EventKind};
use crate::kzg_utils::{blobs_to_data_column_sidecars, validate_blobs};
use crate::metrics;
use execution_layer::{BlobAndProofV2, EngineApi};
use kzg::{BYTES_PER_BLOB, CELLS_PER_EXT_BLOB, Kzg};
use parking_lot::Mutex;
use state_processing::per_block_processing::kzg_commitment_to_versioned_hash;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;
use types::{
    BlobSidecar, ChainSpec, ColumnIndex, Hash256, KzgProof, SignedBeaconBlock, VersionedHash,
};

/// Serialized size of one `BlobAndProofV2` RPC entry: the blob plus its cell proofs, with some
/// slack for JSON framing.
pub const BLOB_AND_PROOF_V2_RPC_BYTES: usize = BYTES_PER_BLOB + CELLS_PER_EXT_BLOB * 48 + 1024;

/// The number of preallocated response buffers. Concurrent fetches beyond this allocate
/// transiently.
const BLOBS_AND_PROOFS_BUFFER_COUNT: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetBlobsOutcome {
    /// The input was already fully available; no engine call was made.
    NotAttemptedFull,
    /// The block has no blob commitments; nothing to fetch.
    NotAttemptedNoBlobs,
    /// The engine had none (V1) or not all (V2) of the requested blobs.
    NullResponse,
    /// The engine data completed the input's availability.
    SuccessResolved,
    /// The engine data was added, but gossip had already resolved the input.
    SuccessLate,
    /// The fetch or verification failed.
    Failed,
}

struct BlobBuffer {
    buffer: Vec<u8>,
    in_use: bool,
}

/// Deduplicates engine `getBlobs` calls per block root.
pub struct GetBlobsTracker {
    engine: Arc<dyn EngineApi>,
    kzg: Arc<Kzg>,
    spec: Arc<ChainSpec>,
    events: Arc<ChainEventHandler>,
    active_reconstructions: Mutex<HashSet<Hash256>>,
    blobs_and_proofs_buffers: Mutex<Vec<BlobBuffer>>,
}

impl GetBlobsTracker {
    pub fn new(
        engine: Arc<dyn EngineApi>,
        kzg: Arc<Kzg>,
        spec: Arc<ChainSpec>,
        events: Arc<ChainEventHandler>,
    ) -> Self {
        let buffers = (0..BLOBS_AND_PROOFS_BUFFER_COUNT)
            .map(|_| BlobBuffer {
                buffer: Vec::new(),
                in_use: false,
            })
            .collect();
        Self {
            engine,
            kzg,
            spec,
            events,
            active_reconstructions: Mutex::new(HashSet::new()),
            blobs_and_proofs_buffers: Mutex::new(buffers),
        }
    }

    /// Acquire a free buffer slot, sized for `max_blobs` V2 entries. Returns the slot index.
    fn acquire_buffer(&self, max_blobs: usize) -> Option<usize> {
        let mut buffers = self.blobs_and_proofs_buffers.lock();
        let slot = buffers.iter().position(|b| !b.in_use)?;
        let buffer = &mut buffers[slot];
        buffer.in_use = true;
        buffer.buffer.resize(max_blobs * BLOB_AND_PROOF_V2_RPC_BYTES, 0);
        Some(slot)
    }

    /// Release a buffer slot regardless of call outcome.
    fn release_buffer(&self, slot: Option<usize>) {
        if let Some(slot) = slot
            && let Some(buffer) = self.blobs_and_proofs_buffers.lock().get_mut(slot)
        {
            buffer.in_use = false;
        }
    }

    /// Fetch the missing blobs or columns of `block_input` from the engine.
    ///
    /// Returns immediately when a fetch for this root is already in flight.
    pub async fn trigger_get_blobs(
        &self,
        block_input: Arc<BlockInput>,
        sampled_columns: Vec<ColumnIndex>,
    ) -> Result<GetBlobsOutcome, BeaconChainError> {
        let block_root = block_input.block_root();

        // Single-in-flight discipline per block root.
        if !self.active_reconstructions.lock().insert(block_root) {
            return Ok(GetBlobsOutcome::NotAttemptedFull);
        }
        let result = self.get_blobs_inner(block_input, sampled_columns).await;
        self.active_reconstructions.lock().remove(&block_root);

        if matches!(result, Err(_) | Ok(GetBlobsOutcome::Failed)) {
            metrics::inc_counter(&metrics::BLOBS_FROM_EL_ERROR_TOTAL);
        }
        result
    }

    async fn get_blobs_inner(
        &self,
        block_input: Arc<BlockInput>,
        sampled_columns: Vec<ColumnIndex>,
    ) -> Result<GetBlobsOutcome, BeaconChainError> {
        if block_input.is_available() {
            return Ok(GetBlobsOutcome::NotAttemptedFull);
        }

        let block = block_input.block().clone();
        let commitments = &block.message().body.blob_kzg_commitments;
        if commitments.is_empty() {
            return Ok(GetBlobsOutcome::NotAttemptedNoBlobs);
        }
        let versioned_hashes: Vec<VersionedHash> = commitments
            .iter()
            .map(kzg_commitment_to_versioned_hash)
            .collect();

        debug!(
            num_expected_blobs = versioned_hashes.len(),
            block_root = ?block_input.block_root(),
            "Fetching blobs from the EL"
        );

        if self.spec.is_peer_das_enabled_for_epoch(block.epoch()) {
            self.fetch_blobs_v2(block_input, block, versioned_hashes, sampled_columns)
                .await
        } else {
            self.fetch_blobs_v1(block_input, block, versioned_hashes)
                .await
        }
    }

    async fn fetch_blobs_v1(
        &self,
        block_input: Arc<BlockInput>,
        block: Arc<SignedBeaconBlock>,
        versioned_hashes: Vec<VersionedHash>,
    ) -> Result<GetBlobsOutcome, BeaconChainError> {
        metrics::observe(&metrics::BLOBS_FROM_EL_EXPECTED, versioned_hashes.len() as f64);
        let response = self.engine.get_blobs_v1(versioned_hashes).await?;

        let num_fetched_blobs = response.iter().filter(|b| b.is_some()).count();
        metrics::observe(&metrics::BLOBS_FROM_EL_RECEIVED, num_fetched_blobs as f64);
        if num_fetched_blobs == 0 {
            return Ok(GetBlobsOutcome::NullResponse);
        }

        let already_cached = block_input.cached_blob_indices().unwrap_or_default();
        let signed_block_header = block.signed_block_header();

        let mut new_sidecars = Vec::with_capacity(num_fetched_blobs);
        for (index, blob_and_proof) in response
            .into_iter()
            .enumerate()
            .filter_map(|(i, opt)| Some((i, opt?)))
        {
            if already_cached.contains(&(index as u64)) {
                continue;
            }
            let sidecar = BlobSidecar::new_with_existing_proof(
                index,
                blob_and_proof.blob,
                &block,
                signed_block_header.clone(),
                blob_and_proof.proof,
            )
            .map_err(BeaconChainError::BlobSidecarError)?;
            new_sidecars.push(Arc::new(sidecar));
        }

        if new_sidecars.is_empty() {
            return Ok(GetBlobsOutcome::NotAttemptedFull);
        }

        // The blobs come from a trusted EL, but verifying the proofs here prevents a corrupt
        // pool entry from poisoning the availability cache.
        validate_blobs(&self.kzg, &new_sidecars).map_err(BeaconChainError::KzgError)?;

        let was_available = block_input.is_available();
        for sidecar in new_sidecars {
            self.events.register(EventKind::BlobSidecar(sidecar.clone()));
            block_input
                .add_blob(sidecar)
                .map_err(|e| BeaconChainError::InternalError(format!("{e:?}")))?;
        }

        if block_input.is_available() && !was_available {
            Ok(GetBlobsOutcome::SuccessResolved)
        } else if was_available {
            Ok(GetBlobsOutcome::SuccessLate)
        } else {
            Ok(GetBlobsOutcome::NullResponse)
        }
    }

    async fn fetch_blobs_v2(
        &self,
        block_input: Arc<BlockInput>,
        block: Arc<SignedBeaconBlock>,
        versioned_hashes: Vec<VersionedHash>,
        sampled_columns: Vec<ColumnIndex>,
    ) -> Result<GetBlobsOutcome, BeaconChainError> {
        let num_expected_blobs = versioned_hashes.len();
        metrics::observe(&metrics::BLOBS_FROM_EL_EXPECTED, num_expected_blobs as f64);

        let max_blobs = self
            .spec
            .max_blobs_per_block(block.epoch())
            .map_err(BeaconChainError::from)? as usize;
        let buffer_slot = self.acquire_buffer(max_blobs);

        let response = self.engine.get_blobs_v2(versioned_hashes).await;
        self.release_buffer(buffer_slot);
        let response = response?;

        // A partial response is useless for PeerDAS: all blobs are needed to extend the
        // matrix.
        let Some(blobs_and_proofs) = response else {
            return Ok(GetBlobsOutcome::NullResponse);
        };
        if blobs_and_proofs.len() != num_expected_blobs {
            return Ok(GetBlobsOutcome::NullResponse);
        }
        metrics::observe(&metrics::BLOBS_FROM_EL_RECEIVED, blobs_and_proofs.len() as f64);

        let (blobs, proofs): (Vec<_>, Vec<_>) = blobs_and_proofs
            .into_iter()
            .map(|BlobAndProofV2 { blob, proofs }| (blob, proofs))
            .unzip();

        let blob_refs: Vec<&types::Blob> = blobs.iter().collect();
        let cell_proofs: Vec<KzgProof> = proofs.into_iter().flatten().collect();
        let data_columns =
            blobs_to_data_column_sidecars(&blob_refs, cell_proofs, &block, &self.kzg, &self.spec)
                .map_err(BeaconChainError::DataColumnSidecarError)?;

        let was_available = block_input.is_available();
        for column in data_columns {
            if sampled_columns.contains(&column.index) {
                self.events
                    .register(EventKind::DataColumnSidecar(column.clone()));
                block_input
                    .add_custody_column(column)
                    .map_err(|e| BeaconChainError::InternalError(format!("{e:?}")))?;
            }
        }

        if block_input.is_available() && !was_available {
            Ok(GetBlobsOutcome::SuccessResolved)
        } else if was_available {
            Ok(GetBlobsOutcome::SuccessLate)
        } else {
            Ok(GetBlobsOutcome::NullResponse)
        }
    }
}
