//! A scripted engine for driving the block pipeline and blob fetching in tests.

use crate::json_structures::{
    BlobAndProofV1, BlobAndProofV2, ForkchoiceState, ForkchoiceUpdatedResponse, PayloadAttributes,
    PayloadStatus,
};
use crate::{EngineApi, Error};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use types::{ExecutionBlockHash, ExecutionPayload, Hash256, VersionedHash};

/// A mock engine whose responses are scripted per execution block hash and per versioned hash.
///
/// Unscripted payloads default to `Valid`; unscripted blobs are absent from the pool.
#[derive(Default)]
pub struct MockEngine {
    pub payload_statuses: Mutex<HashMap<ExecutionBlockHash, PayloadStatus>>,
    pub blobs_v1: Mutex<HashMap<VersionedHash, BlobAndProofV1>>,
    pub blobs_v2: Mutex<HashMap<VersionedHash, BlobAndProofV2>>,
    pub new_payload_calls: Mutex<Vec<ExecutionBlockHash>>,
    pub forkchoice_updated_calls: Mutex<Vec<ForkchoiceState>>,
    pub get_blobs_calls: Mutex<Vec<Vec<VersionedHash>>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the response for a payload by its block hash.
    pub fn set_payload_status(&self, block_hash: ExecutionBlockHash, status: PayloadStatus) {
        self.payload_statuses.lock().insert(block_hash, status);
    }

    pub fn insert_blob_v1(&self, versioned_hash: VersionedHash, blob: BlobAndProofV1) {
        self.blobs_v1.lock().insert(versioned_hash, blob);
    }

    pub fn insert_blob_v2(&self, versioned_hash: VersionedHash, blob: BlobAndProofV2) {
        self.blobs_v2.lock().insert(versioned_hash, blob);
    }
}

#[async_trait]
impl EngineApi for MockEngine {
    async fn new_payload(
        &self,
        payload: ExecutionPayload,
        _versioned_hashes: Vec<VersionedHash>,
        _parent_beacon_block_root: Hash256,
    ) -> Result<PayloadStatus, Error> {
        self.new_payload_calls.lock().push(payload.block_hash);
        Ok(self
            .payload_statuses
            .lock()
            .get(&payload.block_hash)
            .cloned()
            .unwrap_or(PayloadStatus::Valid))
    }

    async fn forkchoice_updated(
        &self,
        forkchoice_state: ForkchoiceState,
        _payload_attributes: Option<PayloadAttributes>,
    ) -> Result<ForkchoiceUpdatedResponse, Error> {
        self.forkchoice_updated_calls.lock().push(forkchoice_state);
        Ok(ForkchoiceUpdatedResponse {
            payload_status: PayloadStatus::Valid,
            payload_id: None,
        })
    }

    async fn get_blobs_v1(
        &self,
        versioned_hashes: Vec<VersionedHash>,
    ) -> Result<Vec<Option<BlobAndProofV1>>, Error> {
        self.get_blobs_calls.lock().push(versioned_hashes.clone());
        let blobs = self.blobs_v1.lock();
        Ok(versioned_hashes
            .iter()
            .map(|hash| blobs.get(hash).cloned())
            .collect())
    }

    async fn get_blobs_v2(
        &self,
        versioned_hashes: Vec<VersionedHash>,
    ) -> Result<Option<Vec<BlobAndProofV2>>, Error> {
        self.get_blobs_calls.lock().push(versioned_hashes.clone());
        let blobs = self.blobs_v2.lock();
        // All-or-nothing, matching `engine_getBlobsV2` semantics.
        Ok(versioned_hashes
            .iter()
            .map(|hash| blobs.get(hash).cloned())
            .collect::<Option<Vec<_>>>())
    }
}
