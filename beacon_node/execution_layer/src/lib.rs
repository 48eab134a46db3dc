//! Client for the execution engine API: `newPayload`, `forkchoiceUpdated` and the blob-pool
//! fetch methods (`getBlobsV1`/`getBlobsV2`).
//!
//! The consensus core only consumes the `EngineApi` trait; the JSON-RPC implementation and the
//! scripted mock used in tests both live here.

pub mod http;
pub mod json_structures;
pub mod test_utils;

pub use http::HttpJsonRpc;
pub use json_structures::{
    BlobAndProofV1, BlobAndProofV2, ForkchoiceState, ForkchoiceUpdatedResponse, PayloadAttributes,
    PayloadId, PayloadStatus,
};

use async_trait::async_trait;
use types::{ExecutionPayload, Hash256, VersionedHash};

#[derive(Debug)]
pub enum Error {
    Reqwest(reqwest::Error),
    Json(serde_json::Error),
    ServerMessage { code: i64, message: String },
    InvalidResponse(String),
    /// The engine is not yet synced to the requested payload's chain.
    EngineSyncing,
    /// The engine could not be reached; the caller should retry with back-off.
    EngineUnavailable,
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            Error::EngineUnavailable
        } else {
            Error::Reqwest(e)
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

/// The engine API operations the consensus core requires.
#[async_trait]
pub trait EngineApi: Send + Sync {
    /// Submit an execution payload for verification.
    async fn new_payload(
        &self,
        payload: ExecutionPayload,
        versioned_hashes: Vec<VersionedHash>,
        parent_beacon_block_root: Hash256,
    ) -> Result<PayloadStatus, Error>;

    /// Inform the engine of the current head, safe and finalized blocks.
    async fn forkchoice_updated(
        &self,
        forkchoice_state: ForkchoiceState,
        payload_attributes: Option<PayloadAttributes>,
    ) -> Result<ForkchoiceUpdatedResponse, Error>;

    /// Fetch blobs and per-blob proofs from the engine's pool, aligned by input index.
    async fn get_blobs_v1(
        &self,
        versioned_hashes: Vec<VersionedHash>,
    ) -> Result<Vec<Option<BlobAndProofV1>>, Error>;

    /// Fetch blobs with cell proofs. The response is all-or-nothing: `None` when any of the
    /// requested blobs is absent from the pool.
    async fn get_blobs_v2(
        &self,
        versioned_hashes: Vec<VersionedHash>,
    ) -> Result<Option<Vec<BlobAndProofV2>>, Error>;
}
