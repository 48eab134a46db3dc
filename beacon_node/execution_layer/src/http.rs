//! JSON-RPC transport for the engine API.

use crate::json_structures::{
    BlobAndProofV1, BlobAndProofV2, ForkchoiceState, ForkchoiceUpdatedResponse,
    JsonForkchoiceUpdatedV1Response, JsonPayloadStatusV1, PayloadAttributes, PayloadStatus,
};
use crate::{EngineApi, Error};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::trace;
use types::{ExecutionPayload, Hash256, VersionedHash};

pub const ENGINE_NEW_PAYLOAD_V4: &str = "engine_newPayloadV4";
pub const ENGINE_FORKCHOICE_UPDATED_V3: &str = "engine_forkchoiceUpdatedV3";
pub const ENGINE_GET_BLOBS_V1: &str = "engine_getBlobsV1";
pub const ENGINE_GET_BLOBS_V2: &str = "engine_getBlobsV2";

pub const ENGINE_NEW_PAYLOAD_TIMEOUT: Duration = Duration::from_secs(8);
pub const ENGINE_FORKCHOICE_UPDATED_TIMEOUT: Duration = Duration::from_secs(8);
pub const ENGINE_GET_BLOBS_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(serde::Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(serde::Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// An engine API client over HTTP JSON-RPC.
pub struct HttpJsonRpc {
    client: reqwest::Client,
    url: String,
    id: AtomicU64,
}

impl HttpJsonRpc {
    pub fn new(url: String) -> Result<Self, Error> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            url,
            id: AtomicU64::new(0),
        })
    }

    /// Issue one JSON-RPC call. Returns `None` when the server's `result` is `null`, which
    /// is a meaningful response for some methods (`engine_getBlobsV2`).
    async fn rpc_request<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
        timeout: Duration,
    ) -> Result<Option<R>, Error> {
        let id = self.id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });

        trace!(method, id, "Sending engine API request");

        let response: JsonRpcResponse<R> = self
            .client
            .post(&self.url)
            .timeout(timeout)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(error) = response.error {
            return Err(Error::ServerMessage {
                code: error.code,
                message: error.message,
            });
        }
        Ok(response.result)
    }
}

#[async_trait]
impl EngineApi for HttpJsonRpc {
    async fn new_payload(
        &self,
        payload: ExecutionPayload,
        versioned_hashes: Vec<VersionedHash>,
        parent_beacon_block_root: Hash256,
    ) -> Result<PayloadStatus, Error> {
        let status: JsonPayloadStatusV1 = self
            .rpc_request(
                ENGINE_NEW_PAYLOAD_V4,
                json!([payload, versioned_hashes, parent_beacon_block_root, []]),
                ENGINE_NEW_PAYLOAD_TIMEOUT,
            )
            .await?
            .ok_or_else(|| Error::InvalidResponse("newPayload: missing result".into()))?;
        Ok(status.into())
    }

    async fn forkchoice_updated(
        &self,
        forkchoice_state: ForkchoiceState,
        payload_attributes: Option<PayloadAttributes>,
    ) -> Result<ForkchoiceUpdatedResponse, Error> {
        let response: JsonForkchoiceUpdatedV1Response = self
            .rpc_request(
                ENGINE_FORKCHOICE_UPDATED_V3,
                json!([forkchoice_state, payload_attributes]),
                ENGINE_FORKCHOICE_UPDATED_TIMEOUT,
            )
            .await?
            .ok_or_else(|| {
                Error::InvalidResponse("forkchoiceUpdated: missing result".into())
            })?;
        Ok(response.into())
    }

    async fn get_blobs_v1(
        &self,
        versioned_hashes: Vec<VersionedHash>,
    ) -> Result<Vec<Option<BlobAndProofV1>>, Error> {
        self.rpc_request(
            ENGINE_GET_BLOBS_V1,
            json!([versioned_hashes]),
            ENGINE_GET_BLOBS_TIMEOUT,
        )
        .await?
        .ok_or_else(|| Error::InvalidResponse("getBlobsV1: missing result".into()))
    }

    async fn get_blobs_v2(
        &self,
        versioned_hashes: Vec<VersionedHash>,
    ) -> Result<Option<Vec<BlobAndProofV2>>, Error> {
        // A null result means at least one requested blob is absent from the pool.
        self.rpc_request(
            ENGINE_GET_BLOBS_V2,
            json!([versioned_hashes]),
            ENGINE_GET_BLOBS_TIMEOUT,
        )
        .await
    }
}
