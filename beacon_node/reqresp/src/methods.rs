//! The typed request and response messages of each RPC method.

use ssz_derive::{Decode, Encode};
use ssz_types::VariableList;
use ssz_types::typenum::{U128, U1024};
use std::sync::Arc;
use types::consts::NUMBER_OF_COLUMNS;
use types::{
    BlobIdentifier, BlobSidecar, ChainSpec, ColumnIndex, DataColumnSidecar,
    DataColumnsByRootIdentifier, Epoch, ForkDigest, Hash256, SignedBeaconBlock, Slot,
};

/// The `Status` handshake: the peer's view of the chain.
#[derive(Debug, Clone, Copy, PartialEq, Encode, Decode)]
pub struct StatusMessage {
    pub fork_digest: ForkDigest,
    pub finalized_root: Hash256,
    pub finalized_epoch: Epoch,
    pub head_root: Hash256,
    pub head_slot: Slot,
    /// The earliest slot for which the peer can serve block and sidecar requests.
    pub earliest_available_slot: Slot,
}

/// The reason given for a `Goodbye` message.
#[derive(Debug, Clone, Copy, PartialEq, Encode, Decode)]
#[ssz(struct_behaviour = "transparent")]
pub struct GoodbyeReason(pub u64);

impl GoodbyeReason {
    pub const CLIENT_SHUTDOWN: Self = Self(1);
    pub const IRRELEVANT_NETWORK: Self = Self(2);
    pub const FAULT_OR_ERROR: Self = Self(3);
}

#[derive(Debug, Clone, Copy, PartialEq, Encode, Decode)]
pub struct Ping {
    pub data: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Encode, Decode)]
pub struct MetaData {
    pub seq_number: u64,
    /// The node's custody group count, determining which columns it samples.
    pub custody_group_count: u64,
}

/// Request a contiguous range of blocks.
#[derive(Debug, Clone, Copy, PartialEq, Encode, Decode)]
pub struct BlocksByRangeRequest {
    pub start_slot: Slot,
    pub count: u64,
    /// Deprecated in v2 but retained on the wire.
    pub step: u64,
}

/// Request blocks by their roots.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
#[ssz(struct_behaviour = "transparent")]
pub struct BlocksByRootRequest {
    pub block_roots: VariableList<Hash256, U1024>,
}

#[derive(Debug, Clone, Copy, PartialEq, Encode, Decode)]
pub struct BlobSidecarsByRangeRequest {
    pub start_slot: Slot,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
#[ssz(struct_behaviour = "transparent")]
pub struct BlobSidecarsByRootRequest {
    pub blob_ids: VariableList<BlobIdentifier, U1024>,
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct DataColumnSidecarsByRangeRequest {
    pub start_slot: Slot,
    pub count: u64,
    /// The column indices requested for each slot in the range.
    pub columns: VariableList<ColumnIndex, U128>,
}

impl DataColumnSidecarsByRangeRequest {
    pub fn max_requested(&self) -> u64 {
        self.count
            .saturating_mul(self.columns.len() as u64)
            .min(self.count.saturating_mul(NUMBER_OF_COLUMNS))
    }
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
#[ssz(struct_behaviour = "transparent")]
pub struct DataColumnSidecarsByRootRequest {
    pub data_column_ids: VariableList<DataColumnsByRootIdentifier, U128>,
}

/// The earliest epoch a peer is required to serve data-column sidecars for.
///
/// Requests below this floor may be answered with `ResourceUnavailable` and must not count
/// against the peer.
pub fn min_request_epoch_for_columns(current_epoch: Epoch, spec: &ChainSpec) -> Epoch {
    let window_floor =
        current_epoch.saturating_sub(spec.min_epochs_for_data_column_sidecars_requests);
    let fulu_floor = spec.fulu_fork_epoch.unwrap_or(Epoch::max_value());
    std::cmp::max(window_floor, fulu_floor)
}

/// A request on an outbound stream.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcRequest {
    Status(StatusMessage),
    Goodbye(GoodbyeReason),
    BlocksByRange(BlocksByRangeRequest),
    BlocksByRoot(BlocksByRootRequest),
    BlobsByRange(BlobSidecarsByRangeRequest),
    BlobsByRoot(BlobSidecarsByRootRequest),
    DataColumnsByRange(DataColumnSidecarsByRangeRequest),
    DataColumnsByRoot(DataColumnSidecarsByRootRequest),
    Ping(Ping),
    MetaData,
}

/// A successful response chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcResponse {
    Status(StatusMessage),
    BlocksByRange(Arc<SignedBeaconBlock>),
    BlocksByRoot(Arc<SignedBeaconBlock>),
    BlobsByRange(Arc<BlobSidecar>),
    BlobsByRoot(Arc<BlobSidecar>),
    DataColumnsByRange(Arc<DataColumnSidecar>),
    DataColumnsByRoot(Arc<DataColumnSidecar>),
    Pong(Ping),
    MetaData(MetaData),
}

/// The response code preceding every response chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    Success,
    InvalidRequest,
    ServerError,
    ResourceUnavailable,
    Unknown(u8),
}

impl From<u8> for ResponseCode {
    fn from(byte: u8) -> Self {
        match byte {
            0 => ResponseCode::Success,
            1 => ResponseCode::InvalidRequest,
            2 => ResponseCode::ServerError,
            3 => ResponseCode::ResourceUnavailable,
            other => ResponseCode::Unknown(other),
        }
    }
}

impl From<ResponseCode> for u8 {
    fn from(code: ResponseCode) -> u8 {
        match code {
            ResponseCode::Success => 0,
            ResponseCode::InvalidRequest => 1,
            ResponseCode::ServerError => 2,
            ResponseCode::ResourceUnavailable => 3,
            ResponseCode::Unknown(other) => other,
        }
    }
}

/// A response chunk: either a payload or an error with a message.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcErrorResponse {
    Success(RpcResponse),
    InvalidRequest(String),
    ServerError(String),
    ResourceUnavailable(String),
    Unknown(u8, String),
}

impl RpcErrorResponse {
    pub fn response_code(&self) -> ResponseCode {
        match self {
            RpcErrorResponse::Success(_) => ResponseCode::Success,
            RpcErrorResponse::InvalidRequest(_) => ResponseCode::InvalidRequest,
            RpcErrorResponse::ServerError(_) => ResponseCode::ServerError,
            RpcErrorResponse::ResourceUnavailable(_) => ResponseCode::ResourceUnavailable,
            RpcErrorResponse::Unknown(code, _) => ResponseCode::Unknown(*code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_request_floor_respects_fulu_activation() {
        let mut spec = ChainSpec::mainnet();
        spec.fulu_fork_epoch = Some(Epoch::new(1000));
        spec.min_epochs_for_data_column_sidecars_requests = 4096;

        // Near the fork, the fork epoch is the floor.
        assert_eq!(
            min_request_epoch_for_columns(Epoch::new(2000), &spec),
            Epoch::new(1000)
        );
        // Long after the fork, the retention window dominates.
        assert_eq!(
            min_request_epoch_for_columns(Epoch::new(10_000), &spec),
            Epoch::new(10_000 - 4096)
        );
    }

    #[test]
    fn response_codes_round_trip() {
        for byte in [0u8, 1, 2, 3, 42] {
            assert_eq!(u8::from(ResponseCode::from(byte)), byte);
        }
    }
}
