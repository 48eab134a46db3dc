//! The request/response domain of the wire protocol: protocol identifiers, the SSZ-snappy
//! framing codec and the self rate limiter.
//!
//! Transport (libp2p streams, substream negotiation) lives outside this crate; the codec
//! operates on raw byte buffers and the limiter is generic over the peer identifier.

pub mod codec;
pub mod methods;
pub mod protocol;
pub mod self_limiter;

pub use codec::{SszSnappyInboundCodec, SszSnappyOutboundCodec};
pub use methods::{
    BlobSidecarsByRangeRequest, BlocksByRangeRequest, BlocksByRootRequest,
    DataColumnSidecarsByRangeRequest, GoodbyeReason, MetaData, Ping, ResponseCode, RpcErrorResponse,
    RpcRequest, RpcResponse, StatusMessage, min_request_epoch_for_columns,
};
pub use protocol::{Encoding, Protocol, ProtocolId, RPCError};
pub use self_limiter::{SelfRateLimiter, SelfRateLimiterError};
