use std::fmt;
use strum::{AsRefStr, Display, EnumString, IntoStaticStr};

/// The protocol prefix for all request/response protocols.
pub const PROTOCOL_PREFIX: &str = "/eth2/beacon_chain/req";

/// The maximum bytes that can be sent across the RPC in a single (uncompressed) payload.
pub const MAX_RPC_SIZE: usize = 10 * 1_048_576; // 10M

/// Protocol names for the RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, AsRefStr, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Protocol {
    /// The Status protocol name.
    Status,
    /// The Goodbye protocol name.
    Goodbye,
    /// The `BlocksByRange` protocol name.
    #[strum(serialize = "beacon_blocks_by_range")]
    BlocksByRange,
    /// The `BlocksByRoot` protocol name.
    #[strum(serialize = "beacon_blocks_by_root")]
    BlocksByRoot,
    /// The `BlobSidecarsByRange` protocol name.
    #[strum(serialize = "blob_sidecars_by_range")]
    BlobsByRange,
    /// The `BlobSidecarsByRoot` protocol name.
    #[strum(serialize = "blob_sidecars_by_root")]
    BlobsByRoot,
    /// The `DataColumnSidecarsByRange` protocol name.
    #[strum(serialize = "data_column_sidecars_by_range")]
    DataColumnsByRange,
    /// The `DataColumnSidecarsByRoot` protocol name.
    #[strum(serialize = "data_column_sidecars_by_root")]
    DataColumnsByRoot,
    /// The `Ping` protocol name.
    Ping,
    /// The `MetaData` protocol name.
    #[strum(serialize = "metadata")]
    MetaData,
}

/// RPC Encodings supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    SSZSnappy,
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoding::SSZSnappy => write!(f, "ssz_snappy"),
        }
    }
}

/// An RPC protocol ID: `/<prefix>/<method>/<version>/<encoding>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolId {
    pub protocol: Protocol,
    pub version: u8,
    pub encoding: Encoding,
    protocol_id: String,
}

impl ProtocolId {
    pub fn new(protocol: Protocol, version: u8, encoding: Encoding) -> Self {
        let protocol_id = format!("{PROTOCOL_PREFIX}/{protocol}/{version}/{encoding}");
        Self {
            protocol,
            version,
            encoding,
            protocol_id,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.protocol_id
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.protocol_id)
    }
}

#[derive(Debug)]
pub enum RPCError {
    /// Error while decoding the SSZ payload.
    SSZDecodeError(ssz::DecodeError),
    /// IO error from the snappy framing.
    IoError(std::io::Error),
    /// The peer returned an error response with the given code.
    ErrorResponse(u8, String),
    /// The uncompressed length prefix exceeds the protocol's maximum.
    InvalidData(String),
    /// Received a response for a protocol with no responses (e.g. Goodbye).
    InvalidProtocol(&'static str),
    /// The request exceeded the limiter's concurrency allowance.
    RateLimited,
    /// Request timed out without a complete response.
    Timeout,
    /// Stream ended before a complete message was received.
    IncompleteStream,
}

impl From<std::io::Error> for RPCError {
    fn from(e: std::io::Error) -> Self {
        RPCError::IoError(e)
    }
}

impl From<ssz::DecodeError> for RPCError {
    fn from(e: ssz::DecodeError) -> Self {
        RPCError::SSZDecodeError(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_id_format() {
        let id = ProtocolId::new(Protocol::BlocksByRange, 2, Encoding::SSZSnappy);
        assert_eq!(
            id.as_str(),
            "/eth2/beacon_chain/req/beacon_blocks_by_range/2/ssz_snappy"
        );
        let id = ProtocolId::new(Protocol::DataColumnsByRoot, 1, Encoding::SSZSnappy);
        assert_eq!(
            id.as_str(),
            "/eth2/beacon_chain/req/data_column_sidecars_by_root/1/ssz_snappy"
        );
    }
}
