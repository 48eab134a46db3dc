//! SSZ-snappy framing for request/response streams.
//!
//! Every message is a varint length-prefix of the *uncompressed* SSZ payload followed by a
//! snappy frame stream. Response chunks additionally lead with a single response-code byte.

use crate::methods::{
    BlobSidecarsByRangeRequest, BlobSidecarsByRootRequest, BlocksByRangeRequest,
    BlocksByRootRequest, DataColumnSidecarsByRangeRequest, DataColumnSidecarsByRootRequest,
    GoodbyeReason, MetaData, Ping, ResponseCode, RpcErrorResponse, RpcRequest, RpcResponse,
    StatusMessage,
};
use crate::protocol::{MAX_RPC_SIZE, Protocol, ProtocolId, RPCError};
use bytes::{Buf, BufMut, BytesMut};
use snap::read::FrameDecoder;
use snap::write::FrameEncoder;
use ssz::{Decode, Encode};
use std::io::{Cursor, Read, Write};
use std::sync::Arc;
use tokio_util::codec::{Decoder, Encoder};
use types::{BlobSidecar, DataColumnSidecar, SignedBeaconBlock};
use unsigned_varint::{decode as varint_decode, encode as varint_encode};

fn snappy_compress(bytes: &[u8]) -> Result<Vec<u8>, RPCError> {
    let mut writer = FrameEncoder::new(Vec::new());
    writer.write_all(bytes)?;
    writer.flush()?;
    Ok(writer.into_inner().map_err(|e| {
        RPCError::InvalidData(format!("snappy flush failed: {e:?}"))
    })?)
}

/// Decode one varint+snappy framed payload from `src`, if complete. Returns the uncompressed
/// bytes.
fn decode_framed(
    src: &mut BytesMut,
    pending_len: &mut Option<usize>,
) -> Result<Option<Vec<u8>>, RPCError> {
    let length = match pending_len {
        Some(length) => *length,
        None => match varint_decode::usize(src) {
            Ok((length, remaining)) => {
                let consumed = src.len() - remaining.len();
                src.advance(consumed);
                *pending_len = Some(length);
                length
            }
            Err(varint_decode::Error::Insufficient) => return Ok(None),
            Err(e) => return Err(RPCError::InvalidData(format!("bad varint: {e:?}"))),
        },
    };

    if length > MAX_RPC_SIZE {
        return Err(RPCError::InvalidData(format!(
            "uncompressed length {length} exceeds maximum"
        )));
    }

    // The snappy frame format has a worst-case expansion; a compressed stream for `length`
    // bytes cannot meaningfully exceed this.
    let max_compressed_len = 32 + length + length / 6;

    let mut reader = FrameDecoder::new(Cursor::new(&src));
    let mut decoded_buffer = vec![0; length];
    match reader.read_exact(&mut decoded_buffer) {
        Ok(()) => {
            let consumed = reader.get_ref().position() as usize;
            src.advance(consumed);
            *pending_len = None;
            Ok(Some(decoded_buffer))
        }
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            // Wait for more bytes, unless the stream is already implausibly long.
            if src.len() > max_compressed_len {
                Err(RPCError::InvalidData("oversized compressed data".into()))
            } else {
                Ok(None)
            }
        }
        Err(e) => Err(RPCError::from(e)),
    }
}

fn encode_framed(bytes: &[u8], dst: &mut BytesMut) -> Result<(), RPCError> {
    if bytes.len() > MAX_RPC_SIZE {
        return Err(RPCError::InvalidData(format!(
            "attempted to encode {} bytes",
            bytes.len()
        )));
    }
    let mut length_buffer = varint_encode::usize_buffer();
    dst.extend_from_slice(varint_encode::usize(bytes.len(), &mut length_buffer));
    dst.extend_from_slice(&snappy_compress(bytes)?);
    Ok(())
}

/* Inbound codec: decodes requests, encodes responses. */

pub struct SszSnappyInboundCodec {
    protocol: ProtocolId,
    pending_len: Option<usize>,
    /// MetaData requests have no body; deliver exactly one per stream.
    metadata_delivered: bool,
}

impl SszSnappyInboundCodec {
    pub fn new(protocol: ProtocolId) -> Self {
        Self {
            protocol,
            pending_len: None,
            metadata_delivered: false,
        }
    }
}

impl Encoder<RpcErrorResponse> for SszSnappyInboundCodec {
    type Error = RPCError;

    fn encode(&mut self, item: RpcErrorResponse, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.put_u8(item.response_code().into());

        let bytes = match &item {
            RpcErrorResponse::Success(response) => match response {
                RpcResponse::Status(status) => status.as_ssz_bytes(),
                RpcResponse::BlocksByRange(block) | RpcResponse::BlocksByRoot(block) => {
                    block.as_ssz_bytes()
                }
                RpcResponse::BlobsByRange(blob) | RpcResponse::BlobsByRoot(blob) => {
                    blob.as_ssz_bytes()
                }
                RpcResponse::DataColumnsByRange(column)
                | RpcResponse::DataColumnsByRoot(column) => column.as_ssz_bytes(),
                RpcResponse::Pong(ping) => ping.as_ssz_bytes(),
                RpcResponse::MetaData(metadata) => metadata.as_ssz_bytes(),
            },
            RpcErrorResponse::InvalidRequest(msg)
            | RpcErrorResponse::ServerError(msg)
            | RpcErrorResponse::ResourceUnavailable(msg)
            | RpcErrorResponse::Unknown(_, msg) => msg.as_bytes().to_vec(),
        };
        encode_framed(&bytes, dst)
    }
}

impl Decoder for SszSnappyInboundCodec {
    type Item = RpcRequest;
    type Error = RPCError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // MetaData requests have no body.
        if self.protocol.protocol == Protocol::MetaData {
            if self.metadata_delivered {
                return Ok(None);
            }
            self.metadata_delivered = true;
            return Ok(Some(RpcRequest::MetaData));
        }

        let Some(payload) = decode_framed(src, &mut self.pending_len)? else {
            return Ok(None);
        };

        let request = match self.protocol.protocol {
            Protocol::Status => RpcRequest::Status(StatusMessage::from_ssz_bytes(&payload)?),
            Protocol::Goodbye => RpcRequest::Goodbye(GoodbyeReason::from_ssz_bytes(&payload)?),
            Protocol::BlocksByRange => {
                RpcRequest::BlocksByRange(BlocksByRangeRequest::from_ssz_bytes(&payload)?)
            }
            Protocol::BlocksByRoot => {
                RpcRequest::BlocksByRoot(BlocksByRootRequest::from_ssz_bytes(&payload)?)
            }
            Protocol::BlobsByRange => {
                RpcRequest::BlobsByRange(BlobSidecarsByRangeRequest::from_ssz_bytes(&payload)?)
            }
            Protocol::BlobsByRoot => {
                RpcRequest::BlobsByRoot(BlobSidecarsByRootRequest::from_ssz_bytes(&payload)?)
            }
            Protocol::DataColumnsByRange => RpcRequest::DataColumnsByRange(
                DataColumnSidecarsByRangeRequest::from_ssz_bytes(&payload)?,
            ),
            Protocol::DataColumnsByRoot => RpcRequest::DataColumnsByRoot(
                DataColumnSidecarsByRootRequest::from_ssz_bytes(&payload)?,
            ),
            Protocol::Ping => RpcRequest::Ping(Ping::from_ssz_bytes(&payload)?),
            Protocol::MetaData => RpcRequest::MetaData,
        };
        Ok(Some(request))
    }
}

/* Outbound codec: encodes requests, decodes responses. */

pub struct SszSnappyOutboundCodec {
    protocol: ProtocolId,
    pending_len: Option<usize>,
    /// The response code of the chunk currently being decoded.
    current_response_code: Option<ResponseCode>,
}

impl SszSnappyOutboundCodec {
    pub fn new(protocol: ProtocolId) -> Self {
        Self {
            protocol,
            pending_len: None,
            current_response_code: None,
        }
    }

    fn decode_response_payload(&self, payload: &[u8]) -> Result<RpcResponse, RPCError> {
        Ok(match self.protocol.protocol {
            Protocol::Status => RpcResponse::Status(StatusMessage::from_ssz_bytes(payload)?),
            Protocol::Goodbye => return Err(RPCError::InvalidProtocol("Goodbye has no response")),
            Protocol::BlocksByRange => {
                RpcResponse::BlocksByRange(Arc::new(SignedBeaconBlock::from_ssz_bytes(payload)?))
            }
            Protocol::BlocksByRoot => {
                RpcResponse::BlocksByRoot(Arc::new(SignedBeaconBlock::from_ssz_bytes(payload)?))
            }
            Protocol::BlobsByRange => {
                RpcResponse::BlobsByRange(Arc::new(BlobSidecar::from_ssz_bytes(payload)?))
            }
            Protocol::BlobsByRoot => {
                RpcResponse::BlobsByRoot(Arc::new(BlobSidecar::from_ssz_bytes(payload)?))
            }
            Protocol::DataColumnsByRange => {
                RpcResponse::DataColumnsByRange(Arc::new(DataColumnSidecar::from_ssz_bytes(payload)?))
            }
            Protocol::DataColumnsByRoot => {
                RpcResponse::DataColumnsByRoot(Arc::new(DataColumnSidecar::from_ssz_bytes(payload)?))
            }
            Protocol::Ping => RpcResponse::Pong(Ping::from_ssz_bytes(payload)?),
            Protocol::MetaData => RpcResponse::MetaData(MetaData::from_ssz_bytes(payload)?),
        })
    }
}

impl Encoder<RpcRequest> for SszSnappyOutboundCodec {
    type Error = RPCError;

    fn encode(&mut self, item: RpcRequest, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = match &item {
            RpcRequest::Status(status) => status.as_ssz_bytes(),
            RpcRequest::Goodbye(reason) => reason.as_ssz_bytes(),
            RpcRequest::BlocksByRange(req) => req.as_ssz_bytes(),
            RpcRequest::BlocksByRoot(req) => req.as_ssz_bytes(),
            RpcRequest::BlobsByRange(req) => req.as_ssz_bytes(),
            RpcRequest::BlobsByRoot(req) => req.as_ssz_bytes(),
            RpcRequest::DataColumnsByRange(req) => req.as_ssz_bytes(),
            RpcRequest::DataColumnsByRoot(req) => req.as_ssz_bytes(),
            RpcRequest::Ping(ping) => ping.as_ssz_bytes(),
            // A metadata request is an empty body.
            RpcRequest::MetaData => return Ok(()),
        };
        encode_framed(&bytes, dst)
    }
}

impl Decoder for SszSnappyOutboundCodec {
    type Item = RpcErrorResponse;
    type Error = RPCError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Each chunk leads with a response code byte.
        let response_code = match self.current_response_code {
            Some(code) => code,
            None => {
                if src.is_empty() {
                    return Ok(None);
                }
                let code = ResponseCode::from(src.get_u8());
                self.current_response_code = Some(code);
                code
            }
        };

        let Some(payload) = decode_framed(src, &mut self.pending_len)? else {
            return Ok(None);
        };
        self.current_response_code = None;

        let chunk = match response_code {
            ResponseCode::Success => RpcErrorResponse::Success(
                self.decode_response_payload(&payload)?,
            ),
            code => {
                let message = String::from_utf8_lossy(&payload).into_owned();
                match code {
                    ResponseCode::InvalidRequest => RpcErrorResponse::InvalidRequest(message),
                    ResponseCode::ServerError => RpcErrorResponse::ServerError(message),
                    ResponseCode::ResourceUnavailable => {
                        RpcErrorResponse::ResourceUnavailable(message)
                    }
                    ResponseCode::Unknown(byte) => RpcErrorResponse::Unknown(byte, message),
                    ResponseCode::Success => unreachable!("handled above"),
                }
            }
        };
        Ok(Some(chunk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Encoding;
    use types::{BeaconBlock, Epoch, FixedBytesExtended, Hash256, Signature, Slot};

    fn status() -> StatusMessage {
        StatusMessage {
            fork_digest: [1, 2, 3, 4],
            finalized_root: Hash256::from_low_u64_be(1),
            finalized_epoch: Epoch::new(2),
            head_root: Hash256::from_low_u64_be(3),
            head_slot: Slot::new(99),
            earliest_available_slot: Slot::new(10),
        }
    }

    fn inbound(protocol: Protocol) -> SszSnappyInboundCodec {
        SszSnappyInboundCodec::new(ProtocolId::new(protocol, 1, Encoding::SSZSnappy))
    }

    fn outbound(protocol: Protocol) -> SszSnappyOutboundCodec {
        SszSnappyOutboundCodec::new(ProtocolId::new(protocol, 1, Encoding::SSZSnappy))
    }

    #[test]
    fn request_round_trip() {
        let request = RpcRequest::Status(status());
        let mut buffer = BytesMut::new();
        outbound(Protocol::Status).encode(request.clone(), &mut buffer).unwrap();

        let decoded = inbound(Protocol::Status).decode(&mut buffer).unwrap().unwrap();
        assert_eq!(decoded, request);
        assert!(buffer.is_empty());
    }

    #[test]
    fn response_round_trip_with_code() {
        let mut block = BeaconBlock::empty();
        block.slot = Slot::new(7);
        let response = RpcErrorResponse::Success(RpcResponse::BlocksByRange(Arc::new(
            SignedBeaconBlock::from_block(block, Signature::empty()),
        )));

        let mut buffer = BytesMut::new();
        inbound(Protocol::BlocksByRange)
            .encode(response.clone(), &mut buffer)
            .unwrap();
        // The first byte on the wire is the success code.
        assert_eq!(buffer[0], 0);

        let decoded = outbound(Protocol::BlocksByRange)
            .decode(&mut buffer)
            .unwrap()
            .unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn error_response_round_trip() {
        let response = RpcErrorResponse::ResourceUnavailable("pruned".to_string());
        let mut buffer = BytesMut::new();
        inbound(Protocol::BlobsByRange)
            .encode(response.clone(), &mut buffer)
            .unwrap();
        assert_eq!(buffer[0], 3);

        let decoded = outbound(Protocol::BlobsByRange)
            .decode(&mut buffer)
            .unwrap()
            .unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn partial_payload_waits_for_more_bytes() {
        let request = RpcRequest::Status(status());
        let mut full = BytesMut::new();
        outbound(Protocol::Status).encode(request.clone(), &mut full).unwrap();

        // Feed the codec one byte at a time; it must return Ok(None) until the message is
        // complete.
        let mut codec = inbound(Protocol::Status);
        let mut partial = BytesMut::new();
        let mut decoded = None;
        for byte in full.iter() {
            partial.put_u8(*byte);
            if let Some(message) = codec.decode(&mut partial).unwrap() {
                decoded = Some(message);
            }
        }
        assert_eq!(decoded, Some(request));
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let mut buffer = BytesMut::new();
        let mut length_buffer = varint_encode::usize_buffer();
        buffer.extend_from_slice(varint_encode::usize(MAX_RPC_SIZE + 1, &mut length_buffer));
        let result = inbound(Protocol::Status).decode(&mut buffer);
        assert!(matches!(result, Err(RPCError::InvalidData(_))));
    }

    #[test]
    fn two_chunks_decode_sequentially() {
        let mut buffer = BytesMut::new();
        let mut codec_in = inbound(Protocol::Ping);
        codec_in
            .encode(
                RpcErrorResponse::Success(RpcResponse::Pong(Ping { data: 1 })),
                &mut buffer,
            )
            .unwrap();
        codec_in
            .encode(
                RpcErrorResponse::Success(RpcResponse::Pong(Ping { data: 2 })),
                &mut buffer,
            )
            .unwrap();

        let mut codec_out = outbound(Protocol::Ping);
        let first = codec_out.decode(&mut buffer).unwrap().unwrap();
        let second = codec_out.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(
            first,
            RpcErrorResponse::Success(RpcResponse::Pong(Ping { data: 1 }))
        );
        assert_eq!(
            second,
            RpcErrorResponse::Success(RpcResponse::Pong(Ping { data: 2 }))
        );
    }
}
