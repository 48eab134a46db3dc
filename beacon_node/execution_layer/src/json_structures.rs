use kzg::KzgProof;
use serde::{Deserialize, Serialize};
use types::{Address, Blob, ExecutionBlockHash, Hash256, Withdrawal};

pub type PayloadId = [u8; 8];

/// The state of the fork choice as communicated to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkchoiceState {
    pub head_block_hash: ExecutionBlockHash,
    pub safe_block_hash: ExecutionBlockHash,
    pub finalized_block_hash: ExecutionBlockHash,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadAttributes {
    #[serde(with = "serde_utils::u64_hex_be")]
    pub timestamp: u64,
    pub prev_randao: Hash256,
    pub suggested_fee_recipient: Address,
    pub withdrawals: Vec<Withdrawal>,
    pub parent_beacon_block_root: Hash256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JsonPayloadStatusV1Status {
    Valid,
    Invalid,
    Syncing,
    Accepted,
    InvalidBlockHash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonPayloadStatusV1 {
    pub status: JsonPayloadStatusV1Status,
    pub latest_valid_hash: Option<ExecutionBlockHash>,
    pub validation_error: Option<String>,
}

/// The status of a payload, converted from the engine's wire form.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadStatus {
    Valid,
    Invalid {
        latest_valid_hash: Option<ExecutionBlockHash>,
        validation_error: Option<String>,
    },
    Syncing,
    Accepted,
    InvalidBlockHash {
        validation_error: Option<String>,
    },
}

impl From<JsonPayloadStatusV1> for PayloadStatus {
    fn from(json: JsonPayloadStatusV1) -> Self {
        match json.status {
            JsonPayloadStatusV1Status::Valid => PayloadStatus::Valid,
            JsonPayloadStatusV1Status::Invalid => PayloadStatus::Invalid {
                latest_valid_hash: json.latest_valid_hash,
                validation_error: json.validation_error,
            },
            JsonPayloadStatusV1Status::Syncing => PayloadStatus::Syncing,
            JsonPayloadStatusV1Status::Accepted => PayloadStatus::Accepted,
            JsonPayloadStatusV1Status::InvalidBlockHash => PayloadStatus::InvalidBlockHash {
                validation_error: json.validation_error,
            },
        }
    }
}

impl PayloadStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, PayloadStatus::Valid)
    }

    pub fn is_invalid(&self) -> bool {
        matches!(
            self,
            PayloadStatus::Invalid { .. } | PayloadStatus::InvalidBlockHash { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonForkchoiceUpdatedV1Response {
    pub payload_status: JsonPayloadStatusV1,
    #[serde(with = "opt_payload_id")]
    pub payload_id: Option<PayloadId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForkchoiceUpdatedResponse {
    pub payload_status: PayloadStatus,
    pub payload_id: Option<PayloadId>,
}

impl From<JsonForkchoiceUpdatedV1Response> for ForkchoiceUpdatedResponse {
    fn from(json: JsonForkchoiceUpdatedV1Response) -> Self {
        Self {
            payload_status: json.payload_status.into(),
            payload_id: json.payload_id,
        }
    }
}

/// A blob with its single (pre-PeerDAS) proof.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobAndProofV1 {
    #[serde(with = "ssz_types::serde_utils::hex_fixed_vec")]
    pub blob: Blob,
    pub proof: KzgProof,
}

/// A blob with its cell proofs (PeerDAS).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobAndProofV2 {
    #[serde(with = "ssz_types::serde_utils::hex_fixed_vec")]
    pub blob: Blob,
    pub proofs: Vec<KzgProof>,
}

/// Serialize an optional payload id as prefixed hex.
mod opt_payload_id {
    use super::PayloadId;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<PayloadId>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(id) => serializer.serialize_str(&format!("0x{}", hex::encode(id))),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<PayloadId>, D::Error> {
        let opt_string: Option<String> = Option::deserialize(deserializer)?;
        opt_string
            .map(|string| {
                let bytes = hex::decode(string.trim_start_matches("0x"))
                    .map_err(serde::de::Error::custom)?;
                bytes
                    .try_into()
                    .map_err(|_| serde::de::Error::custom("invalid payload id length"))
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_status_wire_format() {
        let json = r#"{"status":"INVALID","latestValidHash":null,"validationError":"bad block"}"#;
        let parsed: JsonPayloadStatusV1 = serde_json::from_str(json).unwrap();
        let status = PayloadStatus::from(parsed);
        assert_eq!(
            status,
            PayloadStatus::Invalid {
                latest_valid_hash: None,
                validation_error: Some("bad block".to_string()),
            }
        );
        assert!(status.is_invalid());
    }

    #[test]
    fn fcu_response_with_payload_id() {
        let json = r#"{"payloadStatus":{"status":"VALID","latestValidHash":null,"validationError":null},"payloadId":"0x0102030405060708"}"#;
        let parsed: JsonForkchoiceUpdatedV1Response = serde_json::from_str(json).unwrap();
        let response = ForkchoiceUpdatedResponse::from(parsed);
        assert_eq!(response.payload_id, Some([1, 2, 3, 4, 5, 6, 7, 8]));
        assert!(response.payload_status.is_valid());
    }
}
