use crate::consts::typenum_sizes::MaxValidatorsPerCommittee;
use crate::{Checkpoint, Hash256, Slot};
use bls::Signature;
use serde::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use ssz_types::{BitList, VariableList};
use tree_hash_derive::TreeHash;

/// The data upon which an attestation is based.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode, TreeHash,
)]
pub struct AttestationData {
    pub slot: Slot,
    #[serde(with = "serde_utils::quoted_u64")]
    pub index: u64,
    /// LMD-GHOST vote.
    pub beacon_block_root: Hash256,
    /// FFG source checkpoint.
    pub source: Checkpoint,
    /// FFG target checkpoint.
    pub target: Checkpoint,
}

/// An attestation as it appears on the wire and inside a block body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode, TreeHash)]
pub struct Attestation {
    pub aggregation_bits: BitList<MaxValidatorsPerCommittee>,
    pub data: AttestationData,
    pub signature: Signature,
}

impl Attestation {
    /// The number of set bits, i.e. the number of attesting validators.
    pub fn num_set_aggregation_bits(&self) -> usize {
        self.aggregation_bits.num_set_bits()
    }
}

/// An attestation with its committee resolved to explicit validator indices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode, TreeHash)]
pub struct IndexedAttestation {
    #[serde(with = "quoted_variable_list_u64")]
    pub attesting_indices: VariableList<u64, MaxValidatorsPerCommittee>,
    pub data: AttestationData,
    pub signature: Signature,
}

/// Serialize a variable list of `u64` such that each int is quoted.
mod quoted_variable_list_u64 {
    use super::*;
    use serde::ser::SerializeSeq;
    use serde::{Deserializer, Serializer};
    use serde_utils::quoted_u64_vec::{QuotedIntVecVisitor, QuotedIntWrapper};
    use ssz_types::typenum::Unsigned;

    pub fn serialize<S, T>(value: &VariableList<u64, T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Unsigned,
    {
        let mut seq = serializer.serialize_seq(Some(value.len()))?;
        for &int in value.iter() {
            seq.serialize_element(&QuotedIntWrapper { int })?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<VariableList<u64, T>, D::Error>
    where
        D: Deserializer<'de>,
        T: Unsigned,
    {
        deserializer
            .deserialize_any(QuotedIntVecVisitor)
            .and_then(|vec| {
                VariableList::new(vec)
                    .map_err(|e| serde::de::Error::custom(format!("invalid length: {:?}", e)))
            })
    }
}

impl IndexedAttestation {
    /// Check of `self` and `other` are slashable as a double or surround vote.
    ///
    /// Spec v0.12.1
    pub fn is_double_vote(&self, other: &Self) -> bool {
        self.data.target.epoch == other.data.target.epoch && self.data != other.data
    }

    pub fn is_surround_vote(&self, other: &Self) -> bool {
        self.data.source.epoch < other.data.source.epoch
            && other.data.target.epoch < self.data.target.epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Epoch;
    use ssz::{Decode, Encode};

    fn attestation_data(source: u64, target: u64) -> AttestationData {
        AttestationData {
            slot: Slot::new(target * 32),
            index: 0,
            beacon_block_root: Hash256::repeat_byte(1),
            source: Checkpoint {
                epoch: Epoch::new(source),
                root: Hash256::repeat_byte(2),
            },
            target: Checkpoint {
                epoch: Epoch::new(target),
                root: Hash256::repeat_byte(3),
            },
        }
    }

    fn indexed(source: u64, target: u64) -> IndexedAttestation {
        IndexedAttestation {
            attesting_indices: VariableList::from(vec![0, 1, 2]),
            data: attestation_data(source, target),
            signature: Signature::empty(),
        }
    }

    #[test]
    fn surround_vote_detection() {
        // (1 => 5) surrounds (2 => 4).
        assert!(indexed(1, 5).is_surround_vote(&indexed(2, 4)));
        assert!(!indexed(2, 4).is_surround_vote(&indexed(1, 5)));
        assert!(!indexed(1, 5).is_surround_vote(&indexed(1, 5)));
    }

    #[test]
    fn indexed_attestation_ssz_round_trip() {
        let attestation = indexed(0, 1);
        let bytes = attestation.as_ssz_bytes();
        assert_eq!(
            IndexedAttestation::from_ssz_bytes(&bytes).unwrap(),
            attestation
        );
    }
}
