use ethereum_hashing::hash;
use fixed_bytes::Hash256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ssz::{Decode, DecodeError, Encode};
use std::fmt;
use std::hash::{Hash, Hasher};
use tree_hash::{PackedEncoding, TreeHash, TreeHashType};

/// The byte prefix of a blob versioned hash.
pub const VERSIONED_HASH_VERSION_KZG: u8 = 0x01;

pub const BYTES_PER_COMMITMENT: usize = 48;
pub const BYTES_PER_PROOF: usize = 48;

macro_rules! impl_kzg_bytes {
    ($name:ident, $len:expr) => {
        #[derive(Clone, Copy)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub fn empty() -> Self {
                Self([0; $len])
            }

            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }
        }

        impl From<$name> for c_kzg::Bytes48 {
            fn from(value: $name) -> Self {
                value.0.into()
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(value: [u8; $len]) -> Self {
                Self(value)
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.0[..] == other.0[..]
            }
        }

        impl Eq for $name {}

        impl Hash for $name {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.0[..].hash(state);
            }
        }

        impl Encode for $name {
            fn is_ssz_fixed_len() -> bool {
                true
            }

            fn ssz_fixed_len() -> usize {
                $len
            }

            fn ssz_bytes_len(&self) -> usize {
                $len
            }

            fn ssz_append(&self, buf: &mut Vec<u8>) {
                buf.extend_from_slice(&self.0)
            }
        }

        impl Decode for $name {
            fn is_ssz_fixed_len() -> bool {
                true
            }

            fn ssz_fixed_len() -> usize {
                $len
            }

            fn from_ssz_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
                if bytes.len() != $len {
                    return Err(DecodeError::InvalidByteLength {
                        len: bytes.len(),
                        expected: $len,
                    });
                }
                let mut array = [0; $len];
                array.copy_from_slice(bytes);
                Ok(Self(array))
            }
        }

        impl TreeHash for $name {
            fn tree_hash_type() -> TreeHashType {
                TreeHashType::Vector
            }

            fn tree_hash_packed_encoding(&self) -> PackedEncoding {
                unreachable!("Vector should never be packed.")
            }

            fn tree_hash_packing_factor() -> usize {
                unreachable!("Vector should never be packed.")
            }

            fn tree_hash_root(&self) -> tree_hash::Hash256 {
                tree_hash::merkle_root(&self.0, 0)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let string = String::deserialize(deserializer)?;
                let bytes = hex::decode(string.trim_start_matches("0x"))
                    .map_err(serde::de::Error::custom)?;
                if bytes.len() != $len {
                    return Err(serde::de::Error::custom(format!(
                        "invalid byte length {}",
                        bytes.len()
                    )));
                }
                let mut array = [0; $len];
                array.copy_from_slice(&bytes);
                Ok(Self(array))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}(0x{})", stringify!($name), hex::encode(self.0))
            }
        }
    };
}

impl_kzg_bytes!(KzgCommitment, BYTES_PER_COMMITMENT);
impl_kzg_bytes!(KzgProof, BYTES_PER_PROOF);

impl KzgCommitment {
    /// Compute the versioned hash referenced by execution-layer blob transactions.
    pub fn calculate_versioned_hash(&self) -> Hash256 {
        let mut versioned_hash = hash(&self.0);
        versioned_hash[0] = VERSIONED_HASH_VERSION_KZG;
        Hash256::from_slice(&versioned_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versioned_hash_has_kzg_prefix() {
        let commitment = KzgCommitment::empty();
        let hash = commitment.calculate_versioned_hash();
        assert_eq!(hash.as_slice()[0], VERSIONED_HASH_VERSION_KZG);
    }

    #[test]
    fn display_is_prefixed_hex() {
        let proof = KzgProof::empty();
        assert!(proof.to_string().starts_with("0x0000"));
        assert_eq!(proof.to_string().len(), 2 + 2 * BYTES_PER_PROOF);
    }
}
