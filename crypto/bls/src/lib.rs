//! A wrapper around the `blst` BLS12-381 implementation, exposing only the operations the
//! consensus layer needs: key (de)serialization, aggregate signatures and batched
//! signature-set verification.
//!
//! Points are decompressed lazily: a `Signature` or `PublicKeyBytes` read from the wire or the
//! database holds compressed bytes until a verification actually needs the group element.

mod keypair;
mod signature_set;

pub use keypair::{Keypair, SecretKey};
pub use signature_set::{SignatureSet, verify_signature_sets};

use blst::BLST_ERROR;
use blst::min_pk as blst_core;
use fixed_bytes::Hash256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ssz::{Decode, DecodeError, Encode};
use std::fmt;
use std::hash::{Hash, Hasher};
use tree_hash::{PackedEncoding, TreeHash, TreeHashType};

/// The byte-length of a BLS public key when serialized in compressed form.
pub const PUBLIC_KEY_BYTES_LEN: usize = 48;
/// The byte-length of a BLS signature when serialized in compressed form.
pub const SIGNATURE_BYTES_LEN: usize = 96;
/// The byte-length of a BLS secret key.
pub const SECRET_KEY_BYTES_LEN: usize = 32;
/// The compressed bytes of a point-at-infinity signature.
pub const INFINITY_SIGNATURE: [u8; SIGNATURE_BYTES_LEN] = {
    let mut bytes = [0; SIGNATURE_BYTES_LEN];
    bytes[0] = 0xc0;
    bytes
};

/// The domain-separation tag for proof-of-possession signatures, per the consensus spec.
pub const DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// An error was raised from the `blst` library.
    BlstError(u32),
    /// The provided bytes were an incorrect length.
    InvalidByteLength { got: usize, expected: usize },
    /// The secret key bytes do not represent a valid scalar.
    InvalidSecretKey,
    /// The public key is the point at infinity, which the spec forbids.
    InvalidInfinityPublicKey,
}

impl From<BLST_ERROR> for Error {
    fn from(e: BLST_ERROR) -> Self {
        Error::BlstError(e as u32)
    }
}

macro_rules! impl_byte_wrapper_common {
    ($name:ident, $len:expr) => {
        impl $name {
            pub fn serialize(&self) -> [u8; $len] {
                self.bytes
            }

            pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
                if bytes.len() != $len {
                    return Err(Error::InvalidByteLength {
                        got: bytes.len(),
                        expected: $len,
                    });
                }
                let mut array = [0; $len];
                array.copy_from_slice(bytes);
                Ok(Self { bytes: array })
            }

            pub fn as_serialized(&self) -> &[u8; $len] {
                &self.bytes
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.bytes[..] == other.bytes[..]
            }
        }

        impl Eq for $name {}

        impl Hash for $name {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.bytes[..].hash(state);
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
                buf.extend_from_slice(&self.bytes)
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
                Self::deserialize(bytes).map_err(|e| {
                    DecodeError::BytesInvalid(format!("invalid BLS bytes: {:?}", e))
                })
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
                tree_hash::merkle_root(&self.bytes, 0)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&format!("0x{}", hex::encode(self.bytes)))
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let string = String::deserialize(deserializer)?;
                let bytes = hex::decode(string.trim_start_matches("0x"))
                    .map_err(serde::de::Error::custom)?;
                Self::deserialize(&bytes).map_err(|e| {
                    serde::de::Error::custom(format!("invalid BLS bytes: {:?}", e))
                })
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}(0x{})", stringify!($name), hex::encode(self.bytes))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.bytes))
            }
        }
    };
}

/// A compressed BLS public key as it appears on the wire and in the validator registry.
///
/// Decompression is deferred until `decompress` is called.
#[derive(Clone, Copy)]
pub struct PublicKeyBytes {
    bytes: [u8; PUBLIC_KEY_BYTES_LEN],
}

impl_byte_wrapper_common!(PublicKeyBytes, PUBLIC_KEY_BYTES_LEN);

impl PublicKeyBytes {
    pub fn empty() -> Self {
        Self {
            bytes: [0; PUBLIC_KEY_BYTES_LEN],
        }
    }

    /// Decompress and subgroup-check the key.
    pub fn decompress(&self) -> Result<PublicKey, Error> {
        let point = blst_core::PublicKey::key_validate(&self.bytes).map_err(Error::from)?;
        Ok(PublicKey { point })
    }
}

impl From<&PublicKey> for PublicKeyBytes {
    fn from(pk: &PublicKey) -> Self {
        Self {
            bytes: pk.point.to_bytes(),
        }
    }
}

/// A decompressed, subgroup-checked BLS public key.
#[derive(Clone)]
pub struct PublicKey {
    point: blst_core::PublicKey,
}

impl PublicKey {
    pub fn compress(&self) -> PublicKeyBytes {
        PublicKeyBytes::from(self)
    }

    pub(crate) fn point(&self) -> &blst_core::PublicKey {
        &self.point
    }

    pub(crate) fn from_point(point: blst_core::PublicKey) -> Self {
        Self { point }
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.point.to_bytes() == other.point.to_bytes()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey(0x{})", hex::encode(self.point.to_bytes()))
    }
}

/// An aggregate of one or more decompressed public keys.
pub struct AggregatePublicKey {
    point: blst_core::AggregatePublicKey,
}

impl AggregatePublicKey {
    pub fn aggregate(pubkeys: &[&PublicKey]) -> Result<Self, Error> {
        let points = pubkeys.iter().map(|pk| pk.point()).collect::<Vec<_>>();
        let point =
            blst_core::AggregatePublicKey::aggregate(&points, false).map_err(Error::from)?;
        Ok(Self { point })
    }

    pub fn to_public_key(&self) -> PublicKey {
        PublicKey {
            point: self.point.to_public_key(),
        }
    }
}

/// A (possibly aggregate) BLS signature, stored compressed with a lazily-decompressed point.
#[derive(Clone, Copy)]
pub struct Signature {
    bytes: [u8; SIGNATURE_BYTES_LEN],
}

impl_byte_wrapper_common!(Signature, SIGNATURE_BYTES_LEN);

impl Signature {
    /// The all-zero signature used as a placeholder in unsigned containers.
    pub fn empty() -> Self {
        Self {
            bytes: [0; SIGNATURE_BYTES_LEN],
        }
    }

    pub fn infinity() -> Self {
        Self {
            bytes: INFINITY_SIGNATURE,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes == [0; SIGNATURE_BYTES_LEN]
    }

    pub fn is_infinity(&self) -> bool {
        self.bytes == INFINITY_SIGNATURE
    }

    pub(crate) fn decompress(&self) -> Result<blst_core::Signature, Error> {
        blst_core::Signature::sig_validate(&self.bytes, true).map_err(Error::from)
    }

    /// Verify this signature against a single public key.
    ///
    /// Returns `false` for malformed points rather than erroring, matching how an invalid
    /// signature should be treated by callers.
    pub fn verify(&self, pubkey: &PublicKey, message: Hash256) -> bool {
        let Ok(point) = self.decompress() else {
            return false;
        };
        point.verify(true, message.as_slice(), DST, &[], pubkey.point(), false)
            == BLST_ERROR::BLST_SUCCESS
    }

    /// Verify this signature as an aggregate over `pubkeys` of a single `message`.
    pub fn fast_aggregate_verify(&self, pubkeys: &[&PublicKey], message: Hash256) -> bool {
        if pubkeys.is_empty() {
            return false;
        }
        let Ok(point) = self.decompress() else {
            return false;
        };
        let pubkey_points = pubkeys.iter().map(|pk| pk.point()).collect::<Vec<_>>();
        point.fast_aggregate_verify(true, message.as_slice(), DST, &pubkey_points)
            == BLST_ERROR::BLST_SUCCESS
    }
}

/// An aggregate signature under construction.
pub struct AggregateSignature {
    point: Option<blst_core::AggregateSignature>,
}

impl AggregateSignature {
    pub fn infinity() -> Self {
        Self { point: None }
    }

    pub fn add_assign(&mut self, other: &Signature) -> Result<(), Error> {
        let other_point = other.decompress()?;
        match &mut self.point {
            Some(agg) => agg.add_signature(&other_point, false).map_err(Error::from),
            None => {
                self.point = Some(blst_core::AggregateSignature::from_signature(&other_point));
                Ok(())
            }
        }
    }

    pub fn to_signature(&self) -> Signature {
        match &self.point {
            Some(agg) => Signature {
                bytes: agg.to_signature().to_bytes(),
            },
            None => Signature::infinity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fixed_bytes::FixedBytesExtended;

    #[test]
    fn sign_and_verify_single() {
        let keypair = Keypair::random();
        let message = Hash256::from_low_u64_be(42);
        let signature = keypair.sk.sign(message);
        assert!(signature.verify(&keypair.pk, message));
        assert!(!signature.verify(&keypair.pk, Hash256::from_low_u64_be(43)));
    }

    #[test]
    fn empty_signature_does_not_verify() {
        let keypair = Keypair::random();
        let message = Hash256::from_low_u64_be(42);
        assert!(!Signature::empty().verify(&keypair.pk, message));
    }

    #[test]
    fn ssz_round_trip() {
        let keypair = Keypair::random();
        let signature = keypair.sk.sign(Hash256::from_low_u64_be(1));
        let bytes = signature.as_ssz_bytes();
        assert_eq!(bytes.len(), SIGNATURE_BYTES_LEN);
        assert_eq!(Signature::from_ssz_bytes(&bytes).unwrap(), signature);

        let pk_bytes = keypair.pk.compress();
        let ssz = pk_bytes.as_ssz_bytes();
        assert_eq!(PublicKeyBytes::from_ssz_bytes(&ssz).unwrap(), pk_bytes);
    }

    #[test]
    fn aggregate_verifies_with_fast_aggregate() {
        let keypairs = (0..4).map(|_| Keypair::random()).collect::<Vec<_>>();
        let message = Hash256::from_low_u64_be(7);
        let mut agg = AggregateSignature::infinity();
        for keypair in &keypairs {
            agg.add_assign(&keypair.sk.sign(message)).unwrap();
        }
        let pubkeys = keypairs.iter().map(|k| &k.pk).collect::<Vec<_>>();
        assert!(agg.to_signature().fast_aggregate_verify(&pubkeys, message));
    }
}
