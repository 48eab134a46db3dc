use crate::{DST, Error, PublicKey, SECRET_KEY_BYTES_LEN, Signature};
use blst::min_pk as blst_core;
use fixed_bytes::Hash256;

/// A BLS secret key.
///
/// Only used by tests and tooling in this repository; validator keys are managed externally.
pub struct SecretKey {
    point: blst_core::SecretKey,
}

impl SecretKey {
    pub fn random() -> Self {
        let mut ikm = [0; 32];
        rand::fill(&mut ikm[..]);
        let point = blst_core::SecretKey::key_gen(&ikm, &[])
            .expect("32 bytes of entropy is a valid ikm");
        Self { point }
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != SECRET_KEY_BYTES_LEN {
            return Err(Error::InvalidByteLength {
                got: bytes.len(),
                expected: SECRET_KEY_BYTES_LEN,
            });
        }
        let point = blst_core::SecretKey::from_bytes(bytes).map_err(|_| Error::InvalidSecretKey)?;
        Ok(Self { point })
    }

    pub fn serialize(&self) -> [u8; SECRET_KEY_BYTES_LEN] {
        self.point.to_bytes()
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_point(self.point.sk_to_pk())
    }

    pub fn sign(&self, message: Hash256) -> Signature {
        let point = self.point.sign(message.as_slice(), DST, &[]);
        Signature::deserialize(&point.to_bytes()).expect("blst signature is 96 bytes")
    }
}

/// A convenience pairing of a secret key and its public key.
pub struct Keypair {
    pub sk: SecretKey,
    pub pk: PublicKey,
}

impl Keypair {
    pub fn random() -> Self {
        let sk = SecretKey::random();
        let pk = sk.public_key();
        Self { sk, pk }
    }
}
