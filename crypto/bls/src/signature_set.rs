use crate::{AggregatePublicKey, DST, PublicKey, Signature};
use blst::min_pk as blst_core;
use blst::{BLST_ERROR, blst_scalar, blst_scalar_from_uint64};
use fixed_bytes::Hash256;
use std::borrow::Cow;

/// Number of random bits used per signature set during batch verification.
const RAND_BITS: usize = 64;

/// A `(signature, pubkeys, message)` triple ready for (batch) verification.
///
/// When `signing_keys` contains more than one key the signature is treated as an aggregate over
/// a common message (e.g. an attestation's indexed committee).
#[derive(Clone)]
pub struct SignatureSet<'a> {
    pub signature: Cow<'a, Signature>,
    pub signing_keys: Vec<Cow<'a, PublicKey>>,
    pub message: Hash256,
}

impl<'a> SignatureSet<'a> {
    pub fn single_pubkey(
        signature: Cow<'a, Signature>,
        signing_key: Cow<'a, PublicKey>,
        message: Hash256,
    ) -> Self {
        Self {
            signature,
            signing_keys: vec![signing_key],
            message,
        }
    }

    pub fn multiple_pubkeys(
        signature: Cow<'a, Signature>,
        signing_keys: Vec<Cow<'a, PublicKey>>,
        message: Hash256,
    ) -> Self {
        Self {
            signature,
            signing_keys,
            message,
        }
    }

    /// Verify this set on its own.
    pub fn verify(&self) -> bool {
        let pubkeys = self.signing_keys.iter().map(Cow::as_ref).collect::<Vec<_>>();
        self.signature.fast_aggregate_verify(&pubkeys, self.message)
    }

    /// Collapse the signing keys into a single aggregate key.
    fn aggregate_pubkey(&self) -> Option<PublicKey> {
        let pubkeys = self.signing_keys.iter().map(Cow::as_ref).collect::<Vec<_>>();
        AggregatePublicKey::aggregate(&pubkeys)
            .ok()
            .map(|agg| agg.to_public_key())
    }
}

/// Verify a batch of signature sets using a random linear combination.
///
/// This is notably faster than calling `SignatureSet::verify` on each set. It is an
/// all-or-nothing operation: `false` means at least one set is invalid but does not identify
/// the culprit.
pub fn verify_signature_sets<'a>(
    signature_sets: impl ExactSizeIterator<Item = &'a SignatureSet<'a>>,
) -> bool {
    let sets = signature_sets.collect::<Vec<_>>();
    if sets.is_empty() {
        return false;
    }
    // A single set gains nothing from the batch machinery.
    if sets.len() == 1 {
        return sets[0].verify();
    }

    let mut messages: Vec<Hash256> = Vec::with_capacity(sets.len());
    let mut signature_points: Vec<blst_core::Signature> = Vec::with_capacity(sets.len());
    let mut pubkey_points: Vec<blst_core::PublicKey> = Vec::with_capacity(sets.len());
    let mut rands: Vec<blst_scalar> = Vec::with_capacity(sets.len());

    for set in &sets {
        if set.signing_keys.is_empty() {
            return false;
        }
        let Ok(signature) = set.signature.decompress() else {
            return false;
        };
        let Some(aggregate) = set.aggregate_pubkey() else {
            return false;
        };

        messages.push(set.message);
        signature_points.push(signature);
        pubkey_points.push(aggregate.point().clone());

        // A random non-zero scalar prevents an attacker from crafting sets that cancel each
        // other out in the linear combination.
        let mut vals = [0u64; 4];
        while vals[0] == 0 {
            vals[0] = rand::random();
        }
        let mut rand = std::mem::MaybeUninit::<blst_scalar>::uninit();
        // SAFETY: `blst_scalar_from_uint64` fully initialises the scalar from the 4 limbs.
        unsafe {
            blst_scalar_from_uint64(rand.as_mut_ptr(), vals.as_ptr());
            rands.push(rand.assume_init());
        }
    }

    let message_refs = messages.iter().map(|m| m.as_slice()).collect::<Vec<_>>();
    let signature_refs = signature_points.iter().collect::<Vec<_>>();
    let pubkey_refs = pubkey_points.iter().collect::<Vec<_>>();

    blst_core::Signature::verify_multiple_aggregate_signatures(
        &message_refs,
        DST,
        &pubkey_refs,
        false,
        &signature_refs,
        true,
        &rands,
        RAND_BITS,
    ) == BLST_ERROR::BLST_SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Keypair;
    use fixed_bytes::FixedBytesExtended;

    fn signed_set(keypair: &Keypair, message: Hash256) -> SignatureSet<'static> {
        SignatureSet::single_pubkey(
            Cow::Owned(keypair.sk.sign(message)),
            Cow::Owned(keypair.pk.clone()),
            message,
        )
    }

    #[test]
    fn batch_of_valid_sets_verifies() {
        let keypairs = (0..3).map(|_| Keypair::random()).collect::<Vec<_>>();
        let sets = keypairs
            .iter()
            .enumerate()
            .map(|(i, keypair)| signed_set(keypair, Hash256::from_low_u64_be(i as u64)))
            .collect::<Vec<_>>();
        assert!(verify_signature_sets(sets.iter()));
    }

    #[test]
    fn batch_with_one_bad_set_fails() {
        let keypairs = (0..3).map(|_| Keypair::random()).collect::<Vec<_>>();
        let mut sets = keypairs
            .iter()
            .enumerate()
            .map(|(i, keypair)| signed_set(keypair, Hash256::from_low_u64_be(i as u64)))
            .collect::<Vec<_>>();
        // Tamper with one message after signing.
        sets[1].message = Hash256::from_low_u64_be(999);
        assert!(!verify_signature_sets(sets.iter()));
    }

    #[test]
    fn empty_batch_fails() {
        let empty: [SignatureSet; 0] = [];
        assert!(!verify_signature_sets(empty.iter()));
    }
}
