//! A `SignatureSet` is a signature and a collection of public keys that sign it. This module
//! contains functions for descending a `SignedBeaconBlock` into the individual sets it
//! contains, so they can be verified in a single batch.

use crate::ConsensusContext;
use bls::{PublicKey, SignatureSet};
use std::borrow::Cow;
use types::{
    BeaconState, BeaconStateError, ChainSpec, Domain, Hash256, IndexedAttestation,
    SignedBeaconBlock, SignedBeaconBlockHeader, SignedRoot,
    consts::SLOTS_PER_EPOCH,
};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, PartialEq, Clone)]
pub enum Error {
    /// Signature verification failed. The block is invalid.
    SignatureInvalid,
    /// There was an error attempting to read from a `BeaconState`. Block validity was not
    /// determined.
    BeaconStateError(BeaconStateError),
    /// A validator index referenced by the block was out of the registry's bounds.
    ValidatorUnknown(u64),
    /// The public key bytes stored in the registry failed to decompress.
    BadBlsBytes { validator_index: u64 },
}

impl From<BeaconStateError> for Error {
    fn from(e: BeaconStateError) -> Error {
        Error::BeaconStateError(e)
    }
}

/// Decompress the public key of `validator_index` from the state registry.
fn validator_pubkey(state: &BeaconState, validator_index: u64) -> Result<Cow<'static, PublicKey>> {
    let validator = state
        .validators
        .get(validator_index as usize)
        .ok_or(Error::ValidatorUnknown(validator_index))?;
    validator
        .pubkey
        .decompress()
        .map(Cow::Owned)
        .map_err(|_| Error::BadBlsBytes { validator_index })
}

/// A signature set that is valid if a block was signed by the expected block producer.
pub fn block_proposal_signature_set<'a>(
    state: &BeaconState,
    signed_block: &'a SignedBeaconBlock,
    block_root: Hash256,
    spec: &ChainSpec,
) -> Result<SignatureSet<'a>> {
    let block = signed_block.message();
    let proposer_index = block.proposer_index;

    let domain = spec.get_domain(
        block.epoch(),
        Domain::BeaconProposer,
        &state.fork,
        state.genesis_validators_root,
    );
    let message = block_root.signing_root(domain);

    Ok(SignatureSet::single_pubkey(
        Cow::Borrowed(&signed_block.signature),
        validator_pubkey(state, proposer_index)?,
        message,
    ))
}

/// A signature set that is valid if a block header was signed by the stated proposer.
pub fn block_header_signature_set<'a>(
    state: &BeaconState,
    signed_header: &'a SignedBeaconBlockHeader,
    spec: &ChainSpec,
) -> Result<SignatureSet<'a>> {
    let domain = spec.get_domain(
        signed_header.message.slot.epoch(SLOTS_PER_EPOCH),
        Domain::BeaconProposer,
        &state.fork,
        state.genesis_validators_root,
    );
    let message = signed_header.message.signing_root(domain);

    Ok(SignatureSet::single_pubkey(
        Cow::Borrowed(&signed_header.signature),
        validator_pubkey(state, signed_header.message.proposer_index)?,
        message,
    ))
}

/// A signature set that is valid if the block proposers randao reveal signature is correct.
pub fn randao_signature_set<'a>(
    state: &BeaconState,
    proposer_index: usize,
    block: &'a types::BeaconBlock,
    spec: &ChainSpec,
) -> Result<SignatureSet<'a>> {
    let domain = spec.get_domain(
        block.epoch(),
        Domain::Randao,
        &state.fork,
        state.genesis_validators_root,
    );
    let message = block.epoch().signing_root(domain);

    Ok(SignatureSet::single_pubkey(
        Cow::Borrowed(&block.body.randao_reveal),
        validator_pubkey(state, proposer_index as u64)?,
        message,
    ))
}

/// A signature set for the aggregate signature of an indexed attestation.
pub fn indexed_attestation_signature_set<'a>(
    state: &BeaconState,
    signature: &'a bls::Signature,
    indexed_attestation: &IndexedAttestation,
    spec: &ChainSpec,
) -> Result<SignatureSet<'a>> {
    let mut pubkeys = Vec::with_capacity(indexed_attestation.attesting_indices.len());
    for &validator_index in indexed_attestation.attesting_indices.iter() {
        pubkeys.push(validator_pubkey(state, validator_index)?);
    }

    let domain = spec.get_domain(
        indexed_attestation.data.target.epoch,
        Domain::BeaconAttester,
        &state.fork,
        state.genesis_validators_root,
    );
    let message = indexed_attestation.data.signing_root(domain);

    Ok(SignatureSet::multiple_pubkeys(
        Cow::Borrowed(signature),
        pubkeys,
        message,
    ))
}

/// The two signature sets of a proposer slashing.
pub fn proposer_slashing_signature_sets<'a>(
    state: &BeaconState,
    proposer_slashing: &'a types::ProposerSlashing,
    spec: &ChainSpec,
) -> Result<(SignatureSet<'a>, SignatureSet<'a>)> {
    Ok((
        block_header_signature_set(state, &proposer_slashing.signed_header_1, spec)?,
        block_header_signature_set(state, &proposer_slashing.signed_header_2, spec)?,
    ))
}

/// A signature set for a voluntary exit.
pub fn exit_signature_set<'a>(
    state: &BeaconState,
    signed_exit: &'a types::SignedVoluntaryExit,
    spec: &ChainSpec,
) -> Result<SignatureSet<'a>> {
    let exit = &signed_exit.message;
    let domain = spec.get_domain(
        exit.epoch,
        Domain::VoluntaryExit,
        &state.fork,
        state.genesis_validators_root,
    );
    let message = exit.signing_root(domain);

    Ok(SignatureSet::single_pubkey(
        Cow::Borrowed(&signed_exit.signature),
        validator_pubkey(state, exit.validator_index)?,
        message,
    ))
}

/// A signature set for a BLS-to-execution credential change, signed by the old BLS key.
pub fn bls_execution_change_signature_set<'a>(
    state: &BeaconState,
    signed_change: &'a types::SignedBlsToExecutionChange,
    spec: &ChainSpec,
) -> Result<SignatureSet<'a>> {
    // The message is signed with the genesis fork version regardless of the current fork.
    let domain = spec.compute_domain(
        Domain::BlsToExecutionChange,
        spec.genesis_fork_version,
        state.genesis_validators_root,
    );
    let message = signed_change.message.signing_root(domain);
    let pubkey = signed_change
        .message
        .from_bls_pubkey
        .decompress()
        .map_err(|_| Error::BadBlsBytes {
            validator_index: signed_change.message.validator_index,
        })?;

    Ok(SignatureSet::single_pubkey(
        Cow::Borrowed(&signed_change.signature),
        Cow::Owned(pubkey),
        message,
    ))
}

/// Collect every signature set in a block, for bulk verification.
///
/// Includes: the proposal itself, randao, each attestation's aggregate, both halves of each
/// proposer slashing, each attester slashing's aggregates, voluntary exits and
/// BLS-to-execution changes.
pub fn block_signature_sets<'a>(
    state: &BeaconState,
    signed_block: &'a SignedBeaconBlock,
    ctxt: &mut ConsensusContext,
    spec: &ChainSpec,
) -> Result<Vec<SignatureSet<'a>>> {
    let block = signed_block.message();
    let body = &block.body;

    let mut sets = Vec::with_capacity(
        2 + body.attestations.len()
            + 2 * body.proposer_slashings.len()
            + 2 * body.attester_slashings.len()
            + body.voluntary_exits.len()
            + body.bls_to_execution_changes.len(),
    );

    let block_root = ctxt.get_current_block_root(signed_block).map_err(|_| {
        Error::BeaconStateError(BeaconStateError::SlotOutOfBounds)
    })?;
    sets.push(block_proposal_signature_set(
        state,
        signed_block,
        block_root,
        spec,
    )?);

    let proposer_index = block.proposer_index as usize;
    sets.push(randao_signature_set(state, proposer_index, block, spec)?);

    for attestation in body.attestations.iter() {
        let indexed = crate::common::get_indexed_attestation(state, attestation)?;
        let set = indexed_attestation_signature_set(state, &attestation.signature, &indexed, spec)?;
        // The set borrows the attestation's signature; the pubkeys are owned.
        sets.push(set);
    }

    for proposer_slashing in body.proposer_slashings.iter() {
        let (set_1, set_2) = proposer_slashing_signature_sets(state, proposer_slashing, spec)?;
        sets.push(set_1);
        sets.push(set_2);
    }

    for attester_slashing in body.attester_slashings.iter() {
        for indexed in [
            &attester_slashing.attestation_1,
            &attester_slashing.attestation_2,
        ] {
            sets.push(indexed_attestation_signature_set(
                state,
                &indexed.signature,
                indexed,
                spec,
            )?);
        }
    }

    for signed_exit in body.voluntary_exits.iter() {
        sets.push(exit_signature_set(state, signed_exit, spec)?);
    }

    for signed_change in body.bls_to_execution_changes.iter() {
        sets.push(bls_execution_change_signature_set(state, signed_change, spec)?);
    }

    Ok(sets)
}
