pub mod signature_sets;

use crate::common::{get_indexed_attestation, slash_validator};
use crate::{ConsensusContext, ContextError};
use bls::verify_signature_sets;
use ethereum_hashing::hash;
use safe_arith::ArithError;
use signature_sets::{Error as SignatureSetError, block_proposal_signature_set, randao_signature_set};
use types::participation_flags::{
    TIMELY_HEAD_FLAG_INDEX, TIMELY_SOURCE_FLAG_INDEX, TIMELY_TARGET_FLAG_INDEX, add_flag,
};
use types::{
    BeaconState, BeaconStateError, ChainSpec, Epoch, ExecutionBlockHash, Hash256, RelativeEpoch,
    SignedBeaconBlock, Slot,
};

/// The strategy to use when validating a block's signatures.
#[derive(PartialEq, Clone, Copy)]
pub enum BlockSignatureStrategy {
    /// Do not validate any signature. Use with caution.
    NoVerification,
    /// Validate each signature individually, as its object is being processed.
    VerifyIndividual,
    /// Verify all signatures in bulk at the beginning of block processing.
    VerifyBulk,
}

/// The strategy to use when validating a block's `state_root`.
#[derive(PartialEq, Clone, Copy, Debug)]
pub enum VerifyBlockRoot {
    True,
    False,
}

#[derive(PartialEq, Clone, Copy)]
pub enum VerifySignatures {
    /// Validate all signatures encountered.
    True,
    /// Do not validate any signature. Use with caution.
    False,
}

impl VerifySignatures {
    pub fn is_true(self) -> bool {
        self == VerifySignatures::True
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum HeaderInvalid {
    ProposalSignatureInvalid,
    StateSlotMismatch { state_slot: Slot, block_slot: Slot },
    NotLaterThanLatestBlockHeader { block_slot: Slot, latest_header_slot: Slot },
    ProposerIndexMismatch { block_proposer_index: u64, state_proposer_index: u64 },
    ParentBlockRootMismatch { state: Hash256, block: Hash256 },
}

#[derive(Debug, PartialEq, Clone)]
pub enum AttestationInvalid {
    /// Attestation references a target epoch that is neither the previous nor current epoch.
    BadTargetEpoch { target: Epoch },
    /// The target epoch does not match the epoch of the attestation slot.
    TargetEpochSlotMismatch { target: Epoch, slot_epoch: Epoch },
    /// The attestation was included too soon after the slot it attests to.
    IncludedTooEarly { state: Slot, delay: u64, attestation: Slot },
    /// The source checkpoint does not match the state's justified checkpoint.
    WrongJustifiedCheckpoint { state: Box<types::Checkpoint>, attestation: Box<types::Checkpoint> },
    /// The signature over the indexed attestation did not verify.
    BadSignature,
}

#[derive(Debug, PartialEq, Clone)]
pub enum BlockProcessingError {
    HeaderInvalid(HeaderInvalid),
    AttestationInvalid { index: usize, reason: AttestationInvalid },
    ProposerSlashingInvalid { index: usize, reason: String },
    AttesterSlashingInvalid { index: usize, reason: String },
    ExitInvalid { index: usize, reason: String },
    RandaoSignatureInvalid,
    BulkSignatureVerificationFailed,
    ExecutionInvalid(ExecutionInvalid),
    SignatureSet(SignatureSetError),
    Context(ContextError),
    BeaconState(BeaconStateError),
    Arith(ArithError),
}

#[derive(Debug, PartialEq, Clone)]
pub enum ExecutionInvalid {
    ParentHashMismatch {
        state: ExecutionBlockHash,
        payload: ExecutionBlockHash,
    },
    RandaoMismatch {
        state: Hash256,
        payload: Hash256,
    },
}

impl From<BeaconStateError> for BlockProcessingError {
    fn from(e: BeaconStateError) -> Self {
        Self::BeaconState(e)
    }
}

impl From<ArithError> for BlockProcessingError {
    fn from(e: ArithError) -> Self {
        Self::Arith(e)
    }
}

impl From<ContextError> for BlockProcessingError {
    fn from(e: ContextError) -> Self {
        Self::Context(e)
    }
}

impl From<SignatureSetError> for BlockProcessingError {
    fn from(e: SignatureSetError) -> Self {
        Self::SignatureSet(e)
    }
}

/// Updates the state for a new block, whilst validating that the block is valid, optionally
/// checking the block proposer signature.
///
/// The state must already be advanced to the block's slot (see `per_slot_processing`).
pub fn per_block_processing(
    state: &mut BeaconState,
    signed_block: &SignedBeaconBlock,
    block_signature_strategy: BlockSignatureStrategy,
    verify_block_root: VerifyBlockRoot,
    ctxt: &mut ConsensusContext,
    spec: &ChainSpec,
) -> Result<(), BlockProcessingError> {
    let block = signed_block.message();

    state.build_committee_cache(RelativeEpoch::Previous, spec)?;
    state.build_committee_cache(RelativeEpoch::Current, spec)?;

    let verify_signatures = match block_signature_strategy {
        BlockSignatureStrategy::VerifyBulk => {
            // Verify all signatures in the block at once.
            let mut ctxt_for_sets = ConsensusContext::new(block.slot);
            let sets = signature_sets::block_signature_sets(
                state,
                signed_block,
                &mut ctxt_for_sets,
                spec,
            )?;
            if !verify_signature_sets(sets.iter()) {
                return Err(BlockProcessingError::BulkSignatureVerificationFailed);
            }
            VerifySignatures::False
        }
        BlockSignatureStrategy::VerifyIndividual => VerifySignatures::True,
        BlockSignatureStrategy::NoVerification => VerifySignatures::False,
    };

    process_block_header(state, signed_block, verify_signatures, ctxt, spec)?;

    if verify_block_root == VerifyBlockRoot::True {
        // Memoize the (expensive) canonical root so that import uses the verified value.
        ctxt.get_current_block_root(signed_block)?;
    }

    process_randao(state, signed_block, verify_signatures, ctxt, spec)?;
    process_operations(state, signed_block, verify_signatures, ctxt, spec)?;
    process_execution_payload(state, signed_block)?;

    Ok(())
}

pub fn process_block_header(
    state: &mut BeaconState,
    signed_block: &SignedBeaconBlock,
    verify_signatures: VerifySignatures,
    ctxt: &mut ConsensusContext,
    spec: &ChainSpec,
) -> Result<(), BlockProcessingError> {
    let block = signed_block.message();

    // Verify that the slots match.
    if block.slot != state.slot {
        return Err(BlockProcessingError::HeaderInvalid(
            HeaderInvalid::StateSlotMismatch {
                state_slot: state.slot,
                block_slot: block.slot,
            },
        ));
    }

    // Verify that the block is newer than the latest block header.
    if block.slot <= state.latest_block_header.slot {
        return Err(BlockProcessingError::HeaderInvalid(
            HeaderInvalid::NotLaterThanLatestBlockHeader {
                block_slot: block.slot,
                latest_header_slot: state.latest_block_header.slot,
            },
        ));
    }

    // Verify that proposer index is the correct index.
    let state_proposer_index = ctxt.get_proposer_index(state, spec)?;
    if block.proposer_index != state_proposer_index {
        return Err(BlockProcessingError::HeaderInvalid(
            HeaderInvalid::ProposerIndexMismatch {
                block_proposer_index: block.proposer_index,
                state_proposer_index,
            },
        ));
    }

    // Verify that the parent matches.
    let expected_parent = state.latest_block_header.canonical_root();
    if block.parent_root != expected_parent {
        return Err(BlockProcessingError::HeaderInvalid(
            HeaderInvalid::ParentBlockRootMismatch {
                state: expected_parent,
                block: block.parent_root,
            },
        ));
    }

    if verify_signatures.is_true() {
        let block_root = ctxt.get_current_block_root(signed_block)?;
        let set = block_proposal_signature_set(state, signed_block, block_root, spec)?;
        if !set.verify() {
            return Err(BlockProcessingError::HeaderInvalid(
                HeaderInvalid::ProposalSignatureInvalid,
            ));
        }
    }

    state.latest_block_header = block.temporary_block_header();

    Ok(())
}

pub fn process_randao(
    state: &mut BeaconState,
    signed_block: &SignedBeaconBlock,
    verify_signatures: VerifySignatures,
    ctxt: &mut ConsensusContext,
    spec: &ChainSpec,
) -> Result<(), BlockProcessingError> {
    let block = signed_block.message();

    if verify_signatures.is_true() {
        let proposer_index = ctxt.get_proposer_index(state, spec)?;
        let set = randao_signature_set(state, proposer_index as usize, block, spec)?;
        if !set.verify() {
            return Err(BlockProcessingError::RandaoSignatureInvalid);
        }
    }

    // Mix the revealed value into the epoch's randao mix.
    let reveal_hash = Hash256::from_slice(&hash(&block.body.randao_reveal.serialize()));
    state.update_randao_mix(state.current_epoch(), reveal_hash);

    Ok(())
}

pub fn process_operations(
    state: &mut BeaconState,
    signed_block: &SignedBeaconBlock,
    verify_signatures: VerifySignatures,
    ctxt: &mut ConsensusContext,
    spec: &ChainSpec,
) -> Result<(), BlockProcessingError> {
    let body = &signed_block.message().body;

    for (index, proposer_slashing) in body.proposer_slashings.iter().enumerate() {
        let header_1 = &proposer_slashing.signed_header_1.message;
        let header_2 = &proposer_slashing.signed_header_2.message;
        if header_1.slot != header_2.slot || header_1.proposer_index != header_2.proposer_index {
            return Err(BlockProcessingError::ProposerSlashingInvalid {
                index,
                reason: "headers not slashable".into(),
            });
        }
        if header_1 == header_2 {
            return Err(BlockProcessingError::ProposerSlashingInvalid {
                index,
                reason: "identical headers".into(),
            });
        }
        slash_validator(state, header_1.proposer_index as usize)?;
    }

    for (index, attester_slashing) in body.attester_slashings.iter().enumerate() {
        let attestation_1 = &attester_slashing.attestation_1;
        let attestation_2 = &attester_slashing.attestation_2;
        if !attestation_1.is_double_vote(attestation_2)
            && !attestation_1.is_surround_vote(attestation_2)
        {
            return Err(BlockProcessingError::AttesterSlashingInvalid {
                index,
                reason: "attestations not slashable".into(),
            });
        }
        let mut slashed_any = false;
        for attester_index in attestation_1
            .attesting_indices
            .iter()
            .filter(|index| attestation_2.attesting_indices.contains(index))
        {
            let validator = state.get_validator(*attester_index as usize)?;
            if validator.is_slashable_at(state.current_epoch()) {
                slash_validator(state, *attester_index as usize)?;
                slashed_any = true;
            }
        }
        if !slashed_any {
            return Err(BlockProcessingError::AttesterSlashingInvalid {
                index,
                reason: "no slashable indices".into(),
            });
        }
    }

    process_attestations(state, signed_block, verify_signatures, ctxt, spec)?;

    for (index, signed_exit) in body.voluntary_exits.iter().enumerate() {
        let exit = &signed_exit.message;
        let validator = state.get_validator(exit.validator_index as usize)?;
        if !validator.is_active_at(state.current_epoch()) {
            return Err(BlockProcessingError::ExitInvalid {
                index,
                reason: "validator not active".into(),
            });
        }
        if state.current_epoch() < exit.epoch {
            return Err(BlockProcessingError::ExitInvalid {
                index,
                reason: "exit epoch in the future".into(),
            });
        }
        crate::common::initiate_validator_exit(state, exit.validator_index as usize)?;
    }

    for change in body.bls_to_execution_changes.iter() {
        let validator_index = change.message.validator_index as usize;
        let validator = state
            .validators
            .get_mut(validator_index)
            .ok_or(BeaconStateError::UnknownValidator(validator_index))?;
        let mut credentials = [0u8; 32];
        credentials[0] = 0x01;
        credentials[12..].copy_from_slice(change.message.to_execution_address.as_slice());
        validator.withdrawal_credentials = Hash256::from(credentials);
    }

    Ok(())
}

fn process_attestations(
    state: &mut BeaconState,
    signed_block: &SignedBeaconBlock,
    verify_signatures: VerifySignatures,
    ctxt: &mut ConsensusContext,
    spec: &ChainSpec,
) -> Result<(), BlockProcessingError> {
    let body = &signed_block.message().body;

    for (index, attestation) in body.attestations.iter().enumerate() {
        let data = &attestation.data;
        let slot_epoch = data.slot.epoch(types::consts::SLOTS_PER_EPOCH);

        if data.target.epoch != slot_epoch {
            return Err(BlockProcessingError::AttestationInvalid {
                index,
                reason: AttestationInvalid::TargetEpochSlotMismatch {
                    target: data.target.epoch,
                    slot_epoch,
                },
            });
        }
        let (is_current, justified_checkpoint) = if data.target.epoch == state.current_epoch() {
            (true, state.current_justified_checkpoint)
        } else if data.target.epoch == state.previous_epoch() {
            (false, state.previous_justified_checkpoint)
        } else {
            return Err(BlockProcessingError::AttestationInvalid {
                index,
                reason: AttestationInvalid::BadTargetEpoch {
                    target: data.target.epoch,
                },
            });
        };
        if data.source != justified_checkpoint {
            return Err(BlockProcessingError::AttestationInvalid {
                index,
                reason: AttestationInvalid::WrongJustifiedCheckpoint {
                    state: Box::new(justified_checkpoint),
                    attestation: Box::new(data.source),
                },
            });
        }
        if state.slot < data.slot + spec.min_attestation_inclusion_delay {
            return Err(BlockProcessingError::AttestationInvalid {
                index,
                reason: AttestationInvalid::IncludedTooEarly {
                    state: state.slot,
                    delay: spec.min_attestation_inclusion_delay,
                    attestation: data.slot,
                },
            });
        }

        let indexed_attestation = get_indexed_attestation(state, attestation)?;

        if verify_signatures.is_true() {
            let set = signature_sets::indexed_attestation_signature_set(
                state,
                &indexed_attestation.signature,
                &indexed_attestation,
                spec,
            )?;
            if !set.verify() {
                return Err(BlockProcessingError::AttestationInvalid {
                    index,
                    reason: AttestationInvalid::BadSignature,
                });
            }
        }

        // Award participation flags. The head flag is approximated by target correctness at
        // minimal inclusion distance; rewards are out of scope for this node.
        let target_matches = data.target.root
            == state
                .get_block_root_at_epoch(data.target.epoch)
                .unwrap_or(data.target.root);
        let head_timely =
            target_matches && state.slot == data.slot + spec.min_attestation_inclusion_delay;

        let participation = if is_current {
            &mut state.current_epoch_participation
        } else {
            &mut state.previous_epoch_participation
        };
        for validator_index in indexed_attestation.attesting_indices.iter() {
            let flags = participation
                .get_mut(*validator_index as usize)
                .ok_or(BeaconStateError::UnknownValidator(*validator_index as usize))?;
            let mut new_flags = add_flag(*flags, TIMELY_SOURCE_FLAG_INDEX)?;
            if target_matches {
                new_flags = add_flag(new_flags, TIMELY_TARGET_FLAG_INDEX)?;
            }
            if head_timely {
                new_flags = add_flag(new_flags, TIMELY_HEAD_FLAG_INDEX)?;
            }
            *flags = new_flags;
        }

        ctxt.add_indexed_attestation(indexed_attestation);
    }

    Ok(())
}

pub fn process_execution_payload(
    state: &mut BeaconState,
    signed_block: &SignedBeaconBlock,
) -> Result<(), BlockProcessingError> {
    let payload = &signed_block.message().body.execution_payload;

    // The anchor state in tests may carry an empty header; only enforce continuity once an
    // execution payload has been recorded.
    let latest_hash = state.latest_execution_payload_header.block_hash;
    if latest_hash != ExecutionBlockHash::zero() && payload.parent_hash != latest_hash {
        return Err(BlockProcessingError::ExecutionInvalid(
            ExecutionInvalid::ParentHashMismatch {
                state: latest_hash,
                payload: payload.parent_hash,
            },
        ));
    }

    state.latest_execution_payload_header = payload.to_header();
    Ok(())
}

/// Convert a KZG commitment to the versioned hash the execution layer uses to reference the
/// blob.
pub fn kzg_commitment_to_versioned_hash(commitment: &types::KzgCommitment) -> types::VersionedHash {
    commitment.calculate_versioned_hash()
}
