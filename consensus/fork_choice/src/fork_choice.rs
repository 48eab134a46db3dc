use crate::ForkChoiceStore;
use crate::metrics;
use proto_array::{
    Block as ProtoBlock, DataAvailabilityStatus, DisallowedReOrgOffsets, ExecutionStatus,
    InvalidationOperation, JustifiedBalances, ProposerHeadError, ProposerHeadInfo,
    ProtoArrayForkChoice, ReOrgThreshold,
};
use ssz::{Decode, Encode};
use ssz_derive::{Decode, Encode};
use state_processing::per_epoch_processing::EpochProcessingError;
use state_processing::process_justification_and_finalization;
use std::time::Duration;
use superstruct::superstruct;
use tracing::{debug, warn};
use types::consts::SLOTS_PER_EPOCH;
use types::{
    BeaconState, BeaconStateError, ChainSpec, Checkpoint, Epoch, ExecutionBlockHash,
    FixedBytesExtended, Hash256, IndexedAttestation, SignedBeaconBlock, Slot,
};

#[derive(Debug)]
pub enum Error<T> {
    InvalidAttestation(InvalidAttestation),
    InvalidBlock(InvalidBlock),
    ProtoArrayError(proto_array::Error),
    InvalidProtoArrayBytes(proto_array::Error),
    FailedToProcessInvalidExecutionPayload(proto_array::Error),
    FailedToProcessValidExecutionPayload(proto_array::Error),
    MissingProtoArrayBlock(Hash256),
    InconsistentOnTick {
        previous_slot: Slot,
        time: Slot,
    },
    BeaconStateError(BeaconStateError),
    AttemptToRevertJustification {
        store: Slot,
        state: Slot,
    },
    ForkChoiceStoreError(T),
    UnableToSetJustifiedCheckpoint(T),
    AfterBlockFailed(T),
    InvalidAnchor {
        block_slot: Slot,
        state_slot: Slot,
    },
    InvalidPayloadStatus {
        block_slot: Slot,
        block_root: Hash256,
        payload_verification_status: PayloadVerificationStatus,
    },
    MissingJustifiedBlock {
        justified_checkpoint: Checkpoint,
    },
    MissingFinalizedBlock {
        finalized_checkpoint: Checkpoint,
    },
    UnrealizedVoteProcessing(EpochProcessingError),
    ProposerHeadError(T),
}

impl<T> From<InvalidAttestation> for Error<T> {
    fn from(e: InvalidAttestation) -> Self {
        Error::InvalidAttestation(e)
    }
}

impl<T> From<EpochProcessingError> for Error<T> {
    fn from(e: EpochProcessingError) -> Self {
        Error::UnrealizedVoteProcessing(e)
    }
}

impl<T> From<BeaconStateError> for Error<T> {
    fn from(e: BeaconStateError) -> Self {
        Error::BeaconStateError(e)
    }
}

impl<T> From<proto_array::Error> for Error<T> {
    fn from(e: proto_array::Error) -> Self {
        Error::ProtoArrayError(e)
    }
}

#[derive(Debug)]
pub enum InvalidBlock {
    UnknownParent(Hash256),
    FutureSlot {
        current_slot: Slot,
        block_slot: Slot,
    },
    FinalizedSlot {
        finalized_slot: Slot,
        block_slot: Slot,
    },
    NotLaterThanParent {
        parent_slot: Slot,
        block_slot: Slot,
    },
    NotFinalizedDescendant {
        finalized_root: Hash256,
        block_ancestor: Option<Hash256>,
    },
}

#[derive(Debug)]
pub enum InvalidAttestation {
    /// The attestations aggregation bits were empty when they shouldn't be.
    EmptyAggregationBitfield,
    /// The `attestation.data.beacon_block_root` block is unknown.
    UnknownHeadBlock { beacon_block_root: Hash256 },
    /// The `attestation.data.slot` is not from the same epoch as `data.target.epoch` and
    /// therefore the attestation is invalid.
    BadTargetEpoch { target: Epoch, slot: Slot },
    /// The target root of the attestation points to a block that we have not verified.
    UnknownTargetRoot(Hash256),
    /// The attestation is for an epoch in the future (with respect to the gossip clock
    /// disparity).
    FutureEpoch {
        attestation_epoch: Epoch,
        current_epoch: Epoch,
    },
    /// The attestation is for an epoch in the past (with respect to the gossip clock
    /// disparity).
    PastEpoch {
        attestation_epoch: Epoch,
        current_epoch: Epoch,
    },
    /// The attestation references a target root that does not match what is stored in our
    /// database.
    InvalidTarget {
        attestation: Hash256,
        local: Hash256,
    },
    /// The attestation is attesting to a state that is later than itself. (Viz., attesting to
    /// the future).
    AttestsToFutureBlock { block: Slot, attestation: Slot },
}

/// Indicates if a block has been verified by an execution payload.
///
/// There is no variant for "invalid", since such a block should never be added to fork choice.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PayloadVerificationStatus {
    /// An EL has declared the execution payload to be valid.
    Verified,
    /// An EL has not yet made a determination about the execution payload.
    Optimistic,
    /// The block is either pre-merge-fork, or prior to the terminal PoW block.
    Irrelevant,
}

impl PayloadVerificationStatus {
    /// Returns `true` if the payload was optimistically imported.
    pub fn is_optimistic(&self) -> bool {
        matches!(self, PayloadVerificationStatus::Optimistic)
    }
}

/// Calculate how far `slot` lies from the start of its epoch.
///
/// ## Specification
///
/// Equivalent to:
///
/// https://github.com/ethereum/eth2.0-specs/blob/v0.12.1/specs/phase0/fork-choice.md#compute_slots_since_epoch_start
pub fn compute_slots_since_epoch_start(slot: Slot) -> Slot {
    slot - slot.epoch(SLOTS_PER_EPOCH).start_slot(SLOTS_PER_EPOCH)
}

/// Calculate the first slot in `epoch`.
fn compute_start_slot_at_epoch(epoch: Epoch) -> Slot {
    epoch.start_slot(SLOTS_PER_EPOCH)
}

/// Used for queuing attestations from the current slot. Only contains the minimum necessary
/// information about the attestation.
#[derive(Clone, PartialEq, Debug, Encode, Decode)]
pub struct QueuedAttestation {
    slot: Slot,
    attesting_indices: Vec<u64>,
    block_root: Hash256,
    target_epoch: Epoch,
}

impl From<&IndexedAttestation> for QueuedAttestation {
    fn from(a: &IndexedAttestation) -> Self {
        Self {
            slot: a.data.slot,
            attesting_indices: a.attesting_indices.iter().copied().collect(),
            block_root: a.data.beacon_block_root,
            target_epoch: a.data.target.epoch,
        }
    }
}

/// Returns all values in `self.queued_attestations` that have a slot that is earlier than the
/// current slot. Also removes those values from `self.queued_attestations`.
fn dequeue_attestations(
    current_slot: Slot,
    queued_attestations: &mut Vec<QueuedAttestation>,
) -> Vec<QueuedAttestation> {
    let remaining = queued_attestations.split_off(
        queued_attestations
            .iter()
            .position(|a| a.slot >= current_slot)
            .unwrap_or(queued_attestations.len()),
    );

    metrics::FORK_CHOICE_DEQUEUED_ATTESTATIONS
        .as_ref()
        .map(|counter| counter.inc_by(queued_attestations.len() as u64))
        .unwrap_or(());

    std::mem::replace(queued_attestations, remaining)
}

/// Denotes whether an attestation we are processing was received from a block or from gossip.
#[derive(Clone, Copy)]
pub enum AttestationFromBlock {
    True,
    False,
}

/// Parameters which are cached between calls to `ForkChoice::get_head`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForkchoiceUpdateParameters {
    /// The most recent result of running `ForkChoice::get_head`.
    pub head_root: Hash256,
    pub head_hash: Option<ExecutionBlockHash>,
    pub justified_hash: Option<ExecutionBlockHash>,
    pub finalized_hash: Option<ExecutionBlockHash>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ForkChoiceView {
    pub head_block_root: Hash256,
    pub justified_checkpoint: Checkpoint,
    pub finalized_checkpoint: Checkpoint,
}

/// Provides an implementation of "Ethereum 2.0 Phase 0 -- Beacon Chain Fork Choice":
///
/// https://github.com/ethereum/eth2.0-specs/blob/v0.12.1/specs/phase0/fork-choice.md
///
/// ## Detail
///
/// This struct wraps `ProtoArrayForkChoice` and provides:
///
/// - Management of the justified state and caching of balances.
/// - Queuing of attestations from the current slot.
pub struct ForkChoice<T> {
    /// Storage for `ForkChoice`, modelled off the spec `Store` object.
    fc_store: T,
    /// The underlying representation of the block DAG.
    proto_array: ProtoArrayForkChoice,
    /// Attestations that arrived at the current slot and must be queued for later processing.
    queued_attestations: Vec<QueuedAttestation>,
    /// Stores a cache of the values required to be sent to the execution layer.
    forkchoice_update_parameters: ForkchoiceUpdateParameters,
    /// The most recent result of running `Self::get_head`.
    head_block_root: Hash256,
}

impl<T, E> ForkChoice<T>
where
    T: ForkChoiceStore<Error = E>,
    E: std::fmt::Debug,
{
    /// Instantiates `Self` from an anchor (genesis or another trusted checkpoint).
    pub fn from_anchor(
        fc_store: T,
        anchor_block_root: Hash256,
        anchor_block: &SignedBeaconBlock,
        anchor_state: &BeaconState,
        current_slot: Option<Slot>,
        spec: &ChainSpec,
    ) -> Result<Self, Error<E>> {
        // Sanity check: the anchor must be at the same slot as the state it was produced from.
        if anchor_block.slot() != anchor_state.slot {
            return Err(Error::InvalidAnchor {
                block_slot: anchor_block.slot(),
                state_slot: anchor_state.slot,
            });
        }

        let finalized_block_slot = anchor_block.slot();
        let finalized_block_state_root = anchor_block.state_root();

        let checkpoint = Checkpoint {
            epoch: anchor_state.current_epoch(),
            root: anchor_block_root,
        };

        let execution_status = if anchor_state
            .latest_execution_payload_header
            .block_hash
            != ExecutionBlockHash::zero()
        {
            // Assume that this payload is valid, since the anchor should be a trusted block and
            // state.
            ExecutionStatus::Valid(anchor_state.latest_execution_payload_header.block_hash)
        } else {
            ExecutionStatus::irrelevant()
        };

        // If the current slot is not provided, use the value that was last provided to the
        // store.
        let current_slot = current_slot.unwrap_or_else(|| fc_store.get_current_slot());

        let proto_array = ProtoArrayForkChoice::new(
            current_slot,
            finalized_block_slot,
            finalized_block_state_root,
            checkpoint,
            checkpoint,
            execution_status,
        )?;

        let mut fork_choice = Self {
            fc_store,
            proto_array,
            queued_attestations: vec![],
            forkchoice_update_parameters: ForkchoiceUpdateParameters {
                head_root: Hash256::zero(),
                head_hash: None,
                justified_hash: None,
                finalized_hash: None,
            },
            head_block_root: anchor_block_root,
        };

        // Ensure that `fork_choice.head_block_root` is updated.
        fork_choice.get_head(current_slot, spec)?;

        Ok(fork_choice)
    }

    /// Instantiates `Self` from some existing components.
    pub fn from_components(
        fc_store: T,
        proto_array: ProtoArrayForkChoice,
        queued_attestations: Vec<QueuedAttestation>,
    ) -> Self {
        let head_block_root = proto_array.justified_checkpoint().root;
        Self {
            fc_store,
            proto_array,
            queued_attestations,
            forkchoice_update_parameters: ForkchoiceUpdateParameters {
                head_root: Hash256::zero(),
                head_hash: None,
                justified_hash: None,
                finalized_hash: None,
            },
            head_block_root,
        }
    }

    /// Returns cached information that can be used to issue a `forkchoiceUpdated` message to an
    /// execution engine.
    ///
    /// These values are updated each time `Self::get_head` is called.
    pub fn get_forkchoice_update_parameters(&self) -> ForkchoiceUpdateParameters {
        self.forkchoice_update_parameters
    }

    /// Returns the block root of an ancestor of `block_root` at the given `slot`.
    ///
    /// If `slot` is greater than or equal to the block's slot, the block's own root is returned.
    pub fn get_ancestor(
        &self,
        block_root: Hash256,
        slot: Slot,
    ) -> Result<Option<Hash256>, Error<E>> {
        let block = self
            .proto_array
            .get_block(&block_root)
            .ok_or(Error::MissingProtoArrayBlock(block_root))?;

        if block.slot <= slot {
            Ok(Some(block_root))
        } else {
            Ok(self.proto_array.get_ancestor_at_slot(block_root, slot))
        }
    }

    /// Run the fork choice rule to determine the head.
    ///
    /// ## Specification
    ///
    /// Is equivalent to `get_head` in the fork choice spec, with the addition of updating the
    /// cached FCU parameters.
    pub fn get_head(&mut self, current_slot: Slot, spec: &ChainSpec) -> Result<Hash256, Error<E>> {
        // Provide the slot (as per the system clock) to the `fc_store` and then return its view
        // of the current slot.
        self.update_time(current_slot)?;

        let timer = metrics::FORK_CHOICE_FIND_HEAD_TIMES
            .as_ref()
            .ok()
            .map(|histogram| histogram.start_timer());

        let store = &mut self.fc_store;

        let head_root = self.proto_array.find_head(
            *store.justified_checkpoint(),
            *store.finalized_checkpoint(),
            store.justified_balances(),
            store.proposer_boost_root(),
            store.equivocating_indices(),
            current_slot,
            spec,
        )?;

        drop(timer);

        if head_root != self.head_block_root {
            metrics::FORK_CHOICE_CHANGED_HEAD_TOTAL
                .as_ref()
                .map(|counter| counter.inc())
                .unwrap_or(());
        }
        self.head_block_root = head_root;

        // Cache the FCU message parameters.
        let head_hash = self
            .get_block(&head_root)
            .and_then(|b| b.execution_status.block_hash());
        let justified_root = self.justified_checkpoint().root;
        let finalized_root = self.finalized_checkpoint().root;
        let justified_hash = self
            .get_block(&justified_root)
            .and_then(|b| b.execution_status.block_hash());
        let finalized_hash = self
            .get_block(&finalized_root)
            .and_then(|b| b.execution_status.block_hash());
        self.forkchoice_update_parameters = ForkchoiceUpdateParameters {
            head_root,
            head_hash,
            justified_hash,
            finalized_hash,
        };

        metrics::FORK_CHOICE_NODES
            .as_ref()
            .map(|gauge| gauge.set(self.proto_array.len() as i64))
            .unwrap_or(());

        Ok(head_root)
    }

    /// Return information about the block to build atop at `current_slot`, applying the
    /// proposer re-org policy.
    ///
    /// A `DoNotReOrg` result means the canonical head should be used as-is.
    pub fn get_proposer_head(
        &self,
        current_slot: Slot,
        canonical_head: Hash256,
        disallowed_offsets: &DisallowedReOrgOffsets,
        spec: &ChainSpec,
    ) -> Result<ProposerHeadInfo, ProposerHeadError<Error<proto_array::Error>>> {
        self.proto_array
            .get_proposer_head(
                current_slot,
                canonical_head,
                self.fc_store.justified_balances(),
                ReOrgThreshold(spec.re_org_head_threshold),
                ReOrgThreshold(spec.re_org_parent_threshold),
                disallowed_offsets,
                spec.re_org_max_epochs_since_finalization,
            )
            .map_err(|e| e.map_inner_error(Error::ProtoArrayError))
    }

    /// Decide whether the `forkchoiceUpdated` message sent for a proposal at `proposal_slot`
    /// should point at the weak head's parent rather than the head itself.
    ///
    /// All the conditions of the proposer re-org policy must hold.
    pub fn should_override_forkchoice_update(
        &self,
        canonical_head: Hash256,
        proposal_slot: Slot,
        disallowed_offsets: &DisallowedReOrgOffsets,
        spec: &ChainSpec,
    ) -> Result<ProposerHeadInfo, ProposerHeadError<Error<proto_array::Error>>> {
        self.get_proposer_head(proposal_slot, canonical_head, disallowed_offsets, spec)
    }

    /// Add `block` to the fork choice DAG.
    ///
    /// - `block_root` is the root of `block`.
    /// - `state` is the state of `block`.
    /// - `indexed_attestations` are the block's attestations, resolved to validator indices by
    ///   the verification pipeline; each is applied as an LMD vote.
    ///
    /// ## Specification
    ///
    /// Approximates `on_block` in the fork choice spec.
    #[allow(clippy::too_many_arguments)]
    pub fn on_block(
        &mut self,
        current_slot: Slot,
        block: &SignedBeaconBlock,
        block_root: Hash256,
        block_delay: Duration,
        state: &BeaconState,
        indexed_attestations: &[IndexedAttestation],
        payload_verification_status: PayloadVerificationStatus,
        data_availability_status: DataAvailabilityStatus,
        spec: &ChainSpec,
    ) -> Result<(), Error<E>> {
        let _timer = metrics::FORK_CHOICE_PROCESS_BLOCK_TIMES
            .as_ref()
            .ok()
            .map(|histogram| histogram.start_timer());

        let current_slot = self.update_time(current_slot)?;

        // Blocks cannot be in the future. If they are, their consideration must be delayed
        // until they are in the past.
        if block.slot() > current_slot {
            return Err(Error::InvalidBlock(InvalidBlock::FutureSlot {
                current_slot,
                block_slot: block.slot(),
            }));
        }

        // Check that block is later than the finalized epoch slot (optimization to reduce
        // calls to get_ancestor).
        let finalized_slot = compute_start_slot_at_epoch(self.fc_store.finalized_checkpoint().epoch);
        if block.slot() <= finalized_slot {
            return Err(Error::InvalidBlock(InvalidBlock::FinalizedSlot {
                finalized_slot,
                block_slot: block.slot(),
            }));
        }

        // The parent must be known and earlier than the block.
        let parent_block = self
            .proto_array
            .get_block(&block.parent_root())
            .ok_or_else(|| Error::InvalidBlock(InvalidBlock::UnknownParent(block.parent_root())))?;
        if parent_block.slot >= block.slot() {
            return Err(Error::InvalidBlock(InvalidBlock::NotLaterThanParent {
                parent_slot: parent_block.slot,
                block_slot: block.slot(),
            }));
        }

        // Check block is a descendant of the finalized block at the checkpoint finalized slot.
        let finalized_root = self.fc_store.finalized_checkpoint().root;
        let block_ancestor = self.get_ancestor(block.parent_root(), finalized_slot)?;
        if block_ancestor != Some(finalized_root) {
            return Err(Error::InvalidBlock(InvalidBlock::NotFinalizedDescendant {
                finalized_root,
                block_ancestor,
            }));
        }

        // Timeliness with respect to the attestation deadline of the block's slot, used for
        // the proposer boost and the re-org policy.
        let timely = block.slot() == current_slot && block_delay < spec.attestation_cutoff();

        // Add proposer score boost if the block is timely and not conflicting with an existing
        // block.
        if timely && self.fc_store.proposer_boost_root() == Hash256::zero() {
            self.fc_store.set_proposer_boost_root(block_root);
        }

        // Update store with checkpoints if necessary.
        self.update_checkpoints(
            state.current_justified_checkpoint,
            state.finalized_checkpoint,
        )?;

        // Update unrealized justified/finalized checkpoints.
        let (unrealized_justified_checkpoint, unrealized_finalized_checkpoint) = {
            let jf_state = process_justification_and_finalization(state, spec)?;
            (
                jf_state.current_justified_checkpoint,
                jf_state.finalized_checkpoint,
            )
        };

        if unrealized_justified_checkpoint.epoch
            > self.fc_store.unrealized_justified_checkpoint().epoch
        {
            self.fc_store
                .set_unrealized_justified_checkpoint(unrealized_justified_checkpoint);
        }
        if unrealized_finalized_checkpoint.epoch
            > self.fc_store.unrealized_finalized_checkpoint().epoch
        {
            self.fc_store
                .set_unrealized_finalized_checkpoint(unrealized_finalized_checkpoint);
        }

        // If the block is from a prior epoch, apply the realized values immediately ("pull-up
        // tendency").
        let block_epoch = block.epoch();
        let current_epoch = current_slot.epoch(SLOTS_PER_EPOCH);
        if block_epoch < current_epoch {
            self.update_checkpoints(
                unrealized_justified_checkpoint,
                unrealized_finalized_checkpoint,
            )?;
        }

        let target_slot = block_epoch.start_slot(SLOTS_PER_EPOCH);
        let target_root = if block.slot() == target_slot {
            block_root
        } else {
            state
                .get_block_root(target_slot)
                .map_err(Error::BeaconStateError)?
        };

        self.fc_store
            .on_verified_block(block, block_root, state)
            .map_err(Error::AfterBlockFailed)?;

        let execution_status = {
            let block_hash = block.execution_block_hash();
            if block_hash == ExecutionBlockHash::zero() {
                // The block is pre-merge or carries the default payload.
                ExecutionStatus::irrelevant()
            } else {
                match payload_verification_status {
                    PayloadVerificationStatus::Verified => ExecutionStatus::Valid(block_hash),
                    PayloadVerificationStatus::Optimistic => {
                        ExecutionStatus::Optimistic(block_hash)
                    }
                    PayloadVerificationStatus::Irrelevant => ExecutionStatus::irrelevant(),
                }
            }
        };

        self.proto_array.process_block(
            ProtoBlock {
                slot: block.slot(),
                root: block_root,
                parent_root: Some(block.parent_root()),
                state_root: block.state_root(),
                target_root,
                justified_checkpoint: state.current_justified_checkpoint,
                finalized_checkpoint: state.finalized_checkpoint,
                execution_status,
                data_availability_status,
                unrealized_justified_checkpoint: Some(unrealized_justified_checkpoint),
                unrealized_finalized_checkpoint: Some(unrealized_finalized_checkpoint),
                timely,
            },
            current_slot,
        )?;

        // Apply the block's attestations as LMD votes.
        for indexed_attestation in indexed_attestations {
            if let Err(e) = self.on_attestation(
                current_slot,
                indexed_attestation,
                AttestationFromBlock::True,
            ) {
                debug!(error = ?e, "Ignoring invalid attestation in block");
            }
        }

        Ok(())
    }

    /// Update the `justified` and `finalized` checkpoints in the store, never regressing either.
    fn update_checkpoints(
        &mut self,
        justified_checkpoint: Checkpoint,
        finalized_checkpoint: Checkpoint,
    ) -> Result<(), Error<E>> {
        if justified_checkpoint.epoch > self.fc_store.justified_checkpoint().epoch {
            self.fc_store
                .set_justified_checkpoint(justified_checkpoint)
                .map_err(Error::UnableToSetJustifiedCheckpoint)?;
        }
        if finalized_checkpoint.epoch > self.fc_store.finalized_checkpoint().epoch {
            self.fc_store.set_finalized_checkpoint(finalized_checkpoint);
        }
        Ok(())
    }

    /// Validate the attestation, without applying it.
    ///
    /// ## Specification
    ///
    /// Approximates `validate_on_attestation` in the fork choice spec.
    fn validate_on_attestation(
        &self,
        indexed_attestation: &IndexedAttestation,
        is_from_block: AttestationFromBlock,
    ) -> Result<(), InvalidAttestation> {
        // There is no point in processing an attestation with an empty bitfield. Reject them
        // immediately (instead of failing a signature check).
        if indexed_attestation.attesting_indices.is_empty() {
            return Err(InvalidAttestation::EmptyAggregationBitfield);
        }

        let data = &indexed_attestation.data;

        if data.target.epoch != data.slot.epoch(SLOTS_PER_EPOCH) {
            return Err(InvalidAttestation::BadTargetEpoch {
                target: data.target.epoch,
                slot: data.slot,
            });
        }

        if matches!(is_from_block, AttestationFromBlock::False) {
            let current_epoch = self.fc_store.get_current_slot().epoch(SLOTS_PER_EPOCH);
            // The spec allows attestations from the current or previous epoch.
            if data.target.epoch > current_epoch {
                return Err(InvalidAttestation::FutureEpoch {
                    attestation_epoch: data.target.epoch,
                    current_epoch,
                });
            } else if data.target.epoch + 1 < current_epoch {
                return Err(InvalidAttestation::PastEpoch {
                    attestation_epoch: data.target.epoch,
                    current_epoch,
                });
            }
        }

        if !self.proto_array.contains_block(&data.target.root) {
            return Err(InvalidAttestation::UnknownTargetRoot(data.target.root));
        }

        // Attestations must be for a known block. If the block is unknown, we simply drop the
        // attestation and do not delay consideration for later.
        let block = self
            .proto_array
            .get_block(&data.beacon_block_root)
            .ok_or(InvalidAttestation::UnknownHeadBlock {
                beacon_block_root: data.beacon_block_root,
            })?;

        // Attestations must not be for blocks in the future. If this is the case, the
        // attestation should not be considered.
        if block.slot > data.slot {
            return Err(InvalidAttestation::AttestsToFutureBlock {
                block: block.slot,
                attestation: data.slot,
            });
        }

        // The attestation's target must match the chain of the attested block.
        let target_slot = data.target.epoch.start_slot(SLOTS_PER_EPOCH);
        let expected_target = if block.slot <= target_slot {
            data.beacon_block_root
        } else {
            self.proto_array
                .get_ancestor_at_slot(data.beacon_block_root, target_slot)
                .unwrap_or(data.beacon_block_root)
        };
        if expected_target != data.target.root {
            return Err(InvalidAttestation::InvalidTarget {
                attestation: data.target.root,
                local: expected_target,
            });
        }

        Ok(())
    }

    /// Register `indexed_attestation` with the fork choice, to be used in future calls to
    /// `Self::get_head`.
    ///
    /// ## Specification
    ///
    /// Approximates `on_attestation` in the fork choice spec.
    pub fn on_attestation(
        &mut self,
        current_slot: Slot,
        attestation: &IndexedAttestation,
        is_from_block: AttestationFromBlock,
    ) -> Result<(), Error<E>> {
        let _timer = metrics::FORK_CHOICE_PROCESS_ATTESTATION_TIMES
            .as_ref()
            .ok()
            .map(|histogram| histogram.start_timer());

        self.update_time(current_slot)?;

        self.validate_on_attestation(attestation, is_from_block)?;

        if attestation.data.slot < self.fc_store.get_current_slot() {
            for validator_index in attestation.attesting_indices.iter() {
                self.proto_array.process_attestation(
                    *validator_index as usize,
                    attestation.data.beacon_block_root,
                    attestation.data.target.epoch,
                )?;
            }
        } else {
            // The spec declares:
            //
            // ```
            // Attestations can only affect the fork choice of subsequent slots.
            // Delay consideration in the fork choice until their slot is in the past.
            // ```
            self.queued_attestations.push(QueuedAttestation::from(attestation));
        }

        Ok(())
    }

    /// Apply an attester slashing to fork choice.
    ///
    /// We assume that the attester slashing provided to this function has already been verified.
    pub fn on_attester_slashing(&mut self, slashing: &types::AttesterSlashing) {
        let attesting_indices_set = |att: &IndexedAttestation| {
            att.attesting_indices
                .iter()
                .copied()
                .collect::<std::collections::BTreeSet<_>>()
        };
        let att1_indices = attesting_indices_set(&slashing.attestation_1);
        let att2_indices = attesting_indices_set(&slashing.attestation_2);
        self.fc_store
            .extend_equivocating_indices(att1_indices.intersection(&att2_indices).copied());
    }

    /// Call `on_tick` for all slots between `fc_store.get_current_slot()` and the provided
    /// `current_slot`. Returns the value of `self.fc_store.get_current_slot`.
    pub fn update_time(&mut self, current_slot: Slot) -> Result<Slot, Error<E>> {
        while self.fc_store.get_current_slot() < current_slot {
            let previous_slot = self.fc_store.get_current_slot();
            // Note: we are relying upon `on_tick` to update `fc_store.time` to ensure we don't
            // get stuck in a loop.
            self.on_tick(previous_slot + 1)?;
        }

        // Process any attestations that might now be eligible.
        self.process_attestation_queue()?;

        Ok(self.fc_store.get_current_slot())
    }

    /// Called whenever the current time increases.
    ///
    /// ## Specification
    ///
    /// Equivalent to `on_tick` in the fork choice spec.
    fn on_tick(&mut self, time: Slot) -> Result<(), Error<E>> {
        let store = &mut self.fc_store;
        let previous_slot = store.get_current_slot();

        if time > previous_slot + 1 {
            return Err(Error::InconsistentOnTick {
                previous_slot,
                time,
            });
        }

        // Update store time.
        store.set_current_slot(time);

        let current_slot = time;

        // Reset proposer boost if this is a new slot.
        if self.fc_store.proposer_boost_root() != Hash256::zero() {
            self.fc_store.set_proposer_boost_root(Hash256::zero());
        }

        // Not a new epoch, return.
        if compute_slots_since_epoch_start(current_slot) != Slot::new(0) {
            return Ok(());
        }

        // Promote the unrealized checkpoints at the epoch boundary.
        let unrealized_justified = *self.fc_store.unrealized_justified_checkpoint();
        let unrealized_finalized = *self.fc_store.unrealized_finalized_checkpoint();
        self.update_checkpoints(unrealized_justified, unrealized_finalized)?;

        Ok(())
    }

    /// Processes and removes from the queue any queued attestations which may now be eligible
    /// for processing due to the slot clock incrementing.
    fn process_attestation_queue(&mut self) -> Result<(), Error<E>> {
        for attestation in dequeue_attestations(
            self.fc_store.get_current_slot(),
            &mut self.queued_attestations,
        ) {
            for validator_index in &attestation.attesting_indices {
                self.proto_array.process_attestation(
                    *validator_index as usize,
                    attestation.block_root,
                    attestation.target_epoch,
                )?;
            }
        }

        Ok(())
    }

    /// Apply a validation from the execution engine: the payload and all its ancestors are
    /// valid.
    pub fn on_valid_execution_payload(&mut self, block_root: Hash256) -> Result<(), Error<E>> {
        self.proto_array
            .process_execution_payload_validation(block_root)
            .map_err(Error::FailedToProcessValidExecutionPayload)
    }

    /// Apply an invalidation from the execution engine, marking the descendants of the latest
    /// valid hash invalid.
    pub fn on_invalid_execution_payload(
        &mut self,
        op: &InvalidationOperation,
    ) -> Result<(), Error<E>> {
        self.proto_array
            .process_execution_payload_invalidation(op)
            .map_err(Error::FailedToProcessInvalidExecutionPayload)
    }

    /// Returns `true` if the block is known **and** a descendant of the finalized root.
    pub fn contains_block(&self, block_root: &Hash256) -> bool {
        self.proto_array.contains_block(block_root)
            && self.is_finalized_checkpoint_or_descendant(*block_root)
    }

    /// Returns a `ProtoBlock` if the block is known **and** a descendant of the finalized root.
    pub fn get_block(&self, block_root: &Hash256) -> Option<ProtoBlock> {
        if self.is_finalized_checkpoint_or_descendant(*block_root) {
            self.proto_array.get_block(block_root).cloned()
        } else {
            None
        }
    }

    /// Returns an `ExecutionStatus` if the block is known **and** a descendant of the finalized
    /// root.
    pub fn get_block_execution_status(&self, block_root: &Hash256) -> Option<ExecutionStatus> {
        if self.is_finalized_checkpoint_or_descendant(*block_root) {
            self.proto_array.get_block_execution_status(block_root)
        } else {
            None
        }
    }

    /// Returns `true` if the `block_root` is known and either the finalized root itself or one
    /// of its descendants.
    pub fn is_finalized_checkpoint_or_descendant(&self, block_root: Hash256) -> bool {
        let finalized_root = self.fc_store.finalized_checkpoint().root;
        block_root == finalized_root || self.proto_array.is_descendant(finalized_root, block_root)
    }

    pub fn is_descendant(&self, ancestor_root: Hash256, descendant_root: Hash256) -> bool {
        self.proto_array.is_descendant(ancestor_root, descendant_root)
    }

    /// Return the current head of the fork choice, as last computed by `get_head`.
    pub fn head_block_root(&self) -> Hash256 {
        self.head_block_root
    }

    /// Return the justified checkpoint.
    pub fn justified_checkpoint(&self) -> Checkpoint {
        *self.fc_store.justified_checkpoint()
    }

    pub fn finalized_checkpoint(&self) -> Checkpoint {
        *self.fc_store.finalized_checkpoint()
    }

    pub fn unrealized_justified_checkpoint(&self) -> Checkpoint {
        *self.fc_store.unrealized_justified_checkpoint()
    }

    pub fn unrealized_finalized_checkpoint(&self) -> Checkpoint {
        *self.fc_store.unrealized_finalized_checkpoint()
    }

    /// A view of the current state of fork choice: head and checkpoints together.
    pub fn cached_fork_choice_view(&self) -> ForkChoiceView {
        ForkChoiceView {
            head_block_root: self.head_block_root,
            justified_checkpoint: self.justified_checkpoint(),
            finalized_checkpoint: self.finalized_checkpoint(),
        }
    }

    /// Prune the fork choice, retaining only the finalized root's subtree.
    pub fn prune(&mut self) -> Result<(), Error<E>> {
        let finalized_root = self.fc_store.finalized_checkpoint().root;
        self.proto_array.prune(finalized_root).map_err(Into::into)
    }

    /// Enumerate the heads (leaves) of the block DAG.
    pub fn heads(&self) -> Vec<Hash256> {
        self.proto_array.heads()
    }

    pub fn fc_store(&self) -> &T {
        &self.fc_store
    }

    pub fn proto_array(&self) -> &ProtoArrayForkChoice {
        &self.proto_array
    }

    pub fn queued_attestations(&self) -> &[QueuedAttestation] {
        &self.queued_attestations
    }

    /// Instantiate `Self` from a previously-persisted snapshot.
    pub fn from_persisted(
        persisted: PersistedForkChoice,
        fc_store: T,
    ) -> Result<Self, Error<E>> {
        let proto_array = ProtoArrayForkChoice::from_bytes(&persisted.proto_array_bytes)
            .map_err(Error::InvalidProtoArrayBytes)?;

        warn!(
            fork_choice = "loaded from disk",
            queued_attestations = persisted.queued_attestations.len(),
            "Restoring fork choice"
        );

        Ok(Self::from_components(
            fc_store,
            proto_array,
            persisted.queued_attestations,
        ))
    }

    /// Takes a snapshot of `Self` that can be persisted to disk.
    pub fn to_persisted(&self) -> PersistedForkChoice {
        PersistedForkChoice {
            proto_array_bytes: self.proto_array().as_bytes(),
            queued_attestations: self.queued_attestations().to_vec(),
        }
    }
}

/// The container that is persisted to disk across runs.
#[superstruct(
    variants(V1),
    variant_attributes(derive(Encode, Decode)),
    no_enum
)]
pub struct PersistedForkChoice {
    pub proto_array_bytes: Vec<u8>,
    pub queued_attestations: Vec<QueuedAttestation>,
}

pub type PersistedForkChoice = PersistedForkChoiceV1;

impl PersistedForkChoice {
    pub fn as_bytes(&self) -> Vec<u8> {
        self.as_ssz_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ssz::DecodeError> {
        Self::from_ssz_bytes(bytes)
    }
}
