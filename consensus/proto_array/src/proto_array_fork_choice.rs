use crate::{
    JustifiedBalances,
    error::Error,
    proto_array::{
        InvalidationOperation, Iter, ProposerBoost, ProtoArray, ProtoNode,
        calculate_committee_fraction,
    },
    ssz_container::SszContainer,
};
use serde::{Deserialize, Serialize};
use ssz::{Decode, Encode};
use ssz_derive::{Decode, Encode};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use types::consts::SLOTS_PER_EPOCH;
use types::{ChainSpec, Checkpoint, Epoch, ExecutionBlockHash, Hash256, Slot};

pub const DEFAULT_PRUNE_THRESHOLD: usize = 256;

/// The sentinel value stored in persisted vote trackers for "no vote".
pub const NULL_VOTE_INDEX: u32 = u32::MAX;

/// A validator's latest and next-to-be-applied LMD votes, referencing proto-array node indices.
///
/// An absent index means the validator has never voted, voted for a pruned block, or has
/// equivocated.
#[derive(Default, PartialEq, Clone, Copy, Debug)]
pub struct VoteTracker {
    pub current_index: Option<usize>,
    pub next_index: Option<usize>,
    pub next_epoch: Epoch,
}

/// The SSZ form of a `VoteTracker`, with `None` encoded as `NULL_VOTE_INDEX`.
#[derive(PartialEq, Clone, Copy, Debug, Encode, Decode)]
pub struct VoteTrackerSsz {
    current_index: u32,
    next_index: u32,
    next_epoch: Epoch,
}

impl From<&VoteTracker> for VoteTrackerSsz {
    fn from(vote: &VoteTracker) -> Self {
        let to_ssz = |index: Option<usize>| index.map(|i| i as u32).unwrap_or(NULL_VOTE_INDEX);
        Self {
            current_index: to_ssz(vote.current_index),
            next_index: to_ssz(vote.next_index),
            next_epoch: vote.next_epoch,
        }
    }
}

impl From<VoteTrackerSsz> for VoteTracker {
    fn from(vote: VoteTrackerSsz) -> Self {
        let from_ssz = |index: u32| (index != NULL_VOTE_INDEX).then_some(index as usize);
        Self {
            current_index: from_ssz(vote.current_index),
            next_index: from_ssz(vote.next_index),
            next_epoch: vote.next_epoch,
        }
    }
}

/// Represents the verification status of an execution payload.
#[derive(Clone, Copy, Debug, PartialEq, Encode, Decode, Serialize, Deserialize)]
#[ssz(enum_behaviour = "union")]
pub enum ExecutionStatus {
    /// An EL has determined that the payload is valid.
    Valid(ExecutionBlockHash),
    /// An EL has determined that the payload is invalid.
    Invalid(ExecutionBlockHash),
    /// An EL has not yet verified the execution payload.
    Optimistic(ExecutionBlockHash),
    /// The block is prior to the merge fork.
    ///
    /// # Note:
    ///
    /// This `bool` only exists to satisfy our SSZ implementation which requires all variants
    /// to have a value. It can be set to anything.
    Irrelevant(bool),
}

impl ExecutionStatus {
    pub fn irrelevant() -> Self {
        ExecutionStatus::Irrelevant(false)
    }

    pub fn block_hash(&self) -> Option<ExecutionBlockHash> {
        match self {
            ExecutionStatus::Valid(hash)
            | ExecutionStatus::Invalid(hash)
            | ExecutionStatus::Optimistic(hash) => Some(*hash),
            ExecutionStatus::Irrelevant(_) => None,
        }
    }

    /// Returns `true` if the block has a valid payload or does not have execution enabled.
    /// Whenever this function returns `true`, the block is *fully valid*.
    pub fn is_valid_or_irrelevant(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Valid(_) | ExecutionStatus::Irrelevant(_)
        )
    }

    /// Returns `true` if the block has execution enabled and a payload not yet verified by an EL.
    pub fn is_strictly_optimistic(&self) -> bool {
        matches!(self, ExecutionStatus::Optimistic(_))
    }

    /// Returns `true` if the block has a payload not yet verified, or deemed invalid, by an EL.
    pub fn is_optimistic_or_invalid(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Optimistic(_) | ExecutionStatus::Invalid(_)
        )
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, ExecutionStatus::Invalid(_))
    }

    pub fn is_irrelevant(&self) -> bool {
        matches!(self, ExecutionStatus::Irrelevant(_))
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Valid(_) => write!(f, "valid"),
            ExecutionStatus::Invalid(_) => write!(f, "invalid"),
            ExecutionStatus::Optimistic(_) => write!(f, "optimistic"),
            ExecutionStatus::Irrelevant(_) => write!(f, "irrelevant"),
        }
    }
}

/// The data-availability verdict attached to a block at import time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
#[ssz(enum_behaviour = "tag")]
pub enum DataAvailabilityStatus {
    /// The block predates the data-availability fork and carries no sidecar data.
    PreData,
    /// The block is outside the availability window; data is not required for import.
    OutOfRange,
    /// All required blobs or sampled columns were verified.
    Available,
}

/// A block that is to be applied to the fork choice.
///
/// A simplified version of `types::BeaconBlock`.
#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    pub slot: Slot,
    pub root: Hash256,
    pub parent_root: Option<Hash256>,
    pub state_root: Hash256,
    pub target_root: Hash256,
    pub justified_checkpoint: Checkpoint,
    pub finalized_checkpoint: Checkpoint,
    /// Indicates if an execution node has marked this block as valid. Also contains the
    /// execution block hash.
    pub execution_status: ExecutionStatus,
    pub data_availability_status: DataAvailabilityStatus,
    pub unrealized_justified_checkpoint: Option<Checkpoint>,
    pub unrealized_finalized_checkpoint: Option<Checkpoint>,
    /// Whether this block arrived before the attestation deadline of its slot.
    pub timely: bool,
}

/// A Vec-wrapper which will grow to match any request.
///
/// E.g., a `get` or `insert` to an out-of-bounds element will cause the Vec to grow (using
/// Default) to the smallest size required to fulfill the request.
#[derive(Default, Clone, Debug, PartialEq)]
pub struct ElasticList<T>(pub Vec<T>);

impl<T> ElasticList<T>
where
    T: Default,
{
    fn ensure(&mut self, i: usize) {
        if self.0.len() <= i {
            self.0.resize_with(i + 1, Default::default);
        }
    }

    pub fn get_mut(&mut self, i: usize) -> &mut T {
        self.ensure(i);
        &mut self.0[i]
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.0.iter_mut()
    }
}

/// Information about the proposer head used for opportunistic re-orgs.
#[derive(Debug, Clone)]
pub struct ProposerHeadInfo {
    /// Information about the *current* head block, which may be re-orged.
    pub head_node: ProtoNode,
    /// Information about the parent of the current head, which should be selected as the parent
    /// for a new proposal *if* a re-org is decided on.
    pub parent_node: ProtoNode,
    /// The computed fraction of the active head committee balance below which we can re-org.
    pub re_org_head_weight_threshold: u64,
    /// The computed fraction of the active parent committee balance above which we can re-org.
    pub re_org_parent_weight_threshold: u64,
    /// The current slot from fork choice's point of view, may lead the wall-clock slot by upto
    /// 500ms.
    pub current_slot: Slot,
}

/// Error type to enable short-circuiting checks in `get_proposer_head`.
#[derive(Debug, Clone, PartialEq)]
pub enum ProposerHeadError<T> {
    DoNotReOrg(DoNotReOrg),
    Error(T),
}

impl<T> From<DoNotReOrg> for ProposerHeadError<T> {
    fn from(e: DoNotReOrg) -> ProposerHeadError<T> {
        Self::DoNotReOrg(e)
    }
}

impl From<Error> for ProposerHeadError<Error> {
    fn from(e: Error) -> Self {
        Self::Error(e)
    }
}

impl<T1> ProposerHeadError<T1> {
    pub fn convert_inner_error<T2>(self) -> ProposerHeadError<T2>
    where
        T2: From<T1>,
    {
        self.map_inner_error(T2::from)
    }

    pub fn map_inner_error<T2>(self, f: impl FnOnce(T1) -> T2) -> ProposerHeadError<T2> {
        match self {
            ProposerHeadError::DoNotReOrg(reason) => ProposerHeadError::DoNotReOrg(reason),
            ProposerHeadError::Error(error) => ProposerHeadError::Error(f(error)),
        }
    }
}

/// Reasons why a re-org should not be attempted.
#[derive(Debug, Clone, PartialEq)]
pub enum DoNotReOrg {
    MissingHeadOrParentNode,
    MissingHeadFinalizedCheckpoint,
    ParentDistance,
    HeadDistance,
    ShufflingUnstable,
    DisallowedOffset {
        offset: u64,
    },
    JustificationAndFinalizationNotCompetitive,
    ChainNotFinalizing {
        epochs_since_finalization: u64,
    },
    HeadNotWeak {
        head_weight: u64,
        re_org_head_weight_threshold: u64,
    },
    ParentNotStrong {
        parent_weight: u64,
        re_org_parent_weight_threshold: u64,
    },
    HeadNotLate,
    NotProposing,
    ReOrgsDisabled,
}

impl std::fmt::Display for DoNotReOrg {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::MissingHeadOrParentNode => write!(f, "unknown head or parent"),
            Self::MissingHeadFinalizedCheckpoint => write!(f, "finalized checkpoint missing"),
            Self::ParentDistance => write!(f, "parent too far from head"),
            Self::HeadDistance => write!(f, "head too far from current slot"),
            Self::ShufflingUnstable => write!(f, "shuffling unstable at epoch boundary"),
            Self::DisallowedOffset { offset } => {
                write!(f, "re-orgs disabled at offset {offset}")
            }
            Self::JustificationAndFinalizationNotCompetitive => {
                write!(f, "justification or finalization not competitive")
            }
            Self::ChainNotFinalizing {
                epochs_since_finalization,
            } => write!(
                f,
                "chain not finalizing ({epochs_since_finalization} epochs since finalization)"
            ),
            Self::HeadNotWeak {
                head_weight,
                re_org_head_weight_threshold,
            } => {
                write!(
                    f,
                    "head not weak ({head_weight}/{re_org_head_weight_threshold})"
                )
            }
            Self::ParentNotStrong {
                parent_weight,
                re_org_parent_weight_threshold,
            } => {
                write!(
                    f,
                    "parent not strong ({parent_weight}/{re_org_parent_weight_threshold})"
                )
            }
            Self::HeadNotLate => {
                write!(f, "head arrived on time")
            }
            Self::NotProposing => {
                write!(f, "not proposing at next slot")
            }
            Self::ReOrgsDisabled => {
                write!(f, "re-orgs disabled in config")
            }
        }
    }
}

/// New-type for the re-org threshold percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReOrgThreshold(pub u64);

/// New-type for disallowed re-org slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DisallowedReOrgOffsets {
    // Vecs are faster than hashmaps for small numbers of items.
    offsets: Vec<u64>,
}

impl Default for DisallowedReOrgOffsets {
    fn default() -> Self {
        DisallowedReOrgOffsets { offsets: vec![0] }
    }
}

impl DisallowedReOrgOffsets {
    pub fn new(offsets: Vec<u64>) -> Result<Self, Error> {
        for &offset in &offsets {
            if offset >= SLOTS_PER_EPOCH {
                return Err(Error::InvalidEpochOffset(offset));
            }
        }
        Ok(Self { offsets })
    }

    pub fn contains(&self, offset: u64) -> bool {
        self.offsets.contains(&offset)
    }
}

#[derive(PartialEq, Debug)]
pub struct ProtoArrayForkChoice {
    pub(crate) proto_array: ProtoArray,
    pub(crate) votes: ElasticList<VoteTracker>,
    pub(crate) balances: JustifiedBalances,
}

impl ProtoArrayForkChoice {
    pub fn new(
        current_slot: Slot,
        finalized_block_slot: Slot,
        finalized_block_state_root: Hash256,
        justified_checkpoint: Checkpoint,
        finalized_checkpoint: Checkpoint,
        execution_status: ExecutionStatus,
    ) -> Result<Self, Error> {
        let mut proto_array = ProtoArray {
            prune_threshold: DEFAULT_PRUNE_THRESHOLD,
            justified_checkpoint,
            finalized_checkpoint,
            nodes: Vec::with_capacity(1),
            indices: HashMap::with_capacity(1),
            previous_proposer_boost: ProposerBoost::default(),
        };

        let block = Block {
            slot: finalized_block_slot,
            root: finalized_checkpoint.root,
            parent_root: None,
            state_root: finalized_block_state_root,
            // We are using the finalized_root as the target_root, since it always lies on an
            // epoch boundary.
            target_root: finalized_checkpoint.root,
            justified_checkpoint,
            finalized_checkpoint,
            execution_status,
            data_availability_status: DataAvailabilityStatus::OutOfRange,
            unrealized_justified_checkpoint: Some(justified_checkpoint),
            unrealized_finalized_checkpoint: Some(finalized_checkpoint),
            timely: true,
        };

        proto_array.on_block(block, current_slot)?;

        Ok(Self {
            proto_array,
            votes: ElasticList::default(),
            balances: JustifiedBalances::default(),
        })
    }

    /// See `ProtoArray::propagate_execution_payload_validation` for documentation.
    pub fn process_execution_payload_validation(&mut self, block_root: Hash256) -> Result<(), Error> {
        self.proto_array
            .propagate_execution_payload_validation(block_root)
    }

    /// See `ProtoArray::propagate_execution_payload_invalidation` for documentation.
    pub fn process_execution_payload_invalidation(
        &mut self,
        op: &InvalidationOperation,
    ) -> Result<(), Error> {
        self.proto_array.propagate_execution_payload_invalidation(op)
    }

    /// Record `validator_index`'s latest vote for `block_root` at `target_epoch`.
    ///
    /// An unknown `block_root` is recorded as a null vote so that the validator's previous vote
    /// is still superseded.
    pub fn process_attestation(
        &mut self,
        validator_index: usize,
        block_root: Hash256,
        target_epoch: Epoch,
    ) -> Result<(), Error> {
        let block_index = self.proto_array.indices.get(&block_root).copied();
        let vote = self.votes.get_mut(validator_index);

        if target_epoch > vote.next_epoch || *vote == VoteTracker::default() {
            vote.next_index = block_index;
            vote.next_epoch = target_epoch;
        }

        Ok(())
    }

    pub fn process_block(&mut self, block: Block, current_slot: Slot) -> Result<(), Error> {
        if block.parent_root.is_none() {
            return Err(Error::UnknownParent {
                block_root: block.root,
                parent_root: Hash256::default(),
            });
        }

        self.proto_array.on_block(block, current_slot)
    }

    pub fn find_head(
        &mut self,
        justified_checkpoint: Checkpoint,
        finalized_checkpoint: Checkpoint,
        justified_state_balances: &JustifiedBalances,
        proposer_boost_root: Hash256,
        equivocating_indices: &BTreeSet<u64>,
        current_slot: Slot,
        spec: &ChainSpec,
    ) -> Result<Hash256, Error> {
        let new_balances = justified_state_balances;

        let deltas = compute_deltas(
            self.proto_array.nodes.len(),
            &mut self.votes,
            &self.balances.effective_balances,
            &new_balances.effective_balances,
            equivocating_indices,
        )?;

        self.proto_array.apply_score_changes(
            deltas,
            justified_checkpoint,
            finalized_checkpoint,
            new_balances,
            proposer_boost_root,
            current_slot,
            spec,
        )?;

        self.balances = new_balances.clone();

        self.proto_array
            .find_head(&justified_checkpoint.root, current_slot)
    }

    /// Get the block to propose on during `current_slot`.
    ///
    /// This function returns a *definitive* result which should be acted on.
    #[allow(clippy::too_many_arguments)]
    pub fn get_proposer_head(
        &self,
        current_slot: Slot,
        canonical_head: Hash256,
        justified_balances: &JustifiedBalances,
        re_org_head_threshold: ReOrgThreshold,
        re_org_parent_threshold: ReOrgThreshold,
        disallowed_offsets: &DisallowedReOrgOffsets,
        max_epochs_since_finalization: Epoch,
    ) -> Result<ProposerHeadInfo, ProposerHeadError<Error>> {
        let info = self.get_proposer_head_info(
            current_slot,
            canonical_head,
            justified_balances,
            re_org_head_threshold,
            re_org_parent_threshold,
            disallowed_offsets,
            max_epochs_since_finalization,
        )?;

        // Only re-org a single slot. This prevents cascading failures during asynchrony.
        let head_slot_ok = info.head_node.slot() + 1 == current_slot;
        if !head_slot_ok {
            return Err(DoNotReOrg::HeadDistance.into());
        }

        // Only re-org if the head's weight is less than the heads configured committee fraction.
        let head_weight = info.head_node.weight.max(0) as u64;
        let re_org_head_weight_threshold = info.re_org_head_weight_threshold;
        let weak_head = head_weight < re_org_head_weight_threshold;
        if !weak_head {
            return Err(DoNotReOrg::HeadNotWeak {
                head_weight,
                re_org_head_weight_threshold,
            }
            .into());
        }

        // Only re-org if the parent's weight is greater than the parents configured committee
        // fraction.
        let parent_weight = info.parent_node.weight.max(0) as u64;
        let re_org_parent_weight_threshold = info.re_org_parent_weight_threshold;
        let parent_strong = parent_weight > re_org_parent_weight_threshold;
        if !parent_strong {
            return Err(DoNotReOrg::ParentNotStrong {
                parent_weight,
                re_org_parent_weight_threshold,
            }
            .into());
        }

        // All checks have passed, build upon the parent to re-org the head.
        Ok(info)
    }

    /// Get information about the block to propose on during `current_slot`.
    ///
    /// This function returns a *partial* result which must be processed further.
    #[allow(clippy::too_many_arguments)]
    pub fn get_proposer_head_info(
        &self,
        current_slot: Slot,
        canonical_head: Hash256,
        justified_balances: &JustifiedBalances,
        re_org_head_threshold: ReOrgThreshold,
        re_org_parent_threshold: ReOrgThreshold,
        disallowed_offsets: &DisallowedReOrgOffsets,
        max_epochs_since_finalization: Epoch,
    ) -> Result<ProposerHeadInfo, ProposerHeadError<Error>> {
        let mut nodes = self
            .proto_array
            .iter_nodes(&canonical_head)
            .take(2)
            .cloned()
            .collect::<Vec<_>>();

        let parent_node = nodes.pop().ok_or(DoNotReOrg::MissingHeadOrParentNode)?;
        let head_node = nodes.pop().ok_or(DoNotReOrg::MissingHeadOrParentNode)?;

        let parent_slot = parent_node.slot();
        let head_slot = head_node.slot();
        let re_org_block_slot = head_slot + 1;

        // Check finalization distance.
        let proposal_epoch = re_org_block_slot.epoch(SLOTS_PER_EPOCH);
        let finalized_epoch = head_node
            .block
            .unrealized_finalized_checkpoint
            .ok_or(DoNotReOrg::MissingHeadFinalizedCheckpoint)?
            .epoch;
        let epochs_since_finalization = proposal_epoch.saturating_sub(finalized_epoch).as_u64();
        if epochs_since_finalization > max_epochs_since_finalization.as_u64() {
            return Err(DoNotReOrg::ChainNotFinalizing {
                epochs_since_finalization,
            }
            .into());
        }

        // Check parent distance from head.
        // Do not check head distance from current slot, as that condition needs to be
        // late-evaluated and is elided when `current_slot == head_slot`.
        let parent_slot_ok = parent_slot + 1 == head_slot;
        if !parent_slot_ok {
            return Err(DoNotReOrg::ParentDistance.into());
        }

        // Shuffling stable: a re-org block in the first slot of an epoch changes the proposer
        // shuffling decision root.
        if re_org_block_slot.is_epoch_start(SLOTS_PER_EPOCH) {
            return Err(DoNotReOrg::ShufflingUnstable.into());
        }

        // Check allowed slot offsets.
        let offset = re_org_block_slot.as_u64() % SLOTS_PER_EPOCH;
        if disallowed_offsets.contains(offset) {
            return Err(DoNotReOrg::DisallowedOffset { offset }.into());
        }

        // The head must have arrived late to be re-orgable.
        if head_node.block.timely {
            return Err(DoNotReOrg::HeadNotLate.into());
        }

        // Check FFG-competitiveness: re-orging must not sacrifice justification or
        // finalization progress.
        let ffg_competitive = head_node.block.unrealized_justified_checkpoint
            == parent_node.block.unrealized_justified_checkpoint
            && head_node.block.unrealized_finalized_checkpoint
                == parent_node.block.unrealized_finalized_checkpoint;
        if !ffg_competitive {
            return Err(DoNotReOrg::JustificationAndFinalizationNotCompetitive.into());
        }

        // Compute re-org weight thresholds.
        let re_org_head_weight_threshold =
            calculate_committee_fraction(justified_balances, re_org_head_threshold.0)
                .ok_or(ProposerHeadError::Error(Error::ReOrgThresholdOverflow))?;
        let re_org_parent_weight_threshold =
            calculate_committee_fraction(justified_balances, re_org_parent_threshold.0)
                .ok_or(ProposerHeadError::Error(Error::ReOrgThresholdOverflow))?;

        Ok(ProposerHeadInfo {
            head_node,
            parent_node,
            re_org_head_weight_threshold,
            re_org_parent_weight_threshold,
            current_slot,
        })
    }

    /// Returns `true` if there is at least one block with the given `block_root`.
    pub fn contains_block(&self, block_root: &Hash256) -> bool {
        self.proto_array.indices.contains_key(block_root)
    }

    pub fn get_block(&self, block_root: &Hash256) -> Option<&Block> {
        let block_index = self.proto_array.indices.get(block_root)?;
        self.proto_array
            .nodes
            .get(*block_index)
            .map(|node| &node.block)
    }

    pub fn get_node(&self, block_root: &Hash256) -> Option<&ProtoNode> {
        let index = self.proto_array.indices.get(block_root)?;
        self.proto_array.nodes.get(*index)
    }

    /// Returns the weight of a given block, accounting for any transient negatives as zero.
    pub fn get_weight(&self, block_root: &Hash256) -> Option<u64> {
        let block_index = self.proto_array.indices.get(block_root)?;
        self.proto_array
            .nodes
            .get(*block_index)
            .map(|node| node.weight.max(0) as u64)
    }

    /// Returns the block's execution status if the block is known.
    pub fn get_block_execution_status(&self, block_root: &Hash256) -> Option<ExecutionStatus> {
        self.get_block(block_root)
            .map(|block| block.execution_status)
    }

    /// See `ProtoArray::prune`. Also remaps vote indices across the prune.
    pub fn prune(&mut self, finalized_root: Hash256) -> Result<(), Error> {
        let Some(pruned_count) = self.proto_array.prune(finalized_root)? else {
            return Ok(());
        };

        // Votes referencing pruned nodes become null; votes referencing survivors shift down.
        for vote in self.votes.iter_mut() {
            vote.current_index = vote
                .current_index
                .and_then(|index| index.checked_sub(pruned_count));
            vote.next_index = vote
                .next_index
                .and_then(|index| index.checked_sub(pruned_count));
        }
        Ok(())
    }

    pub fn set_prune_threshold(&mut self, prune_threshold: usize) {
        self.proto_array.prune_threshold = prune_threshold;
    }

    pub fn len(&self) -> usize {
        self.proto_array.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proto_array.nodes.is_empty()
    }

    pub fn iter_nodes<'a>(&'a self, block_root: &Hash256) -> Iter<'a> {
        self.proto_array.iter_nodes(block_root)
    }

    pub fn iter_block_roots<'a>(
        &'a self,
        block_root: &Hash256,
    ) -> impl Iterator<Item = (Hash256, Slot)> + 'a {
        self.proto_array.iter_block_roots(block_root)
    }

    pub fn get_ancestor_at_slot(&self, root: Hash256, slot: Slot) -> Option<Hash256> {
        self.proto_array.get_ancestor_at_slot(root, slot)
    }

    pub fn is_descendant(&self, ancestor_root: Hash256, descendant_root: Hash256) -> bool {
        self.proto_array.is_descendant(ancestor_root, descendant_root)
    }

    pub fn heads(&self) -> Vec<Hash256> {
        self.proto_array.heads()
    }

    pub fn justified_checkpoint(&self) -> Checkpoint {
        self.proto_array.justified_checkpoint
    }

    pub fn finalized_checkpoint(&self) -> Checkpoint {
        self.proto_array.finalized_checkpoint
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        SszContainer::from(self).as_ssz_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        SszContainer::from_ssz_bytes(bytes)?.try_into()
    }
}

/// Returns a list of `deltas`, where there is one delta for each of the `num_nodes` nodes.
///
/// The deltas are formed by a change between `old_balances` and `new_balances`, and/or a change
/// of vote in `votes`.
///
/// ## Errors
///
/// - If a vote index is out of the `0..num_nodes` range: a fatal logic error.
pub fn compute_deltas(
    num_nodes: usize,
    votes: &mut ElasticList<VoteTracker>,
    old_balances: &[u64],
    new_balances: &[u64],
    equivocating_indices: &BTreeSet<u64>,
) -> Result<Vec<i64>, Error> {
    let mut deltas = vec![0_i64; num_nodes];

    for (val_index, vote) in votes.iter_mut().enumerate() {
        // There is no need to create a score change if the validator has never voted or all its
        // votes are for the zero hash (genesis block).
        if *vote == VoteTracker::default() {
            continue;
        }

        // Validators that have equivocated remove their current contribution and never
        // contribute again.
        if equivocating_indices.contains(&(val_index as u64)) {
            if let Some(current_index) = vote.current_index {
                let delta = deltas
                    .get_mut(current_index)
                    .ok_or(Error::InvalidNodeDelta(current_index))?;
                *delta = delta
                    .checked_sub(old_balances.get(val_index).copied().unwrap_or(0) as i64)
                    .ok_or(Error::DeltaOverflow(current_index))?;
                vote.current_index = None;
            }
            vote.next_index = None;
            continue;
        }

        // If the validator was not included in the _old_ balances (i.e., it did not exist yet)
        // then say its balance was zero.
        let old_balance = old_balances.get(val_index).copied().unwrap_or(0);

        // If the validator is not known in the _new_ balances, then use a balance of zero.
        //
        // It is possible that there is a vote for an unknown validator if we change our
        // justified state to a new state with a higher epoch that is on a different fork
        // because that fork may have on-boarded less validators than the prior fork.
        let new_balance = new_balances.get(val_index).copied().unwrap_or(0);

        if vote.current_index != vote.next_index || old_balance != new_balance {
            if let Some(current_index) = vote.current_index {
                let delta = deltas
                    .get_mut(current_index)
                    .ok_or(Error::InvalidNodeDelta(current_index))?;
                *delta = delta
                    .checked_sub(old_balance as i64)
                    .ok_or(Error::DeltaOverflow(current_index))?;
            }

            if let Some(next_index) = vote.next_index {
                let delta = deltas
                    .get_mut(next_index)
                    .ok_or(Error::InvalidNodeDelta(next_index))?;
                *delta = delta
                    .checked_add(new_balance as i64)
                    .ok_or(Error::DeltaOverflow(next_index))?;
            }

            vote.current_index = vote.next_index;
        }
    }

    Ok(deltas)
}
