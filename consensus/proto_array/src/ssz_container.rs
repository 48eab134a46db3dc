use crate::proto_array::{ProposerBoost, ProtoArray, ProtoNode};
use crate::proto_array_fork_choice::{
    Block, DataAvailabilityStatus, ElasticList, ExecutionStatus, NULL_VOTE_INDEX,
    ProtoArrayForkChoice, VoteTracker, VoteTrackerSsz,
};
use crate::{Error, JustifiedBalances};
use ssz_derive::{Decode, Encode};
use std::collections::HashMap;
use types::{Checkpoint, Hash256, Slot};

/// The persisted form of a single proto node.
///
/// Optional indices are stored as `NULL_VOTE_INDEX`; the signed weight is stored as its
/// two's-complement bits.
#[derive(Encode, Decode)]
pub struct SszNode {
    slot: Slot,
    root: Hash256,
    parent_root: Hash256,
    has_parent_root: bool,
    state_root: Hash256,
    target_root: Hash256,
    justified_checkpoint: Checkpoint,
    finalized_checkpoint: Checkpoint,
    execution_status: ExecutionStatus,
    data_availability_status: DataAvailabilityStatus,
    unrealized_justified_checkpoint: Checkpoint,
    has_unrealized_justified: bool,
    unrealized_finalized_checkpoint: Checkpoint,
    has_unrealized_finalized: bool,
    timely: bool,
    parent: u32,
    weight: u64,
    best_child: u32,
    best_descendant: u32,
}

fn index_to_ssz(index: Option<usize>) -> u32 {
    index.map(|i| i as u32).unwrap_or(NULL_VOTE_INDEX)
}

fn index_from_ssz(index: u32) -> Option<usize> {
    (index != NULL_VOTE_INDEX).then_some(index as usize)
}

impl From<&ProtoNode> for SszNode {
    fn from(node: &ProtoNode) -> Self {
        Self {
            slot: node.block.slot,
            root: node.block.root,
            parent_root: node.block.parent_root.unwrap_or_default(),
            has_parent_root: node.block.parent_root.is_some(),
            state_root: node.block.state_root,
            target_root: node.block.target_root,
            justified_checkpoint: node.block.justified_checkpoint,
            finalized_checkpoint: node.block.finalized_checkpoint,
            execution_status: node.block.execution_status,
            data_availability_status: node.block.data_availability_status,
            unrealized_justified_checkpoint: node
                .block
                .unrealized_justified_checkpoint
                .unwrap_or_default(),
            has_unrealized_justified: node.block.unrealized_justified_checkpoint.is_some(),
            unrealized_finalized_checkpoint: node
                .block
                .unrealized_finalized_checkpoint
                .unwrap_or_default(),
            has_unrealized_finalized: node.block.unrealized_finalized_checkpoint.is_some(),
            timely: node.block.timely,
            parent: index_to_ssz(node.parent),
            weight: node.weight as u64,
            best_child: index_to_ssz(node.best_child),
            best_descendant: index_to_ssz(node.best_descendant),
        }
    }
}

impl From<SszNode> for ProtoNode {
    fn from(ssz_node: SszNode) -> Self {
        ProtoNode {
            block: Block {
                slot: ssz_node.slot,
                root: ssz_node.root,
                parent_root: ssz_node.has_parent_root.then_some(ssz_node.parent_root),
                state_root: ssz_node.state_root,
                target_root: ssz_node.target_root,
                justified_checkpoint: ssz_node.justified_checkpoint,
                finalized_checkpoint: ssz_node.finalized_checkpoint,
                execution_status: ssz_node.execution_status,
                data_availability_status: ssz_node.data_availability_status,
                unrealized_justified_checkpoint: ssz_node
                    .has_unrealized_justified
                    .then_some(ssz_node.unrealized_justified_checkpoint),
                unrealized_finalized_checkpoint: ssz_node
                    .has_unrealized_finalized
                    .then_some(ssz_node.unrealized_finalized_checkpoint),
                timely: ssz_node.timely,
            },
            parent: index_from_ssz(ssz_node.parent),
            weight: ssz_node.weight as i64,
            best_child: index_from_ssz(ssz_node.best_child),
            best_descendant: index_from_ssz(ssz_node.best_descendant),
        }
    }
}

/// The persisted form of the whole fork-choice structure. The `indices` map is rebuilt on
/// decode.
#[derive(Encode, Decode)]
pub struct SszContainer {
    votes: Vec<VoteTrackerSsz>,
    balances: Vec<u64>,
    prune_threshold: u64,
    justified_checkpoint: Checkpoint,
    finalized_checkpoint: Checkpoint,
    nodes: Vec<SszNode>,
    previous_proposer_boost: ProposerBoost,
}

impl From<&ProtoArrayForkChoice> for SszContainer {
    fn from(from: &ProtoArrayForkChoice) -> Self {
        let proto_array = &from.proto_array;

        Self {
            votes: from.votes.iter().map(VoteTrackerSsz::from).collect(),
            balances: from.balances.effective_balances.clone(),
            prune_threshold: proto_array.prune_threshold as u64,
            justified_checkpoint: proto_array.justified_checkpoint,
            finalized_checkpoint: proto_array.finalized_checkpoint,
            nodes: proto_array.nodes.iter().map(SszNode::from).collect(),
            previous_proposer_boost: proto_array.previous_proposer_boost,
        }
    }
}

impl TryFrom<SszContainer> for ProtoArrayForkChoice {
    type Error = Error;

    fn try_from(from: SszContainer) -> Result<Self, Error> {
        let nodes: Vec<ProtoNode> = from.nodes.into_iter().map(ProtoNode::from).collect();
        let indices: HashMap<Hash256, usize> = nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (node.root(), index))
            .collect();

        let proto_array = ProtoArray {
            prune_threshold: from.prune_threshold as usize,
            justified_checkpoint: from.justified_checkpoint,
            finalized_checkpoint: from.finalized_checkpoint,
            nodes,
            indices,
            previous_proposer_boost: from.previous_proposer_boost,
        };

        Ok(Self {
            proto_array,
            votes: ElasticList(from.votes.into_iter().map(VoteTracker::from).collect()),
            balances: JustifiedBalances::from_effective_balances(from.balances)
                .map_err(|_| Error::IndexOverflow("balances"))?,
        })
    }
}
