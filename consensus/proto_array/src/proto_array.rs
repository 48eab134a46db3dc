use crate::error::Error;
use crate::{JustifiedBalances, proto_array_fork_choice::{Block, ExecutionStatus}};
use ssz_derive::{Decode, Encode};
use std::collections::{HashMap, HashSet};
use types::consts::SLOTS_PER_EPOCH;
use types::{ChainSpec, Checkpoint, Epoch, ExecutionBlockHash, Hash256, Slot};

/// The aggregated boost applied to the block proposed in the current slot, if timely.
#[derive(Default, PartialEq, Clone, Copy, Debug, Encode, Decode)]
pub struct ProposerBoost {
    pub root: Hash256,
    pub score: u64,
}

/// Compute the score contribution equal to `proposer_score_boost`-percent of a single
/// committee's weight.
pub fn calculate_committee_fraction(
    justified_balances: &JustifiedBalances,
    proposer_score_boost: u64,
) -> Option<u64> {
    let committee_weight = justified_balances
        .total_effective_balance
        .checked_div(SLOTS_PER_EPOCH)?;
    committee_weight
        .checked_mul(proposer_score_boost)?
        .checked_div(100)
}

/// Instruction to invalidate one or more blocks after the engine reported an invalid payload.
#[derive(Debug, Clone, PartialEq)]
pub enum InvalidationOperation {
    /// Invalidate only `block_root` and its descendants; its ancestors are untouched.
    InvalidateOne { block_root: Hash256 },
    /// Invalidate every block between `head_block_root` and the block carrying
    /// `latest_valid_ancestor` (exclusive), plus all their descendants.
    InvalidateMany {
        head_block_root: Hash256,
        always_invalidate_head: bool,
        latest_valid_ancestor: ExecutionBlockHash,
    },
}

impl InvalidationOperation {
    pub fn block_root(&self) -> Hash256 {
        match self {
            InvalidationOperation::InvalidateOne { block_root } => *block_root,
            InvalidationOperation::InvalidateMany {
                head_block_root, ..
            } => *head_block_root,
        }
    }

    pub fn latest_valid_ancestor(&self) -> Option<ExecutionBlockHash> {
        match self {
            InvalidationOperation::InvalidateOne { .. } => None,
            InvalidationOperation::InvalidateMany {
                latest_valid_ancestor,
                ..
            } => Some(*latest_valid_ancestor),
        }
    }

    pub fn invalidate_block_root(&self) -> bool {
        match self {
            InvalidationOperation::InvalidateOne { .. } => true,
            InvalidationOperation::InvalidateMany {
                always_invalidate_head,
                ..
            } => *always_invalidate_head,
        }
    }
}

/// A block summary extended with the DAG metadata maintained by `ProtoArray`.
#[derive(Clone, PartialEq, Debug)]
pub struct ProtoNode {
    pub block: Block,
    /// The index of the parent node in `ProtoArray::nodes`, if known.
    pub parent: Option<usize>,
    /// Net vote weight of this node and all its descendants.
    ///
    /// Signed so that transient negatives during delta application are representable.
    pub weight: i64,
    pub best_child: Option<usize>,
    pub best_descendant: Option<usize>,
}

impl ProtoNode {
    pub fn root(&self) -> Hash256 {
        self.block.root
    }

    pub fn slot(&self) -> Slot {
        self.block.slot
    }
}

#[derive(PartialEq, Debug, Clone)]
pub struct ProtoArray {
    /// Do not attempt to prune the tree unless it has at least this many nodes. Small prunes
    /// simply waste time.
    pub prune_threshold: usize,
    pub justified_checkpoint: Checkpoint,
    pub finalized_checkpoint: Checkpoint,
    pub nodes: Vec<ProtoNode>,
    pub indices: HashMap<Hash256, usize>,
    pub previous_proposer_boost: ProposerBoost,
}

impl ProtoArray {
    /// Iterate backwards through the array, touching all nodes and their parents and potentially
    /// the best-child of each parent.
    ///
    /// The structure of the `self.nodes` array ensures that the child of each node is always
    /// touched before its parent.
    ///
    /// For each node, the following is done:
    ///
    /// - Update the node's weight with the corresponding delta (and proposer boost).
    /// - Back-propagate each node's delta to its parents delta.
    /// - Compare the current node with the parents best-child, updating it if the current node
    ///   should become the best child.
    /// - If required, update the parents best-descendant with the current node or its best-descendant.
    pub fn apply_score_changes(
        &mut self,
        mut deltas: Vec<i64>,
        justified_checkpoint: Checkpoint,
        finalized_checkpoint: Checkpoint,
        new_justified_balances: &JustifiedBalances,
        proposer_boost_root: Hash256,
        current_slot: Slot,
        spec: &ChainSpec,
    ) -> Result<(), Error> {
        if deltas.len() != self.indices.len() {
            return Err(Error::InvalidDeltaLen {
                deltas: deltas.len(),
                indices: self.indices.len(),
            });
        }

        if justified_checkpoint != self.justified_checkpoint
            || finalized_checkpoint != self.finalized_checkpoint
        {
            self.justified_checkpoint = justified_checkpoint;
            self.finalized_checkpoint = finalized_checkpoint;
        }

        // The new proposer boost score, computed once and applied to the boosted node.
        let mut new_proposer_boost_score = 0u64;

        for node_index in (0..self.nodes.len()).rev() {
            let node = self
                .nodes
                .get_mut(node_index)
                .ok_or(Error::InvalidNodeIndex(node_index))?;

            let mut node_delta = deltas
                .get(node_index)
                .copied()
                .ok_or(Error::InvalidNodeDelta(node_index))?;

            // If we find the node for which the proposer boost was previously applied, decrease
            // the delta by the previous score amount.
            if self.previous_proposer_boost.root != Hash256::default()
                && self.previous_proposer_boost.root == node.root()
            {
                node_delta = node_delta
                    .checked_sub(self.previous_proposer_boost.score as i64)
                    .ok_or(Error::DeltaOverflow(node_index))?;
            }
            // If we find the node matching the current proposer boost root, increase the delta
            // by the new score amount.
            if let Some(proposer_score_boost) = spec.proposer_score_boost
                && proposer_boost_root != Hash256::default()
                && proposer_boost_root == node.root()
            {
                let proposer_score =
                    calculate_committee_fraction(new_justified_balances, proposer_score_boost)
                        .ok_or(Error::ProposerBoostOverflow(node_index))?;
                new_proposer_boost_score = proposer_score;
                node_delta = node_delta
                    .checked_add(proposer_score as i64)
                    .ok_or(Error::DeltaOverflow(node_index))?;
            }

            node.weight = node
                .weight
                .checked_add(node_delta)
                .ok_or(Error::DeltaOverflow(node_index))?;

            // Back-propagate the nodes delta to its parent.
            if let Some(parent_index) = node.parent {
                let parent_delta = deltas
                    .get_mut(parent_index)
                    .ok_or(Error::InvalidParentDelta(parent_index))?;
                *parent_delta = parent_delta
                    .checked_add(node_delta)
                    .ok_or(Error::DeltaOverflow(parent_index))?;
            }
        }

        self.previous_proposer_boost = ProposerBoost {
            root: proposer_boost_root,
            score: new_proposer_boost_score,
        };

        // A second time, iterate backwards through all indices in `self.nodes`.
        for node_index in (0..self.nodes.len()).rev() {
            if let Some(parent_index) = self
                .nodes
                .get(node_index)
                .ok_or(Error::InvalidNodeIndex(node_index))?
                .parent
            {
                self.maybe_update_best_child_and_descendant(parent_index, node_index, current_slot)?;
            }
        }

        Ok(())
    }

    /// Register a block with the fork choice. Insertion is idempotent on the block root.
    pub fn on_block(&mut self, block: Block, current_slot: Slot) -> Result<(), Error> {
        // If the block is already known, simply ignore it.
        if self.indices.contains_key(&block.root) {
            return Ok(());
        }

        let parent = match block.parent_root {
            Some(parent_root) => match self.indices.get(&parent_root).copied() {
                Some(parent_index) => Some(parent_index),
                None => {
                    return Err(Error::UnknownParent {
                        block_root: block.root,
                        parent_root,
                    });
                }
            },
            // Only the anchor block is allowed to have no parent.
            None => None,
        };

        let node_index = self.nodes.len();
        let node = ProtoNode {
            block,
            parent,
            weight: 0,
            best_child: None,
            best_descendant: None,
        };

        self.indices.insert(node.root(), node_index);
        self.nodes.push(node);

        if let Some(parent_index) = parent {
            self.maybe_update_best_child_and_descendant(parent_index, node_index, current_slot)?;
        }

        Ok(())
    }

    /// Walk backwards from `block_root`, marking all blocks as execution-valid until a valid or
    /// pre-merge block is found.
    ///
    /// An invalid ancestor of a valid payload is a fatal inconsistency.
    pub fn propagate_execution_payload_validation(
        &mut self,
        block_root: Hash256,
    ) -> Result<(), Error> {
        let mut index = *self
            .indices
            .get(&block_root)
            .ok_or(Error::NodeUnknown(block_root))?;

        loop {
            let node = self
                .nodes
                .get_mut(index)
                .ok_or(Error::InvalidNodeIndex(index))?;
            let parent = node.parent;

            match node.block.execution_status {
                // There is no more verification to apply to the ancestors.
                ExecutionStatus::Valid(_) | ExecutionStatus::Irrelevant(_) => return Ok(()),
                ExecutionStatus::Optimistic(payload_block_hash) => {
                    node.block.execution_status = ExecutionStatus::Valid(payload_block_hash);
                }
                ExecutionStatus::Invalid(payload_block_hash) => {
                    return Err(Error::InvalidAncestorOfValidPayload {
                        ancestor_block_root: node.block.root,
                        ancestor_payload_block_hash: Some(payload_block_hash),
                    });
                }
            }

            match parent {
                Some(parent_index) => index = parent_index,
                None => return Ok(()),
            }
        }
    }

    /// Invalidate the blocks between the given head and its latest valid ancestor, along with
    /// every descendant of an invalidated block.
    pub fn propagate_execution_payload_invalidation(
        &mut self,
        op: &InvalidationOperation,
    ) -> Result<(), Error> {
        let head_block_root = op.block_root();
        let latest_valid_ancestor_hash = op.latest_valid_ancestor();

        let head_index = *self
            .indices
            .get(&head_block_root)
            .ok_or(Error::NodeUnknown(head_block_root))?;

        let mut invalidated_indices: HashSet<usize> = HashSet::new();
        let mut index = head_index;

        // First pass: walk from the head towards the anchor.
        loop {
            let node = self
                .nodes
                .get_mut(index)
                .ok_or(Error::InvalidNodeIndex(index))?;
            let parent = node.parent;

            // If this is the latest valid ancestor, it and everything above it stays valid.
            if let Some(lvh) = latest_valid_ancestor_hash
                && node.block.execution_status.block_hash() == Some(lvh)
            {
                match node.block.execution_status {
                    ExecutionStatus::Optimistic(hash) => {
                        node.block.execution_status = ExecutionStatus::Valid(hash)
                    }
                    ExecutionStatus::Valid(_) | ExecutionStatus::Irrelevant(_) => (),
                    ExecutionStatus::Invalid(_) => {
                        return Err(Error::ValidExecutionStatusBecameInvalid {
                            block_root: node.block.root,
                            payload_block_hash: node.block.execution_status.block_hash(),
                        });
                    }
                }
                break;
            }

            // Pre-merge blocks can never be invalidated, and walking past them means the
            // supplied latest-valid-hash was not found on this chain.
            if node.block.execution_status.is_irrelevant() {
                break;
            }

            let invalidate_this_node = index != head_index || op.invalidate_block_root();
            if invalidate_this_node {
                match node.block.execution_status {
                    ExecutionStatus::Valid(hash) => {
                        return Err(Error::ValidExecutionStatusBecameInvalid {
                            block_root: node.block.root,
                            payload_block_hash: Some(hash),
                        });
                    }
                    ExecutionStatus::Optimistic(hash) | ExecutionStatus::Invalid(hash) => {
                        node.block.execution_status = ExecutionStatus::Invalid(hash);
                        invalidated_indices.insert(index);
                    }
                    ExecutionStatus::Irrelevant(_) => break,
                }
            }

            // Stop the walk when only the head should be invalidated.
            if latest_valid_ancestor_hash.is_none() {
                break;
            }

            match parent {
                Some(parent_index) => index = parent_index,
                None => break,
            }
        }

        // Second pass: invalidate all descendants of invalidated nodes. Children always appear
        // after their parents in `self.nodes`, so one forward pass suffices.
        for node_index in 0..self.nodes.len() {
            let node = self
                .nodes
                .get_mut(node_index)
                .ok_or(Error::InvalidNodeIndex(node_index))?;
            if let Some(parent_index) = node.parent
                && invalidated_indices.contains(&parent_index)
            {
                match node.block.execution_status {
                    ExecutionStatus::Valid(hash) => {
                        return Err(Error::ValidExecutionStatusBecameInvalid {
                            block_root: node.block.root,
                            payload_block_hash: Some(hash),
                        });
                    }
                    ExecutionStatus::Optimistic(hash) | ExecutionStatus::Invalid(hash) => {
                        node.block.execution_status = ExecutionStatus::Invalid(hash)
                    }
                    // An irrelevant block can never descend from an execution block.
                    ExecutionStatus::Irrelevant(_) => (),
                }
                invalidated_indices.insert(node_index);
            }
        }

        Ok(())
    }

    /// Follows the best-descendant links to find the best block (as determined by the filtered
    /// LMD-GHOST rule), starting from the justified root.
    pub fn find_head(&self, justified_root: &Hash256, current_slot: Slot) -> Result<Hash256, Error> {
        let justified_index = self
            .indices
            .get(justified_root)
            .copied()
            .ok_or(Error::JustifiedNodeUnknown(*justified_root))?;

        let justified_node = self
            .nodes
            .get(justified_index)
            .ok_or(Error::InvalidJustifiedIndex(justified_index))?;

        let best_descendant_index = justified_node.best_descendant.unwrap_or(justified_index);

        let best_node = self
            .nodes
            .get(best_descendant_index)
            .ok_or(Error::InvalidBestDescendant(best_descendant_index))?;

        // Perform a sanity check that the node is indeed valid to be the head.
        if !self.node_is_viable_for_head(best_node, current_slot) {
            return Err(Error::InvalidBestDescendant(best_descendant_index));
        }

        Ok(best_node.root())
    }

    /// Update the tree with new finalization information, dropping every node that precedes the
    /// finalized root in insertion order.
    ///
    /// Votes into the pruned region are nulled; surviving votes are re-indexed by the caller
    /// using the returned offset.
    pub fn prune(&mut self, finalized_root: Hash256) -> Result<Option<usize>, Error> {
        let finalized_index = *self
            .indices
            .get(&finalized_root)
            .ok_or(Error::FinalizedNodeUnknown(finalized_root))?;

        if finalized_index < self.prune_threshold {
            // Pruning at small numbers incurs more cost than benefit.
            return Ok(None);
        }

        // Remove the `self.indices` key/values for all the to-be-deleted nodes.
        for node_index in 0..finalized_index {
            let root = self
                .nodes
                .get(node_index)
                .ok_or(Error::InvalidNodeIndex(node_index))?
                .root();
            self.indices.remove(&root);
        }

        // Drop all the nodes prior to finalization.
        self.nodes = self.nodes.split_off(finalized_index);

        // Adjust the indices map.
        for (_root, index) in self.indices.iter_mut() {
            *index = index
                .checked_sub(finalized_index)
                .ok_or(Error::IndexOverflow("indices"))?;
        }

        // Iterate through all the existing nodes and adjust their indices to match the new
        // layout of `self.nodes`.
        for node in self.nodes.iter_mut() {
            node.parent = node
                .parent
                .and_then(|index| index.checked_sub(finalized_index));
            node.best_child = node
                .best_child
                .and_then(|index| index.checked_sub(finalized_index));
            node.best_descendant = node
                .best_descendant
                .and_then(|index| index.checked_sub(finalized_index));
        }

        Ok(Some(finalized_index))
    }

    /// Observe the parent at `parent_index` with respect to the child at `child_index` and
    /// potentially modify the `parent.best_child` and `parent.best_descendant` values.
    ///
    /// There are four outcomes:
    ///
    /// - The child is already the best child but it's now invalid due to a FFG change and should be removed.
    /// - The child is already the best child and the parent is updated with the new best-descendant.
    /// - The child is not the best child but becomes the best child.
    /// - The child is not the best child and does not become the best child.
    fn maybe_update_best_child_and_descendant(
        &mut self,
        parent_index: usize,
        child_index: usize,
        current_slot: Slot,
    ) -> Result<(), Error> {
        let child = self
            .nodes
            .get(child_index)
            .ok_or(Error::InvalidNodeIndex(child_index))?;
        let parent = self
            .nodes
            .get(parent_index)
            .ok_or(Error::InvalidNodeIndex(parent_index))?;

        let child_leads_to_viable_head = self.node_leads_to_viable_head(child, current_slot)?;

        // These three variables are aliases to the three options that we may set the
        // `parent.best_child` and `parent.best_descendant` to.
        let change_to_none = (None, None);
        let change_to_child = (
            Some(child_index),
            child.best_descendant.or(Some(child_index)),
        );
        let no_change = (parent.best_child, parent.best_descendant);

        let (new_best_child, new_best_descendant) = if let Some(best_child_index) =
            parent.best_child
        {
            if best_child_index == child_index && !child_leads_to_viable_head {
                // If the child is already the best-child of the parent but it's not viable for
                // the head, remove it.
                change_to_none
            } else if best_child_index == child_index {
                // If the child is the best-child already, set it again to ensure that the
                // best-descendant of the parent is updated.
                change_to_child
            } else {
                let best_child = self
                    .nodes
                    .get(best_child_index)
                    .ok_or(Error::InvalidBestChildIndex(best_child_index))?;

                let best_child_leads_to_viable_head =
                    self.node_leads_to_viable_head(best_child, current_slot)?;

                if child_leads_to_viable_head && !best_child_leads_to_viable_head {
                    // The child leads to a viable head, but the current best-child doesn't.
                    change_to_child
                } else if !child_leads_to_viable_head && best_child_leads_to_viable_head {
                    // The best child leads to a viable head, but the child doesn't.
                    no_change
                } else if child.weight == best_child.weight {
                    // Tie-breaker of equal weights by root.
                    if child.root() >= best_child.root() {
                        change_to_child
                    } else {
                        no_change
                    }
                } else {
                    // Choose the winner by weight.
                    if child.weight >= best_child.weight {
                        change_to_child
                    } else {
                        no_change
                    }
                }
            }
        } else if child_leads_to_viable_head {
            // There is no current best-child and the child is viable.
            change_to_child
        } else {
            // There is no current best-child but the child is not viable.
            no_change
        };

        let parent = self
            .nodes
            .get_mut(parent_index)
            .ok_or(Error::InvalidNodeIndex(parent_index))?;

        parent.best_child = new_best_child;
        parent.best_descendant = new_best_descendant;

        Ok(())
    }

    /// Indicates if the node itself is viable for the head, or if it's best descendant is viable
    /// for the head.
    fn node_leads_to_viable_head(&self, node: &ProtoNode, current_slot: Slot) -> Result<bool, Error> {
        let best_descendant_is_viable_for_head =
            if let Some(best_descendant_index) = node.best_descendant {
                let best_descendant = self
                    .nodes
                    .get(best_descendant_index)
                    .ok_or(Error::InvalidBestDescendant(best_descendant_index))?;

                self.node_is_viable_for_head(best_descendant, current_slot)
            } else {
                false
            };

        Ok(best_descendant_is_viable_for_head || self.node_is_viable_for_head(node, current_slot))
    }

    /// This is the equivalent to the `filter_block_tree` function in the Ethereum consensus spec:
    ///
    /// Any node that has a different finalized or justified epoch should not be viable for the
    /// head, nor should a node with an invalid execution payload.
    fn node_is_viable_for_head(&self, node: &ProtoNode, _current_slot: Slot) -> bool {
        if node.block.execution_status.is_invalid() {
            return false;
        }

        let genesis_epoch = Epoch::new(0);
        let node_justified_epoch = node
            .block
            .unrealized_justified_checkpoint
            .unwrap_or(node.block.justified_checkpoint)
            .epoch;
        let node_finalized_epoch = node
            .block
            .unrealized_finalized_checkpoint
            .unwrap_or(node.block.finalized_checkpoint)
            .epoch;

        let correct_justified = self.justified_checkpoint.epoch == genesis_epoch
            || node_justified_epoch == self.justified_checkpoint.epoch;
        let correct_finalized = self.finalized_checkpoint.epoch == genesis_epoch
            || node_finalized_epoch == self.finalized_checkpoint.epoch;

        correct_justified && correct_finalized
    }

    /// Return a reverse iterator over the chain of ancestors of `block_root`, starting at the
    /// block itself.
    pub fn iter_nodes<'a>(&'a self, block_root: &Hash256) -> Iter<'a> {
        let next_node_index = self.indices.get(block_root).copied();
        Iter {
            next_node_index,
            proto_array: self,
        }
    }

    pub fn iter_block_roots<'a>(
        &'a self,
        block_root: &Hash256,
    ) -> impl Iterator<Item = (Hash256, Slot)> + 'a {
        self.iter_nodes(block_root)
            .map(|node| (node.root(), node.slot()))
    }

    /// Returns the root of the ancestor of `root` at `slot`, walking the parent links.
    pub fn get_ancestor_at_slot(&self, root: Hash256, slot: Slot) -> Option<Hash256> {
        self.iter_nodes(&root)
            .find(|node| node.slot() <= slot)
            .map(|node| node.root())
    }

    /// Returns `true` if `ancestor_root` is an ancestor of (or equal to) `descendant_root`.
    pub fn is_descendant(&self, ancestor_root: Hash256, descendant_root: Hash256) -> bool {
        let Some(&ancestor_index) = self.indices.get(&ancestor_root) else {
            return false;
        };
        let ancestor_slot = self.nodes[ancestor_index].slot();
        self.get_ancestor_at_slot(descendant_root, ancestor_slot) == Some(ancestor_root)
    }

    /// Enumerate the roots of the current leaves (blocks with no children).
    pub fn heads(&self) -> Vec<Hash256> {
        let mut has_child = vec![false; self.nodes.len()];
        for node in &self.nodes {
            if let Some(parent) = node.parent {
                has_child[parent] = true;
            }
        }
        self.nodes
            .iter()
            .zip(has_child)
            .filter(|(_, has_child)| !has_child)
            .map(|(node, _)| node.root())
            .collect()
    }
}

/// Reverse iterator over a chain of ancestors.
pub struct Iter<'a> {
    next_node_index: Option<usize>,
    proto_array: &'a ProtoArray,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a ProtoNode;

    fn next(&mut self) -> Option<Self::Item> {
        let next_node_index = self.next_node_index?;
        let node = self.proto_array.nodes.get(next_node_index)?;
        self.next_node_index = node.parent;
        Some(node)
    }
}
