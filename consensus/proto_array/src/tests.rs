use crate::*;
use std::collections::BTreeSet;
use types::{
    ChainSpec, Checkpoint, Epoch, ExecutionBlockHash, FixedBytesExtended, Hash256, Slot,
    consts::SLOTS_PER_EPOCH,
};

fn checkpoint(epoch: u64, root: u64) -> Checkpoint {
    Checkpoint {
        epoch: Epoch::new(epoch),
        root: Hash256::from_low_u64_be(root),
    }
}

fn test_spec() -> ChainSpec {
    ChainSpec::mainnet()
}

struct Harness {
    fc: ProtoArrayForkChoice,
    spec: ChainSpec,
    justified: Checkpoint,
    finalized: Checkpoint,
}

impl Harness {
    /// A fork choice anchored at a genesis-like finalized block with root 1.
    fn new() -> Self {
        let justified = checkpoint(0, 1);
        let finalized = checkpoint(0, 1);
        let mut fc = ProtoArrayForkChoice::new(
            Slot::new(0),
            Slot::new(0),
            Hash256::from_low_u64_be(100),
            justified,
            finalized,
            ExecutionStatus::irrelevant(),
        )
        .unwrap();
        fc.set_prune_threshold(0);
        Self {
            fc,
            spec: test_spec(),
            justified,
            finalized,
        }
    }

    fn block(&self, slot: u64, root: u64, parent: u64) -> Block {
        Block {
            slot: Slot::new(slot),
            root: Hash256::from_low_u64_be(root),
            parent_root: Some(Hash256::from_low_u64_be(parent)),
            state_root: Hash256::default(),
            target_root: Hash256::from_low_u64_be(1),
            justified_checkpoint: self.justified,
            finalized_checkpoint: self.finalized,
            execution_status: ExecutionStatus::irrelevant(),
            data_availability_status: DataAvailabilityStatus::PreData,
            unrealized_justified_checkpoint: Some(self.justified),
            unrealized_finalized_checkpoint: Some(self.finalized),
            timely: true,
        }
    }

    fn execution_block(&self, slot: u64, root: u64, parent: u64, hash: u64) -> Block {
        Block {
            execution_status: ExecutionStatus::Optimistic(ExecutionBlockHash::from_root(
                Hash256::from_low_u64_be(hash),
            )),
            ..self.block(slot, root, parent)
        }
    }

    fn apply_block(&mut self, block: Block, current_slot: u64) {
        self.fc
            .process_block(block, Slot::new(current_slot))
            .unwrap();
    }

    fn head(&mut self, balances: &JustifiedBalances, current_slot: u64) -> Hash256 {
        self.fc
            .find_head(
                self.justified,
                self.finalized,
                balances,
                Hash256::default(),
                &BTreeSet::new(),
                Slot::new(current_slot),
                &self.spec,
            )
            .unwrap()
    }
}

fn balances(n: usize, each: u64) -> JustifiedBalances {
    JustifiedBalances::from_effective_balances(vec![each; n]).unwrap()
}

mod votes_and_head {
    use super::*;

    #[test]
    fn head_follows_weight() {
        let mut harness = Harness::new();
        // 1 <- 2 <- 3
        //   \- 4
        harness.apply_block(harness.block(1, 2, 1), 1);
        harness.apply_block(harness.block(1, 4, 1), 1);
        harness.apply_block(harness.block(2, 3, 2), 2);

        let balances = balances(3, 32);
        // Validators 0 and 1 vote for 3, validator 2 votes for 4.
        harness
            .fc
            .process_attestation(0, Hash256::from_low_u64_be(3), Epoch::new(0))
            .unwrap();
        harness
            .fc
            .process_attestation(1, Hash256::from_low_u64_be(3), Epoch::new(0))
            .unwrap();
        harness
            .fc
            .process_attestation(2, Hash256::from_low_u64_be(4), Epoch::new(0))
            .unwrap();

        assert_eq!(
            harness.head(&balances, 2),
            Hash256::from_low_u64_be(3),
            "the heavier fork should win"
        );
    }

    #[test]
    fn tie_break_prefers_higher_root() {
        let mut harness = Harness::new();
        harness.apply_block(harness.block(1, 2, 1), 1);
        harness.apply_block(harness.block(1, 3, 1), 1);

        let balances = balances(0, 0);
        assert_eq!(
            harness.head(&balances, 1),
            Hash256::from_low_u64_be(3),
            "with zero weights the lexicographically greater root wins"
        );
    }

    #[test]
    fn getting_head_twice_is_identical() {
        let mut harness = Harness::new();
        harness.apply_block(harness.block(1, 2, 1), 1);
        harness.apply_block(harness.block(1, 3, 1), 1);
        harness
            .fc
            .process_attestation(0, Hash256::from_low_u64_be(2), Epoch::new(0))
            .unwrap();

        let balances = balances(1, 32);
        let first = harness.head(&balances, 1);
        let second = harness.head(&balances, 1);
        assert_eq!(first, second);
    }

    #[test]
    fn vote_for_unknown_block_is_null() {
        let mut harness = Harness::new();
        harness.apply_block(harness.block(1, 2, 1), 1);
        harness
            .fc
            .process_attestation(0, Hash256::from_low_u64_be(999), Epoch::new(0))
            .unwrap();

        let balances = balances(1, 32);
        // The unknown vote contributes nowhere; head falls back to the only child.
        assert_eq!(harness.head(&balances, 1), Hash256::from_low_u64_be(2));
        assert_eq!(harness.fc.get_weight(&Hash256::from_low_u64_be(2)), Some(0));
    }

    #[test]
    fn unknown_parent_is_rejected() {
        let mut harness = Harness::new();
        let orphan = harness.block(1, 2, 999);
        assert!(matches!(
            harness.fc.process_block(orphan, Slot::new(1)),
            Err(Error::UnknownParent { .. })
        ));
    }

    #[test]
    fn duplicate_insert_is_idempotent() {
        let mut harness = Harness::new();
        harness.apply_block(harness.block(1, 2, 1), 1);
        harness.apply_block(harness.block(1, 2, 1), 1);
        assert_eq!(harness.fc.len(), 2);
    }

    #[test]
    fn heads_enumerates_leaves() {
        let mut harness = Harness::new();
        harness.apply_block(harness.block(1, 2, 1), 1);
        harness.apply_block(harness.block(1, 4, 1), 1);
        harness.apply_block(harness.block(2, 3, 2), 2);

        let mut heads = harness.fc.heads();
        heads.sort();
        let mut expected = vec![Hash256::from_low_u64_be(3), Hash256::from_low_u64_be(4)];
        expected.sort();
        assert_eq!(heads, expected);
    }
}

mod pruning {
    use super::*;

    #[test]
    fn prune_drops_pre_finalized_nodes_and_remaps_votes() {
        let mut harness = Harness::new();
        // Chain 1 <- 2 <- 3 <- 4.
        harness.apply_block(harness.block(1, 2, 1), 1);
        harness.apply_block(harness.block(2, 3, 2), 2);
        harness.apply_block(harness.block(3, 4, 3), 3);

        harness
            .fc
            .process_attestation(0, Hash256::from_low_u64_be(4), Epoch::new(0))
            .unwrap();
        let balances = balances(1, 32);
        assert_eq!(harness.head(&balances, 3), Hash256::from_low_u64_be(4));

        // Finalize block 3.
        let finalized_root = Hash256::from_low_u64_be(3);
        harness.justified = Checkpoint {
            epoch: Epoch::new(0),
            root: finalized_root,
        };
        harness.finalized = harness.justified;
        harness.fc.prune(finalized_root).unwrap();

        assert_eq!(harness.fc.len(), 2, "only 3 and 4 remain");
        assert!(!harness.fc.contains_block(&Hash256::from_low_u64_be(2)));
        assert!(harness.fc.contains_block(&finalized_root));

        // The vote for 4 survived the re-index: head computation still works and the
        // node keeps receiving the weight.
        assert_eq!(harness.head(&balances, 3), Hash256::from_low_u64_be(4));
        assert_eq!(
            harness.fc.get_weight(&Hash256::from_low_u64_be(4)),
            Some(32)
        );

        // No node below the finalized slot remains, besides the finalized root itself.
        let finalized_slot = Slot::new(2);
        assert!(
            harness
                .fc
                .iter_nodes(&Hash256::from_low_u64_be(4))
                .all(|node| node.slot() >= finalized_slot)
        );
    }

    #[test]
    fn prune_respects_threshold() {
        let mut harness = Harness::new();
        harness.fc.set_prune_threshold(usize::MAX);
        harness.apply_block(harness.block(1, 2, 1), 1);
        harness.fc.prune(Hash256::from_low_u64_be(2)).unwrap();
        assert_eq!(harness.fc.len(), 2, "prune below threshold is a no-op");
    }
}

mod execution_status {
    use super::*;

    #[test]
    fn invalid_payload_invalidates_descendants() {
        let mut harness = Harness::new();
        // 1 <- 2(h2) <- 3(h3) <- 4(h4)
        //            \- 5(h5)
        harness.apply_block(harness.execution_block(1, 2, 1, 2), 1);
        harness.apply_block(harness.execution_block(2, 3, 2, 3), 2);
        harness.apply_block(harness.execution_block(3, 4, 3, 4), 3);
        harness.apply_block(harness.execution_block(3, 5, 2, 5), 3);

        // The EL reports block 4's payload invalid with latest-valid-hash = h2.
        harness
            .fc
            .process_execution_payload_invalidation(&InvalidationOperation::InvalidateMany {
                head_block_root: Hash256::from_low_u64_be(4),
                always_invalidate_head: true,
                latest_valid_ancestor: ExecutionBlockHash::from_root(Hash256::from_low_u64_be(2)),
            })
            .unwrap();

        // 3 and 4 are invalid; 2 became valid; 5 (sibling fork) is untouched.
        assert!(
            harness
                .fc
                .get_block_execution_status(&Hash256::from_low_u64_be(4))
                .unwrap()
                .is_invalid()
        );
        assert!(
            harness
                .fc
                .get_block_execution_status(&Hash256::from_low_u64_be(3))
                .unwrap()
                .is_invalid()
        );
        assert!(
            harness
                .fc
                .get_block_execution_status(&Hash256::from_low_u64_be(2))
                .unwrap()
                .is_valid_or_irrelevant()
        );
        assert!(
            harness
                .fc
                .get_block_execution_status(&Hash256::from_low_u64_be(5))
                .unwrap()
                .is_strictly_optimistic()
        );

        // The head must not be an invalidated descendant.
        let balances = balances(0, 0);
        let head = harness.head(&balances, 3);
        assert_eq!(head, Hash256::from_low_u64_be(5));
    }

    #[test]
    fn validation_propagates_to_ancestors() {
        let mut harness = Harness::new();
        harness.apply_block(harness.execution_block(1, 2, 1, 2), 1);
        harness.apply_block(harness.execution_block(2, 3, 2, 3), 2);

        harness
            .fc
            .process_execution_payload_validation(Hash256::from_low_u64_be(3))
            .unwrap();

        for root in [2, 3] {
            assert!(
                harness
                    .fc
                    .get_block_execution_status(&Hash256::from_low_u64_be(root))
                    .unwrap()
                    .is_valid_or_irrelevant()
            );
        }
    }
}

mod proposer_head {
    use super::*;

    /// Build the two-block scenario from the re-org policy: an untimely head `H` at `head_slot`
    /// on top of a strong parent `P`.
    fn reorg_harness(head_slot: u64) -> (Harness, Hash256) {
        let mut harness = Harness::new();
        let parent_slot = head_slot - 1;
        harness.apply_block(harness.block(parent_slot, 2, 1), parent_slot);
        let head = Block {
            timely: false,
            ..harness.block(head_slot, 3, 2)
        };
        harness.apply_block(head, head_slot);
        (harness, Hash256::from_low_u64_be(3))
    }

    /// Total balance 32 * 140: committee weight 140, head threshold 28, parent threshold 224.
    fn reorg_balances() -> JustifiedBalances {
        balances(32, 140)
    }

    fn vote_weight(harness: &mut Harness, root: u64, validators: std::ops::Range<usize>) {
        for validator in validators {
            harness
                .fc
                .process_attestation(validator, Hash256::from_low_u64_be(root), Epoch::new(0))
                .unwrap();
        }
    }

    #[test]
    fn override_happy_path() {
        let (mut harness, head_root) = reorg_harness(2);
        let balances = reorg_balances();

        // Two validators vote for the parent (weight 280 > 224); the head gets none (0 < 28).
        vote_weight(&mut harness, 2, 0..2);
        assert_eq!(harness.head(&balances, 2), head_root);

        let info = harness
            .fc
            .get_proposer_head(
                Slot::new(3),
                head_root,
                &balances,
                ReOrgThreshold(20),
                ReOrgThreshold(160),
                &DisallowedReOrgOffsets::default(),
                Epoch::new(2),
            )
            .unwrap();

        assert_eq!(info.parent_node.root(), Hash256::from_low_u64_be(2));
        assert_eq!(info.head_node.root(), head_root);
        assert!(info.head_node.weight.max(0) < info.re_org_head_weight_threshold as i64);
        assert!(info.parent_node.weight.max(0) > info.re_org_parent_weight_threshold as i64);
    }

    #[test]
    fn no_override_at_epoch_boundary() {
        // Head in the last slot of the epoch: the re-org block would land on an epoch start.
        let (mut harness, head_root) = reorg_harness(SLOTS_PER_EPOCH - 1);
        let balances = reorg_balances();
        vote_weight(&mut harness, 2, 0..2);
        assert_eq!(harness.head(&balances, SLOTS_PER_EPOCH - 1), head_root);

        let result = harness.fc.get_proposer_head(
            Slot::new(SLOTS_PER_EPOCH),
            head_root,
            &balances,
            ReOrgThreshold(20),
            ReOrgThreshold(160),
            &DisallowedReOrgOffsets::default(),
            Epoch::new(2),
        );
        assert_eq!(
            result.unwrap_err(),
            ProposerHeadError::DoNotReOrg(DoNotReOrg::ShufflingUnstable)
        );
    }

    #[test]
    fn no_override_for_timely_head() {
        let mut harness = Harness::new();
        harness.apply_block(harness.block(1, 2, 1), 1);
        harness.apply_block(harness.block(2, 3, 2), 2);
        let balances = reorg_balances();
        vote_weight(&mut harness, 2, 0..2);
        let head_root = harness.head(&balances, 2);

        let result = harness.fc.get_proposer_head(
            Slot::new(3),
            head_root,
            &balances,
            ReOrgThreshold(20),
            ReOrgThreshold(160),
            &DisallowedReOrgOffsets::default(),
            Epoch::new(2),
        );
        assert_eq!(
            result.unwrap_err(),
            ProposerHeadError::DoNotReOrg(DoNotReOrg::HeadNotLate)
        );
    }

    #[test]
    fn no_override_when_head_is_strong() {
        let (mut harness, head_root) = reorg_harness(2);
        let balances = reorg_balances();
        // All 32 validators vote for the head: far above the threshold.
        vote_weight(&mut harness, 3, 0..32);
        assert_eq!(harness.head(&balances, 2), head_root);

        let result = harness.fc.get_proposer_head(
            Slot::new(3),
            head_root,
            &balances,
            ReOrgThreshold(20),
            ReOrgThreshold(160),
            &DisallowedReOrgOffsets::default(),
            Epoch::new(2),
        );
        assert!(matches!(
            result.unwrap_err(),
            ProposerHeadError::DoNotReOrg(DoNotReOrg::HeadNotWeak { .. })
        ));
    }
}

mod deltas {
    use super::*;

    fn run_deltas(
        votes: &mut ElasticList<VoteTracker>,
        num_nodes: usize,
        old: &[u64],
        new: &[u64],
        equivocating: &BTreeSet<u64>,
    ) -> Vec<i64> {
        compute_deltas(num_nodes, votes, old, new, equivocating).unwrap()
    }

    #[test]
    fn zero_votes_produce_zero_deltas() {
        let mut votes = ElasticList::default();
        for i in 0..8 {
            votes.get_mut(i);
        }
        let deltas = run_deltas(&mut votes, 4, &[32; 8], &[32; 8], &BTreeSet::new());
        assert_eq!(deltas, vec![0; 4]);
    }

    #[test]
    fn fresh_votes_add_weight() {
        let mut votes = ElasticList::default();
        for i in 0..4 {
            *votes.get_mut(i) = VoteTracker {
                current_index: None,
                next_index: Some(1),
                next_epoch: Epoch::new(1),
            };
        }
        let deltas = run_deltas(&mut votes, 2, &[32; 4], &[32; 4], &BTreeSet::new());
        assert_eq!(deltas, vec![0, 4 * 32]);
        // Votes rotated into place.
        assert!(votes.iter().all(|v| v.current_index == Some(1)));
    }

    #[test]
    fn moved_votes_transfer_weight() {
        let mut votes = ElasticList::default();
        for i in 0..4 {
            *votes.get_mut(i) = VoteTracker {
                current_index: Some(0),
                next_index: Some(1),
                next_epoch: Epoch::new(1),
            };
        }
        let deltas = run_deltas(&mut votes, 2, &[32; 4], &[32; 4], &BTreeSet::new());
        assert_eq!(deltas, vec![-(4 * 32), 4 * 32]);
    }

    /// Invariant: the sum of deltas equals the net balance change across tracked indices.
    #[test]
    fn deltas_sum_to_net_balance_change() {
        let mut votes = ElasticList::default();
        for i in 0..4 {
            *votes.get_mut(i) = VoteTracker {
                current_index: Some(i % 2),
                next_index: Some((i + 1) % 2),
                next_epoch: Epoch::new(1),
            };
        }
        let old = [32, 32, 32, 32];
        let new = [48, 48, 16, 48];
        let deltas = run_deltas(&mut votes, 2, &old, &new, &BTreeSet::new());
        let old_sum: i64 = old.iter().map(|&b| b as i64).sum();
        let new_sum: i64 = new.iter().map(|&b| b as i64).sum();
        assert_eq!(deltas.iter().sum::<i64>(), new_sum - old_sum);
    }

    #[test]
    fn equivocating_validator_is_removed_permanently() {
        let mut votes = ElasticList::default();
        for i in 0..2 {
            *votes.get_mut(i) = VoteTracker {
                current_index: Some(0),
                next_index: Some(0),
                next_epoch: Epoch::new(1),
            };
        }
        let equivocating: BTreeSet<u64> = [1u64].into_iter().collect();
        let deltas = run_deltas(&mut votes, 1, &[32, 32], &[32, 32], &equivocating);
        assert_eq!(deltas, vec![-32]);
        assert_eq!(votes.get_mut(1).current_index, None);
        assert_eq!(votes.get_mut(1).next_index, None);

        // A second pass contributes nothing further for the equivocator.
        let deltas = run_deltas(&mut votes, 1, &[32, 32], &[32, 32], &equivocating);
        assert_eq!(deltas, vec![0]);
    }

    #[test]
    fn invalid_vote_index_is_fatal() {
        let mut votes = ElasticList::default();
        *votes.get_mut(0) = VoteTracker {
            current_index: None,
            next_index: Some(7),
            next_epoch: Epoch::new(1),
        };
        let result = compute_deltas(2, &mut votes, &[32], &[32], &BTreeSet::new());
        assert!(matches!(result, Err(Error::InvalidNodeDelta(7))));
    }
}

mod persistence {
    use super::*;

    #[test]
    fn ssz_round_trip() {
        let mut harness = Harness::new();
        harness.apply_block(harness.block(1, 2, 1), 1);
        harness.apply_block(harness.execution_block(2, 3, 2, 3), 2);
        harness
            .fc
            .process_attestation(0, Hash256::from_low_u64_be(3), Epoch::new(0))
            .unwrap();
        let balances = balances(1, 32);
        let head = harness.head(&balances, 2);

        let bytes = harness.fc.as_bytes();
        let mut decoded = ProtoArrayForkChoice::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, harness.fc);
        assert_eq!(decoded.as_bytes(), bytes);

        // The decoded instance produces the same head.
        let decoded_head = decoded
            .find_head(
                harness.justified,
                harness.finalized,
                &balances,
                Hash256::default(),
                &BTreeSet::new(),
                Slot::new(2),
                &harness.spec,
            )
            .unwrap();
        assert_eq!(decoded_head, head);
    }
}
