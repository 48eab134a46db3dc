use crate::{
    AttestationFromBlock, Error, ForkChoice, ForkChoiceStore, InvalidAttestation, InvalidBlock,
    PayloadVerificationStatus,
};
use proto_array::{DataAvailabilityStatus, JustifiedBalances};
use state_processing::{
    BlockSignatureStrategy, ConsensusContext, VerifyBlockRoot, genesis::interop_genesis_state,
    per_block_processing, per_slot_processing,
};
use std::collections::BTreeSet;
use std::time::Duration;
use types::{
    BeaconBlock, BeaconState, ChainSpec, Checkpoint, Epoch, FixedBytesExtended, Hash256,
    IndexedAttestation, Signature, SignedBeaconBlock, Slot,
};

/// A minimal in-memory `ForkChoiceStore` for driving the wrapper in tests.
#[derive(Debug)]
struct TestStore {
    current_slot: Slot,
    justified_checkpoint: Checkpoint,
    justified_balances: JustifiedBalances,
    finalized_checkpoint: Checkpoint,
    unrealized_justified_checkpoint: Checkpoint,
    unrealized_finalized_checkpoint: Checkpoint,
    proposer_boost_root: Hash256,
    equivocating_indices: BTreeSet<u64>,
}

impl TestStore {
    fn new(anchor_root: Hash256, anchor_state: &BeaconState) -> Self {
        let checkpoint = Checkpoint {
            epoch: anchor_state.current_epoch(),
            root: anchor_root,
        };
        Self {
            current_slot: anchor_state.slot,
            justified_checkpoint: checkpoint,
            justified_balances: JustifiedBalances::from_justified_state(anchor_state).unwrap(),
            finalized_checkpoint: checkpoint,
            unrealized_justified_checkpoint: checkpoint,
            unrealized_finalized_checkpoint: checkpoint,
            proposer_boost_root: Hash256::zero(),
            equivocating_indices: BTreeSet::new(),
        }
    }
}

impl ForkChoiceStore for TestStore {
    type Error = String;

    fn get_current_slot(&self) -> Slot {
        self.current_slot
    }

    fn set_current_slot(&mut self, slot: Slot) {
        self.current_slot = slot;
    }

    fn on_verified_block(
        &mut self,
        _block: &SignedBeaconBlock,
        _block_root: Hash256,
        _state: &BeaconState,
    ) -> Result<(), Self::Error> {
        Ok(())
    }

    fn justified_checkpoint(&self) -> &Checkpoint {
        &self.justified_checkpoint
    }

    fn justified_balances(&self) -> &JustifiedBalances {
        &self.justified_balances
    }

    fn finalized_checkpoint(&self) -> &Checkpoint {
        &self.finalized_checkpoint
    }

    fn unrealized_justified_checkpoint(&self) -> &Checkpoint {
        &self.unrealized_justified_checkpoint
    }

    fn unrealized_finalized_checkpoint(&self) -> &Checkpoint {
        &self.unrealized_finalized_checkpoint
    }

    fn proposer_boost_root(&self) -> Hash256 {
        self.proposer_boost_root
    }

    fn set_finalized_checkpoint(&mut self, checkpoint: Checkpoint) {
        self.finalized_checkpoint = checkpoint;
    }

    fn set_justified_checkpoint(&mut self, checkpoint: Checkpoint) -> Result<(), Self::Error> {
        self.justified_checkpoint = checkpoint;
        Ok(())
    }

    fn set_unrealized_justified_checkpoint(&mut self, checkpoint: Checkpoint) {
        self.unrealized_justified_checkpoint = checkpoint;
    }

    fn set_unrealized_finalized_checkpoint(&mut self, checkpoint: Checkpoint) {
        self.unrealized_finalized_checkpoint = checkpoint;
    }

    fn set_proposer_boost_root(&mut self, proposer_boost_root: Hash256) {
        self.proposer_boost_root = proposer_boost_root;
    }

    fn equivocating_indices(&self) -> &BTreeSet<u64> {
        &self.equivocating_indices
    }

    fn extend_equivocating_indices(&mut self, indices: impl IntoIterator<Item = u64>) {
        self.equivocating_indices.extend(indices);
    }
}

struct TestRig {
    spec: ChainSpec,
    fork_choice: ForkChoice<TestStore>,
    state: BeaconState,
    anchor_root: Hash256,
}

impl TestRig {
    fn new(validator_count: usize) -> Self {
        let spec = ChainSpec::mainnet();
        let pubkeys = (0..validator_count)
            .map(|_| bls::Keypair::random().pk.compress())
            .collect::<Vec<_>>();
        let mut state = interop_genesis_state(&pubkeys, 0, &spec).unwrap();

        let anchor_block = SignedBeaconBlock::from_block(
            state_processing::genesis::genesis_block(&mut state),
            Signature::empty(),
        );
        let anchor_root = anchor_block.canonical_root();
        state.latest_block_header = anchor_block.message().temporary_block_header();

        let store = TestStore::new(anchor_root, &state);
        let fork_choice = ForkChoice::from_anchor(
            store,
            anchor_root,
            &anchor_block,
            &state,
            Some(Slot::new(0)),
            &spec,
        )
        .unwrap();

        Self {
            spec,
            fork_choice,
            state,
            anchor_root,
        }
    }

    /// Produce and apply a block on top of the rig's state, returning its root.
    fn extend_chain(&mut self, current_slot: u64) -> Hash256 {
        let (block, post_state) = self.produce_block();
        let block_root = block.canonical_root();
        self.fork_choice
            .on_block(
                Slot::new(current_slot),
                &block,
                block_root,
                Duration::from_secs(0),
                &post_state,
                &[],
                PayloadVerificationStatus::Irrelevant,
                DataAvailabilityStatus::PreData,
                &self.spec,
            )
            .unwrap();
        self.state = post_state;
        block_root
    }

    fn produce_block(&mut self) -> (SignedBeaconBlock, BeaconState) {
        let mut state = self.state.clone();
        per_slot_processing(&mut state, None, &self.spec).unwrap();

        let slot = state.slot;
        let proposer_index = state.get_beacon_proposer_index(slot, &self.spec).unwrap() as u64;
        let parent_root = state.latest_block_header.canonical_root();

        let mut block = BeaconBlock::empty();
        block.slot = slot;
        block.proposer_index = proposer_index;
        block.parent_root = parent_root;

        let mut post_state = state.clone();
        let signed = SignedBeaconBlock::from_block(block, Signature::empty());
        let mut ctxt = ConsensusContext::new(slot);
        per_block_processing(
            &mut post_state,
            &signed,
            BlockSignatureStrategy::NoVerification,
            VerifyBlockRoot::False,
            &mut ctxt,
            &self.spec,
        )
        .unwrap();

        let mut block = signed.message().clone();
        block.state_root = post_state.canonical_root();
        (
            SignedBeaconBlock::from_block(block, Signature::empty()),
            post_state,
        )
    }
}

#[test]
fn anchor_is_head() {
    let mut rig = TestRig::new(16);
    let head = rig.fork_choice.get_head(Slot::new(0), &rig.spec).unwrap();
    assert_eq!(head, rig.anchor_root);
    assert!(rig.fork_choice.contains_block(&rig.anchor_root));
}

#[test]
fn block_extends_head() {
    let mut rig = TestRig::new(16);
    let block_root = rig.extend_chain(1);
    let head = rig.fork_choice.get_head(Slot::new(1), &rig.spec).unwrap();
    assert_eq!(head, block_root);

    // Getting the head twice without new information returns the same root.
    assert_eq!(
        rig.fork_choice.get_head(Slot::new(1), &rig.spec).unwrap(),
        head
    );
}

#[test]
fn future_block_is_rejected() {
    let mut rig = TestRig::new(16);
    let (block, post_state) = rig.produce_block();
    let result = rig.fork_choice.on_block(
        Slot::new(0),
        &block,
        block.canonical_root(),
        Duration::from_secs(0),
        &post_state,
        &[],
        PayloadVerificationStatus::Irrelevant,
        DataAvailabilityStatus::PreData,
        &rig.spec,
    );
    assert!(matches!(
        result,
        Err(Error::InvalidBlock(InvalidBlock::FutureSlot { .. }))
    ));
}

#[test]
fn unknown_parent_is_rejected() {
    let mut rig = TestRig::new(16);
    let (block, post_state) = rig.produce_block();
    let mut tampered = block.message().clone();
    tampered.parent_root = Hash256::from_low_u64_be(42);
    let tampered = SignedBeaconBlock::from_block(tampered, Signature::empty());

    let result = rig.fork_choice.on_block(
        Slot::new(1),
        &tampered,
        tampered.canonical_root(),
        Duration::from_secs(0),
        &post_state,
        &[],
        PayloadVerificationStatus::Irrelevant,
        DataAvailabilityStatus::PreData,
        &rig.spec,
    );
    assert!(matches!(
        result,
        Err(Error::InvalidBlock(InvalidBlock::UnknownParent(_)))
    ));
}

#[test]
fn timely_block_receives_proposer_boost() {
    let mut rig = TestRig::new(16);
    let block_root = rig.extend_chain(1);
    assert_eq!(rig.fork_choice.fc_store().proposer_boost_root(), block_root);

    // The boost expires at the next slot boundary.
    rig.fork_choice.get_head(Slot::new(2), &rig.spec).unwrap();
    assert_eq!(
        rig.fork_choice.fc_store().proposer_boost_root(),
        Hash256::zero()
    );
}

#[test]
fn untimely_block_receives_no_boost() {
    let mut rig = TestRig::new(16);
    let (block, post_state) = rig.produce_block();
    let block_root = block.canonical_root();
    rig.fork_choice
        .on_block(
            Slot::new(1),
            &block,
            block_root,
            // Received after the attestation deadline.
            Duration::from_secs(5),
            &post_state,
            &[],
            PayloadVerificationStatus::Irrelevant,
            DataAvailabilityStatus::PreData,
            &rig.spec,
        )
        .unwrap();
    assert_eq!(
        rig.fork_choice.fc_store().proposer_boost_root(),
        Hash256::zero()
    );
}

#[test]
fn attestation_for_unknown_block_is_invalid() {
    let mut rig = TestRig::new(16);
    let attestation = IndexedAttestation {
        attesting_indices: vec![0].into(),
        data: types::AttestationData {
            slot: Slot::new(0),
            index: 0,
            beacon_block_root: Hash256::from_low_u64_be(999),
            source: Checkpoint::default(),
            target: Checkpoint {
                epoch: Epoch::new(0),
                root: rig.anchor_root,
            },
        },
        signature: Signature::empty(),
    };
    let result = rig
        .fork_choice
        .on_attestation(Slot::new(0), &attestation, AttestationFromBlock::False);
    assert!(matches!(
        result,
        Err(Error::InvalidAttestation(
            InvalidAttestation::UnknownHeadBlock { .. }
        ))
    ));
}

#[test]
fn current_slot_attestation_is_queued_then_applied() {
    let mut rig = TestRig::new(16);
    let block_root = rig.extend_chain(1);

    let attestation = IndexedAttestation {
        attesting_indices: vec![0].into(),
        data: types::AttestationData {
            slot: Slot::new(1),
            index: 0,
            beacon_block_root: block_root,
            source: Checkpoint::default(),
            target: Checkpoint {
                epoch: Epoch::new(0),
                root: rig.anchor_root,
            },
        },
        signature: Signature::empty(),
    };
    rig.fork_choice
        .on_attestation(Slot::new(1), &attestation, AttestationFromBlock::False)
        .unwrap();
    assert_eq!(rig.fork_choice.queued_attestations().len(), 1);

    // Advancing to slot 2 drains the queue into proto-array votes.
    rig.fork_choice.get_head(Slot::new(2), &rig.spec).unwrap();
    assert!(rig.fork_choice.queued_attestations().is_empty());
    assert_eq!(
        rig.fork_choice.proto_array().get_weight(&block_root),
        Some(rig.spec.max_effective_balance)
    );
}

#[test]
fn persisted_fork_choice_round_trips() {
    let mut rig = TestRig::new(16);
    let block_root = rig.extend_chain(1);
    let persisted = rig.fork_choice.to_persisted();
    let bytes = persisted.as_bytes();

    let decoded = crate::PersistedForkChoice::from_bytes(&bytes).unwrap();
    let store = TestStore::new(rig.anchor_root, &rig.state);
    let mut restored = ForkChoice::from_persisted(decoded, store).unwrap();
    assert!(restored.contains_block(&block_root));
    assert_eq!(
        restored.get_head(Slot::new(1), &rig.spec).unwrap(),
        block_root
    );
}
