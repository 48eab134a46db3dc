use crate::archiver::ArchiverConfig;
use crate::block_input::{BlockInput, BlockSource};
use crate::{BeaconChain, BeaconChainTypes, BlockError, VerifyBlockOpts};
use bls::Keypair;
use execution_layer::test_utils::MockEngine;
use execution_layer::PayloadStatus;
use kzg::Kzg;
use slot_clock::{ManualSlotClock, SlotClock};
use ssz_types::VariableList;
use state_processing::{
    BlockSignatureStrategy, ConsensusContext, VerifyBlockRoot, genesis, per_block_processing,
    per_slot_processing,
};
use std::sync::Arc;
use std::time::Duration;
use store::{HotColdDB, MemoryStore, StoreConfig};
use task_executor::TaskExecutor;
use types::{
    BeaconBlock, BeaconState, Blob, BlobSidecar, ChainSpec, Domain, ExecutionBlockHash,
    FixedBytesExtended, Hash256, KzgCommitment, KzgProof, SignedBeaconBlock, SignedRoot, Slot,
};

const VALIDATOR_COUNT: usize = 16;
/// A short slot keeps availability timeouts fast in tests.
const SLOT_DURATION: Duration = Duration::from_millis(300);

struct TestTypes;

impl BeaconChainTypes for TestTypes {
    type HotStore = MemoryStore;
    type ColdStore = MemoryStore;
    type SlotClock = ManualSlotClock;
}

struct Harness {
    chain: Arc<BeaconChain<TestTypes>>,
    engine: Arc<MockEngine>,
    clock: ManualSlotClock,
    keypairs: Vec<Keypair>,
    state: BeaconState,
    spec: Arc<ChainSpec>,
}

impl Harness {
    fn new() -> Self {
        let spec = ChainSpec::mainnet();
        let keypairs = (0..VALIDATOR_COUNT)
            .map(|_| Keypair::random())
            .collect::<Vec<_>>();
        let pubkeys = keypairs
            .iter()
            .map(|keypair| keypair.pk.compress())
            .collect::<Vec<_>>();
        let mut state = genesis::interop_genesis_state(&pubkeys, 0, &spec).unwrap();

        let anchor_block =
            SignedBeaconBlock::from_block(genesis::genesis_block(&mut state), bls::Signature::empty());

        let store = HotColdDB::open(
            MemoryStore::open(),
            MemoryStore::open(),
            StoreConfig::default(),
            Arc::new(spec.clone()),
        )
        .unwrap();

        let clock = ManualSlotClock::new(Slot::new(0), Duration::from_secs(0), SLOT_DURATION);
        let engine = Arc::new(MockEngine::new());

        let chain = BeaconChain::from_anchor(
            store,
            anchor_block,
            state.clone(),
            clock.clone(),
            engine.clone(),
            Arc::new(Kzg::new()),
            ArchiverConfig::default(),
            TaskExecutor::current(),
        )
        .unwrap();

        Self {
            spec: chain.spec.clone(),
            chain,
            engine,
            clock,
            keypairs,
            state,
        }
    }

    /// Produce a correctly-signed block on top of the harness state, optionally with blob
    /// commitments and an execution payload.
    fn produce_block(
        &mut self,
        commitments: usize,
        payload_hash: Option<u64>,
    ) -> (SignedBeaconBlock, BeaconState) {
        let mut state = self.state.clone();
        per_slot_processing(&mut state, None, &self.spec).unwrap();

        let slot = state.slot;
        let proposer_index = state.get_beacon_proposer_index(slot, &self.spec).unwrap();
        let parent_root = state.latest_block_header.canonical_root();

        let mut block = BeaconBlock::empty();
        block.slot = slot;
        block.proposer_index = proposer_index as u64;
        block.parent_root = parent_root;
        block.body.blob_kzg_commitments =
            VariableList::from(vec![KzgCommitment::empty(); commitments]);
        if let Some(hash) = payload_hash {
            block.body.execution_payload.parent_hash =
                state.latest_execution_payload_header.block_hash;
            block.body.execution_payload.block_hash =
                ExecutionBlockHash::from_root(Hash256::from_low_u64_be(hash));
        }

        // Randao reveal.
        let randao_domain = self.spec.get_domain(
            block.epoch(),
            Domain::Randao,
            &state.fork,
            state.genesis_validators_root,
        );
        block.body.randao_reveal = self.keypairs[proposer_index]
            .sk
            .sign(block.epoch().signing_root(randao_domain));

        // Compute the post-state and state root.
        let mut post_state = state.clone();
        let unsigned = SignedBeaconBlock::from_block(block.clone(), bls::Signature::empty());
        let mut ctxt = ConsensusContext::new(slot);
        per_block_processing(
            &mut post_state,
            &unsigned,
            BlockSignatureStrategy::NoVerification,
            VerifyBlockRoot::False,
            &mut ctxt,
            &self.spec,
        )
        .unwrap();
        block.state_root = post_state.canonical_root();

        // Proposal signature over the finished block.
        let proposal_domain = self.spec.get_domain(
            block.epoch(),
            Domain::BeaconProposer,
            &state.fork,
            state.genesis_validators_root,
        );
        let block_root = block.canonical_root();
        let signature = self.keypairs[proposer_index]
            .sk
            .sign(block_root.signing_root(proposal_domain));

        (SignedBeaconBlock::from_block(block, signature), post_state)
    }

    fn pre_data_input(&self, block: SignedBeaconBlock) -> Arc<BlockInput> {
        let block = Arc::new(block);
        let root = block.canonical_root();
        BlockInput::pre_data(block, root, BlockSource::Gossip, None)
    }

    /// Advance both the wall clock and the harness state bookkeeping by one slot.
    fn advance_slot(&self) {
        self.clock.advance_slot();
    }
}

#[tokio::test]
async fn import_single_block_updates_head() {
    let mut harness = Harness::new();
    harness.advance_slot();

    let (block, post_state) = harness.produce_block(0, None);
    let input = harness.pre_data_input(block);
    let block_root = input.block_root();

    let imported_root = harness
        .chain
        .process_block(input.clone(), VerifyBlockOpts::default())
        .await
        .unwrap();
    assert_eq!(imported_root, block_root);
    assert_eq!(harness.chain.head_block_root(), block_root);
    assert!(harness.chain.contains_block(&block_root));

    // The block is persisted.
    assert!(harness.chain.store.block_exists(&block_root).unwrap());

    // Importing again reports it as known.
    let result = harness
        .chain
        .process_block(input, VerifyBlockOpts::default())
        .await;
    assert!(matches!(result, Err(BlockError::AlreadyKnown(root)) if root == block_root));

    harness.state = post_state;
}

#[tokio::test]
async fn tampered_signature_is_rejected() {
    let mut harness = Harness::new();
    harness.advance_slot();

    let (block, _) = harness.produce_block(0, None);
    let tampered = SignedBeaconBlock::from_block(block.message().clone(), bls::Signature::empty());
    let input = harness.pre_data_input(tampered);

    let result = harness
        .chain
        .process_block(input, VerifyBlockOpts::default())
        .await;
    assert!(matches!(result, Err(BlockError::InvalidSignature)));
    // Nothing was imported.
    assert_eq!(
        harness.chain.head_block_root(),
        harness.chain.finalized_checkpoint().root
    );
}

#[tokio::test]
async fn skip_signature_verification_accepts_unsigned_blocks() {
    let mut harness = Harness::new();
    harness.advance_slot();

    let (block, _) = harness.produce_block(0, None);
    let unsigned = SignedBeaconBlock::from_block(block.message().clone(), bls::Signature::empty());
    let input = harness.pre_data_input(unsigned);

    harness
        .chain
        .process_block(
            input,
            VerifyBlockOpts {
                skip_verify_block_signatures: true,
                ..VerifyBlockOpts::default()
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn unknown_parent_is_rejected() {
    let mut harness = Harness::new();
    harness.advance_slot();

    let (block, _) = harness.produce_block(0, None);
    let mut orphan = block.message().clone();
    orphan.parent_root = Hash256::from_low_u64_be(999);
    let input = harness.pre_data_input(SignedBeaconBlock::from_block(orphan, block.signature));

    let result = harness
        .chain
        .process_block(input, VerifyBlockOpts::default())
        .await;
    assert!(matches!(result, Err(BlockError::ParentUnknown(_))));
}

#[tokio::test]
async fn future_slot_is_rejected() {
    let mut harness = Harness::new();
    // The clock stays at slot 0 while the block sits at slot 1... advance the block two slots
    // ahead instead.
    let (block, _) = harness.produce_block(0, None);
    let mut future = block.message().clone();
    future.slot = Slot::new(10);
    let input = harness.pre_data_input(SignedBeaconBlock::from_block(future, block.signature));

    let result = harness
        .chain
        .process_block(input, VerifyBlockOpts::default())
        .await;
    assert!(matches!(result, Err(BlockError::FutureSlot { .. })));
}

#[tokio::test]
async fn invalid_payload_aborts_the_segment() {
    let mut harness = Harness::new();
    harness.advance_slot();

    let (block, _) = harness.produce_block(0, Some(77));
    harness.engine.set_payload_status(
        ExecutionBlockHash::from_root(Hash256::from_low_u64_be(77)),
        PayloadStatus::Invalid {
            latest_valid_hash: None,
            validation_error: Some("bad payload".into()),
        },
    );
    let input = harness.pre_data_input(block);
    let block_root = input.block_root();

    let result = harness
        .chain
        .process_block(input, VerifyBlockOpts::default())
        .await;
    assert!(
        matches!(result, Err(BlockError::ExecutionPayloadInvalid { block_root: root, .. }) if root == block_root)
    );
    assert!(!harness.chain.contains_block(&block_root));
}

#[tokio::test]
async fn invalid_payload_retroactively_invalidates_imported_descendants() {
    let mut harness = Harness::new();

    // Import A then B optimistically: the engine is still syncing their payloads.
    let hash_a = ExecutionBlockHash::from_root(Hash256::from_low_u64_be(77));
    let hash_b = ExecutionBlockHash::from_root(Hash256::from_low_u64_be(88));
    harness.engine.set_payload_status(hash_a, PayloadStatus::Syncing);
    harness.engine.set_payload_status(hash_b, PayloadStatus::Syncing);

    harness.advance_slot();
    let (block_a, post_a) = harness.produce_block(0, Some(77));
    let input_a = harness.pre_data_input(block_a);
    let root_a = input_a.block_root();
    harness
        .chain
        .process_block(input_a, VerifyBlockOpts::default())
        .await
        .unwrap();
    harness.state = post_a;

    harness.advance_slot();
    let (block_b, post_b) = harness.produce_block(0, Some(88));
    let input_b = harness.pre_data_input(block_b);
    let root_b = input_b.block_root();
    harness
        .chain
        .process_block(input_b, VerifyBlockOpts::default())
        .await
        .unwrap();
    harness.state = post_b;
    assert_eq!(harness.chain.head_block_root(), root_b);

    // The engine rejects C's payload with A's hash as the latest valid ancestor: B, an
    // already-imported descendant of A's successor, is retroactively invalid.
    harness.advance_slot();
    let (block_c, _) = harness.produce_block(0, Some(99));
    harness.engine.set_payload_status(
        ExecutionBlockHash::from_root(Hash256::from_low_u64_be(99)),
        PayloadStatus::Invalid {
            latest_valid_hash: Some(hash_a),
            validation_error: Some("bad state root".into()),
        },
    );
    let input_c = harness.pre_data_input(block_c);
    let result = harness
        .chain
        .process_block(input_c, VerifyBlockOpts::default())
        .await;
    assert!(matches!(
        result,
        Err(BlockError::ExecutionPayloadInvalid { .. })
    ));

    let fork_choice = harness.chain.fork_choice.read();
    // B flipped to invalid; A was confirmed valid by the same verdict.
    assert!(
        fork_choice
            .proto_array()
            .get_block_execution_status(&root_b)
            .unwrap()
            .is_invalid()
    );
    assert!(
        fork_choice
            .proto_array()
            .get_block_execution_status(&root_a)
            .unwrap()
            .is_valid_or_irrelevant()
    );
    drop(fork_choice);

    // The head must never be an invalidated descendant.
    assert_eq!(harness.chain.head_block_root(), root_a);
}

#[tokio::test]
async fn valid_payload_is_imported_as_verified() {
    let mut harness = Harness::new();
    harness.advance_slot();

    let (block, _) = harness.produce_block(0, Some(88));
    let input = harness.pre_data_input(block);
    let block_root = input.block_root();

    harness
        .chain
        .process_block(input, VerifyBlockOpts::default())
        .await
        .unwrap();

    // The mock engine was consulted and the block imported with a valid payload status.
    assert_eq!(harness.engine.new_payload_calls.lock().len(), 1);
    let status = harness
        .chain
        .fork_choice
        .read()
        .get_block_execution_status(&block_root)
        .unwrap();
    assert!(status.is_valid_or_irrelevant());
}

#[tokio::test]
async fn missing_blobs_time_out_as_unavailable() {
    let mut harness = Harness::new();
    harness.advance_slot();

    let (block, _) = harness.produce_block(2, None);
    let block = Arc::new(block);
    let root = block.canonical_root();
    let input = BlockInput::with_blob_promise(block, root, BlockSource::Gossip, None);

    let result = harness
        .chain
        .process_block(input, VerifyBlockOpts::default())
        .await;
    assert!(matches!(result, Err(BlockError::BlobUnavailable(r)) if r == root));
}

#[tokio::test]
async fn blocks_with_blobs_import_once_available() {
    let mut harness = Harness::new();
    harness.advance_slot();

    let (block, _) = harness.produce_block(2, None);
    let block = Arc::new(block);
    let root = block.canonical_root();
    let input = BlockInput::with_blob_promise(block.clone(), root, BlockSource::Gossip, None);

    // Deliver the blobs before import, as gossip would.
    let header = block.signed_block_header();
    for index in 0..2 {
        let sidecar = BlobSidecar::new_with_existing_proof(
            index,
            Blob::default(),
            &block,
            header.clone(),
            KzgProof::empty(),
        )
        .unwrap();
        input.add_blob(Arc::new(sidecar)).unwrap();
    }
    assert!(input.is_available());

    harness
        .chain
        .process_block(input, VerifyBlockOpts::default())
        .await
        .unwrap();

    // The blobs were persisted alongside the block.
    assert!(matches!(
        harness.chain.store.get_blobs(&root).unwrap(),
        store::BlobSidecarListFromRoot::Blobs(blobs) if blobs.len() == 2
    ));
}

#[tokio::test]
async fn forkchoice_update_reaches_the_engine() {
    let mut harness = Harness::new();
    harness.advance_slot();

    let (block, _) = harness.produce_block(0, Some(99));
    let input = harness.pre_data_input(block);
    harness
        .chain
        .process_block(input, VerifyBlockOpts::default())
        .await
        .unwrap();

    harness
        .chain
        .update_execution_engine_forkchoice(None)
        .await
        .unwrap();

    let calls = harness.engine.forkchoice_updated_calls.lock();
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0].head_block_hash,
        ExecutionBlockHash::from_root(Hash256::from_low_u64_be(99))
    );
}

#[tokio::test]
async fn verify_only_does_not_import() {
    let mut harness = Harness::new();
    harness.advance_slot();

    let (block, _) = harness.produce_block(0, None);
    let input = harness.pre_data_input(block);
    let block_root = input.block_root();

    harness
        .chain
        .process_block(
            input,
            VerifyBlockOpts {
                verify_only: true,
                ..VerifyBlockOpts::default()
            },
        )
        .await
        .unwrap();

    assert!(!harness.chain.contains_block(&block_root));
    assert!(!harness.chain.store.block_exists(&block_root).unwrap());
}

#[tokio::test]
async fn chain_of_two_blocks_imports_in_one_segment() {
    let mut harness = Harness::new();
    harness.advance_slot();

    let (block_a, post_a) = harness.produce_block(0, None);
    harness.state = post_a;
    harness.advance_slot();
    let (block_b, _) = harness.produce_block(0, None);

    let input_a = harness.pre_data_input(block_a);
    let input_b = harness.pre_data_input(block_b);
    let expected_head = input_b.block_root();

    harness
        .chain
        .process_chain_segment(vec![input_a, input_b], VerifyBlockOpts::default())
        .await
        .unwrap();
    assert_eq!(harness.chain.head_block_root(), expected_head);
}
