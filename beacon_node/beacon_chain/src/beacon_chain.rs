//! The entry point for block import: wires the verification pipeline into fork choice,
//! persistence, availability tracking, events and finalization-driven archival.

use crate::archiver::{Archiver, ArchiverConfig};
use crate::beacon_fork_choice_store::BeaconForkChoiceStore;
use crate::block_input::BlockInput;
use crate::block_verification::{SegmentVerificationResult, VerifyBlockOpts, verify_block_segment};
use crate::column_reconstruction::ColumnReconstructionTracker;
use crate::errors::{BeaconChainError, BlockError};
use crate::events::{
    ChainEventHandler, EventKind, SseBlock, SseChainReorg, SseFinalizedCheckpoint, SseHead,
};
use crate::get_blobs_tracker::GetBlobsTracker;
use crate::metrics;
use crate::regen::Regen;
use crate::state_cache::StateCache;
use execution_layer::{EngineApi, ForkchoiceState};
use fork_choice::{
    AttestationFromBlock, DisallowedReOrgOffsets, ForkChoice, InvalidationOperation,
};
use kzg::Kzg;
use logging::crit;
use parking_lot::RwLock;
use slot_clock::SlotClock;
use std::sync::Arc;
use std::time::Duration;
use store::{HotColdDB, KeyValueStore};
use task_executor::TaskExecutor;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use types::consts::SLOTS_PER_EPOCH;
use types::{
    AttesterSlashing, BeaconState, ChainSpec, Checkpoint, Hash256, IndexedAttestation,
    SignedBeaconBlock, Slot,
};

/// Bundles the generic backends of a chain instance.
pub trait BeaconChainTypes: Send + Sync + 'static {
    type HotStore: KeyValueStore;
    type ColdStore: KeyValueStore;
    type SlotClock: SlotClock + 'static;
}

pub type BeaconForkChoice<T> = ForkChoice<
    BeaconForkChoiceStore<<T as BeaconChainTypes>::HotStore, <T as BeaconChainTypes>::ColdStore>,
>;
pub type BeaconStore<T> =
    Arc<HotColdDB<<T as BeaconChainTypes>::HotStore, <T as BeaconChainTypes>::ColdStore>>;

/// The canonical head and checkpoints, cached between head recomputations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CachedHead {
    pub head_block_root: Hash256,
    pub head_slot: Slot,
    pub justified_checkpoint: Checkpoint,
    pub finalized_checkpoint: Checkpoint,
}

pub struct BeaconChain<T: BeaconChainTypes> {
    pub spec: Arc<ChainSpec>,
    pub store: BeaconStore<T>,
    pub regen: Arc<Regen<T::HotStore, T::ColdStore>>,
    pub fork_choice: RwLock<BeaconForkChoice<T>>,
    pub slot_clock: T::SlotClock,
    pub engine: Arc<dyn EngineApi>,
    pub kzg: Arc<Kzg>,
    pub events: Arc<ChainEventHandler>,
    pub get_blobs_tracker: GetBlobsTracker,
    pub column_reconstruction: ColumnReconstructionTracker<T::SlotClock>,
    pub archiver: Arc<Archiver<T::HotStore, T::ColdStore>>,
    pub executor: TaskExecutor,
    cached_head: RwLock<CachedHead>,
    finalization_tx: mpsc::Sender<Checkpoint>,
}

impl<T: BeaconChainTypes> BeaconChain<T> {
    /// Build a chain from an anchor block and state (genesis or a finalized checkpoint).
    #[allow(clippy::too_many_arguments)]
    pub fn from_anchor(
        store: BeaconStore<T>,
        anchor_block: SignedBeaconBlock,
        anchor_state: BeaconState,
        slot_clock: T::SlotClock,
        engine: Arc<dyn EngineApi>,
        kzg: Arc<Kzg>,
        archiver_config: ArchiverConfig,
        executor: TaskExecutor,
    ) -> Result<Arc<Self>, BeaconChainError> {
        let spec = Arc::new(store.spec().clone());
        let anchor_block_root = anchor_block.canonical_root();
        let anchor_block = Arc::new(anchor_block);

        // Persist the anchor so regen can always find its seed.
        store.put_block(&anchor_block_root, &anchor_block)?;
        store.put_state(&anchor_block.state_root(), &anchor_state)?;

        let state_cache = Arc::new(StateCache::default());
        state_cache.put_block_state(anchor_block_root, Arc::new(anchor_state.clone()));
        let regen = Arc::new(Regen::new(store.clone(), state_cache.clone()));

        let fc_store = BeaconForkChoiceStore::from_anchor(
            store.clone(),
            state_cache.clone(),
            anchor_block_root,
            &anchor_state,
        )
        .map_err(|e| BeaconChainError::ForkChoiceError(format!("{e:?}")))?;

        let current_slot = slot_clock.now().unwrap_or(anchor_state.slot);
        let fork_choice = ForkChoice::from_anchor(
            fc_store,
            anchor_block_root,
            &anchor_block,
            &anchor_state,
            Some(current_slot),
            &spec,
        )
        .map_err(BeaconChainError::from)?;

        let events = Arc::new(ChainEventHandler::default());
        let archiver = Arc::new(Archiver::new(
            store.clone(),
            regen.clone(),
            events.clone(),
            archiver_config,
        ));

        let (finalization_tx, finalization_rx) =
            mpsc::channel(archiver.config().queue_length.max(1));

        let cached_head = CachedHead {
            head_block_root: anchor_block_root,
            head_slot: anchor_block.slot(),
            justified_checkpoint: fork_choice.justified_checkpoint(),
            finalized_checkpoint: fork_choice.finalized_checkpoint(),
        };

        let chain = Arc::new(Self {
            spec: spec.clone(),
            store,
            regen,
            fork_choice: RwLock::new(fork_choice),
            slot_clock: slot_clock.clone(),
            engine: engine.clone(),
            kzg: kzg.clone(),
            events: events.clone(),
            get_blobs_tracker: GetBlobsTracker::new(engine, kzg.clone(), spec.clone(), events.clone()),
            column_reconstruction: ColumnReconstructionTracker::new(
                kzg,
                spec,
                slot_clock,
                events,
            ),
            archiver,
            executor,
            cached_head: RwLock::new(cached_head),
            finalization_tx,
        });

        chain.spawn_finalization_handler(finalization_rx);
        Ok(chain)
    }

    /// The current wall-clock slot, saturating at genesis.
    pub fn current_slot(&self) -> Slot {
        self.slot_clock.now().unwrap_or(self.spec.genesis_slot)
    }

    pub fn cached_head(&self) -> CachedHead {
        *self.cached_head.read()
    }

    pub fn head_block_root(&self) -> Hash256 {
        self.cached_head.read().head_block_root
    }

    pub fn finalized_checkpoint(&self) -> Checkpoint {
        self.cached_head.read().finalized_checkpoint
    }

    pub fn contains_block(&self, block_root: &Hash256) -> bool {
        self.fork_choice.read().contains_block(block_root)
    }

    /// Verify and import a single block.
    pub async fn process_block(
        self: &Arc<Self>,
        block_input: Arc<BlockInput>,
        opts: VerifyBlockOpts,
    ) -> Result<Hash256, BlockError> {
        self.process_chain_segment(vec![block_input], opts)
            .await
            .map(|mut roots| roots.pop().expect("one root per input"))
    }

    /// Verify and import a chain of blocks sharing an epoch.
    ///
    /// All-or-none: on error nothing is imported to fork choice and the caller receives the
    /// specific `BlockError`.
    pub async fn process_chain_segment(
        self: &Arc<Self>,
        block_inputs: Vec<Arc<BlockInput>>,
        opts: VerifyBlockOpts,
    ) -> Result<Vec<Hash256>, BlockError> {
        let Some(first_input) = block_inputs.first() else {
            return Ok(vec![]);
        };

        // Pre-flight checks against the clock and fork choice.
        let current_slot = self.current_slot();
        let disparity_slots = 1;
        for input in &block_inputs {
            if input.slot() > current_slot + disparity_slots {
                return Err(BlockError::FutureSlot {
                    current_slot,
                    block_slot: input.slot(),
                });
            }
        }
        {
            let fork_choice = self.fork_choice.read();
            let finalized_slot = fork_choice
                .finalized_checkpoint()
                .epoch
                .start_slot(SLOTS_PER_EPOCH);
            for input in &block_inputs {
                if fork_choice.contains_block(&input.block_root()) {
                    return Err(BlockError::AlreadyKnown(input.block_root()));
                }
                if input.slot() <= finalized_slot {
                    return Err(BlockError::WouldRevertFinalizedSlot {
                        block_slot: input.slot(),
                        finalized_slot,
                    });
                }
            }
            if !fork_choice.contains_block(&first_input.block().parent_root()) {
                return Err(BlockError::ParentUnknown(first_input.block().parent_root()));
            }
        }

        if opts.eager_persist_block {
            self.persist_block_inputs(&block_inputs)
                .map_err(BeaconChainError::from)?;
        }

        let result = match verify_block_segment(
            self.regen.clone(),
            self.engine.clone(),
            self.slot_clock.clone(),
            self.spec.clone(),
            self.executor.clone(),
            block_inputs.clone(),
            opts,
        )
        .await
        {
            Ok(result) => result,
            Err(e) => {
                metrics::inc_counter_vec(&metrics::BLOCK_PROCESSING_ERRORS, &[e.code()]);

                // An `Invalid` verdict does not only reject this segment: every imported
                // ancestor between the engine's latest valid hash and the segment is now
                // known-invalid and must be excluded from head selection immediately.
                if let BlockError::ExecutionPayloadInvalid {
                    latest_valid_hash: Some(latest_valid_hash),
                    ..
                } = &e
                {
                    let op = InvalidationOperation::InvalidateMany {
                        head_block_root: first_input.block().parent_root(),
                        always_invalidate_head: true,
                        latest_valid_ancestor: *latest_valid_hash,
                    };
                    if let Err(invalidation_error) =
                        self.process_invalid_execution_payload(&op).await
                    {
                        crit!(
                            error = ?invalidation_error,
                            "Failed to invalidate payload ancestors"
                        );
                    }
                }
                return Err(e);
            }
        };

        let roots: Vec<Hash256> = block_inputs.iter().map(|input| input.block_root()).collect();
        if opts.verify_only {
            return Ok(roots);
        }

        if !opts.eager_persist_block {
            self.persist_block_inputs(&block_inputs)
                .map_err(BeaconChainError::from)?;
        }
        self.import_verified_segment(&block_inputs, result)?;
        metrics::inc_counter(&metrics::BLOCK_PROCESSING_SUCCESSES);

        self.recompute_head().await;
        Ok(roots)
    }

    /// Write the blocks and their sidecars to the hot database in a single batch.
    fn persist_block_inputs(
        &self,
        block_inputs: &[Arc<BlockInput>],
    ) -> Result<(), BeaconChainError> {
        let mut ops = Vec::new();
        for input in block_inputs {
            let block_root = input.block_root();
            self.store
                .block_as_kv_store_ops(&block_root, input.block(), &mut ops);
            match input.available_data() {
                Some(crate::block_input::AvailableData::Blobs(blobs)) => {
                    self.store.blobs_as_kv_store_ops(&block_root, &blobs, &mut ops);
                }
                Some(crate::block_input::AvailableData::Columns(columns)) => {
                    for column in &columns {
                        self.store
                            .data_column_as_kv_store_op(&block_root, column, &mut ops);
                    }
                }
                Some(crate::block_input::AvailableData::NoData) | None => {}
            }
        }
        self.store.hot_do_atomically(ops)?;
        Ok(())
    }

    /// Feed the verified segment into fork choice and emit per-block events.
    fn import_verified_segment(
        &self,
        block_inputs: &[Arc<BlockInput>],
        result: SegmentVerificationResult,
    ) -> Result<(), BlockError> {
        let current_slot = self.current_slot();
        let mut fork_choice = self.fork_choice.write();

        for (index, input) in block_inputs.iter().enumerate() {
            let block_root = input.block_root();
            let post_state = &result.post_states[index];
            let payload_status = result.segment_exec_status[index];
            let da_status = result.data_availability_statuses[index];
            let indexed_attestations = &result.indexed_attestations_by_block[index];

            let block_delay = self.block_delay(input.slot());
            fork_choice
                .on_block(
                    current_slot,
                    input.block(),
                    block_root,
                    block_delay,
                    post_state,
                    indexed_attestations,
                    payload_status,
                    da_status,
                    &self.spec,
                )
                .map_err(|e| {
                    // Purge the optimistically persisted block: import failed.
                    let _ = self.store.delete_block(&block_root);
                    BlockError::from(BeaconChainError::from(e))
                })?;

            self.events.register(EventKind::Block(SseBlock {
                slot: input.slot(),
                block: block_root,
                execution_optimistic: payload_status.is_optimistic(),
            }));
            debug!(
                %block_root,
                slot = %input.slot(),
                payload = ?payload_status,
                "Block imported to fork choice"
            );
        }
        Ok(())
    }

    /// How long after its slot start the block arrived.
    fn block_delay(&self, slot: Slot) -> Duration {
        match (self.slot_clock.now_duration(), self.slot_clock.start_of(slot)) {
            (Some(now), Some(start)) => now.checked_sub(start).unwrap_or(Duration::ZERO),
            _ => Duration::ZERO,
        }
    }

    /// Re-run fork choice and apply the consequences of any head or finality change.
    pub async fn recompute_head(self: &Arc<Self>) {
        let current_slot = self.current_slot();
        let old_head = self.cached_head();

        let new_head = {
            let mut fork_choice = self.fork_choice.write();
            match fork_choice.get_head(current_slot, &self.spec) {
                Ok(head_block_root) => {
                    let head_slot = fork_choice
                        .get_block(&head_block_root)
                        .map(|b| b.slot)
                        .unwrap_or(current_slot);
                    CachedHead {
                        head_block_root,
                        head_slot,
                        justified_checkpoint: fork_choice.justified_checkpoint(),
                        finalized_checkpoint: fork_choice.finalized_checkpoint(),
                    }
                }
                Err(e) => {
                    crit!(error = ?e, "Unable to recompute head");
                    return;
                }
            }
        };
        *self.cached_head.write() = new_head;

        if new_head.head_block_root != old_head.head_block_root {
            metrics::inc_counter(&metrics::HEAD_CHANGED_TOTAL);

            // A head that does not descend from the previous head is a re-org.
            let is_reorg = !self
                .fork_choice
                .read()
                .is_descendant(old_head.head_block_root, new_head.head_block_root);
            if is_reorg {
                metrics::inc_counter(&metrics::REORGS_TOTAL);
                let depth = old_head
                    .head_slot
                    .as_u64()
                    .abs_diff(new_head.head_slot.as_u64());
                warn!(
                    old_head = ?old_head.head_block_root,
                    new_head = ?new_head.head_block_root,
                    depth,
                    "Chain re-org"
                );
                self.events.register(EventKind::ChainReorg(SseChainReorg {
                    slot: new_head.head_slot,
                    depth,
                    old_head_block: old_head.head_block_root,
                    new_head_block: new_head.head_block_root,
                    epoch: new_head.head_slot.epoch(SLOTS_PER_EPOCH),
                }));
            }

            let head_state_root = self
                .fork_choice
                .read()
                .get_block(&new_head.head_block_root)
                .map(|b| b.state_root)
                .unwrap_or_default();
            self.events.register(EventKind::Head(SseHead {
                slot: new_head.head_slot,
                block: new_head.head_block_root,
                state: head_state_root,
                epoch_transition: new_head.head_slot.epoch(SLOTS_PER_EPOCH)
                    != old_head.head_slot.epoch(SLOTS_PER_EPOCH),
            }));
        }

        if new_head.justified_checkpoint != old_head.justified_checkpoint {
            self.regen
                .prune_on_checkpoint(new_head.justified_checkpoint.epoch);
        }

        if new_head.finalized_checkpoint != old_head.finalized_checkpoint {
            self.on_new_finalized_checkpoint(new_head.finalized_checkpoint);
        }
    }

    /// React to finality advancing: emit the event, prune caches and fork choice, and queue
    /// the checkpoint for archival.
    fn on_new_finalized_checkpoint(self: &Arc<Self>, finalized: Checkpoint) {
        info!(
            epoch = %finalized.epoch,
            root = ?finalized.root,
            "New finalized checkpoint"
        );

        let finalized_state_root = self
            .fork_choice
            .read()
            .get_block(&finalized.root)
            .map(|b| b.state_root)
            .unwrap_or_default();
        self.events
            .register(EventKind::FinalizedCheckpoint(SseFinalizedCheckpoint {
                block: finalized.root,
                state: finalized_state_root,
                epoch: finalized.epoch,
            }));

        self.regen.prune_on_finalized(finalized.root, finalized.epoch);

        if let Err(e) = self.fork_choice.write().prune() {
            error!(error = ?e, "Failed to prune fork choice");
        }

        // Queue for archival; a full queue drops the notification, to be retried on the next
        // finality advance.
        if let Err(e) = self.finalization_tx.try_send(finalized) {
            warn!(error = %e, "Finalization queue full, archival deferred");
        }
    }

    /// The serial worker draining the finalization queue.
    fn spawn_finalization_handler(self: &Arc<Self>, mut rx: mpsc::Receiver<Checkpoint>) {
        let chain = self.clone();
        self.executor.spawn(
            async move {
                while let Some(checkpoint) = rx.recv().await {
                    let archiver = chain.archiver.clone();
                    let result = chain
                        .executor
                        .spawn_blocking_handle(
                            move || archiver.process_finalized_checkpoint(checkpoint),
                            "archive_finalized_checkpoint",
                        );
                    match result {
                        Some(handle) => match handle.await {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => {
                                error!(error = ?e, "Failed to archive finalized checkpoint")
                            }
                            Err(e) => crit!(error = %e, "Archival task panicked"),
                        },
                        None => break,
                    }
                }
            },
            "finalization_handler",
        );
    }

    /// Apply a gossip attestation to fork choice.
    pub fn apply_attestation(
        &self,
        attestation: &IndexedAttestation,
    ) -> Result<(), BeaconChainError> {
        let current_slot = self.current_slot();
        self.fork_choice
            .write()
            .on_attestation(current_slot, attestation, AttestationFromBlock::False)
            .map_err(BeaconChainError::from)
    }

    /// Apply an attester slashing: its intersection equivocates and is excluded from fork
    /// choice forever.
    pub fn apply_attester_slashing(&self, slashing: &AttesterSlashing) {
        self.fork_choice.write().on_attester_slashing(slashing);
    }

    /// Mark the descendants of an invalid payload invalid and recompute the head.
    pub async fn process_invalid_execution_payload(
        self: &Arc<Self>,
        op: &InvalidationOperation,
    ) -> Result<(), BeaconChainError> {
        self.fork_choice
            .write()
            .on_invalid_execution_payload(op)
            .map_err(BeaconChainError::from)?;
        self.recompute_head().await;
        Ok(())
    }

    /// Send a `forkchoiceUpdated` to the engine, applying the proposer re-org override when a
    /// proposal at `proposal_slot` is imminent and all override conditions hold.
    pub async fn update_execution_engine_forkchoice(
        self: &Arc<Self>,
        proposal_slot: Option<Slot>,
    ) -> Result<(), BeaconChainError> {
        let params = self
            .fork_choice
            .read()
            .get_forkchoice_update_parameters();

        let mut head_hash = params.head_hash;

        if let Some(proposal_slot) = proposal_slot {
            let fork_choice = self.fork_choice.read();
            match fork_choice.should_override_forkchoice_update(
                params.head_root,
                proposal_slot,
                &DisallowedReOrgOffsets::default(),
                &self.spec,
            ) {
                Ok(info) => {
                    debug!(
                        head = ?info.head_node.root(),
                        parent = ?info.parent_node.root(),
                        "Overriding fork choice update for proposer re-org"
                    );
                    head_hash = info.parent_node.block.execution_status.block_hash();
                }
                Err(fork_choice::ProposerHeadError::DoNotReOrg(reason)) => {
                    debug!(%reason, "Not overriding fork choice update");
                }
                Err(fork_choice::ProposerHeadError::Error(e)) => {
                    warn!(error = ?e, "Proposer head computation failed");
                }
            }
        }

        let Some(head_hash) = head_hash else {
            // Pre-merge head: nothing to tell the engine.
            return Ok(());
        };

        let forkchoice_state = ForkchoiceState {
            head_block_hash: head_hash,
            safe_block_hash: params.justified_hash.unwrap_or(head_hash),
            finalized_block_hash: params
                .finalized_hash
                .unwrap_or(types::ExecutionBlockHash::zero()),
        };
        self.engine
            .forkchoice_updated(forkchoice_state, None)
            .await
            .map_err(BeaconChainError::from)?;
        Ok(())
    }
}
