//! Verification of a segment of blocks sharing an epoch, in maximal parallel.
//!
//! A single cancellation token coordinates four concurrent workloads started together:
//!
//! 1. execution payload verification (sequential `newPayload` calls to the engine),
//! 2. data availability (awaiting each input's blob/column promise, bounded by slot timing),
//! 3. the state transition (sequential, signatures excluded),
//! 4. signature verification (every signature in the segment in one batch).
//!
//! The result is all-or-none: either every block verifies, or the caller receives the specific
//! `BlockError` and the abort reason; no partial state is applied.

use crate::block_input::{AvailabilityTimeout, BlockInput};
use crate::errors::{BeaconChainError, BlockError};
use crate::metrics;
use crate::regen::Regen;
use execution_layer::{EngineApi, PayloadStatus};
use fork_choice::PayloadVerificationStatus;
use proto_array::DataAvailabilityStatus;
use slot_clock::SlotClock;
use state_processing::per_block_processing::kzg_commitment_to_versioned_hash;
use state_processing::{
    BlockSignatureStrategy, ConsensusContext, VerifyBlockRoot, per_block_processing,
    per_slot_processing, signature_sets::block_signature_sets,
};
use std::sync::Arc;
use std::time::Duration;
use store::KeyValueStore;
use task_executor::TaskExecutor;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use types::{
    BeaconState, ChainSpec, ExecutionBlockHash, IndexedAttestation, Slot,
};

/// Options controlling a segment verification.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerifyBlockOpts {
    /// Trust the execution payloads without calling the engine (checkpoint sync, tests).
    pub skip_verify_execution_payload: bool,
    /// Trust the block signatures (e.g. blocks replayed from our own database).
    pub skip_verify_block_signatures: bool,
    /// Verify without importing; the caller discards the result.
    pub verify_only: bool,
    /// Persist blocks before verification completes, so a crash mid-import can resume.
    pub eager_persist_block: bool,
}

/// The outputs of a successful segment verification, index-aligned with the input blocks.
pub struct SegmentVerificationResult {
    pub post_states: Vec<BeaconState>,
    pub proposer_balance_deltas: Vec<i64>,
    pub segment_exec_status: Vec<PayloadVerificationStatus>,
    pub data_availability_statuses: Vec<DataAvailabilityStatus>,
    pub indexed_attestations_by_block: Vec<Vec<IndexedAttestation>>,
}

/// The bounded wait for a block's data, derived from slot timing: until the end of the
/// block's slot, but never less than one attestation interval.
fn availability_timeout<S: SlotClock>(slot_clock: &S, block_slot: Slot) -> Duration {
    let minimum = slot_clock.unagg_attestation_production_delay();
    match (slot_clock.start_of(block_slot), slot_clock.now_duration()) {
        (Some(slot_start), Some(now)) => {
            let deadline = slot_start + slot_clock.slot_duration();
            deadline.checked_sub(now).map_or(minimum, |remaining| {
                std::cmp::max(remaining, minimum)
            })
        }
        _ => minimum,
    }
}

/// Verify `block_inputs` (a chain of blocks within one epoch) against their common pre-state.
pub async fn verify_block_segment<Hot, Cold, S>(
    regen: Arc<Regen<Hot, Cold>>,
    engine: Arc<dyn EngineApi>,
    slot_clock: S,
    spec: Arc<ChainSpec>,
    executor: TaskExecutor,
    block_inputs: Vec<Arc<BlockInput>>,
    opts: VerifyBlockOpts,
) -> Result<SegmentVerificationResult, BlockError>
where
    Hot: KeyValueStore,
    Cold: KeyValueStore,
    S: SlotClock + 'static,
{
    let Some(first_input) = block_inputs.first() else {
        return Err(BeaconChainError::InternalError("empty segment".into()).into());
    };

    // All blocks must share an epoch so a single pre-state (and committee shuffling) covers
    // the whole segment.
    let segment_epoch = first_input.epoch();
    for window in block_inputs.windows(2) {
        if window[1].epoch() != segment_epoch {
            return Err(
                BeaconChainError::InternalError("segment spans epochs".into()).into(),
            );
        }
        if window[1].block().parent_root() != window[0].block_root() {
            return Err(BlockError::ParentUnknown(window[1].block().parent_root()));
        }
    }

    let _timer = metrics::start_timer(&metrics::BLOCK_PROCESSING_TIMES);

    // Fetch (or regenerate) the common pre-state.
    let parent_root = first_input.block().parent_root();
    let pre_state = {
        let regen = regen.clone();
        let first_block = first_input.block().clone();
        executor
            .spawn_blocking_handle(
                move || regen.get_pre_state(&first_block),
                "segment_pre_state",
            )
            .ok_or(BlockError::Aborted)?
            .await
            .map_err(|_| BlockError::Aborted)?
            .map_err(|e| {
                debug!(error = ?e, "Failed to load pre-state");
                BlockError::PreStateMissing(parent_root)
            })?
    };

    // Any failing workload cancels its siblings through this token.
    let abort = CancellationToken::new();

    /*
     * Workload 1: execution payload verification.
     */
    let exec_fut = {
        let abort = abort.clone();
        let engine = engine.clone();
        let inputs = block_inputs.clone();
        let skip = opts.skip_verify_execution_payload;
        async move {
            let mut statuses = Vec::with_capacity(inputs.len());
            for input in &inputs {
                if abort.is_cancelled() {
                    return Err(BlockError::Aborted);
                }
                let payload = &input.block().message().body.execution_payload;
                if skip || payload.block_hash == ExecutionBlockHash::zero() {
                    statuses.push(PayloadVerificationStatus::Irrelevant);
                    continue;
                }
                let versioned_hashes = input
                    .block()
                    .message()
                    .body
                    .blob_kzg_commitments
                    .iter()
                    .map(kzg_commitment_to_versioned_hash)
                    .collect();

                let status = tokio::select! {
                    _ = abort.cancelled() => return Err(BlockError::Aborted),
                    status = engine.new_payload(
                        payload.clone(),
                        versioned_hashes,
                        input.block().parent_root(),
                    ) => status,
                };
                match status {
                    Ok(PayloadStatus::Valid) => statuses.push(PayloadVerificationStatus::Verified),
                    Ok(PayloadStatus::Syncing) | Ok(PayloadStatus::Accepted) => {
                        statuses.push(PayloadVerificationStatus::Optimistic)
                    }
                    Ok(PayloadStatus::Invalid {
                        latest_valid_hash, ..
                    }) => {
                        abort.cancel();
                        return Err(BlockError::ExecutionPayloadInvalid {
                            block_root: input.block_root(),
                            latest_valid_hash,
                        });
                    }
                    Ok(PayloadStatus::InvalidBlockHash { .. }) => {
                        abort.cancel();
                        return Err(BlockError::ExecutionPayloadInvalid {
                            block_root: input.block_root(),
                            latest_valid_hash: None,
                        });
                    }
                    Err(execution_layer::Error::EngineUnavailable) => {
                        abort.cancel();
                        return Err(BlockError::EngineUnavailable);
                    }
                    Err(e) => {
                        abort.cancel();
                        return Err(BeaconChainError::EngineError(e).into());
                    }
                }
            }
            Ok(statuses)
        }
    };

    /*
     * Workload 2: data availability.
     */
    let da_fut = {
        let abort = abort.clone();
        let inputs = block_inputs.clone();
        let slot_clock = slot_clock.clone();
        async move {
            let mut statuses = Vec::with_capacity(inputs.len());
            for input in &inputs {
                let timeout = availability_timeout(&slot_clock, input.slot());
                let availability = tokio::select! {
                    _ = abort.cancelled() => return Err(BlockError::Aborted),
                    availability = input.await_available(timeout) => availability,
                };
                match availability {
                    Ok(_) => statuses.push(input.data_availability_status()),
                    Err(AvailabilityTimeout) => {
                        // A timeout defers import; it does not mark the block invalid.
                        abort.cancel();
                        return Err(BlockError::BlobUnavailable(input.block_root()));
                    }
                }
            }
            Ok(statuses)
        }
    };

    /*
     * Workload 3: the state transition (signatures excluded).
     */
    let transition_fut = {
        let abort = abort.clone();
        let inputs = block_inputs.clone();
        let mut state = pre_state.clone();
        let spec = spec.clone();
        let executor = executor.clone();
        async move {
            let handle = executor
                .spawn_blocking_handle(
                    move || {
                        let mut post_states = Vec::with_capacity(inputs.len());
                        let mut proposer_balance_deltas = Vec::with_capacity(inputs.len());
                        let mut indexed_attestations_by_block = Vec::with_capacity(inputs.len());

                        for input in &inputs {
                            if abort.is_cancelled() {
                                return Err(BlockError::Aborted);
                            }
                            let block = input.block();
                            while state.slot < block.slot() {
                                per_slot_processing(&mut state, None, &spec).map_err(|e| {
                                    abort.cancel();
                                    BlockError::from(BeaconChainError::InternalError(format!(
                                        "slot processing failed: {e:?}"
                                    )))
                                })?;
                            }

                            let proposer_index = block.message().proposer_index as usize;
                            let pre_balance = state.balances.get(proposer_index).copied();

                            let mut ctxt = ConsensusContext::new(block.slot())
                                .set_current_block_root(input.block_root());
                            per_block_processing(
                                &mut state,
                                block,
                                BlockSignatureStrategy::NoVerification,
                                VerifyBlockRoot::True,
                                &mut ctxt,
                                &spec,
                            )
                            .map_err(|e| {
                                abort.cancel();
                                BlockError::InvalidStateTransition(e)
                            })?;

                            let post_balance = state.balances.get(proposer_index).copied();
                            proposer_balance_deltas.push(
                                post_balance.unwrap_or(0) as i64 - pre_balance.unwrap_or(0) as i64,
                            );
                            indexed_attestations_by_block
                                .push(ctxt.into_indexed_attestations());
                            post_states.push(state.clone());
                        }
                        Ok((post_states, proposer_balance_deltas, indexed_attestations_by_block))
                    },
                    "segment_state_transition",
                )
                .ok_or(BlockError::Aborted)?;
            handle.await.map_err(|_| BlockError::Aborted)?
        }
    };

    /*
     * Workload 4: batched signature verification.
     */
    let sig_fut = {
        let abort = abort.clone();
        let inputs = block_inputs.clone();
        let mut state = pre_state.clone();
        let spec = spec.clone();
        let executor = executor.clone();
        let skip = opts.skip_verify_block_signatures;
        async move {
            if skip {
                return Ok(());
            }
            let handle = executor
                .spawn_blocking_handle(
                    move || {
                        // Advance to the segment's first slot so the shuffling caches cover
                        // the segment's (single) epoch.
                        let first_slot = inputs[0].slot();
                        while state.slot < first_slot {
                            per_slot_processing(&mut state, None, &spec)
                                .map_err(|_| BlockError::InvalidSignature)?;
                        }
                        state
                            .build_all_committee_caches(&spec)
                            .map_err(|_| BlockError::InvalidSignature)?;

                        let mut all_sets = Vec::new();
                        for input in &inputs {
                            if abort.is_cancelled() {
                                return Err(BlockError::Aborted);
                            }
                            let mut ctxt = ConsensusContext::new(input.slot())
                                .set_current_block_root(input.block_root());
                            let sets =
                                block_signature_sets(&state, input.block(), &mut ctxt, &spec)
                                    .map_err(|e| {
                                        debug!(error = ?e, "Failed to build signature sets");
                                        abort.cancel();
                                        BlockError::InvalidSignature
                                    })?;
                            all_sets.extend(sets);
                        }

                        if bls::verify_signature_sets(all_sets.iter()) {
                            Ok(())
                        } else {
                            abort.cancel();
                            Err(BlockError::InvalidSignature)
                        }
                    },
                    "segment_signature_verification",
                )
                .ok_or(BlockError::Aborted)?;
            handle.await.map_err(|_| BlockError::Aborted)?
        }
    };

    // Await all phases; the first failure has already cancelled its siblings.
    let (exec_statuses, da_statuses, transition, ()) =
        tokio::try_join!(exec_fut, da_fut, transition_fut, sig_fut)?;
    let (post_states, proposer_balance_deltas, indexed_attestations_by_block) = transition;

    Ok(SegmentVerificationResult {
        post_states,
        proposer_balance_deltas,
        segment_exec_status: exec_statuses,
        data_availability_statuses: da_statuses,
        indexed_attestations_by_block,
    })
}
