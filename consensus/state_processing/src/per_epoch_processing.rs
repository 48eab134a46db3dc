use safe_arith::{ArithError, SafeArith};
use types::participation_flags::TIMELY_TARGET_FLAG_INDEX;
use types::{
    BeaconState, BeaconStateError, ChainSpec, Checkpoint, Epoch,
    consts::typenum_sizes::JustificationBitsLength, participation_flags::has_flag,
};

#[derive(Debug, PartialEq, Clone)]
pub enum EpochProcessingError {
    BeaconState(BeaconStateError),
    Arith(ArithError),
}

impl From<BeaconStateError> for EpochProcessingError {
    fn from(e: BeaconStateError) -> Self {
        Self::BeaconState(e)
    }
}

impl From<ArithError> for EpochProcessingError {
    fn from(e: ArithError) -> Self {
        Self::Arith(e)
    }
}

/// Balances summed while computing justification, reported for observability.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpochProcessingSummary {
    pub total_active_balance: u64,
    pub previous_epoch_target_attesting_balance: u64,
    pub current_epoch_target_attesting_balance: u64,
}

/// The FFG-relevant outputs of epoch processing, separated from the state so that fork choice
/// can compute *unrealized* justification without mutating a state.
#[derive(Debug, Clone, PartialEq)]
pub struct JustificationAndFinalizationState {
    pub previous_justified_checkpoint: Checkpoint,
    pub current_justified_checkpoint: Checkpoint,
    pub finalized_checkpoint: Checkpoint,
    pub justification_bits: ssz_types::BitVector<JustificationBitsLength>,
    pub summary: EpochProcessingSummary,
}

impl JustificationAndFinalizationState {
    pub fn new(state: &BeaconState) -> Self {
        Self {
            previous_justified_checkpoint: state.previous_justified_checkpoint,
            current_justified_checkpoint: state.current_justified_checkpoint,
            finalized_checkpoint: state.finalized_checkpoint,
            justification_bits: state.justification_bits.clone(),
            summary: EpochProcessingSummary::default(),
        }
    }

    /// Commit the computed checkpoints into `state`.
    pub fn apply_changes_to_state(self, state: &mut BeaconState) {
        state.previous_justified_checkpoint = self.previous_justified_checkpoint;
        state.current_justified_checkpoint = self.current_justified_checkpoint;
        state.finalized_checkpoint = self.finalized_checkpoint;
        state.justification_bits = self.justification_bits;
    }
}

/// Sum the effective balances of unslashed validators whose `epoch` participation has the
/// timely-target flag.
fn target_attesting_balance(
    state: &BeaconState,
    participation: &[u8],
) -> Result<u64, EpochProcessingError> {
    let mut balance = 0u64;
    for (index, validator) in state.validators.iter().enumerate() {
        if validator.slashed {
            continue;
        }
        let flags = participation.get(index).copied().unwrap_or(0);
        if has_flag(flags, TIMELY_TARGET_FLAG_INDEX)? {
            balance.safe_add_assign(validator.effective_balance)?;
        }
    }
    Ok(balance)
}

/// Compute the justification and finalization updates for the epoch boundary at
/// `state.current_epoch()`, without mutating the state.
///
/// ## Specification
///
/// Equivalent to the combination of `process_justification_and_finalization` and
/// `weigh_justification_and_finalization` in the consensus spec.
pub fn process_justification_and_finalization(
    state: &BeaconState,
    spec: &ChainSpec,
) -> Result<JustificationAndFinalizationState, EpochProcessingError> {
    let mut jf_state = JustificationAndFinalizationState::new(state);

    // Justification and finalization do not move in the first two epochs.
    if state.current_epoch() <= Epoch::new(1) {
        return Ok(jf_state);
    }

    let total_active_balance = state.get_total_active_balance(spec);
    let previous_target_balance =
        target_attesting_balance(state, &state.previous_epoch_participation)?;
    let current_target_balance =
        target_attesting_balance(state, &state.current_epoch_participation)?;

    jf_state.summary = EpochProcessingSummary {
        total_active_balance,
        previous_epoch_target_attesting_balance: previous_target_balance,
        current_epoch_target_attesting_balance: current_target_balance,
    };

    weigh_justification_and_finalization(
        state,
        &mut jf_state,
        total_active_balance,
        previous_target_balance,
        current_target_balance,
    )?;

    Ok(jf_state)
}

fn weigh_justification_and_finalization(
    state: &BeaconState,
    jf_state: &mut JustificationAndFinalizationState,
    total_active_balance: u64,
    previous_target_balance: u64,
    current_target_balance: u64,
) -> Result<(), EpochProcessingError> {
    let previous_epoch = state.previous_epoch();
    let current_epoch = state.current_epoch();

    let old_previous_justified_checkpoint = jf_state.previous_justified_checkpoint;
    let old_current_justified_checkpoint = jf_state.current_justified_checkpoint;
    jf_state.previous_justified_checkpoint = jf_state.current_justified_checkpoint;

    // Shift the justification bits.
    let mut new_bits = ssz_types::BitVector::new();
    for i in 1..new_bits.len() {
        let bit = jf_state
            .justification_bits
            .get(i - 1)
            .map_err(|_| BeaconStateError::InvalidBitfield)?;
        new_bits
            .set(i, bit)
            .map_err(|_| BeaconStateError::InvalidBitfield)?;
    }
    jf_state.justification_bits = new_bits;

    if previous_target_balance.safe_mul(3)? >= total_active_balance.safe_mul(2)? {
        jf_state.current_justified_checkpoint = Checkpoint {
            epoch: previous_epoch,
            root: state.get_block_root_at_epoch(previous_epoch)?,
        };
        jf_state
            .justification_bits
            .set(1, true)
            .map_err(|_| BeaconStateError::InvalidBitfield)?;
    }
    if current_target_balance.safe_mul(3)? >= total_active_balance.safe_mul(2)? {
        jf_state.current_justified_checkpoint = Checkpoint {
            epoch: current_epoch,
            root: state.get_block_root_at_epoch(current_epoch)?,
        };
        jf_state
            .justification_bits
            .set(0, true)
            .map_err(|_| BeaconStateError::InvalidBitfield)?;
    }

    let bits = &jf_state.justification_bits;
    let bit = |i: usize| bits.get(i).unwrap_or(false);
    let all_set = |range: std::ops::Range<usize>| range.into_iter().all(bit);

    // The 2nd/3rd/4th most recent epochs are justified, the 2nd using the 4th as source.
    if all_set(1..4) && old_previous_justified_checkpoint.epoch + 3 == current_epoch {
        jf_state.finalized_checkpoint = old_previous_justified_checkpoint;
    }
    // The 2nd/3rd most recent epochs are justified, the 2nd using the 3rd as source.
    if all_set(1..3) && old_previous_justified_checkpoint.epoch + 2 == current_epoch {
        jf_state.finalized_checkpoint = old_previous_justified_checkpoint;
    }
    // The 1st/2nd/3rd most recent epochs are justified, the 1st using the 3rd as source.
    if all_set(0..3) && old_current_justified_checkpoint.epoch + 2 == current_epoch {
        jf_state.finalized_checkpoint = old_current_justified_checkpoint;
    }
    // The 1st/2nd most recent epochs are justified, the 1st using the 2nd as source.
    if all_set(0..2) && old_current_justified_checkpoint.epoch + 1 == current_epoch {
        jf_state.finalized_checkpoint = old_current_justified_checkpoint;
    }

    Ok(())
}

/// Run full epoch processing on `state` at an epoch boundary.
pub fn process_epoch(
    state: &mut BeaconState,
    spec: &ChainSpec,
) -> Result<EpochProcessingSummary, EpochProcessingError> {
    let jf_state = process_justification_and_finalization(state, spec)?;
    let summary = jf_state.summary.clone();
    jf_state.apply_changes_to_state(state);

    // Rotate participation: the current epoch becomes the previous one.
    let registry_len = state.validators.len();
    state.previous_epoch_participation =
        std::mem::take(&mut state.current_epoch_participation);
    state.current_epoch_participation = ssz_types::VariableList::from(vec![0u8; registry_len]);

    Ok(summary)
}
