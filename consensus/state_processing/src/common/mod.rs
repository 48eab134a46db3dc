use types::{
    Attestation, BeaconState, BeaconStateError, IndexedAttestation,
};

/// Convert `attestation` to an indexed attestation using the committees of `state`.
///
/// The attesting indices are sorted ascending, per the consensus spec.
pub fn get_indexed_attestation(
    state: &BeaconState,
    attestation: &Attestation,
) -> Result<IndexedAttestation, BeaconStateError> {
    let committee = state.get_beacon_committee(attestation.data.slot, attestation.data.index)?;
    let attesting_indices = get_attesting_indices(committee.committee, attestation)?;

    Ok(IndexedAttestation {
        attesting_indices: attesting_indices.into(),
        data: attestation.data,
        signature: attestation.signature,
    })
}

/// Returns the ascending list of validator indices whose aggregation bit is set.
pub fn get_attesting_indices(
    committee: &[usize],
    attestation: &Attestation,
) -> Result<Vec<u64>, BeaconStateError> {
    if attestation.aggregation_bits.len() != committee.len() {
        return Err(BeaconStateError::InvalidBitfield);
    }

    let mut indices = committee
        .iter()
        .enumerate()
        .filter(|(position, _)| {
            attestation
                .aggregation_bits
                .get(*position)
                .unwrap_or(false)
        })
        .map(|(_, validator_index)| *validator_index as u64)
        .collect::<Vec<_>>();
    indices.sort_unstable();
    Ok(indices)
}

/// Initiate the exit of `validator_index`, lazily choosing the earliest available exit epoch.
pub fn initiate_validator_exit(
    state: &mut BeaconState,
    validator_index: usize,
) -> Result<(), BeaconStateError> {
    let exit_epoch = state.next_epoch();
    let validator = state
        .validators
        .get_mut(validator_index)
        .ok_or(BeaconStateError::UnknownValidator(validator_index))?;
    if validator.exit_epoch == types::Epoch::max_value() {
        validator.exit_epoch = exit_epoch;
        validator.withdrawable_epoch = exit_epoch.saturating_add(256u64);
    }
    Ok(())
}

/// Slash `slashed_index`, marking it slashed and initiating its exit.
pub fn slash_validator(
    state: &mut BeaconState,
    slashed_index: usize,
) -> Result<(), BeaconStateError> {
    initiate_validator_exit(state, slashed_index)?;
    let validator = state
        .validators
        .get_mut(slashed_index)
        .ok_or(BeaconStateError::UnknownValidator(slashed_index))?;
    validator.slashed = true;
    Ok(())
}
