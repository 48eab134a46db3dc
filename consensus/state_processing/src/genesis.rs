use types::consts::typenum_sizes::ValidatorRegistryLimit;
use types::{
    BeaconBlock, BeaconState, BeaconStateError, ChainSpec, Epoch, FixedBytesExtended, Fork,
    Hash256, PublicKeyBytes, Slot, Validator,
};
use ssz_types::VariableList;
use tree_hash::TreeHash;

/// Build a genesis state with the given already-active validators.
///
/// This is the deterministic "interop" genesis used by testing and local devnets: every
/// validator starts at the maximum effective balance, active since epoch 0.
pub fn interop_genesis_state(
    pubkeys: &[PublicKeyBytes],
    genesis_time: u64,
    spec: &ChainSpec,
) -> Result<BeaconState, BeaconStateError> {
    let validators = pubkeys
        .iter()
        .map(|pubkey| Validator {
            pubkey: *pubkey,
            withdrawal_credentials: Hash256::zero(),
            effective_balance: spec.max_effective_balance,
            slashed: false,
            activation_eligibility_epoch: Epoch::new(0),
            activation_epoch: Epoch::new(0),
            exit_epoch: Epoch::max_value(),
            withdrawable_epoch: Epoch::max_value(),
        })
        .collect::<Vec<_>>();

    let registry_len = validators.len();
    let balances: VariableList<u64, ValidatorRegistryLimit> =
        VariableList::from(vec![spec.max_effective_balance; registry_len]);

    let latest_block_header = BeaconBlock::empty().temporary_block_header();

    let mut state = BeaconState {
        genesis_time,
        genesis_validators_root: Hash256::zero(),
        slot: Slot::new(0),
        fork: Fork {
            previous_version: spec.genesis_fork_version,
            current_version: spec.genesis_fork_version,
            epoch: Epoch::new(0),
        },
        latest_block_header,
        block_roots: Default::default(),
        state_roots: Default::default(),
        validators: VariableList::from(validators),
        balances,
        randao_mixes: Default::default(),
        previous_epoch_participation: VariableList::from(vec![0u8; registry_len]),
        current_epoch_participation: VariableList::from(vec![0u8; registry_len]),
        justification_bits: Default::default(),
        previous_justified_checkpoint: Default::default(),
        current_justified_checkpoint: Default::default(),
        finalized_checkpoint: Default::default(),
        latest_execution_payload_header: Default::default(),
        committee_caches: Default::default(),
    };

    state.genesis_validators_root = state.validators.tree_hash_root();
    state.build_all_committee_caches(spec)?;

    Ok(state)
}

/// The block implied by a genesis state: an empty block whose state root is the genesis state
/// root.
pub fn genesis_block(genesis_state: &mut BeaconState) -> BeaconBlock {
    let mut block = BeaconBlock::empty();
    block.state_root = genesis_state.canonical_root();
    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use bls::Keypair;

    #[test]
    fn interop_state_has_active_validators() {
        let spec = ChainSpec::mainnet();
        let pubkeys = (0..4)
            .map(|_| Keypair::random().pk.compress())
            .collect::<Vec<_>>();
        let state = interop_genesis_state(&pubkeys, 0, &spec).unwrap();

        assert_eq!(state.validators.len(), 4);
        assert_eq!(
            state.get_active_validator_indices(Epoch::new(0)),
            vec![0, 1, 2, 3]
        );
        assert!(state.get_beacon_proposer_index(Slot::new(0), &spec).is_ok());
        assert_ne!(state.genesis_validators_root, Hash256::zero());
    }
}
