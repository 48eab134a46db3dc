use crate::{Epoch, Hash256};
use bls::PublicKeyBytes;
use serde::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use tree_hash_derive::TreeHash;

/// Information about a `BeaconChain` validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode, TreeHash)]
pub struct Validator {
    pub pubkey: PublicKeyBytes,
    pub withdrawal_credentials: Hash256,
    #[serde(with = "serde_utils::quoted_u64")]
    pub effective_balance: u64,
    pub slashed: bool,
    pub activation_eligibility_epoch: Epoch,
    pub activation_epoch: Epoch,
    pub exit_epoch: Epoch,
    pub withdrawable_epoch: Epoch,
}

impl Validator {
    /// Returns `true` if the validator is considered active at some epoch.
    pub fn is_active_at(&self, epoch: Epoch) -> bool {
        self.activation_epoch <= epoch && epoch < self.exit_epoch
    }

    /// Returns `true` if the validator is slashable at some epoch.
    pub fn is_slashable_at(&self, epoch: Epoch) -> bool {
        !self.slashed
            && self.activation_epoch <= epoch
            && epoch < self.withdrawable_epoch
    }
}

impl Default for Validator {
    /// Yields a "default" `Validator`. Primarily used for testing.
    fn default() -> Self {
        Self {
            pubkey: PublicKeyBytes::empty(),
            withdrawal_credentials: Hash256::default(),
            activation_eligibility_epoch: Epoch::max_value(),
            activation_epoch: Epoch::max_value(),
            exit_epoch: Epoch::max_value(),
            withdrawable_epoch: Epoch::max_value(),
            slashed: false,
            effective_balance: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_validator_is_never_active() {
        let validator = Validator::default();
        assert!(!validator.is_active_at(Epoch::new(0)));
        assert!(!validator.is_active_at(Epoch::max_value().saturating_sub(1u64)));
    }

    #[test]
    fn activity_window() {
        let validator = Validator {
            activation_epoch: Epoch::new(2),
            exit_epoch: Epoch::new(5),
            ..Validator::default()
        };
        assert!(!validator.is_active_at(Epoch::new(1)));
        assert!(validator.is_active_at(Epoch::new(2)));
        assert!(validator.is_active_at(Epoch::new(4)));
        assert!(!validator.is_active_at(Epoch::new(5)));
    }
}
