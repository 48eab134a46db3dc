use crate::{Epoch, ForkVersion};
use serde::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use tree_hash_derive::TreeHash;

/// The fork held in the beacon state: the previous and current fork versions and the epoch of
/// the most recent upgrade.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Encode, Decode, TreeHash,
)]
pub struct Fork {
    #[serde(with = "serde_utils::bytes_4_hex")]
    pub previous_version: ForkVersion,
    #[serde(with = "serde_utils::bytes_4_hex")]
    pub current_version: ForkVersion,
    pub epoch: Epoch,
}

impl Fork {
    /// Return the fork version of the given `epoch`.
    pub fn get_fork_version(&self, epoch: Epoch) -> ForkVersion {
        if epoch < self.epoch {
            return self.previous_version;
        }
        self.current_version
    }
}

/// Container hashed to derive a fork digest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Encode, Decode, TreeHash)]
pub struct ForkData {
    pub current_version: ForkVersion,
    pub genesis_validators_root: crate::Hash256,
}
