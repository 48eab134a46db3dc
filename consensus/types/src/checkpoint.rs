use crate::{Epoch, Hash256};
use serde::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use tree_hash_derive::TreeHash;

/// Casper FFG checkpoint, used in attestations and as the justification/finalization anchor.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode, TreeHash,
)]
pub struct Checkpoint {
    pub epoch: Epoch,
    pub root: Hash256,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ssz::{Decode, Encode};

    #[test]
    fn ssz_round_trip() {
        let checkpoint = Checkpoint {
            epoch: Epoch::new(9),
            root: Hash256::repeat_byte(7),
        };
        let bytes = checkpoint.as_ssz_bytes();
        assert_eq!(Checkpoint::from_ssz_bytes(&bytes).unwrap(), checkpoint);
    }
}
