//! The `Slot` and `Epoch` types are defined as new-types of `u64`.
//!
//! Both are fully-fledged integers with defined overflow behaviour: regular arithmetic panics in
//! debug and wraps in release (like `u64`), while the `saturating_*` and `checked_*` variants are
//! available wherever protocol code subtracts across the genesis boundary.

use crate::ChainSpec;
use serde::{Deserialize, Serialize};
use ssz::{Decode, DecodeError, Encode};
use std::fmt;
use std::hash::Hash;
use std::iter::Iterator;
use std::str::FromStr;
use tree_hash::{PackedEncoding, TreeHash, TreeHashType};

#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Slot(#[serde(with = "serde_utils::quoted_u64")] u64);

#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Epoch(#[serde(with = "serde_utils::quoted_u64")] u64);

macro_rules! impl_common {
    ($main:ident) => {
        impl $main {
            pub const fn new(value: u64) -> $main {
                $main(value)
            }

            pub const fn max_value() -> $main {
                $main(u64::MAX)
            }

            pub const fn as_u64(&self) -> u64 {
                self.0
            }

            pub const fn as_usize(&self) -> usize {
                self.0 as usize
            }

            pub fn saturating_add<T: Into<u64>>(&self, other: T) -> $main {
                $main(self.0.saturating_add(other.into()))
            }

            pub fn saturating_sub<T: Into<u64>>(&self, other: T) -> $main {
                $main(self.0.saturating_sub(other.into()))
            }

            pub fn checked_sub<T: Into<u64>>(&self, other: T) -> Option<$main> {
                self.0.checked_sub(other.into()).map($main)
            }

            pub fn checked_add<T: Into<u64>>(&self, other: T) -> Option<$main> {
                self.0.checked_add(other.into()).map($main)
            }
        }

        impl From<u64> for $main {
            fn from(value: u64) -> Self {
                $main(value)
            }
        }

        impl From<$main> for u64 {
            fn from(value: $main) -> Self {
                value.0
            }
        }

        impl From<$main> for usize {
            fn from(value: $main) -> Self {
                value.0 as usize
            }
        }

        impl std::ops::Add<$main> for $main {
            type Output = $main;
            fn add(self, other: $main) -> $main {
                $main(self.0 + other.0)
            }
        }

        impl std::ops::Add<u64> for $main {
            type Output = $main;
            fn add(self, other: u64) -> $main {
                $main(self.0 + other)
            }
        }

        impl std::ops::AddAssign<u64> for $main {
            fn add_assign(&mut self, other: u64) {
                self.0 += other;
            }
        }

        impl std::ops::AddAssign<$main> for $main {
            fn add_assign(&mut self, other: $main) {
                self.0 += other.0;
            }
        }

        impl std::ops::Sub<$main> for $main {
            type Output = $main;
            fn sub(self, other: $main) -> $main {
                $main(self.0 - other.0)
            }
        }

        impl std::ops::Sub<u64> for $main {
            type Output = $main;
            fn sub(self, other: u64) -> $main {
                $main(self.0 - other)
            }
        }

        impl std::ops::Mul<u64> for $main {
            type Output = $main;
            fn mul(self, rhs: u64) -> $main {
                $main(self.0 * rhs)
            }
        }

        impl std::ops::Div<u64> for $main {
            type Output = $main;
            fn div(self, rhs: u64) -> $main {
                $main(self.0 / rhs)
            }
        }

        impl std::ops::Rem<u64> for $main {
            type Output = $main;
            fn rem(self, rhs: u64) -> $main {
                $main(self.0 % rhs)
            }
        }

        impl PartialEq<u64> for $main {
            fn eq(&self, other: &u64) -> bool {
                self.0 == *other
            }
        }

        impl PartialOrd<u64> for $main {
            fn partial_cmp(&self, other: &u64) -> Option<std::cmp::Ordering> {
                self.0.partial_cmp(other)
            }
        }

        impl fmt::Display for $main {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $main {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{}({})", stringify!($main), self.0)
            }
        }

        impl FromStr for $main {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<$main, Self::Err> {
                u64::from_str(s).map($main)
            }
        }

        impl Encode for $main {
            fn is_ssz_fixed_len() -> bool {
                <u64 as Encode>::is_ssz_fixed_len()
            }

            fn ssz_fixed_len() -> usize {
                <u64 as Encode>::ssz_fixed_len()
            }

            fn ssz_bytes_len(&self) -> usize {
                self.0.ssz_bytes_len()
            }

            fn ssz_append(&self, buf: &mut Vec<u8>) {
                self.0.ssz_append(buf)
            }
        }

        impl Decode for $main {
            fn is_ssz_fixed_len() -> bool {
                <u64 as Decode>::is_ssz_fixed_len()
            }

            fn ssz_fixed_len() -> usize {
                <u64 as Decode>::ssz_fixed_len()
            }

            fn from_ssz_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
                u64::from_ssz_bytes(bytes).map($main)
            }
        }

        impl TreeHash for $main {
            fn tree_hash_type() -> TreeHashType {
                TreeHashType::Basic
            }

            fn tree_hash_packed_encoding(&self) -> PackedEncoding {
                self.0.tree_hash_packed_encoding()
            }

            fn tree_hash_packing_factor() -> usize {
                u64::tree_hash_packing_factor()
            }

            fn tree_hash_root(&self) -> tree_hash::Hash256 {
                self.0.tree_hash_root()
            }
        }
    };
}

impl_common!(Slot);
impl_common!(Epoch);

impl Slot {
    /// Returns the epoch this slot belongs to.
    pub fn epoch(self, slots_per_epoch: u64) -> Epoch {
        Epoch(self.0 / slots_per_epoch)
    }

    /// Returns `true` if this slot is the first of its epoch.
    pub fn is_epoch_start(self, slots_per_epoch: u64) -> bool {
        self.0 % slots_per_epoch == 0
    }

    pub fn max(self, other: Slot) -> Slot {
        Slot(std::cmp::max(self.0, other.0))
    }
}

impl Epoch {
    /// Returns the first slot of this epoch.
    pub fn start_slot(self, slots_per_epoch: u64) -> Slot {
        Slot(self.0.saturating_mul(slots_per_epoch))
    }

    /// Returns the last slot of this epoch.
    pub fn end_slot(self, slots_per_epoch: u64) -> Slot {
        Slot(
            self.0
                .saturating_add(1)
                .saturating_mul(slots_per_epoch)
                .saturating_sub(1),
        )
    }

    /// Iterate over the slots of this epoch.
    pub fn slot_iter(self, slots_per_epoch: u64) -> impl Iterator<Item = Slot> {
        let start = self.start_slot(slots_per_epoch).as_u64();
        (start..start + slots_per_epoch).map(Slot)
    }

    /// The epoch used for committee seeding, wrapping within the historical vector.
    pub fn position_in_historical_vector(self, vector_len: u64) -> usize {
        (self.0 % vector_len) as usize
    }

    pub fn is_far_future(self, spec: &ChainSpec) -> bool {
        self == spec.far_future_epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::SLOTS_PER_EPOCH;

    #[test]
    fn slot_epoch_mapping() {
        assert_eq!(Slot::new(0).epoch(SLOTS_PER_EPOCH), Epoch::new(0));
        assert_eq!(Slot::new(31).epoch(SLOTS_PER_EPOCH), Epoch::new(0));
        assert_eq!(Slot::new(32).epoch(SLOTS_PER_EPOCH), Epoch::new(1));
        assert_eq!(Epoch::new(2).start_slot(SLOTS_PER_EPOCH), Slot::new(64));
        assert_eq!(Epoch::new(2).end_slot(SLOTS_PER_EPOCH), Slot::new(95));
    }

    #[test]
    fn saturating_sub_stops_at_zero() {
        assert_eq!(Slot::new(3).saturating_sub(10u64), Slot::new(0));
        assert_eq!(Epoch::new(3).saturating_sub(1u64), Epoch::new(2));
    }

    #[test]
    fn serde_quotes_u64() {
        let slot = Slot::new(42);
        let json = serde_json::to_string(&slot).unwrap();
        assert_eq!(json, "\"42\"");
        assert_eq!(serde_json::from_str::<Slot>(&json).unwrap(), slot);
    }

    #[test]
    fn far_future_round_trips_through_sentinel_string() {
        let epoch = Epoch::max_value();
        let json = serde_json::to_string(&epoch).unwrap();
        assert_eq!(json, "\"18446744073709551615\"");
        assert_eq!(serde_json::from_str::<Epoch>(&json).unwrap(), epoch);
    }

    #[test]
    fn ssz_round_trip() {
        let slot = Slot::new(7);
        assert_eq!(Slot::from_ssz_bytes(&slot.as_ssz_bytes()).unwrap(), slot);
    }
}
