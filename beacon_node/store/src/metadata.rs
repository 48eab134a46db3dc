use crate::{DBColumn, Error, StoreItem};
use ssz::{Decode, Encode};
use ssz_derive::{Decode, Encode};
use types::{Hash256, Slot};

pub const CURRENT_SCHEMA_VERSION: SchemaVersion = SchemaVersion(1);

pub const SCHEMA_VERSION_KEY: &[u8] = b"scmv";
pub const SPLIT_KEY: &[u8] = b"splt";
pub const ANCHOR_INFO_KEY: &[u8] = b"anch";
pub const BLOB_INFO_KEY: &[u8] = b"blbi";
pub const BACKFILLED_RANGES_KEY: &[u8] = b"bfil";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Encode, Decode)]
pub struct SchemaVersion(pub u64);

impl StoreItem for SchemaVersion {
    fn db_column() -> DBColumn {
        DBColumn::BeaconMeta
    }

    fn as_store_bytes(&self) -> Vec<u8> {
        self.as_ssz_bytes()
    }

    fn from_store_bytes(bytes: &[u8]) -> Result<Self, Error> {
        Ok(Self::from_ssz_bytes(bytes)?)
    }
}

/// Information about the anchor point of a checkpoint-synced (or genesis-synced) node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct AnchorInfo {
    /// The slot at which the anchor state is present and which we cannot revert.
    pub anchor_slot: Slot,
    /// The slot of the earliest block stored in the database.
    pub oldest_block_slot: Slot,
    /// The parent of the earliest block: the target for backfill sync.
    pub oldest_block_parent: Hash256,
}

impl StoreItem for AnchorInfo {
    fn db_column() -> DBColumn {
        DBColumn::BeaconMeta
    }

    fn as_store_bytes(&self) -> Vec<u8> {
        self.as_ssz_bytes()
    }

    fn from_store_bytes(bytes: &[u8]) -> Result<Self, Error> {
        Ok(Self::from_ssz_bytes(bytes)?)
    }
}

/// Information about the blob/column retention window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct BlobInfo {
    /// The slot of the oldest stored sidecar; sidecars before it have been pruned.
    pub oldest_blob_slot: Slot,
}

impl StoreItem for BlobInfo {
    fn db_column() -> DBColumn {
        DBColumn::BeaconMeta
    }

    fn as_store_bytes(&self) -> Vec<u8> {
        self.as_ssz_bytes()
    }

    fn from_store_bytes(bytes: &[u8]) -> Result<Self, Error> {
        Ok(Self::from_ssz_bytes(bytes)?)
    }
}

/// An inclusive range of slots that backfill sync has completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct SlotRange {
    pub start: Slot,
    pub end: Slot,
}

/// The ranges of history that are fully downloaded, persisted as a scalar record and compacted
/// whenever ranges become adjacent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct BackfilledRanges {
    pub ranges: Vec<SlotRange>,
}

impl BackfilledRanges {
    /// Add a completed range, merging it with existing contiguous or overlapping ranges.
    pub fn add(&mut self, start: Slot, end: Slot) {
        self.ranges.push(SlotRange { start, end });
        self.ranges.sort_by_key(|range| range.start);

        let mut compacted: Vec<SlotRange> = Vec::with_capacity(self.ranges.len());
        for range in self.ranges.drain(..) {
            match compacted.last_mut() {
                Some(last) if range.start <= last.end.saturating_add(1u64) => {
                    last.end = std::cmp::max(last.end, range.end);
                }
                _ => compacted.push(range),
            }
        }
        self.ranges = compacted;
    }

    pub fn contains(&self, slot: Slot) -> bool {
        self.ranges
            .iter()
            .any(|range| range.start <= slot && slot <= range.end)
    }
}

impl StoreItem for BackfilledRanges {
    fn db_column() -> DBColumn {
        DBColumn::BeaconMeta
    }

    fn as_store_bytes(&self) -> Vec<u8> {
        self.as_ssz_bytes()
    }

    fn from_store_bytes(bytes: &[u8]) -> Result<Self, Error> {
        Ok(Self::from_ssz_bytes(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backfilled_ranges_compact() {
        let mut ranges = BackfilledRanges::default();
        ranges.add(Slot::new(10), Slot::new(20));
        ranges.add(Slot::new(30), Slot::new(40));
        assert_eq!(ranges.ranges.len(), 2);

        // Bridging range merges everything into one.
        ranges.add(Slot::new(21), Slot::new(29));
        assert_eq!(
            ranges.ranges,
            vec![SlotRange {
                start: Slot::new(10),
                end: Slot::new(40)
            }]
        );
        assert!(ranges.contains(Slot::new(35)));
        assert!(!ranges.contains(Slot::new(41)));
    }
}
