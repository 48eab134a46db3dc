//! Storage functionality for the beacon chain: a typed, bucketed key-value layer over an
//! embedded database, with a hot/cold split at the finalized boundary.
//!
//! Hot entities are keyed by block root; archived (cold) entities are keyed by slot. Data
//! column sidecars use a composite `root || column_index` / `slot || column_index` key with
//! fixed-width big-endian encoding on both sides.

pub mod e2store;
mod errors;
pub mod hot_cold_store;
#[cfg(feature = "leveldb")]
pub mod leveldb_store;
pub mod memory_store;
pub mod metadata;
mod metrics;

pub use self::hot_cold_store::{
    BlobSidecarListFromRoot, HotColdDB, Split, StoreConfig, cold_data_column_key,
    hot_data_column_key, slot_key,
};
#[cfg(feature = "leveldb")]
pub use self::leveldb_store::LevelDB;
pub use self::memory_store::MemoryStore;
pub use errors::Error;
pub use metadata::{AnchorInfo, BackfilledRanges, BlobInfo, CURRENT_SCHEMA_VERSION, SchemaVersion};
use std::sync::Arc;
use strum::{EnumIter, EnumString, IntoStaticStr};

pub type ColumnIter<'a, K> = Box<dyn Iterator<Item = Result<(K, Vec<u8>), Error>> + 'a>;
pub type ColumnKeyIter<'a, K> = Box<dyn Iterator<Item = Result<K, Error>> + 'a>;

/// An abstraction over the key-value backend.
///
/// Writes through `do_atomically` are atomic with respect to crashes; individual puts are not
/// ordered with respect to each other.
pub trait KeyValueStore: Sync + Send + Sized + 'static {
    /// Retrieve some bytes in `column` with `key`.
    fn get_bytes(&self, column: DBColumn, key: &[u8]) -> Result<Option<Vec<u8>>, Error>;

    /// Store some `value` in `column`, indexed with `key`.
    fn put_bytes(&self, column: DBColumn, key: &[u8], value: &[u8]) -> Result<(), Error>;

    /// Same as `put_bytes` but also force a flush to disk.
    fn put_bytes_sync(&self, column: DBColumn, key: &[u8], value: &[u8]) -> Result<(), Error>;

    /// Flush to disk. See
    /// https://chromium.googlesource.com/external/leveldb/+/HEAD/doc/index.md#synchronous-writes
    /// for details.
    fn sync(&self) -> Result<(), Error>;

    /// Return `true` if `key` exists in `column`.
    fn key_exists(&self, column: DBColumn, key: &[u8]) -> Result<bool, Error>;

    /// Removes `key` from `column`.
    fn key_delete(&self, column: DBColumn, key: &[u8]) -> Result<(), Error>;

    /// Execute either all of the operations in `batch` or none at all, returning an error.
    fn do_atomically(&self, batch: Vec<KeyValueStoreOp>) -> Result<(), Error>;

    /// Iterate through all keys and values in a particular column, from the given starting key
    /// (inclusive) while keys keep the `prefix`.
    fn iter_column_from(&self, column: DBColumn, from: &[u8], prefix: &[u8]) -> ColumnIter<'_, Vec<u8>>;

    /// Iterate through all keys and values in a particular column.
    fn iter_column(&self, column: DBColumn) -> ColumnIter<'_, Vec<u8>> {
        self.iter_column_from(column, &[], &[])
    }

    /// Iterate through all keys in a particular column.
    fn iter_column_keys(&self, column: DBColumn) -> ColumnKeyIter<'_, Vec<u8>>;

    /// Compact a single column, freeing space used by deleted keys.
    fn compact_column(&self, column: DBColumn) -> Result<(), Error>;

    /// Compact every column.
    fn compact(&self) -> Result<(), Error> {
        for column in all_columns() {
            self.compact_column(column)?;
        }
        Ok(())
    }
}

/// A unit of batched mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyValueStoreOp {
    PutKeyValue(DBColumn, Vec<u8>, Vec<u8>),
    DeleteKey(DBColumn, Vec<u8>),
}

/// The buckets of the database. Each id is a fixed-length ASCII prefix prepended to every key
/// in the bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, EnumIter, IntoStaticStr)]
pub enum DBColumn {
    /// Scalar metadata: schema version, split point, anchor, blob info, backfill ranges.
    #[strum(serialize = "bma")]
    BeaconMeta,
    /// Hot blocks, keyed by block root.
    #[strum(serialize = "blk")]
    BeaconBlock,
    /// Hot states, keyed by state root.
    #[strum(serialize = "ste")]
    BeaconState,
    /// Hot blob sidecar lists, keyed by block root.
    #[strum(serialize = "blb")]
    BeaconBlob,
    /// Hot data column sidecars, keyed by `block_root || column_index`.
    #[strum(serialize = "bdc")]
    BeaconDataColumn,
    /// Archived blocks, keyed by slot.
    #[strum(serialize = "bka")]
    BeaconBlockArchive,
    /// Block-root to archive-slot index.
    #[strum(serialize = "bbr")]
    BeaconBlockRoots,
    /// Archived states, keyed by slot.
    #[strum(serialize = "bsa")]
    BeaconStateArchive,
    /// State-root to archive-slot index.
    #[strum(serialize = "bsr")]
    BeaconStateRoots,
    /// Archived blob sidecar lists, keyed by slot.
    #[strum(serialize = "bba")]
    BeaconBlobArchive,
    /// Archived data column sidecars, keyed by `slot || column_index`.
    #[strum(serialize = "bca")]
    BeaconDataColumnArchive,
    /// Persisted fork choice.
    #[strum(serialize = "frk")]
    ForkChoice,
}

impl DBColumn {
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    pub fn as_bytes(self) -> &'static [u8] {
        self.as_str().as_bytes()
    }
}

fn all_columns() -> impl Iterator<Item = DBColumn> {
    use strum::IntoEnumIterator;
    DBColumn::iter()
}

/// Prepend the column prefix to `key`.
pub fn get_key_for_col(column: DBColumn, key: &[u8]) -> Vec<u8> {
    let mut result = column.as_bytes().to_vec();
    result.extend_from_slice(key);
    result
}

/// An item that may be stored in the database under a well-known key.
pub trait StoreItem: Sized {
    fn db_column() -> DBColumn;

    fn as_store_bytes(&self) -> Vec<u8>;

    fn from_store_bytes(bytes: &[u8]) -> Result<Self, Error>;
}

/// Convenience helpers over any `KeyValueStore` for typed items.
pub fn get_item<T: StoreItem, S: KeyValueStore>(
    store: &S,
    key: &[u8],
) -> Result<Option<T>, Error> {
    store
        .get_bytes(T::db_column(), key)?
        .map(|bytes| T::from_store_bytes(&bytes))
        .transpose()
}

pub fn put_item<T: StoreItem, S: KeyValueStore>(
    store: &S,
    key: &[u8],
    item: &T,
) -> Result<(), Error> {
    store.put_bytes(T::db_column(), key, &item.as_store_bytes())
}

/// A database wrapped in an `Arc`, as shared by all users of the store.
pub type BeaconStore<Hot, Cold> = Arc<HotColdDB<Hot, Cold>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_prefixes_are_three_bytes_and_unique() {
        let mut seen = std::collections::HashSet::new();
        for column in all_columns() {
            assert_eq!(column.as_bytes().len(), 3, "{column:?}");
            assert!(seen.insert(column.as_str()), "duplicate prefix {column:?}");
        }
    }

    #[test]
    fn key_for_col_prepends_prefix() {
        let key = get_key_for_col(DBColumn::BeaconBlock, &[1, 2, 3]);
        assert_eq!(&key[..3], b"blk");
        assert_eq!(&key[3..], &[1, 2, 3]);
    }
}
