use crate::metadata::{
    ANCHOR_INFO_KEY, AnchorInfo, BACKFILLED_RANGES_KEY, BLOB_INFO_KEY, BackfilledRanges, BlobInfo,
    CURRENT_SCHEMA_VERSION, SCHEMA_VERSION_KEY, SPLIT_KEY, SchemaVersion,
};
use crate::{
    DBColumn, Error, KeyValueStore, KeyValueStoreOp, StoreItem, get_item, put_item,
};
use parking_lot::RwLock;
use ssz::{Decode, Encode};
use ssz_derive::{Decode, Encode};
use std::sync::Arc;
use tracing::{debug, info};
use types::{
    BeaconState, BlobSidecarList, ChainSpec, ColumnIndex, DataColumnSidecar,
    DataColumnSidecarList, Hash256, SignedBeaconBlock, Slot,
};

/// The split point between the hot and cold databases: everything at a slot strictly less than
/// `split.slot` lives in the cold (archive) database.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct Split {
    pub slot: Slot,
    pub block_root: Hash256,
}

impl StoreItem for Split {
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

/// The result of fetching blobs by block root: distinguishes "no blobs stored for this root"
/// from "this root has an empty blob list".
#[derive(Debug, Clone, PartialEq)]
pub enum BlobSidecarListFromRoot {
    /// Sidecars for the block exist in the database.
    Blobs(BlobSidecarList),
    /// The block is known and has no blobs.
    NoBlobs,
    /// The block root is unknown to the blob bucket.
    NoRoot,
}

impl BlobSidecarListFromRoot {
    pub fn blobs(self) -> Option<BlobSidecarList> {
        match self {
            Self::Blobs(blobs) => Some(blobs),
            Self::NoBlobs | Self::NoRoot => None,
        }
    }
}

/// Encode a slot as a fixed-width big-endian key.
pub fn slot_key(slot: Slot) -> [u8; 8] {
    slot.as_u64().to_be_bytes()
}

/// Encode a hot data-column key: `block_root || column_index`.
///
/// The column index width must cover `NUMBER_OF_COLUMNS - 1` and be identical for writer and
/// reader; a full big-endian `u64` keeps it aligned with the slot keys.
pub fn hot_data_column_key(block_root: Hash256, column_index: ColumnIndex) -> Vec<u8> {
    let mut key = Vec::with_capacity(40);
    key.extend_from_slice(block_root.as_slice());
    key.extend_from_slice(&column_index.to_be_bytes());
    key
}

/// Encode an archive data-column key: `slot || column_index`.
pub fn cold_data_column_key(slot: Slot, column_index: ColumnIndex) -> Vec<u8> {
    let mut key = Vec::with_capacity(16);
    key.extend_from_slice(&slot_key(slot));
    key.extend_from_slice(&column_index.to_be_bytes());
    key
}

fn parse_column_subkey(subkey: &[u8], prefix_len: usize) -> Result<ColumnIndex, Error> {
    let index_bytes: [u8; 8] = subkey
        .get(prefix_len..prefix_len + 8)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(Error::InvalidKey)?;
    Ok(ColumnIndex::from_be_bytes(index_bytes))
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    /// Whether to delete archived history beyond the data-availability window.
    pub prune_history: bool,
    /// Whether to compact the database on finalization migrations.
    pub compact_on_prune: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            prune_history: false,
            compact_on_prune: true,
        }
    }
}

/// The on-disk database for the beacon node, split into hot (recent, by-root) and cold
/// (finalized, by-slot) halves.
pub struct HotColdDB<Hot, Cold> {
    pub hot_db: Hot,
    pub cold_db: Cold,
    split: RwLock<Split>,
    config: StoreConfig,
    spec: Arc<ChainSpec>,
}

impl<Hot: KeyValueStore, Cold: KeyValueStore> HotColdDB<Hot, Cold> {
    pub fn open(
        hot_db: Hot,
        cold_db: Cold,
        config: StoreConfig,
        spec: Arc<ChainSpec>,
    ) -> Result<Arc<Self>, Error> {
        let db = Self {
            hot_db,
            cold_db,
            split: RwLock::new(Split::default()),
            config,
            spec,
        };

        match get_item::<SchemaVersion, _>(&db.hot_db, SCHEMA_VERSION_KEY)? {
            Some(disk_version) if disk_version != CURRENT_SCHEMA_VERSION => {
                return Err(Error::UnsupportedSchemaVersion {
                    software_version: CURRENT_SCHEMA_VERSION.0,
                    disk_version: disk_version.0,
                });
            }
            Some(_) => (),
            None => {
                put_item(&db.hot_db, SCHEMA_VERSION_KEY, &CURRENT_SCHEMA_VERSION)?;
            }
        }

        if let Some(split) = get_item::<Split, _>(&db.hot_db, SPLIT_KEY)? {
            *db.split.write() = split;
        }

        info!(
            split_slot = %db.split.read().slot,
            schema_version = CURRENT_SCHEMA_VERSION.0,
            "Opened beacon database"
        );

        Ok(Arc::new(db))
    }

    pub fn spec(&self) -> &ChainSpec {
        &self.spec
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /*
     * Split management
     */

    pub fn get_split(&self) -> Split {
        *self.split.read()
    }

    pub fn get_split_slot(&self) -> Slot {
        self.split.read().slot
    }

    /// Move the split point forward. The caller is responsible for having already migrated all
    /// data below the new split into the cold database.
    pub fn set_split(&self, slot: Slot, block_root: Hash256) -> Result<(), Error> {
        let mut split = self.split.write();
        if slot < split.slot {
            return Err(Error::SplitPointModified(slot, split.slot));
        }
        let new_split = Split { slot, block_root };
        put_item(&self.hot_db, SPLIT_KEY, &new_split)?;
        *split = new_split;
        Ok(())
    }

    /*
     * Hot blocks
     */

    pub fn block_as_kv_store_ops(
        &self,
        block_root: &Hash256,
        block: &SignedBeaconBlock,
        ops: &mut Vec<KeyValueStoreOp>,
    ) {
        ops.push(KeyValueStoreOp::PutKeyValue(
            DBColumn::BeaconBlock,
            block_root.as_slice().to_vec(),
            block.as_ssz_bytes(),
        ));
    }

    pub fn put_block(&self, block_root: &Hash256, block: &SignedBeaconBlock) -> Result<(), Error> {
        self.hot_db.put_bytes(
            DBColumn::BeaconBlock,
            block_root.as_slice(),
            &block.as_ssz_bytes(),
        )
    }

    pub fn get_block(&self, block_root: &Hash256) -> Result<Option<SignedBeaconBlock>, Error> {
        self.hot_db
            .get_bytes(DBColumn::BeaconBlock, block_root.as_slice())?
            .map(|bytes| SignedBeaconBlock::from_ssz_bytes(&bytes).map_err(Into::into))
            .transpose()
    }

    pub fn block_exists(&self, block_root: &Hash256) -> Result<bool, Error> {
        self.hot_db
            .key_exists(DBColumn::BeaconBlock, block_root.as_slice())
    }

    pub fn delete_block(&self, block_root: &Hash256) -> Result<(), Error> {
        self.hot_db
            .key_delete(DBColumn::BeaconBlock, block_root.as_slice())
    }

    /*
     * Hot states
     */

    pub fn put_state(&self, state_root: &Hash256, state: &BeaconState) -> Result<(), Error> {
        self.hot_db.put_bytes(
            DBColumn::BeaconState,
            state_root.as_slice(),
            &state.as_ssz_bytes(),
        )
    }

    pub fn get_state(&self, state_root: &Hash256) -> Result<Option<BeaconState>, Error> {
        self.get_state_bytes(state_root)?
            .map(|bytes| BeaconState::from_ssz_bytes(&bytes).map_err(Into::into))
            .transpose()
    }

    /// Fetch the serialized state without deserializing, for callers that will immediately
    /// re-serialize (e.g. archival and the HTTP API).
    pub fn get_state_bytes(&self, state_root: &Hash256) -> Result<Option<Vec<u8>>, Error> {
        self.hot_db
            .get_bytes(DBColumn::BeaconState, state_root.as_slice())
    }

    pub fn delete_state(&self, state_root: &Hash256) -> Result<(), Error> {
        self.hot_db
            .key_delete(DBColumn::BeaconState, state_root.as_slice())
    }

    /*
     * Hot blob sidecars
     */

    pub fn blobs_as_kv_store_ops(
        &self,
        block_root: &Hash256,
        blobs: &BlobSidecarList,
        ops: &mut Vec<KeyValueStoreOp>,
    ) {
        ops.push(KeyValueStoreOp::PutKeyValue(
            DBColumn::BeaconBlob,
            block_root.as_slice().to_vec(),
            blobs.as_ssz_bytes(),
        ));
    }

    pub fn put_blobs(&self, block_root: &Hash256, blobs: &BlobSidecarList) -> Result<(), Error> {
        let mut ops = Vec::with_capacity(1);
        self.blobs_as_kv_store_ops(block_root, blobs, &mut ops);
        self.hot_db.do_atomically(ops)
    }

    pub fn get_blobs(&self, block_root: &Hash256) -> Result<BlobSidecarListFromRoot, Error> {
        match self
            .hot_db
            .get_bytes(DBColumn::BeaconBlob, block_root.as_slice())?
        {
            Some(bytes) => {
                let blobs: BlobSidecarList = Vec::from_ssz_bytes(&bytes)?;
                if blobs.is_empty() {
                    Ok(BlobSidecarListFromRoot::NoBlobs)
                } else {
                    Ok(BlobSidecarListFromRoot::Blobs(blobs))
                }
            }
            None => Ok(BlobSidecarListFromRoot::NoRoot),
        }
    }

    pub fn delete_blobs(&self, block_root: &Hash256) -> Result<(), Error> {
        self.hot_db
            .key_delete(DBColumn::BeaconBlob, block_root.as_slice())
    }

    /*
     * Hot data column sidecars
     */

    pub fn data_column_as_kv_store_op(
        &self,
        block_root: &Hash256,
        data_column: &DataColumnSidecar,
        ops: &mut Vec<KeyValueStoreOp>,
    ) {
        ops.push(KeyValueStoreOp::PutKeyValue(
            DBColumn::BeaconDataColumn,
            hot_data_column_key(*block_root, data_column.index),
            data_column.as_ssz_bytes(),
        ));
    }

    pub fn put_data_column(
        &self,
        block_root: &Hash256,
        data_column: &DataColumnSidecar,
    ) -> Result<(), Error> {
        self.hot_db.put_bytes(
            DBColumn::BeaconDataColumn,
            &hot_data_column_key(*block_root, data_column.index),
            &data_column.as_ssz_bytes(),
        )
    }

    pub fn get_data_column(
        &self,
        block_root: &Hash256,
        column_index: ColumnIndex,
    ) -> Result<Option<Arc<DataColumnSidecar>>, Error> {
        self.hot_db
            .get_bytes(
                DBColumn::BeaconDataColumn,
                &hot_data_column_key(*block_root, column_index),
            )?
            .map(|bytes| {
                DataColumnSidecar::from_ssz_bytes(&bytes)
                    .map(Arc::new)
                    .map_err(Into::into)
            })
            .transpose()
    }

    /// Range-scan all stored columns of a block: keys in
    /// `[block_root || 0, block_root || u64::MAX]` inclusive.
    pub fn get_data_columns(&self, block_root: &Hash256) -> Result<DataColumnSidecarList, Error> {
        self.hot_db
            .iter_column_from(
                DBColumn::BeaconDataColumn,
                &hot_data_column_key(*block_root, 0),
                block_root.as_slice(),
            )
            .map(|result| {
                let (_key, bytes) = result?;
                Ok(Arc::new(DataColumnSidecar::from_ssz_bytes(&bytes)?))
            })
            .collect()
    }

    /// The indices of all stored columns of a block, without decoding the sidecars.
    pub fn get_data_column_indices(&self, block_root: &Hash256) -> Result<Vec<ColumnIndex>, Error> {
        self.hot_db
            .iter_column_from(
                DBColumn::BeaconDataColumn,
                &hot_data_column_key(*block_root, 0),
                block_root.as_slice(),
            )
            .map(|result| {
                let (key, _bytes) = result?;
                parse_column_subkey(&key, 32)
            })
            .collect()
    }

    pub fn delete_data_column(
        &self,
        block_root: &Hash256,
        column_index: ColumnIndex,
    ) -> Result<(), Error> {
        self.hot_db.key_delete(
            DBColumn::BeaconDataColumn,
            &hot_data_column_key(*block_root, column_index),
        )
    }

    /*
     * Cold (archive) blocks
     */

    pub fn cold_block_as_kv_store_ops(
        &self,
        block_root: &Hash256,
        slot: Slot,
        block: &SignedBeaconBlock,
        ops: &mut Vec<KeyValueStoreOp>,
    ) {
        ops.push(KeyValueStoreOp::PutKeyValue(
            DBColumn::BeaconBlockArchive,
            slot_key(slot).to_vec(),
            block.as_ssz_bytes(),
        ));
        ops.push(KeyValueStoreOp::PutKeyValue(
            DBColumn::BeaconBlockRoots,
            block_root.as_slice().to_vec(),
            slot_key(slot).to_vec(),
        ));
    }

    pub fn get_cold_block_by_slot(&self, slot: Slot) -> Result<Option<SignedBeaconBlock>, Error> {
        self.cold_db
            .get_bytes(DBColumn::BeaconBlockArchive, &slot_key(slot))?
            .map(|bytes| SignedBeaconBlock::from_ssz_bytes(&bytes).map_err(Into::into))
            .transpose()
    }

    pub fn get_cold_block_by_root(
        &self,
        block_root: &Hash256,
    ) -> Result<Option<SignedBeaconBlock>, Error> {
        let Some(slot_bytes) = self
            .cold_db
            .get_bytes(DBColumn::BeaconBlockRoots, block_root.as_slice())?
        else {
            return Ok(None);
        };
        let slot_bytes: [u8; 8] = slot_bytes.as_slice().try_into().map_err(|_| {
            Error::CorruptDb("invalid slot bytes in block root index".to_string())
        })?;
        self.get_cold_block_by_slot(Slot::new(u64::from_be_bytes(slot_bytes)))
    }

    /*
     * Cold (archive) states
     */

    pub fn put_cold_state_bytes(
        &self,
        state_root: &Hash256,
        slot: Slot,
        state_bytes: &[u8],
    ) -> Result<(), Error> {
        self.cold_db.do_atomically(vec![
            KeyValueStoreOp::PutKeyValue(
                DBColumn::BeaconStateArchive,
                slot_key(slot).to_vec(),
                state_bytes.to_vec(),
            ),
            KeyValueStoreOp::PutKeyValue(
                DBColumn::BeaconStateRoots,
                state_root.as_slice().to_vec(),
                slot_key(slot).to_vec(),
            ),
        ])
    }

    pub fn get_cold_state_by_slot(&self, slot: Slot) -> Result<Option<BeaconState>, Error> {
        self.cold_db
            .get_bytes(DBColumn::BeaconStateArchive, &slot_key(slot))?
            .map(|bytes| BeaconState::from_ssz_bytes(&bytes).map_err(Into::into))
            .transpose()
    }

    pub fn delete_cold_state_at_slot(&self, slot: Slot) -> Result<(), Error> {
        self.cold_db
            .key_delete(DBColumn::BeaconStateArchive, &slot_key(slot))
    }

    /// Iterate the slots of every archived state, ascending. Used by the frequency-based
    /// archiver to group and prune temporary checkpoint states.
    pub fn iter_cold_state_slots(&self) -> Result<Vec<Slot>, Error> {
        self.cold_db
            .iter_column_keys(DBColumn::BeaconStateArchive)
            .map(|result| {
                let key = result?;
                let bytes: [u8; 8] = key
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::InvalidKey)?;
                Ok(Slot::new(u64::from_be_bytes(bytes)))
            })
            .collect()
    }

    /*
     * Cold (archive) sidecars
     */

    pub fn cold_blobs_as_kv_store_ops(
        &self,
        slot: Slot,
        blobs: &BlobSidecarList,
        ops: &mut Vec<KeyValueStoreOp>,
    ) {
        ops.push(KeyValueStoreOp::PutKeyValue(
            DBColumn::BeaconBlobArchive,
            slot_key(slot).to_vec(),
            blobs.as_ssz_bytes(),
        ));
    }

    pub fn get_cold_blobs(&self, slot: Slot) -> Result<Option<BlobSidecarList>, Error> {
        self.cold_db
            .get_bytes(DBColumn::BeaconBlobArchive, &slot_key(slot))?
            .map(|bytes| Vec::from_ssz_bytes(&bytes).map_err(Into::into))
            .transpose()
    }

    pub fn cold_data_column_as_kv_store_op(
        &self,
        slot: Slot,
        data_column: &DataColumnSidecar,
        ops: &mut Vec<KeyValueStoreOp>,
    ) {
        ops.push(KeyValueStoreOp::PutKeyValue(
            DBColumn::BeaconDataColumnArchive,
            cold_data_column_key(slot, data_column.index),
            data_column.as_ssz_bytes(),
        ));
    }

    pub fn get_cold_data_columns(&self, slot: Slot) -> Result<DataColumnSidecarList, Error> {
        self.cold_db
            .iter_column_from(
                DBColumn::BeaconDataColumnArchive,
                &cold_data_column_key(slot, 0),
                &slot_key(slot),
            )
            .map(|result| {
                let (_key, bytes) = result?;
                Ok(Arc::new(DataColumnSidecar::from_ssz_bytes(&bytes)?))
            })
            .collect()
    }

    /*
     * Metadata
     */

    pub fn get_anchor_info(&self) -> Result<Option<AnchorInfo>, Error> {
        get_item(&self.hot_db, ANCHOR_INFO_KEY)
    }

    pub fn put_anchor_info(&self, anchor: &AnchorInfo) -> Result<(), Error> {
        put_item(&self.hot_db, ANCHOR_INFO_KEY, anchor)
    }

    pub fn get_blob_info(&self) -> Result<Option<BlobInfo>, Error> {
        get_item(&self.hot_db, BLOB_INFO_KEY)
    }

    pub fn put_blob_info(&self, blob_info: &BlobInfo) -> Result<(), Error> {
        put_item(&self.hot_db, BLOB_INFO_KEY, blob_info)
    }

    pub fn get_backfilled_ranges(&self) -> Result<BackfilledRanges, Error> {
        Ok(get_item(&self.hot_db, BACKFILLED_RANGES_KEY)?.unwrap_or_default())
    }

    pub fn put_backfilled_ranges(&self, ranges: &BackfilledRanges) -> Result<(), Error> {
        put_item(&self.hot_db, BACKFILLED_RANGES_KEY, ranges)
    }

    /// Execute a batch on the hot database.
    pub fn hot_do_atomically(&self, ops: Vec<KeyValueStoreOp>) -> Result<(), Error> {
        self.hot_db.do_atomically(ops)
    }

    /// Execute a batch on the cold database.
    pub fn cold_do_atomically(&self, ops: Vec<KeyValueStoreOp>) -> Result<(), Error> {
        self.cold_db.do_atomically(ops)
    }

    /// Compact both databases after a large prune.
    pub fn compact(&self) -> Result<(), Error> {
        if self.config.compact_on_prune {
            debug!("Compacting database");
            self.hot_db.compact()?;
            self.cold_db.compact()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use bls::Signature;
    use types::{BeaconBlock, FixedBytesExtended};

    fn test_db() -> Arc<HotColdDB<MemoryStore, MemoryStore>> {
        HotColdDB::open(
            MemoryStore::open(),
            MemoryStore::open(),
            StoreConfig::default(),
            Arc::new(ChainSpec::mainnet()),
        )
        .unwrap()
    }

    fn test_block(slot: u64) -> SignedBeaconBlock {
        let mut block = BeaconBlock::empty();
        block.slot = Slot::new(slot);
        SignedBeaconBlock::from_block(block, Signature::empty())
    }

    #[test]
    fn hot_block_round_trip() {
        let db = test_db();
        let block = test_block(3);
        let root = block.canonical_root();

        db.put_block(&root, &block).unwrap();
        assert_eq!(db.get_block(&root).unwrap().unwrap(), block);
        assert!(db.block_exists(&root).unwrap());

        db.delete_block(&root).unwrap();
        assert_eq!(db.get_block(&root).unwrap(), None);
    }

    #[test]
    fn cold_block_by_slot_and_root() {
        let db = test_db();
        let block = test_block(7);
        let root = block.canonical_root();

        let mut ops = vec![];
        db.cold_block_as_kv_store_ops(&root, block.slot(), &block, &mut ops);
        db.cold_do_atomically(ops).unwrap();

        assert_eq!(
            db.get_cold_block_by_slot(Slot::new(7)).unwrap().unwrap(),
            block
        );
        assert_eq!(db.get_cold_block_by_root(&root).unwrap().unwrap(), block);
        assert_eq!(db.get_cold_block_by_slot(Slot::new(8)).unwrap(), None);
    }

    #[test]
    fn data_column_composite_keys_round_trip() {
        use ssz_types::VariableList;
        let db = test_db();
        let block_root = Hash256::from_low_u64_be(11);
        let other_root = Hash256::from_low_u64_be(12);

        let mut header = types::BeaconBlockHeader::empty();
        header.slot = Slot::new(4);
        let sidecar = |index: u64| DataColumnSidecar {
            index,
            column: VariableList::empty(),
            kzg_commitments: VariableList::empty(),
            kzg_proofs: VariableList::empty(),
            signed_block_header: types::SignedBeaconBlockHeader {
                message: header,
                signature: Signature::empty(),
            },
            kzg_commitments_inclusion_proof: Default::default(),
        };

        for index in [0, 5, 127] {
            db.put_data_column(&block_root, &sidecar(index)).unwrap();
        }
        // A column for a different root must not appear in the scan.
        db.put_data_column(&other_root, &sidecar(1)).unwrap();

        let indices = db.get_data_column_indices(&block_root).unwrap();
        assert_eq!(indices, vec![0, 5, 127]);

        let columns = db.get_data_columns(&block_root).unwrap();
        assert_eq!(columns.len(), 3);
        assert_eq!(
            db.get_data_column(&block_root, 5).unwrap().unwrap().index,
            5
        );
        assert_eq!(db.get_data_column(&block_root, 6).unwrap(), None);
    }

    #[test]
    fn split_moves_forward_only() {
        let db = test_db();
        db.set_split(Slot::new(64), Hash256::from_low_u64_be(1))
            .unwrap();
        assert_eq!(db.get_split_slot(), Slot::new(64));
        assert!(matches!(
            db.set_split(Slot::new(32), Hash256::from_low_u64_be(2)),
            Err(Error::SplitPointModified(_, _))
        ));
    }

    #[test]
    fn blob_list_round_trip_distinguishes_empty_from_missing() {
        let db = test_db();
        let root = Hash256::from_low_u64_be(21);
        assert_eq!(db.get_blobs(&root).unwrap(), BlobSidecarListFromRoot::NoRoot);

        db.put_blobs(&root, &vec![]).unwrap();
        assert_eq!(
            db.get_blobs(&root).unwrap(),
            BlobSidecarListFromRoot::NoBlobs
        );
    }
}
