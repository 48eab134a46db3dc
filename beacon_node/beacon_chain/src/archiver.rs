//! Finalization-driven migration of blocks, states and sidecars from the hot database to the
//! archive, plus pruning of data that has left the retention window.
//!
//! Finalization notifications are queued (FIFO, bounded) and processed one at a time; see
//! `BeaconChain::spawn_finalization_handler`.

use crate::errors::BeaconChainError;
use crate::events::{ChainEventHandler, EventKind};
use crate::regen::{Regen, StateOrBytes};
use crate::metrics;
use ssz::Encode;
use std::sync::Arc;
use store::{BlobSidecarListFromRoot, HotColdDB, KeyValueStore, KeyValueStoreOp, metadata::BlobInfo};
use tracing::{debug, info, warn};
use types::consts::SLOTS_PER_EPOCH;
use types::{Checkpoint, Epoch, Hash256, SignedBeaconBlock, Slot};

/// Persist a temporary state at least this often, even when the configured archive frequency
/// is longer, so that long replays are bounded between checkpoints.
pub const PERSIST_TEMP_STATE_EVERY_EPOCHS: u64 = 32;
pub const DEFAULT_ARCHIVE_STATE_EPOCH_FREQUENCY: u64 = 1024;
pub const DEFAULT_PROCESS_FINALIZED_CHECKPOINT_QUEUE_LENGTH: usize = 256;

/// The supported state-archival strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArchiveMode {
    /// Persist finalized states on a fixed epoch frequency, with temporary states in between.
    #[default]
    Frequency,
}

#[derive(Debug, Clone)]
pub struct ArchiverConfig {
    pub archive_mode: ArchiveMode,
    /// A full state is retained permanently every this many epochs.
    pub archive_state_epoch_frequency: u64,
    /// Retain archived blobs/columns for this many epochs past finality; `None` follows the
    /// spec minimum request window.
    pub archive_blob_epochs: Option<u64>,
    /// Delete archived blocks and sidecars beyond the retention window.
    pub prune_history: bool,
    /// Keep archived states queryable; turning this off allows pruning every temporary
    /// state once finality passes it.
    pub serve_historical_state: bool,
    /// Skip state archival entirely (checkpoint-sync nodes that do not serve history).
    pub disable_archive_on_checkpoint: bool,
    /// Length of the bounded finalization queue.
    pub queue_length: usize,
}

impl Default for ArchiverConfig {
    fn default() -> Self {
        Self {
            archive_mode: ArchiveMode::Frequency,
            archive_state_epoch_frequency: DEFAULT_ARCHIVE_STATE_EPOCH_FREQUENCY,
            archive_blob_epochs: None,
            prune_history: false,
            serve_historical_state: true,
            disable_archive_on_checkpoint: false,
            queue_length: DEFAULT_PROCESS_FINALIZED_CHECKPOINT_QUEUE_LENGTH,
        }
    }
}

pub struct Archiver<Hot: KeyValueStore, Cold: KeyValueStore> {
    store: Arc<HotColdDB<Hot, Cold>>,
    regen: Arc<Regen<Hot, Cold>>,
    events: Arc<ChainEventHandler>,
    config: ArchiverConfig,
}

impl<Hot: KeyValueStore, Cold: KeyValueStore> Archiver<Hot, Cold> {
    pub fn new(
        store: Arc<HotColdDB<Hot, Cold>>,
        regen: Arc<Regen<Hot, Cold>>,
        events: Arc<ChainEventHandler>,
        config: ArchiverConfig,
    ) -> Self {
        Self {
            store,
            regen,
            events,
            config,
        }
    }

    pub fn config(&self) -> &ArchiverConfig {
        &self.config
    }

    /// Process one finalized checkpoint: migrate finalized chain data to the archive, persist
    /// states per the frequency strategy and prune.
    pub fn process_finalized_checkpoint(
        &self,
        finalized: Checkpoint,
    ) -> Result<(), BeaconChainError> {
        let _timer = metrics::start_timer(&metrics::ARCHIVER_MIGRATION_TIMES);

        let finalized_slot = self.archive_blocks(finalized)?;

        if self.config.prune_history {
            self.prune_history(finalized)?;
        }

        if !self.config.disable_archive_on_checkpoint {
            self.maybe_archive_state(finalized)?;
        }

        // Record the contiguous range now available from the archive.
        let mut ranges = self.store.get_backfilled_ranges()?;
        ranges.add(self.store.get_split_slot(), finalized_slot);
        self.store.put_backfilled_ranges(&ranges)?;

        self.events
            .register(EventKind::FinalizedCheckpointProcessed(finalized));
        Ok(())
    }

    /// Walk ancestors from the finalized root down to the previous split point, moving each
    /// block and its sidecars into the archive and deleting the hot copies.
    ///
    /// Returns the finalized block's slot.
    fn archive_blocks(&self, finalized: Checkpoint) -> Result<Slot, BeaconChainError> {
        let split_slot = self.store.get_split_slot();

        // Collect the finalized chain, newest first.
        let mut chain: Vec<(Hash256, SignedBeaconBlock)> = Vec::new();
        let mut current_root = finalized.root;
        let finalized_slot = loop {
            let Some(block) = self.store.get_block(&current_root)? else {
                // Already migrated (e.g. a repeated notification for an old checkpoint).
                break chain
                    .last()
                    .map(|(_, block)| block.slot())
                    .unwrap_or(split_slot);
            };
            if block.slot() < split_slot {
                break block.slot();
            }
            let parent_root = block.parent_root();
            chain.push((current_root, block));
            current_root = parent_root;
        };

        if chain.is_empty() {
            debug!(?finalized, "No blocks to archive");
            return Ok(finalized_slot);
        }

        let finalized_block_slot = chain.first().map(|(_, b)| b.slot()).unwrap_or(split_slot);

        let mut cold_ops: Vec<KeyValueStoreOp> = Vec::new();
        let mut hot_ops: Vec<KeyValueStoreOp> = Vec::new();

        // Oldest first, so a crash mid-batch leaves a contiguous archive.
        for (block_root, block) in chain.iter().rev() {
            let slot = block.slot();
            self.store
                .cold_block_as_kv_store_ops(block_root, slot, block, &mut cold_ops);
            hot_ops.push(KeyValueStoreOp::DeleteKey(
                store::DBColumn::BeaconBlock,
                block_root.as_slice().to_vec(),
            ));

            // Sidecars move with their block.
            if let BlobSidecarListFromRoot::Blobs(blobs) = self.store.get_blobs(block_root)? {
                self.store.cold_blobs_as_kv_store_ops(slot, &blobs, &mut cold_ops);
            }
            hot_ops.push(KeyValueStoreOp::DeleteKey(
                store::DBColumn::BeaconBlob,
                block_root.as_slice().to_vec(),
            ));
            for column in self.store.get_data_columns(block_root)? {
                self.store
                    .cold_data_column_as_kv_store_op(slot, &column, &mut cold_ops);
                hot_ops.push(KeyValueStoreOp::DeleteKey(
                    store::DBColumn::BeaconDataColumn,
                    store::hot_data_column_key(*block_root, column.index),
                ));
            }
        }

        let blocks_archived = chain.len();
        // Cold writes land before hot deletes so a crash between the two batches never loses
        // data.
        self.store.cold_do_atomically(cold_ops)?;
        self.store.hot_do_atomically(hot_ops)?;
        self.store.set_split(finalized_block_slot, finalized.root)?;

        info!(
            blocks_archived,
            finalized_epoch = %finalized.epoch,
            split_slot = %finalized_block_slot,
            "Migrated finalized chain to the archive"
        );

        Ok(finalized_block_slot)
    }

    /// Delete archived sidecars that have left the retention window.
    fn prune_history(&self, finalized: Checkpoint) -> Result<(), BeaconChainError> {
        let retention_epochs = self.config.archive_blob_epochs.unwrap_or_else(|| {
            std::cmp::max(
                self.store.spec().min_epochs_for_blob_sidecars_requests,
                self.store
                    .spec()
                    .min_epochs_for_data_column_sidecars_requests,
            )
        });
        let Some(prune_before_epoch) = finalized.epoch.as_u64().checked_sub(retention_epochs)
        else {
            return Ok(());
        };
        let prune_before_slot = Epoch::new(prune_before_epoch).start_slot(SLOTS_PER_EPOCH);

        let oldest = self
            .store
            .get_blob_info()?
            .map(|info| info.oldest_blob_slot)
            .unwrap_or(Slot::new(0));
        if oldest >= prune_before_slot {
            return Ok(());
        }

        let mut ops = Vec::new();
        for slot in oldest.as_u64()..prune_before_slot.as_u64() {
            ops.push(KeyValueStoreOp::DeleteKey(
                store::DBColumn::BeaconBlobArchive,
                store::slot_key(Slot::new(slot)).to_vec(),
            ));
            for column in self.store.get_cold_data_columns(Slot::new(slot))? {
                ops.push(KeyValueStoreOp::DeleteKey(
                    store::DBColumn::BeaconDataColumnArchive,
                    store::cold_data_column_key(Slot::new(slot), column.index),
                ));
            }
        }
        self.store.cold_do_atomically(ops)?;
        self.store.put_blob_info(&BlobInfo {
            oldest_blob_slot: prune_before_slot,
        })?;
        self.store.compact()?;

        debug!(%prune_before_slot, "Pruned archived sidecars");
        Ok(())
    }

    /// The frequency strategy: persist a finalized state if enough epochs have passed since
    /// the last stored one, then delete the temporary states that are no longer needed as
    /// replay seeds.
    fn maybe_archive_state(&self, finalized: Checkpoint) -> Result<(), BeaconChainError> {
        let stored_slots = self.store.iter_cold_state_slots()?;
        let last_stored_epoch = stored_slots
            .iter()
            .max()
            .map(|slot| slot.epoch(SLOTS_PER_EPOCH))
            .unwrap_or(Epoch::new(0));

        let frequency = std::cmp::min(
            PERSIST_TEMP_STATE_EVERY_EPOCHS,
            self.config.archive_state_epoch_frequency,
        );
        if finalized.epoch.saturating_sub(last_stored_epoch).as_u64() < frequency {
            return Ok(());
        }

        // Persist the finalized state, avoiding a decode/encode cycle when the serialized
        // form is already on disk.
        match self.regen.get_checkpoint_state_or_bytes(&finalized)? {
            Some(StateOrBytes::State(state)) => {
                let state_root = state.canonical_root();
                self.store.put_cold_state_bytes(
                    &state_root,
                    state.slot,
                    &state.as_ssz_bytes(),
                )?;
                debug!(slot = %state.slot, "Archived finalized state");
            }
            Some(StateOrBytes::Bytes(bytes)) => {
                let slot = finalized.epoch.start_slot(SLOTS_PER_EPOCH);
                // The state root secondary index requires decoding only the root; re-use the
                // checkpoint root's block to avoid a full decode.
                let state_root = self
                    .store
                    .get_block(&finalized.root)?
                    .or(self.store.get_cold_block_by_root(&finalized.root)?)
                    .map(|block| block.state_root())
                    .unwrap_or_default();
                self.store.put_cold_state_bytes(&state_root, slot, &bytes)?;
                debug!(%slot, "Archived finalized state from bytes");
            }
            None => {
                warn!(?finalized, "Finalized state unavailable for archival");
                return Ok(());
            }
        }

        self.prune_temporary_states(finalized)
    }

    /// Group the stored state slots by archive interval and keep only the first in each
    /// group; the rest were temporary replay seeds.
    fn prune_temporary_states(&self, finalized: Checkpoint) -> Result<(), BeaconChainError> {
        let interval_slots = self.config.archive_state_epoch_frequency * SLOTS_PER_EPOCH;
        let finalized_slot = finalized.epoch.start_slot(SLOTS_PER_EPOCH);

        let mut stored_slots = self.store.iter_cold_state_slots()?;
        stored_slots.sort();

        let mut kept_group: Option<u64> = None;
        let mut deleted = 0usize;
        for slot in stored_slots {
            // States at or beyond finalization stay; they may still be the latest checkpoint.
            if slot >= finalized_slot {
                continue;
            }
            if !self.config.serve_historical_state {
                // Nothing serves historical queries, so every pre-finality state was only a
                // replay seed.
                self.store.delete_cold_state_at_slot(slot)?;
                deleted += 1;
                continue;
            }
            let group = slot.as_u64() / interval_slots;
            if kept_group == Some(group) {
                self.store.delete_cold_state_at_slot(slot)?;
                deleted += 1;
            } else {
                kept_group = Some(group);
            }
        }

        if deleted > 0 {
            debug!(deleted, "Pruned temporary archived states");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_cache::StateCache;
    use store::{MemoryStore, StoreConfig};
    use types::ChainSpec;

    fn archiver(frequency: u64) -> Archiver<MemoryStore, MemoryStore> {
        let store = HotColdDB::open(
            MemoryStore::open(),
            MemoryStore::open(),
            StoreConfig::default(),
            Arc::new(ChainSpec::mainnet()),
        )
        .unwrap();
        let regen = Arc::new(Regen::new(store.clone(), Arc::new(StateCache::default())));
        Archiver::new(
            store,
            regen,
            Arc::new(ChainEventHandler::default()),
            ArchiverConfig {
                archive_state_epoch_frequency: frequency,
                ..ArchiverConfig::default()
            },
        )
    }

    fn put_state_at_epoch(archiver: &Archiver<MemoryStore, MemoryStore>, epoch: u64) {
        let slot = Epoch::new(epoch).start_slot(SLOTS_PER_EPOCH);
        archiver
            .store
            .put_cold_state_bytes(&Hash256::default(), slot, &[0xaa])
            .unwrap();
    }

    #[test]
    fn frequency_pruning_keeps_first_state_per_interval() {
        // archive_state_epoch_frequency = 32: interval is 32 epochs of slots.
        let archiver = archiver(32);
        // Stored states at epochs 64..=96 (temp states every 8 epochs) plus the new one at
        // 100.
        for epoch in [64, 72, 80, 88, 96, 100] {
            put_state_at_epoch(&archiver, epoch);
        }

        archiver
            .prune_temporary_states(Checkpoint {
                epoch: Epoch::new(100),
                root: Hash256::default(),
            })
            .unwrap();

        let remaining: Vec<u64> = archiver
            .store
            .iter_cold_state_slots()
            .unwrap()
            .into_iter()
            .map(|slot| slot.epoch(SLOTS_PER_EPOCH).as_u64())
            .collect();

        // Group 2 is epochs [64, 96): its first stored state (64) is kept, the rest deleted.
        // Group 3 starts at epoch 96; 96 is kept. 100 is beyond finalization - 0... kept.
        assert_eq!(remaining, vec![64, 96, 100]);
    }

    #[test]
    fn no_archive_before_frequency_elapses() {
        let archiver = archiver(1024);
        put_state_at_epoch(&archiver, 64);

        // min(32, 1024) = 32 epochs required; 80 - 64 = 16 has not elapsed.
        archiver
            .maybe_archive_state(Checkpoint {
                epoch: Epoch::new(80),
                root: Hash256::default(),
            })
            .unwrap();
        assert_eq!(archiver.store.iter_cold_state_slots().unwrap().len(), 1);
    }
}
