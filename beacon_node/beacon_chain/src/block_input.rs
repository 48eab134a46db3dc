//! The unified handle for a block and its data-availability dependencies.
//!
//! A `BlockInput` is created when a block first arrives (from gossip, request/response or the
//! engine) and is completed as blobs or sampled columns trickle in from any source. Components
//! that need the block *available* await the input's one-shot resolution rather than polling
//! the sources.

use parking_lot::Mutex;
use proto_array::DataAvailabilityStatus;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use types::{
    BlobSidecar, BlobSidecarList, ColumnIndex, DataColumnSidecar, DataColumnSidecarList, Epoch,
    Hash256, SignedBeaconBlock, Slot,
};

/// Where a block or sidecar was obtained from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSource {
    Gossip,
    ReqResp,
    Engine,
    Reconstruction,
}

#[derive(Debug)]
pub enum BlockInputError {
    /// The sidecar belongs to a different block.
    BlockRootMismatch { expected: Hash256, actual: Hash256 },
    /// The blob index exceeds the block's commitment count.
    InvalidBlobIndex(u64),
    /// A column arrived for a pre-Fulu input (or a blob for a post-Fulu one).
    WrongDataKind,
}

/// Timed out waiting for the block to become available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvailabilityTimeout;

/// The fully-resolved data of an available block.
#[derive(Debug, Clone)]
pub enum AvailableData {
    /// The block predates data availability or carries no commitments.
    NoData,
    Blobs(BlobSidecarList),
    Columns(DataColumnSidecarList),
}

enum PendingData {
    Blobs {
        /// Index-aligned blob slots; `None` until the blob arrives.
        blobs: Vec<Option<Arc<BlobSidecar>>>,
    },
    Columns {
        columns: HashMap<ColumnIndex, Arc<DataColumnSidecar>>,
        /// The sampled subset that must be present for the block to be available.
        sampled_columns: Vec<ColumnIndex>,
    },
    Resolved(AvailableData),
}

impl PendingData {
    fn try_resolve(&mut self) -> Option<AvailableData> {
        let resolved = match self {
            PendingData::Blobs { blobs } => {
                if blobs.iter().all(|blob| blob.is_some()) {
                    AvailableData::Blobs(blobs.iter().flatten().cloned().collect())
                } else {
                    return None;
                }
            }
            PendingData::Columns {
                columns,
                sampled_columns,
            } => {
                if sampled_columns
                    .iter()
                    .all(|index| columns.contains_key(index))
                {
                    let mut list: DataColumnSidecarList = columns.values().cloned().collect();
                    list.sort_by_key(|column| column.index);
                    AvailableData::Columns(list)
                } else {
                    return None;
                }
            }
            PendingData::Resolved(data) => return Some(data.clone()),
        };
        *self = PendingData::Resolved(resolved.clone());
        Some(resolved)
    }

    fn resolved(&self) -> Option<AvailableData> {
        match self {
            PendingData::Resolved(data) => Some(data.clone()),
            _ => None,
        }
    }
}

enum Availability {
    /// Pre-Deneb block, or a block without commitments: no data needed.
    PreData,
    /// Outside the data-availability window: import proceeds without data.
    OutOfRangeData,
    /// Data required; resolves once all required parts have been added.
    Promise(Mutex<PendingData>),
}

/// A block plus the tracking of its availability dependencies.
pub struct BlockInput {
    block: Arc<SignedBeaconBlock>,
    block_root: Hash256,
    source: BlockSource,
    /// The serialized block, retained when it arrived over the wire so that persisting it
    /// does not re-serialize.
    block_bytes: Option<Vec<u8>>,
    availability: Availability,
    notify: Notify,
}

impl BlockInput {
    /// An input for a block that needs no sidecar data.
    pub fn pre_data(
        block: Arc<SignedBeaconBlock>,
        block_root: Hash256,
        source: BlockSource,
        block_bytes: Option<Vec<u8>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            block,
            block_root,
            source,
            block_bytes,
            availability: Availability::PreData,
            notify: Notify::new(),
        })
    }

    /// An input for a block outside the retention window: data is not required for import.
    pub fn out_of_range(
        block: Arc<SignedBeaconBlock>,
        block_root: Hash256,
        source: BlockSource,
        block_bytes: Option<Vec<u8>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            block,
            block_root,
            source,
            block_bytes,
            availability: Availability::OutOfRangeData,
            notify: Notify::new(),
        })
    }

    /// An input awaiting `expected_blobs` blob sidecars (pre-Fulu).
    pub fn with_blob_promise(
        block: Arc<SignedBeaconBlock>,
        block_root: Hash256,
        source: BlockSource,
        block_bytes: Option<Vec<u8>>,
    ) -> Arc<Self> {
        let expected_blobs = block.num_expected_blobs();
        let availability = if expected_blobs == 0 {
            Availability::PreData
        } else {
            Availability::Promise(Mutex::new(PendingData::Blobs {
                blobs: vec![None; expected_blobs],
            }))
        };
        Arc::new(Self {
            block,
            block_root,
            source,
            block_bytes,
            availability,
            notify: Notify::new(),
        })
    }

    /// An input awaiting the `sampled_columns` subset of data columns (post-Fulu).
    pub fn with_column_promise(
        block: Arc<SignedBeaconBlock>,
        block_root: Hash256,
        source: BlockSource,
        block_bytes: Option<Vec<u8>>,
        sampled_columns: Vec<ColumnIndex>,
    ) -> Arc<Self> {
        let availability = if block.num_expected_blobs() == 0 {
            Availability::PreData
        } else {
            Availability::Promise(Mutex::new(PendingData::Columns {
                columns: HashMap::new(),
                sampled_columns,
            }))
        };
        Arc::new(Self {
            block,
            block_root,
            source,
            block_bytes,
            availability,
            notify: Notify::new(),
        })
    }

    pub fn block(&self) -> &Arc<SignedBeaconBlock> {
        &self.block
    }

    pub fn block_root(&self) -> Hash256 {
        self.block_root
    }

    pub fn block_root_hex(&self) -> String {
        format!("{:?}", self.block_root)
    }

    pub fn slot(&self) -> Slot {
        self.block.slot()
    }

    pub fn epoch(&self) -> Epoch {
        self.block.epoch()
    }

    pub fn source(&self) -> BlockSource {
        self.source
    }

    pub fn block_bytes(&self) -> Option<&[u8]> {
        self.block_bytes.as_deref()
    }

    /// Whether this input tracks column sidecars (as opposed to blob sidecars or no data).
    pub fn expects_columns(&self) -> bool {
        match &self.availability {
            Availability::Promise(pending) => matches!(
                &*pending.lock(),
                PendingData::Columns { .. } | PendingData::Resolved(AvailableData::Columns(_))
            ),
            _ => false,
        }
    }

    /// The availability verdict recorded in the fork-choice node at import.
    pub fn data_availability_status(&self) -> DataAvailabilityStatus {
        match &self.availability {
            Availability::PreData => DataAvailabilityStatus::PreData,
            Availability::OutOfRangeData => DataAvailabilityStatus::OutOfRange,
            Availability::Promise(_) => DataAvailabilityStatus::Available,
        }
    }

    /// Add a blob received from any source. Completing the last missing blob resolves the
    /// promise and wakes all waiters.
    pub fn add_blob(&self, blob: Arc<BlobSidecar>) -> Result<(), BlockInputError> {
        if blob.block_root() != self.block_root {
            return Err(BlockInputError::BlockRootMismatch {
                expected: self.block_root,
                actual: blob.block_root(),
            });
        }
        let Availability::Promise(pending) = &self.availability else {
            // Data for a block that does not need it is simply ignored.
            return Ok(());
        };

        let resolved = {
            let mut pending = pending.lock();
            match &mut *pending {
                PendingData::Blobs { blobs } => {
                    let index = blob.index as usize;
                    let slot = blobs
                        .get_mut(index)
                        .ok_or(BlockInputError::InvalidBlobIndex(blob.index))?;
                    if slot.is_none() {
                        *slot = Some(blob);
                    }
                }
                PendingData::Columns { .. } => return Err(BlockInputError::WrongDataKind),
                PendingData::Resolved(_) => return Ok(()),
            }
            pending.try_resolve().is_some()
        };

        if resolved {
            self.notify.notify_waiters();
        }
        Ok(())
    }

    /// Add a sampled column received from any source.
    pub fn add_custody_column(
        &self,
        column: Arc<DataColumnSidecar>,
    ) -> Result<(), BlockInputError> {
        if column.block_root() != self.block_root {
            return Err(BlockInputError::BlockRootMismatch {
                expected: self.block_root,
                actual: column.block_root(),
            });
        }
        let Availability::Promise(pending) = &self.availability else {
            return Ok(());
        };

        let resolved = {
            let mut pending = pending.lock();
            match &mut *pending {
                PendingData::Columns { columns, .. } => {
                    columns.entry(column.index).or_insert(column);
                }
                PendingData::Blobs { .. } => return Err(BlockInputError::WrongDataKind),
                PendingData::Resolved(_) => return Ok(()),
            }
            pending.try_resolve().is_some()
        };

        if resolved {
            self.notify.notify_waiters();
        }
        Ok(())
    }

    /// The blob indices currently cached, or `None` for non-blob inputs.
    pub fn cached_blob_indices(&self) -> Option<Vec<u64>> {
        let Availability::Promise(pending) = &self.availability else {
            return None;
        };
        match &*pending.lock() {
            PendingData::Blobs { blobs } => Some(
                blobs
                    .iter()
                    .enumerate()
                    .filter(|(_, blob)| blob.is_some())
                    .map(|(index, _)| index as u64)
                    .collect(),
            ),
            PendingData::Resolved(AvailableData::Blobs(blobs)) => {
                Some(blobs.iter().map(|blob| blob.index).collect())
            }
            _ => None,
        }
    }

    /// The column indices currently cached, or `None` for non-column inputs.
    pub fn cached_column_indices(&self) -> Option<Vec<ColumnIndex>> {
        let Availability::Promise(pending) = &self.availability else {
            return None;
        };
        match &*pending.lock() {
            PendingData::Columns { columns, .. } => {
                let mut indices: Vec<ColumnIndex> = columns.keys().copied().collect();
                indices.sort_unstable();
                Some(indices)
            }
            PendingData::Resolved(AvailableData::Columns(columns)) => {
                Some(columns.iter().map(|column| column.index).collect())
            }
            _ => None,
        }
    }

    /// The cached columns themselves, for reconstruction.
    pub fn cached_columns(&self) -> DataColumnSidecarList {
        let Availability::Promise(pending) = &self.availability else {
            return vec![];
        };
        match &*pending.lock() {
            PendingData::Columns { columns, .. } => columns.values().cloned().collect(),
            PendingData::Resolved(AvailableData::Columns(columns)) => columns.clone(),
            _ => vec![],
        }
    }

    /// A sidecar to clone block metadata from, when building further columns without the
    /// block.
    pub fn any_cached_column(&self) -> Option<Arc<DataColumnSidecar>> {
        self.cached_columns().into_iter().next()
    }

    /// Returns the available data if the input has already resolved.
    pub fn available_data(&self) -> Option<AvailableData> {
        match &self.availability {
            Availability::PreData | Availability::OutOfRangeData => Some(AvailableData::NoData),
            Availability::Promise(pending) => pending.lock().resolved(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.available_data().is_some()
    }

    /// Wait for the input to resolve, up to `timeout`.
    ///
    /// The bound must be derived from slot timing by the caller; an elapsed timeout defers the
    /// block rather than marking it invalid.
    pub async fn await_available(
        &self,
        timeout: Duration,
    ) -> Result<AvailableData, AvailabilityTimeout> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register interest before checking, so a concurrent resolution cannot be missed.
            let notified = self.notify.notified();
            if let Some(data) = self.available_data() {
                return Ok(data);
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => return Err(AvailabilityTimeout),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bls::Signature;
    use ssz_types::VariableList;
    use types::{BeaconBlock, Blob, KzgCommitment, KzgProof};

    fn block_with_blobs(count: usize) -> (Arc<SignedBeaconBlock>, Hash256) {
        let mut block = BeaconBlock::empty();
        block.body.blob_kzg_commitments =
            VariableList::from(vec![KzgCommitment::empty(); count]);
        let signed = Arc::new(SignedBeaconBlock::from_block(block, Signature::empty()));
        let root = signed.canonical_root();
        (signed, root)
    }

    fn blob_for(block: &SignedBeaconBlock, index: usize) -> Arc<BlobSidecar> {
        Arc::new(
            BlobSidecar::new_with_existing_proof(
                index,
                Blob::default(),
                block,
                block.signed_block_header(),
                KzgProof::empty(),
            )
            .unwrap(),
        )
    }

    #[test]
    fn no_commitments_is_immediately_available() {
        let (block, root) = block_with_blobs(0);
        let input = BlockInput::with_blob_promise(block, root, BlockSource::Gossip, None);
        assert!(input.is_available());
        assert!(matches!(
            input.available_data().unwrap(),
            AvailableData::NoData
        ));
    }

    #[test]
    fn blob_promise_resolves_when_all_blobs_added() {
        let (block, root) = block_with_blobs(2);
        let input = BlockInput::with_blob_promise(block.clone(), root, BlockSource::Gossip, None);
        assert!(!input.is_available());

        input.add_blob(blob_for(&block, 0)).unwrap();
        assert!(!input.is_available());
        assert_eq!(input.cached_blob_indices().unwrap(), vec![0]);

        input.add_blob(blob_for(&block, 1)).unwrap();
        assert!(input.is_available());
        match input.available_data().unwrap() {
            AvailableData::Blobs(blobs) => assert_eq!(blobs.len(), 2),
            other => panic!("unexpected data: {other:?}"),
        }
    }

    #[test]
    fn mismatched_root_is_rejected() {
        let (block_a, root_a) = block_with_blobs(1);
        let (block_b, _) = {
            let mut block = BeaconBlock::empty();
            block.slot = Slot::new(1);
            block.body.blob_kzg_commitments = VariableList::from(vec![KzgCommitment::empty()]);
            let signed = Arc::new(SignedBeaconBlock::from_block(block, Signature::empty()));
            let root = signed.canonical_root();
            (signed, root)
        };
        let input = BlockInput::with_blob_promise(block_a, root_a, BlockSource::Gossip, None);
        assert!(matches!(
            input.add_blob(blob_for(&block_b, 0)),
            Err(BlockInputError::BlockRootMismatch { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn await_available_times_out() {
        let (block, root) = block_with_blobs(1);
        let input = BlockInput::with_blob_promise(block, root, BlockSource::Gossip, None);
        let result = input.await_available(Duration::from_secs(2)).await;
        assert_eq!(result.unwrap_err(), AvailabilityTimeout);
    }

    #[tokio::test]
    async fn await_available_wakes_on_resolution() {
        let (block, root) = block_with_blobs(1);
        let input = BlockInput::with_blob_promise(block.clone(), root, BlockSource::Gossip, None);

        let waiter = {
            let input = input.clone();
            tokio::spawn(async move { input.await_available(Duration::from_secs(30)).await })
        };

        // Give the waiter a chance to register.
        tokio::task::yield_now().await;
        input.add_blob(blob_for(&block, 0)).unwrap();

        let data = waiter.await.unwrap().unwrap();
        assert!(matches!(data, AvailableData::Blobs(_)));
    }

    #[test]
    fn column_promise_requires_only_sampled_subset() {
        use types::SignedBeaconBlockHeader;
        let (block, root) = block_with_blobs(1);
        let input = BlockInput::with_column_promise(
            block.clone(),
            root,
            BlockSource::Gossip,
            None,
            vec![1, 3],
        );
        assert!(!input.is_available());

        let (header, proof) = block
            .signed_block_header_and_kzg_commitments_proof()
            .unwrap();
        let column = |index: u64| {
            Arc::new(DataColumnSidecar {
                index,
                column: VariableList::from(vec![types::Cell::default()]),
                kzg_commitments: block.message().body.blob_kzg_commitments.clone(),
                kzg_proofs: VariableList::from(vec![KzgProof::empty()]),
                signed_block_header: SignedBeaconBlockHeader {
                    message: header.message,
                    signature: header.signature,
                },
                kzg_commitments_inclusion_proof: proof.clone(),
            })
        };

        input.add_custody_column(column(1)).unwrap();
        assert!(!input.is_available());
        // A non-sampled column is cached but does not resolve the promise.
        input.add_custody_column(column(7)).unwrap();
        assert!(!input.is_available());
        input.add_custody_column(column(3)).unwrap();
        assert!(input.is_available());

        match input.available_data().unwrap() {
            AvailableData::Columns(columns) => {
                let indices: Vec<u64> = columns.iter().map(|c| c.index).collect();
                assert_eq!(indices, vec![1, 3, 7]);
            }
            other => panic!("unexpected data: {other:?}"),
        }
    }
}
