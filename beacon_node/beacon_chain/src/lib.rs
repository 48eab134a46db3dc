//! The core consensus engine: block verification and import, fork choice orchestration, data
//! availability tracking and finalization-driven archival.

mod beacon_chain;
pub mod archiver;
pub mod beacon_fork_choice_store;
pub mod block_input;
pub mod block_verification;
pub mod column_reconstruction;
mod errors;
pub mod events;
pub mod get_blobs_tracker;
pub mod kzg_utils;
mod metrics;
pub mod regen;
pub mod state_cache;

pub use crate::beacon_chain::{
    BeaconChain, BeaconChainTypes, BeaconForkChoice, BeaconStore, CachedHead,
};
pub use crate::block_input::{
    AvailabilityTimeout, AvailableData, BlockInput, BlockInputError, BlockSource,
};
pub use crate::block_verification::{SegmentVerificationResult, VerifyBlockOpts};
pub use crate::column_reconstruction::{
    ColumnReconstructionTracker, RECONSTRUCTION_DELAY_MAX_BPS, RECONSTRUCTION_DELAY_MIN_BPS,
    ReconstructionOutcome,
};
pub use crate::errors::{BeaconChainError, BlockError};
pub use crate::events::{ChainEventHandler, EventKind};
pub use crate::get_blobs_tracker::{GetBlobsOutcome, GetBlobsTracker};
pub use fork_choice::{ExecutionStatus, InvalidationOperation, PayloadVerificationStatus};

#[cfg(test)]
mod tests;
