use types::{Hash256, Slot};

/// Reasons a block (or a segment of blocks) failed verification or import.
///
/// Each variant corresponds to a stable error code surfaced to operators and counted in the
/// per-kind metrics; none of them is fatal to the node.
#[derive(Debug)]
pub enum BlockError {
    /// The pre-state of the segment could not be regenerated.
    PreStateMissing(Hash256),
    /// The bulk signature verification over the segment failed.
    InvalidSignature,
    /// The state transition rejected a block.
    InvalidStateTransition(state_processing::BlockProcessingError),
    /// The execution engine reported the payload invalid.
    ExecutionPayloadInvalid {
        block_root: Hash256,
        latest_valid_hash: Option<types::ExecutionBlockHash>,
    },
    /// The block's blobs or sampled columns did not become available in time.
    BlobUnavailable(Hash256),
    /// The block's parent is not known to fork choice.
    ParentUnknown(Hash256),
    /// The block is already imported.
    AlreadyKnown(Hash256),
    /// The block conflicts with finality.
    WouldRevertFinalizedSlot {
        block_slot: Slot,
        finalized_slot: Slot,
    },
    /// The block's slot is beyond the clock plus gossip disparity.
    FutureSlot {
        current_slot: Slot,
        block_slot: Slot,
    },
    /// A retryable failure of the engine.
    EngineUnavailable,
    /// A sub-task was cancelled because a sibling failed or the node is shutting down.
    Aborted,
    /// Some internal chain error; the block's validity was not determined.
    BeaconChainError(Box<BeaconChainError>),
}

impl BlockError {
    /// The stable code used in logs and metrics.
    pub fn code(&self) -> &'static str {
        match self {
            BlockError::PreStateMissing(_) => "PRESTATE_MISSING",
            BlockError::InvalidSignature => "INVALID_SIGNATURE",
            BlockError::InvalidStateTransition(_) => "INVALID_STATE_TRANSITION",
            BlockError::ExecutionPayloadInvalid { .. } => "EXECUTION_PAYLOAD_INVALID",
            BlockError::BlobUnavailable(_) => "BLOB_UNAVAILABLE",
            BlockError::ParentUnknown(_) => "PARENT_UNKNOWN",
            BlockError::AlreadyKnown(_) => "ALREADY_KNOWN",
            BlockError::WouldRevertFinalizedSlot { .. } => "WOULD_REVERT_FINALIZED_SLOT",
            BlockError::FutureSlot { .. } => "FUTURE_SLOT",
            BlockError::EngineUnavailable => "ENGINE_UNAVAILABLE",
            BlockError::Aborted => "ABORTED",
            BlockError::BeaconChainError(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<BeaconChainError> for BlockError {
    fn from(e: BeaconChainError) -> Self {
        BlockError::BeaconChainError(Box::new(e))
    }
}

#[derive(Debug)]
pub enum BeaconChainError {
    StoreError(store::Error),
    ForkChoiceError(String),
    StateRegenError(crate::regen::RegenError),
    EngineError(execution_layer::Error),
    KzgError(kzg::Error),
    BlobSidecarError(types::BlobSidecarError),
    DataColumnSidecarError(types::DataColumnSidecarError),
    BeaconStateError(types::BeaconStateError),
    BlobScheduleError(types::BlobScheduleError),
    SlotClockError,
    RuntimeShutdown,
    InternalError(String),
}

impl From<store::Error> for BeaconChainError {
    fn from(e: store::Error) -> Self {
        BeaconChainError::StoreError(e)
    }
}

impl From<crate::regen::RegenError> for BeaconChainError {
    fn from(e: crate::regen::RegenError) -> Self {
        BeaconChainError::StateRegenError(e)
    }
}

impl From<execution_layer::Error> for BeaconChainError {
    fn from(e: execution_layer::Error) -> Self {
        BeaconChainError::EngineError(e)
    }
}

impl From<kzg::Error> for BeaconChainError {
    fn from(e: kzg::Error) -> Self {
        BeaconChainError::KzgError(e)
    }
}

impl From<types::BeaconStateError> for BeaconChainError {
    fn from(e: types::BeaconStateError) -> Self {
        BeaconChainError::BeaconStateError(e)
    }
}

impl From<types::BlobScheduleError> for BeaconChainError {
    fn from(e: types::BlobScheduleError) -> Self {
        BeaconChainError::BlobScheduleError(e)
    }
}

impl<T: std::fmt::Debug> From<fork_choice::Error<T>> for BeaconChainError {
    fn from(e: fork_choice::Error<T>) -> Self {
        BeaconChainError::ForkChoiceError(format!("{e:?}"))
    }
}
