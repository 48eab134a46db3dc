mod fork_choice;
mod fork_choice_store;
mod metrics;

pub use crate::fork_choice::{
    AttestationFromBlock, Error, ForkChoice, ForkChoiceView, ForkchoiceUpdateParameters,
    InvalidAttestation, InvalidBlock, PayloadVerificationStatus, PersistedForkChoice,
    PersistedForkChoiceV1, QueuedAttestation, compute_slots_since_epoch_start,
};
pub use fork_choice_store::ForkChoiceStore;
pub use proto_array::{
    Block as ProtoBlock, DataAvailabilityStatus, DisallowedReOrgOffsets, DoNotReOrg,
    ExecutionStatus, InvalidationOperation, JustifiedBalances, ProposerHeadError,
    ProposerHeadInfo, ReOrgThreshold,
};

#[cfg(test)]
mod tests;
