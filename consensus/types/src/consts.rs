//! Preset constants for the mainnet configuration.
//!
//! This implementation does not parameterise containers over a preset; the mainnet sizes are
//! fixed at compile time through the `typenum` aliases below.

pub const SLOTS_PER_EPOCH: u64 = 32;
pub const SLOTS_PER_HISTORICAL_ROOT: u64 = 8192;
pub const EPOCHS_PER_HISTORICAL_VECTOR: u64 = 65536;
pub const TARGET_COMMITTEE_SIZE: u64 = 128;
pub const MAX_COMMITTEES_PER_SLOT: u64 = 64;
pub const MAX_VALIDATORS_PER_COMMITTEE: u64 = 2048;
pub const SYNC_COMMITTEE_SIZE: u64 = 512;

/// `BeaconBlockBody` generalized index of the `blob_kzg_commitments` field, used by sidecar
/// inclusion proofs.
pub const BLOB_KZG_COMMITMENTS_INDEX: usize = 11;
/// Depth of the proof of the whole `blob_kzg_commitments` list within the body (data columns).
pub const KZG_COMMITMENTS_INCLUSION_PROOF_DEPTH: usize = 4;
/// Depth of the proof of a single commitment within the body (blob sidecars):
/// 12 levels of the commitments list, 1 length-mix level, 4 body levels.
pub const KZG_COMMITMENT_INCLUSION_PROOF_DEPTH: usize = 17;

/// Number of data columns an extended blob is split into.
pub const NUMBER_OF_COLUMNS: u64 = 128;

/// Intervals within a slot: attestations are due after 1 interval, aggregates after 2.
pub const INTERVALS_PER_SLOT: u64 = 3;

pub mod typenum_sizes {
    pub use ssz_types::typenum::{
        U2, U4, U16, U17, U64, U128, U512, U2048, U4096, U8192, U16384, U65536, U131072, U1048576,
        U1073741824, U1099511627776,
    };

    /// 2**40: the validator registry limit.
    pub type ValidatorRegistryLimit = U1099511627776;
    pub type SlotsPerHistoricalRoot = U8192;
    pub type EpochsPerHistoricalVector = U65536;
    pub type MaxValidatorsPerCommittee = U2048;
    pub type MaxCommitteesPerSlot = U64;
    pub type SyncCommitteeSize = U512;
    pub type MaxBlobCommitmentsPerBlock = U4096;
    pub type BytesPerBlob = U131072;
    pub type BytesPerCell = U2048;
    pub type NumberOfColumns = U128;
    pub type KzgCommitmentsInclusionProofDepth = U4;
    pub type KzgCommitmentInclusionProofDepth = U17;
    pub type MaxProposerSlashings = U16;
    pub type MaxAttesterSlashings = U2;
    pub type MaxAttestations = U128;
    pub type MaxVoluntaryExits = U16;
    pub type MaxBlsToExecutionChanges = U16;
    pub type MaxBytesPerTransaction = U1073741824;
    pub type MaxTransactionsPerPayload = U1048576;
    pub type MaxExtraDataBytes = U64; // 32 in the preset; 64 covers devnet overrides.
    pub type MaxWithdrawalsPerPayload = U16;
    pub type JustificationBitsLength = U4;
}
