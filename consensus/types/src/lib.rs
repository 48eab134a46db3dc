//! Types used by the consensus core.
//!
//! The two primary attributes of these types are:
//!
//! - Useful parts of the Ethereum consensus "types" spec, plus the caches a node needs.
//! - Deterministic SSZ serialization and tree-hashing for every container.

pub mod consts;

mod attestation;
mod attester_slashing;
mod beacon_block;
mod beacon_block_body;
mod beacon_block_header;
mod beacon_state;
mod blob_schedule;
mod blob_sidecar;
mod bls_to_execution_change;
mod chain_spec;
mod checkpoint;
mod data_column_sidecar;
mod deposit;
mod eth1_data;
mod execution_block_hash;
mod execution_payload;
mod fork;
mod fork_name;
mod proposer_slashing;
mod relative_epoch;
mod signed_beacon_block;
mod signed_beacon_block_header;
mod signing_data;
mod slot_epoch;
mod sync_aggregate;
mod validator;
mod voluntary_exit;

pub use crate::attestation::{Attestation, AttestationData, IndexedAttestation};
pub use crate::attester_slashing::AttesterSlashing;
pub use crate::beacon_block::BeaconBlock;
pub use crate::beacon_block_body::{
    BeaconBlockBody, Graffiti, KzgCommitmentInclusionProof, KzgCommitments,
    KzgCommitmentsInclusionProof,
};
pub use crate::beacon_block_header::BeaconBlockHeader;
pub use crate::beacon_state::{
    BeaconCommittee, BeaconState, BeaconStateError, CACHED_EPOCHS, CommitteeCache,
    participation_flags,
};
pub use crate::blob_schedule::{BlobParameters, BlobSchedule, BlobScheduleError};
pub use crate::blob_sidecar::{
    Blob, BlobIdentifier, BlobSidecar, BlobSidecarError, BlobSidecarList, FixedBlobSidecarList,
};
pub use crate::bls_to_execution_change::{BlsToExecutionChange, SignedBlsToExecutionChange};
pub use crate::chain_spec::{
    ChainSpec, Config, Domain, FORK_EPOCH_LOOKAHEAD, ForkBoundary, ForkDigest, ForkVersion,
};
pub use crate::checkpoint::Checkpoint;
pub use crate::data_column_sidecar::{
    Cell, ColumnIndex, DataColumn, DataColumnIdentifier, DataColumnSidecar,
    DataColumnSidecarError, DataColumnSidecarList, DataColumnsByRootIdentifier,
};
pub use crate::deposit::{Deposit, DepositData};
pub use crate::eth1_data::Eth1Data;
pub use crate::execution_block_hash::ExecutionBlockHash;
pub use crate::execution_payload::{
    ExecutionPayload, ExecutionPayloadHeader, Transaction, Transactions, Withdrawal,
};
pub use crate::fork::{Fork, ForkData};
pub use crate::fork_name::ForkName;
pub use crate::proposer_slashing::ProposerSlashing;
pub use crate::relative_epoch::{RelativeEpoch, RelativeEpochError};
pub use crate::signed_beacon_block::SignedBeaconBlock;
pub use crate::signed_beacon_block_header::SignedBeaconBlockHeader;
pub use crate::signing_data::{SignedRoot, SigningData};
pub use crate::slot_epoch::{Epoch, Slot};
pub use crate::sync_aggregate::SyncAggregate;
pub use crate::validator::Validator;
pub use crate::voluntary_exit::{SignedVoluntaryExit, VoluntaryExit};

pub use bls::{AggregateSignature, Keypair, PublicKey, PublicKeyBytes, SecretKey, Signature};
pub use fixed_bytes::{Address, FixedBytesExtended, Hash256, Uint256};
pub use kzg::{KzgCommitment, KzgProof};
pub use merkle_proof::MerkleTreeError;

/// The hexadecimal form of a root, as used in tracker maps and log fields.
pub type RootHex = String;

/// A hash of an execution blob's versioned commitment.
pub type VersionedHash = Hash256;
