use crate::blob_schedule::BlobScheduleError;
use crate::consts::{INTERVALS_PER_SLOT, SLOTS_PER_EPOCH};
use crate::{BlobParameters, BlobSchedule, Epoch, Fork, ForkData, ForkName, Hash256, Slot};
use int_to_bytes::int_to_bytes4;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tree_hash::TreeHash;

pub type ForkVersion = [u8; 4];
pub type ForkDigest = [u8; 4];

/// Forks whose activation epoch lies within this many epochs of the current epoch are
/// considered "active" for digest/subscription purposes.
pub const FORK_EPOCH_LOOKAHEAD: u64 = 2;

/// A fork activation visible from some epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForkBoundary {
    pub fork: ForkName,
    pub epoch: Epoch,
}

/// Signature domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    BeaconProposer,
    BeaconAttester,
    Randao,
    Deposit,
    VoluntaryExit,
    SelectionProof,
    AggregateAndProof,
    SyncCommittee,
    SyncCommitteeSelectionProof,
    ContributionAndProof,
    BlsToExecutionChange,
}

/// The immutable network parameters the core consumes.
///
/// Constructed once at startup (from an embedded preset or a config file) and shared behind an
/// `Arc` thereafter.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainSpec {
    pub config_name: Option<String>,
    pub preset_base: String,

    /*
     * Time parameters
     */
    pub seconds_per_slot: u64,
    pub genesis_slot: Slot,
    pub genesis_delay: u64,
    pub maximum_gossip_clock_disparity_millis: u64,

    /*
     * Fork schedule
     */
    pub genesis_fork_version: ForkVersion,
    pub altair_fork_version: ForkVersion,
    pub altair_fork_epoch: Option<Epoch>,
    pub bellatrix_fork_version: ForkVersion,
    pub bellatrix_fork_epoch: Option<Epoch>,
    pub capella_fork_version: ForkVersion,
    pub capella_fork_epoch: Option<Epoch>,
    pub deneb_fork_version: ForkVersion,
    pub deneb_fork_epoch: Option<Epoch>,
    pub electra_fork_version: ForkVersion,
    pub electra_fork_epoch: Option<Epoch>,
    pub fulu_fork_version: ForkVersion,
    pub fulu_fork_epoch: Option<Epoch>,
    pub gloas_fork_version: ForkVersion,
    pub gloas_fork_epoch: Option<Epoch>,
    pub far_future_epoch: Epoch,

    /*
     * Validator / shuffling parameters
     */
    pub shuffle_round_count: u8,
    pub min_seed_lookahead: Epoch,
    pub min_attestation_inclusion_delay: u64,
    pub effective_balance_increment: u64,
    pub max_effective_balance: u64,
    pub ejection_balance: u64,

    /*
     * Fork choice
     */
    pub proposer_score_boost: Option<u64>,
    pub re_org_head_threshold: u64,
    pub re_org_parent_threshold: u64,
    pub re_org_max_epochs_since_finalization: Epoch,

    /*
     * Networking / data availability
     */
    pub min_epochs_for_blob_sidecars_requests: u64,
    pub min_epochs_for_data_column_sidecars_requests: u64,
    pub number_of_columns: u64,
    pub samples_per_slot: u64,
    pub custody_requirement: u64,
    pub blob_schedule: BlobSchedule,

    /*
     * Signature domains
     */
    pub(crate) domain_beacon_proposer: u32,
    pub(crate) domain_beacon_attester: u32,
    pub(crate) domain_randao: u32,
    pub(crate) domain_deposit: u32,
    pub(crate) domain_voluntary_exit: u32,
    pub(crate) domain_selection_proof: u32,
    pub(crate) domain_aggregate_and_proof: u32,
    pub(crate) domain_sync_committee: u32,
    pub(crate) domain_sync_committee_selection_proof: u32,
    pub(crate) domain_contribution_and_proof: u32,
    pub(crate) domain_bls_to_execution_change: u32,
}

impl ChainSpec {
    pub fn mainnet() -> Self {
        let deneb_fork_epoch = Epoch::new(269568);
        let electra_fork_epoch = Epoch::new(364032);
        Self {
            config_name: Some("mainnet".to_string()),
            preset_base: "mainnet".to_string(),
            seconds_per_slot: 12,
            genesis_slot: Slot::new(0),
            genesis_delay: 604800,
            maximum_gossip_clock_disparity_millis: 500,
            genesis_fork_version: [0, 0, 0, 0],
            altair_fork_version: [1, 0, 0, 0],
            altair_fork_epoch: Some(Epoch::new(74240)),
            bellatrix_fork_version: [2, 0, 0, 0],
            bellatrix_fork_epoch: Some(Epoch::new(144896)),
            capella_fork_version: [3, 0, 0, 0],
            capella_fork_epoch: Some(Epoch::new(194048)),
            deneb_fork_version: [4, 0, 0, 0],
            deneb_fork_epoch: Some(deneb_fork_epoch),
            electra_fork_version: [5, 0, 0, 0],
            electra_fork_epoch: Some(electra_fork_epoch),
            fulu_fork_version: [6, 0, 0, 0],
            fulu_fork_epoch: None,
            gloas_fork_version: [7, 0, 0, 0],
            gloas_fork_epoch: None,
            far_future_epoch: Epoch::max_value(),
            shuffle_round_count: 90,
            min_seed_lookahead: Epoch::new(1),
            min_attestation_inclusion_delay: 1,
            effective_balance_increment: 1_000_000_000,
            max_effective_balance: 32_000_000_000,
            ejection_balance: 16_000_000_000,
            proposer_score_boost: Some(40),
            re_org_head_threshold: 20,
            re_org_parent_threshold: 160,
            re_org_max_epochs_since_finalization: Epoch::new(2),
            min_epochs_for_blob_sidecars_requests: 4096,
            min_epochs_for_data_column_sidecars_requests: 4096,
            number_of_columns: 128,
            samples_per_slot: 8,
            custody_requirement: 4,
            blob_schedule: BlobSchedule::new(vec![
                BlobParameters {
                    epoch: deneb_fork_epoch,
                    max_blobs_per_block: 6,
                },
                BlobParameters {
                    epoch: electra_fork_epoch,
                    max_blobs_per_block: 9,
                },
            ]),
            domain_beacon_proposer: 0,
            domain_beacon_attester: 1,
            domain_randao: 2,
            domain_deposit: 3,
            domain_voluntary_exit: 4,
            domain_selection_proof: 5,
            domain_aggregate_and_proof: 6,
            domain_sync_committee: 7,
            domain_sync_committee_selection_proof: 8,
            domain_contribution_and_proof: 9,
            domain_bls_to_execution_change: 10,
        }
    }

    pub fn slot_duration(&self) -> Duration {
        Duration::from_secs(self.seconds_per_slot)
    }

    /// The deadline after the start of the slot by which a block must arrive to be considered
    /// timely for proposer-boost purposes.
    pub fn attestation_cutoff(&self) -> Duration {
        self.slot_duration() / INTERVALS_PER_SLOT as u32
    }

    pub fn maximum_gossip_clock_disparity(&self) -> Duration {
        Duration::from_millis(self.maximum_gossip_clock_disparity_millis)
    }

    /// Returns the name of the fork active at `epoch`.
    pub fn fork_name_at_epoch(&self, epoch: Epoch) -> ForkName {
        let mut name = ForkName::Base;
        for fork in ForkName::list_all() {
            if self.fork_epoch(fork).is_some_and(|fork_epoch| epoch >= fork_epoch) {
                name = fork;
            }
        }
        name
    }

    pub fn fork_name_at_slot(&self, slot: Slot) -> ForkName {
        self.fork_name_at_epoch(slot.epoch(SLOTS_PER_EPOCH))
    }

    /// Returns the epoch at which `fork` activates, if scheduled.
    pub fn fork_epoch(&self, fork: ForkName) -> Option<Epoch> {
        match fork {
            ForkName::Base => Some(Epoch::new(0)),
            ForkName::Altair => self.altair_fork_epoch,
            ForkName::Bellatrix => self.bellatrix_fork_epoch,
            ForkName::Capella => self.capella_fork_epoch,
            ForkName::Deneb => self.deneb_fork_epoch,
            ForkName::Electra => self.electra_fork_epoch,
            ForkName::Fulu => self.fulu_fork_epoch,
            ForkName::Gloas => self.gloas_fork_epoch,
        }
    }

    pub fn fork_version(&self, fork: ForkName) -> ForkVersion {
        match fork {
            ForkName::Base => self.genesis_fork_version,
            ForkName::Altair => self.altair_fork_version,
            ForkName::Bellatrix => self.bellatrix_fork_version,
            ForkName::Capella => self.capella_fork_version,
            ForkName::Deneb => self.deneb_fork_version,
            ForkName::Electra => self.electra_fork_version,
            ForkName::Fulu => self.fulu_fork_version,
            ForkName::Gloas => self.gloas_fork_version,
        }
    }

    pub fn fork_version_for_epoch(&self, epoch: Epoch) -> ForkVersion {
        self.fork_version(self.fork_name_at_epoch(epoch))
    }

    /// The `Fork` object as it would appear in a state at `epoch`.
    pub fn fork_at_epoch(&self, epoch: Epoch) -> Fork {
        let current_fork = self.fork_name_at_epoch(epoch);
        let previous_version = ForkName::list_all()
            .into_iter()
            .take_while(|fork| *fork != current_fork)
            .last()
            .map(|previous| self.fork_version(previous))
            .unwrap_or(self.genesis_fork_version);
        Fork {
            previous_version,
            current_version: self.fork_version(current_fork),
            epoch: self.fork_epoch(current_fork).unwrap_or(self.far_future_epoch),
        }
    }

    /// Returns the next scheduled fork after `epoch`, if any.
    pub fn next_fork_epoch(&self, epoch: Epoch) -> Option<(ForkName, Epoch)> {
        ForkName::list_all()
            .into_iter()
            .filter_map(|fork| Some((fork, self.fork_epoch(fork)?)))
            .find(|(_, fork_epoch)| *fork_epoch > epoch)
    }

    pub fn is_peer_das_enabled_for_epoch(&self, epoch: Epoch) -> bool {
        self.fulu_fork_epoch
            .is_some_and(|fork_epoch| epoch >= fork_epoch)
    }

    /// The maximum number of blobs a block at `epoch` may commit to.
    ///
    /// Pre-Deneb epochs carry no blobs and return 0. An empty schedule is a configuration
    /// error and raises rather than being treated as "no blobs allowed".
    pub fn max_blobs_per_block(&self, epoch: Epoch) -> Result<u64, BlobScheduleError> {
        Ok(self
            .blob_schedule
            .max_blobs_at_epoch(epoch)?
            .unwrap_or(0))
    }

    /*
     * Fork digests
     */

    /// Compute the 4-byte digest identifying the fork at `epoch` on this network.
    ///
    /// From Fulu onwards the digest also commits to the active blob parameters, so that
    /// blob-parameter-only forks change gossip topics without a state fork. An empty blob
    /// schedule at a PeerDAS epoch is a configuration error.
    pub fn compute_fork_digest(
        &self,
        epoch: Epoch,
        genesis_validators_root: Hash256,
    ) -> Result<ForkDigest, BlobScheduleError> {
        let fork_data_root = ForkData {
            current_version: self.fork_version_for_epoch(epoch),
            genesis_validators_root,
        }
        .tree_hash_root();

        if !self.is_peer_das_enabled_for_epoch(epoch) {
            let mut digest = [0; 4];
            digest.copy_from_slice(&fork_data_root.as_slice()[..4]);
            return Ok(digest);
        }

        // From Fulu, the digest is the base digest xored with a hash of the blob parameters
        // active at this epoch. The parameter epoch is the greater of the fork epoch and the
        // blob-schedule entry epoch.
        let fulu_epoch = self.fulu_fork_epoch.unwrap_or(self.far_future_epoch);
        let (param_epoch, max_blobs) = match self.blob_schedule.entry_at_epoch(epoch)? {
            Some(entry) => (
                std::cmp::max(entry.epoch, fulu_epoch),
                entry.max_blobs_per_block,
            ),
            // PeerDAS is active but the schedule starts later: the fork's own parameters
            // apply from its activation epoch.
            None => (fulu_epoch, 0),
        };

        let mut hasher = Sha256::new();
        hasher.update(param_epoch.as_u64().to_le_bytes());
        hasher.update(max_blobs.to_le_bytes());
        let param_hash = hasher.finalize();

        let mut digest = [0; 4];
        for (i, byte) in digest.iter_mut().enumerate() {
            *byte = fork_data_root.as_slice()[i] ^ param_hash[i];
        }
        Ok(digest)
    }

    /// Enumerate the fork boundaries within the lookahead window of `epoch`.
    ///
    /// Coincident forks (two upgrades scheduled at the same epoch) collapse to the later one.
    pub fn get_active_fork_boundaries(&self, epoch: Epoch) -> Vec<ForkBoundary> {
        let window_start = epoch.saturating_sub(FORK_EPOCH_LOOKAHEAD);
        let window_end = epoch.saturating_add(1 + FORK_EPOCH_LOOKAHEAD);

        let mut boundaries: Vec<ForkBoundary> = Vec::new();
        for fork in ForkName::list_all() {
            let Some(fork_epoch) = self.fork_epoch(fork) else {
                continue;
            };
            if fork_epoch < window_start || fork_epoch > window_end {
                continue;
            }
            match boundaries.iter_mut().find(|b| b.epoch == fork_epoch) {
                // ForkName::list_all is in activation order, so a later iteration wins.
                Some(existing) => existing.fork = fork,
                None => boundaries.push(ForkBoundary {
                    fork,
                    epoch: fork_epoch,
                }),
            }
        }
        boundaries
    }

    /*
     * Signature domains
     */

    fn domain_constant(&self, domain: Domain) -> u32 {
        match domain {
            Domain::BeaconProposer => self.domain_beacon_proposer,
            Domain::BeaconAttester => self.domain_beacon_attester,
            Domain::Randao => self.domain_randao,
            Domain::Deposit => self.domain_deposit,
            Domain::VoluntaryExit => self.domain_voluntary_exit,
            Domain::SelectionProof => self.domain_selection_proof,
            Domain::AggregateAndProof => self.domain_aggregate_and_proof,
            Domain::SyncCommittee => self.domain_sync_committee,
            Domain::SyncCommitteeSelectionProof => self.domain_sync_committee_selection_proof,
            Domain::ContributionAndProof => self.domain_contribution_and_proof,
            Domain::BlsToExecutionChange => self.domain_bls_to_execution_change,
        }
    }

    pub fn domain_type_bytes(&self, domain: Domain) -> [u8; 4] {
        int_to_bytes4(self.domain_constant(domain))
    }

    /// Compute the 32-byte signature domain for `domain` at `epoch`.
    pub fn get_domain(
        &self,
        epoch: Epoch,
        domain: Domain,
        fork: &Fork,
        genesis_validators_root: Hash256,
    ) -> Hash256 {
        let fork_version = fork.get_fork_version(epoch);
        self.compute_domain(domain, fork_version, genesis_validators_root)
    }

    pub fn compute_domain(
        &self,
        domain: Domain,
        fork_version: ForkVersion,
        genesis_validators_root: Hash256,
    ) -> Hash256 {
        let fork_data_root = ForkData {
            current_version: fork_version,
            genesis_validators_root,
        }
        .tree_hash_root();

        let mut domain_bytes = [0; 32];
        domain_bytes[..4].copy_from_slice(&self.domain_type_bytes(domain));
        domain_bytes[4..].copy_from_slice(&fork_data_root.as_slice()[..28]);
        Hash256::from(domain_bytes)
    }
}

/// The serialised form of a `ChainSpec`, matching the upstream YAML/JSON config layout.
///
/// Scalars are quoted decimal strings; unscheduled fork epochs are the far-future sentinel
/// `"18446744073709551615"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Config {
    #[serde(default)]
    pub config_name: Option<String>,
    pub preset_base: String,
    #[serde(with = "serde_utils::quoted_u64")]
    pub seconds_per_slot: u64,
    #[serde(with = "serde_utils::quoted_u64")]
    pub genesis_delay: u64,
    #[serde(with = "serde_utils::bytes_4_hex")]
    pub genesis_fork_version: ForkVersion,
    #[serde(with = "serde_utils::bytes_4_hex")]
    pub altair_fork_version: ForkVersion,
    pub altair_fork_epoch: Epoch,
    #[serde(with = "serde_utils::bytes_4_hex")]
    pub bellatrix_fork_version: ForkVersion,
    pub bellatrix_fork_epoch: Epoch,
    #[serde(with = "serde_utils::bytes_4_hex")]
    pub capella_fork_version: ForkVersion,
    pub capella_fork_epoch: Epoch,
    #[serde(with = "serde_utils::bytes_4_hex")]
    pub deneb_fork_version: ForkVersion,
    pub deneb_fork_epoch: Epoch,
    #[serde(with = "serde_utils::bytes_4_hex")]
    pub electra_fork_version: ForkVersion,
    pub electra_fork_epoch: Epoch,
    #[serde(with = "serde_utils::bytes_4_hex")]
    pub fulu_fork_version: ForkVersion,
    pub fulu_fork_epoch: Epoch,
    #[serde(with = "serde_utils::bytes_4_hex")]
    pub gloas_fork_version: ForkVersion,
    pub gloas_fork_epoch: Epoch,
    #[serde(with = "serde_utils::quoted_u64")]
    pub min_epochs_for_blob_sidecars_requests: u64,
    #[serde(with = "serde_utils::quoted_u64")]
    pub min_epochs_for_data_column_sidecars_requests: u64,
    #[serde(with = "serde_utils::quoted_u64")]
    pub number_of_columns: u64,
    #[serde(with = "serde_utils::quoted_u64")]
    pub samples_per_slot: u64,
    #[serde(with = "serde_utils::quoted_u64")]
    pub custody_requirement: u64,
    pub blob_schedule: BlobSchedule,
}

impl Config {
    fn epoch_option(epoch: Epoch) -> Option<Epoch> {
        (epoch != Epoch::max_value()).then_some(epoch)
    }

    fn epoch_or_sentinel(epoch: Option<Epoch>) -> Epoch {
        epoch.unwrap_or_else(Epoch::max_value)
    }

    pub fn from_chain_spec(spec: &ChainSpec) -> Self {
        Self {
            config_name: spec.config_name.clone(),
            preset_base: spec.preset_base.clone(),
            seconds_per_slot: spec.seconds_per_slot,
            genesis_delay: spec.genesis_delay,
            genesis_fork_version: spec.genesis_fork_version,
            altair_fork_version: spec.altair_fork_version,
            altair_fork_epoch: Self::epoch_or_sentinel(spec.altair_fork_epoch),
            bellatrix_fork_version: spec.bellatrix_fork_version,
            bellatrix_fork_epoch: Self::epoch_or_sentinel(spec.bellatrix_fork_epoch),
            capella_fork_version: spec.capella_fork_version,
            capella_fork_epoch: Self::epoch_or_sentinel(spec.capella_fork_epoch),
            deneb_fork_version: spec.deneb_fork_version,
            deneb_fork_epoch: Self::epoch_or_sentinel(spec.deneb_fork_epoch),
            electra_fork_version: spec.electra_fork_version,
            electra_fork_epoch: Self::epoch_or_sentinel(spec.electra_fork_epoch),
            fulu_fork_version: spec.fulu_fork_version,
            fulu_fork_epoch: Self::epoch_or_sentinel(spec.fulu_fork_epoch),
            gloas_fork_version: spec.gloas_fork_version,
            gloas_fork_epoch: Self::epoch_or_sentinel(spec.gloas_fork_epoch),
            min_epochs_for_blob_sidecars_requests: spec.min_epochs_for_blob_sidecars_requests,
            min_epochs_for_data_column_sidecars_requests: spec
                .min_epochs_for_data_column_sidecars_requests,
            number_of_columns: spec.number_of_columns,
            samples_per_slot: spec.samples_per_slot,
            custody_requirement: spec.custody_requirement,
            blob_schedule: spec.blob_schedule.clone(),
        }
    }

    /// Overlay this config onto a base spec (typically `ChainSpec::mainnet`).
    pub fn apply_to_chain_spec(&self, base: &ChainSpec) -> ChainSpec {
        let mut spec = base.clone();
        spec.config_name = self.config_name.clone();
        spec.preset_base = self.preset_base.clone();
        spec.seconds_per_slot = self.seconds_per_slot;
        spec.genesis_delay = self.genesis_delay;
        spec.genesis_fork_version = self.genesis_fork_version;
        spec.altair_fork_version = self.altair_fork_version;
        spec.altair_fork_epoch = Self::epoch_option(self.altair_fork_epoch);
        spec.bellatrix_fork_version = self.bellatrix_fork_version;
        spec.bellatrix_fork_epoch = Self::epoch_option(self.bellatrix_fork_epoch);
        spec.capella_fork_version = self.capella_fork_version;
        spec.capella_fork_epoch = Self::epoch_option(self.capella_fork_epoch);
        spec.deneb_fork_version = self.deneb_fork_version;
        spec.deneb_fork_epoch = Self::epoch_option(self.deneb_fork_epoch);
        spec.electra_fork_version = self.electra_fork_version;
        spec.electra_fork_epoch = Self::epoch_option(self.electra_fork_epoch);
        spec.fulu_fork_version = self.fulu_fork_version;
        spec.fulu_fork_epoch = Self::epoch_option(self.fulu_fork_epoch);
        spec.gloas_fork_version = self.gloas_fork_version;
        spec.gloas_fork_epoch = Self::epoch_option(self.gloas_fork_epoch);
        spec.min_epochs_for_blob_sidecars_requests = self.min_epochs_for_blob_sidecars_requests;
        spec.min_epochs_for_data_column_sidecars_requests =
            self.min_epochs_for_data_column_sidecars_requests;
        spec.number_of_columns = self.number_of_columns;
        spec.samples_per_slot = self.samples_per_slot;
        spec.custody_requirement = self.custody_requirement;
        spec.blob_schedule = self.blob_schedule.clone();
        spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FixedBytesExtended;

    #[test]
    fn mainnet_fork_schedule_is_ordered() {
        let spec = ChainSpec::mainnet();
        assert_eq!(spec.fork_name_at_epoch(Epoch::new(0)), ForkName::Base);
        assert_eq!(spec.fork_name_at_epoch(Epoch::new(74240)), ForkName::Altair);
        assert_eq!(
            spec.fork_name_at_epoch(Epoch::new(364032)),
            ForkName::Electra
        );
        assert_eq!(spec.fork_name_at_epoch(Epoch::max_value()), ForkName::Electra);
    }

    #[test]
    fn config_json_round_trip_preserves_sentinel() {
        let spec = ChainSpec::mainnet();
        let config = Config::from_chain_spec(&spec);
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"18446744073709551615\""));
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);

        let rebuilt = parsed.apply_to_chain_spec(&ChainSpec::mainnet());
        assert_eq!(rebuilt, spec);
        assert_eq!(rebuilt.fulu_fork_epoch, None);
    }

    #[test]
    fn fork_digest_changes_at_fulu() {
        let mut spec = ChainSpec::mainnet();
        let genesis_root = Hash256::from_low_u64_be(1);
        let fulu_epoch = Epoch::new(400000);
        spec.fulu_fork_epoch = Some(fulu_epoch);
        spec.blob_schedule = BlobSchedule::new(vec![BlobParameters {
            epoch: fulu_epoch,
            max_blobs_per_block: 12,
        }]);

        let pre_fulu = spec
            .compute_fork_digest(fulu_epoch.saturating_sub(1u64), genesis_root)
            .unwrap();
        let at_fulu = spec.compute_fork_digest(fulu_epoch, genesis_root).unwrap();
        assert_ne!(pre_fulu, at_fulu);

        // The digest matches the manual xor construction.
        let fork_data_root = ForkData {
            current_version: spec.fulu_fork_version,
            genesis_validators_root: genesis_root,
        }
        .tree_hash_root();
        let mut hasher = Sha256::new();
        hasher.update(fulu_epoch.as_u64().to_le_bytes());
        hasher.update(12u64.to_le_bytes());
        let param_hash = hasher.finalize();
        let expected: Vec<u8> = fork_data_root.as_slice()[..4]
            .iter()
            .zip(param_hash[..4].iter())
            .map(|(a, b)| a ^ b)
            .collect();
        assert_eq!(&at_fulu[..], &expected[..]);
    }

    #[test]
    fn empty_blob_schedule_is_a_configuration_error() {
        let mut spec = ChainSpec::mainnet();
        spec.blob_schedule = BlobSchedule::default();
        assert_eq!(
            spec.max_blobs_per_block(Epoch::new(0)),
            Err(BlobScheduleError::EmptySchedule)
        );

        // The PeerDAS digest is likewise poisoned by a missing schedule.
        spec.fulu_fork_epoch = Some(Epoch::new(0));
        assert_eq!(
            spec.compute_fork_digest(Epoch::new(0), Hash256::zero()),
            Err(BlobScheduleError::EmptySchedule)
        );
    }

    #[test]
    fn active_fork_boundaries_window() {
        let mut spec = ChainSpec::mainnet();
        spec.altair_fork_epoch = Some(Epoch::new(10));
        spec.bellatrix_fork_epoch = Some(Epoch::new(20));
        spec.capella_fork_epoch = Some(Epoch::new(20));
        spec.deneb_fork_epoch = None;
        spec.electra_fork_epoch = None;

        // Window around epoch 19 is [17, 22]: sees bellatrix+capella collapsed to capella.
        let boundaries = spec.get_active_fork_boundaries(Epoch::new(19));
        assert_eq!(
            boundaries,
            vec![ForkBoundary {
                fork: ForkName::Capella,
                epoch: Epoch::new(20)
            }]
        );

        // Window around epoch 11 is [9, 14]: sees altair only.
        let boundaries = spec.get_active_fork_boundaries(Epoch::new(11));
        assert_eq!(
            boundaries,
            vec![ForkBoundary {
                fork: ForkName::Altair,
                epoch: Epoch::new(10)
            }]
        );
    }

    #[test]
    fn yaml_config_round_trip() {
        let config = Config::from_chain_spec(&ChainSpec::mainnet());
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, config);
    }
}
