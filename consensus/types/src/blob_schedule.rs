use crate::Epoch;
use serde::{Deserialize, Serialize};

/// One entry of the blob-parameters-only (BPO) fork schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct BlobParameters {
    pub epoch: Epoch,
    #[serde(with = "serde_utils::quoted_u64")]
    pub max_blobs_per_block: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobScheduleError {
    /// The schedule has no entries: a configuration error, not "zero blobs".
    EmptySchedule,
}

/// The ordered list of blob-count changes.
///
/// Entries may arrive unsorted from configuration; they are sorted on construction. Lookup
/// returns the entry with the greatest epoch less than or equal to the requested epoch, and
/// raises on an empty schedule so that a misconfigured node fails loudly rather than treating
/// every block as blob-free.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobSchedule {
    entries: Vec<BlobParameters>,
}

impl BlobSchedule {
    pub fn new(mut entries: Vec<BlobParameters>) -> Self {
        entries.sort_by_key(|entry| entry.epoch);
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BlobParameters> {
        self.entries.iter()
    }

    /// Returns the max-blobs value active at `epoch`, or `None` when the schedule starts
    /// after `epoch` (a pre-blob epoch).
    pub fn max_blobs_at_epoch(&self, epoch: Epoch) -> Result<Option<u64>, BlobScheduleError> {
        Ok(self.entry_at_epoch(epoch)?.map(|entry| entry.max_blobs_per_block))
    }

    /// Returns the whole entry active at `epoch`, used for fork-digest computation.
    pub fn entry_at_epoch(&self, epoch: Epoch) -> Result<Option<&BlobParameters>, BlobScheduleError> {
        if self.entries.is_empty() {
            return Err(BlobScheduleError::EmptySchedule);
        }
        Ok(self.entries.iter().rev().find(|entry| entry.epoch <= epoch))
    }
}

impl FromIterator<BlobParameters> for BlobSchedule {
    fn from_iter<I: IntoIterator<Item = BlobParameters>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule() -> BlobSchedule {
        // Deliberately unsorted.
        BlobSchedule::new(vec![
            BlobParameters {
                epoch: Epoch::new(100),
                max_blobs_per_block: 9,
            },
            BlobParameters {
                epoch: Epoch::new(10),
                max_blobs_per_block: 6,
            },
            BlobParameters {
                epoch: Epoch::new(200),
                max_blobs_per_block: 12,
            },
        ])
    }

    #[test]
    fn lookup_returns_greatest_entry_not_after_epoch() {
        let schedule = schedule();
        assert_eq!(schedule.max_blobs_at_epoch(Epoch::new(9)).unwrap(), None);
        assert_eq!(
            schedule.max_blobs_at_epoch(Epoch::new(10)).unwrap(),
            Some(6)
        );
        assert_eq!(
            schedule.max_blobs_at_epoch(Epoch::new(99)).unwrap(),
            Some(6)
        );
        assert_eq!(
            schedule.max_blobs_at_epoch(Epoch::new(100)).unwrap(),
            Some(9)
        );
        assert_eq!(
            schedule.max_blobs_at_epoch(Epoch::new(1000)).unwrap(),
            Some(12)
        );
    }

    #[test]
    fn empty_schedule_raises() {
        assert_eq!(
            BlobSchedule::default().max_blobs_at_epoch(Epoch::new(0)),
            Err(BlobScheduleError::EmptySchedule)
        );
        assert_eq!(
            BlobSchedule::default().entry_at_epoch(Epoch::new(0)),
            Err(BlobScheduleError::EmptySchedule)
        );
    }

    #[test]
    fn unsorted_input_is_accepted_and_sorted() {
        let schedule = schedule();
        let epochs: Vec<u64> = schedule.iter().map(|e| e.epoch.as_u64()).collect();
        assert_eq!(epochs, vec![10, 100, 200]);
    }

    #[test]
    fn serde_uses_screaming_case_keys() {
        let json = serde_json::to_string(&schedule()).unwrap();
        assert!(json.contains("\"EPOCH\""));
        assert!(json.contains("\"MAX_BLOBS_PER_BLOCK\""));
        let parsed: BlobSchedule = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, schedule());
    }
}
