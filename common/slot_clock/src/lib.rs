//! This crate provides a clock that reports the current slot from a genesis timestamp, along
//! with the slot-component deadlines (attestation due, aggregate due, sync message due) that
//! the rest of the node schedules against.

mod manual_slot_clock;
pub mod metrics_defs;
mod system_time_slot_clock;

use std::time::Duration;
use types::Slot;
use types::consts::INTERVALS_PER_SLOT;

pub use crate::manual_slot_clock::ManualSlotClock;
pub use crate::system_time_slot_clock::SystemTimeSlotClock;

/// Basis points of the slot duration: 1 bps = 0.01% of the slot.
pub const BPS_DENOMINATOR: u64 = 10_000;

/// A clock that reports the current slot.
///
/// The clock is not required to be monotonically increasing and may go backwards if the
/// underlying clock does.
pub trait SlotClock: Send + Sync + Sized + Clone {
    /// Creates a new slot clock where the first slot is `genesis_slot`, genesis occurred
    /// `genesis_duration` after the `UNIX_EPOCH` and each slot is `slot_duration` apart.
    fn new(genesis_slot: Slot, genesis_duration: Duration, slot_duration: Duration) -> Self;

    /// Returns the slot at this present time.
    fn now(&self) -> Option<Slot>;

    /// Returns the present time as a duration since the UNIX epoch.
    fn now_duration(&self) -> Option<Duration>;

    /// Returns `true` if the present time is prior to genesis.
    fn is_prior_to_genesis(&self) -> Option<bool>;

    /// Returns the slot of the given duration since the UNIX epoch.
    fn slot_of(&self, now: Duration) -> Option<Slot>;

    /// Returns the duration from the UNIX epoch to the start of the given slot.
    fn start_of(&self, slot: Slot) -> Option<Duration>;

    /// Returns the duration between slots.
    fn slot_duration(&self) -> Duration;

    /// Returns the first slot to be returned at the genesis time.
    fn genesis_slot(&self) -> Slot;

    /// Returns the duration from the UNIX epoch to the genesis time.
    fn genesis_duration(&self) -> Duration;

    /// Returns the duration until the next slot.
    fn duration_to_next_slot(&self) -> Option<Duration> {
        let now = self.now_duration()?;
        if now < self.genesis_duration() {
            self.genesis_duration().checked_sub(now)
        } else {
            self.duration_to_slot(self.slot_of(now)? + 1)
        }
    }

    /// Returns the duration from now until the start of `slot`, or `None` if it has passed.
    fn duration_to_slot(&self, slot: Slot) -> Option<Duration> {
        self.start_of(slot)?.checked_sub(self.now_duration()?)
    }

    /// Returns the duration since the start of the current slot.
    fn seconds_from_current_slot_start(&self) -> Option<Duration> {
        let now = self.now_duration()?;
        let slot_start = self.start_of(self.slot_of(now)?)?;
        now.checked_sub(slot_start)
    }

    /// Attestations for the current slot are due after one third of the slot.
    fn unagg_attestation_production_delay(&self) -> Duration {
        self.slot_duration() / INTERVALS_PER_SLOT as u32
    }

    /// Aggregated attestations are due after two thirds of the slot.
    fn agg_attestation_production_delay(&self) -> Duration {
        self.slot_duration() * 2 / INTERVALS_PER_SLOT as u32
    }

    /// Sync-committee messages share the attestation deadline.
    fn sync_message_production_delay(&self) -> Duration {
        self.slot_duration() / INTERVALS_PER_SLOT as u32
    }

    /// Converts basis points of the slot duration into a concrete duration.
    fn duration_of_bps(&self, bps: u64) -> Duration {
        Duration::from_millis(
            self.slot_duration()
                .as_millis()
                .saturating_mul(bps as u128)
                .checked_div(BPS_DENOMINATOR as u128)
                .unwrap_or(0) as u64,
        )
    }

    /// The deadline for a block to count as timely for proposer boost.
    fn single_lookahead_deadline(&self, slot: Slot) -> Option<Duration> {
        self.start_of(slot)
            .map(|start| start + self.unagg_attestation_production_delay())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_component_deadlines() {
        let clock = ManualSlotClock::new(
            Slot::new(0),
            Duration::from_secs(0),
            Duration::from_secs(12),
        );
        assert_eq!(
            clock.unagg_attestation_production_delay(),
            Duration::from_secs(4)
        );
        assert_eq!(
            clock.agg_attestation_production_delay(),
            Duration::from_secs(8)
        );
    }

    #[test]
    fn bps_durations() {
        let clock = ManualSlotClock::new(
            Slot::new(0),
            Duration::from_secs(0),
            Duration::from_secs(12),
        );
        // 2500 bps = a quarter of the slot.
        assert_eq!(clock.duration_of_bps(2500), Duration::from_secs(3));
        assert_eq!(clock.duration_of_bps(0), Duration::from_secs(0));
        assert_eq!(clock.duration_of_bps(10_000), Duration::from_secs(12));
    }
}
