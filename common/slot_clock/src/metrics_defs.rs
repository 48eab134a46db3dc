use crate::SlotClock;
use metrics::{IntGauge, Result as MetricsResult, try_create_int_gauge};
use std::sync::LazyLock;
use types::consts::SLOTS_PER_EPOCH;

pub static PRESENT_SLOT: LazyLock<MetricsResult<IntGauge>> =
    LazyLock::new(|| try_create_int_gauge("slotclock_present_slot", "The present wall-clock slot"));
pub static PRESENT_EPOCH: LazyLock<MetricsResult<IntGauge>> = LazyLock::new(|| {
    try_create_int_gauge("slotclock_present_epoch", "The present wall-clock epoch")
});

/// Update the global slot/epoch gauges from `clock`.
pub fn scrape_for_metrics<C: SlotClock>(clock: &C) {
    let slot = clock.now().map(|s| s.as_u64()).unwrap_or(0);
    metrics::set_gauge(&PRESENT_SLOT, slot as i64);
    metrics::set_gauge(&PRESENT_EPOCH, (slot / SLOTS_PER_EPOCH) as i64);
}
