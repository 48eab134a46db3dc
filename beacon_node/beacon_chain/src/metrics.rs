use metrics::{
    Histogram, IntCounter, IntCounterVec, Result as MetricsResult, try_create_histogram,
    try_create_int_counter, try_create_int_counter_vec,
};
use std::sync::LazyLock;

pub use metrics::{inc_counter, inc_counter_vec, observe, start_timer, stop_timer};

pub static BLOCK_PROCESSING_TIMES: LazyLock<MetricsResult<Histogram>> = LazyLock::new(|| {
    try_create_histogram(
        "beacon_block_processing_seconds",
        "Full runtime of block processing",
    )
});
pub static BLOCK_PROCESSING_SUCCESSES: LazyLock<MetricsResult<IntCounter>> =
    LazyLock::new(|| {
        try_create_int_counter(
            "beacon_block_processing_successes_total",
            "Count of blocks processed without error",
        )
    });
pub static BLOCK_PROCESSING_ERRORS: LazyLock<MetricsResult<IntCounterVec>> =
    LazyLock::new(|| {
        try_create_int_counter_vec(
            "beacon_block_processing_errors_total",
            "Count of block processing failures by error code",
            &["code"],
        )
    });
pub static BLOBS_FROM_EL_EXPECTED: LazyLock<MetricsResult<Histogram>> = LazyLock::new(|| {
    try_create_histogram(
        "beacon_blobs_from_el_expected",
        "Number of blobs expected to be fetched from the EL",
    )
});
pub static BLOBS_FROM_EL_RECEIVED: LazyLock<MetricsResult<Histogram>> = LazyLock::new(|| {
    try_create_histogram(
        "beacon_blobs_from_el_received",
        "Number of blobs fetched from the EL",
    )
});
pub static BLOBS_FROM_EL_ERROR_TOTAL: LazyLock<MetricsResult<IntCounter>> = LazyLock::new(|| {
    try_create_int_counter(
        "beacon_blobs_from_el_error_total",
        "Count of failed engine getBlobs calls",
    )
});
pub static KZG_DATA_COLUMN_RECONSTRUCTION_ATTEMPTS: LazyLock<MetricsResult<IntCounter>> =
    LazyLock::new(|| {
        try_create_int_counter(
            "kzg_data_column_reconstruction_attempts",
            "Count of data column reconstruction attempts",
        )
    });
pub static KZG_DATA_COLUMN_RECONSTRUCTION_FAILURES: LazyLock<MetricsResult<IntCounter>> =
    LazyLock::new(|| {
        try_create_int_counter(
            "kzg_data_column_reconstruction_failures",
            "Count of failed data column reconstructions",
        )
    });
pub static ARCHIVER_MIGRATION_TIMES: LazyLock<MetricsResult<Histogram>> = LazyLock::new(|| {
    try_create_histogram(
        "beacon_archiver_migration_seconds",
        "Time taken to migrate a finalized checkpoint to the archive",
    )
});
pub static HEAD_CHANGED_TOTAL: LazyLock<MetricsResult<IntCounter>> = LazyLock::new(|| {
    try_create_int_counter(
        "beacon_head_changed_total",
        "Count of canonical head updates",
    )
});
pub static REORGS_TOTAL: LazyLock<MetricsResult<IntCounter>> = LazyLock::new(|| {
    try_create_int_counter("beacon_reorgs_total", "Count of chain reorganisations")
});
