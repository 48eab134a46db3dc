use metrics::{
    Histogram, IntCounterVec, Result as MetricsResult, try_create_histogram,
    try_create_int_counter_vec,
};
use std::sync::LazyLock;

pub static DISK_DB_WRITE_BYTES: LazyLock<MetricsResult<IntCounterVec>> = LazyLock::new(|| {
    try_create_int_counter_vec(
        "store_disk_db_write_bytes_total",
        "Number of bytes attempted to be written to the on-disk DB",
        &["col"],
    )
});
pub static DISK_DB_READ_BYTES: LazyLock<MetricsResult<IntCounterVec>> = LazyLock::new(|| {
    try_create_int_counter_vec(
        "store_disk_db_read_bytes_total",
        "Number of bytes read from the on-disk DB",
        &["col"],
    )
});
pub static DISK_DB_READ_COUNT: LazyLock<MetricsResult<IntCounterVec>> = LazyLock::new(|| {
    try_create_int_counter_vec(
        "store_disk_db_read_count_total",
        "Total number of reads to the on-disk DB",
        &["col"],
    )
});
pub static DISK_DB_WRITE_COUNT: LazyLock<MetricsResult<IntCounterVec>> = LazyLock::new(|| {
    try_create_int_counter_vec(
        "store_disk_db_write_count_total",
        "Total number of writes to the on-disk DB",
        &["col"],
    )
});
pub static DISK_DB_DELETE_COUNT: LazyLock<MetricsResult<IntCounterVec>> = LazyLock::new(|| {
    try_create_int_counter_vec(
        "store_disk_db_delete_count_total",
        "Total number of deletions from the on-disk DB",
        &["col"],
    )
});
pub static DISK_DB_READ_TIMES: LazyLock<MetricsResult<Histogram>> = LazyLock::new(|| {
    try_create_histogram(
        "store_disk_db_read_seconds",
        "Time taken to write bytes to store",
    )
});
pub static DISK_DB_WRITE_TIMES: LazyLock<MetricsResult<Histogram>> = LazyLock::new(|| {
    try_create_histogram(
        "store_disk_db_write_seconds",
        "Time taken to write bytes to store",
    )
});

pub use metrics::{inc_counter_vec, start_timer};

/// Increment a counter-vec by `value`.
pub fn inc_counter_vec_by(
    counter: &MetricsResult<IntCounterVec>,
    name: &[&str],
    value: u64,
) {
    if let Ok(counter) = counter
        && let Ok(counter) = counter.get_metric_with_label_values(name)
    {
        counter.inc_by(value);
    }
}
