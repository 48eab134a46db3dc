use metrics::{
    Histogram, IntCounter, IntGauge, Result as MetricsResult, try_create_histogram,
    try_create_int_counter, try_create_int_gauge,
};
use std::sync::LazyLock;

pub static FORK_CHOICE_PROCESS_BLOCK_TIMES: LazyLock<MetricsResult<Histogram>> =
    LazyLock::new(|| {
        try_create_histogram(
            "fork_choice_process_block_seconds",
            "Time taken to add a block to fork choice",
        )
    });
pub static FORK_CHOICE_PROCESS_ATTESTATION_TIMES: LazyLock<MetricsResult<Histogram>> =
    LazyLock::new(|| {
        try_create_histogram(
            "fork_choice_process_attestation_seconds",
            "Time taken to add an attestation to fork choice",
        )
    });
pub static FORK_CHOICE_FIND_HEAD_TIMES: LazyLock<MetricsResult<Histogram>> = LazyLock::new(|| {
    try_create_histogram(
        "fork_choice_find_head_seconds",
        "Time taken to find the fork choice head",
    )
});
pub static FORK_CHOICE_DEQUEUED_ATTESTATIONS: LazyLock<MetricsResult<IntCounter>> =
    LazyLock::new(|| {
        try_create_int_counter(
            "fork_choice_dequeued_attestations_total",
            "Count of queued attestations applied at their slot",
        )
    });
pub static FORK_CHOICE_NODES: LazyLock<MetricsResult<IntGauge>> = LazyLock::new(|| {
    try_create_int_gauge(
        "fork_choice_nodes",
        "Number of nodes tracked by proto array",
    )
});
pub static FORK_CHOICE_CHANGED_HEAD_TOTAL: LazyLock<MetricsResult<IntCounter>> =
    LazyLock::new(|| {
        try_create_int_counter(
            "fork_choice_changed_head_total",
            "Count of times the head has changed",
        )
    });
