//! A wrapper around the `prometheus` crate that provides a global, `lazy_static` metrics
//! registry and functions to add and use the following components (more info at
//! [Prometheus docs](https://prometheus.io/docs/concepts/metric_types/)):
//!
//! - `Histogram`: used with `start_timer()` and `observe_duration()` or `observe()` to record
//!   durations (e.g., block processing time).
//! - `IntCounter`: used to represent an ideally ever-growing, never-shrinking integer (e.g.,
//!   number of block processing requests).
//! - `IntGauge`: used to represent an varying integer (e.g., number of attestations per block).
//!
//! ## Important
//!
//! Metrics will fail if two items have the same `name`. All metrics must have a unique `name`.
//! Because we use a global registry there is no namespace per crate, it's one big global space.

use prometheus::{HistogramOpts, Opts};

pub use prometheus::{
    Encoder, Gauge, Histogram, HistogramTimer, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    IntGaugeVec, Result, TextEncoder, proto::MetricFamily,
};

/// Collect all the metrics for reporting.
pub fn gather() -> Vec<prometheus::proto::MetricFamily> {
    prometheus::gather()
}

/// Attempts to create an `IntCounter`, returning `Err` if the registry does not accept the
/// counter (potentially due to naming conflict).
pub fn try_create_int_counter(name: &str, help: &str) -> Result<IntCounter> {
    let opts = Opts::new(name, help);
    let counter = IntCounter::with_opts(opts)?;
    prometheus::register(Box::new(counter.clone()))?;
    Ok(counter)
}

/// Attempts to create an `IntGauge`, returning `Err` if the registry does not accept the gauge
/// (potentially due to naming conflict).
pub fn try_create_int_gauge(name: &str, help: &str) -> Result<IntGauge> {
    let opts = Opts::new(name, help);
    let gauge = IntGauge::with_opts(opts)?;
    prometheus::register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

/// Attempts to create a `Histogram`, returning `Err` if the registry does not accept the
/// histogram (potentially due to naming conflict).
pub fn try_create_histogram(name: &str, help: &str) -> Result<Histogram> {
    let opts = HistogramOpts::new(name, help);
    let histogram = Histogram::with_opts(opts)?;
    prometheus::register(Box::new(histogram.clone()))?;
    Ok(histogram)
}

/// Attempts to create an `IntCounterVec`, returning `Err` if the registry does not accept the
/// counter (potentially due to naming conflict).
pub fn try_create_int_counter_vec(
    name: &str,
    help: &str,
    label_names: &[&str],
) -> Result<IntCounterVec> {
    let opts = Opts::new(name, help);
    let counter_vec = IntCounterVec::new(opts, label_names)?;
    prometheus::register(Box::new(counter_vec.clone()))?;
    Ok(counter_vec)
}

/// Attempts to create an `IntGaugeVec`, returning `Err` if the registry does not accept the
/// gauge (potentially due to naming conflict).
pub fn try_create_int_gauge_vec(
    name: &str,
    help: &str,
    label_names: &[&str],
) -> Result<IntGaugeVec> {
    let opts = Opts::new(name, help);
    let gauge_vec = IntGaugeVec::new(opts, label_names)?;
    prometheus::register(Box::new(gauge_vec.clone()))?;
    Ok(gauge_vec)
}

/// Attempts to create a `HistogramVec`, returning `Err` if the registry does not accept the
/// histogram (potentially due to naming conflict).
pub fn try_create_histogram_vec(
    name: &str,
    help: &str,
    label_names: &[&str],
) -> Result<HistogramVec> {
    let opts = HistogramOpts::new(name, help);
    let histogram_vec = HistogramVec::new(opts, label_names)?;
    prometheus::register(Box::new(histogram_vec.clone()))?;
    Ok(histogram_vec)
}

/// If `int_gauge.is_ok()`, returns a gauge with the given `name`.
pub fn get_int_gauge(int_gauge: &Result<IntGaugeVec>, name: &[&str]) -> Option<IntGauge> {
    Some(int_gauge.as_ref().ok()?.get_metric_with_label_values(name).ok()?)
}

/// If `histogram.is_ok()`, starts a timer with the given label values.
pub fn start_timer_vec(vec: &Result<HistogramVec>, name: &[&str]) -> Option<HistogramTimer> {
    Some(
        vec.as_ref()
            .ok()?
            .get_metric_with_label_values(name)
            .ok()?
            .start_timer(),
    )
}

/// Starts a timer for the given `Histogram`, stopping when it gets dropped or given to
/// `stop_timer(..)`.
pub fn start_timer(histogram: &Result<Histogram>) -> Option<HistogramTimer> {
    Some(histogram.as_ref().ok()?.start_timer())
}

/// Stops a timer created with `start_timer(..)`.
pub fn stop_timer(timer: Option<HistogramTimer>) {
    if let Some(t) = timer {
        t.observe_duration()
    }
}

pub fn inc_counter(counter: &Result<IntCounter>) {
    if let Ok(counter) = counter {
        counter.inc();
    }
}

pub fn inc_counter_by(counter: &Result<IntCounter>, value: u64) {
    if let Ok(counter) = counter {
        counter.inc_by(value);
    }
}

pub fn inc_counter_vec(counter: &Result<IntCounterVec>, name: &[&str]) {
    if let Ok(counter) = counter
        && let Ok(counter) = counter.get_metric_with_label_values(name)
    {
        counter.inc()
    }
}

pub fn set_gauge(gauge: &Result<IntGauge>, value: i64) {
    if let Ok(gauge) = gauge {
        gauge.set(value);
    }
}

pub fn set_gauge_vec(gauge_vec: &Result<IntGaugeVec>, name: &[&str], value: i64) {
    if let Ok(gauge_vec) = gauge_vec
        && let Ok(gauge) = gauge_vec.get_metric_with_label_values(name)
    {
        gauge.set(value)
    }
}

pub fn observe(histogram: &Result<Histogram>, value: f64) {
    if let Ok(histogram) = histogram {
        histogram.observe(value);
    }
}

pub fn observe_vec(vec: &Result<HistogramVec>, name: &[&str], value: f64) {
    if let Ok(vec) = vec
        && let Ok(histogram) = vec.get_metric_with_label_values(name)
    {
        histogram.observe(value)
    }
}

pub fn observe_duration(histogram: &Result<Histogram>, duration: std::time::Duration) {
    observe(histogram, duration.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_names_error_but_do_not_panic() {
        let first = try_create_int_counter("metrics_test_counter", "help");
        assert!(first.is_ok());
        let second = try_create_int_counter("metrics_test_counter", "help");
        assert!(second.is_err());
        // Helpers on an Err metric are no-ops.
        inc_counter(&second);
    }
}
