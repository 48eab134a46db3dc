/// Log at the "crit" level: an `ERROR` event on the dedicated `crit` target. Reserved for
/// conditions that indicate a logic error or imminent shutdown.
///
/// The per-level counters in this crate are incremented by the metrics layer observing the
/// `crit` target, not by the macro itself.
#[macro_export]
macro_rules! crit {
    ($($arg:tt)*) => {
        tracing::event!(target: "crit", tracing::Level::ERROR, $($arg)*)
    };
}
