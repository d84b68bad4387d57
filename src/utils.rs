use std::time::{Duration, Instant};

/// Logs the time spent in `l_step` since `prev` and returns the total elapsed
/// since `start`. Printed instead of logged when `verbose` is set.
pub(crate) fn trace(verbose: bool, l_type: &str, l_step: &str, start: Instant, prev: Duration) -> Duration {
    let total = start.elapsed();
    if verbose {
        println!("{} | Total={}ms | {}={:.2?}", l_type, total.as_millis(), l_step, total - prev);
    }
    else {
        log::trace!("{} | Total={:.2?} | {}={:.2?}", l_type, total, l_step, total - prev);
    }
    total
}
