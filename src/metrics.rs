use tracing::trace;

// Trace-based counters; the Prometheus recorder only renders what is recorded.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "atelier.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "atelier.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn branch_elapsed(branch: &'static str, elapsed_ms: u128) {
    trace!(
        target = "atelier.metrics",
        branch = branch,
        elapsed_ms = elapsed_ms as u64,
        "branch_elapsed"
    );
}
