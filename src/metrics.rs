//! Prometheus counters, enabled with the `metrics` feature

use once_cell::sync::Lazy;
use prometheus::{register_int_counter_vec, IntCounterVec};

static RPC_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "portfolio_rpc_requests_total",
        "Chain RPC requests by JSON-RPC method",
        &["method"]
    )
    .expect("metric definition is valid")
});

static FETCHER_RUNS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "portfolio_fetcher_runs_total",
        "Fetcher executions by outcome",
        &["status"]
    )
    .expect("metric definition is valid")
});

static REBUILD_DECISIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "portfolio_rebuild_decisions_total",
        "Program account rebuild decisions",
        &["outcome"]
    )
    .expect("metric definition is valid")
});

pub fn record_rpc_request(method: &str) {
    RPC_REQUESTS.with_label_values(&[method]).inc();
}

pub fn record_fetcher_run(status: &str) {
    FETCHER_RUNS.with_label_values(&[status]).inc();
}

pub fn record_rebuild_decision(need_rebuild: bool) {
    let outcome = if need_rebuild { "rebuild" } else { "reuse" };
    REBUILD_DECISIONS.with_label_values(&[outcome]).inc();
}

/// Text exposition of everything in the default registry
pub fn gather_text() -> String {
    use prometheus::Encoder;
    let mut buffer = Vec::new();
    let encoder = prometheus::TextEncoder::new();
    if encoder.encode(&prometheus::gather(), &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_show_up_in_exposition() {
        record_rpc_request("getProgramAccounts");
        record_rebuild_decision(true);
        let text = gather_text();
        assert!(text.contains("portfolio_rpc_requests_total"));
        assert!(text.contains("portfolio_rebuild_decisions_total"));
    }
}
