//! Prometheus metrics (lock-free atomics, zero allocation on hot path).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    // --- Traffic ---
    pub relay_total: AtomicU64,
    pub relay_accepted: AtomicU64,
    pub relay_rejected: AtomicU64,
    pub nonce_mismatches: AtomicU64,
    pub gas_policy_violations: AtomicU64,

    // --- Outcomes ---
    pub confirmed: AtomicU64,
    pub reverted: AtomicU64,
    pub dropped: AtomicU64,

    // --- Operator ---
    pub operator_nonce_resyncs: AtomicU64,
    pub operator_nonce_gaps_filled: AtomicU64,
    pub operator_nonce_rewinds: AtomicU64,

    // --- Latency (μs, updated via CAS) ---
    pub relay_duration_us_sum: AtomicU64,
    pub relay_duration_us_max: AtomicU64,

    // --- RPC ---
    pub rpc_failovers: AtomicU64,
    pub rpc_errors: AtomicU64,
}

impl Metrics {
    const fn new() -> Self {
        Self {
            relay_total: AtomicU64::new(0),
            relay_accepted: AtomicU64::new(0),
            relay_rejected: AtomicU64::new(0),
            nonce_mismatches: AtomicU64::new(0),
            gas_policy_violations: AtomicU64::new(0),
            confirmed: AtomicU64::new(0),
            reverted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            operator_nonce_resyncs: AtomicU64::new(0),
            operator_nonce_gaps_filled: AtomicU64::new(0),
            operator_nonce_rewinds: AtomicU64::new(0),
            relay_duration_us_sum: AtomicU64::new(0),
            relay_duration_us_max: AtomicU64::new(0),
            rpc_failovers: AtomicU64::new(0),
            rpc_errors: AtomicU64::new(0),
        }
    }

    pub fn record_relay_duration(&self, start: Instant) {
        let us = start.elapsed().as_micros() as u64;
        self.relay_duration_us_sum.fetch_add(us, Ordering::Relaxed);
        // CAS loop for max tracking
        let mut cur = self.relay_duration_us_max.load(Ordering::Relaxed);
        while us > cur {
            match self.relay_duration_us_max.compare_exchange_weak(
                cur,
                us,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => cur = actual,
            }
        }
    }

    /// Render in Prometheus text exposition format.
    pub fn render(&self, attempts_pending: usize, sends_in_flight: usize) -> String {
        let relay_total = self.relay_total.load(Ordering::Relaxed);
        let accepted = self.relay_accepted.load(Ordering::Relaxed);
        let rejected = self.relay_rejected.load(Ordering::Relaxed);
        let nonce_mismatches = self.nonce_mismatches.load(Ordering::Relaxed);
        let gas_violations = self.gas_policy_violations.load(Ordering::Relaxed);
        let confirmed = self.confirmed.load(Ordering::Relaxed);
        let reverted = self.reverted.load(Ordering::Relaxed);
        let dropped = self.dropped.load(Ordering::Relaxed);
        let resyncs = self.operator_nonce_resyncs.load(Ordering::Relaxed);
        let gaps_filled = self.operator_nonce_gaps_filled.load(Ordering::Relaxed);
        let rewinds = self.operator_nonce_rewinds.load(Ordering::Relaxed);
        let dur_sum = self.relay_duration_us_sum.load(Ordering::Relaxed);
        let dur_max = self.relay_duration_us_max.swap(0, Ordering::Relaxed);
        let rpc_failovers = self.rpc_failovers.load(Ordering::Relaxed);
        let rpc_errors = self.rpc_errors.load(Ordering::Relaxed);

        // Convert μs to seconds for Prometheus conventions
        let dur_sum_s = dur_sum as f64 / 1_000_000.0;
        let dur_max_s = dur_max as f64 / 1_000_000.0;

        format!(
            "\
# HELP relayer_relay_total Total relay requests received.\n\
# TYPE relayer_relay_total counter\n\
relayer_relay_total {relay_total}\n\
# HELP relayer_relay_accepted_total Requests submitted on-chain (HTTP 202).\n\
# TYPE relayer_relay_accepted_total counter\n\
relayer_relay_accepted_total {accepted}\n\
# HELP relayer_relay_rejected_total Requests rejected before or during submission.\n\
# TYPE relayer_relay_rejected_total counter\n\
relayer_relay_rejected_total {rejected}\n\
# HELP relayer_nonce_mismatch_total Requests whose nonce was not the forwarder's current nonce.\n\
# TYPE relayer_nonce_mismatch_total counter\n\
relayer_nonce_mismatch_total {nonce_mismatches}\n\
# HELP relayer_gas_policy_violation_total Requests refused by gas policy.\n\
# TYPE relayer_gas_policy_violation_total counter\n\
relayer_gas_policy_violation_total {gas_violations}\n\
# HELP relayer_confirmed_total Relays confirmed on-chain.\n\
# TYPE relayer_confirmed_total counter\n\
relayer_confirmed_total {confirmed}\n\
# HELP relayer_reverted_total Forwarder transactions that reverted.\n\
# TYPE relayer_reverted_total counter\n\
relayer_reverted_total {reverted}\n\
# HELP relayer_dropped_total Relays not confirmed within the timeout.\n\
# TYPE relayer_dropped_total counter\n\
relayer_dropped_total {dropped}\n\
# HELP relayer_operator_nonce_resyncs_total Operator nonce re-syncs from chain.\n\
# TYPE relayer_operator_nonce_resyncs_total counter\n\
relayer_operator_nonce_resyncs_total {resyncs}\n\
# HELP relayer_operator_nonce_gaps_filled_total Unsent operator nonces filled by self-transfer.\n\
# TYPE relayer_operator_nonce_gaps_filled_total counter\n\
relayer_operator_nonce_gaps_filled_total {gaps_filled}\n\
# HELP relayer_operator_nonce_rewinds_total Operator nonce rewinds to chain pending.\n\
# TYPE relayer_operator_nonce_rewinds_total counter\n\
relayer_operator_nonce_rewinds_total {rewinds}\n\
# HELP relayer_relay_duration_seconds_sum Total handler time (seconds).\n\
# TYPE relayer_relay_duration_seconds_sum counter\n\
relayer_relay_duration_seconds_sum {dur_sum_s:.6}\n\
# HELP relayer_relay_duration_seconds_max Max handler time since last scrape (seconds).\n\
# TYPE relayer_relay_duration_seconds_max gauge\n\
relayer_relay_duration_seconds_max {dur_max_s:.6}\n\
# HELP relayer_rpc_failovers_total RPC primary-to-fallback failovers.\n\
# TYPE relayer_rpc_failovers_total counter\n\
relayer_rpc_failovers_total {rpc_failovers}\n\
# HELP relayer_rpc_errors_total RPC errors.\n\
# TYPE relayer_rpc_errors_total counter\n\
relayer_rpc_errors_total {rpc_errors}\n\
# HELP relayer_attempts_pending Relay attempts awaiting a terminal status.\n\
# TYPE relayer_attempts_pending gauge\n\
relayer_attempts_pending {attempts_pending}\n\
# HELP relayer_sends_in_flight Submissions currently being broadcast.\n\
# TYPE relayer_sends_in_flight gauge\n\
relayer_sends_in_flight {sends_in_flight}\n"
        )
    }
}
