//! Broker and migration metrics.
//!
//! Everything is recorded through the `metrics` facade. The library never
//! installs a recorder; an embedding runtime that wants the numbers
//! installs one and calls [`describe_metrics`] once.
//!
//! # Example
//!
//! ```rust,no_run
//! use roam_core::telemetry::metrics::{BrokerMetrics, MigrationMetrics};
//!
//! BrokerMetrics::record_delivered("Link", 3);
//! MigrationMetrics::record_injection(true);
//! ```

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::{Duration, Instant};

pub const CHANNELS_ADDED: &str = "roam_channels_added_total";
pub const MESSAGES_DELIVERED: &str = "roam_messages_delivered_total";
pub const MESSAGES_SUPPRESSED: &str = "roam_messages_suppressed_total";
pub const MESSAGES_FORWARDED: &str = "roam_messages_forwarded_total";
pub const EVENTS_REPLAYED: &str = "roam_events_replayed_total";
pub const INJECTIONS: &str = "roam_injections_total";
pub const INJECTION_DURATION: &str = "roam_injection_duration_seconds";
pub const RUNTIME_REQUESTS: &str = "roam_runtime_requests_total";

/// Register descriptions for every metric the crate records.
pub fn describe_metrics() {
    describe_counter!(CHANNELS_ADDED, "Channels registered with the broker");
    describe_counter!(MESSAGES_DELIVERED, "Messages handed to local subscribers");
    describe_counter!(MESSAGES_SUPPRESSED, "Deliveries dropped because the channel was blocked");
    describe_counter!(MESSAGES_FORWARDED, "Messages forwarded to remote subscribers");
    describe_counter!(EVENTS_REPLAYED, "Input events replayed into containers");
    describe_counter!(INJECTIONS, "State injections by outcome");
    describe_histogram!(INJECTION_DURATION, "Wall time of one state injection call");
    describe_counter!(RUNTIME_REQUESTS, "Runtime requests handled by action and status");
    describe_counter!("roam_errors_total", "Errors by code and category");
}

/// Event broker counters.
pub struct BrokerMetrics;

impl BrokerMetrics {
    pub fn record_channel_added(kind: &str, wired: bool) {
        counter!(
            CHANNELS_ADDED,
            "kind" => kind.to_string(),
            "wired" => wired.to_string(),
        )
        .increment(1);
    }

    pub fn record_delivered(kind: &str, count: u64) {
        if count > 0 {
            counter!(MESSAGES_DELIVERED, "kind" => kind.to_string()).increment(count);
        }
    }

    pub fn record_suppressed(kind: &str) {
        counter!(MESSAGES_SUPPRESSED, "kind" => kind.to_string()).increment(1);
    }

    pub fn record_forwarded(kind: &str, count: u64) {
        if count > 0 {
            counter!(MESSAGES_FORWARDED, "kind" => kind.to_string()).increment(count);
        }
    }
}

/// State injection counters.
pub struct MigrationMetrics;

impl MigrationMetrics {
    pub fn record_replayed(event_kind: &str) {
        counter!(EVENTS_REPLAYED, "event" => event_kind.to_string()).increment(1);
    }

    pub fn record_injection(success: bool) {
        let outcome = if success { "success" } else { "failure" };
        counter!(INJECTIONS, "outcome" => outcome).increment(1);
    }
}

/// Runtime request counters.
pub struct RuntimeMetrics;

impl RuntimeMetrics {
    pub fn record_request(action: &str, success: bool) {
        let status = if success { "success" } else { "failure" };
        counter!(
            RUNTIME_REQUESTS,
            "action" => action.to_string(),
            "status" => status,
        )
        .increment(1);
    }
}

/// Times an operation and records it to a histogram when finished.
pub struct OperationTimer {
    start: Instant,
    metric: &'static str,
}

impl OperationTimer {
    /// Start timing. The metric name must be static since metric names
    /// cannot be built at runtime.
    pub fn start(metric: &'static str) -> Self {
        Self {
            start: Instant::now(),
            metric,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn finish(self) -> Duration {
        let duration = self.start.elapsed();
        histogram!(self.metric).record(duration.as_secs_f64());
        duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_harmless() {
        describe_metrics();
        BrokerMetrics::record_channel_added("Link", true);
        BrokerMetrics::record_delivered("Link", 2);
        BrokerMetrics::record_suppressed("BackLink");
        MigrationMetrics::record_replayed("TIMEREVENT");
        MigrationMetrics::record_injection(false);
        RuntimeMetrics::record_request("PREP_MIGRATE", true);
    }

    #[test]
    fn test_operation_timer() {
        let timer = OperationTimer::start(INJECTION_DURATION);
        std::thread::sleep(Duration::from_millis(5));
        assert!(timer.finish() >= Duration::from_millis(5));
    }
}
