//! Metric names and labels emitted by the harness.
//!
//! All metrics are emitted through the [`metrics`] facade; installing a recorder is
//! left to the embedding binary.

/// Counter: units of work committed across all workers.
pub const MQBENCH_UNITS_COMMITTED_TOTAL: &str = "mqbench_units_committed_total";

/// Counter: units of work rolled back after a failure.
pub const MQBENCH_UNITS_ROLLED_BACK_TOTAL: &str = "mqbench_units_rolled_back_total";

/// Counter: messages sent by producer workers.
pub const MQBENCH_MESSAGES_SENT_TOTAL: &str = "mqbench_messages_sent_total";

/// Counter: messages received by consumer workers.
pub const MQBENCH_MESSAGES_RECEIVED_TOTAL: &str = "mqbench_messages_received_total";

/// Histogram: seconds between a message being sent and received.
pub const MQBENCH_MESSAGE_LATENCY_SECONDS: &str = "mqbench_message_latency_seconds";

/// Gauge: 1 when the flow gate is closed, 0 when open.
pub const MQBENCH_FLOW_GATE_CLOSED: &str = "mqbench_flow_gate_closed";

/// Counter: flow gate transitions, labeled by direction.
pub const MQBENCH_FLOW_GATE_TRANSITIONS_TOTAL: &str = "mqbench_flow_gate_transitions_total";

/// Counter: depth sampling failures.
pub const MQBENCH_SAMPLING_ERRORS_TOTAL: &str = "mqbench_sampling_errors_total";

/// Label carrying the harness id.
pub const HARNESS_ID_LABEL: &str = "harness_id";

/// Label carrying the flow gate transition direction (`pause` / `resume`).
pub const DIRECTION_LABEL: &str = "direction";

/// Label carrying the worker identifier.
pub const WORKER_LABEL: &str = "worker";
