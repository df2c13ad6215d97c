//! gRPC metrics.

use metriken::{Counter, Gauge, metric};

// Connections
#[metric(
    name = "grpc_connections_active",
    description = "Number of currently open gRPC connections"
)]
pub static CONNECTIONS_ACTIVE: Gauge = Gauge::new();

// Calls
#[metric(name = "grpc_calls_started", description = "Total calls started")]
pub static CALLS_STARTED: Counter = Counter::new();

#[metric(
    name = "grpc_calls_completed",
    description = "Total calls that completed with OK"
)]
pub static CALLS_COMPLETED: Counter = Counter::new();

#[metric(
    name = "grpc_calls_failed",
    description = "Total calls that completed with a non-OK status"
)]
pub static CALLS_FAILED: Counter = Counter::new();

#[metric(
    name = "grpc_deadline_exceeded",
    description = "Total calls ended by their deadline"
)]
pub static DEADLINE_EXCEEDED: Counter = Counter::new();

// Traffic
#[metric(name = "grpc_messages_sent", description = "Total messages framed for sending")]
pub static MESSAGES_SENT: Counter = Counter::new();

#[metric(
    name = "grpc_messages_received",
    description = "Total messages received"
)]
pub static MESSAGES_RECEIVED: Counter = Counter::new();

#[metric(name = "grpc_bytes_sent", description = "Total DATA payload bytes sent")]
pub static BYTES_SENT: Counter = Counter::new();

#[metric(
    name = "grpc_bytes_received",
    description = "Total DATA payload bytes received"
)]
pub static BYTES_RECEIVED: Counter = Counter::new();

// Errors
#[metric(name = "grpc_stream_resets", description = "Total streams reset by either side")]
pub static STREAM_RESETS: Counter = Counter::new();

#[metric(
    name = "grpc_protocol_errors",
    description = "Total gRPC protocol violations by peers"
)]
pub static PROTOCOL_ERRORS: Counter = Counter::new();

/// Count a finished call under completed or failed.
pub(crate) fn record_outcome(status: &crate::Status) {
    if status.is_ok() {
        CALLS_COMPLETED.increment();
    } else {
        CALLS_FAILED.increment();
    }
}
