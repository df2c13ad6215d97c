//! Snapshot of the registered `grpc_*` metrics.

use metriken::Value;

/// Current value of every `grpc_*` counter and gauge, sorted by name.
pub fn snapshot() -> Vec<(String, i64)> {
    let mut values: Vec<(String, i64)> = metriken::metrics()
        .iter()
        .filter(|metric| metric.name().starts_with("grpc_"))
        .filter_map(|metric| {
            let value = match metric.value()? {
                Value::Counter(v) => i64::try_from(v).unwrap_or(i64::MAX),
                Value::Gauge(v) => v,
                _ => return None,
            };
            Some((metric.name().to_string(), value))
        })
        .collect();
    values.sort();
    values
}

/// Log the snapshot, one field per metric.
pub fn log_summary() {
    for (name, value) in snapshot() {
        tracing::info!(metric = %name, value, "final metric");
    }
}
