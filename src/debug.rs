use crate::value::StorageValue;
use log::{debug, info, trace};
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};

static DEBUG_MODE: AtomicBool = AtomicBool::new(false);
static TRACE_MODE: AtomicBool = AtomicBool::new(false);

/// Initialize debug mode from environment variables
///
/// - `SYNC_KIT_DEBUG=1`: Log every value written or applied as JSON
/// - `SYNC_KIT_TRACE=1`: Enable human-readable trace logging of sends, receives and ownership
///
/// Output goes through the `log` facade, so a logger must be installed to see it.
pub fn init_debug_mode() {
    let debug = env::var("SYNC_KIT_DEBUG").is_ok();
    let trace = env::var("SYNC_KIT_TRACE").is_ok();

    DEBUG_MODE.store(debug, Ordering::Relaxed);
    TRACE_MODE.store(trace, Ordering::Relaxed);

    if debug {
        info!("[SYNC-KIT] Debug mode enabled - values will be logged as JSON");
    }

    if trace {
        info!("[SYNC-KIT] Trace mode enabled - human-readable operation logs");
    }
}

/// Turn the switches on or off without touching the environment.
pub fn set_modes(debug: bool, trace: bool) {
    DEBUG_MODE.store(debug, Ordering::Relaxed);
    TRACE_MODE.store(trace, Ordering::Relaxed);
}

pub fn is_debug_enabled() -> bool {
    DEBUG_MODE.load(Ordering::Relaxed)
}

pub fn is_trace_enabled() -> bool {
    TRACE_MODE.load(Ordering::Relaxed)
}

/// Log a property value in JSON format if debug mode is enabled
pub fn log_value(label: &str, key: &str, value: &StorageValue) {
    if !is_debug_enabled() {
        return;
    }

    match serde_json::to_string(value) {
        Ok(json) => debug!("[SYNC-KIT] {} '{}': {}", label, key, json),
        Err(e) => debug!("[SYNC-KIT] Failed to serialize '{}' to JSON: {}", key, e),
    }
}

pub fn trace_send(network_id: &str, key: &str, bytes: usize, server_time: f64) {
    if !is_trace_enabled() {
        return;
    }

    trace!(
        "[SYNC-KIT] → {}.{} wrote {} at t={:.3}",
        network_id,
        key,
        format_bytes(bytes),
        server_time
    );
}

pub fn trace_receive(network_id: &str, key: &str, bytes: usize, timestamp: f64) {
    if !is_trace_enabled() {
        return;
    }

    trace!(
        "[SYNC-KIT] ← {}.{} received {} stamped t={:.3}",
        network_id,
        key,
        format_bytes(bytes),
        timestamp
    );
}

/// Trace a send deferred by a property's rate limit
pub fn trace_rate_limit(key: &str, limit: Option<f64>, last_send: Option<f64>, now: f64) {
    if !is_trace_enabled() {
        return;
    }

    let limit = limit.map_or_else(|| "unlimited".to_string(), |l| format!("{:.1}/s", l));
    let since = last_send.map_or(f64::INFINITY, |last| now - last);
    trace!(
        "[SYNC-KIT] Rate limit deferred '{}' (limit: {}, {:.3}s since last send)",
        key,
        limit,
        since
    );
}

pub fn trace_snapshot(key: &str, timestamp: f64, accepted: bool, buffered: usize) {
    if !is_trace_enabled() {
        return;
    }

    let status = if accepted { "saved" } else { "REJECTED" };
    trace!(
        "[SYNC-KIT] Snapshot for '{}' at t={:.3} {} ({} buffered)",
        key,
        timestamp,
        status,
        buffered
    );
}

pub fn trace_ownership(network_id: &str, owner: Option<&str>, mine: bool) {
    if !is_trace_enabled() {
        return;
    }

    match owner {
        Some(user) if mine => trace!("[SYNC-KIT] {} is now owned locally ({})", network_id, user),
        Some(user) => trace!("[SYNC-KIT] {} is now owned by {}", network_id, user),
        None => trace!("[SYNC-KIT] {} is now unowned", network_id),
    }
}

/// Format bytes in human-readable format (KB, MB, etc.)
pub fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;
    const GB: usize = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 bytes");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.00 GB");
    }

    #[test]
    fn test_debug_mode_initialization() {
        init_debug_mode();
        trace_send("ball", "position", 12, 0.5);
        log_value("wrote", "position", &StorageValue::Int(3));
    }
}
