// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

// Telemetry helpers for JSONL logging when the `telemetry` feature is
// enabled. Manually formats JSON to keep formatting machinery off the
// publish/notify hot path.

#[cfg(feature = "telemetry")]
fn ts_micros() -> u128 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros()
}

#[cfg(feature = "telemetry")]
fn emit(event: &str, fields: &[(&str, u64)]) {
    use std::io::Write as _;
    let mut out = std::io::stdout().lock();
    let _ = write!(
        out,
        r#"{{"timestamp_micros":{},"event":"{}""#,
        ts_micros(),
        event
    );
    for (name, value) in fields {
        let _ = write!(out, r#","{name}":{value}"#);
    }
    let _ = out.write_all(b"}\n");
}

/// Emits a publish telemetry event with the new epoch and touched-key
/// counts.
///
/// Logged as a JSON line to stdout when the `telemetry` feature is enabled.
/// Best-effort: I/O errors are ignored and timestamps fall back to 0 on
/// clock errors.
#[cfg(feature = "telemetry")]
pub fn publish(epoch: u64, touched_records: u64, touched_fields: u64) {
    emit(
        "publish",
        &[
            ("epoch", epoch),
            ("touched_records", touched_records),
            ("touched_fields", touched_fields),
        ],
    );
}

/// Emits a notify telemetry event with re-read and callback counts.
///
/// Logged as a JSON line to stdout when the `telemetry` feature is enabled.
/// Best-effort: I/O errors are ignored and timestamps fall back to 0 on
/// clock errors.
#[cfg(feature = "telemetry")]
pub fn notify(reread: u64, notified: u64, failed: u64) {
    emit(
        "notify",
        &[("reread", reread), ("notified", notified), ("failed", failed)],
    );
}

/// Emits a GC telemetry event with the evicted-record count.
///
/// Logged as a JSON line to stdout when the `telemetry` feature is enabled.
/// Best-effort: I/O errors are ignored and timestamps fall back to 0 on
/// clock errors.
#[cfg(feature = "telemetry")]
pub fn gc(evicted: u64, surviving: u64) {
    emit("gc", &[("evicted", evicted), ("surviving", surviving)]);
}
