use serde::Serialize;

use crate::types::{Alert, AlertEvent};

/// Emit an alert as a single JSON line to stdout.
pub fn report_alert(alert: &Alert) {
    if let Ok(json) = serde_json::to_string(&AlertEvent::new(alert)) {
        println!("{json}");
    }
}

/// Emit any report (status, wallet list, connection checks) as pretty-printed
/// JSON to stdout.
pub fn report_pretty<T: Serialize>(value: &T) {
    if let Ok(json) = serde_json::to_string_pretty(value) {
        println!("{json}");
    }
}
