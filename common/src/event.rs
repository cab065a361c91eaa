//! Event extraction – turns a framed record into a motion event.
//!
//! A record body looks like
//!
//! ```text
//! Code=VideoMotion;action=Start;index=0;data={
//!    "LocaleTime" : "2024-01-01 10:00:00",
//!    "SmartMotionEnable" : true
//! }
//! ```
//!
//! Only `VideoMotion` / `Start` pairs are alerts; everything else (stop
//! events, heartbeats, other codes) is ignored.

use std::sync::OnceLock;

use chrono::{DateTime, Local};
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, error, info};

use crate::alerts::AlertAggregator;

/// Placeholder for fields the camera did not send.
pub const UNKNOWN: &str = "Unknown";

const MOTION_CODE: &str = "VideoMotion";
const START_ACTION: &str = "Start";

/// The parts of a qualifying motion event that end up in the alert text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotionEvent {
    /// Camera-local display timestamp (`LocaleTime`).
    pub locale_time: String,
    /// Whether smart motion detection was on (`SmartMotionEnable`).
    pub smart_motion: String,
}

fn record_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)Code=(.*?);action=(.*?);index=(.*?);data=(\{.*\})")
            .expect("static event pattern is valid")
    })
}

/// Parse a raw record. `None` means "no alert" – unmatched records, bad
/// JSON and non-motion codes all end up here.
pub fn extract(record: &str) -> Option<MotionEvent> {
    let caps = record_pattern().captures(record)?;
    let code = &caps[1];
    let action = &caps[2];
    debug!("Parsed event data: code={code}, action={action}");

    let data: Map<String, Value> = match serde_json::from_str(&caps[4]) {
        Ok(d) => d,
        Err(e) => {
            error!("Failed to parse event data ({code}/{action}): {e}");
            return None;
        }
    };

    if code != MOTION_CODE || action != START_ACTION {
        return None;
    }

    Some(MotionEvent {
        locale_time: field_text(&data, "LocaleTime"),
        smart_motion: field_text(&data, "SmartMotionEnable"),
    })
}

/// String values verbatim, anything else as its JSON text.
fn field_text(data: &Map<String, Value>, key: &str) -> String {
    match data.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => UNKNOWN.to_string(),
        Some(other) => other.to_string(),
    }
}

/// Extract, count and format: the full path from a framed record to the
/// outbound alert text for `camera`.
pub fn process_record(
    record: &str,
    camera: &str,
    aggregator: &AlertAggregator,
    now: DateTime<Local>,
) -> Option<String> {
    let event = extract(record)?;
    match aggregator.record_event(camera, now, &event) {
        Ok(message) => {
            info!("Generated alert message for {camera} at {}", event.locale_time);
            Some(message)
        }
        Err(e) => {
            error!("Cannot record event: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: &str = "Code=VideoMotion;action=Start;index=0;data={\n   \"LocaleTime\" : \"2024-01-01 10:00:00\",\n   \"SmartMotionEnable\" : \"true\"\n}\n";

    #[test]
    fn test_extract_motion_start() {
        let event = extract(START).unwrap();
        assert_eq!(event.locale_time, "2024-01-01 10:00:00");
        assert_eq!(event.smart_motion, "true");
    }

    #[test]
    fn test_stop_is_ignored() {
        let record = START.replace("action=Start", "action=Stop");
        assert!(extract(&record).is_none());
    }

    #[test]
    fn test_other_code_is_ignored() {
        let record = START.replace("VideoMotion", "AlarmLocal");
        assert!(extract(&record).is_none());
    }

    #[test]
    fn test_unmatched_record() {
        assert!(extract("Heartbeat\n").is_none());
        assert!(extract("").is_none());
    }

    #[test]
    fn test_bad_json_is_ignored() {
        assert!(extract("Code=VideoMotion;action=Start;index=0;data={\"LocaleTime\": }").is_none());
    }

    #[test]
    fn test_missing_fields_default_to_unknown() {
        let event = extract("Code=VideoMotion;action=Start;index=0;data={}").unwrap();
        assert_eq!(event.locale_time, UNKNOWN);
        assert_eq!(event.smart_motion, UNKNOWN);
    }

    #[test]
    fn test_boolean_flag_rendered() {
        let event = extract(
            "Code=VideoMotion;action=Start;index=1;data={\"SmartMotionEnable\": false}",
        )
        .unwrap();
        assert_eq!(event.smart_motion, "false");
    }

    #[test]
    fn test_data_blob_is_greedy() {
        let record = "Code=VideoMotion;action=Start;index=0;data={\"Region\": {\"Id\": 1}, \"LocaleTime\": \"t\"}\n";
        assert_eq!(extract(record).unwrap().locale_time, "t");
    }

    #[test]
    fn test_process_record_formats_message() {
        let aggregator = AlertAggregator::new("Galaxy store", ["Entrance".to_string()]);
        let msg = process_record(START, "Entrance", &aggregator, Local::now()).unwrap();
        assert!(msg.contains("Entrance"));
        assert!(msg.contains("2024-01-01 10:00:00"));
        assert!(msg.contains("true"));
        assert_eq!(aggregator.counts("Entrance").unwrap().immediate, 1);
    }

    #[test]
    fn test_process_record_stop_yields_nothing() {
        let aggregator = AlertAggregator::new("Galaxy store", ["Entrance".to_string()]);
        let record = START.replace("action=Start", "action=Stop");
        assert!(process_record(&record, "Entrance", &aggregator, Local::now()).is_none());
        assert_eq!(aggregator.counts("Entrance").unwrap().immediate, 0);
    }
}
