//! Per-camera alert counters with gap-suppressed windows.
//!
//! Every qualifying event bumps the `immediate` counter. The three gapped
//! windows only count an event when at least 10, 30 or 60 whole seconds
//! passed since the window last counted, which shows how many alerts a
//! throttled notifier would have sent.
//!
//! Each camera's state sits behind its own mutex. The stream worker for
//! that camera and the hourly reporter are the only two parties touching
//! it, and both take the lock for their whole read-modify-write sequence.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::event::MotionEvent;

/// Gap thresholds in whole seconds, in window order.
pub const GAP_WINDOWS: [i64; 3] = [10, 30, 60];

/// One gap-suppressed counter.
#[derive(Debug, Default, Clone)]
struct GapWindow {
    threshold_secs: i64,
    count: u64,
    last_time: Option<DateTime<Local>>,
}

impl GapWindow {
    fn new(threshold_secs: i64) -> Self {
        Self {
            threshold_secs,
            ..Default::default()
        }
    }

    fn record(&mut self, now: DateTime<Local>) {
        let elapsed = self.last_time.map(|last| (now - last).num_seconds());
        if elapsed.map_or(true, |secs| secs >= self.threshold_secs) {
            self.count += 1;
            self.last_time = Some(now);
        }
    }

    fn reset(&mut self) {
        self.count = 0;
        self.last_time = None;
    }
}

/// Mutable counters of a single camera.
#[derive(Debug)]
struct AlertWindowState {
    immediate: u64,
    gaps: [GapWindow; 3],
}

impl AlertWindowState {
    fn new() -> Self {
        Self {
            immediate: 0,
            gaps: GAP_WINDOWS.map(GapWindow::new),
        }
    }

    fn record(&mut self, now: DateTime<Local>) {
        self.immediate += 1;
        for gap in &mut self.gaps {
            gap.record(now);
        }
    }

    fn counts(&self) -> AlertCounts {
        AlertCounts {
            immediate: self.immediate,
            gap10: self.gaps[0].count,
            gap30: self.gaps[1].count,
            gap60: self.gaps[2].count,
        }
    }

    fn reset(&mut self) {
        self.immediate = 0;
        for gap in &mut self.gaps {
            gap.reset();
        }
    }
}

/// Snapshot of one camera's four counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AlertCounts {
    pub immediate: u64,
    pub gap10: u64,
    pub gap30: u64,
    pub gap60: u64,
}

/// Process-wide counter registry, one lockable state per camera.
#[derive(Debug)]
pub struct AlertAggregator {
    site_name: String,
    cameras: Vec<(String, Mutex<AlertWindowState>)>,
}

impl AlertAggregator {
    /// Build the registry. Camera order is kept for reports.
    pub fn new(site_name: impl Into<String>, cameras: impl IntoIterator<Item = String>) -> Self {
        Self {
            site_name: site_name.into(),
            cameras: cameras
                .into_iter()
                .map(|name| (name, Mutex::new(AlertWindowState::new())))
                .collect(),
        }
    }

    fn state(&self, camera: &str) -> Result<MutexGuard<'_, AlertWindowState>> {
        self.cameras
            .iter()
            .find(|(name, _)| name == camera)
            .map(|(_, state)| lock(state))
            .ok_or_else(|| Error::UnknownCamera(camera.to_string()))
    }

    /// Count one qualifying event and return the alert text for it.
    pub fn record_event(
        &self,
        camera: &str,
        now: DateTime<Local>,
        event: &MotionEvent,
    ) -> Result<String> {
        self.state(camera)?.record(now);
        Ok(self.format_alert(camera, event))
    }

    /// Read every camera's counters and zero them, one camera at a time.
    pub fn snapshot_and_reset(&self) -> Vec<(String, AlertCounts)> {
        self.cameras
            .iter()
            .map(|(name, state)| {
                let mut state = lock(state);
                let counts = state.counts();
                state.reset();
                (name.clone(), counts)
            })
            .collect()
    }

    /// Current counters for `camera` without resetting them.
    pub fn counts(&self, camera: &str) -> Option<AlertCounts> {
        self.state(camera).ok().map(|s| s.counts())
    }

    fn format_alert(&self, camera: &str, event: &MotionEvent) -> String {
        format!(
            "\u{1f6a8} Motion Detected at {}!\n\
             \u{1f4c5} Time: {}\n\
             \u{1f4cd} Camera: {}\n\
             \u{1f916} Smart Motion: {}",
            self.site_name, event.locale_time, camera, event.smart_motion
        )
    }
}

/// A poisoned lock only means another worker panicked mid-update; the
/// counters are still plain integers, so keep going.
fn lock(state: &Mutex<AlertWindowState>) -> MutexGuard<'_, AlertWindowState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
    }

    fn event() -> MotionEvent {
        MotionEvent {
            locale_time: "2024-01-01 10:00:00".into(),
            smart_motion: "true".into(),
        }
    }

    fn aggregator() -> AlertAggregator {
        AlertAggregator::new("Galaxy store", ["Entrance".to_string(), "Window".to_string()])
    }

    #[test]
    fn test_spaced_events_count_everywhere() {
        let agg = aggregator();
        for i in 0..5 {
            agg.record_event("Entrance", t0() + Duration::seconds(60 * i), &event())
                .unwrap();
        }
        assert_eq!(
            agg.counts("Entrance").unwrap(),
            AlertCounts { immediate: 5, gap10: 5, gap30: 5, gap60: 5 }
        );
    }

    #[test]
    fn test_burst_is_suppressed() {
        let agg = aggregator();
        for i in 0..9 {
            agg.record_event("Entrance", t0() + Duration::seconds(i), &event())
                .unwrap();
        }
        assert_eq!(
            agg.counts("Entrance").unwrap(),
            AlertCounts { immediate: 9, gap10: 1, gap30: 1, gap60: 1 }
        );
    }

    #[test]
    fn test_windows_are_independent() {
        let agg = aggregator();
        // 0s, 10s, 20s, 30s, 40s, 50s, 60s
        for i in 0..=6 {
            agg.record_event("Entrance", t0() + Duration::seconds(10 * i), &event())
                .unwrap();
        }
        assert_eq!(
            agg.counts("Entrance").unwrap(),
            AlertCounts { immediate: 7, gap10: 7, gap30: 3, gap60: 2 }
        );
    }

    #[test]
    fn test_sub_second_differences_are_truncated() {
        let agg = aggregator();
        agg.record_event("Entrance", t0(), &event()).unwrap();
        agg.record_event("Entrance", t0() + Duration::milliseconds(9_999), &event())
            .unwrap();
        assert_eq!(agg.counts("Entrance").unwrap().gap10, 1);
        agg.record_event("Entrance", t0() + Duration::milliseconds(10_000), &event())
            .unwrap();
        assert_eq!(agg.counts("Entrance").unwrap().gap10, 2);
    }

    #[test]
    fn test_cameras_are_independent() {
        let agg = aggregator();
        agg.record_event("Entrance", t0(), &event()).unwrap();
        agg.record_event("Window", t0() + Duration::seconds(1), &event())
            .unwrap();
        assert_eq!(agg.counts("Window").unwrap().gap10, 1);
        assert_eq!(agg.counts("Entrance").unwrap().gap10, 1);
    }

    #[test]
    fn test_snapshot_and_reset() {
        let agg = aggregator();
        for i in 0..3 {
            agg.record_event("Entrance", t0() + Duration::seconds(i), &event())
                .unwrap();
        }
        let snapshot = agg.snapshot_and_reset();
        assert_eq!(snapshot[0].0, "Entrance");
        assert_eq!(
            snapshot[0].1,
            AlertCounts { immediate: 3, gap10: 1, gap30: 1, gap60: 1 }
        );
        assert_eq!(snapshot[1], ("Window".to_string(), AlertCounts::default()));

        // last_time was cleared, so an event 1s later counts in every window
        agg.record_event("Entrance", t0() + Duration::seconds(4), &event())
            .unwrap();
        assert_eq!(
            agg.counts("Entrance").unwrap(),
            AlertCounts { immediate: 1, gap10: 1, gap30: 1, gap60: 1 }
        );
    }

    #[test]
    fn test_unknown_camera() {
        let agg = aggregator();
        let err = agg.record_event("Garage", t0(), &event()).unwrap_err();
        assert!(matches!(err, Error::UnknownCamera(name) if name == "Garage"));
        assert!(agg.counts("Garage").is_none());
    }

    #[test]
    fn test_alert_text() {
        let agg = aggregator();
        let text = agg.record_event("Window", t0(), &event()).unwrap();
        assert_eq!(
            text,
            "\u{1f6a8} Motion Detected at Galaxy store!\n\
             \u{1f4c5} Time: 2024-01-01 10:00:00\n\
             \u{1f4cd} Camera: Window\n\
             \u{1f916} Smart Motion: true"
        );
    }

    #[test]
    fn test_concurrent_updates() {
        let agg = std::sync::Arc::new(aggregator());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let agg = agg.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        agg.record_event("Entrance", t0(), &event()).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let counts = agg.counts("Entrance").unwrap();
        assert_eq!(counts.immediate, 1000);
        assert_eq!(counts.gap60, 1);
    }
}
