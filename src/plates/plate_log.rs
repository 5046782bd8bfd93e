use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use super::cache::PlateEvent;

/// Operator-facing plate log kept by the consumer of plate snapshots.
///
/// Lines read `[HH:MM:SS] Car 42 : B1234XYZ [NEW]` (UTC). `[NEW]` marks the first
/// line for a vehicle; an exact repeat of the previous line is dropped.
#[derive(Clone, Debug, Default, Serialize)]
pub struct PlateLog {
    lines: Vec<String>,
    vehicles: BTreeMap<u64, String>,
    #[serde(skip)]
    max_lines: Option<usize>,
}

impl PlateLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `max_lines` lines, dropping the oldest.
    pub fn with_max_lines(max_lines: usize) -> Self {
        Self {
            max_lines: Some(max_lines),
            ..Self::default()
        }
    }

    /// Record an event seen at `at`. Returns false if the line was a repeat.
    pub fn record(&mut self, event: &PlateEvent, at: SystemTime) -> bool {
        let is_new = !self.vehicles.contains_key(&event.track_id);
        self.vehicles.insert(event.track_id, event.text.clone());

        let tag = if is_new { " [NEW]" } else { "" };
        let line = format!(
            "[{}] Car {} : {}{}",
            clock_time(at),
            event.track_id,
            event.text,
            tag
        );
        if self.lines.last() == Some(&line) {
            return false;
        }
        self.lines.push(line);
        if let Some(max) = self.max_lines {
            if self.lines.len() > max {
                let excess = self.lines.len() - max;
                self.lines.drain(..excess);
            }
        }
        true
    }

    /// Number of distinct vehicles seen.
    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Latest text per vehicle, by track id.
    pub fn vehicles(&self) -> &BTreeMap<u64, String> {
        &self.vehicles
    }
}

/// `HH:MM:SS` in UTC.
pub(crate) fn clock_time(at: SystemTime) -> String {
    let secs = at
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
        % 86_400;
    format!("{:02}:{:02}:{:02}", secs / 3600, secs % 3600 / 60, secs % 60)
}
