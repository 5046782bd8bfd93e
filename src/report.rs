//! Periodic report: the plate log and the latest parking summary, written as
//! `report.json` and `report.txt` into the report directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::parking::OccupancySummary;
use crate::plates::{clock_time, PlateLog};

pub const REPORT_JSON: &str = "report.json";
pub const REPORT_TEXT: &str = "report.txt";

#[derive(Clone, Debug, Serialize)]
pub struct ParkingReport {
    pub available: usize,
    pub total: usize,
    pub occupancy_rate: f64,
    pub free_spots: Vec<String>,
    /// Free labels five per line, or `FULL`.
    pub free_list: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct PlateReport {
    pub vehicle_count: usize,
    pub log: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct Report {
    /// Seconds since the Unix epoch.
    pub generated_at: u64,
    pub plates: PlateReport,
    /// `None` until the parking pipeline has produced a summary.
    pub parking: Option<ParkingReport>,
}

impl Report {
    pub fn build(at: SystemTime, log: &PlateLog, parking: Option<&OccupancySummary>) -> Self {
        let generated_at = at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self {
            generated_at,
            plates: PlateReport {
                vehicle_count: log.vehicle_count(),
                log: log.lines().to_vec(),
            },
            parking: parking.map(|summary| ParkingReport {
                available: summary.available,
                total: summary.total,
                occupancy_rate: summary.occupancy_rate(),
                free_spots: summary.free_labels(),
                free_list: summary.format_free_list(),
            }),
        }
    }

    /// Plain-text rendering for operators.
    pub fn render_text(&self) -> String {
        let at = UNIX_EPOCH + Duration::from_secs(self.generated_at);
        let mut out = String::new();
        out.push_str("System Report\n");
        out.push_str(&format!("Generated {} UTC\n\n", clock_time(at)));

        out.push_str("Plate Recognition\n");
        out.push_str(&format!("Count: {}\n", self.plates.vehicle_count));
        for line in &self.plates.log {
            out.push_str(line);
            out.push('\n');
        }

        out.push_str("\nParking System\n");
        match &self.parking {
            Some(parking) => {
                out.push_str(&format!(
                    "Available Spots: {:03}/{}\n",
                    parking.available, parking.total
                ));
                out.push_str(&format!(
                    "Occupancy Rate : {:.1}%\n",
                    parking.occupancy_rate
                ));
                out.push_str(&parking.free_list);
                out.push('\n');
            }
            None => out.push_str("No data yet\n"),
        }
        out
    }
}

/// Writes reports into a directory at a fixed interval.
pub struct ReportWriter {
    dir: PathBuf,
    interval: Duration,
    last: Option<Instant>,
    written: u64,
}

impl ReportWriter {
    /// Creates `dir` if needed.
    pub fn new(dir: impl Into<PathBuf>, interval: Duration) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating report directory {}", dir.display()))?;
        Ok(Self {
            dir,
            interval,
            last: None,
            written: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// True when no report was written yet or the interval has elapsed.
    pub fn is_due(&self, now: Instant) -> bool {
        self.last
            .map_or(true, |last| now.duration_since(last) >= self.interval)
    }

    /// Write both files now.
    pub fn write(&mut self, report: &Report) -> Result<()> {
        let json = serde_json::to_string_pretty(report)?;
        write_replacing(&self.dir.join(REPORT_JSON), json.as_bytes())?;
        write_replacing(&self.dir.join(REPORT_TEXT), report.render_text().as_bytes())?;
        self.last = Some(Instant::now());
        self.written += 1;
        log::debug!("report written to {}", self.dir.display());
        Ok(())
    }

    /// Write if due. Returns whether a report was written.
    pub fn write_if_due(&mut self, now: Instant, report: impl FnOnce() -> Report) -> Result<bool> {
        if !self.is_due(now) {
            return Ok(false);
        }
        self.write(&report())?;
        Ok(true)
    }
}

// Readers never see a half-written report.
fn write_replacing(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}
