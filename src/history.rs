//! Drive event history.
//!
//! Appends one JSONL record per in-drive event to daily files in
//! ~/.serene-drive-history/, and can render a small per-day report.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

fn default_dir() -> PathBuf {
    dirs::home_dir()
        .expect("No home directory")
        .join(".serene-drive-history")
}

/// One logged in-drive event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveEventRecord {
    pub timestamp: String,
    pub drive_id: String,
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stress_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stress_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl DriveEventRecord {
    pub fn new(drive_id: &str, event: &str) -> Self {
        Self {
            timestamp: Local::now().format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
            drive_id: drive_id.to_string(),
            event: event.to_string(),
            stress_score: None,
            stress_level: None,
            detail: None,
        }
    }

    pub fn with_stress(mut self, score: f64, level: &str) -> Self {
        self.stress_score = Some(score);
        self.stress_level = Some(level.to_string());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Append-only event log. A disabled log drops everything, which keeps
/// tests and ephemeral runs from touching the home directory.
pub struct DriveLog {
    dir: Option<PathBuf>,
}

impl DriveLog {
    pub fn new() -> Self {
        Self {
            dir: Some(default_dir()),
        }
    }

    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }

    pub fn disabled() -> Self {
        Self { dir: None }
    }

    pub fn record(&self, record: DriveEventRecord) {
        let Some(dir) = &self.dir else { return };

        if let Err(e) = fs::create_dir_all(dir) {
            warn!("Failed to create history dir: {e}");
            return;
        }

        let date = Local::now().format("%Y-%m-%d").to_string();
        let path = dir.join(format!("{date}.jsonl"));

        let mut file = match fs::OpenOptions::new().create(true).append(true).open(&path) {
            Ok(f) => f,
            Err(e) => {
                warn!("Failed to open history file: {e}");
                return;
            }
        };

        match serde_json::to_string(&record) {
            Ok(line) => {
                if let Err(e) = writeln!(file, "{line}") {
                    warn!("Failed to write history record: {e}");
                }
            }
            Err(e) => warn!("Failed to serialize history record: {e}"),
        }
    }

    pub fn load(&self, date: &str) -> Vec<DriveEventRecord> {
        let Some(dir) = &self.dir else {
            return Vec::new();
        };
        load_records(&dir.join(format!("{date}.jsonl")))
    }

    /// Render a small per-day report of drives and interventions.
    pub fn report(&self, date: &str) -> String {
        let records = self.load(date);
        if records.is_empty() {
            return format!("No drive events for {date}.");
        }

        let total = records.len();
        let mut drives = std::collections::BTreeSet::new();
        let mut event_counts = std::collections::BTreeMap::new();
        let mut stress_sum = 0.0;
        let mut stress_n = 0usize;

        for r in &records {
            drives.insert(r.drive_id.as_str());
            *event_counts.entry(r.event.as_str()).or_insert(0u32) += 1;
            if let Some(score) = r.stress_score {
                stress_sum += score;
                stress_n += 1;
            }
        }

        let mut report = format!(
            "# Drive Report for {date}\n\n\
             - Drives: {}\n\
             - Total events: {total}\n",
            drives.len()
        );
        if stress_n > 0 {
            report.push_str(&format!(
                "- Avg stress score: {:.2}\n",
                stress_sum / stress_n as f64
            ));
        }
        report.push_str("\n## Event Types\n");
        for (event, count) in &event_counts {
            report.push_str(&format!("- {event}: {count}\n"));
        }

        report
    }
}

impl Default for DriveLog {
    fn default() -> Self {
        Self::new()
    }
}

fn load_records(path: &Path) -> Vec<DriveEventRecord> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return Vec::new(),
    };

    contents
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}
