// src/events.rs
//
// Persisted violation events, one JSON object per line. Events are
// appended and flushed as they trigger so a crash mid-run loses nothing.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct ViolationEvent {
    /// `{site}_{frame:08}_t{track_id}`
    pub event_id: String,
    pub timestamp_ms: f64,
    pub frame_num: u64,
    pub track_id: u64,
    #[serde(rename = "class")]
    pub class_name: String,
    pub violation: &'static str,
    pub dwell_frames: u32,
    pub speed_kph: f64,
}

pub const VIOLATION_TRUCK_BUS_LANE: &str = "TRUCK_BUS_LANE";

impl ViolationEvent {
    pub fn truck_bus_lane(
        site: &str,
        frame_num: u64,
        fps: f64,
        track_id: u64,
        class_name: String,
        dwell_frames: u32,
        speed_kph: Option<f64>,
    ) -> Self {
        Self {
            event_id: format!("{}_{:08}_t{}", site, frame_num, track_id),
            timestamp_ms: frame_num as f64 / fps * 1000.0,
            frame_num,
            track_id,
            class_name,
            violation: VIOLATION_TRUCK_BUS_LANE,
            dwell_frames,
            speed_kph: speed_kph.unwrap_or(0.0),
        }
    }
}

pub struct EventLog {
    file: File,
    path: PathBuf,
    count: usize,
}

impl EventLog {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating event dir {}", parent.display()))?;
        }
        let file = File::create(&path)
            .with_context(|| format!("creating event log {}", path.display()))?;
        info!("Violation events will be written to {}", path.display());
        Ok(Self {
            file,
            path,
            count: 0,
        })
    }

    pub fn append(&mut self, event: &ViolationEvent) -> Result<()> {
        let json_line = serde_json::to_string(event)?;
        writeln!(self.file, "{}", json_line)?;
        self.file.flush()?;
        self.count += 1;
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
