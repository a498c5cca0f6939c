use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Frame rate of the detection stream. Must be positive.
    pub fps: f64,
    #[serde(default = "default_site")]
    pub site: String,
    #[serde(default)]
    pub io: IoConfig,
    #[serde(default)]
    pub lane: LaneConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub speed: SpeedConfig,
    #[serde(default)]
    pub violation: ViolationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_site() -> String {
    "site".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IoConfig {
    /// Directory scanned for per-frame detection streams (.jsonl).
    pub input_dir: String,
    /// Directory for violation event logs.
    pub output_dir: String,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            input_dir: "detections".to_string(),
            output_dir: "events/logs".to_string(),
        }
    }
}

/// Restricted lane region in pixel space. An empty polygon disables
/// violation checking; a non-empty polygon with fewer than 3 vertices is
/// a configuration error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LaneConfig {
    #[serde(default)]
    pub polygon: Vec<[f64; 2]>,
}

/// Pixel-to-world calibration. Homography takes precedence over the
/// simple uniform scale; with neither, speeds are not estimated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalibrationConfig {
    #[serde(default)]
    pub homography: Option<HomographyConfig>,
    #[serde(default)]
    pub meters_per_pixel: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HomographyConfig {
    /// Pixel-space reference points, paired index-wise with `world_points`.
    pub image_points: Vec<[f64; 2]>,
    /// Matching ground-plane points in meters.
    pub world_points: Vec<[f64; 2]>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Minimum IoU to reuse an existing track identity.
    #[serde(default = "default_match_thresh")]
    pub match_thresh: f64,
    /// Frames a track survives without a matching detection.
    #[serde(default = "default_track_buffer")]
    pub track_buffer: u64,
    /// When true, a track claimed by an earlier detection in the same
    /// frame is withheld from later detections. Default keeps the
    /// first-in-list-order shared-claim behavior.
    #[serde(default)]
    pub exclusive_match: bool,
}

fn default_match_thresh() -> f64 {
    0.5
}

fn default_track_buffer() -> u64 {
    30
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            match_thresh: default_match_thresh(),
            track_buffer: default_track_buffer(),
            exclusive_match: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Smoothing {
    Ema,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeedConfig {
    #[serde(default = "default_smoothing")]
    pub smoothing: Smoothing,
    #[serde(default = "default_ema_alpha")]
    pub ema_alpha: f64,
    /// Pixel displacement per second below which a track is treated as
    /// stationary, suppressing jitter from a slow-drifting box.
    #[serde(default = "default_min_pixels_per_sec")]
    pub min_pixels_per_sec: f64,
    /// Display cadence for `should_report`.
    #[serde(default = "default_report_every_n_frames")]
    pub report_every_n_frames: u32,
}

fn default_smoothing() -> Smoothing {
    Smoothing::Ema
}

fn default_ema_alpha() -> f64 {
    0.2
}

fn default_min_pixels_per_sec() -> f64 {
    3.0
}

fn default_report_every_n_frames() -> u32 {
    3
}

impl Default for SpeedConfig {
    fn default() -> Self {
        Self {
            smoothing: default_smoothing(),
            ema_alpha: default_ema_alpha(),
            min_pixels_per_sec: default_min_pixels_per_sec(),
            report_every_n_frames: default_report_every_n_frames(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationConfig {
    /// Consecutive in-lane frames before a violation latches.
    #[serde(default = "default_dwell_frames")]
    pub dwell_frames: u32,
    /// Classes allowed in the restricted lane.
    #[serde(default = "default_classes_truck_ok")]
    pub classes_truck_ok: HashSet<String>,
    /// When set, this many consecutive clear frames un-latch a track.
    /// Default keeps the latch sticky for the life of the identity.
    #[serde(default)]
    pub clear_after_frames: Option<u32>,
}

fn default_dwell_frames() -> u32 {
    10
}

fn default_classes_truck_ok() -> HashSet<String> {
    ["truck", "bus"].iter().map(|s| s.to_string()).collect()
}

impl Default for ViolationConfig {
    fn default() -> Self {
        Self {
            dwell_frames: default_dwell_frames(),
            classes_truck_ok: default_classes_truck_ok(),
            clear_after_frames: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// One detector output for one vehicle in one frame. Consumed once;
/// nothing here persists across frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    /// [x1, y1, x2, y2] in pixels, x1 < x2, y1 < y2.
    pub bbox: [f64; 4],
    pub class_name: String,
    pub score: f64,
}

impl Detection {
    pub fn centroid(&self) -> (f64, f64) {
        (
            (self.bbox[0] + self.bbox[2]) / 2.0,
            (self.bbox[1] + self.bbox[3]) / 2.0,
        )
    }
}

/// One line of a detection stream file: all detections for one frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameDetections {
    #[serde(default)]
    pub frame: u64,
    pub detections: Vec<Detection>,
}

/// A detection with its resolved track identity, as emitted by the tracker.
#[derive(Debug, Clone)]
pub struct TrackedDetection {
    pub track_id: u64,
    pub frame: u64,
    pub bbox: [f64; 4],
    pub class_name: String,
    pub score: f64,
}

impl TrackedDetection {
    pub fn centroid(&self) -> (f64, f64) {
        (
            (self.bbox[0] + self.bbox[2]) / 2.0,
            (self.bbox[1] + self.bbox[3]) / 2.0,
        )
    }
}

/// Full per-track per-frame output record: identity, geometry, speed and
/// violation verdict, for downstream rendering/logging consumers.
#[derive(Debug, Clone, Serialize)]
pub struct TrackRecord {
    pub track_id: u64,
    pub frame: u64,
    pub bbox: [f64; 4],
    pub class_name: String,
    pub score: f64,
    pub speed_kph: Option<f64>,
    pub is_violation: bool,
    pub dwell_count: u32,
}
