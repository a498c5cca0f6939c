// src/speed.rs
//
// Speed estimation from tracked centroids. Per track id we keep a short
// ring buffer (~1 second) of world-space positions and read instantaneous
// speed off the window endpoints, then smooth with an EMA. A parallel
// pixel-space window feeds the stationary-jitter floor: a box that barely
// moves in the image reports 0 km/h regardless of what the calibration
// says.

use crate::calibrate::CameraCalibrator;
use crate::types::{Smoothing, SpeedConfig};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

pub struct SpeedEstimator {
    calibrator: CameraCalibrator,
    fps: f64,
    smoothing: Smoothing,
    ema_alpha: f64,
    min_pixels_per_sec: f64,
    report_every_n_frames: u32,
    /// Ring capacity: about one second of samples, never fewer than 10.
    max_history: usize,

    /// (frame, world_x, world_y) per live track id.
    world_positions: HashMap<u64, VecDeque<(u64, f64, f64)>>,
    /// (frame, px, py) per track id, same window, for the motion floor.
    pixel_positions: HashMap<u64, VecDeque<(u64, f64, f64)>>,
    smoothed_speeds: HashMap<u64, f64>,
    report_counters: HashMap<u64, u32>,
}

impl SpeedEstimator {
    pub fn new(calibrator: CameraCalibrator, config: &SpeedConfig, fps: f64) -> Self {
        let max_history = (fps as usize).max(10);
        Self {
            calibrator,
            fps,
            smoothing: config.smoothing,
            ema_alpha: config.ema_alpha,
            min_pixels_per_sec: config.min_pixels_per_sec,
            report_every_n_frames: config.report_every_n_frames,
            max_history,
            world_positions: HashMap::new(),
            pixel_positions: HashMap::new(),
            smoothed_speeds: HashMap::new(),
            report_counters: HashMap::new(),
        }
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrator.is_calibrated()
    }

    /// Feed one centroid observation for a track. Returns the updated
    /// smoothed speed in km/h, or None when no estimate is possible yet
    /// (uncalibrated, transform failure, or fewer than 2 samples).
    pub fn update_track(
        &mut self,
        track_id: u64,
        centroid: (f64, f64),
        frame_num: u64,
    ) -> Option<f64> {
        if !self.calibrator.is_calibrated() || self.fps <= 0.0 {
            return None;
        }
        let (world_x, world_y) = self.calibrator.pixel_to_world(centroid.0, centroid.1)?;

        let max_history = self.max_history;
        self.smoothed_speeds.entry(track_id).or_insert(0.0);

        let world = self
            .world_positions
            .entry(track_id)
            .or_insert_with(|| VecDeque::with_capacity(max_history));
        if world.len() == max_history {
            world.pop_front();
        }
        world.push_back((frame_num, world_x, world_y));

        let pixel = self
            .pixel_positions
            .entry(track_id)
            .or_insert_with(|| VecDeque::with_capacity(max_history));
        if pixel.len() == max_history {
            pixel.pop_front();
        }
        pixel.push_back((frame_num, centroid.0, centroid.1));

        if self.world_positions[&track_id].len() < 2 {
            return None;
        }

        match self.instant_speed(track_id) {
            Some(instant) => {
                let previous = self.smoothed_speeds[&track_id];
                let smoothed = match self.smoothing {
                    Smoothing::Ema => self.ema_alpha * instant + (1.0 - self.ema_alpha) * previous,
                    Smoothing::None => instant,
                }
                .max(0.0);
                self.smoothed_speeds.insert(track_id, smoothed);
                Some(smoothed)
            }
            // Zero elapsed frames between window endpoints: skip the
            // update and report the last smoothed value unchanged.
            None => Some(self.smoothed_speeds[&track_id]),
        }
    }

    /// Instantaneous speed over the whole retained window (oldest to
    /// newest endpoint, not adjacent frames). None when the endpoints
    /// share a frame number.
    fn instant_speed(&self, track_id: u64) -> Option<f64> {
        let world = &self.world_positions[&track_id];
        let (old_frame, old_x, old_y) = *world.front()?;
        let (new_frame, new_x, new_y) = *world.back()?;

        if new_frame == old_frame {
            return None;
        }
        let time_s = (new_frame - old_frame) as f64 / self.fps;

        // Pixel-motion floor over the same window.
        let pixel = &self.pixel_positions[&track_id];
        let (_, old_px, old_py) = *pixel.front()?;
        let (_, new_px, new_py) = *pixel.back()?;
        let pixel_motion = ((new_px - old_px).powi(2) + (new_py - old_py).powi(2)).sqrt();
        if pixel_motion / time_s < self.min_pixels_per_sec {
            debug!(
                "Track {} below motion floor ({:.2} px/s), clamping to 0",
                track_id,
                pixel_motion / time_s
            );
            return Some(0.0);
        }

        let distance_m = self
            .calibrator
            .distance_meters((old_x, old_y), (new_x, new_y));
        let speed_kph = distance_m / time_s * 3.6;

        Some(speed_kph.max(0.0))
    }

    /// Last smoothed speed for a track, 0.0 if unknown.
    pub fn get_speed(&self, track_id: u64) -> f64 {
        self.smoothed_speeds.get(&track_id).copied().unwrap_or(0.0)
    }

    /// Display cadence: true once every `report_every_n_frames` calls per
    /// track, so overlay consumers can avoid flickering labels.
    pub fn should_report(&mut self, track_id: u64) -> bool {
        let counter = self.report_counters.entry(track_id).or_insert(0);
        *counter += 1;
        if *counter >= self.report_every_n_frames {
            *counter = 0;
            true
        } else {
            false
        }
    }

    /// Drop all state for a track id. Not driven by tracker expiry — the
    /// orchestrating loop calls this when it decides an identity is gone.
    pub fn reset_track(&mut self, track_id: u64) {
        self.world_positions.remove(&track_id);
        self.pixel_positions.remove(&track_id);
        self.smoothed_speeds.remove(&track_id);
        self.report_counters.remove(&track_id);
    }

    pub fn tracked_count(&self) -> usize {
        self.world_positions.len()
    }
}
