// src/pipeline.rs
//
// Frame-sequential orchestrator: detections go through the tracker, then
// each tracked vehicle gets an independent speed update and violation
// check keyed on the same identity. The tracker, speed estimator and
// violation checker keep their per-id state in independent maps; expiry
// in the tracker does not cascade into the others, so the pipeline issues
// explicit resets once an identity has been silent past the track buffer.

use crate::calibrate::CameraCalibrator;
use crate::events::{EventLog, ViolationEvent};
use crate::speed::SpeedEstimator;
use crate::tracker::VehicleTracker;
use crate::types::{Config, Detection, TrackRecord};
use crate::violation::LaneViolationChecker;
use anyhow::Result;
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineStats {
    pub frames: u64,
    pub detections: u64,
    pub violation_events: usize,
}

pub struct FramePipeline {
    tracker: VehicleTracker,
    speed: SpeedEstimator,
    violations: LaneViolationChecker,
    event_log: Option<EventLog>,

    site: String,
    fps: f64,
    track_buffer: u64,
    /// Last frame each identity was emitted by the tracker, for the
    /// explicit reset cascade.
    last_emitted: HashMap<u64, u64>,
    frame_num: u64,
    stats: PipelineStats,
}

impl FramePipeline {
    pub fn new(config: &Config, event_log: Option<EventLog>) -> Result<Self> {
        config.validate()?;

        let calibrator = CameraCalibrator::from_config(&config.calibration);
        let lane_polygon: Vec<(f64, f64)> =
            config.lane.polygon.iter().map(|p| (p[0], p[1])).collect();
        if lane_polygon.is_empty() {
            warn!("No lane polygon configured; violation checks are disabled");
        }

        Ok(Self {
            tracker: VehicleTracker::new(config.tracker.clone()),
            speed: SpeedEstimator::new(calibrator, &config.speed, config.fps),
            violations: LaneViolationChecker::new(lane_polygon, &config.violation),
            event_log,
            site: config.site.clone(),
            fps: config.fps,
            track_buffer: config.tracker.track_buffer,
            last_emitted: HashMap::new(),
            frame_num: 0,
            stats: PipelineStats::default(),
        })
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Process one frame of detections. Returns one record per input
    /// detection with identity, smoothed speed and violation verdict.
    pub fn process_frame(&mut self, detections: &[Detection]) -> Result<Vec<TrackRecord>> {
        self.frame_num += 1;
        self.stats.frames += 1;
        self.stats.detections += detections.len() as u64;

        let tracked = self.tracker.update(detections);
        let mut records = Vec::with_capacity(tracked.len());

        for track in tracked {
            let centroid = track.centroid();

            let speed_kph = self.speed.update_track(track.track_id, centroid, track.frame);
            let (is_violation, dwell_count) =
                self.violations
                    .check_track_violation(track.track_id, centroid, &track.class_name);

            // Exactly one event per dwell episode, at the trigger frame.
            if is_violation && dwell_count == self.violations.dwell_frames() {
                self.emit_violation(&track.class_name, track.track_id, speed_kph)?;
            }

            self.last_emitted.insert(track.track_id, track.frame);
            records.push(TrackRecord {
                track_id: track.track_id,
                frame: track.frame,
                bbox: track.bbox,
                class_name: track.class_name,
                score: track.score,
                speed_kph,
                is_violation,
                dwell_count,
            });
        }

        self.evict_expired_state();

        Ok(records)
    }

    fn emit_violation(&mut self, class_name: &str, track_id: u64, speed_kph: Option<f64>) -> Result<()> {
        let event = ViolationEvent::truck_bus_lane(
            &self.site,
            self.frame_num,
            self.fps,
            track_id,
            class_name.to_string(),
            self.violations.dwell_frames(),
            speed_kph,
        );
        warn!(
            "VIOLATION: track {} ({}) in restricted lane at frame {} ({:.1} km/h)",
            track_id,
            class_name,
            self.frame_num,
            speed_kph.unwrap_or(0.0)
        );
        if let Some(log) = &mut self.event_log {
            log.append(&event)?;
        }
        self.stats.violation_events += 1;
        Ok(())
    }

    /// Reset speed/violation state for identities the tracker has expired.
    /// The per-component maps stay independent; this is the only place
    /// their lifecycles are reconciled.
    fn evict_expired_state(&mut self) {
        let frame = self.frame_num;
        let buffer = self.track_buffer;
        let expired: Vec<u64> = self
            .last_emitted
            .iter()
            .filter(|(_, &last)| frame - last > buffer)
            .map(|(&id, _)| id)
            .collect();

        for track_id in expired {
            debug!("Evicting per-track state for expired track {}", track_id);
            self.speed.reset_track(track_id);
            self.violations.reset_track(track_id);
            self.last_emitted.remove(&track_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CalibrationConfig, LaneConfig};

    /// Unit-square lane mapped 1:1 to meters, 30 fps.
    fn site_config() -> Config {
        let yaml = "fps: 30.0\nsite: test\n";
        let mut config: Config = serde_yaml::from_str(yaml).unwrap();
        config.lane = LaneConfig {
            polygon: vec![[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0]],
        };
        config.calibration = CalibrationConfig {
            homography: None,
            meters_per_pixel: Some(1.0),
        };
        config
    }

    fn car_at(cx: f64, cy: f64) -> Detection {
        Detection {
            bbox: [cx - 1.0, cy - 1.0, cx + 1.0, cy + 1.0],
            class_name: "car".to_string(),
            score: 0.9,
        }
    }

    #[test]
    fn test_car_in_lane_end_to_end() {
        let mut pipeline = FramePipeline::new(&site_config(), None).unwrap();

        // Frames 1-9: dwelling, not yet a violation.
        for n in 1..=9u32 {
            let records = pipeline.process_frame(&[car_at(5.0, 5.0)]).unwrap();
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].track_id, 1);
            assert!(!records[0].is_violation, "frame {} flagged early", n);
            assert_eq!(records[0].dwell_count, n);
        }

        // Frame 10: violation triggers, one event emitted.
        let records = pipeline.process_frame(&[car_at(5.0, 5.0)]).unwrap();
        assert!(records[0].is_violation);
        assert_eq!(records[0].dwell_count, 10);
        assert_eq!(pipeline.stats().violation_events, 1);

        // Frame 11: still violating, but no second event.
        let records = pipeline.process_frame(&[car_at(5.0, 5.0)]).unwrap();
        assert!(records[0].is_violation);
        assert_eq!(records[0].dwell_count, 11);
        assert_eq!(pipeline.stats().violation_events, 1);
    }

    #[test]
    fn test_allowed_class_in_lane_is_clean() {
        let mut pipeline = FramePipeline::new(&site_config(), None).unwrap();
        for _ in 0..20 {
            let truck = Detection {
                class_name: "truck".to_string(),
                ..car_at(5.0, 5.0)
            };
            let records = pipeline.process_frame(&[truck]).unwrap();
            assert!(!records[0].is_violation);
            assert_eq!(records[0].dwell_count, 0);
        }
        assert_eq!(pipeline.stats().violation_events, 0);
    }

    #[test]
    fn test_stationary_vehicle_speed_settles_to_zero() {
        let mut pipeline = FramePipeline::new(&site_config(), None).unwrap();
        let mut last_speed = None;
        for _ in 0..10 {
            let records = pipeline.process_frame(&[car_at(5.0, 5.0)]).unwrap();
            last_speed = records[0].speed_kph;
        }
        assert_eq!(last_speed, Some(0.0));
    }

    #[test]
    fn test_uncalibrated_site_reports_no_speed() {
        let mut config = site_config();
        config.calibration = CalibrationConfig::default();
        let mut pipeline = FramePipeline::new(&config, None).unwrap();
        for _ in 0..5 {
            let records = pipeline.process_frame(&[car_at(5.0, 5.0)]).unwrap();
            assert_eq!(records[0].speed_kph, None);
            // Violation checking is independent of calibration.
        }
        let records = pipeline.process_frame(&[car_at(5.0, 5.0)]).unwrap();
        assert_eq!(records[0].dwell_count, 6);
    }

    #[test]
    fn test_event_log_receives_trigger_frame_event() {
        let dir = std::env::temp_dir().join("lane_violation_pipeline_test");
        let path = dir.join("events.jsonl");
        let log = EventLog::create(&path).unwrap();
        let mut pipeline = FramePipeline::new(&site_config(), Some(log)).unwrap();

        for _ in 0..15 {
            pipeline.process_frame(&[car_at(5.0, 5.0)]).unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 1);
        let event: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(event["event_id"], "test_00000010_t1");
        assert_eq!(event["frame_num"], 10);
        assert_eq!(event["class"], "car");
        assert_eq!(event["dwell_frames"], 10);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_two_episodes_emit_two_events() {
        let mut pipeline = FramePipeline::new(&site_config(), None).unwrap();

        // Episode 1: dwell in the lane until the violation latches.
        for _ in 0..10 {
            let records = pipeline.process_frame(&[car_at(5.0, 5.0)]).unwrap();
            assert_eq!(records[0].track_id, 1);
        }
        assert_eq!(pipeline.stats().violation_events, 1);

        // Drive out of the lane in small steps so the identity survives,
        // then back in for a second dwell episode.
        let mut x = 5.0;
        while x < 12.0 {
            x += 0.5;
            let records = pipeline.process_frame(&[car_at(x, 5.0)]).unwrap();
            assert_eq!(records[0].track_id, 1);
        }
        assert_eq!(pipeline.stats().violation_events, 1);

        while x > 4.9 {
            x -= 0.5;
            let records = pipeline.process_frame(&[car_at(x, 5.0)]).unwrap();
            assert_eq!(records[0].track_id, 1);
            // Sticky latch: still reported as violating between episodes.
            assert!(records[0].is_violation);
        }
        assert_eq!(pipeline.stats().violation_events, 2);
    }

    #[test]
    fn test_expired_identity_state_is_evicted() {
        let mut config = site_config();
        config.tracker.track_buffer = 3;
        let mut pipeline = FramePipeline::new(&config, None).unwrap();

        for _ in 0..5 {
            pipeline.process_frame(&[car_at(5.0, 5.0)]).unwrap();
        }
        // Silence past the track buffer expires the identity everywhere.
        for _ in 0..5 {
            pipeline.process_frame(&[]).unwrap();
        }
        assert!(pipeline.last_emitted.is_empty());
        assert_eq!(pipeline.speed.tracked_count(), 0);
        assert_eq!(pipeline.violations.tracked_count(), 0);

        // The replacement vehicle at the same spot is a fresh identity
        // with a fresh dwell count.
        let records = pipeline.process_frame(&[car_at(5.0, 5.0)]).unwrap();
        assert_ne!(records[0].track_id, 1);
        assert_eq!(records[0].dwell_count, 1);
    }

    #[test]
    fn test_moving_violator_reports_speed_in_event() {
        // Crosses the lane at 10 m/s; dwell triggers while calibrated
        // speed is available.
        let mut config = site_config();
        config.lane = LaneConfig {
            polygon: vec![[0.0, 0.0], [200.0, 0.0], [200.0, 10.0], [0.0, 10.0]],
        };
        let mut pipeline = FramePipeline::new(&config, None).unwrap();

        let mut last = None;
        for frame in 1..=30u64 {
            let x = frame as f64 * (10.0 / 30.0);
            let records = pipeline.process_frame(&[car_at(x, 5.0)]).unwrap();
            last = Some(records[0].clone());
        }
        let last = last.unwrap();
        assert!(last.is_violation);
        assert!(last.speed_kph.unwrap() > 0.0);
        assert_eq!(pipeline.stats().violation_events, 1);
    }
}
