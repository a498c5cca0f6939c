// src/tracker.rs
//
// IoU-based multi-object tracker. Assigns stable integer identities to
// per-frame vehicle detections using geometric overlap and class equality
// only — no appearance model, no motion prediction.
//
// Matching is greedy per detection, in input order, against the live track
// set as already updated by earlier detections this frame. Two detections
// in one frame can therefore resolve to the same track id; that is the
// documented default. `exclusive_match` withholds already-claimed tracks
// from later detections in the frame.

use crate::geometry::iou;
use crate::types::{Detection, TrackedDetection, TrackerConfig};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

#[derive(Debug, Clone)]
struct Track {
    bbox: [f64; 4],
    class_name: String,
    last_seen: u64,
}

pub struct VehicleTracker {
    config: TrackerConfig,
    /// Live tracks keyed by identity. BTreeMap so that equal-IoU ties go
    /// to the oldest track, independent of hash order.
    tracks: BTreeMap<u64, Track>,
    next_id: u64,
    frame_count: u64,
}

impl VehicleTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: BTreeMap::new(),
            next_id: 1,
            frame_count: 0,
        }
    }

    pub fn current_frame(&self) -> u64 {
        self.frame_count
    }

    pub fn live_track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Process one frame of detections. Returns one record per input
    /// detection, in input order, with its resolved identity. Never fails;
    /// a detection that matches nothing simply gets a fresh identity.
    pub fn update(&mut self, detections: &[Detection]) -> Vec<TrackedDetection> {
        self.frame_count += 1;

        let mut out = Vec::with_capacity(detections.len());
        let mut claimed: HashSet<u64> = HashSet::new();

        for det in detections {
            let track_id = self.match_detection(det, &claimed);
            if self.config.exclusive_match {
                claimed.insert(track_id);
            }

            // Upsert immediately so later detections in this frame match
            // against the updated box.
            let is_new = !self.tracks.contains_key(&track_id);
            self.tracks.insert(
                track_id,
                Track {
                    bbox: det.bbox,
                    class_name: det.class_name.clone(),
                    last_seen: self.frame_count,
                },
            );
            if is_new {
                info!(
                    "New track {} ({}) at frame {}",
                    track_id, det.class_name, self.frame_count
                );
            }

            out.push(TrackedDetection {
                track_id,
                frame: self.frame_count,
                bbox: det.bbox,
                class_name: det.class_name.clone(),
                score: det.score,
            });
        }

        self.cleanup_stale_tracks();

        out
    }

    /// Best-IoU scan over live same-class tracks; falls back to a fresh
    /// identity when nothing clears `match_thresh`.
    fn match_detection(&mut self, detection: &Detection, claimed: &HashSet<u64>) -> u64 {
        let mut best_iou = 0.0;
        let mut best_track_id = None;

        for (&track_id, track) in &self.tracks {
            if track.class_name != detection.class_name {
                continue;
            }
            if self.frame_count - track.last_seen > self.config.track_buffer {
                continue;
            }
            if self.config.exclusive_match && claimed.contains(&track_id) {
                continue;
            }

            let overlap = iou(&track.bbox, &detection.bbox);
            if overlap > best_iou {
                best_iou = overlap;
                best_track_id = Some(track_id);
            }
        }

        if best_iou > self.config.match_thresh {
            if let Some(track_id) = best_track_id {
                return track_id;
            }
        }

        let new_id = self.next_id;
        self.next_id += 1;
        new_id
    }

    fn cleanup_stale_tracks(&mut self) {
        let frame = self.frame_count;
        let buffer = self.config.track_buffer;
        let before = self.tracks.len();
        self.tracks.retain(|_, t| frame - t.last_seen <= buffer);
        let removed = before - self.tracks.len();
        if removed > 0 {
            debug!("Expired {} stale track(s) at frame {}", removed, frame);
        }
    }

    pub fn reset(&mut self) {
        self.tracks.clear();
        self.next_id = 1;
        self.frame_count = 0;
    }
}
