// src/violation.rs
//
// Restricted-lane violation rules with dwell-time debounce.
//
// Per track id the checker runs a small state machine: CLEAR while the
// vehicle is outside the lane (or is an allowed class), DWELLING while it
// accumulates consecutive in-lane frames, LATCHED once the dwell threshold
// is reached. The latch is sticky for the life of the identity unless
// `clear_after_frames` is configured. Report-once semantics belong to the
// caller: emit on the call where the returned dwell count equals exactly
// `dwell_frames`.

use crate::geometry::point_in_polygon;
use crate::types::ViolationConfig;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default)]
struct DwellState {
    dwell: u32,
    latched: bool,
    /// Consecutive out-of-condition frames since latching, for the
    /// optional auto-clear.
    clear_streak: u32,
}

pub struct LaneViolationChecker {
    lane_polygon: Vec<(f64, f64)>,
    dwell_frames: u32,
    classes_truck_ok: HashSet<String>,
    clear_after_frames: Option<u32>,
    dwell_states: HashMap<u64, DwellState>,
}

impl LaneViolationChecker {
    pub fn new(lane_polygon: Vec<(f64, f64)>, config: &ViolationConfig) -> Self {
        Self {
            lane_polygon,
            dwell_frames: config.dwell_frames,
            classes_truck_ok: config.classes_truck_ok.clone(),
            clear_after_frames: config.clear_after_frames,
            dwell_states: HashMap::new(),
        }
    }

    pub fn dwell_frames(&self) -> u32 {
        self.dwell_frames
    }

    pub fn get_lane_polygon(&self) -> &[(f64, f64)] {
        &self.lane_polygon
    }

    fn in_violation_condition(&self, centroid: (f64, f64), class_name: &str) -> bool {
        point_in_polygon(centroid, &self.lane_polygon)
            && !self.classes_truck_ok.contains(class_name)
    }

    /// Single-shot check with no temporal state, for still-image use.
    pub fn check_instant_violation(&self, centroid: (f64, f64), class_name: &str) -> bool {
        self.in_violation_condition(centroid, class_name)
    }

    /// Per-frame dwell check for a tracked vehicle. Returns
    /// `(is_violation, dwell_count)`; before the threshold the boolean is
    /// whatever the sticky latch says, never "true early".
    pub fn check_track_violation(
        &mut self,
        track_id: u64,
        centroid: (f64, f64),
        class_name: &str,
    ) -> (bool, u32) {
        let in_condition = self.in_violation_condition(centroid, class_name);
        let dwell_frames = self.dwell_frames;
        let clear_after = self.clear_after_frames;

        let state = self.dwell_states.entry(track_id).or_default();

        if in_condition {
            state.clear_streak = 0;
            state.dwell += 1;

            if state.dwell >= dwell_frames {
                if !state.latched {
                    state.latched = true;
                    warn!(
                        "Track {} ({}) latched in restricted lane after {} frames",
                        track_id, class_name, state.dwell
                    );
                }
                return (true, state.dwell);
            }
            (state.latched, state.dwell)
        } else {
            state.dwell = 0;

            if let (Some(clear_frames), true) = (clear_after, state.latched) {
                state.clear_streak += 1;
                if state.clear_streak >= clear_frames {
                    state.latched = false;
                    state.clear_streak = 0;
                    debug!(
                        "Track {} un-latched after {} clear frames",
                        track_id, clear_frames
                    );
                }
            }
            (state.latched, state.dwell)
        }
    }

    /// Drop all dwell state for a track id. Called by the orchestrating
    /// loop; tracker expiry does not reach in here by itself.
    pub fn reset_track(&mut self, track_id: u64) {
        self.dwell_states.remove(&track_id);
    }

    pub fn tracked_count(&self) -> usize {
        self.dwell_states.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lane() -> Vec<(f64, f64)> {
        vec![(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)]
    }

    fn checker() -> LaneViolationChecker {
        LaneViolationChecker::new(lane(), &ViolationConfig::default())
    }

    const IN_LANE: (f64, f64) = (5.0, 5.0);
    const OUT_OF_LANE: (f64, f64) = (50.0, 50.0);

    #[test]
    fn test_dwell_threshold_sequencing() {
        let mut checker = checker();
        for n in 1..=9 {
            assert_eq!(checker.check_track_violation(1, IN_LANE, "car"), (false, n));
        }
        assert_eq!(checker.check_track_violation(1, IN_LANE, "car"), (true, 10));
        assert_eq!(checker.check_track_violation(1, IN_LANE, "car"), (true, 11));
    }

    #[test]
    fn test_allowed_class_never_violates() {
        let mut checker = checker();
        for _ in 0..20 {
            assert_eq!(checker.check_track_violation(2, IN_LANE, "truck"), (false, 0));
            assert_eq!(checker.check_track_violation(3, IN_LANE, "bus"), (false, 0));
        }
    }

    #[test]
    fn test_exit_resets_counter_before_latch() {
        let mut checker = checker();
        for _ in 0..4 {
            checker.check_track_violation(1, IN_LANE, "car");
        }
        // Leaves the lane on the 5th frame: counter back to 0.
        assert_eq!(
            checker.check_track_violation(1, OUT_OF_LANE, "car"),
            (false, 0)
        );
        // A fresh run of 10 consecutive frames is required.
        for n in 1..=9 {
            assert_eq!(checker.check_track_violation(1, IN_LANE, "car"), (false, n));
        }
        assert_eq!(checker.check_track_violation(1, IN_LANE, "car"), (true, 10));
    }

    #[test]
    fn test_latch_is_sticky_after_exit() {
        let mut checker = checker();
        for _ in 0..10 {
            checker.check_track_violation(1, IN_LANE, "car");
        }
        // Gone from the lane, but the identity stays flagged.
        for _ in 0..100 {
            assert_eq!(
                checker.check_track_violation(1, OUT_OF_LANE, "car"),
                (true, 0)
            );
        }
        // Until explicitly reset.
        checker.reset_track(1);
        assert_eq!(
            checker.check_track_violation(1, OUT_OF_LANE, "car"),
            (false, 0)
        );
    }

    #[test]
    fn test_relatch_reports_threshold_edge_again() {
        let mut checker = checker();
        for _ in 0..10 {
            checker.check_track_violation(1, IN_LANE, "car");
        }
        checker.check_track_violation(1, OUT_OF_LANE, "car");
        // Second episode: dwell runs 1..10 again, crossing the == 10 edge
        // the caller keys report-once on.
        for n in 1..=10 {
            let (violation, dwell) = checker.check_track_violation(1, IN_LANE, "car");
            assert!(violation); // latch already set
            assert_eq!(dwell, n);
        }
    }

    #[test]
    fn test_clear_after_frames_unlatches() {
        let config = ViolationConfig {
            clear_after_frames: Some(3),
            ..ViolationConfig::default()
        };
        let mut checker = LaneViolationChecker::new(lane(), &config);
        for _ in 0..10 {
            checker.check_track_violation(1, IN_LANE, "car");
        }
        assert_eq!(checker.check_track_violation(1, OUT_OF_LANE, "car"), (true, 0));
        assert_eq!(checker.check_track_violation(1, OUT_OF_LANE, "car"), (true, 0));
        // Third consecutive clear frame drops the latch.
        assert_eq!(
            checker.check_track_violation(1, OUT_OF_LANE, "car"),
            (false, 0)
        );
    }

    #[test]
    fn test_instant_violation_is_pure() {
        let checker = checker();
        for _ in 0..5 {
            assert!(checker.check_instant_violation(IN_LANE, "car"));
            assert!(!checker.check_instant_violation(IN_LANE, "truck"));
            assert!(!checker.check_instant_violation(OUT_OF_LANE, "car"));
        }
    }

    #[test]
    fn test_empty_polygon_never_in_lane() {
        let mut checker = LaneViolationChecker::new(Vec::new(), &ViolationConfig::default());
        for _ in 0..20 {
            assert_eq!(checker.check_track_violation(1, IN_LANE, "car"), (false, 0));
        }
    }

    #[test]
    fn test_lane_polygon_is_exposed() {
        let checker = checker();
        assert_eq!(checker.get_lane_polygon(), lane().as_slice());
    }

    #[test]
    fn test_tracks_are_independent() {
        let mut checker = checker();
        for _ in 0..10 {
            checker.check_track_violation(1, IN_LANE, "car");
        }
        // Track 2 starts from a clean slate.
        assert_eq!(checker.check_track_violation(2, IN_LANE, "car"), (false, 1));
    }
}
