// src/calibrate.rs
//
// Pixel-to-world coordinate transform for speed estimation.
// Two calibration modes, in order of preference:
//   - homography fit from >= 4 image/world point correspondences
//   - uniform meters-per-pixel scale (flat, fronto-parallel scenes only)
// With neither configured the transform reports uncalibrated and the
// speed estimator produces no values.

use crate::types::CalibrationConfig;
use nalgebra::{DMatrix, DVector, Matrix3};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct CameraCalibrator {
    homography: Option<Matrix3<f64>>,
    meters_per_pixel: Option<f64>,
}

impl CameraCalibrator {
    pub fn from_config(config: &CalibrationConfig) -> Self {
        let mut homography = None;

        if let Some(h) = &config.homography {
            let n = h.image_points.len().min(h.world_points.len());
            if n >= 4 {
                match fit_homography(&h.image_points[..n], &h.world_points[..n]) {
                    Some(m) => {
                        info!("Homography calibration fitted from {} point pairs", n);
                        homography = Some(m);
                    }
                    None => warn!("Homography fit failed (degenerate point set), ignoring"),
                }
            } else {
                warn!("Homography needs >= 4 point pairs, got {}; ignoring", n);
            }
        }

        let meters_per_pixel = if homography.is_none() {
            if let Some(scale) = config.meters_per_pixel {
                info!("Simple scale calibration: {} m/px", scale);
                Some(scale)
            } else {
                None
            }
        } else {
            None
        };

        if homography.is_none() && meters_per_pixel.is_none() {
            warn!("No calibration configured; speeds will not be estimated");
        }

        Self {
            homography,
            meters_per_pixel,
        }
    }

    pub fn is_calibrated(&self) -> bool {
        self.homography.is_some() || self.meters_per_pixel.is_some()
    }

    /// Map a pixel coordinate to ground-plane meters. None when
    /// uncalibrated, or when the point maps through the horizon (the
    /// perspective divide collapses).
    pub fn pixel_to_world(&self, px: f64, py: f64) -> Option<(f64, f64)> {
        if let Some(h) = &self.homography {
            let w = h[(2, 0)] * px + h[(2, 1)] * py + h[(2, 2)];
            if w.abs() < 1e-9 {
                return None;
            }
            let wx = (h[(0, 0)] * px + h[(0, 1)] * py + h[(0, 2)]) / w;
            let wy = (h[(1, 0)] * px + h[(1, 1)] * py + h[(1, 2)]) / w;
            Some((wx, wy))
        } else {
            self.meters_per_pixel
                .map(|scale| (px * scale, py * scale))
        }
    }

    pub fn distance_meters(&self, p1: (f64, f64), p2: (f64, f64)) -> f64 {
        let dx = p2.0 - p1.0;
        let dy = p2.1 - p1.1;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Direct linear transform with h33 fixed to 1: each correspondence
/// contributes two rows of an overdetermined 2n x 8 system, solved via
/// the normal equations.
fn fit_homography(image_points: &[[f64; 2]], world_points: &[[f64; 2]]) -> Option<Matrix3<f64>> {
    let n = image_points.len();
    let mut a = DMatrix::<f64>::zeros(2 * n, 8);
    let mut b = DVector::<f64>::zeros(2 * n);

    for (i, (img, world)) in image_points.iter().zip(world_points).enumerate() {
        let (x, y) = (img[0], img[1]);
        let (wx, wy) = (world[0], world[1]);

        a[(2 * i, 0)] = x;
        a[(2 * i, 1)] = y;
        a[(2 * i, 2)] = 1.0;
        a[(2 * i, 6)] = -wx * x;
        a[(2 * i, 7)] = -wx * y;
        b[2 * i] = wx;

        a[(2 * i + 1, 3)] = x;
        a[(2 * i + 1, 4)] = y;
        a[(2 * i + 1, 5)] = 1.0;
        a[(2 * i + 1, 6)] = -wy * x;
        a[(2 * i + 1, 7)] = -wy * y;
        b[2 * i + 1] = wy;
    }

    let ata = a.transpose() * &a;
    let atb = a.transpose() * b;
    let h = ata.lu().solve(&atb)?;

    Some(Matrix3::new(
        h[0], h[1], h[2], //
        h[3], h[4], h[5], //
        h[6], h[7], 1.0,
    ))
}
