// src/geometry.rs
//
// Axis-aligned box IoU and point-in-polygon containment.
// Pure functions, shared by the tracker and the violation checker.

/// Intersection-over-union of two axis-aligned boxes [x1, y1, x2, y2].
///
/// Returns 0.0 for disjoint boxes and for degenerate (zero-area) input
/// rather than failing — detectors occasionally emit collapsed boxes.
pub fn iou(a: &[f64; 4], b: &[f64; 4]) -> f64 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    if inter <= 0.0 {
        return 0.0;
    }

    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - inter;

    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

/// Ray-casting containment test, edge-inclusive: a point exactly on a
/// polygon edge or vertex counts as inside. Fewer than 3 vertices is not
/// a polygon and always returns false. Self-intersecting polygons are the
/// caller's problem.
pub fn point_in_polygon(point: (f64, f64), polygon: &[(f64, f64)]) -> bool {
    let n = polygon.len();
    if n < 3 {
        return false;
    }

    // Boundary check first — plain ray casting is ambiguous exactly on
    // edges, and the lane region must include its own border.
    let mut j = n - 1;
    for i in 0..n {
        if on_segment(point, polygon[j], polygon[i]) {
            return true;
        }
        j = i;
    }

    let (px, py) = point;
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = polygon[i];
        let (xj, yj) = polygon[j];
        if (yi > py) != (yj > py) && px < (xj - xi) * (py - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Whether `p` lies on the closed segment a..b, within a small tolerance.
fn on_segment(p: (f64, f64), a: (f64, f64), b: (f64, f64)) -> bool {
    const EPS: f64 = 1e-9;

    let cross = (b.0 - a.0) * (p.1 - a.1) - (b.1 - a.1) * (p.0 - a.0);
    if cross.abs() > EPS {
        return false;
    }
    let dot = (p.0 - a.0) * (b.0 - a.0) + (p.1 - a.1) * (b.1 - a.1);
    let len_sq = (b.0 - a.0).powi(2) + (b.1 - a.1).powi(2);
    dot >= -EPS && dot <= len_sq + EPS
}
