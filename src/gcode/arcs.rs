use std::f64::consts::{PI, TAU};

use super::path::{Point2, Segment};

/// Angular step used when tessellating arcs (11.25°).
pub const ARC_ANGLE_STEP: f64 = PI / 16.0;

/// Minimum number of chords for any arc, however short.
pub const MIN_ARC_SEGMENTS: usize = 8;

/// A resolved arc: center plus signed sweep (negative = clockwise).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArcGeometry {
    pub center: Point2,
    pub sweep: f64,
}

/// Returns the signed sweep from `start` to `end` around `center`.
///
/// Clockwise sweeps lie in `[-2π, 0)`, counter-clockwise in `(0, 2π]`.
pub fn arc_sweep(start: Point2, end: Point2, center: Point2, clockwise: bool) -> f64 {
    let a0 = (start.y - center.y).atan2(start.x - center.x);
    let a1 = (end.y - center.y).atan2(end.x - center.x);
    let mut delta = a1 - a0;

    if clockwise {
        if delta >= 0.0 {
            delta -= TAU;
        }
    } else if delta <= 0.0 {
        delta += TAU;
    }
    delta
}

/// Resolves an arc from I/J offsets (already in millimetres) relative to
/// `start`. Returns `None` when the offsets put the center on `start`.
pub fn center_from_offsets(
    start: Point2,
    end: Point2,
    i: f64,
    j: f64,
    clockwise: bool,
) -> Option<ArcGeometry> {
    if i.hypot(j) == 0.0 {
        return None;
    }
    let center = Point2::new(start.x + i, start.y + j);
    Some(ArcGeometry {
        center,
        sweep: arc_sweep(start, end, center, clockwise),
    })
}

/// Resolves an arc from a signed radius word (already in millimetres).
///
/// Two circles of radius `|r|` pass through `start` and `end`. A negative
/// `r` picks the one giving the larger sweep, a positive `r` the smaller.
/// Returns `None` when the chord is zero or longer than the diameter.
pub fn center_from_radius(
    start: Point2,
    end: Point2,
    r: f64,
    clockwise: bool,
) -> Option<ArcGeometry> {
    let radius = r.abs();
    let dx = end.x - start.x;
    let dy = end.y - start.y;
    let chord = dx.hypot(dy);
    if chord == 0.0 || radius == 0.0 || chord > 2.0 * radius {
        return None;
    }

    let mid = Point2::new((start.x + end.x) / 2.0, (start.y + end.y) / 2.0);
    let h = (radius * radius - (chord / 2.0).powi(2)).max(0.0).sqrt();
    let (ux, uy) = (-dy / chord, dx / chord);

    let candidates = [
        Point2::new(mid.x + ux * h, mid.y + uy * h),
        Point2::new(mid.x - ux * h, mid.y - uy * h),
    ];

    let use_major = r < 0.0;
    candidates
        .into_iter()
        .map(|center| ArcGeometry {
            center,
            sweep: arc_sweep(start, end, center, clockwise),
        })
        .reduce(|best, next| {
            let better = if use_major {
                next.sweep.abs() > best.sweep.abs()
            } else {
                next.sweep.abs() < best.sweep.abs()
            };
            if better {
                next
            } else {
                best
            }
        })
}

/// Number of chords used for a sweep of `sweep` radians.
pub fn segment_count(sweep: f64) -> usize {
    let proportional = (sweep.abs() / ARC_ANGLE_STEP).floor() as usize;
    proportional.max(MIN_ARC_SEGMENTS)
}

/// Tessellates an arc starting at `start` into feed segments.
pub fn tessellate(start: Point2, arc: &ArcGeometry) -> Vec<Segment> {
    let radius = (start.x - arc.center.x).hypot(start.y - arc.center.y);
    let a0 = (start.y - arc.center.y).atan2(start.x - arc.center.x);
    let steps = segment_count(arc.sweep);
    let mut segments = Vec::with_capacity(steps);
    let mut prev = start;

    for step in 1..=steps {
        let angle = a0 + arc.sweep * step as f64 / steps as f64;
        let next = Point2::new(
            arc.center.x + angle.cos() * radius,
            arc.center.y + angle.sin() * radius,
        );
        segments.push(Segment {
            start: prev,
            end: next,
            rapid: false,
        });
        prev = next;
    }

    segments
}
