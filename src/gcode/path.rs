//! Resolved motion geometry handed to renderers and analyzers.

use serde::{Deserialize, Serialize};

/// A point in the XY plane, in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// One straight piece of resolved motion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub start: Point2,
    pub end: Point2,
    /// `true` only for rapid (G0) positioning moves.
    pub rapid: bool,
}

impl Segment {
    pub fn is_degenerate(&self) -> bool {
        self.start == self.end
    }
}

/// Axis-aligned bounding box of a [`MotionPath`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    fn at(p: Point2) -> Self {
        Self {
            min_x: p.x,
            min_y: p.y,
            max_x: p.x,
            max_y: p.y,
        }
    }

    fn include(&mut self, p: Point2) {
        self.min_x = self.min_x.min(p.x);
        self.min_y = self.min_y.min(p.y);
        self.max_x = self.max_x.max(p.x);
        self.max_y = self.max_y.max(p.y);
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }
}

/// Append-only sequence of segments with a running bounding box.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MotionPath {
    segments: Vec<Segment>,
    bounds: Option<Bounds>,
}

impl MotionPath {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `segment` and grows the bounds. Zero-length segments are
    /// dropped.
    pub fn push(&mut self, segment: Segment) {
        if segment.is_degenerate() {
            return;
        }
        for p in [segment.start, segment.end] {
            match self.bounds.as_mut() {
                Some(b) => b.include(p),
                None => self.bounds = Some(Bounds::at(p)),
            }
        }
        self.segments.push(segment);
    }

    pub fn extend<I: IntoIterator<Item = Segment>>(&mut self, segments: I) {
        for segment in segments {
            self.push(segment);
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Bounding box of every segment endpoint, or `None` for an empty path.
    pub fn bounds(&self) -> Option<Bounds> {
        self.bounds
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(x0: f64, y0: f64, x1: f64, y1: f64) -> Segment {
        Segment {
            start: Point2::new(x0, y0),
            end: Point2::new(x1, y1),
            rapid: false,
        }
    }

    #[test]
    fn empty_path_has_no_bounds() {
        assert!(MotionPath::new().bounds().is_none());
    }

    #[test]
    fn bounds_grow_with_segments() {
        let mut path = MotionPath::new();
        path.push(seg(0.0, 0.0, 10.0, 5.0));
        path.push(seg(10.0, 5.0, -2.0, 7.0));
        let b = path.bounds().expect("bounds");
        assert_eq!((b.min_x, b.min_y, b.max_x, b.max_y), (-2.0, 0.0, 10.0, 7.0));
        assert_eq!(b.width(), 12.0);
        assert_eq!(b.height(), 7.0);
    }

    #[test]
    fn zero_length_segment_is_dropped() {
        let mut path = MotionPath::new();
        path.push(seg(1.0, 1.0, 1.0, 1.0));
        assert!(path.is_empty());
        assert!(path.bounds().is_none());
    }

    #[test]
    fn segment_serializes_camel_case() {
        let mut s = seg(0.0, 0.0, 1.0, 0.0);
        s.rapid = true;
        let value = serde_json::to_value(s).expect("serialize segment");
        assert_eq!(value["rapid"], true);
        assert_eq!(value["end"]["x"], 1.0);
    }
}
