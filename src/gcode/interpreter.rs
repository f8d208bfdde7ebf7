//! Converts modal G-code lines into resolved XY segments.
//!
//! The interpreter never fails: a line without motion words produces no
//! segments, and an arc whose center cannot be resolved falls back to a
//! straight feed move between its endpoints.

use super::arcs::{center_from_offsets, center_from_radius, tessellate};
use super::modal::{ModalState, MotionMode};
use super::path::{MotionPath, Point2, Segment};
use super::words::{iter_program_lines, tokenize};

/// Arc parameters collected from one line, already scaled to millimetres.
#[derive(Debug, Default)]
struct ArcWords {
    i: Option<f64>,
    j: Option<f64>,
    r: Option<f64>,
}

/// Interprets one line against `state`, updating it in place, and returns the
/// segments the line produces.
pub fn interpret(line: &str, state: &mut ModalState) -> Vec<Segment> {
    let words = tokenize(line);
    if words.is_empty() {
        return Vec::new();
    }

    let mut x = None;
    let mut y = None;
    let mut z = None;
    let mut arc = ArcWords::default();

    for word in &words {
        match word.letter {
            'G' => state.apply_g(word.value.round() as i64),
            'X' => x = Some(word.value),
            'Y' => y = Some(word.value),
            'Z' => z = Some(word.value),
            'I' => arc.i = Some(word.value),
            'J' => arc.j = Some(word.value),
            'R' => arc.r = Some(word.value),
            _ => {}
        }
    }

    // Units must be settled by the G-words above before any length is scaled.
    let scale = state.unit_scale;
    arc.i = arc.i.map(|v| v * scale);
    arc.j = arc.j.map(|v| v * scale);
    arc.r = arc.r.map(|v| v * scale);

    let from = state.cursor;
    let mut to = from;
    if let Some(v) = x {
        to.x = state.resolve_axis(from.x, v);
    }
    if let Some(v) = y {
        to.y = state.resolve_axis(from.y, v);
    }
    if let Some(v) = z {
        to.z = state.resolve_axis(from.z, v);
    }
    state.cursor = to;

    let start = Point2::new(from.x, from.y);
    let end = Point2::new(to.x, to.y);
    if start == end {
        return Vec::new();
    }

    match state.motion_mode {
        MotionMode::None => Vec::new(),
        MotionMode::Rapid => vec![Segment {
            start,
            end,
            rapid: true,
        }],
        MotionMode::Linear => vec![Segment {
            start,
            end,
            rapid: false,
        }],
        MotionMode::ArcCw => arc_segments(start, end, &arc, true),
        MotionMode::ArcCcw => arc_segments(start, end, &arc, false),
    }
}

fn arc_segments(start: Point2, end: Point2, words: &ArcWords, clockwise: bool) -> Vec<Segment> {
    let geometry = if words.i.is_some() || words.j.is_some() {
        center_from_offsets(
            start,
            end,
            words.i.unwrap_or(0.0),
            words.j.unwrap_or(0.0),
            clockwise,
        )
    } else {
        words
            .r
            .and_then(|r| center_from_radius(start, end, r, clockwise))
    };

    match geometry {
        Some(arc) => tessellate(start, &arc),
        None => {
            tracing::debug!(
                ?start,
                ?end,
                "arc center unresolved, falling back to straight move"
            );
            vec![Segment {
                start,
                end,
                rapid: false,
            }]
        }
    }
}

/// Stateful wrapper that owns a [`ModalState`] and accumulates a
/// [`MotionPath`] line by line.
#[derive(Debug, Default)]
pub struct MotionInterpreter {
    state: ModalState,
    path: MotionPath,
}

impl MotionInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interprets `line`, appends its segments to the path and returns how
    /// many were added.
    pub fn feed_line(&mut self, line: &str) -> usize {
        let segments = interpret(line, &mut self.state);
        let before = self.path.len();
        self.path.extend(segments);
        self.path.len() - before
    }

    pub fn state(&self) -> &ModalState {
        &self.state
    }

    pub fn path(&self) -> &MotionPath {
        &self.path
    }

    pub fn into_path(self) -> MotionPath {
        self.path
    }
}

/// Interprets a whole program (comments stripped, blank lines skipped).
pub fn parse_program(text: &str) -> MotionPath {
    let mut interpreter = MotionInterpreter::new();
    for line in iter_program_lines(text) {
        interpreter.feed_line(&line);
    }
    interpreter.into_path()
}
