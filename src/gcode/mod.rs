//! Motion-program interpreter used for preview and analysis.
//!
//! # Module structure
//!
//! ```text
//! gcode/
//! ├── words.rs       — comment stripping, line iteration, word tokenizer
//! ├── modal.rs       — modal parser state (units, distance mode, motion mode)
//! ├── arcs.rs        — arc center resolution and tessellation
//! ├── path.rs        — Segment / MotionPath / Bounds
//! └── interpreter.rs — line → segments, program → MotionPath
//! ```
//!
//! Nothing in this module performs I/O, and nothing in it returns an error:
//! malformed input is absorbed so partial programs still preview.

pub mod arcs;
pub mod interpreter;
pub mod modal;
pub mod path;
pub mod words;

pub use interpreter::{interpret, parse_program, MotionInterpreter};
pub use modal::{DistanceMode, ModalState, MotionMode};
pub use path::{Bounds, MotionPath, Point2, Segment};
pub use words::{iter_program_lines, strip_comments};
