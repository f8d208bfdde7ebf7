/// Millimetres per inch; the factor applied to every length in G20 mode.
pub const MM_PER_INCH: f64 = 25.4;

/// Distance mode selected by G90 / G91.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistanceMode {
    #[default]
    Absolute,
    Relative,
}

/// Active motion mode (modal group 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MotionMode {
    /// No motion word seen yet; coordinates only move the cursor.
    #[default]
    None,
    Rapid,
    Linear,
    ArcCw,
    ArcCcw,
}

impl MotionMode {
    /// Maps a G-code number to a motion mode, if it selects one.
    pub fn from_g(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Rapid),
            1 => Some(Self::Linear),
            2 => Some(Self::ArcCw),
            3 => Some(Self::ArcCcw),
            _ => None,
        }
    }
}

/// Machine position tracked by the interpreter, always in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Cursor {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Parser state that persists from one line to the next until a G-word
/// changes it.
#[derive(Debug, Clone, PartialEq)]
pub struct ModalState {
    pub distance_mode: DistanceMode,
    /// Factor converting program units to millimetres (1.0 or 25.4).
    pub unit_scale: f64,
    pub motion_mode: MotionMode,
    pub cursor: Cursor,
}

impl Default for ModalState {
    fn default() -> Self {
        Self {
            distance_mode: DistanceMode::Absolute,
            unit_scale: 1.0,
            motion_mode: MotionMode::None,
            cursor: Cursor::default(),
        }
    }
}

impl ModalState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one G-word. Codes outside the tracked groups are ignored.
    pub fn apply_g(&mut self, code: i64) {
        if let Some(mode) = MotionMode::from_g(code) {
            self.motion_mode = mode;
            return;
        }
        match code {
            20 => self.unit_scale = MM_PER_INCH,
            21 => self.unit_scale = 1.0,
            90 => self.distance_mode = DistanceMode::Absolute,
            91 => self.distance_mode = DistanceMode::Relative,
            _ => {}
        }
    }

    /// Resolves a program-unit axis value against the current modes and
    /// returns the new axis position in millimetres.
    ///
    /// The unit factor is applied before the relative delta is accumulated.
    pub fn resolve_axis(&self, current: f64, word_value: f64) -> f64 {
        let mm = word_value * self.unit_scale;
        match self.distance_mode {
            DistanceMode::Absolute => mm,
            DistanceMode::Relative => current + mm,
        }
    }

    /// Clears all modal state (program reset).
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
