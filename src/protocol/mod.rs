//! Wire vocabulary of the GRBL-style controller protocol.
//!
//! Owned by the firmware, consumed here: response classification, status
//! report parsing, realtime bytes and the `$<n>` settings the sender and the
//! limit explorer care about.

pub mod realtime;
pub mod response;
pub mod settings;

pub use realtime::Realtime;
pub use response::{is_homing_alarm, Response, StatusReport};
pub use settings::{format_number, setting_command, Axis, Direction, MachineSettings};
