/// Single-byte commands the controller acts on immediately, bypassing its
/// line buffer and therefore the ack-gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Realtime {
    StatusQuery,
    SoftReset,
    FeedHold,
    CycleResume,
}

impl Realtime {
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            Realtime::StatusQuery => b"?",
            Realtime::SoftReset => b"\x18",
            Realtime::FeedHold => b"!",
            Realtime::CycleResume => b"~",
        }
    }
}
