use std::io;
use thiserror::Error;

/// Failure reported by a board driver call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("board {serial} did not respond: {what}")]
    Communication { serial: u16, what: String },
    #[error("board {serial} rejected {what}")]
    Rejected { serial: u16, what: String },
    #[error("transfer buffer too small: need {needed} bytes, have {available}")]
    ShortBuffer { needed: usize, available: usize },
}

/// Conditions surfaced by the acquisition layer.
///
/// Hardware and calibration problems are reported once through the
/// controller's warning list and never stop a running acquisition.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AcquisitionError {
    #[error("no digitizer board found, running in demo mode")]
    HardwareUnavailable,
    #[error("board {serial}: {reason}")]
    CalibrationInvalid { serial: u16, reason: String },
    #[error("board {serial}: PLL not locked at {ghz:.3} GSPS")]
    ClockUnlocked { serial: u16, ghz: f64 },
    #[error("timed out waiting for events from the ring buffer")]
    BufferTimeout,
    #[error("board index {index} out of range ({count} boards)")]
    NoSuchBoard { index: usize, count: usize },
    #[error("malformed ring slot: {0}")]
    Decode(String),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error(transparent)]
    Ring(#[from] RingError),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingError {
    #[error("no free slot within timeout")]
    Busy,
    #[error("no committed event within timeout")]
    Empty,
    #[error("capacity {capacity} cannot hold a {max_event} byte event")]
    EventTooLarge { capacity: usize, max_event: usize },
}

/// Writing a recording failed; the recording is closed.
#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("write failed: {0}")]
    Io(#[from] io::Error),
    #[error("event has no board {0} in the time calibration")]
    MissingCalibration(usize),
    #[error("xml output failed: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("recording already closed")]
    Closed,
}

/// Reading a DRS2 stream failed. `Malformed` is the malformed binary file case.
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("malformed binary file at offset {offset}: expected {expected:?}, found {found:?}")]
    Malformed {
        expected: String,
        found: String,
        offset: usize,
    },
    #[error("channel tag {tag:?} at offset {offset} is out of range")]
    BadChannel { tag: String, offset: usize },
    #[error("no time calibration for board {board} channel {channel}")]
    MissingCalibration { board: usize, channel: usize },
    #[error(transparent)]
    Io(#[from] io::Error),
}
