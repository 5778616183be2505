use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ControlError {
    #[error("unknown servo id {0}")]
    UnknownId(u8),
    #[error("servo id {0} is already registered")]
    DuplicateId(u8),
    #[error("servo {0} is not connected")]
    NotConnected(u8),
    #[error("{what} {value} out of range for servo {id} (allowed {min}..{max})")]
    OutOfRange {
        id: u8,
        what: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },
    #[error("invalid response from servo {id}: {bytes:02X?}")]
    Protocol { id: u8, bytes: Vec<u8> },
    #[error("unsupported servo kind: {0}")]
    Unsupported(String),
    #[error("expected {expected} values, got {got}")]
    LengthMismatch { expected: usize, got: usize },
    #[error("missing motors: {0:?}")]
    MissingMotors(Vec<u8>),
    #[error("no servo answered the connection request")]
    ConnectionFailed,
    #[error("serial/bus communication error: {0}")]
    Communication(String),
    #[error("controller closed")]
    Closed,
}

impl From<std::io::Error> for ControlError {
    fn from(e: std::io::Error) -> Self {
        Self::Communication(e.to_string())
    }
}

impl From<serialport::Error> for ControlError {
    fn from(e: serialport::Error) -> Self {
        Self::Communication(e.to_string())
    }
}
