use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SCTP error: {0}")]
    Sctp(#[from] webrtc_sctp::Error),

    #[error("Data channel error: {0}")]
    DataChannel(#[from] webrtc_data::Error),

    #[error("UDP transport error: {0}")]
    Util(#[from] webrtc_util::Error),

    #[error("Address resolution error: {0}")]
    Resolve(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The received stream differs from the regenerated payload.
    #[error("data mismatch at offset {offset}: expected {expected:#04x}, got {actual:#04x}")]
    Integrity { offset: u64, expected: u8, actual: u8 },

    #[error("Payload generator error: {0}")]
    Generator(String),
}

impl Error {
    /// Returns true for faults that must stop the whole process, not just a session.
    pub fn is_fatal_fault(&self) -> bool {
        matches!(self, Error::Integrity { .. } | Error::Generator(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
