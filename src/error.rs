// src/error.rs
//
// Error taxonomy for the detection session. Every variant is caught at the
// boundary of the component that produced it and funneled into the session
// event log; nothing here crashes the controller.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    /// Request failed or the backend returned a non-success status.
    /// The next scheduled capture tick retries naturally.
    #[error("network error: {0}")]
    Network(String),

    /// Response body was missing expected fields. Treated as zero
    /// detections for that cycle.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Frame source denied or unavailable. Capture never starts.
    #[error("frame source unavailable: {0}")]
    Permission(String),

    /// Duplex channel close/error. Never fatal; drives the reconnect
    /// state machine.
    #[error("channel error: {0}")]
    Channel(String),
}

impl ScanError {
    /// Short tag used in log lines and the event log.
    pub fn kind(&self) -> &'static str {
        match self {
            ScanError::Network(_) => "network",
            ScanError::MalformedResponse(_) => "malformed-response",
            ScanError::Permission(_) => "permission",
            ScanError::Channel(_) => "channel",
        }
    }
}
