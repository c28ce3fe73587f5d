use thiserror::Error;

/// Failures surfaced on the command channel.
///
/// The taxonomy is flat: each kind wraps the underlying platform message and
/// maps to a stable wire code. All kinds are recovered at the command
/// boundary into a structured error reply.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Failed to start the scanner: {0}")]
    StartScan(String),

    #[error("Failed to stop the scanner: {0}")]
    StopScan(String),

    /// Reserved for future option validation; nothing produces it yet.
    #[error("Failed to configure the scanner: {0}")]
    Configure(String),
}

impl BridgeError {
    /// Stable code reported on the command channel.
    pub fn code(&self) -> &'static str {
        match self {
            Self::StartScan(_) => "START_SCAN_ERROR",
            Self::StopScan(_) => "STOP_SCAN_ERROR",
            Self::Configure(_) => "CONFIGURE_ERROR",
        }
    }
}
