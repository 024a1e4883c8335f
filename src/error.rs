use thiserror::Error;

/// Type alias for Result with CleanupError
pub type Result<T> = std::result::Result<T, CleanupError>;

/// Error types for the mailbox cleanup tool
#[derive(Error, Debug)]
pub enum CleanupError {
    /// No reachable server could be guessed for the address
    #[error("Could not resolve mail server: {0}")]
    ResolutionError(String),

    /// Every permitted transport-security tier failed
    #[error("Could not negotiate a connection: {0}")]
    NegotiationError(String),

    /// Credentials rejected by the server
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// The folder listing call failed
    #[error("Folder listing failed: {0}")]
    EnumerationError(String),

    /// Search or fetch failed inside one folder
    #[error("Scan of folder '{folder}' failed: {reason}")]
    ScanError { folder: String, reason: String },

    /// Archive container could not be read or written
    #[error("Archive error: {0}")]
    ArchiveIoError(String),

    /// Operator answered no at a confirmation prompt
    #[error("Declined by user")]
    UserDeclined,

    /// Server returned an error for a protocol command
    #[error("IMAP error: {0}")]
    ProtocolError(String),

    /// Bad value supplied on the command line or at a prompt
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error (file operations, terminal, sockets)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl CleanupError {
    /// Errors that abort the run immediately
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CleanupError::ResolutionError(_)
                | CleanupError::NegotiationError(_)
                | CleanupError::AuthError(_)
                | CleanupError::ConfigError(_)
        )
    }

    /// An explicit "no" from the operator is not a fault
    pub fn is_decline(&self) -> bool {
        matches!(self, CleanupError::UserDeclined)
    }
}

impl From<async_imap::error::Error> for CleanupError {
    fn from(error: async_imap::error::Error) -> Self {
        match error {
            async_imap::error::Error::Io(err) => CleanupError::IoError(err),
            other => CleanupError::ProtocolError(other.to_string()),
        }
    }
}
