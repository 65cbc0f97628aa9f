use thiserror::Error;

#[derive(Error, Debug)]
pub enum SealError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid unlock time '{0}': expected RFC3339, e.g. 2027-01-01T00:00:00Z")]
    BadTimeFormat(String),

    #[error("unlock time must be in the future")]
    TimeNotFuture,

    #[error("unlock time predates the {0} beacon genesis")]
    TimeBeforeGenesis(String),

    #[error("cannot seal both a file and stdin; pass one input")]
    InputAmbiguous,

    #[error("no input: pass a file path or pipe data on stdin")]
    InputMissing,

    #[error("input is empty")]
    EmptyInput,

    #[error("input exceeds the {0} byte limit")]
    InputTooLarge(u64),

    #[error("--shred can only be used with file input")]
    ShredRequiresFile,

    #[error("--clear-clipboard can only be used with stdin input")]
    ClearClipboardRequiresStdin,

    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("decryption error: {0}")]
    Decryption(String),

    #[error("time authority unavailable: {0}")]
    AuthorityUnavailable(String),

    #[error("target round not yet published")]
    NotYet,

    #[error("corrupted item: {0}")]
    Corrupted(String),

    #[error("invariant violated: {0}")]
    InvariantViolated(String),

    #[error("unknown item state {0:?}")]
    UnknownState(String),

    #[error("internal fault: {0}")]
    InternalFault(String),
}

impl SealError {
    /// Errors that leave a sealed item sealed without counting as a failure.
    /// The status pipeline retries these on the next invocation.
    pub fn is_benign(&self) -> bool {
        matches!(self, SealError::AuthorityUnavailable(_) | SealError::NotYet)
    }
}

pub type Result<T> = std::result::Result<T, SealError>;
