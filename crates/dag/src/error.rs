use thiserror::Error;

/// Errors surfaced by the [`crate::Coordinator`].
///
/// I/O failures pass through via `#[from]`, while the two checked failure
/// modes (precondition violation vs. platform failure) get their own
/// variants so callers can match on them instead of string-sniffing a
/// message.
#[derive(Debug, Error)]
pub enum DagError {
    #[error("staging io error: {0}")]
    Io(#[from] std::io::Error),

    /// A precondition was violated: a broken staging file, an out-of-range
    /// capacity, an oversized single write, or metadata that fails its own
    /// invariants on reopen.
    #[error("broken: {0}")]
    Broken(String),

    /// A platform primitive failed in a way that leaves no path to make
    /// progress (the flusher thread died, a synchronous fdatasync failed).
    #[error("platform failure: {0}")]
    Platform(String),
}

pub type DagResult<T> = Result<T, DagError>;
