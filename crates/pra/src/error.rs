//! Error handling, mirroring `dag::error`'s shape: a `thiserror`-derived
//! enum distinguishing precondition violations from the fatal
//! allocator-mismatch case.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PraError {
    #[error("standardised size out of range for this instance")]
    SizeOutOfRange,

    #[error("backing allocator returned offset {got}, expected {expected}")]
    Mismatch { expected: u64, got: u64 },

    #[error("slot at offset {offset} is already marked live")]
    AlreadyLive { offset: u64 },

    #[error("bin extrapolation walked off the first page")]
    PreFirstPage,

    #[error("bin extrapolation walked past the last page")]
    PastLastPage,

    #[error("page {page_id} already touched with a different size class or bias")]
    BinMismatch { page_id: u64 },
}

pub type PraResult<T> = Result<T, PraError>;
