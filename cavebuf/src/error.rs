//! cavebuf errors.

use std::sync::PoisonError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("no free region satisfies the requested size and address window")]
    NoSuitableRegion,

    #[error("failed committing memory at the chosen address (os error {0})")]
    CommitFailed(u32),

    #[error("failed reading {len} bytes at {addr:#x} (os error {code})")]
    Unreadable { addr: u64, len: usize, code: u32 },

    #[error("failed writing {len} bytes at {addr:#x} (os error {code})")]
    Unwritable { addr: u64, len: usize, code: u32 },

    #[error("append of {requested} bytes exceeds the {remaining} bytes remaining")]
    NoSpace { requested: u64, remaining: u64 },

    #[error("timed out waiting for the buffer lock flag to clear")]
    LockContention,

    #[error("committing memory in a remote process is not supported on this platform")]
    RemoteCommitUnsupported,

    #[error("failed opening target process (os error {0})")]
    ProcessOpenFailed(u32),

    #[error("invalid address window: min {min:#x} exceeds max {max:#x}")]
    InvalidWindow { min: u64, max: u64 },

    #[error("internal lock poisoned")]
    LockPoisoned,
}

impl<T> From<PoisonError<T>> for BufferError {
    fn from(_: PoisonError<T>) -> Self {
        Self::LockPoisoned
    }
}

pub type Result<T, E = BufferError> = std::result::Result<T, E>;
