use thiserror::Error;

/// Result type for geometry preparation.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building, dicing, packing or synchronizing geometry.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("{what} index {index} out of range (len {len})")]
    IndexOutOfRange {
        what: &'static str,
        index: usize,
        len: usize
    },

    #[error("malformed patch {0}: {1}")]
    MalformedPatch(usize, String),

    #[error("buffer for {what} holds {got} elements, expected {expected}")]
    BufferSize {
        what: &'static str,
        expected: usize,
        got: usize
    },

    #[error("dicing output for {what} exceeds capacity {capacity}")]
    CapacityExceeded {
        what: &'static str,
        capacity: usize
    },

    #[error("out of device memory allocating {name} ({bytes} bytes)")]
    OutOfDeviceMemory {
        name: String,
        bytes: usize
    },

    #[error("shader evaluation failed: {0}")]
    ShaderEvaluation(String),
}

impl Error {
    pub fn out_of_range(what: &'static str, index: usize, len: usize) -> Error {
        Error::IndexOutOfRange {what: what, index: index, len: len}
    }

    /// Checks that `index` addresses an element of a collection of length `len`.
    pub fn check_index(what: &'static str, index: usize, len: usize) -> Result<()> {
        if index < len {
            Ok(())
        }
        else {
            Err(Error::out_of_range(what, index, len))
        }
    }
}

/// Outcome of a long-running pass that may be cancelled through progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncStatus {
    Complete,
    Cancelled
}

impl SyncStatus {
    pub fn is_cancelled(&self) -> bool {
        *self == SyncStatus::Cancelled
    }
}
