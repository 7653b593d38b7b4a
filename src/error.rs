//! Error types for mpiprim

use crate::datatype::Dtype;
use crate::primitive::Strategy;
use crate::ReduceOp;
use thiserror::Error;

/// Result type for primitive and MPI operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for primitive evaluation and MPI operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A transformation needs a strategy the primitive never registered
    #[error("primitive `{primitive}` has no {strategy} rule")]
    UnregisteredStrategy {
        /// Name of the primitive
        primitive: &'static str,
        /// Strategy that was requested
        strategy: Strategy,
    },

    /// A strategy was registered twice
    #[error("primitive `{primitive}` already has a {strategy} rule")]
    AlreadyRegistered {
        /// Name of the primitive
        primitive: &'static str,
        /// Strategy that was registered again
        strategy: Strategy,
    },

    /// No native datatype exists for this dtype
    #[error("dtype {0} has no MPI datatype")]
    UnsupportedDtype(Dtype),

    /// No derivative rule exists for this combine operator
    #[error("the adjoint of recv for {0:?} is not defined")]
    UnsupportedAdjoint(ReduceOp),

    /// Operand kind does not fit the evaluation context
    #[error("cannot evaluate `{primitive}`: {detail}")]
    ContextMismatch {
        /// Name of the primitive
        primitive: &'static str,
        /// What did not match
        detail: &'static str,
    },

    /// Wrong number of operands
    #[error("`{primitive}` expects {expected} operand(s), got {actual}")]
    ArityMismatch {
        /// Name of the primitive
        primitive: &'static str,
        /// Expected operand count
        expected: usize,
        /// Actual operand count
        actual: usize,
    },

    /// Batch axis is not a dimension of the operand
    #[error("batch axis {axis} out of bounds for rank {rank}")]
    BatchAxisOutOfBounds {
        /// Requested batch axis
        axis: usize,
        /// Rank of the operand
        rank: usize,
    },

    /// MPI has already been initialized
    #[error("MPI has already been initialized")]
    AlreadyInitialized,

    /// MPI has not been initialized
    #[error("MPI has not been initialized")]
    NotInitialized,

    /// Invalid rank specified
    #[error("Invalid rank: {0}")]
    InvalidRank(i32),

    /// Invalid message tag
    #[error("Invalid tag: {0}")]
    InvalidTag(i32),

    /// Invalid communicator handle
    #[error("Invalid communicator")]
    InvalidCommunicator,

    /// Invalid buffer provided
    #[error("Invalid buffer")]
    InvalidBuffer,

    /// Invalid count specified
    #[error("Invalid count: {0}")]
    InvalidCount(i64),

    /// Incoming message is larger than the receive buffer
    #[error("message truncated: buffer holds {capacity} bytes, message has {incoming}")]
    Truncated {
        /// Size of the receive buffer in bytes
        capacity: usize,
        /// Size of the matched message in bytes
        incoming: usize,
    },

    /// Compiled program calls a routine that is not in the routine table
    #[error("no foreign routine registered for target `{0}`")]
    UnknownRoutine(String),

    /// Instruction id does not belong to the builder
    #[error("invalid instruction id {0}")]
    InvalidOp(usize),

    /// MPI error with code
    #[error("MPI error (code {0})")]
    Mpi(i32),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an error from a nonzero MPI error code.
    pub fn from_code(code: i32) -> Self {
        debug_assert_ne!(code, 0, "from_code called with success code");
        Error::Mpi(code)
    }

    /// [`Error::InvalidCount`] for an element count, saturating at `i64::MAX`.
    pub(crate) fn invalid_count(count: usize) -> Self {
        Error::InvalidCount(i64::try_from(count).unwrap_or(i64::MAX))
    }

    /// Check an MPI return code, returning Ok(()) for success.
    pub fn check(code: i32) -> Result<()> {
        if code == 0 {
            Ok(())
        } else {
            Err(Error::from_code(code))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_passes_success_through() {
        assert_eq!(Error::check(0), Ok(()));
        assert_eq!(Error::check(15), Err(Error::Mpi(15)));
    }

    #[test]
    fn invalid_count_saturates() {
        assert_eq!(Error::invalid_count(7), Error::InvalidCount(7));
        assert_eq!(Error::invalid_count(usize::MAX), Error::InvalidCount(i64::MAX));
    }

    #[test]
    fn messages_name_the_primitive() {
        let err = Error::UnregisteredStrategy {
            primitive: "recv_mpi",
            strategy: Strategy::Batch,
        };
        assert_eq!(err.to_string(), "primitive `recv_mpi` has no batch rule");
        assert_eq!(
            Error::UnsupportedDtype(Dtype::F16).to_string(),
            "dtype float16 has no MPI datatype"
        );
    }
}
