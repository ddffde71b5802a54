use std::{error::Error, fmt};

/// The result type used across the state core.
pub type Result<T> = std::result::Result<T, StateError>;

/// Failures surfaced by the allocate/transition/merge/finalize lifecycle.
///
/// Every variant is fatal for the operation that produced it. Nothing is
/// retried internally, the invoking runtime decides what to do next.
#[derive(Debug)]
pub enum StateError {
    /// The buffer could not be sized or zeroed.
    Allocation { len: usize },

    /// A dimension parameter is outside of its domain (e.g. a zero rank).
    InvalidDimension(&'static str),

    /// A dimension slot inside a buffer does not hold a non-negative integer.
    CorruptHeader { index: usize, value: f64 },

    /// Two lengths that must agree do not.
    LengthMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },

    /// Two states do not share the same task state and cannot be combined.
    IncompatibleStates { what: &'static str, index: usize },

    /// A training row does not match the shape of the model.
    MalformedRow {
        what: &'static str,
        got: usize,
        expected: usize,
    },

    /// A factorization row points outside of the factorized matrix.
    RowIndexOutOfBounds {
        axis: &'static str,
        index: usize,
        len: usize,
    },

    /// The iteration folded in zero rows, so its metric is undefined.
    EmptyIteration,

    /// The accumulated Hessian could not be factorized.
    SingularHessian { pivot: usize },

    /// The requested combination of objective and optimizer is not available.
    Unsupported(&'static str),

    /// A training configuration could not be parsed or is invalid.
    Config(String),
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateError::Allocation { len } => {
                write!(f, "failed to allocate a state buffer of {len} elements")
            }
            StateError::InvalidDimension(msg) => write!(f, "invalid dimension: {msg}"),
            StateError::CorruptHeader { index, value } => {
                write!(f, "dimension slot {index} holds {value}, expected a non-negative integer")
            }
            StateError::LengthMismatch {
                what,
                got,
                expected,
            } => write!(f, "length mismatch for {what}: got {got}, expected {expected}"),
            StateError::IncompatibleStates { what, index } => {
                write!(f, "incompatible states: {what} differs at slot {index}")
            }
            StateError::MalformedRow {
                what,
                got,
                expected,
            } => write!(f, "malformed row: {what} has length {got}, expected {expected}"),
            StateError::RowIndexOutOfBounds { axis, index, len } => {
                write!(f, "{axis} index {index} is out of bounds for dimension {len}")
            }
            StateError::EmptyIteration => {
                write!(f, "undefined metric for empty iteration (zero rows)")
            }
            StateError::SingularHessian { pivot } => {
                write!(f, "hessian is numerically singular at pivot {pivot}")
            }
            StateError::Unsupported(msg) => write!(f, "unsupported: {msg}"),
            StateError::Config(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl Error for StateError {}

impl From<serde_json::Error> for StateError {
    fn from(value: serde_json::Error) -> Self {
        Self::Config(value.to_string())
    }
}
