use thiserror::Error;

/// Errors reported by the graph construction and query entry points
///
/// Any validation failure aborts the call before work starts; no partial
/// graph is ever returned through the error path.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NndError {
    /// `k` outside the valid range for the given collection
    #[error("k = {k} is out of range; expected 1 <= k <= {max}")]
    InvalidK { k: usize, max: usize },

    /// A neighbour index referenced a point outside the collection
    #[error("neighbour index {index} out of bounds for {n_points} points")]
    IndexOutOfBounds { index: usize, n_points: usize },

    /// Input data contained NaN or infinite values
    #[error("input data contains non-finite values")]
    NonFiniteData,

    /// The metric string did not parse
    #[error("unknown metric '{0}'")]
    UnknownMetric(String),

    /// Two graphs (or a graph and a data set) disagree on shape
    #[error("shape mismatch: expected {expected} rows, got {got}")]
    ShapeMismatch { expected: usize, got: usize },

    /// `merge_nn_all` was handed an empty list
    #[error("cannot merge an empty list of graphs")]
    EmptyMergeList,
}

///////////
// Tests //
///////////
