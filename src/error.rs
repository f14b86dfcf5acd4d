use thiserror::Error;

/// Errors returned while configuring or loading a progressive clustering job.
///
/// Every variant except `Io`, `Csv` and `Parse` is a configuration error: it is raised by a
/// constructor, never in the middle of an iteration.
#[derive(Debug, Error)]
pub enum Error {
    /// The sample matrix has no rows or no columns.
    #[error("empty input: the sample matrix needs at least one row and one column")]
    EmptyInput,

    /// Invalid parameter value.
    #[error("invalid parameter {name}: {message}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Human-readable explanation.
        message: String,
    },

    /// Requested cluster count is incompatible with the dataset.
    #[error("invalid cluster count: requested {requested}, but dataset has {n_samples} samples")]
    InvalidClusterCount {
        /// Requested number of clusters.
        requested: usize,
        /// Number of samples in the dataset.
        n_samples: usize,
    },

    /// Rows of the input have inconsistent dimensionality.
    #[error("dimension mismatch in row {row}: expected {expected} features, found {found}")]
    DimensionMismatch {
        /// Offending row.
        row: usize,
        /// Expected dimensionality.
        expected: usize,
        /// Found dimensionality.
        found: usize,
    },

    /// A sample holds NaN or an infinity.
    #[error("non-finite value at row {row}, column {col}")]
    NonFinite { row: usize, col: usize },

    /// A cell of a delimited file is not a number.
    #[error("cannot parse {value:?} at row {row}, column {col} as a number")]
    Parse { row: usize, col: usize, value: String },

    /// A validation metric name that is not registered.
    #[error("unknown validation metric {0:?}")]
    UnknownMetric(String),

    /// An early-termination preset name that does not exist.
    #[error("unknown early-termination policy {0:?}")]
    UnknownTerminator(String),

    /// Two policies or metrics share a name.
    #[error("duplicate name {0:?}")]
    DuplicateName(String),

    /// A run index outside of `0..n_runs`.
    #[error("run index {index} out of range for an ensemble of {n_runs} runs")]
    RunIndexOutOfRange { index: usize, n_runs: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl Error {
    pub(crate) fn invalid(name: &'static str, message: impl Into<String>) -> Self {
        Error::InvalidParameter {
            name,
            message: message.into(),
        }
    }
}

/// Result type used by this crate.
pub type Result<T> = std::result::Result<T, Error>;
