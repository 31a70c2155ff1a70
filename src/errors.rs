use thiserror::Error;

/// Enum for errors in this crate
#[derive(Error, Debug)]
pub enum WhamError {
    /// Error returned when a builder's build() was called improperly
    #[error("Could not build WHAM estimator: {0}")]
    BuilderError(String),

    /// Error returned when an array is the wrong length
    #[error("Array of length {0} is incorrect; length should be {1}")]
    ArrayLengthMismatch(usize, usize),

    /// Error returned when a workspace cannot hold a full row or column of terms
    #[error("Workspace of length {0} is too small; at least {1} entries are needed")]
    WorkspaceTooSmall(usize, usize),

    /// Error returned when ndarray refuses a shape
    #[error("Invalid array shape")]
    Shape {
        #[allow(missing_docs)]
        #[from]
        source: ndarray::ShapeError,
    },
}

impl From<String> for WhamError {
    fn from(s: String) -> Self {
        Self::BuilderError(s)
    }
}

/// Result type for the wham-rs crate
pub type Result<T> = std::result::Result<T, WhamError>;
