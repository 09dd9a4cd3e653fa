use thiserror::Error;

/// Failures of the analytics layer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalyticsError {
    /// Variables of one result differ in length.
    #[error("variable \"{variable}\" has {found} points, expected {expected}")]
    MismatchedLengths {
        /// Offending variable.
        variable: String,
        /// Length of the first variable.
        expected: usize,
        /// Length of the offending variable.
        found: usize,
    },
    /// Contamination outside `(0, 0.5]`.
    #[error("contamination must be in (0, 0.5], got {0}")]
    InvalidContamination(f64),
}
