use std::path::PathBuf;

/// Errors surfaced by dataset generation, training, model storage and inference.
#[derive(Debug, thiserror::Error)]
pub enum GradeError {
    /// Bad generator or trainer parameters.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// No file at the requested location.
    #[error("nothing found at {}", path.display())]
    NotFound { path: PathBuf },
    /// A stored model could not be decoded or failed verification.
    #[error("model artifact at {} is corrupt: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
    /// A feature record the model cannot evaluate.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    /// Failed to write command output.
    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),
}

impl GradeError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            GradeError::NotFound { path }
        } else {
            GradeError::Io { path, source }
        }
    }
}

pub type Result<T> = std::result::Result<T, GradeError>;
