use std::path::PathBuf;

use thiserror::Error;

use crate::{encoder::EncodeError, loader::PartitionRole, pickle::PickleError};

/// Fatal failures of the conversion, one variant per stage.
#[derive(Debug, Error)]
pub enum DumpError {
    /// The source file could not be opened or read.
    #[error("source {path} unavailable: {source}")]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The source was read but does not hold three aligned partitions.
    #[error("malformed source: {0}")]
    MalformedSource(String),

    /// A partition holds a value the encoder cannot express.
    #[error("cannot encode {partition} partition: {source}")]
    UnencodableValue {
        partition: PartitionRole,
        #[source]
        source: EncodeError,
    },

    /// A partition document could not be written.
    #[error("failed to write {path}: {source}")]
    DestinationWriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DumpError {
    /// Short name of the stage that failed.
    pub fn stage(&self) -> &'static str {
        match self {
            DumpError::SourceUnavailable { .. } => "load",
            DumpError::MalformedSource(_) => "load",
            DumpError::UnencodableValue { .. } => "encode",
            DumpError::DestinationWriteFailure { .. } => "write",
        }
    }
}

impl From<PickleError> for DumpError {
    fn from(err: PickleError) -> Self {
        DumpError::MalformedSource(err.to_string())
    }
}

pub type DumpResult<T> = std::result::Result<T, DumpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_failing_path() {
        let err = DumpError::DestinationWriteFailure {
            path: PathBuf::from("/nope/mnist_training.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let msg = format!("{err}");
        assert!(msg.contains("/nope/mnist_training.json"));
        assert!(msg.contains("denied"));
        assert_eq!(err.stage(), "write");
    }

    #[test]
    fn pickle_errors_become_malformed_source() {
        let err: DumpError = PickleError::UnexpectedEof.into();
        assert!(matches!(err, DumpError::MalformedSource(_)));
        assert_eq!(err.stage(), "load");
    }
}
