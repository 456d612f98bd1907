//! Error types for the serving pipeline

use thiserror::Error;

/// Result type for serving operations
pub type ServingResult<T> = Result<T, ServingError>;

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Coarse classification of a [`ServingError`].
///
/// Request handlers and tests branch on the kind, never on the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Provisioning,
    Load,
    Config,
    Shape,
    MalformedInput,
    Decode,
    Inference,
    Mapping,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Provisioning => "provisioning",
            ErrorKind::Load => "load",
            ErrorKind::Config => "config",
            ErrorKind::Shape => "shape",
            ErrorKind::MalformedInput => "malformed_input",
            ErrorKind::Decode => "decode",
            ErrorKind::Inference => "inference",
            ErrorKind::Mapping => "mapping",
        }
    }
}

/// Errors that can occur while provisioning, loading or running the classifier
#[derive(Error, Debug)]
pub enum ServingError {
    /// Remote artifact could not be fetched or failed verification
    #[error("Provisioning error: {message}")]
    Provisioning {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Local artifact is missing, corrupt or incompatible with its format
    #[error("Load error: {message}")]
    Load {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Static configuration is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// Input tensor does not have the shape the model expects
    #[error("Shape error: model expects {expected:?}, got {actual:?}")]
    Shape {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Input of the wrong modality for the loaded model
    #[error("Shape error: model accepts {expected} input, got {actual}")]
    InputKindMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// A numeric token could not be parsed
    #[error("Malformed numeric token at position {position}: '{token}'")]
    MalformedToken { position: usize, token: String },

    /// Image bytes could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Image has a channel layout the preprocessor cannot produce
    #[error("Unsupported channel count: {0}")]
    UnsupportedChannels(u8),

    /// The forward pass failed or produced unusable output
    #[error("Inference error: {0}")]
    Inference(String),

    /// Predicted index has no corresponding label
    #[error("Mapping error: predicted index {index} is out of range for {labels} labels")]
    IndexOutOfRange { index: usize, labels: usize },

    /// Model produced a different number of scores than there are labels
    #[error("Mapping error: model produced {scores} scores for {labels} labels")]
    WidthMismatch { scores: usize, labels: usize },

    /// Label has no reference link
    #[error("Mapping error: no reference link for label '{0}'")]
    MissingReference(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServingError {
    pub fn provisioning(message: impl Into<String>) -> Self {
        ServingError::Provisioning {
            message: message.into(),
            source: None,
        }
    }

    pub fn provisioning_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ServingError::Provisioning {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn load(message: impl Into<String>) -> Self {
        ServingError::Load {
            message: message.into(),
            source: None,
        }
    }

    pub fn load_with_source(
        message: impl Into<String>,
        source: impl Into<BoxedSource>,
    ) -> Self {
        ServingError::Load {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        ServingError::Config(message.into())
    }

    pub fn inference(message: impl Into<String>) -> Self {
        ServingError::Inference(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ServingError::Provisioning { .. } => ErrorKind::Provisioning,
            ServingError::Load { .. } | ServingError::Io(_) => ErrorKind::Load,
            ServingError::Config(_) => ErrorKind::Config,
            ServingError::Shape { .. } | ServingError::InputKindMismatch { .. } => {
                ErrorKind::Shape
            }
            ServingError::MalformedToken { .. } => ErrorKind::MalformedInput,
            ServingError::Decode(_) | ServingError::UnsupportedChannels(_) => ErrorKind::Decode,
            ServingError::Inference(_) => ErrorKind::Inference,
            ServingError::IndexOutOfRange { .. }
            | ServingError::WidthMismatch { .. }
            | ServingError::MissingReference(_) => ErrorKind::Mapping,
        }
    }

    /// Whether the error must stop the process before it serves anything
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Provisioning | ErrorKind::Load | ErrorKind::Config
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_errors_are_fatal() {
        assert!(ServingError::provisioning("empty body").is_fatal());
        assert!(ServingError::load("bad graph").is_fatal());
        assert!(ServingError::config("labels").is_fatal());
    }

    #[test]
    fn request_errors_are_recoverable() {
        let errors = [
            ServingError::Shape {
                expected: vec![1, 4],
                actual: vec![1, 3],
            },
            ServingError::MalformedToken {
                position: 0,
                token: "x".into(),
            },
            ServingError::Decode("truncated".into()),
            ServingError::inference("nan"),
            ServingError::IndexOutOfRange {
                index: 7,
                labels: 4,
            },
        ];
        for err in errors {
            assert!(!err.is_fatal(), "{err} should not be fatal");
        }
    }

    #[test]
    fn kind_groups_variants() {
        let mismatch = ServingError::InputKindMismatch {
            expected: "feature vector",
            actual: "image",
        };
        assert_eq!(mismatch.kind(), ErrorKind::Shape);
        assert_eq!(
            ServingError::UnsupportedChannels(2).kind(),
            ErrorKind::Decode
        );
        assert_eq!(
            ServingError::MissingReference("P1".into()).kind(),
            ErrorKind::Mapping
        );
        let width = ServingError::WidthMismatch {
            scores: 3,
            labels: 4,
        };
        assert_eq!(width.kind(), ErrorKind::Mapping);
        assert!(!width.is_fatal());
    }

    #[test]
    fn shape_error_message_names_both_shapes() {
        let err = ServingError::Shape {
            expected: vec![1, 4],
            actual: vec![1, 3],
        };
        assert_eq!(
            err.to_string(),
            "Shape error: model expects [1, 4], got [1, 3]"
        );
    }
}
