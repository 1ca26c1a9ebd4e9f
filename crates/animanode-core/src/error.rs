/// Core error types for the AnimaNode toolkit.
use std::path::PathBuf;

/// A specialized Result type for AnimaNode operations.
pub type AnimaResult<T> = Result<T, AnimaError>;

/// Top-level error type encompassing all AnimaNode subsystems.
#[derive(Debug, thiserror::Error)]
pub enum AnimaError {
    #[error("invalid keyframe time {time}: {reason}")]
    InvalidTime { time: f64, reason: String },

    #[error("{mode} interpolation is not supported for {value_kind} values")]
    UnsupportedInterpolation {
        mode: crate::Interpolation,
        value_kind: &'static str,
    },

    #[error("unknown parent node #{0}")]
    UnknownParent(u64),

    #[error("unknown node #{0}")]
    UnknownNode(u64),

    #[error("the root node cannot be removed")]
    CannotRemoveRoot,

    #[error("attaching node #{node} under #{parent} would create a cycle")]
    CycleDetected { node: u64, parent: u64 },

    #[error("node #{node} references material '{material}' which is not in the active resource set")]
    MissingMaterial { node: u64, material: String },

    #[error("node #{node} references mesh '{mesh}' which is not in the active resource set")]
    MissingMesh { node: u64, mesh: String },

    #[error("GPU submission failed for frame {frame_index}: {message}")]
    GpuSubmissionFailed { frame_index: u64, message: String },

    #[error("encoder queue full, frame {frame_index} dropped")]
    EncoderQueueFull { frame_index: u64 },

    #[error("operation cancelled: {0}")]
    Cancelled(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("config error: {message} ({path:?})")]
    Config { message: String, path: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AnimaError {
    /// Create an invalid-time error.
    pub fn invalid_time(time: f64, reason: impl Into<String>) -> Self {
        AnimaError::InvalidTime {
            time,
            reason: reason.into(),
        }
    }

    /// Create a GPU submission failure for the given frame.
    pub fn gpu(frame_index: u64, message: impl Into<String>) -> Self {
        AnimaError::GpuSubmissionFailed {
            frame_index,
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        AnimaError::Config {
            message: message.into(),
            path: path.into(),
        }
    }

    /// Whether the frame scheduler must abort the current run on this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AnimaError::GpuSubmissionFailed { .. })
    }

    /// An equivalent error value. IO and serde errors keep their message
    /// and kind but not their source chain.
    pub fn duplicate(&self) -> AnimaError {
        match self {
            AnimaError::InvalidTime { time, reason } => {
                AnimaError::invalid_time(*time, reason.clone())
            }
            AnimaError::UnsupportedInterpolation { mode, value_kind } => {
                AnimaError::UnsupportedInterpolation {
                    mode: *mode,
                    value_kind: *value_kind,
                }
            }
            AnimaError::UnknownParent(id) => AnimaError::UnknownParent(*id),
            AnimaError::UnknownNode(id) => AnimaError::UnknownNode(*id),
            AnimaError::CannotRemoveRoot => AnimaError::CannotRemoveRoot,
            AnimaError::CycleDetected { node, parent } => AnimaError::CycleDetected {
                node: *node,
                parent: *parent,
            },
            AnimaError::MissingMaterial { node, material } => AnimaError::MissingMaterial {
                node: *node,
                material: material.clone(),
            },
            AnimaError::MissingMesh { node, mesh } => AnimaError::MissingMesh {
                node: *node,
                mesh: mesh.clone(),
            },
            AnimaError::GpuSubmissionFailed {
                frame_index,
                message,
            } => AnimaError::gpu(*frame_index, message.clone()),
            AnimaError::EncoderQueueFull { frame_index } => AnimaError::EncoderQueueFull {
                frame_index: *frame_index,
            },
            AnimaError::Cancelled(m) => AnimaError::Cancelled(m.clone()),
            AnimaError::InvalidState(m) => AnimaError::InvalidState(m.clone()),
            AnimaError::InvalidArgument(m) => AnimaError::InvalidArgument(m.clone()),
            AnimaError::Encode(m) => AnimaError::Encode(m.clone()),
            AnimaError::Config { message, path } => {
                AnimaError::config(message.clone(), path.clone())
            }
            AnimaError::Io(e) => AnimaError::Io(std::io::Error::new(e.kind(), e.to_string())),
            AnimaError::Serialization(e) => {
                AnimaError::Serialization(<serde_json::Error as serde::de::Error>::custom(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Interpolation;

    #[test]
    fn test_invalid_time_display() {
        let err = AnimaError::invalid_time(2.0, "duplicate keyframe");
        assert_eq!(
            err.to_string(),
            "invalid keyframe time 2: duplicate keyframe"
        );
    }

    #[test]
    fn test_unsupported_interpolation_display() {
        let err = AnimaError::UnsupportedInterpolation {
            mode: Interpolation::Cubic,
            value_kind: "bool",
        };
        assert_eq!(
            err.to_string(),
            "cubic interpolation is not supported for bool values"
        );
    }

    #[test]
    fn test_only_gpu_failures_are_fatal() {
        assert!(AnimaError::gpu(3, "device lost").is_fatal());
        assert!(!AnimaError::EncoderQueueFull { frame_index: 3 }.is_fatal());
        assert!(!AnimaError::UnknownNode(7).is_fatal());
    }

    #[test]
    fn test_duplicate_keeps_message() {
        let errors = [
            AnimaError::gpu(4, "device lost"),
            AnimaError::MissingMesh {
                node: 2,
                mesh: "quad".into(),
            },
            AnimaError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone")),
        ];
        for err in &errors {
            assert_eq!(err.duplicate().to_string(), err.to_string());
        }
        assert!(errors[0].duplicate().is_fatal());
    }
}
