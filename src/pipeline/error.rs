//! Structural errors raised by the pipeline.
//!
//! Every variant describes a broken protocol invariant rather than a
//! transient runtime condition. The engine stops the frame on the first one
//! and hands it back to the caller, so a batch harness can fail a single
//! scene and keep going.

use thiserror::Error;

use super::channel::ChannelKind;
use super::ray::RayId;
use super::stage::StageKind;

/// Which side of a channel handshake was broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    /// Write against a channel whose visible queue plus staged writes is full.
    Overflow,
    /// Read against a channel with no visible entries.
    Underflow,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Violation::Overflow => write!(f, "write to full channel"),
            Violation::Underflow => write!(f, "read from empty channel"),
        }
    }
}

/// Fatal pipeline errors.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PipelineError {
    /// Decoded parameter count does not match the declared model sizes.
    #[error("mismatched snapshot and config: expected {expected} parameters, snapshot holds {actual}")]
    ConfigMismatch {
        /// Sum of the declared model parameter counts.
        expected: usize,
        /// Parameter count found in the snapshot.
        actual: usize,
    },

    /// Two ray ids that the protocol requires to agree did not.
    #[error("ray id desync in {stage}: expected ray {expected}, found ray {found}")]
    RayIdDesync {
        /// Stage that detected the mismatch.
        stage: StageKind,
        /// Id the stage was prepared to accept.
        expected: RayId,
        /// Id that actually arrived.
        found: RayId,
    },

    /// A stage read or wrote a channel without checking it first.
    #[error("channel protocol violation on {channel}: {violation}{}", ray_suffix(.ray_id))]
    ChannelProtocolViolation {
        /// Offending channel.
        channel: ChannelKind,
        /// Overflow or underflow.
        violation: Violation,
        /// Ray carried by the rejected write, when known.
        ray_id: Option<RayId>,
    },

    /// A sample referenced a ray id outside the frame.
    #[error("{stage} received a sample for unknown ray {ray_id}")]
    UnknownRay {
        /// Stage that looked the ray up.
        stage: StageKind,
        /// Offending id.
        ray_id: RayId,
    },

    /// Engine options that cannot describe a working pipeline.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),
}

fn ray_suffix(ray_id: &Option<RayId>) -> String {
    match ray_id {
        Some(id) => format!(" (ray {})", id),
        None => String::new(),
    }
}

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_desync_message_names_both_ids() {
        let err = PipelineError::RayIdDesync {
            stage: StageKind::ColorNetwork,
            expected: 4,
            found: 7,
        };
        let msg = err.to_string();
        assert!(msg.contains("color network"));
        assert!(msg.contains("ray 4"));
        assert!(msg.contains("ray 7"));
    }

    #[test]
    fn test_violation_message_includes_ray() {
        let err = PipelineError::ChannelProtocolViolation {
            channel: ChannelKind::MarchToPositional,
            violation: Violation::Overflow,
            ray_id: Some(12),
        };
        assert!(err.to_string().ends_with("(ray 12)"));

        let err = PipelineError::ChannelProtocolViolation {
            channel: ChannelKind::Retire,
            violation: Violation::Underflow,
            ray_id: None,
        };
        assert!(err.to_string().contains("read from empty channel"));
    }
}
