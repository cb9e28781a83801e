//! Stage image status.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where the image of a stage stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageStatus {
    /// Created, rendering in progress.
    Initialized,
    /// No image exists locally nor remotely.
    Absent,
    /// An image exists in the builder cache or the target repository.
    #[serde(rename = "present-in-cache")]
    Cached,
    /// A cached image was pulled and retagged to the target reference.
    Pulled,
    /// The image was built.
    Built,
}

impl Default for StageStatus {
    fn default() -> Self {
        Self::Initialized
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initialized => write!(f, "initialized"),
            Self::Absent => write!(f, "absent"),
            Self::Cached => write!(f, "present-in-cache"),
            Self::Pulled => write!(f, "pulled"),
            Self::Built => write!(f, "built"),
        }
    }
}

impl StageStatus {
    /// Returns true if the image is available and nothing is left to do.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cached | Self::Pulled | Self::Built)
    }

    /// Returns true once preparation decided the status.
    #[must_use]
    pub fn is_prepared(&self) -> bool {
        !matches!(self, Self::Initialized)
    }

    /// Returns true if `next` is a legal successor of this status.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Initialized, Self::Absent | Self::Cached)
                | (Self::Absent, Self::Built)
                | (Self::Cached, Self::Pulled)
        )
    }
}
