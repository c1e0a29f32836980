//! Face matching
//!
//! [`FaceMatcher`] is the capability the recognition worker calls: frame in,
//! labelled face regions out. The shipped implementation, [`EncodingMatcher`],
//! delegates detection and encoding to a [`FaceEncoder`] and compares the
//! encodings against the [`EnrollmentDb`] loaded at startup.

mod encoding;
mod enrollment;
mod remote;

use async_trait::async_trait;
use thiserror::Error;

use crate::frame::{Frame, Region};

pub use encoding::{EncodedFace, EncodingMatcher, FaceEncoder, euclidean_distance};
pub use enrollment::{EnrolledIdentity, EnrollmentDb};
pub use remote::RemoteEncoder;

/// Label shown for faces that match no enrolled identity
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Who a detected face belongs to
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub enum Identity {
    Known(String),
    Unknown,
}

impl Identity {
    #[must_use]
    pub const fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }

    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Known(label) => label,
            Self::Unknown => UNKNOWN_LABEL,
        }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One detected face
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct FaceMatch {
    /// Bounding box in full-frame coordinates
    pub region: Region,
    pub identity: Identity,
    /// Match confidence in `[0, 1]`; for unknown faces, how far from the
    /// nearest enrolled encoding the face was
    pub confidence: f32,
}

/// Why a match call produced no result
#[derive(Debug, Error)]
pub enum MatchError {
    /// Nothing face-like in the frame
    #[error("no face in frame")]
    NoFace,

    /// Temporary failure; the next frame may succeed
    #[error("transient matcher failure: {0}")]
    Transient(String),

    /// The matcher cannot work any more (model missing, service gone)
    #[error("matcher unavailable: {0}")]
    Fatal(String),
}

impl MatchError {
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

impl From<MatchError> for crate::Error {
    fn from(err: MatchError) -> Self {
        Self::Matcher(err.to_string())
    }
}

/// Frame in, labelled faces out
///
/// Implementations keep no per-call state, so one instance serves every cycle.
#[async_trait]
pub trait FaceMatcher: Send + Sync {
    /// Detect and identify the faces in `frame`
    ///
    /// # Errors
    ///
    /// Returns [`MatchError`] describing whether the failure is worth retrying
    async fn match_faces(&self, frame: &Frame) -> Result<Vec<FaceMatch>, MatchError>;
}
