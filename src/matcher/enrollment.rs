//! Enrollment database
//!
//! JSON document produced by the enrollment tool:
//!
//! ```json
//! {"identities": [{"label": "alice", "encodings": [[0.01, -0.2, ...]]}]}
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::encoding::euclidean_distance;
use crate::{Error, Result};

/// One enrolled person and their reference encodings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrolledIdentity {
    pub label: String,
    pub encodings: Vec<Vec<f32>>,
}

/// Enrolled identities, read once at startup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrollmentDb {
    pub identities: Vec<EnrolledIdentity>,
}

impl EnrollmentDb {
    /// Load and validate the database at `path`
    ///
    /// # Errors
    ///
    /// Returns error if the file is missing, malformed, or inconsistent
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Enrollment(format!("cannot read {}: {e}", path.display())))?;
        let db = Self::from_json(&content)?;

        tracing::info!(
            path = %path.display(),
            identities = db.identities.len(),
            encodings = db.encoding_count(),
            "loaded enrollment database"
        );
        Ok(db)
    }

    /// Parse and validate a JSON document
    ///
    /// # Errors
    ///
    /// Returns error on invalid JSON, empty labels, or mismatched dimensions
    pub fn from_json(content: &str) -> Result<Self> {
        let db: Self = serde_json::from_str(content)
            .map_err(|e| Error::Enrollment(format!("invalid enrollment JSON: {e}")))?;
        db.validate()?;
        Ok(db)
    }

    fn validate(&self) -> Result<()> {
        let mut dimension = None;
        for identity in &self.identities {
            if identity.label.trim().is_empty() {
                return Err(Error::Enrollment("identity with empty label".to_string()));
            }
            if identity.encodings.is_empty() {
                tracing::warn!(label = %identity.label, "identity has no encodings and will never match");
            }
            for encoding in &identity.encodings {
                match dimension {
                    None => dimension = Some(encoding.len()),
                    Some(d) if d != encoding.len() => {
                        return Err(Error::Enrollment(format!(
                            "encoding for '{}' has {} values, expected {d}",
                            identity.label,
                            encoding.len()
                        )));
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    #[must_use]
    pub fn encoding_count(&self) -> usize {
        self.identities.iter().map(|i| i.encodings.len()).sum()
    }

    /// Length of the stored encodings, if any are stored
    #[must_use]
    pub fn dimension(&self) -> Option<usize> {
        self.identities
            .iter()
            .flat_map(|i| i.encodings.first())
            .map(Vec::len)
            .next()
    }

    /// Nearest enrolled identity and its distance
    ///
    /// Returns `None` when the database holds no encodings of matching length.
    #[must_use]
    pub fn nearest(&self, encoding: &[f32]) -> Option<(&str, f32)> {
        self.identities
            .iter()
            .flat_map(|identity| {
                identity
                    .encodings
                    .iter()
                    .filter(|known| known.len() == encoding.len())
                    .map(move |known| (identity.label.as_str(), euclidean_distance(known, encoding)))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DB: &str = r#"{
        "identities": [
            {"label": "alice", "encodings": [[0.0, 0.0, 0.0], [0.1, 0.0, 0.0]]},
            {"label": "bob", "encodings": [[1.0, 1.0, 1.0]]}
        ]
    }"#;

    #[test]
    fn test_nearest_picks_closest_encoding() {
        let db = EnrollmentDb::from_json(DB).unwrap();
        assert_eq!(db.encoding_count(), 3);
        assert_eq!(db.dimension(), Some(3));

        let (label, distance) = db.nearest(&[0.9, 1.0, 1.0]).unwrap();
        assert_eq!(label, "bob");
        assert!((distance - 0.1).abs() < 1e-5);
    }

    #[test]
    fn test_mismatched_dimensions_rejected() {
        let content = r#"{"identities": [
            {"label": "alice", "encodings": [[0.0, 0.0]]},
            {"label": "bob", "encodings": [[0.0, 0.0, 0.0]]}
        ]}"#;
        assert!(EnrollmentDb::from_json(content).is_err());
    }

    #[test]
    fn test_empty_label_rejected() {
        let content = r#"{"identities": [{"label": " ", "encodings": [[0.0]]}]}"#;
        assert!(EnrollmentDb::from_json(content).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("enrollment.json");
        std::fs::write(&path, DB).unwrap();

        let db = EnrollmentDb::load(&path).unwrap();
        assert_eq!(db.identities.len(), 2);
        assert!(EnrollmentDb::load(&dir.path().join("missing.json")).is_err());
    }
}
