//! Encoding-distance matcher

use std::sync::Arc;

use async_trait::async_trait;
use image::RgbImage;
use image::imageops::{self, FilterType};

use super::{EnrollmentDb, FaceMatch, FaceMatcher, Identity, MatchError};
use crate::config::RecognitionConfig;
use crate::frame::{Frame, Region};

/// A face found by the encoder, in the coordinates of the image it was given
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct EncodedFace {
    pub region: Region,
    pub encoding: Vec<f32>,
}

/// Face detection and encoding capability
#[async_trait]
pub trait FaceEncoder: Send + Sync {
    /// Find faces in `image` and compute one encoding per face
    ///
    /// # Errors
    ///
    /// Returns [`MatchError::NoFace`] when nothing was found, or a transient or
    /// fatal error from the underlying model
    async fn encode(&self, image: &RgbImage) -> Result<Vec<EncodedFace>, MatchError>;
}

/// Matches encoder output against the enrollment database
pub struct EncodingMatcher {
    encoder: Arc<dyn FaceEncoder>,
    db: Arc<EnrollmentDb>,
    tolerance: f32,
    downscale: f32,
}

impl EncodingMatcher {
    #[must_use]
    pub fn new(encoder: Arc<dyn FaceEncoder>, db: Arc<EnrollmentDb>, config: &RecognitionConfig) -> Self {
        Self {
            encoder,
            db,
            tolerance: config.tolerance,
            downscale: config.downscale,
        }
    }

    /// Label one face
    ///
    /// An encoding whose length differs from the enrolled ones means the
    /// encoder and the database come from different models; nothing it
    /// produces can be compared, so that is a fatal fault.
    fn identify(&self, face: EncodedFace) -> Result<FaceMatch, MatchError> {
        match self.db.dimension() {
            Some(expected) if face.encoding.len() != expected => {
                return Err(MatchError::Fatal(format!(
                    "encoder produced {}-value encodings, enrollment holds {expected}",
                    face.encoding.len()
                )));
            }
            _ => {}
        }

        let region = face.region.upscale(self.downscale);
        Ok(match self.db.nearest(&face.encoding) {
            Some((label, distance)) if distance <= self.tolerance => FaceMatch {
                region,
                identity: Identity::Known(label.to_string()),
                confidence: (1.0 - distance).clamp(0.0, 1.0),
            },
            Some((_, distance)) => FaceMatch {
                region,
                identity: Identity::Unknown,
                confidence: (distance - self.tolerance).clamp(0.0, 1.0),
            },
            None => FaceMatch {
                region,
                identity: Identity::Unknown,
                confidence: 1.0,
            },
        })
    }
}

#[async_trait]
impl FaceMatcher for EncodingMatcher {
    async fn match_faces(&self, frame: &Frame) -> Result<Vec<FaceMatch>, MatchError> {
        let small = if self.downscale < 1.0 {
            let frame = frame.clone();
            let factor = self.downscale;
            tokio::task::spawn_blocking(move || shrink(frame.image(), factor))
                .await
                .map_err(|e| MatchError::Transient(format!("resize task failed: {e}")))?
        } else {
            frame.image().clone()
        };

        let faces = self.encoder.encode(&small).await?;
        faces.into_iter().map(|face| self.identify(face)).collect()
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn shrink(image: &RgbImage, factor: f32) -> RgbImage {
    let width = ((image.width() as f32 * factor).round() as u32).max(1);
    let height = ((image.height() as f32 * factor).round() as u32).max(1);
    imageops::resize(image, width, height, FilterType::Triangle)
}

/// Euclidean distance between two encodings of equal length
#[must_use]
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<EncodedFace>);

    #[async_trait]
    impl FaceEncoder for Fixed {
        async fn encode(&self, image: &RgbImage) -> Result<Vec<EncodedFace>, MatchError> {
            assert_eq!((image.width(), image.height()), (16, 8));
            Ok(self.0.clone())
        }
    }

    fn db() -> Arc<EnrollmentDb> {
        Arc::new(
            EnrollmentDb::from_json(r#"{"identities": [{"label": "alice", "encodings": [[0.0, 0.0]]}]}"#)
                .unwrap(),
        )
    }

    #[test]
    fn test_distance() {
        assert!((euclidean_distance(&[0.0, 0.0], &[3.0, 4.0]) - 5.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_labels_and_scales_regions() {
        let encoder = Fixed(vec![
            EncodedFace {
                region: Region::new(1, 1, 2, 2),
                encoding: vec![0.3, 0.4],
            },
            EncodedFace {
                region: Region::new(4, 2, 2, 2),
                encoding: vec![3.0, 4.0],
            },
        ]);
        let config = RecognitionConfig::default();
        let matcher = EncodingMatcher::new(Arc::new(encoder), db(), &config);

        let frame = Frame::new(1, RgbImage::new(64, 32));
        let faces = matcher.match_faces(&frame).await.unwrap();

        assert_eq!(faces.len(), 2);
        assert_eq!(faces[0].identity, Identity::Known("alice".to_string()));
        assert!((faces[0].confidence - 0.5).abs() < 1e-5);
        assert_eq!(faces[0].region, Region::new(4, 4, 8, 8));
        assert_eq!(faces[1].identity, Identity::Unknown);
    }

    #[tokio::test]
    async fn test_encoder_errors_pass_through() {
        struct Empty;

        #[async_trait]
        impl FaceEncoder for Empty {
            async fn encode(&self, _: &RgbImage) -> Result<Vec<EncodedFace>, MatchError> {
                Err(MatchError::NoFace)
            }
        }

        let matcher = EncodingMatcher::new(Arc::new(Empty), db(), &RecognitionConfig::default());
        let frame = Frame::new(1, RgbImage::new(64, 32));
        assert!(matches!(
            matcher.match_faces(&frame).await,
            Err(MatchError::NoFace)
        ));
    }

    #[tokio::test]
    async fn test_encoding_length_mismatch_is_fatal() {
        let encoder = Fixed(vec![EncodedFace {
            region: Region::new(1, 1, 2, 2),
            encoding: vec![0.0, 0.0, 0.0],
        }]);
        let matcher = EncodingMatcher::new(Arc::new(encoder), db(), &RecognitionConfig::default());

        let frame = Frame::new(1, RgbImage::new(64, 32));
        let err = matcher.match_faces(&frame).await.unwrap_err();
        assert!(err.is_fatal());
    }
}
