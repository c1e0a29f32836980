//! HTTP face encoder
//!
//! Posts a JPEG to an encoder service and reads back face boxes with their
//! encodings:
//!
//! ```json
//! {"faces": [{"region": {"left": 10, "top": 8, "width": 40, "height": 40},
//!             "encoding": [0.01, -0.2, ...]}]}
//! ```
//!
//! Status 422 means no face was found; 503 means the service has no model
//! loaded, which is treated as fatal.

use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use image::{ImageFormat, RgbImage};
use reqwest::StatusCode;

use super::{EncodedFace, FaceEncoder, MatchError};

#[derive(serde::Deserialize)]
struct EncodeResponse {
    #[serde(default)]
    faces: Vec<EncodedFace>,
}

/// Client for a face encoder service
pub struct RemoteEncoder {
    client: reqwest::Client,
    url: String,
}

impl RemoteEncoder {
    /// Create a client for `url`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(url: impl Into<String>, timeout: Duration) -> crate::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

fn to_jpeg(image: &RgbImage) -> Result<Vec<u8>, MatchError> {
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, ImageFormat::Jpeg)
        .map_err(|e| MatchError::Transient(format!("jpeg encode failed: {e}")))?;
    Ok(bytes.into_inner())
}

#[async_trait]
impl FaceEncoder for RemoteEncoder {
    async fn encode(&self, image: &RgbImage) -> Result<Vec<EncodedFace>, MatchError> {
        let body = to_jpeg(image)?;

        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "image/jpeg")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                tracing::debug!(error = %e, "encoder request failed");
                MatchError::Transient(e.to_string())
            })?;

        let status = response.status();
        match status {
            StatusCode::UNPROCESSABLE_ENTITY => return Err(MatchError::NoFace),
            StatusCode::SERVICE_UNAVAILABLE => {
                let body = response.text().await.unwrap_or_default();
                return Err(MatchError::Fatal(format!("encoder has no model: {body}")));
            }
            s if !s.is_success() => {
                let body = response.text().await.unwrap_or_default();
                return Err(MatchError::Transient(format!("encoder error {s}: {body}")));
            }
            _ => {}
        }

        let parsed: EncodeResponse = response
            .json()
            .await
            .map_err(|e| MatchError::Transient(format!("bad encoder response: {e}")))?;

        if parsed.faces.is_empty() {
            return Err(MatchError::NoFace);
        }
        Ok(parsed.faces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_shape() {
        let json = r#"{"faces": [{"region": {"left": 1, "top": 2, "width": 3, "height": 4}, "encoding": [0.5]}]}"#;
        let parsed: EncodeResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.faces.len(), 1);
        assert_eq!(parsed.faces[0].encoding, vec![0.5]);

        let parsed: EncodeResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.faces.is_empty());
    }

    #[test]
    fn test_jpeg_encoding() {
        let bytes = to_jpeg(&RgbImage::new(8, 8)).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[tokio::test]
    async fn test_unreachable_service_is_transient() {
        let encoder =
            RemoteEncoder::new("http://127.0.0.1:9/encode", Duration::from_millis(200)).unwrap();
        let result = encoder.encode(&RgbImage::new(4, 4)).await;
        assert!(matches!(result, Err(MatchError::Transient(_))));
    }
}
