//! Image OCR via Google Cloud Vision `TEXT_DETECTION`.

use std::path::Path;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

use crate::error::ExtractionError;
use crate::extract::{FileType, TextExtractor};

const VISION_BASE_URL: &str = "https://vision.googleapis.com";

#[derive(Debug, Clone)]
pub struct VisionConfig {
    pub api_key: SecretString,
    pub base_url: String,
}

impl VisionConfig {
    /// Returns `None` when `GOOGLE_VISION_API_KEY` is unset.
    pub fn from_env() -> Option<Self> {
        let key = std::env::var("GOOGLE_VISION_API_KEY")
            .ok()
            .filter(|s| !s.trim().is_empty())?;
        Some(Self::new(key))
    }

    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: SecretString::from(api_key.into()),
            base_url: VISION_BASE_URL.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<ImageResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageResponse {
    #[serde(default)]
    text_annotations: Vec<TextAnnotation>,
    #[serde(default)]
    error: Option<VisionStatus>,
}

#[derive(Debug, Deserialize)]
struct TextAnnotation {
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct VisionStatus {
    #[serde(default)]
    message: String,
}

/// OCR provider. Without a config every call reports `Unavailable`.
pub struct VisionOcr {
    client: reqwest::Client,
    config: Option<VisionConfig>,
}

impl VisionOcr {
    pub fn new(client: reqwest::Client, config: Option<VisionConfig>) -> Self {
        Self { client, config }
    }

    fn provider_error(&self, reason: impl Into<String>) -> ExtractionError {
        ExtractionError::Provider {
            provider: self.name().to_string(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl TextExtractor for VisionOcr {
    fn name(&self) -> &str {
        "google-vision"
    }

    async fn extract(&self, path: &Path, _file_type: FileType) -> Result<String, ExtractionError> {
        let Some(config) = &self.config else {
            return Err(ExtractionError::Unavailable {
                provider: self.name().to_string(),
            });
        };

        let bytes = tokio::fs::read(path).await?;
        let body = json!({
            "requests": [{
                "image": {"content": STANDARD.encode(&bytes)},
                "features": [{"type": "TEXT_DETECTION"}]
            }]
        });

        let url = format!(
            "{}/v1/images:annotate?key={}",
            config.base_url.trim_end_matches('/'),
            config.api_key.expose_secret()
        );
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.provider_error(format!("request failed: {}", e.without_url())))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.provider_error(format!("annotate returned {status}")));
        }

        let parsed: AnnotateResponse = response
            .json()
            .await
            .map_err(|e| self.provider_error(format!("invalid response: {}", e.without_url())))?;

        let Some(first) = parsed.responses.into_iter().next() else {
            return Ok(String::new());
        };
        if let Some(error) = first.error.filter(|e| !e.message.is_empty()) {
            return Err(self.provider_error(format!("OCR error: {}", error.message)));
        }

        Ok(first
            .text_annotations
            .into_iter()
            .next()
            .map(|a| a.description)
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path as url_path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn ocr_against(server: &MockServer) -> (VisionOcr, tempfile::TempDir, std::path::PathBuf) {
        let mut config = VisionConfig::new("vision-key");
        config.base_url = server.uri();
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("scan.png");
        std::fs::write(&file, [0x89, b'P', b'N', b'G']).unwrap();
        (VisionOcr::new(reqwest::Client::new(), Some(config)), dir, file)
    }

    #[tokio::test]
    async fn returns_full_text_annotation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(url_path("/v1/images:annotate"))
            .and(query_param("key", "vision-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "responses": [{"textAnnotations": [
                    {"description": "RFQ\n20 x safety gloves"},
                    {"description": "RFQ"}
                ]}]
            })))
            .mount(&server)
            .await;

        let (ocr, _dir, file) = ocr_against(&server).await;
        assert_eq!(ocr.extract(&file, FileType::Image).await.unwrap(), "RFQ\n20 x safety gloves");
    }

    #[tokio::test]
    async fn no_text_is_empty_not_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"responses": [{}]})))
            .mount(&server)
            .await;

        let (ocr, _dir, file) = ocr_against(&server).await;
        assert_eq!(ocr.extract(&file, FileType::Image).await.unwrap(), "");
    }

    #[tokio::test]
    async fn error_object_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "responses": [{"error": {"code": 3, "message": "Bad image data."}}]
            })))
            .mount(&server)
            .await;

        let (ocr, _dir, file) = ocr_against(&server).await;
        let err = ocr.extract(&file, FileType::Image).await.unwrap_err();
        assert!(err.to_string().contains("Bad image data."));
    }

    #[tokio::test]
    async fn unconfigured_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("scan.png");
        std::fs::write(&file, b"png").unwrap();

        let ocr = VisionOcr::new(reqwest::Client::new(), None);
        assert!(matches!(
            ocr.extract(&file, FileType::Image).await,
            Err(ExtractionError::Unavailable { .. })
        ));
    }
}
