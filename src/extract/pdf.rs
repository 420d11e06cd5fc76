//! PDF text providers.
//!
//! `AzureLayoutReader` submits the file to Azure Document Intelligence
//! (`prebuilt-layout`) and polls the long-running operation.
//! `PlainPdfReader` dumps page text locally with `pdf-extract`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use crate::error::ExtractionError;
use crate::extract::{FileType, TextExtractor, run_blocking};

const LAYOUT_API_VERSION: &str = "2023-07-31";

/// Azure Document Intelligence settings.
#[derive(Debug, Clone)]
pub struct AzureLayoutConfig {
    /// Resource endpoint, e.g. `https://myresource.cognitiveservices.azure.com`.
    pub endpoint: String,
    pub api_key: SecretString,
    pub poll_interval: Duration,
    pub max_polls: u32,
}

impl AzureLayoutConfig {
    /// Returns `None` unless both endpoint and key are set.
    pub fn from_env() -> Option<Self> {
        let endpoint = std::env::var("AZURE_DOCUMENT_INTELLIGENCE_ENDPOINT")
            .ok()
            .filter(|s| !s.trim().is_empty())?;
        let api_key = std::env::var("AZURE_DOCUMENT_INTELLIGENCE_KEY")
            .ok()
            .filter(|s| !s.trim().is_empty())?;

        Some(Self::new(endpoint, api_key))
    }

    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: SecretString::from(api_key.into()),
            poll_interval: Duration::from_secs(1),
            max_polls: 60,
        }
    }
}

// ── Layout response model ───────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeOperation {
    status: String,
    #[serde(default)]
    analyze_result: Option<AnalyzeResult>,
    #[serde(default)]
    error: Option<OperationError>,
}

#[derive(Debug, Deserialize)]
struct OperationError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct AnalyzeResult {
    #[serde(default)]
    pub paragraphs: Vec<LayoutParagraph>,
    #[serde(default)]
    pub pages: Vec<LayoutPage>,
    #[serde(default)]
    pub tables: Vec<LayoutTable>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LayoutParagraph {
    pub content: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct LayoutPage {
    #[serde(default)]
    pub lines: Vec<LayoutLine>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LayoutLine {
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LayoutTable {
    pub row_count: usize,
    pub column_count: usize,
    #[serde(default)]
    pub cells: Vec<LayoutCell>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LayoutCell {
    pub row_index: usize,
    pub column_index: usize,
    #[serde(default)]
    pub content: String,
}

/// Render a layout result as plain text.
///
/// Paragraphs are separated by a blank line. Without paragraphs, each
/// page's lines are emitted followed by a blank line. Tables follow under
/// a `TABLES:` heading, one grid row per line.
pub(crate) fn render_layout(result: &AnalyzeResult) -> String {
    let mut text = String::new();

    if !result.paragraphs.is_empty() {
        text = result
            .paragraphs
            .iter()
            .map(|p| p.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
    } else {
        for page in &result.pages {
            let lines: Vec<&str> = page.lines.iter().map(|l| l.content.as_str()).collect();
            text.push_str(&lines.join("\n"));
            text.push_str("\n\n");
        }
    }

    if !result.tables.is_empty() {
        text.push_str("\n\nTABLES:\n");
        for table in &result.tables {
            for row in table_grid(table) {
                text.push_str(&row.join(" | "));
                text.push('\n');
            }
            text.push('\n');
        }
    }

    text
}

/// Cells placed into a `row_count x column_count` grid. Out-of-range cells are dropped.
fn table_grid(table: &LayoutTable) -> Vec<Vec<String>> {
    let mut grid = vec![vec![String::new(); table.column_count]; table.row_count];
    for cell in &table.cells {
        if let Some(slot) = grid
            .get_mut(cell.row_index)
            .and_then(|row| row.get_mut(cell.column_index))
        {
            *slot = cell.content.clone();
        }
    }
    grid
}

// ── Providers ───────────────────────────────────────────────────────

/// Layout-aware PDF extraction via the Azure REST API.
pub struct AzureLayoutReader {
    client: reqwest::Client,
    config: AzureLayoutConfig,
}

impl AzureLayoutReader {
    pub fn new(client: reqwest::Client, config: AzureLayoutConfig) -> Self {
        Self { client, config }
    }

    fn provider_error(&self, reason: impl Into<String>) -> ExtractionError {
        ExtractionError::Provider {
            provider: self.name().to_string(),
            reason: reason.into(),
        }
    }

    async fn submit(&self, bytes: Vec<u8>) -> Result<String, ExtractionError> {
        let url = format!(
            "{}/formrecognizer/documentModels/prebuilt-layout:analyze?api-version={}",
            self.config.endpoint, LAYOUT_API_VERSION
        );

        let response = self
            .client
            .post(&url)
            .header("Ocp-Apim-Subscription-Key", self.config.api_key.expose_secret())
            .header("Content-Type", "application/pdf")
            .body(bytes)
            .send()
            .await
            .map_err(|e| self.provider_error(format!("submit failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.provider_error(format!("submit returned {status}: {body}")));
        }

        response
            .headers()
            .get("Operation-Location")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| self.provider_error("response missing Operation-Location header"))
    }

    async fn poll(&self, operation_url: &str) -> Result<AnalyzeResult, ExtractionError> {
        for attempt in 1..=self.config.max_polls {
            let operation: AnalyzeOperation = self
                .client
                .get(operation_url)
                .header("Ocp-Apim-Subscription-Key", self.config.api_key.expose_secret())
                .send()
                .await
                .map_err(|e| self.provider_error(format!("poll failed: {e}")))?
                .json()
                .await
                .map_err(|e| self.provider_error(format!("invalid poll response: {e}")))?;

            match operation.status.as_str() {
                "succeeded" => return Ok(operation.analyze_result.unwrap_or_default()),
                "failed" => {
                    let message = operation.error.map(|e| e.message).unwrap_or_default();
                    return Err(self.provider_error(format!("analysis failed: {message}")));
                }
                status => {
                    debug!(attempt, status, "Layout analysis still running");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }

        Err(self.provider_error(format!(
            "analysis did not finish after {} polls",
            self.config.max_polls
        )))
    }
}

#[async_trait]
impl TextExtractor for AzureLayoutReader {
    fn name(&self) -> &str {
        "azure-layout"
    }

    async fn extract(&self, path: &Path, _file_type: FileType) -> Result<String, ExtractionError> {
        let bytes = tokio::fs::read(path).await?;
        let operation_url = self.submit(bytes).await?;
        let result = self.poll(&operation_url).await?;
        Ok(render_layout(&result))
    }
}

/// Local page-text dump.
pub struct PlainPdfReader;

#[async_trait]
impl TextExtractor for PlainPdfReader {
    fn name(&self) -> &str {
        "pdf-extract"
    }

    async fn extract(&self, path: &Path, _file_type: FileType) -> Result<String, ExtractionError> {
        let owned: PathBuf = path.to_path_buf();
        run_blocking(path, move || {
            pdf_extract::extract_text(&owned).map_err(|e| ExtractionError::Decode {
                path: owned.clone(),
                reason: e.to_string(),
            })
        })
        .await
    }
}
