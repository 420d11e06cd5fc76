//! Text extraction from attachments.
//!
//! Each supported file type maps to one `TextExtractor`. PDFs use an
//! ordered `ExtractorChain` (layout service first, local page dump second).
//! `ContentAcquirer` combines the submission body with attachment text and
//! never fails: attachment errors are logged and the body is used alone.

pub mod docx;
pub mod image;
pub mod pdf;
pub mod spreadsheet;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::ExtractionError;

pub use docx::DocxReader;
pub use image::{VisionConfig, VisionOcr};
pub use pdf::{AzureLayoutConfig, AzureLayoutReader, PlainPdfReader};
pub use spreadsheet::SpreadsheetReader;

/// Closed set of attachment formats the pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    Pdf,
    WordDocument,
    Spreadsheet,
    Image,
}

impl FileType {
    /// Map a file extension (case-insensitive, without the dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::WordDocument),
            "xls" | "xlsx" | "xlsm" | "ods" | "csv" => Some(Self::Spreadsheet),
            "png" | "jpg" | "jpeg" | "gif" | "bmp" | "tiff" | "tif" | "webp" => Some(Self::Image),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, ExtractionError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        Self::from_extension(ext).ok_or_else(|| {
            ExtractionError::UnsupportedType(if ext.is_empty() {
                path.display().to_string()
            } else {
                format!(".{ext}")
            })
        })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::WordDocument => "docx",
            Self::Spreadsheet => "spreadsheet",
            Self::Image => "image",
        }
    }
}

/// Turns one file into plain text.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Provider name used in logs and aggregated errors.
    fn name(&self) -> &str;

    async fn extract(&self, path: &Path, file_type: FileType) -> Result<String, ExtractionError>;
}

/// Ordered fallback list. The first provider to succeed wins.
pub struct ExtractorChain {
    providers: Vec<Arc<dyn TextExtractor>>,
}

impl ExtractorChain {
    pub fn new(providers: Vec<Arc<dyn TextExtractor>>) -> Self {
        Self { providers }
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[async_trait]
impl TextExtractor for ExtractorChain {
    fn name(&self) -> &str {
        "chain"
    }

    async fn extract(&self, path: &Path, file_type: FileType) -> Result<String, ExtractionError> {
        let mut failures = Vec::with_capacity(self.providers.len());

        for provider in &self.providers {
            match provider.extract(path, file_type).await {
                Ok(text) => {
                    debug!(provider = provider.name(), chars = text.len(), "Extraction succeeded");
                    return Ok(text);
                }
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "Extraction provider failed, trying next");
                    failures.push(format!("{}: {}", provider.name(), e));
                }
            }
        }

        Err(ExtractionError::AllProvidersFailed {
            path: path.to_path_buf(),
            failures,
        })
    }
}

/// Routes a file to the extractor registered for its type.
pub struct DocumentExtractor {
    pdf: Arc<dyn TextExtractor>,
    word: Arc<dyn TextExtractor>,
    spreadsheet: Arc<dyn TextExtractor>,
    image: Arc<dyn TextExtractor>,
}

impl DocumentExtractor {
    pub fn new(
        pdf: Arc<dyn TextExtractor>,
        word: Arc<dyn TextExtractor>,
        spreadsheet: Arc<dyn TextExtractor>,
        image: Arc<dyn TextExtractor>,
    ) -> Self {
        Self {
            pdf,
            word,
            spreadsheet,
            image,
        }
    }

    /// Build the default provider set.
    ///
    /// The layout PDF provider is included only when Azure is configured.
    /// Without Vision credentials the image slot is a `VisionOcr` that
    /// reports `Unavailable`.
    pub fn from_configs(azure: Option<AzureLayoutConfig>, vision: Option<VisionConfig>) -> Self {
        let http = reqwest::Client::new();

        let mut pdf_chain: Vec<Arc<dyn TextExtractor>> = Vec::new();
        if let Some(cfg) = azure {
            info!(endpoint = %cfg.endpoint, "Layout PDF extraction enabled");
            pdf_chain.push(Arc::new(AzureLayoutReader::new(http.clone(), cfg)));
        }
        pdf_chain.push(Arc::new(PlainPdfReader));

        if vision.is_none() {
            info!("GOOGLE_VISION_API_KEY not set, image attachments will be skipped");
        }

        Self::new(
            Arc::new(ExtractorChain::new(pdf_chain)),
            Arc::new(DocxReader),
            Arc::new(SpreadsheetReader),
            Arc::new(VisionOcr::new(http, vision)),
        )
    }

    /// Extract text from `path`, deriving its type from the extension.
    pub async fn extract_path(&self, path: &Path) -> Result<String, ExtractionError> {
        let file_type = FileType::from_path(path)?;
        self.extract(path, file_type).await
    }
}

#[async_trait]
impl TextExtractor for DocumentExtractor {
    fn name(&self) -> &str {
        "document"
    }

    async fn extract(&self, path: &Path, file_type: FileType) -> Result<String, ExtractionError> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(ExtractionError::FileNotFound(path.to_path_buf()));
        }

        let provider = match file_type {
            FileType::Pdf => &self.pdf,
            FileType::WordDocument => &self.word,
            FileType::Spreadsheet => &self.spreadsheet,
            FileType::Image => &self.image,
        };

        debug!(path = %path.display(), file_type = file_type.label(), provider = provider.name(), "Extracting attachment text");
        provider.extract(path, file_type).await
    }
}

/// Combines a submission body with its attachment's text.
pub struct ContentAcquirer {
    extractor: Arc<DocumentExtractor>,
}

impl ContentAcquirer {
    pub fn new(extractor: Arc<DocumentExtractor>) -> Self {
        Self { extractor }
    }

    /// Body, then a blank line, then attachment text (when any was extracted).
    pub async fn acquire(&self, body: &str, attachment: Option<&Path>) -> String {
        let Some(path) = attachment else {
            return body.to_string();
        };

        match self.extractor.extract_path(path).await {
            Ok(text) => {
                info!(path = %path.display(), chars = text.len(), "Attachment text extracted");
                join_text(body, &text)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Attachment extraction failed, continuing with body only");
                body.to_string()
            }
        }
    }
}

fn join_text(body: &str, extracted: &str) -> String {
    match (body.trim().is_empty(), extracted.trim().is_empty()) {
        (_, true) => body.to_string(),
        (true, false) => extracted.to_string(),
        (false, false) => format!("{body}\n\n{extracted}"),
    }
}

/// Run a blocking decoder on the blocking pool.
pub(crate) async fn run_blocking<T, F>(path: &Path, f: F) -> Result<T, ExtractionError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ExtractionError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ExtractionError::Decode {
            path: path.to_path_buf(),
            reason: format!("decoder task failed: {e}"),
        })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubExtractor {
        name: &'static str,
        result: Result<&'static str, &'static str>,
        calls: AtomicUsize,
    }

    impl StubExtractor {
        fn ok(name: &'static str, text: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                result: Ok(text),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(name: &'static str, reason: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                result: Err(reason),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TextExtractor for StubExtractor {
        fn name(&self) -> &str {
            self.name
        }

        async fn extract(&self, _path: &Path, _file_type: FileType) -> Result<String, ExtractionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result
                .map(str::to_string)
                .map_err(|reason| ExtractionError::Provider {
                    provider: self.name.to_string(),
                    reason: reason.to_string(),
                })
        }
    }

    fn stub_document(pdf: Arc<dyn TextExtractor>) -> DocumentExtractor {
        DocumentExtractor::new(
            pdf,
            StubExtractor::ok("word", "word text"),
            StubExtractor::ok("sheet", "a,b\n1,2"),
            StubExtractor::ok("ocr", "ocr text"),
        )
    }

    #[test]
    fn file_type_from_extension() {
        assert_eq!(FileType::from_extension("PDF"), Some(FileType::Pdf));
        assert_eq!(FileType::from_extension("docx"), Some(FileType::WordDocument));
        assert_eq!(FileType::from_extension("csv"), Some(FileType::Spreadsheet));
        assert_eq!(FileType::from_extension("xlsx"), Some(FileType::Spreadsheet));
        assert_eq!(FileType::from_extension("jpeg"), Some(FileType::Image));
        assert_eq!(FileType::from_extension("doc"), None);
        assert_eq!(FileType::from_extension("exe"), None);
    }

    #[test]
    fn file_type_from_path_rejects_unknown() {
        assert!(matches!(
            FileType::from_path(Path::new("/tmp/payload.exe")),
            Err(ExtractionError::UnsupportedType(ref ext)) if ext == ".exe"
        ));
        assert!(FileType::from_path(Path::new("/tmp/no_extension")).is_err());
    }

    #[tokio::test]
    async fn chain_first_success_wins() {
        let first = StubExtractor::failing("layout", "timeout");
        let second = StubExtractor::ok("plain", "page text");
        let third = StubExtractor::ok("never", "unused");
        let chain = ExtractorChain::new(vec![first.clone(), second.clone(), third.clone()]);

        let text = chain.extract(Path::new("x.pdf"), FileType::Pdf).await.unwrap();
        assert_eq!(text, "page text");
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(third.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn chain_aggregates_failures() {
        let chain = ExtractorChain::new(vec![
            StubExtractor::failing("layout", "timeout"),
            StubExtractor::failing("plain", "corrupt xref"),
        ]);

        match chain.extract(Path::new("x.pdf"), FileType::Pdf).await {
            Err(ExtractionError::AllProvidersFailed { failures, .. }) => {
                assert_eq!(failures.len(), 2);
                assert!(failures[0].starts_with("layout"));
                assert!(failures[1].contains("corrupt xref"));
            }
            other => panic!("Expected AllProvidersFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn document_extractor_reports_missing_file() {
        let doc = stub_document(StubExtractor::ok("pdf", "text"));
        assert!(matches!(
            doc.extract_path(Path::new("/definitely/not/here.pdf")).await,
            Err(ExtractionError::FileNotFound(_))
        ));
    }

    #[tokio::test]
    async fn document_extractor_routes_by_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quote.docx");
        std::fs::File::create(&path).unwrap().write_all(b"x").unwrap();

        let doc = stub_document(StubExtractor::ok("pdf", "pdf text"));
        assert_eq!(doc.extract_path(&path).await.unwrap(), "word text");
    }

    #[tokio::test]
    async fn acquirer_joins_body_and_attachment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rfq.pdf");
        std::fs::write(&path, b"%PDF").unwrap();

        let acquirer = ContentAcquirer::new(Arc::new(stub_document(StubExtractor::ok("pdf", "10 x pump"))));
        let text = acquirer.acquire("See attached.", Some(&path)).await;
        assert_eq!(text, "See attached.\n\n10 x pump");
    }

    #[tokio::test]
    async fn acquirer_falls_back_to_body() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rfq.pdf");
        std::fs::write(&path, b"garbage").unwrap();

        let acquirer =
            ContentAcquirer::new(Arc::new(stub_document(StubExtractor::failing("pdf", "corrupt"))));
        assert_eq!(acquirer.acquire("Body only", Some(&path)).await, "Body only");
        assert_eq!(acquirer.acquire("No attachment", None).await, "No attachment");
    }

    #[test]
    fn join_skips_empty_parts() {
        assert_eq!(join_text("", "extracted"), "extracted");
        assert_eq!(join_text("body", "  "), "body");
        assert_eq!(join_text("body", "extracted"), "body\n\nextracted");
    }
}
