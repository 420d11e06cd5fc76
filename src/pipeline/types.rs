//! Shared types for the RFQ extraction pipeline.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pipeline::dispatch::DispatchReport;

/// Description the oracle uses for items it could not identify.
pub const AMBIGUOUS_DESCRIPTION: &str = "Not sure about the product.";

// ── Input ───────────────────────────────────────────────────────────

/// Who sent a submission and what it was about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionMetadata {
    pub subject: Option<String>,
    pub sender_name: Option<String>,
    pub sender_email: Option<String>,
}

impl SubmissionMetadata {
    /// Best available display name for the requester.
    pub fn client_name(&self) -> &str {
        self.sender_name
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| {
                self.sender_email
                    .as_deref()
                    .filter(|s| !s.trim().is_empty())
            })
            .unwrap_or("Unknown Sender")
    }
}

/// Raw input to one pipeline invocation. Owned by the caller.
#[derive(Debug, Clone, Default)]
pub struct RawSubmission {
    pub body: String,
    pub attachment_path: Option<PathBuf>,
    pub metadata: Option<SubmissionMetadata>,
}

impl RawSubmission {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn with_attachment(mut self, path: impl Into<PathBuf>) -> Self {
        self.attachment_path = Some(path.into());
        self
    }

    pub fn with_metadata(mut self, metadata: SubmissionMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

// ── Items ───────────────────────────────────────────────────────────

/// A normalized procurement line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Freshly generated per item; never taken from the oracle.
    pub id: Uuid,
    pub name: String,
    /// Positive quantity, `None` when the oracle gave an unusable value.
    pub quantity: Option<u32>,
    pub description: String,
}

impl Item {
    pub fn new(name: impl Into<String>, quantity: Option<u32>, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            quantity,
            description: description.into(),
        }
    }

    /// Whether the oracle flagged this item as unidentifiable.
    pub fn is_ambiguous(&self) -> bool {
        self.description.trim() == AMBIGUOUS_DESCRIPTION
    }
}

/// An item as the oracle returned it, before normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawItem {
    /// Oracle-supplied id. Untrusted and discarded.
    pub id: Option<String>,
    pub name: Option<String>,
    /// `None` means the field was absent; `Some(Null)` means explicitly null.
    pub quantity: Option<serde_json::Value>,
    pub description: Option<String>,
}

// ── Stages ──────────────────────────────────────────────────────────

/// Binary classifier verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassificationResult {
    pub is_request: bool,
}

/// Where a pipeline invocation is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Received,
    ExtractingAttachment,
    Classifying,
    /// Terminal: not a procurement request.
    Rejected,
    ExtractingItems,
    Filtering,
    Dispatching,
    /// Terminal: items delivered (or nothing left to deliver).
    Done,
}

impl PipelineStage {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::ExtractingAttachment => "extracting_attachment",
            Self::Classifying => "classifying",
            Self::Rejected => "rejected",
            Self::ExtractingItems => "extracting_items",
            Self::Filtering => "filtering",
            Self::Dispatching => "dispatching",
            Self::Done => "done",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Done)
    }
}

/// Result of one pipeline invocation.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub items: Vec<Item>,
    pub is_request: bool,
    pub stage: PipelineStage,
    pub dispatch: DispatchReport,
}

impl PipelineOutcome {
    pub(crate) fn rejected() -> Self {
        Self {
            items: Vec::new(),
            is_request: false,
            stage: PipelineStage::Rejected,
            dispatch: DispatchReport::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_name_prefers_sender_name() {
        let meta = SubmissionMetadata {
            subject: None,
            sender_name: Some("Alice Buyer".into()),
            sender_email: Some("alice@example.com".into()),
        };
        assert_eq!(meta.client_name(), "Alice Buyer");
    }

    #[test]
    fn client_name_falls_back_to_email_then_unknown() {
        let meta = SubmissionMetadata {
            sender_name: Some("  ".into()),
            sender_email: Some("bob@example.com".into()),
            ..Default::default()
        };
        assert_eq!(meta.client_name(), "bob@example.com");
        assert_eq!(SubmissionMetadata::default().client_name(), "Unknown Sender");
    }

    #[test]
    fn new_items_get_distinct_ids() {
        let a = Item::new("Widget", Some(1), "");
        let b = Item::new("Widget", Some(1), "");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn ambiguous_description_detected() {
        assert!(Item::new("Thing", None, AMBIGUOUS_DESCRIPTION).is_ambiguous());
        assert!(!Item::new("Bolt", Some(4), "M8 steel bolt").is_ambiguous());
    }

    #[test]
    fn stage_terminality() {
        assert!(PipelineStage::Rejected.is_terminal());
        assert!(PipelineStage::Done.is_terminal());
        assert!(!PipelineStage::Classifying.is_terminal());
        assert_eq!(PipelineStage::ExtractingItems.label(), "extracting_items");
    }

    #[test]
    fn item_serialization_shape() {
        let item = Item::new("Gloves", Some(20), "Nitrile, size L");
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["name"], "Gloves");
        assert_eq!(json["quantity"], 20);
        assert!(json["id"].is_string());
    }
}
