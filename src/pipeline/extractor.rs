//! Verify-then-extract: turns text into normalized items via the oracle.
//!
//! Extraction is never attempted unless classification is positive, and
//! no oracle failure or malformed response escapes this module: both
//! degrade to an empty item list.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::pipeline::filter::is_rejected_name;
use crate::pipeline::oracle::RfqOracle;
use crate::pipeline::types::{ClassificationResult, Item, RawItem};

/// Result of parsing oracle output.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Parsed(Vec<RawItem>),
    Failed { reason: String },
}

/// Wraps an `RfqOracle` with parsing, normalization and fail-closed handling.
pub struct ItemExtractor {
    oracle: Arc<dyn RfqOracle>,
}

impl ItemExtractor {
    pub fn new(oracle: Arc<dyn RfqOracle>) -> Self {
        Self { oracle }
    }

    /// Binary gate. Oracle errors count as negative.
    async fn classify(&self, text: &str) -> ClassificationResult {
        let is_request = match self.oracle.classify(text).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(error = %e, "Classifier call failed, treating as not an RFQ");
                false
            }
        };
        ClassificationResult { is_request }
    }

    /// Extract items from text already classified positive.
    async fn extract(&self, text: &str) -> Vec<Item> {
        let raw = match self.oracle.extract_items(text).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Item extraction call failed, continuing with no items");
                return Vec::new();
            }
        };

        match parse_items_response(&raw) {
            ParseOutcome::Parsed(raw_items) => {
                let total = raw_items.len();
                let items = normalize_items(raw_items);
                debug!(raw = total, kept = items.len(), "Oracle items normalized");
                items
            }
            ParseOutcome::Failed { reason } => {
                warn!(
                    error = %reason,
                    raw_response = %raw.chars().take(500).collect::<String>(),
                    "Failed to parse extraction response, continuing with no items"
                );
                Vec::new()
            }
        }
    }

    /// Classify, then extract only on a positive verdict.
    ///
    /// The only way in: extraction cannot be reached without the gate.
    pub async fn verify_and_extract(&self, text: &str) -> (ClassificationResult, Vec<Item>) {
        let classification = self.classify(text).await;
        if !classification.is_request {
            info!("Text is not an RFQ, skipping extraction");
            return (classification, Vec::new());
        }
        let items = self.extract(text).await;
        (classification, items)
    }
}

// ── Parsing ─────────────────────────────────────────────────────────

/// Parse oracle output into raw items.
///
/// Accepts an object with an `items` array (missing key means zero items)
/// or a bare array. JSON wrapped in markdown or prose is located first.
pub fn parse_items_response(raw: &str) -> ParseOutcome {
    let json_str = extract_json_payload(raw);
    let value: Value = match serde_json::from_str(json_str) {
        Ok(v) => v,
        Err(e) => {
            return ParseOutcome::Failed {
                reason: format!("JSON parse error: {e}"),
            };
        }
    };

    let entries = match value {
        Value::Array(entries) => entries,
        Value::Object(mut map) => match map.remove("items") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(entries)) => entries,
            Some(other) => {
                return ParseOutcome::Failed {
                    reason: format!("'items' is not an array: {other}"),
                };
            }
        },
        other => {
            return ParseOutcome::Failed {
                reason: format!("expected a JSON object, got: {other}"),
            };
        }
    };

    ParseOutcome::Parsed(entries.iter().filter_map(raw_item_from_value).collect())
}

/// Non-object entries carry nothing usable and are skipped.
fn raw_item_from_value(value: &Value) -> Option<RawItem> {
    let obj = value.as_object()?;
    let text = |key: &str| obj.get(key).and_then(Value::as_str).map(str::to_string);
    Some(RawItem {
        id: obj.get("id").map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }),
        name: text("name"),
        quantity: obj.get("quantity").cloned(),
        description: text("description"),
    })
}

/// Locate a JSON object or array in model output (handles markdown wrapping).
fn extract_json_payload(text: &str) -> &str {
    let trimmed = text.trim();

    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return trimmed;
    }

    for fence in ["```json", "```"] {
        if let Some(start) = trimmed.find(fence) {
            let after = &trimmed[start + fence.len()..];
            if let Some(end) = after.find("```") {
                let inner = after[..end].trim();
                if inner.starts_with('{') || inner.starts_with('[') {
                    return inner;
                }
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return &trimmed[start..=end];
    }

    trimmed
}

// ── Normalization ───────────────────────────────────────────────────

/// Convert raw items into `Item`s with fresh ids, dropping unusable names.
pub fn normalize_items(raw_items: Vec<RawItem>) -> Vec<Item> {
    raw_items
        .into_iter()
        .filter_map(|raw| {
            let name = raw.name?.trim().to_string();
            if is_rejected_name(&name) {
                return None;
            }
            let quantity = match &raw.quantity {
                None => Some(1),
                Some(value) => normalize_quantity(value),
            };
            Some(Item::new(
                name,
                quantity,
                raw.description.unwrap_or_default().trim(),
            ))
        })
        .collect()
}

/// Positive integer quantities survive; everything else becomes `None`.
///
/// Integral floats (`3.0`) and numeric strings (`"12"`) are accepted.
pub fn normalize_quantity(value: &Value) -> Option<u32> {
    let n = match value {
        Value::Number(n) => {
            if let Some(i) = n.as_u64() {
                i
            } else {
                let f = n.as_f64()?;
                if f.fract() != 0.0 || f < 1.0 {
                    return None;
                }
                f as u64
            }
        }
        Value::String(s) => s.trim().parse::<u64>().ok()?,
        _ => return None,
    };
    u32::try_from(n).ok().filter(|q| *q > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use crate::error::{LlmError, OracleError};

    /// Oracle returning fixed answers and counting calls.
    struct FixedOracle {
        is_rfq: Result<bool, ()>,
        items: Result<String, ()>,
        extract_calls: AtomicUsize,
    }

    impl FixedOracle {
        fn new(is_rfq: bool, items: &str) -> Arc<Self> {
            Arc::new(Self {
                is_rfq: Ok(is_rfq),
                items: Ok(items.to_string()),
                extract_calls: AtomicUsize::new(0),
            })
        }
    }

    fn oracle_failure() -> OracleError {
        OracleError::Llm(LlmError::RequestFailed {
            provider: "mock".into(),
            reason: "unavailable".into(),
        })
    }

    #[async_trait]
    impl RfqOracle for FixedOracle {
        async fn classify(&self, _text: &str) -> Result<bool, OracleError> {
            self.is_rfq.map_err(|_| oracle_failure())
        }

        async fn extract_items(&self, _text: &str) -> Result<String, OracleError> {
            self.extract_calls.fetch_add(1, Ordering::SeqCst);
            self.items.clone().map_err(|_| oracle_failure())
        }
    }

    // ── Parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_object_with_items() {
        let raw = r#"{"items": [{"name": "Pump", "quantity": 2, "description": "Centrifugal"}]}"#;
        match parse_items_response(raw) {
            ParseOutcome::Parsed(items) => {
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].name.as_deref(), Some("Pump"));
                assert_eq!(items[0].quantity, Some(json!(2)));
            }
            other => panic!("Expected Parsed, got {:?}", other),
        }
    }

    #[test]
    fn parse_markdown_wrapped() {
        let raw = "Here you go:\n```json\n{\"items\": [{\"name\": \"Valve\"}]}\n```";
        assert!(matches!(parse_items_response(raw), ParseOutcome::Parsed(ref v) if v.len() == 1));
    }

    #[test]
    fn parse_bare_array() {
        let raw = r#"[{"name": "Hose"}, {"name": "Clamp"}]"#;
        assert!(matches!(parse_items_response(raw), ParseOutcome::Parsed(ref v) if v.len() == 2));
    }

    #[test]
    fn parse_missing_items_key_is_empty() {
        assert_eq!(parse_items_response(r#"{"note": "nothing"}"#), ParseOutcome::Parsed(vec![]));
    }

    #[test]
    fn parse_garbage_fails() {
        assert!(matches!(
            parse_items_response("I could not find any items, sorry."),
            ParseOutcome::Failed { .. }
        ));
    }

    #[test]
    fn parse_items_not_array_fails() {
        assert!(matches!(
            parse_items_response(r#"{"items": "Pump"}"#),
            ParseOutcome::Failed { .. }
        ));
    }

    #[test]
    fn parse_skips_non_object_entries() {
        let raw = r#"{"items": ["Pump", {"name": "Valve"}, 3]}"#;
        assert!(matches!(parse_items_response(raw), ParseOutcome::Parsed(ref v) if v.len() == 1));
    }

    // ── Quantity normalization ──────────────────────────────────────

    #[test]
    fn quantity_normalization() {
        assert_eq!(normalize_quantity(&json!(5)), Some(5));
        assert_eq!(normalize_quantity(&json!(3.0)), Some(3));
        assert_eq!(normalize_quantity(&json!(" 12 ")), Some(12));
        assert_eq!(normalize_quantity(&json!(0)), None);
        assert_eq!(normalize_quantity(&json!(-4)), None);
        assert_eq!(normalize_quantity(&json!(2.5)), None);
        assert_eq!(normalize_quantity(&json!("a dozen")), None);
        assert_eq!(normalize_quantity(&json!(null)), None);
        assert_eq!(normalize_quantity(&json!(u64::MAX)), None);
    }

    #[test]
    fn omitted_quantity_defaults_to_one_every_time() {
        let raw = RawItem {
            name: Some("Cable".into()),
            ..Default::default()
        };
        for _ in 0..3 {
            let items = normalize_items(vec![raw.clone()]);
            assert_eq!(items[0].quantity, Some(1));
            assert_eq!(items[0].description, "");
        }
    }

    #[test]
    fn explicit_null_quantity_is_none() {
        let raw = RawItem {
            name: Some("Cable".into()),
            quantity: Some(Value::Null),
            ..Default::default()
        };
        assert_eq!(normalize_items(vec![raw])[0].quantity, None);
    }

    #[test]
    fn normalization_ignores_oracle_ids_and_preserves_order() {
        let raw = r#"{"items": [
            {"id": "item1", "name": "Pump", "quantity": 2},
            {"id": "item2", "name": "Valve", "quantity": "4"},
            {"id": 3, "name": "Gasket"}
        ]}"#;
        let ParseOutcome::Parsed(raw_items) = parse_items_response(raw) else {
            panic!("expected parse");
        };
        let raw_ids: HashSet<String> = raw_items.iter().filter_map(|r| r.id.clone()).collect();
        let items = normalize_items(raw_items);

        assert_eq!(
            items.iter().map(|i| i.name.as_str()).collect::<Vec<_>>(),
            vec!["Pump", "Valve", "Gasket"]
        );
        let ids: HashSet<String> = items.iter().map(|i| i.id.to_string()).collect();
        assert_eq!(ids.len(), 3);
        assert!(ids.is_disjoint(&raw_ids));
    }

    #[test]
    fn normalization_drops_sentinel_and_unnamed() {
        let raw_items = vec![
            RawItem {
                name: Some("Wrong Request: gibberish".into()),
                ..Default::default()
            },
            RawItem::default(),
            RawItem {
                name: Some("Drill".into()),
                ..Default::default()
            },
        ];
        let items = normalize_items(raw_items);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "Drill");
    }

    // ── Verify-then-extract ─────────────────────────────────────────

    #[tokio::test]
    async fn negative_classification_never_extracts() {
        let oracle = FixedOracle::new(false, r#"{"items": [{"name": "Cake"}]}"#);
        let extractor = ItemExtractor::new(oracle.clone());

        let (classification, items) = extractor.verify_and_extract("Happy birthday!").await;
        assert!(!classification.is_request);
        assert!(items.is_empty());
        assert_eq!(oracle.extract_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn positive_classification_extracts() {
        let oracle = FixedOracle::new(true, r#"{"items": [{"name": "Widget", "quantity": 10}]}"#);
        let extractor = ItemExtractor::new(oracle);

        let (classification, items) = extractor.verify_and_extract("Please quote 10 widgets").await;
        assert!(classification.is_request);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].quantity, Some(10));
    }

    #[tokio::test]
    async fn classifier_error_fails_closed() {
        let oracle = Arc::new(FixedOracle {
            is_rfq: Err(()),
            items: Ok(r#"{"items": [{"name": "Widget"}]}"#.into()),
            extract_calls: AtomicUsize::new(0),
        });
        let extractor = ItemExtractor::new(oracle.clone());

        let (classification, items) = extractor.verify_and_extract("RFQ").await;
        assert!(!classification.is_request);
        assert!(items.is_empty());
        assert_eq!(oracle.extract_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn extraction_error_degrades_to_empty() {
        let oracle = Arc::new(FixedOracle {
            is_rfq: Ok(true),
            items: Err(()),
            extract_calls: AtomicUsize::new(0),
        });
        let extractor = ItemExtractor::new(oracle);

        let (classification, items) = extractor.verify_and_extract("RFQ").await;
        assert!(classification.is_request);
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn unparseable_extraction_degrades_to_empty() {
        let extractor = ItemExtractor::new(FixedOracle::new(true, "not json at all"));
        assert!(extractor.extract("RFQ").await.is_empty());
    }
}
