//! Classification + extraction oracle backed by an LLM.
//!
//! Two independent calls with no shared context:
//! 1. `classify()`: zero-temperature binary gate, answers `True`/`False`
//! 2. `extract_items()`: returns raw JSON text with an `items` array
//!
//! The oracle only talks to the model. Parsing and normalization of its
//! output live in `pipeline::extractor`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{Error, OracleError};
use crate::llm::costs;
use crate::llm::{ChatMessage, CompletionRequest, LlmConfig, LlmProvider, create_provider};

/// Max tokens for the classifier. A single word is expected, but the
/// OpenAI Responses API rejects `max_output_tokens` below 16.
const CLASSIFY_MAX_TOKENS: u32 = 16;

/// Classification is a gate, not generation.
const CLASSIFY_TEMPERATURE: f32 = 0.0;

const EXTRACT_MAX_TOKENS: u32 = 1500;

const EXTRACT_TEMPERATURE: f32 = 0.2;

/// Upper bound on characters sent to the model per call.
pub const MAX_ORACLE_INPUT_CHARS: usize = 60_000;

/// The only response that classifies positive.
const POSITIVE_TOKEN: &str = "True";

/// External classification + extraction service.
#[async_trait]
pub trait RfqOracle: Send + Sync {
    /// Is this text a procurement request?
    async fn classify(&self, text: &str) -> Result<bool, OracleError>;

    /// Extract items from text already classified positive. Returns raw model output.
    async fn extract_items(&self, text: &str) -> Result<String, OracleError>;
}

/// `RfqOracle` implementation over any `LlmProvider`.
pub struct LlmOracle {
    llm: Arc<dyn LlmProvider>,
}

impl LlmOracle {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    /// Build from configuration.
    ///
    /// Credentials are resolved when `LlmConfig` is built; a missing key never
    /// reaches this point.
    pub fn from_config(config: &LlmConfig) -> Result<Self, Error> {
        let llm = create_provider(config)?;
        Ok(Self::new(llm))
    }

    async fn call(
        &self,
        purpose: &'static str,
        request: CompletionRequest,
    ) -> Result<String, OracleError> {
        let response = self.llm.complete(request).await?;
        let cost = costs::estimate(
            self.llm.cost_per_token(),
            response.input_tokens,
            response.output_tokens,
        );
        debug!(
            purpose,
            model = self.llm.model_name(),
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            cost_usd = %cost,
            "Oracle call complete"
        );
        Ok(response.content)
    }
}

#[async_trait]
impl RfqOracle for LlmOracle {
    async fn classify(&self, text: &str) -> Result<bool, OracleError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_classify_system_prompt()),
            ChatMessage::user(truncate_input(text)),
        ])
        .with_temperature(CLASSIFY_TEMPERATURE)
        .with_max_tokens(CLASSIFY_MAX_TOKENS);

        let raw = self.call("classify", request).await?;
        Ok(parse_classification(&raw))
    }

    async fn extract_items(&self, text: &str) -> Result<String, OracleError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_extract_system_prompt()),
            ChatMessage::user(build_extract_user_prompt(text)),
        ])
        .with_temperature(EXTRACT_TEMPERATURE)
        .with_max_tokens(EXTRACT_MAX_TOKENS);

        let raw = self.call("extract", request).await?;
        if raw.trim().is_empty() {
            return Err(OracleError::Unusable("empty extraction response".into()));
        }
        Ok(raw)
    }
}

// ── Prompt construction ─────────────────────────────────────────────

fn build_classify_system_prompt() -> String {
    "You are a procurement assistant. Decide whether the following text is a \
     Request for Quotation (RFQ): a request for prices or a quote on goods. \
     Keywords: RFQ, Request for Quotation, Quotation request, Pricing request.\n\n\
     Answer with exactly one word: True or False. No punctuation, no explanation."
        .to_string()
}

fn build_extract_system_prompt() -> String {
    "You are a procurement assistant. Extract every individual item being procured \
     from the text.\n\n\
     For each item provide:\n\
     - \"name\": a clear, descriptive item name. Do not invent product names.\n\
     - \"quantity\": the number of units as an integer. If not mentioned, use 1.\n\
     - \"description\": a short description with key specifications. If the item is \
     unclear or ambiguous, use \"Not sure about the product.\"\n\n\
     If the text does not describe real items, return a single item whose name starts \
     with \"Wrong Request\".\n\n\
     Respond with ONLY a JSON object, no commentary:\n\
     {\"items\": [{\"name\": \"...\", \"quantity\": 1, \"description\": \"...\"}]}"
        .to_string()
}

fn build_extract_user_prompt(text: &str) -> String {
    format!(
        "Extract procurement items from the following text:\n\n{}",
        truncate_input(text)
    )
}

/// Cap oracle input at `MAX_ORACLE_INPUT_CHARS` characters.
fn truncate_input(text: &str) -> String {
    match text.char_indices().nth(MAX_ORACLE_INPUT_CHARS) {
        Some((cut, _)) => {
            warn!(
                chars = text.chars().count(),
                limit = MAX_ORACLE_INPUT_CHARS,
                "Oracle input truncated"
            );
            text[..cut].to_string()
        }
        None => text.to_string(),
    }
}

// ── Response parsing ────────────────────────────────────────────────

/// Fail-closed: anything other than exactly `True` is negative.
fn parse_classification(raw: &str) -> bool {
    let answer = raw.trim();
    if answer == POSITIVE_TOKEN {
        return true;
    }
    if answer != "False" {
        warn!(response = %answer, "Unexpected classifier response, treating as not an RFQ");
    }
    false
}
