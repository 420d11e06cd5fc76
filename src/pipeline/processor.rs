//! RFQ pipeline: turns one submission into delivered items.
//!
//! Flow:
//! 1. Content acquisition (body + attachment text, attachment failure is non-fatal)
//! 2. Classification (fail-closed binary gate)
//! 3. Item extraction (only on a positive verdict)
//! 4. Filtering
//! 5. Fan-out to sinks
//!
//! `process` never returns an error. Every recoverable failure is logged
//! and reflected in the `PipelineOutcome`.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::Error;
use crate::extract::{ContentAcquirer, DocumentExtractor};
use crate::pipeline::dispatch::Dispatcher;
use crate::pipeline::extractor::ItemExtractor;
use crate::pipeline::filter::filter_items;
use crate::pipeline::oracle::{LlmOracle, RfqOracle};
use crate::pipeline::types::{PipelineOutcome, PipelineStage, RawSubmission, SubmissionMetadata};
use crate::sinks::{PersistSink, WhatsAppNotifier};
use crate::store::{LibSqlBackend, RfqStore};

pub struct RfqPipeline {
    content: ContentAcquirer,
    extractor: ItemExtractor,
    dispatcher: Dispatcher,
}

impl RfqPipeline {
    pub fn new(content: ContentAcquirer, oracle: Arc<dyn RfqOracle>, dispatcher: Dispatcher) -> Self {
        Self {
            content,
            extractor: ItemExtractor::new(oracle),
            dispatcher,
        }
    }

    /// Wire the production pipeline: LLM oracle, libSQL persistence and,
    /// when configured, WhatsApp notification.
    ///
    /// Fails on a missing oracle credential or an unopenable database.
    pub async fn from_config(config: &PipelineConfig) -> Result<Self, Error> {
        let oracle = Arc::new(LlmOracle::from_config(&config.llm)?);

        let store: Arc<dyn RfqStore> = Arc::new(LibSqlBackend::new_local(&config.store.db_path).await?);
        let http = reqwest::Client::new();

        let mut dispatcher = Dispatcher::new().with_sink(Arc::new(PersistSink::new(
            store,
            config.numbering.clone(),
        )));
        match &config.whatsapp {
            Some(whatsapp) => {
                dispatcher = dispatcher.with_sink(Arc::new(WhatsAppNotifier::new(
                    http,
                    whatsapp.clone(),
                )));
            }
            None => info!("Twilio not configured, WhatsApp notification disabled"),
        }

        let extractor =
            DocumentExtractor::from_configs(config.azure_layout.clone(), config.vision.clone());

        info!(sinks = ?dispatcher.sink_names(), "Pipeline ready");
        Ok(Self::new(
            ContentAcquirer::new(Arc::new(extractor)),
            oracle,
            dispatcher,
        ))
    }

    /// Run one submission through every stage.
    pub async fn process(&self, submission: RawSubmission) -> PipelineOutcome {
        let run_id = Uuid::new_v4();
        let metadata = submission.metadata.unwrap_or_default();
        let mut stage = PipelineStage::Received;

        info!(
            run = %run_id,
            subject = metadata.subject.as_deref().unwrap_or(""),
            sender = metadata.client_name(),
            has_attachment = submission.attachment_path.is_some(),
            "Processing submission"
        );

        // Step 1: Content acquisition
        if submission.attachment_path.is_some() {
            stage = transition(run_id, stage, PipelineStage::ExtractingAttachment);
        }
        let text = self
            .content
            .acquire(&submission.body, submission.attachment_path.as_deref())
            .await;

        // Steps 2-3: Classification, then extraction on a positive verdict
        stage = transition(run_id, stage, PipelineStage::Classifying);
        let (classification, extracted) = self.extractor.verify_and_extract(&text).await;
        if !classification.is_request {
            transition(run_id, stage, PipelineStage::Rejected);
            return PipelineOutcome::rejected();
        }
        stage = transition(run_id, stage, PipelineStage::ExtractingItems);

        // Step 4: Filtering
        stage = transition(run_id, stage, PipelineStage::Filtering);
        let items = filter_items(extracted);

        // Step 5: Fan-out
        stage = transition(run_id, stage, PipelineStage::Dispatching);
        let dispatch = self.dispatcher.dispatch(&items, &metadata).await;

        let stage = transition(run_id, stage, PipelineStage::Done);
        info!(
            run = %run_id,
            items = items.len(),
            delivered = dispatch.delivered.len(),
            failed = dispatch.failed.len(),
            "Submission processed"
        );

        PipelineOutcome {
            items,
            is_request: true,
            stage,
            dispatch,
        }
    }

    /// Convenience wrapper over `process`.
    pub async fn process_parts(
        &self,
        body: impl Into<String>,
        attachment_path: Option<&Path>,
        metadata: Option<SubmissionMetadata>,
    ) -> PipelineOutcome {
        self.process(RawSubmission {
            body: body.into(),
            attachment_path: attachment_path.map(Path::to_path_buf),
            metadata,
        })
        .await
    }
}

fn transition(run_id: Uuid, from: PipelineStage, to: PipelineStage) -> PipelineStage {
    debug!(run = %run_id, from = from.label(), to = to.label(), "Pipeline stage");
    to
}
