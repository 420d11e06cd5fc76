//! Persistence sink: one RFQ record per delivered batch.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::RfqNumbering;
use crate::error::SinkError;
use crate::pipeline::dispatch::ItemSink;
use crate::pipeline::types::{Item, SubmissionMetadata};
use crate::store::{NewRfq, RfqStore};

pub struct PersistSink {
    store: Arc<dyn RfqStore>,
    numbering: RfqNumbering,
}

impl PersistSink {
    pub fn new(store: Arc<dyn RfqStore>, numbering: RfqNumbering) -> Self {
        Self { store, numbering }
    }
}

/// Header fields for a new RFQ built from who sent it.
pub(crate) fn new_rfq_from(metadata: &SubmissionMetadata, numbering: &RfqNumbering) -> NewRfq {
    let subject = metadata
        .subject
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or("No Subject");
    let sender_email = metadata
        .sender_email
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or("Unknown Sender");

    NewRfq {
        client_name: metadata.client_name().to_string(),
        notes: Some(format!(
            "Auto-created from email: {subject}\n\nSender: {sender_email}"
        )),
        prefix: numbering.prefix.clone(),
        year: numbering.year,
    }
}

#[async_trait]
impl ItemSink for PersistSink {
    fn name(&self) -> &str {
        "persist"
    }

    async fn deliver(&self, items: &[Item], metadata: &SubmissionMetadata) -> Result<(), SinkError> {
        let rfq = new_rfq_from(metadata, &self.numbering);
        let stored = self.store.create_rfq_with_items(&rfq, items).await?;
        info!(
            rfq_number = %stored.rfq_number,
            client = %stored.client_name,
            items = items.len(),
            "Created RFQ"
        );
        Ok(())
    }
}
