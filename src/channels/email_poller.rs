//! IMAP poller: fetches unseen emails and runs each through the pipeline.
//!
//! Each poll cycle:
//! 1. Fetches unseen emails via IMAP (marked `\Seen` during fetch)
//! 2. Drops senders outside the allowlist
//! 3. Saves the first attachment into a per-email `TempDir`
//! 4. Runs `RfqPipeline::process`, at most `max_concurrent` at a time
//!
//! The temp directory is owned by the per-email future, so it is removed
//! when processing finishes or the future is dropped.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::StreamExt;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::channels::email::{EmailAttachment, EmailConfig, FetchedEmail, fetch_unseen_imap, is_sender_allowed};
use crate::error::ChannelError;
use crate::pipeline::processor::RfqPipeline;
use crate::pipeline::types::{PipelineOutcome, RawSubmission, SubmissionMetadata};

/// Totals for one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub fetched: usize,
    pub blocked: usize,
    pub processed: usize,
    pub requests: usize,
    pub items: usize,
}

/// Spawn a background task that polls IMAP and processes new emails.
///
/// Returns a `JoinHandle` and a shutdown flag. Set the flag to stop polling.
pub fn spawn_email_poller(
    config: EmailConfig,
    pipeline: Arc<RfqPipeline>,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(
            "Email poller started, polling every {}s on {}",
            config.poll_interval_secs, config.imap_host
        );

        let mut tick = tokio::time::interval(Duration::from_secs(config.poll_interval_secs));

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Email poller shutting down");
                return;
            }

            if let Err(e) = poll_once(&config, &pipeline).await {
                error!("Email poll failed: {e}");
            }
        }
    });

    (handle, shutdown_flag)
}

/// Run a single poll cycle: fetch unseen → process.
pub async fn poll_once(
    config: &EmailConfig,
    pipeline: &Arc<RfqPipeline>,
) -> Result<PollSummary, ChannelError> {
    let cfg = config.clone();
    let emails = tokio::task::spawn_blocking(move || fetch_unseen_imap(&cfg))
        .await
        .map_err(|e| ChannelError::FetchFailed {
            name: "email".into(),
            reason: format!("poll task panicked: {e}"),
        })??;

    if emails.is_empty() {
        debug!("No unseen emails");
        return Ok(PollSummary::default());
    }

    debug!("Fetched {} unseen emails", emails.len());
    Ok(process_fetched(
        pipeline,
        emails,
        &config.allowed_senders,
        config.max_concurrent,
    )
    .await)
}

/// Allowlist filter, then bounded-concurrency pipeline runs.
pub async fn process_fetched(
    pipeline: &Arc<RfqPipeline>,
    emails: Vec<FetchedEmail>,
    allowed_senders: &[String],
    max_concurrent: usize,
) -> PollSummary {
    let mut summary = PollSummary {
        fetched: emails.len(),
        ..Default::default()
    };

    let accepted: Vec<FetchedEmail> = emails
        .into_iter()
        .filter(|email| {
            let allowed = is_sender_allowed(allowed_senders, &email.sender_email);
            if !allowed {
                warn!(sender = %email.sender_email, "Blocked email from sender outside allowlist");
            }
            allowed
        })
        .collect();
    summary.blocked = summary.fetched - accepted.len();

    let outcomes: Vec<PipelineOutcome> = futures::stream::iter(accepted)
        .map(|email| process_email(Arc::clone(pipeline), email))
        .buffer_unordered(max_concurrent.max(1))
        .collect()
        .await;

    for outcome in &outcomes {
        summary.processed += 1;
        if outcome.is_request {
            summary.requests += 1;
        }
        summary.items += outcome.items.len();
    }

    info!(
        fetched = summary.fetched,
        blocked = summary.blocked,
        requests = summary.requests,
        items = summary.items,
        "Email poll complete"
    );
    summary
}

async fn process_email(pipeline: Arc<RfqPipeline>, email: FetchedEmail) -> PipelineOutcome {
    info!(
        message_id = %email.message_id,
        sender = %email.sender_email,
        subject = %email.subject,
        received_at = %email.received_at.to_rfc3339(),
        attachments = email.attachments.len(),
        "Processing email"
    );

    // Held until the pipeline finishes; dropping it deletes the attachment.
    let saved: Option<(TempDir, PathBuf)> = match email.attachments.first() {
        Some(attachment) => match save_attachment(attachment).await {
            Ok(saved) => Some(saved),
            Err(e) => {
                warn!(filename = %attachment.filename, error = %e, "Failed to save attachment, continuing with body only");
                None
            }
        },
        None => None,
    };
    let attachment_path = saved.as_ref().map(|(_, path)| path.clone());

    let submission = RawSubmission {
        body: email.body,
        attachment_path,
        metadata: Some(SubmissionMetadata {
            subject: Some(email.subject),
            sender_name: email.sender_name,
            sender_email: Some(email.sender_email),
        }),
    };

    pipeline.process(submission).await
}

async fn save_attachment(attachment: &EmailAttachment) -> std::io::Result<(TempDir, PathBuf)> {
    let dir = tempfile::Builder::new().prefix("rfq-attachment-").tempdir()?;
    let path = dir.path().join(sanitize_filename(&attachment.filename));
    tokio::fs::write(&path, &attachment.bytes).await?;
    Ok((dir, path))
}

/// Reduce an attachment name to a single safe path component.
///
/// Directory parts are discarded and anything outside `[A-Za-z0-9._-]`
/// becomes `_`. The extension survives so file-type routing still works.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "attachment".to_string()
    } else {
        cleaned.to_string()
    }
}
