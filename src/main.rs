use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use rfq_intake::channels::{poll_once, spawn_email_poller};
use rfq_intake::config::PipelineConfig;
use rfq_intake::pipeline::{Item, RfqPipeline};
use rfq_intake::sinks::{WhatsAppConfig, WhatsAppNotifier, format_message};

#[derive(Parser)]
#[command(name = "rfq-intake")]
#[command(about = "Turns inbound procurement emails into stored, notified RFQ line items")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll IMAP and process unseen emails
    EmailService {
        /// Run a single poll cycle, print a summary and exit
        #[arg(long)]
        once: bool,
    },
    /// Run one submission and print the items as JSON
    Process {
        /// File holding the message body, or `-` for stdin
        body: String,
        /// Optional attachment to extract alongside the body
        attachment: Option<PathBuf>,
    },
    /// Send a sample WhatsApp notification
    TestWhatsapp,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    let _log_guard = init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Command::EmailService { once } => run_email_service(once).await,
        Command::Process { body, attachment } => run_process(&body, attachment).await,
        Command::TestWhatsapp => run_test_whatsapp().await,
    }
}

/// Stderr logging, plus a daily-rotated file under `RFQ_LOG_DIR` when set.
///
/// The returned guard must outlive `main` or buffered file lines are lost.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    match std::env::var("RFQ_LOG_DIR").ok().filter(|d| !d.trim().is_empty()) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "rfq-intake.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(file)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}

async fn run_email_service(once: bool) -> anyhow::Result<()> {
    let config = PipelineConfig::from_env()?;
    let email = config
        .email
        .clone()
        .context("email-service needs EMAIL_IMAP_HOST, EMAIL_USERNAME and EMAIL_PASSWORD")?;
    let pipeline = Arc::new(RfqPipeline::from_config(&config).await?);

    eprintln!("📬 RFQ intake v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   IMAP: {}@{}:{}", email.username, email.imap_host, email.imap_port);
    eprintln!("   Database: {}", config.store.db_path.display());

    if once {
        let summary = poll_once(&email, &pipeline).await?;
        println!("{}", serde_json::to_string_pretty(&serde_json::json!({
            "fetched": summary.fetched,
            "blocked": summary.blocked,
            "processed": summary.processed,
            "requests": summary.requests,
            "items": summary.items,
        }))?);
        return Ok(());
    }

    let (handle, shutdown) = spawn_email_poller(email, pipeline);
    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received, stopping email poller");
    shutdown.store(true, Ordering::Relaxed);
    handle.abort();
    Ok(())
}

async fn run_process(body_source: &str, attachment: Option<PathBuf>) -> anyhow::Result<()> {
    let body = if body_source == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        tokio::fs::read_to_string(body_source)
            .await
            .with_context(|| format!("Failed to read {body_source}"))?
    };

    let config = PipelineConfig::from_env()?;
    let pipeline = RfqPipeline::from_config(&config).await?;
    let outcome = pipeline.process_parts(body, attachment.as_deref(), None).await;

    info!(
        is_request = outcome.is_request,
        stage = outcome.stage.label(),
        failed_sinks = outcome.dispatch.failed.len(),
        "Submission finished"
    );
    println!("{}", serde_json::to_string_pretty(&outcome.items)?);
    Ok(())
}

async fn run_test_whatsapp() -> anyhow::Result<()> {
    let config = WhatsAppConfig::from_env()
        .context("test-whatsapp needs TWILIO_SID, TWILIO_AUTH_TOKEN and WHATSAPP_NUMBER")?;
    let notifier = WhatsAppNotifier::new(reqwest::Client::new(), config);

    let sample = vec![
        Item::new("Ball valve DN50", Some(12), "PN16, stainless"),
        Item::new("Gasket set", None, ""),
    ];
    notifier.send(&format_message(&sample)).await?;
    println!("WhatsApp test message sent");
    Ok(())
}
