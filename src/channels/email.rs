//! Email intake: IMAP over rustls for unseen procurement emails.
//!
//! Fetching is blocking (raw IMAP over a TLS stream) and must run inside
//! `spawn_blocking`. Each fetched message is parsed with `mail-parser` into
//! a `FetchedEmail` carrying sender, subject, plain-text body and
//! attachments, and is marked `\Seen` right after it is fetched.

use std::io::Write as IoWrite;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mail_parser::{MessageParser, MimeHeaders};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ChannelError;

// ── Configuration ───────────────────────────────────────────────────

/// Email intake configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub username: String,
    pub password: SecretString,
    pub poll_interval_secs: u64,
    pub allowed_senders: Vec<String>,
    /// Upper bound on messages fetched per poll.
    pub max_per_poll: usize,
    /// Pipelines running at once.
    pub max_concurrent: usize,
}

impl EmailConfig {
    /// Build config from environment variables.
    /// Returns `None` if `EMAIL_IMAP_HOST` is not set (intake disabled).
    pub fn from_env() -> Option<Self> {
        let imap_host = std::env::var("EMAIL_IMAP_HOST")
            .ok()
            .filter(|s| !s.trim().is_empty())?;

        let parse_or = |key: &str, default: u64| -> u64 {
            std::env::var(key)
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(default)
        };

        let imap_port = u16::try_from(parse_or("EMAIL_IMAP_PORT", 993)).unwrap_or(993);
        let username = std::env::var("EMAIL_USERNAME").unwrap_or_default();
        let password = std::env::var("EMAIL_PASSWORD").unwrap_or_default();

        let mut allowed_senders: Vec<String> = std::env::var("EMAIL_ALLOWED_SENDERS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if allowed_senders.is_empty() {
            allowed_senders.push("*".to_string());
        }

        Some(Self {
            imap_host,
            imap_port,
            username,
            password: SecretString::from(password),
            poll_interval_secs: parse_or("EMAIL_POLL_INTERVAL_SECS", 60).max(1),
            allowed_senders,
            max_per_poll: parse_or("EMAIL_MAX_PER_POLL", 2000) as usize,
            max_concurrent: (parse_or("EMAIL_MAX_CONCURRENT", 2) as usize).max(1),
        })
    }
}

// ── Fetched message ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailAttachment {
    /// Name as sent; not yet safe to use as a path.
    pub filename: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct FetchedEmail {
    pub message_id: String,
    pub sender_email: String,
    pub sender_name: Option<String>,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<EmailAttachment>,
    pub received_at: DateTime<Utc>,
}

// ── Helpers (public for testing) ────────────────────────────────────

/// Check if a sender email is in the allowlist.
///
/// - Empty list → deny all
/// - `*` in list → allow all
/// - `@domain.com` or `domain.com` → domain match
/// - `user@domain.com` → exact email match
pub fn is_sender_allowed(allowed: &[String], email: &str) -> bool {
    if allowed.is_empty() {
        return false;
    }
    if allowed.iter().any(|a| a == "*") {
        return true;
    }
    let email_lower = email.to_lowercase();
    allowed.iter().any(|a| {
        if a.starts_with('@') {
            email_lower.ends_with(&a.to_lowercase())
        } else if a.contains('@') {
            a.eq_ignore_ascii_case(email)
        } else {
            email_lower.ends_with(&format!("@{}", a.to_lowercase()))
        }
    })
}

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse one raw RFC 822 message.
pub fn parse_email(raw: &[u8]) -> Option<FetchedEmail> {
    let parsed = MessageParser::default().parse(raw)?;

    let from = parsed.from().and_then(|addr| addr.first());
    let sender_email = from
        .and_then(|a| a.address())
        .map(str::to_string)
        .unwrap_or_else(|| "unknown".into());
    let sender_name = from
        .and_then(|a| a.name())
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());

    let subject = parsed.subject().unwrap_or("(no subject)").to_string();

    let body = if let Some(text) = parsed.body_text(0) {
        text.to_string()
    } else if let Some(html) = parsed.body_html(0) {
        strip_html(html.as_ref())
    } else {
        String::new()
    };

    let attachments = parsed
        .attachments()
        .filter_map(|part| {
            let filename = MimeHeaders::attachment_name(part)?.to_string();
            Some(EmailAttachment {
                filename,
                bytes: part.contents().to_vec(),
            })
        })
        .collect();

    let message_id = parsed
        .message_id()
        .map(str::to_string)
        .unwrap_or_else(|| format!("gen-{}", Uuid::new_v4()));

    let received_at = parsed
        .date()
        .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
        .unwrap_or_else(Utc::now);

    Some(FetchedEmail {
        message_id,
        sender_email,
        sender_name,
        subject,
        body,
        attachments,
        received_at,
    })
}

/// Message sequence numbers from `* SEARCH` response lines.
pub(crate) fn parse_search_response(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .filter(|l| l.starts_with("* SEARCH"))
        .flat_map(|l| l.split_whitespace().skip(2).map(str::to_string))
        .collect()
}

/// The RFC822 literal from a `FETCH n RFC822` response.
///
/// Lines between the `* n FETCH (RFC822 {len}` header and the tagged
/// completion are joined and cut to the announced octet count, which drops
/// the closing `)` line. Without a usable count a bare `)` line is dropped.
pub(crate) fn fetch_literal(lines: &[String]) -> String {
    let inner = lines
        .get(1..lines.len().saturating_sub(1))
        .unwrap_or_default();
    let mut raw = inner.concat();

    match lines.first().and_then(|header| literal_len(header)) {
        Some(len) if len <= raw.len() && raw.is_char_boundary(len) => raw.truncate(len),
        _ => {
            if inner.last().is_some_and(|l| l.trim() == ")") {
                raw = inner[..inner.len() - 1].concat();
            }
        }
    }
    raw
}

/// Octet count from a `{123}` literal marker at the end of a line.
fn literal_len(line: &str) -> Option<usize> {
    let line = line.trim_end();
    let open = line.rfind('{')?;
    line.strip_suffix('}')?.get(open + 1..)?.parse().ok()
}

// ── IMAP ────────────────────────────────────────────────────────────

/// Error type for IMAP fetch operations.
type ImapError = Box<dyn std::error::Error + Send + Sync>;

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

fn read_line(tls: &mut TlsStream) -> Result<String, ImapError> {
    let mut buf = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        match std::io::Read::read(tls, &mut byte) {
            Ok(0) => return Err("IMAP connection closed".into()),
            Ok(_) => {
                buf.push(byte[0]);
                if buf.ends_with(b"\r\n") {
                    return Ok(String::from_utf8_lossy(&buf).to_string());
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn send_cmd(tls: &mut TlsStream, tag: &str, cmd: &str) -> Result<Vec<String>, ImapError> {
    let full = format!("{tag} {cmd}\r\n");
    IoWrite::write_all(tls, full.as_bytes())?;
    IoWrite::flush(tls)?;
    let mut lines = Vec::new();
    loop {
        let line = read_line(tls)?;
        let done = line.starts_with(tag);
        lines.push(line);
        if done {
            break;
        }
    }
    Ok(lines)
}

fn connect(config: &EmailConfig) -> Result<TlsStream, ImapError> {
    let tcp = TcpStream::connect((&*config.imap_host, config.imap_port))?;
    tcp.set_read_timeout(Some(Duration::from_secs(30)))?;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name = rustls::pki_types::ServerName::try_from(config.imap_host.clone())?;
    let conn = rustls::ClientConnection::new(tls_config, server_name)?;
    Ok(rustls::StreamOwned::new(conn, tcp))
}

/// Fetch unseen emails (blocking, run in spawn_blocking).
///
/// At most `max_per_poll` messages are fetched; each is marked `\Seen`
/// after its FETCH regardless of whether it parsed.
pub fn fetch_unseen_imap(config: &EmailConfig) -> Result<Vec<FetchedEmail>, ChannelError> {
    fetch_unseen_inner(config).map_err(|e| {
        let reason = e.to_string();
        if reason.contains("login failed") {
            ChannelError::AuthFailed {
                name: "email".into(),
            }
        } else {
            ChannelError::FetchFailed {
                name: "email".into(),
                reason,
            }
        }
    })
}

fn fetch_unseen_inner(config: &EmailConfig) -> Result<Vec<FetchedEmail>, ImapError> {
    let mut tls = connect(config)?;

    let _greeting = read_line(&mut tls)?;

    let login_resp = send_cmd(
        &mut tls,
        "A1",
        &format!(
            "LOGIN \"{}\" \"{}\"",
            config.username,
            config.password.expose_secret()
        ),
    )?;
    if !login_resp.last().is_some_and(|l| l.contains("OK")) {
        return Err("IMAP login failed".into());
    }

    let _select = send_cmd(&mut tls, "A2", "SELECT \"INBOX\"")?;

    let search_resp = send_cmd(&mut tls, "A3", "SEARCH UNSEEN")?;
    let mut ids = parse_search_response(&search_resp);
    debug!(unseen = ids.len(), "IMAP search complete");
    ids.truncate(config.max_per_poll);

    let mut results = Vec::new();
    let mut tag_counter = 4_u32;

    for id in &ids {
        let fetch_tag = format!("A{tag_counter}");
        tag_counter += 1;
        let fetch_resp = send_cmd(&mut tls, &fetch_tag, &format!("FETCH {id} RFC822"))?;

        let raw = fetch_literal(&fetch_resp);

        match parse_email(raw.as_bytes()) {
            Some(email) => results.push(email),
            None => warn!(id = %id, "Failed to parse fetched email"),
        }

        let store_tag = format!("A{tag_counter}");
        tag_counter += 1;
        if let Err(e) = send_cmd(&mut tls, &store_tag, &format!("STORE {id} +FLAGS (\\Seen)")) {
            warn!(id = %id, error = %e, "Failed to mark email as seen");
        }
    }

    let logout_tag = format!("A{tag_counter}");
    let _ = send_cmd(&mut tls, &logout_tag, "LOGOUT");

    Ok(results)
}

// ── Tests ───────────────────────────────────────────────────────────
