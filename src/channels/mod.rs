//! Inbound channels feeding the RFQ pipeline.

pub mod email;
pub mod email_poller;

pub use email::{EmailAttachment, EmailConfig, FetchedEmail};
pub use email_poller::{PollSummary, poll_once, spawn_email_poller};
