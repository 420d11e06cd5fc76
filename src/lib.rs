//! RFQ intake: turns inbound procurement emails into stored, notified line items.

pub mod channels;
pub mod config;
pub mod error;
pub mod extract;
pub mod llm;
pub mod pipeline;
pub mod sinks;
pub mod store;
