//! Item sinks registered with the dispatcher.

pub mod persist;
pub mod whatsapp;

pub use persist::PersistSink;
pub use whatsapp::{WhatsAppConfig, WhatsAppNotifier, format_message};
