//! Configuration types.
//!
//! Every section is built from environment variables by its own
//! `from_env()`. Optional integrations return `None` when unconfigured;
//! only the oracle credential is mandatory.

use std::path::PathBuf;

use crate::channels::email::EmailConfig;
use crate::error::ConfigError;
use crate::extract::{AzureLayoutConfig, VisionConfig};
use crate::llm::LlmConfig;
use crate::sinks::WhatsAppConfig;

const DEFAULT_DB_PATH: &str = "./data/rfq-intake.db";
const DEFAULT_RFQ_PREFIX: &str = "INQ13QP";

/// Database location.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub db_path: PathBuf,
}

impl StoreConfig {
    pub fn from_env() -> Self {
        Self {
            db_path: std::env::var("RFQ_DB_PATH")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
        }
    }
}

/// RFQ number scheme: `{prefix}-{year}-{seq:05}`.
///
/// `year` is `None` unless pinned by `RFQ_YEAR`; the store then uses the
/// UTC year at the moment each RFQ is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RfqNumbering {
    pub prefix: String,
    pub year: Option<i32>,
}

impl Default for RfqNumbering {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_RFQ_PREFIX.to_string(),
            year: None,
        }
    }
}

impl RfqNumbering {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let prefix = std::env::var("RFQ_PREFIX")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.prefix);

        let year = match std::env::var("RFQ_YEAR") {
            Ok(raw) if !raw.trim().is_empty() => Some(raw.trim().parse::<i32>().map_err(|e| {
                ConfigError::InvalidValue {
                    key: "RFQ_YEAR".to_string(),
                    message: format!("'{raw}' is not a year: {e}"),
                }
            })?),
            _ => defaults.year,
        };

        Ok(Self { prefix, year })
    }
}

/// Full service configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub llm: LlmConfig,
    pub azure_layout: Option<AzureLayoutConfig>,
    pub vision: Option<VisionConfig>,
    pub whatsapp: Option<WhatsAppConfig>,
    pub store: StoreConfig,
    pub numbering: RfqNumbering,
    pub email: Option<EmailConfig>,
}

impl PipelineConfig {
    /// Build from environment variables.
    ///
    /// Fails only on a missing oracle credential or a malformed value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            llm: LlmConfig::from_env()?,
            azure_layout: AzureLayoutConfig::from_env(),
            vision: VisionConfig::from_env(),
            whatsapp: WhatsAppConfig::from_env(),
            store: StoreConfig::from_env(),
            numbering: RfqNumbering::from_env()?,
            email: EmailConfig::from_env(),
        })
    }
}
