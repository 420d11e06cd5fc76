//! RFQ extraction pipeline.
//!
//! Every submission flows through:
//! 1. `ContentAcquirer::acquire()`: body plus attachment text
//! 2. `ItemExtractor::classify()`: binary RFQ gate (fail-closed)
//! 3. `ItemExtractor::extract()`: oracle JSON → normalized `Item`s
//! 4. `filter_items()`: drops sentinel and unnamed items
//! 5. `Dispatcher::dispatch()`: fan-out to every `ItemSink`
//!
//! **Extraction never runs on a negative classification.**

pub mod dispatch;
pub mod extractor;
pub mod filter;
pub mod oracle;
pub mod processor;
pub mod types;

pub use dispatch::{DispatchReport, Dispatcher, ItemSink};
pub use extractor::{ItemExtractor, ParseOutcome};
pub use oracle::{LlmOracle, RfqOracle};
pub use processor::RfqPipeline;
pub use types::{Item, PipelineOutcome, PipelineStage, RawSubmission, SubmissionMetadata};
