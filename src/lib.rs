pub mod config;
pub mod dom_index;
pub mod extractor;
pub mod fetch;
pub mod ledger;
pub mod links;
pub mod models;
pub mod pipeline;
pub mod repair;
pub mod selectors;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use config::AppConfig;
pub use dom_index::{ClassSet, DomIndex, StructuralPath};
pub use extractor::Extractor;
pub use fetch::{Fetcher, RawDocument};
pub use ledger::Ledger;
pub use models::ProductRecord;
pub use pipeline::{BatchPipeline, BatchSummary, PipelineOptions};
pub use repair::{ConfigRepair, DriftEntry, RepairOutcome};
pub use selectors::{SelectorConfig, SelectorRule, SelectorStore};
pub use store::RecordStore;
pub use utils::error::{AppError, FetchError};

pub type Result<T> = std::result::Result<T, AppError>;
