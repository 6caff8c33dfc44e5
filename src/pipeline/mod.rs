pub mod document;
pub mod cleaner;
pub mod analysis;
pub mod breaker;
pub mod monitor;
pub mod providers;
pub mod merge;
pub mod critical;
pub mod state;
pub mod context;
pub mod output;
pub mod storage;
pub mod diagnostic; // Run artifacts, TENDER_DUMP_DIR only
pub mod orchestrator;


use thiserror::Error;

use document::InputError;
use providers::ProviderError;

/// Errors that end a run. Everything else degrades inside the pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error("No analysis method produced a result: {0}")]
    NoResult(String),

    #[error("External services disabled: {0}")]
    ExternalGated(String),

    #[error("Provider setup failed: {0}")]
    Setup(#[from] ProviderError),
}
