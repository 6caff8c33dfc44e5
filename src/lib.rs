pub mod config;
pub mod pipeline;

use tracing_subscriber::EnvFilter;

pub use pipeline::context::PipelineContext;
pub use pipeline::orchestrator::{AnalyzeOptions, PipelineOrchestrator, ProgressEvent};
pub use pipeline::output::AnalysisOutput;
pub use pipeline::state::ProviderFilter;

/// Install the fmt subscriber. `RUST_LOG` wins over the default filter.
/// A second call is a no-op.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
