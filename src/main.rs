use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;

use clap::Parser;
use tender_analyzer::pipeline::storage::JsonDirStore;
use tender_analyzer::{config, AnalyzeOptions, PipelineContext, PipelineOrchestrator, ProviderFilter};

/// Extract structured catering-tender data from a procurement document.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Document to analyze
    #[arg(required_unless_present = "health")]
    path: Option<PathBuf>,

    /// Provider selection for scanned documents: auto, custom, layout or semantic
    #[arg(short, long, default_value_t = ProviderFilter::Auto, value_parser = ProviderFilter::from_str)]
    provider: ProviderFilter,

    /// Document type hint, e.g. idari_sartname or ilan
    #[arg(short, long)]
    doc_type: Option<String>,

    /// Persist successful analyses as JSON under this directory
    #[arg(short, long)]
    save_dir: Option<PathBuf>,

    /// Report provider health instead of analyzing
    #[arg(long)]
    health: bool,
}

fn main() -> ExitCode {
    tender_analyzer::init_tracing();
    let args = Args::parse();

    tracing::info!("{} v{}", config::APP_NAME, config::APP_VERSION);

    let mut orchestrator = match PipelineOrchestrator::from_context(PipelineContext::from_env()) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(2);
        }
    };

    if let Some(dir) = &args.save_dir {
        match JsonDirStore::new(dir) {
            Ok(store) => orchestrator = orchestrator.with_store(store),
            Err(e) => {
                eprintln!("cannot use {}: {e}", dir.display());
                return ExitCode::from(2);
            }
        }
    }

    let (json, ok) = match args.path.as_deref() {
        Some(path) if !args.health => {
            let mut options = AnalyzeOptions::default().with_provider(args.provider);
            options.doc_type = args.doc_type;
            let output = orchestrator.analyze_document(path, options);
            (serde_json::to_string_pretty(&output), output.is_success())
        }
        _ => {
            let health = orchestrator.check_pipeline_health();
            (serde_json::to_string_pretty(&health), health.healthy)
        }
    };

    match json {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("cannot serialize output: {e}");
            return ExitCode::FAILURE;
        }
    }

    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn provider_and_hints_parse() {
        let args = Args::try_parse_from([
            "tender-analyzer",
            "ilan.pdf",
            "--provider",
            "layout",
            "--doc-type",
            "ilan",
        ])
        .unwrap();
        assert_eq!(args.path, Some(PathBuf::from("ilan.pdf")));
        assert_eq!(args.provider, ProviderFilter::Layout);
        assert_eq!(args.doc_type.as_deref(), Some("ilan"));
        assert!(!args.health);
    }

    #[test]
    fn provider_defaults_to_auto() {
        let args = Args::try_parse_from(["tender-analyzer", "ilan.pdf"]).unwrap();
        assert_eq!(args.provider, ProviderFilter::Auto);
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let err = Args::try_parse_from(["tender-analyzer", "ilan.pdf", "--provider", "ocr"])
            .unwrap_err();
        assert!(err.to_string().contains("unknown provider"));
    }

    #[test]
    fn path_required_unless_health() {
        assert!(Args::try_parse_from(["tender-analyzer"]).is_err());
        let args = Args::try_parse_from(["tender-analyzer", "--health"]).unwrap();
        assert!(args.health);
        assert!(args.path.is_none());
    }
}
