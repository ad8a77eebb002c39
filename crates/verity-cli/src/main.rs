//! `verity` command-line entry point.

mod backends;
mod display;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use verity_core::{
    AnalysisConfig, ComplianceReport, Framework, PolicyDocument, SectionSplitter, StrategyKind,
};
use verity_engine::{AnalysisPipeline, ComplianceAgent, cancel_pair};
use verity_store::RetrievalClient;

const DEFAULT_TABLE: &str = "regulatory_chunks";

/// Evidence-grounded policy compliance analysis.
///
/// Splits a policy document into sections, retrieves the regulation passages
/// relevant to each, and asks a language model for a cited verdict. The
/// result is a decision-support report, not a legal determination.
#[derive(Parser, Debug)]
#[command(name = "verity", version, about, long_about = None)]
struct Cli {
    /// Debug-level logging (RUST_LOG overrides).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// TOML analysis configuration.
    #[arg(long, global = true, env = "VERITY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyze a policy document against a framework.
    Analyze(AnalyzeArgs),

    /// Show how a policy document is split into sections.
    Split {
        /// Policy text file.
        policy: PathBuf,
    },

    /// List supported frameworks and their requirement checklists.
    Frameworks,

    /// Render a saved JSON report.
    Show {
        /// Report written by `analyze --output`.
        report: PathBuf,
    },
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    /// Policy text file (plain text or Markdown).
    policy: PathBuf,

    /// Framework to evaluate against (iso27001, gdpr).
    #[arg(short, long)]
    framework: Framework,

    /// Reasoning strategy (direct, retrieve_act_observe, self_correcting).
    #[arg(short, long)]
    strategy: Option<StrategyKind>,

    /// Run every strategy and keep the best-scoring report.
    #[arg(long, conflicts_with = "strategy")]
    compare: bool,

    /// Write the report as JSON.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Concurrent section evaluations.
    #[arg(long)]
    workers: Option<usize>,

    /// Evidence passages per query.
    #[arg(short, long)]
    k: Option<usize>,

    #[command(flatten)]
    index: IndexArgs,

    #[command(flatten)]
    llm: LlmArgs,
}

#[derive(Args, Debug)]
struct IndexArgs {
    /// Regulatory chunks as JSON Lines, indexed in memory.
    #[arg(long, conflicts_with = "lance_db")]
    chunks: Option<PathBuf>,

    /// Existing LanceDB database holding the regulatory index.
    #[arg(long, env = "VERITY_LANCE_DB")]
    lance_db: Option<PathBuf>,

    #[arg(long, default_value = DEFAULT_TABLE)]
    lance_table: String,

    /// Sentence-transformers ONNX model directory (must match the index).
    #[arg(long, env = "VERITY_MODEL_DIR")]
    model_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct LlmArgs {
    /// OpenAI-compatible endpoint.
    #[arg(long, env = "VERITY_LLM_URL", default_value = "http://localhost:11434")]
    llm_url: String,

    #[arg(long, env = "VERITY_LLM_MODEL", default_value = "llama3.1")]
    llm_model: String,

    #[arg(long, env = "VERITY_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!("verity v{}", env!("CARGO_PKG_VERSION"));

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Commands::Analyze(args) => analyze(args, config).await,
        Commands::Split { policy } => {
            let doc = read_policy(&policy)?;
            let sections = SectionSplitter::new(config.splitter).split(&doc.text)?;
            display::print_sections(&sections);
            Ok(())
        }
        Commands::Frameworks => {
            display::print_frameworks();
            Ok(())
        }
        Commands::Show { report } => {
            let json = std::fs::read_to_string(&report)
                .with_context(|| format!("reading {}", report.display()))?;
            let report = ComplianceReport::from_json(&json)
                .with_context(|| format!("parsing {}", report.display()))?;
            display::print_report_card(&report);
            Ok(())
        }
    }
}

async fn analyze(args: AnalyzeArgs, mut config: AnalysisConfig) -> anyhow::Result<()> {
    if let Some(strategy) = args.strategy {
        config.strategy = strategy;
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(k) = args.k {
        config.k = k;
    }
    config.validate()?;

    let doc = read_policy(&args.policy)?;
    eprintln!(
        "Analyzing {} against {} ({})",
        doc.name,
        args.framework.display_name(),
        if args.compare { "all strategies".to_string() } else { config.strategy.to_string() }
    );

    if args.index.lance_db.is_some() && args.index.model_dir.is_none() {
        tracing::warn!("querying LanceDB with the lexical embedder; pass --model-dir to match the index");
    }
    let embedder = backends::embedder(args.index.model_dir.as_deref())?;
    let index = backends::open_index(
        args.index.chunks.as_deref(),
        args.index.lance_db.as_deref(),
        &args.index.lance_table,
        embedder,
    )
    .await?;
    let model = backends::chat_model(
        &args.llm.llm_url,
        &args.llm.llm_model,
        args.llm.api_key,
        config.per_call_timeout(),
    )?;

    let retrieval = RetrievalClient::from_config(index, &config);
    let agent = ComplianceAgent::new(args.framework, model, retrieval, &config);
    let pipeline = AnalysisPipeline::new(agent, &config);

    let (handle, signal) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted, finishing with a partial report...");
            handle.cancel();
        }
    });

    let report = if args.compare {
        let mut cmp = pipeline
            .compare_strategies(&doc, &StrategyKind::ALL, &signal)
            .await?;
        display::print_comparison(&cmp);
        anyhow::ensure!(cmp.best < cmp.reports.len(), "strategy comparison produced no report");
        cmp.reports.swap_remove(cmp.best).1
    } else {
        pipeline.analyze(&doc, &signal).await?
    };

    if let Some(path) = &args.output {
        std::fs::write(path, report.to_json_pretty()?)
            .with_context(|| format!("writing {}", path.display()))?;
        eprintln!("Report written to {}", path.display());
    }
    display::print_report_card(&report);
    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<AnalysisConfig> {
    match path {
        Some(path) => AnalysisConfig::load_from(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(AnalysisConfig::default()),
    }
}

fn read_policy(path: &Path) -> anyhow::Result<PolicyDocument> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(PolicyDocument::new(name, text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn parse_analyze_with_chunks() {
        let cli = Cli::try_parse_from([
            "verity",
            "analyze",
            "policy.md",
            "--framework",
            "gdpr",
            "--strategy",
            "react",
            "--chunks",
            "gdpr.jsonl",
            "-k",
            "6",
        ])
        .unwrap();
        let Commands::Analyze(args) = cli.command else {
            panic!("expected analyze");
        };
        assert_eq!(args.framework, Framework::Gdpr);
        assert_eq!(args.strategy, Some(StrategyKind::RetrieveActObserve));
        assert_eq!(args.k, Some(6));
        assert_eq!(args.index.lance_table, DEFAULT_TABLE);
        assert_eq!(args.index.chunks, Some(PathBuf::from("gdpr.jsonl")));
    }

    #[test]
    fn compare_conflicts_with_strategy() {
        let err = Cli::try_parse_from([
            "verity",
            "analyze",
            "p.md",
            "-f",
            "iso27001",
            "--compare",
            "--strategy",
            "direct",
        ]);
        assert!(err.is_err());
    }

    #[test]
    fn unknown_framework_is_rejected() {
        assert!(Cli::try_parse_from(["verity", "analyze", "p.md", "-f", "sox"]).is_err());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["verity", "frameworks", "-v", "--config", "v.toml"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("v.toml")));
    }

    #[test]
    fn policy_name_is_file_name() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "Access is reviewed quarterly.").unwrap();
        let doc = read_policy(file.path()).unwrap();
        assert_eq!(
            doc.name,
            file.path().file_name().unwrap().to_string_lossy()
        );
        assert_eq!(doc.text, "Access is reviewed quarterly.");
    }

    #[test]
    fn config_file_is_loaded() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "k = 7\nstrategy = \"self_correcting\"").unwrap();
        let cfg = load_config(Some(file.path())).unwrap();
        assert_eq!(cfg.k, 7);
        assert_eq!(cfg.strategy, StrategyKind::SelfCorrecting);
        assert_eq!(load_config(None).unwrap(), AnalysisConfig::default());
    }
}
