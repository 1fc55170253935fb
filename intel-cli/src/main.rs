//! Intel Guard CLI
//!
//! Guarded OSINT collection and threat classification.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use intel_classify::{
    create_openai_embedder, EmbeddingClassifier, HashingEmbedder, KeywordClassifier,
    OpenAiEmbedderConfig, SharedClassifier,
};
use intel_core::{Finding, IntelConfig};
use intel_runtime::{IngestReport, IntelService, TextClassification, UrlClassification};
use intel_store::FindingStore;

#[derive(Parser)]
#[command(name = "intel-guard")]
#[command(author, version, about = "Intel Guard: guarded OSINT collection and classification", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (TOML, keys under [intel]); overrides INTEL_CONFIG_PATH
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Classifier variant
    #[arg(long, value_enum, default_value = "keyword", global = true)]
    classifier: ClassifierKind,

    /// Embedding API key for the embedding classifier (hashing embedder if unset)
    #[arg(long, env = "OPENAI_API_KEY", global = true, hide_env_values = true)]
    embedding_key: Option<String>,

    /// Embedding model name
    #[arg(long, default_value = "text-embedding-3-small", global = true)]
    embedding_model: String,

    /// OpenAI-compatible base URL for embeddings
    #[arg(long, global = true)]
    embedding_base_url: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Verbosity level (0-3)
    #[arg(short, long, default_value = "1", global = true)]
    verbose: u8,
}

#[derive(Clone, Copy, ValueEnum)]
enum ClassifierKind {
    Keyword,
    Embedding,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify text given on the command line
    ClassifyText {
        /// The text to classify
        #[arg(short, long)]
        text: String,
    },

    /// Fetch a URL through the guardrails and classify it
    ClassifyUrl {
        /// Page to fetch
        #[arg(short, long)]
        url: String,

        /// Requesting user, recorded in the audit trail
        #[arg(long, env = "USER")]
        user: Option<String>,

        /// Reason for the fetch, recorded in the audit trail
        #[arg(short, long)]
        justification: Option<String>,
    },

    /// Classify new links from an RSS or Atom feed
    Ingest {
        /// Feed URL
        #[arg(short, long)]
        feed: String,

        /// Maximum entries to consider
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Requesting user, recorded in the audit trail
        #[arg(long, env = "USER")]
        user: Option<String>,

        /// Reason for the fetches, recorded in the audit trail
        #[arg(short, long)]
        justification: Option<String>,
    },

    /// Show the most recent findings
    Top {
        /// Number of findings
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = match cli.verbose {
        0 => Level::ERROR,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let config = match &cli.config {
        Some(path) => IntelConfig::load_from(path),
        None => IntelConfig::load(),
    };
    let classifier = build_classifier(&cli)?;
    let store = FindingStore::connect(&config.database_url)
        .await
        .with_context(|| format!("Failed to open findings store {}", config.database_url))?;
    let service = IntelService::new(config, classifier, store)?;

    let outcome = run(&cli, &service).await;
    service.shutdown().await;
    outcome
}

async fn run(cli: &Cli, service: &IntelService) -> Result<()> {
    match cli.command {
        Commands::ClassifyText { ref text } => {
            let result = service.classify_text(text).await?;
            print_text(&result, cli.json)?;
        }
        Commands::ClassifyUrl {
            ref url,
            ref user,
            ref justification,
        } => {
            let result = service
                .classify_url(url, user.as_deref(), justification.as_deref())
                .await?;
            print_url(&result, cli.json)?;
        }
        Commands::Ingest {
            ref feed,
            limit,
            ref user,
            ref justification,
        } => {
            let source = service.http_feed(feed);
            let report = service
                .ingest(&source, limit, user.as_deref(), justification.as_deref())
                .await?;
            print_report(&report, cli.json)?;
        }
        Commands::Top { limit } => {
            let findings = service.list_recent(limit).await?;
            print_findings(&findings, cli.json)?;
        }
    }

    Ok(())
}

fn build_classifier(cli: &Cli) -> Result<SharedClassifier> {
    let classifier: SharedClassifier = match cli.classifier {
        ClassifierKind::Keyword => Arc::new(KeywordClassifier::default()),
        ClassifierKind::Embedding => match (&cli.embedding_key, &cli.embedding_base_url) {
            (_, Some(base_url)) => {
                let mut config = OpenAiEmbedderConfig::local(base_url, &cli.embedding_model);
                if let Some(key) = &cli.embedding_key {
                    config.api_key = key.clone();
                }
                Arc::new(EmbeddingClassifier::new(create_openai_embedder(config)?))
            }
            (Some(key), None) => {
                let config = OpenAiEmbedderConfig::openai(key, &cli.embedding_model);
                Arc::new(EmbeddingClassifier::new(create_openai_embedder(config)?))
            }
            (None, None) => Arc::new(EmbeddingClassifier::new(HashingEmbedder::default())),
        },
    };
    Ok(classifier)
}

fn print_text(result: &TextClassification, as_json: bool) -> Result<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }
    println!("🏷️  Label: {} ({})", result.label_name, result.label);
    println!("⚠️  Risk: {:.3}", result.risk);
    println!("📊 Probabilities: {}", format_probs(&result.probabilities));
    Ok(())
}

fn print_url(result: &UrlClassification, as_json: bool) -> Result<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }
    println!("🔗 {}", result.source_url);
    println!("🏷️  Label: {} ({})", result.label_name, result.label);
    println!("⚠️  Risk: {:.3}", result.risk);
    println!("📊 Probabilities: {}", format_probs(&result.probabilities));
    for (kind, values) in &result.iocs {
        if !values.is_empty() {
            println!("🔎 {}: {}", kind, values.join(", "));
        }
    }
    println!("💾 Finding #{}", result.finding_id);
    Ok(())
}

fn print_report(report: &IngestReport, as_json: bool) -> Result<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!(
        "📥 Classified {} links, {} failed\n",
        report.results.len(),
        report.failures.len()
    );
    for result in &report.results {
        println!("  {:.3}  {:<16} {}", result.risk, result.label_name, result.source_url);
    }
    for failure in &report.failures {
        println!("  ❌ {}: {}", failure.link, failure.error);
    }
    Ok(())
}

fn print_findings(findings: &[Finding], as_json: bool) -> Result<()> {
    if as_json {
        let rows: Vec<_> = findings
            .iter()
            .map(|f| {
                json!({
                    "id": f.id,
                    "ts": f.timestamp,
                    "source_url": f.source_url,
                    "label": f.label,
                    "label_name": f.label_name,
                    "risk": f.risk,
                    "iocs": f.iocs,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    if findings.is_empty() {
        println!("No findings yet.");
        return Ok(());
    }
    for f in findings {
        let when = chrono::DateTime::from_timestamp(f.timestamp, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| f.timestamp.to_string());
        println!(
            "#{:<5} {}  {:.3}  {:<16} {}",
            f.id.unwrap_or_default(),
            when,
            f.risk,
            f.label_name,
            f.source_url.as_deref().unwrap_or("(text)")
        );
    }
    Ok(())
}

fn format_probs(probabilities: &[f64]) -> String {
    probabilities
        .iter()
        .enumerate()
        .map(|(i, p)| format!("{}={:.3}", intel_core::label_name(i as u32), p))
        .collect::<Vec<_>>()
        .join(" ")
}
