use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use erp_incident_triage::{
    config::{Config, LlmBackend, ObservabilityConfig},
    enrichment::{
        corpus::{seed_corpus, HistoricalRecord},
        EmbeddingClient, EnrichmentOrchestrator, InMemoryCorpus, OpenAiEmbeddingClient,
        RuleClassifier,
    },
    metrics,
    models::{Environment, ErpModule, Incident},
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "erp-triage")]
#[command(version, about = "Classify and enrich ERP incidents", long_about = None)]
struct Cli {
    /// Configuration file (overrides CONFIG_PATH)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rule-based classification only
    Classify(IncidentArgs),

    /// Full enrichment, optionally with retrieval-augmented classification
    Enrich {
        #[command(flatten)]
        incident: IncidentArgs,

        /// JSON file of resolved historical incidents to seed the corpus
        #[arg(long, value_name = "FILE")]
        history: Option<PathBuf>,

        /// Enable the RAG path
        #[arg(long)]
        rag: bool,

        /// Run RAG regardless of rule confidence
        #[arg(long)]
        force_all: bool,

        /// Rule confidence below which RAG runs
        #[arg(long)]
        threshold: Option<f64>,

        /// Fail instead of falling back to rules when RAG fails
        #[arg(long)]
        rag_only: bool,

        /// RAG classifier: openai or majority_vote
        #[arg(long, value_name = "BACKEND")]
        llm: Option<LlmBackend>,
    },

    /// Print Prometheus metrics
    Metrics,
}

#[derive(Args)]
struct IncidentArgs {
    #[arg(short, long)]
    title: String,

    #[arg(short, long)]
    description: String,

    /// AP, AR, GL, Inventory, HR or Payroll
    #[arg(short, long, default_value = "GL")]
    module: ErpModule,

    /// Prod or Test
    #[arg(short, long, default_value = "Prod")]
    environment: Environment,

    #[arg(short, long, default_value = "Unassigned")]
    business_unit: String,
}

impl IncidentArgs {
    fn into_incident(self) -> Result<Incident> {
        Incident::validated(
            self.title,
            self.description,
            self.module,
            self.environment,
            self.business_unit,
        )
        .context("Invalid incident")
    }
}

fn init_tracing(observability: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("erp_incident_triage={}", observability.log_level).into()
    });
    let registry = tracing_subscriber::registry().with(filter);

    // stdout carries command output
    if observability.json_logs {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    init_tracing(&config.observability);

    if config.observability.prometheus_enabled {
        if let Err(e) = metrics::init_metrics() {
            tracing::warn!("Failed to initialize metrics: {}", e);
        }
    }

    match cli.command {
        Commands::Classify(args) => {
            let incident = args.into_incident()?;
            let classification = RuleClassifier::new().classify(&incident);
            println!("{}", serde_json::to_string_pretty(&classification)?);
        }

        Commands::Enrich {
            incident,
            history,
            rag,
            force_all,
            threshold,
            rag_only,
            llm,
        } => {
            let incident = incident.into_incident()?;

            if rag || rag_only {
                config.enrichment.use_rag = true;
            }
            if force_all {
                config.enrichment.rag_force_all = true;
            }
            if let Some(threshold) = threshold {
                config.enrichment.rag_confidence_threshold = threshold;
            }
            if let Some(backend) = llm {
                config.llm.provider = backend;
            }

            let corpus = Arc::new(InMemoryCorpus::new(config.index.max_entries));
            let orchestrator = EnrichmentOrchestrator::from_config(&config, corpus.clone())
                .context("Failed to configure enrichment")?;

            if let Some(path) = history {
                let raw = tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                let records: Vec<HistoricalRecord> = serde_json::from_str(&raw)
                    .with_context(|| format!("Invalid history file {}", path.display()))?;

                let embedder = if config.enrichment.use_rag {
                    Some(OpenAiEmbeddingClient::from_config(&config.embedding)?)
                } else {
                    None
                };
                seed_corpus(
                    corpus.as_ref(),
                    embedder.as_ref().map(|e| e as &dyn EmbeddingClient),
                    records,
                )
                .await
                .context("Failed to seed historical corpus")?;
            }

            if rag_only {
                let result = orchestrator
                    .enrich_rag_only(&incident, &config.enrichment)
                    .await?;
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                let report = orchestrator
                    .enrich_with_report(&incident, &config.enrichment)
                    .await;
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
        }

        Commands::Metrics => {
            print!("{}", metrics::gather_metrics());
        }
    }

    Ok(())
}
