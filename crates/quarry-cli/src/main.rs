//! CLI binary for asking questions of a database and checking SQL.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use quarry_llm::{LlmClient, LoggingMiddleware, OpenAiAdapter, UsageTrackingMiddleware};
use quarry_pipeline::{
    checks, AccessDirectory, CachedSchemaStore, Collaborators, Controller, JsonSchemaStore,
    LlmEmbedder, LlmGenerator, OpenAccess, PipelineConfig, PipelineResult, SchemaStore,
    SqliteSchemaStore, SqlparserParser, StaticAccessDirectory, StructuralParser,
};

#[derive(Parser)]
#[command(name = "quarry", version, about = "Natural-language questions to validated SQL")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    source: SourceArgs,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Args)]
struct SourceArgs {
    /// SQLite database to introspect
    #[arg(long, env = "QUARRY_DB_PATH", global = true)]
    db: Option<PathBuf>,

    /// JSON file describing the tables (instead of --db)
    #[arg(long, global = true, conflicts_with = "db")]
    schema_json: Option<PathBuf>,

    /// Bypass the on-disk schema cache
    #[arg(long, global = true)]
    no_cache: bool,

    /// Restrict access to these tables (repeatable); default is all tables
    #[arg(long = "allow", global = true)]
    allow: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Turn a question into validated SQL
    Ask {
        /// The question, in plain English
        question: String,

        /// Print the full run result as JSON
        #[arg(long)]
        json: bool,

        /// JSON pipeline config; flags below override it
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Extra generate/validate rounds after the first
        #[arg(long, env = "MAX_RETRIES")]
        max_retries: Option<usize>,

        /// Candidates generated per round
        #[arg(long, env = "N_CANDIDATES")]
        candidates: Option<usize>,

        /// Tables passed to generation
        #[arg(long, env = "DISCOVERY_TOP_K")]
        top_k: Option<usize>,

        /// Tables kept by the keyword prefilter
        #[arg(long, env = "KEYWORD_PRE_FILTER_TOP_N")]
        prefilter: Option<usize>,

        /// Model for the validation checks (defaults to the generation model)
        #[arg(long, env = "QUARRY_VALIDATION_MODEL")]
        validation_model: Option<String>,
    },

    /// Print the schema as the generator sees it
    Schema,

    /// Run the static checks (access safety, structural parse) on a query
    Check {
        /// SQL text to check
        sql: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Ask {
            question,
            json,
            config,
            max_retries,
            candidates,
            top_k,
            prefilter,
            validation_model,
        } => {
            let mut cfg = match config {
                Some(path) => PipelineConfig::from_json_file(&path)?,
                None => PipelineConfig::default(),
            };
            if let Some(n) = max_retries {
                cfg.max_retries = n;
            }
            if let Some(n) = candidates {
                cfg.n_candidates = n;
            }
            if let Some(n) = top_k {
                cfg.discovery_top_k = n;
            }
            if let Some(n) = prefilter {
                cfg.keyword_prefilter_top_n = n;
            }
            cmd_ask(&cli.source, &question, cfg, validation_model, json).await?;
        }
        Commands::Schema => {
            cmd_schema(&cli.source).await?;
        }
        Commands::Check { sql } => {
            cmd_check(&sql);
        }
    }

    Ok(())
}

fn build_store(source: &SourceArgs) -> anyhow::Result<Arc<dyn SchemaStore>> {
    let (inner, cache_name): (Arc<dyn SchemaStore>, String) =
        match (&source.schema_json, &source.db) {
            (Some(path), _) => (Arc::new(JsonSchemaStore::new(path)), cache_key(path)),
            (None, Some(path)) => (Arc::new(SqliteSchemaStore::new(path)), cache_key(path)),
            (None, None) => {
                anyhow::bail!("No schema source: pass --db or --schema-json")
            }
        };

    if source.no_cache {
        return Ok(inner);
    }
    match CachedSchemaStore::default_path() {
        Some(default) => {
            let path = default.with_file_name(format!("{cache_name}.schema.json"));
            Ok(Arc::new(CachedSchemaStore::new(inner, path)))
        }
        None => Ok(inner),
    }
}

fn cache_key(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "schema".to_string())
}

fn build_directory(source: &SourceArgs) -> Arc<dyn AccessDirectory> {
    if source.allow.is_empty() {
        Arc::new(OpenAccess)
    } else {
        Arc::new(StaticAccessDirectory::new(source.allow.iter().cloned()))
    }
}

async fn cmd_ask(
    source: &SourceArgs,
    question: &str,
    config: PipelineConfig,
    validation_model: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let usage = UsageTrackingMiddleware::new();
    let client = Arc::new(
        LlmClient::new(OpenAiAdapter::from_env()?)
            .with_middleware(LoggingMiddleware)
            .with_middleware(usage.clone()),
    );

    let generator = Arc::new(LlmGenerator::new(client.clone()));
    let validator = match validation_model {
        Some(model) => Arc::new(LlmGenerator::new(client.clone()).with_model(model)),
        None => generator.clone(),
    };

    let collaborators = Collaborators::new(
        build_store(source)?,
        build_directory(source),
        generator,
        Arc::new(LlmEmbedder::new(client)),
    )
    .with_validator(validator);

    tracing::debug!(?config, "Pipeline config");
    let controller = Controller::new(collaborators, config)?;
    let result = controller.run(question).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
        println!(
            "\nLLM calls: {} ({} input / {} output / {} embedding tokens)",
            usage.calls(),
            usage.total_input_tokens(),
            usage.total_output_tokens(),
            usage.embedding_tokens()
        );
    }

    if result.hard_stopped {
        std::process::exit(2);
    }
    Ok(())
}

fn print_result(result: &PipelineResult) {
    if result.hard_stopped {
        println!(
            "Stopped: {}",
            result.reason.as_deref().unwrap_or("gate blocked")
        );
        return;
    }

    match result.sql {
        Some(ref sql) => println!("SQL:\n{sql}\n"),
        None => println!("No SQL produced"),
    }
    if !result.passed {
        println!(
            "WARNING: best-effort answer ({})\n",
            result.reason.as_deref().unwrap_or("validation failed")
        );
    }
    if let Some(ref text) = result.explanation {
        println!("Explanation:\n{text}\n");
    }
    if let Some(ref report) = result.safety_report {
        println!("{report}\n");
    }
    if let Some(ref hints) = result.optimization_hints {
        println!("Optimization hints:\n{hints}\n");
    }

    println!("Tables: {}", result.gated_tables.join(", "));
    println!("Candidates ({} attempt(s)):", result.attempts);
    for attempt in &result.audit {
        for v in &attempt.results {
            let status = if v.disqualified { "disqualified" } else { "eligible" };
            println!(
                "  #{} {:<13} {:>4.1}  {}",
                attempt.attempt,
                v.candidate.variant.as_str(),
                v.total_score,
                status
            );
        }
    }
}

async fn cmd_schema(source: &SourceArgs) -> anyhow::Result<()> {
    let store = build_store(source)?;
    let directory = build_directory(source);
    let tables = store.introspect().await?;
    let approved = directory.approved_tables(&tables).await?;
    let visible: Vec<_> = tables
        .into_iter()
        .filter(|t| approved.contains(&t.name))
        .collect();

    let formatted = quarry_pipeline::format_schema(&visible);
    println!("{}", formatted.content);
    println!("\n{} tables, ~{} tokens", visible.len(), formatted.token_estimate);
    Ok(())
}

fn cmd_check(sql: &str) {
    let access = checks::access_safety(sql);
    let structural = SqlparserParser.parse(sql);

    println!(
        "[{}] ACCESS_SAFETY  {}",
        if access.passed { "PASS" } else { "FAIL" },
        access.detail.as_deref().unwrap_or("")
    );
    match structural {
        Ok(()) => println!("[PASS] SYNTAX         parses"),
        Err(ref e) => println!("[FAIL] SYNTAX         {e}"),
    }

    if !access.passed || structural.is_err() {
        std::process::exit(1);
    }
}
