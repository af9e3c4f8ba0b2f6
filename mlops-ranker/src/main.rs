use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use mlops_ranker::out::{emit, emit_records};
use mlops_ranker::types::BucketRow;
use mlops_ranker::utils::env_bool;
use mlops_ranker::{ControlPlane, RankRequest, Ranker, Settings};

#[derive(Parser)]
#[command(name = "mlops-ranker", version, about = "Rank S3 buckets by MLOps usage likelihood")]
struct Cli {
    /// Run against the built-in demo account instead of AWS.
    #[arg(long, global = true)]
    mock: bool,
    /// Overrides AWS_REGION.
    #[arg(long, global = true)]
    region: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Score every bucket and print the top candidates.
    Rank {
        #[arg(long)]
        lookback_days: Option<u32>,
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Score bucket rows (a JSON array) or an inventory document (a JSON object with `s3_buckets`).
    Annotate {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        lookback_days: Option<u32>,
    },
    /// Print the storage discovered from pipeline history.
    Hints,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    if env_bool("MLOPS_LOG_JSON", false) {
        tracing_subscriber::registry().with(filter).with(fmt.json()).init();
    } else {
        tracing_subscriber::registry().with(filter).with(fmt).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut settings = Settings::from_env();
    if let Some(region) = cli.region {
        settings.region = region;
    }
    let cp = if cli.mock {
        info!("mock mode: using the built-in demo account");
        ControlPlane::mock()
    } else {
        ControlPlane::aws(&settings).await
    };
    let ranker = Ranker::new(cp, settings);
    let settings = ranker.settings();
    let (mode, endpoint) = (settings.out_mode, settings.out_endpoint.as_deref());

    match cli.command {
        Command::Rank { lookback_days, top_k } => {
            let req = RankRequest {
                lookback_days: lookback_days.unwrap_or(settings.lookback_days),
                top_k: top_k.unwrap_or(settings.top_k),
                region: Some(settings.region.clone()),
            };
            let resp = ranker.rank_candidates(req).await?;
            emit(mode, endpoint, &resp).await?;
        }
        Command::Annotate { file, lookback_days } => {
            let lookback_days = lookback_days.unwrap_or(settings.lookback_days);
            let raw = std::fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
            let doc: Value = serde_json::from_str(&raw).with_context(|| format!("parsing {}", file.display()))?;
            if doc.is_array() {
                let rows: Vec<BucketRow> = serde_json::from_value(doc).context("bucket rows")?;
                let records = ranker.annotate_bucket_records(rows, lookback_days).await?;
                emit_records(mode, endpoint, &records).await?;
            } else {
                let annotated = ranker.annotate_inventory(doc, lookback_days).await?;
                emit(mode, endpoint, &annotated).await?;
            }
        }
        Command::Hints => {
            let index = ranker.build_hint_index().await;
            emit(mode, endpoint, &index).await?;
        }
    }
    Ok(())
}
