use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use proxywatch::config::{DateRange, Direction, FeatureMode, PipelineConfig};
use proxywatch::entity::ProxyHierarchy;
use proxywatch::pipeline::{BatchProgress, EntityPipeline};
use proxywatch::{ingest, report};

#[derive(Parser)]
#[command(
    name = "proxywatch",
    about = "Anomaly detection and burst/plateau summaries for proxy traffic counters",
    version,
    long_about = None
)]
struct Cli {
    /// Pipeline config file (TOML); falls back to $PROXYWATCH_CONFIG
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by the detection commands; they override the config file.
#[derive(Args)]
struct RunArgs {
    /// Traffic direction: inbound or outbound
    #[arg(long, default_value = "inbound")]
    direction: Direction,

    /// Counter column or alias (e.g. 4xx, 404)
    #[arg(long, default_value = "4xx")]
    counter: String,

    /// First day to analyse (YYYY-MM-DD)
    #[arg(long)]
    start: Option<String>,

    /// Last day to analyse, inclusive (YYYY-MM-DD)
    #[arg(long)]
    end: Option<String>,

    /// Add a trailing-window z-score feature
    #[arg(long)]
    rolling: bool,

    /// Write only Timestamp, ProxyId, counter and day columns
    #[arg(long)]
    compact: bool,
}

impl RunArgs {
    /// Fold CLI overrides into `config` and return the resolved counter column.
    fn apply(&self, config: &mut PipelineConfig) -> Result<String> {
        let counter = self.direction.resolve_counter(&self.counter)?;
        if self.start.is_some() || self.end.is_some() {
            config.range = DateRange::parse(self.start.as_deref(), self.end.as_deref())?;
        }
        if self.rolling {
            config.features.mode = FeatureMode::Rolling;
        }
        config.validate()?;
        Ok(counter)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Analyse a single per-proxy CSV file
    Detect {
        /// Per-proxy input file
        input: PathBuf,

        #[command(flatten)]
        run: RunArgs,

        /// Write anomaly records here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,

        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Analyse every CSV in a directory in parallel
    Batch {
        /// Directory of per-proxy input files
        input_dir: PathBuf,

        #[command(flatten)]
        run: RunArgs,

        /// Output directory for per-proxy records and summaries
        #[arg(long, default_value = "output")]
        output_dir: PathBuf,

        /// Concurrent files (0 = one per CPU)
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Rebuild burst/plateau summaries from a directory of anomaly files
    Summarize {
        /// Directory of anomaly CSV files
        input_dir: PathBuf,

        /// Name used for the summary files
        #[arg(long, default_value = "anomalies")]
        label: String,

        /// Output directory
        #[arg(long, default_value = "output")]
        output_dir: PathBuf,
    },

    /// Show proxies grouped by city and network-function type
    Proxies {
        /// Directory of per-proxy input files
        input_dir: PathBuf,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = PipelineConfig::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Detect {
            input,
            run,
            output,
            json,
        } => {
            let counter = run.apply(&mut config)?;
            tracing::info!(input = %input.display(), %counter, "Running single-proxy detection");

            let pipeline = EntityPipeline::new(&config);
            let entity = tokio::task::spawn_blocking(move || pipeline.run_file(&input, &counter))
                .await
                .context("Detection task failed")??;

            if json {
                println!("{}", serde_json::to_string_pretty(&entity)?);
                return Ok(());
            }

            match (&output, run.compact) {
                (Some(path), true) => report::write_compact_records_file(path, &entity.counter, &entity.records)?,
                (Some(path), false) => {
                    report::write_records_file(path, &entity.counter, entity.table.rolling, &entity.records)?
                }
                (None, true) => report::write_compact_records(std::io::stdout().lock(), &entity.counter, &entity.records)?,
                (None, false) => report::write_records(
                    std::io::stdout().lock(),
                    &entity.counter,
                    entity.table.rolling,
                    &entity.records,
                )?,
            }

            eprintln!(
                "\n{}: {} rows, {} anomalies",
                entity.entity_id,
                entity.table.rows.len(),
                entity.records.len()
            );
            for row in &entity.summary.table.rows {
                for (date, day) in entity.summary.table.dates.iter().zip(&row.days) {
                    eprintln!(
                        "  {date}: {} anomalies, {} bursts, {} plateaus",
                        day.anomalies, day.bursts, day.plateaus
                    );
                }
            }
            for p in &entity.summary.plateaus {
                eprintln!(
                    "  plateau {} -> {} ({:.1} min, {} anomalies)",
                    p.start, p.end, p.duration_minutes, p.anomaly_count
                );
            }
        }
        Commands::Batch {
            input_dir,
            run,
            output_dir,
            workers,
        } => {
            let counter = run.apply(&mut config)?;
            if let Some(workers) = workers {
                config.batch.workers = workers;
            }

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupted; finishing in-flight files");
                    on_signal.cancel();
                }
            });

            let (tx, mut rx) = tokio::sync::mpsc::channel::<BatchProgress>(64);
            let progress = tokio::spawn(async move {
                while let Some(p) = rx.recv().await {
                    tracing::info!(
                        completed = p.completed,
                        total = p.total,
                        succeeded = p.succeeded,
                        "progress"
                    );
                }
            });

            let report = proxywatch::analyze_directory(
                &input_dir,
                &output_dir,
                &counter,
                config,
                run.compact,
                cancel,
                Some(tx),
            )
            .await?;
            let _ = progress.await;

            println!("{}", report::format_batch_summary(&report));
            for (path, reason) in &report.failed {
                println!("  failed: {} ({})", path.display(), reason);
            }
        }
        Commands::Summarize {
            input_dir,
            label,
            output_dir,
        } => {
            config.validate()?;
            let summary = proxywatch::summarize_directory(&input_dir, &config)?;
            report::write_summary_file(&output_dir.join(proxywatch::summary_file_name(&label)), &summary.table)?;
            report::write_plateaus_file(
                &output_dir.join(proxywatch::plateau_file_name(&label)),
                &summary.plateaus,
            )?;
            println!(
                "Summarized {} prox{} over {} day{}, {} plateau{} -> {}",
                summary.table.rows.len(),
                if summary.table.rows.len() == 1 { "y" } else { "ies" },
                summary.table.dates.len(),
                if summary.table.dates.len() == 1 { "" } else { "s" },
                summary.plateaus.len(),
                if summary.plateaus.len() == 1 { "" } else { "s" },
                output_dir.display()
            );
        }
        Commands::Proxies { input_dir, json } => {
            let files = ingest::list_csv_files(&input_dir)?;
            let hierarchy = ProxyHierarchy::build(files.iter().map(|p| ingest::entity_from_path(p)));
            if json {
                println!("{}", serde_json::to_string_pretty(&hierarchy)?);
            } else if hierarchy.is_empty() {
                println!("No proxies found in {}.", input_dir.display());
            } else {
                print!("{}", hierarchy.render());
            }
        }
    }

    Ok(())
}
