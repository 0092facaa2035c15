//! CLI binary for edition-render.
//!
//! A thin shim over the library crate: maps flags to `PipelineConfig`,
//! opens the catalog and dispatches to the processor or the diagnostics
//! interface.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use edition_render::{
    ingest_pdf, Catalog, Diagnostics, EditionProcessor, EditionReport, EditionStatus,
    PipelineConfig, ProcessingProgressCallback, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: a spinner while rasterizing, a bar while writing pages.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl ProcessingProgressCallback for CliProgressCallback {
    fn on_run_start(&self, edition_id: i64) {
        self.bar.set_prefix("Rasterizing");
        self.bar.set_message(format!("edition {edition_id}"));
    }

    fn on_rasterized(&self, _edition_id: i64, total_pages: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} pages  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ");
        self.bar.set_length(total_pages as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Writing");
    }

    fn on_page_written(&self, _edition_id: i64, _page_num: u32, _total_pages: usize) {
        self.bar.inc(1);
    }

    fn on_run_complete(&self, edition_id: i64, total_pages: u32) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} edition {} ready with {} pages",
            green("✔"),
            bold(&edition_id.to_string()),
            bold(&total_pages.to_string())
        );
    }

    fn on_run_failed(&self, edition_id: i64, error: &str) {
        self.bar.finish_and_clear();
        eprintln!("{} edition {} failed: {}", red("✘"), edition_id, red(error));
    }
}

/// Ingest PDF editions and render them into per-page images.
#[derive(Parser, Debug)]
#[command(
    name = "editionctl",
    version,
    about = "Ingest PDF editions and render them into per-page images",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto
)]
struct Cli {
    /// Application root; every stored path is relative to it.
    #[arg(long, env = "EDITION_ROOT", default_value = ".", global = true)]
    root: PathBuf,

    /// Catalog database (default: <root>/editions.db).
    #[arg(long, env = "EDITION_DB", global = true)]
    db: Option<PathBuf>,

    /// Root-relative directory for page images.
    #[arg(long, env = "EDITION_UPLOADS_DIR", default_value = "uploads", global = true)]
    uploads_dir: PathBuf,

    /// Rasterizer executable.
    #[arg(long, env = "EDITION_RASTERIZER", default_value = "/usr/bin/pdftoppm", global = true)]
    rasterizer: PathBuf,

    /// Rasterizer argument template (repeatable). Default targets pdftoppm.
    #[arg(long = "rasterizer-arg", env = "EDITION_RASTERIZER_ARGS", value_delimiter = ' ',
          allow_hyphen_values = true, global = true)]
    rasterizer_args: Vec<String>,

    /// Rendering DPI (36–600).
    #[arg(long, env = "EDITION_DPI", default_value_t = 150, global = true,
          value_parser = clap::value_parser!(u32).range(36..=600))]
    dpi: u32,

    /// Rasterizer timeout in seconds.
    #[arg(long, env = "EDITION_TIMEOUT", default_value_t = 300, global = true)]
    timeout: u64,

    /// Output structured JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "EDITION_VERBOSE", global = true)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "EDITION_QUIET", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a PDF as a new draft edition and process it.
    Ingest {
        pdf: PathBuf,
        #[arg(long)]
        title: String,
        /// Publication date, YYYY-MM-DD.
        #[arg(long)]
        date: NaiveDate,
        /// Register only; do not process.
        #[arg(long)]
        no_process: bool,
    },
    /// Run (or re-run) the pipeline for an edition.
    Process { id: i64 },
    /// Show edition state.
    Status {
        id: Option<i64>,
        #[arg(long)]
        status: Option<EditionStatus>,
    },
    /// Check editions for missing files and broken invariants.
    Verify { id: Option<i64> },
    /// Reset an edition (e.g. stuck in processing) to failed or draft.
    Reset {
        id: i64,
        #[arg(long, default_value = "failed")]
        to: EditionStatus,
    },
    /// Reprocess every failed or unhealthy edition.
    Repair {
        #[arg(short, long, default_value_t = 2)]
        concurrency: usize,
    },
    /// Show where a stored path resolves.
    Resolve { logical: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = build_config(&cli).context("Invalid configuration")?;
    let db_path = cli
        .db
        .clone()
        .unwrap_or_else(|| config.root_dir.join("editions.db"));
    let catalog = Arc::new(
        Catalog::open(&db_path)
            .with_context(|| format!("Failed to open catalog {}", db_path.display()))?,
    );

    match &cli.command {
        Command::Ingest {
            pdf,
            title,
            date,
            no_process,
        } => {
            let edition = ingest_pdf(&catalog, &config, pdf, title, *date)
                .await
                .context("Failed to register edition")?;
            if !cli.quiet {
                eprintln!("Registered edition {} ({})", edition.id, edition.source_pdf_path);
            }
            if !no_process {
                run_process(&cli, config, catalog, edition.id).await?;
            } else if cli.json {
                println!("{}", serde_json::to_string_pretty(&edition)?);
            }
        }
        Command::Process { id } => run_process(&cli, config, catalog, *id).await?,
        Command::Status { id, status } => {
            let editions = match *id {
                Some(id) => vec![Catalog::blocking(&catalog, move |c| c.get_edition(id))
                    .await?
                    .with_context(|| format!("Edition {id} not found"))?],
                None => {
                    let status = *status;
                    Catalog::blocking(&catalog, move |c| c.list_editions(status)).await?
                }
            };
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&editions)?);
            } else {
                for e in &editions {
                    println!(
                        "{:>6}  {:<10}  {:>4} pages  {}  {}{}",
                        e.id,
                        e.status,
                        e.total_pages,
                        e.date,
                        e.title,
                        e.failure_reason
                            .as_deref()
                            .map(|r| dim(&format!("  ({r})")))
                            .unwrap_or_default()
                    );
                }
            }
        }
        Command::Verify { id } => {
            let diagnostics = diagnostics(config, catalog);
            let reports = match id {
                Some(id) => vec![diagnostics.edition_report(*id).await?],
                None => diagnostics.scan(None).await?,
            };
            let unhealthy = reports.iter().filter(|r| !r.is_healthy()).count();
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                reports.iter().for_each(print_report);
                if !cli.quiet {
                    eprintln!("{}/{} editions healthy", reports.len() - unhealthy, reports.len());
                }
            }
            if unhealthy > 0 {
                bail!("{unhealthy} edition(s) need attention");
            }
        }
        Command::Reset { id, to } => {
            let edition = diagnostics(config, catalog)
                .reset(*id, *to)
                .await
                .context("Reset failed")?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&edition)?);
            } else if !cli.quiet {
                eprintln!("Edition {} is now {}", edition.id, edition.status);
            }
        }
        Command::Repair { concurrency } => {
            let summary = diagnostics(config, catalog)
                .repair_all(*concurrency)
                .await
                .context("Repair failed")?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else if !cli.quiet {
                eprintln!(
                    "{} repaired {}/{}",
                    if summary.failed.is_empty() { green("✔") } else { red("✘") },
                    summary.repaired.len(),
                    summary.attempted
                );
                for (id, error) in &summary.failed {
                    eprintln!("  {} edition {id}: {error}", red("✗"));
                }
                for id in &summary.skipped_stuck {
                    eprintln!("  {} edition {id} stuck in processing; reset it first", dim("…"));
                }
            }
            if !summary.failed.is_empty() {
                bail!("{} edition(s) could not be repaired", summary.failed.len());
            }
        }
        Command::Resolve { logical } => {
            let resolver = edition_render::PathResolver::new(&config.root_dir);
            match resolver.resolve(logical) {
                Ok(path) => println!("{}", path.display()),
                Err(e) => bail!("{e}"),
            }
        }
    }

    Ok(())
}

/// Map CLI args to `PipelineConfig`.
///
/// Commands that never launch the rasterizer skip the executable check.
fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .root_dir(&cli.root)
        .uploads_dir(&cli.uploads_dir)
        .rasterizer_path(&cli.rasterizer)
        .dpi(cli.dpi)
        .timeout_secs(cli.timeout);
    if !cli.rasterizer_args.is_empty() {
        builder = builder.rasterizer_args(cli.rasterizer_args.iter().cloned());
    }

    let needs_rasterizer = match &cli.command {
        Command::Ingest { no_process, .. } => !no_process,
        Command::Process { .. } | Command::Repair { .. } => true,
        _ => false,
    };
    let config = if needs_rasterizer {
        builder.build()?
    } else {
        builder.build_unchecked()?
    };
    Ok(config)
}

fn diagnostics(config: PipelineConfig, catalog: Arc<Catalog>) -> Diagnostics {
    let rasterizer_ok = config.rasterizer_path.is_file();
    let processor = if rasterizer_ok {
        EditionProcessor::with_external_rasterizer(config.clone(), Arc::clone(&catalog)).ok()
    } else {
        None
    };
    // Read-only commands still need a processor; an unavailable rasterizer
    // only surfaces if something tries to reprocess.
    let processor = processor.unwrap_or_else(|| {
        EditionProcessor::new(
            config.clone(),
            catalog,
            Arc::new(Unavailable(config.rasterizer_path.clone())),
        )
    });
    Diagnostics::new(processor)
}

async fn run_process(
    cli: &Cli,
    config: PipelineConfig,
    catalog: Arc<Catalog>,
    id: i64,
) -> Result<()> {
    let mut processor = EditionProcessor::with_external_rasterizer(config, catalog)?;
    let show_progress = !cli.quiet && !cli.json;
    if show_progress {
        processor = processor.with_progress(CliProgressCallback::new() as ProgressCallback);
    }

    let outcome = processor
        .process(id)
        .await
        .with_context(|| format!("Processing edition {id} failed"))?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else if !cli.quiet {
        eprintln!(
            "   {} pages in {}ms{}",
            outcome.total_pages,
            outcome.duration_ms,
            if outcome.replaced_pages > 0 {
                dim(&format!("  (replaced {})", outcome.replaced_pages))
            } else {
                String::new()
            }
        );
    }
    Ok(())
}

fn print_report(report: &EditionReport) {
    let e = &report.edition;
    let mark = if report.is_healthy() { green("✓") } else { red("✗") };
    println!("{mark} {:>6}  {:<10}  {}", e.id, e.status, e.title);
    for issue in &report.issues {
        println!("    {}", dim(&format!("{issue:?}")));
    }
}

/// Stand-in rasterizer for read-only commands when the executable is missing.
struct Unavailable(PathBuf);

#[async_trait::async_trait]
impl edition_render::Rasterizer for Unavailable {
    fn name(&self) -> &str {
        "unavailable"
    }

    async fn run(
        &self,
        _request: &edition_render::RasterRequest<'_>,
    ) -> Result<(), edition_render::EditionError> {
        Err(edition_render::EditionError::RasterizerUnavailable {
            path: self.0.clone(),
        })
    }
}
