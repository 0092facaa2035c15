//! Edition processing: the orchestrator and its state machine.
//!
//! ```text
//! draft ──▶ processing ──▶ ready
//!   ▲           │
//!   │           └────────▶ failed
//!   └── admin reset        │
//!                          └──▶ processing (resubmitted)
//! ```
//!
//! A run is all-or-nothing. Pages are addressed by position, so mixing rows
//! from two runs would silently break the 1..N sequence. Every run therefore
//! starts by dropping the edition's page rows and either finishes with a
//! complete new set or rolls back whatever it wrote before returning.
//!
//! At most one run per edition is in flight: the transition into
//! `processing` is a conditional update ([`Catalog::try_claim`]), and a run
//! that loses that race gets [`EditionError::AlreadyProcessing`]. The claim
//! hands out a run number; everything the run later writes to the catalog is
//! conditional on still holding it.

use crate::catalog::Catalog;
use crate::config::PipelineConfig;
use crate::error::EditionError;
use crate::model::{Edition, Page};
use crate::pipeline::pages::PageWriter;
use crate::pipeline::paths::PathResolver;
use crate::pipeline::rasterize::{rasterize, ExternalRasterizer, RasterRequest, Rasterizer};
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Result of a successful run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessOutcome {
    pub edition_id: i64,
    pub total_pages: u32,
    pub pages: Vec<Page>,
    /// Page rows dropped from a previous run.
    pub replaced_pages: usize,
    pub duration_ms: u64,
}

/// Drives editions from `draft` (or `failed`/`ready`) to `ready`.
#[derive(Clone)]
pub struct EditionProcessor {
    catalog: Arc<Catalog>,
    resolver: PathResolver,
    writer: PageWriter,
    rasterizer: Arc<dyn Rasterizer>,
    config: Arc<PipelineConfig>,
    progress: Option<ProgressCallback>,
}

impl EditionProcessor {
    pub fn new(
        config: PipelineConfig,
        catalog: Arc<Catalog>,
        rasterizer: Arc<dyn Rasterizer>,
    ) -> Self {
        let resolver = PathResolver::new(&config.root_dir);
        let writer = PageWriter::new(Arc::clone(&catalog), resolver.clone(), &config.uploads_dir);
        Self {
            catalog,
            resolver,
            writer,
            rasterizer,
            config: Arc::new(config),
            progress: None,
        }
    }

    /// Processor using the configured external rasterizer executable.
    pub fn with_external_rasterizer(
        config: PipelineConfig,
        catalog: Arc<Catalog>,
    ) -> Result<Self, EditionError> {
        let rasterizer = ExternalRasterizer::from_config(&config)?;
        Ok(Self::new(config, catalog, Arc::new(rasterizer)))
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the full pipeline for one edition.
    ///
    /// # Errors
    /// - `EditionNotFound`: no such edition; nothing changes
    /// - `AlreadyProcessing`: another run owns the edition; nothing changes
    /// - `ClaimLost`: the edition was reset and reclaimed mid-run; the new
    ///   owner's state is left alone
    /// - anything else: the edition is left `failed` with the reason stored,
    ///   and no page rows or images from this run remain
    pub async fn process(&self, edition_id: i64) -> Result<ProcessOutcome, EditionError> {
        let start = Instant::now();

        // ── Step 1: Load ─────────────────────────────────────────────────────
        let edition = Catalog::blocking(&self.catalog, move |c| c.get_edition(edition_id))
            .await?
            .ok_or(EditionError::EditionNotFound { id: edition_id })?;
        info!(edition_id, title = %edition.title, status = %edition.status, "Processing edition");

        // ── Step 2: Resolve source ───────────────────────────────────────────
        // An edition already in `processing` is turned away by the claim in
        // step 3, or here if its source is also missing.
        let source = match self.resolver.resolve(&edition.source_pdf_path) {
            Ok(path) => path,
            Err(EditionError::PathNotFound { logical, tried }) => {
                let err = EditionError::SourceMissing {
                    id: edition_id,
                    logical,
                    tried,
                };
                let reason = err.failure_reason();
                let marked = Catalog::blocking(&self.catalog, move |c| {
                    c.mark_failed_unclaimed(edition_id, &reason)
                })
                .await?;
                if !marked {
                    return Err(EditionError::AlreadyProcessing { id: edition_id });
                }
                error!(edition_id, error = %err, "Edition failed");
                self.notify_failed(edition_id, &err);
                return Err(err);
            }
            Err(e) => return Err(e),
        };

        // ── Step 3: Claim ────────────────────────────────────────────────────
        let claimed = Catalog::blocking(&self.catalog, move |c| c.try_claim(edition_id)).await?;
        let Some(run) = claimed else {
            let exists = Catalog::blocking(&self.catalog, move |c| c.get_edition(edition_id))
                .await?
                .is_some();
            return Err(if exists {
                EditionError::AlreadyProcessing { id: edition_id }
            } else {
                EditionError::EditionNotFound { id: edition_id }
            });
        };
        debug!(edition_id, run, "Edition claimed");
        if let Some(ref cb) = self.progress {
            cb.on_run_start(edition_id);
        }

        // ── Steps 4–7 run owned; any error fails the edition ────────────────
        let mut written: Vec<Page> = Vec::new();
        match self.run_claimed(&edition, run, &source, &mut written).await {
            Ok(replaced_pages) => {
                let total_pages = written.len() as u32;
                let duration_ms = start.elapsed().as_millis() as u64;
                info!(edition_id, total_pages, duration_ms, "Edition ready");
                if let Some(ref cb) = self.progress {
                    cb.on_run_complete(edition_id, total_pages);
                }
                Ok(ProcessOutcome {
                    edition_id,
                    total_pages,
                    pages: written,
                    replaced_pages,
                    duration_ms,
                })
            }
            Err(err) => {
                self.abandon_run(&edition, run, &written, &err).await;
                error!(edition_id, error = %err, "Edition failed");
                self.notify_failed(edition_id, &err);
                Err(err)
            }
        }
    }

    /// Steps 4–7. Pages written so far are pushed to `written` for rollback.
    async fn run_claimed(
        &self,
        edition: &Edition,
        run: i64,
        source: &Path,
        written: &mut Vec<Page>,
    ) -> Result<usize, EditionError> {
        let edition_id = edition.id;

        // ── Step 4: Clean slate ──────────────────────────────────────────────
        let replaced = Catalog::blocking(&self.catalog, move |c| c.delete_pages(edition_id)).await?;
        if replaced > 0 {
            debug!(edition_id, replaced, "Dropped pages of previous run");
        }

        // ── Step 5: Rasterize into staging ───────────────────────────────────
        let edition_dir = self.writer.edition_dir_physical(edition);
        let staging_parent = edition_dir
            .parent()
            .unwrap_or_else(|| self.resolver.root())
            .to_path_buf();
        tokio::fs::create_dir_all(&staging_parent)
            .await
            .map_err(|e| EditionError::io(&staging_parent, e))?;
        let staging = tempfile::Builder::new()
            .prefix(&format!(".staging-{edition_id}-"))
            .tempdir_in(&staging_parent)
            .map_err(|e| EditionError::io(&staging_parent, e))?;

        let page_hint = (edition.total_pages > 0).then_some(edition.total_pages);
        let images = rasterize(
            self.rasterizer.as_ref(),
            &RasterRequest {
                source,
                output_dir: staging.path(),
                page_hint,
            },
        )
        .await?;
        let total = images.len();
        if let Some(ref cb) = self.progress {
            cb.on_rasterized(edition_id, total);
        }

        // The edition directory belongs to whoever holds the claim now.
        if !Catalog::blocking(&self.catalog, move |c| c.owns_run(edition_id, run)).await? {
            return Err(EditionError::ClaimLost { id: edition_id });
        }

        // ── Step 6: Write pages in order ─────────────────────────────────────
        self.writer.clear_stale_images(edition).await;
        for (position, image) in images.iter().enumerate() {
            let page_number = position as u32 + 1;
            let page = self.writer.write_page(edition, page_number, image).await?;
            written.push(page);
            if let Some(ref cb) = self.progress {
                cb.on_page_written(edition_id, page_number, total);
            }
        }

        // ── Step 7: Publish ──────────────────────────────────────────────────
        let total_pages = written.len() as u32;
        let published =
            Catalog::blocking(&self.catalog, move |c| c.mark_ready(edition_id, run, total_pages))
                .await?;
        if !published {
            return Err(EditionError::ClaimLost { id: edition_id });
        }

        if let Err(e) = staging.close() {
            warn!(edition_id, error = %e, "Could not remove staging directory");
        }
        Ok(replaced)
    }

    /// Undo a failed run and record the failure, unless a newer run has
    /// taken the edition over. Best-effort: problems are logged.
    async fn abandon_run(&self, edition: &Edition, run: i64, written: &[Page], err: &EditionError) {
        let edition_id = edition.id;

        match Catalog::blocking(&self.catalog, move |c| c.delete_pages_for_run(edition_id, run))
            .await
        {
            Ok(Some(_)) => {}
            Ok(None) => {
                warn!(edition_id, run, "Run was superseded; leaving the edition to its new owner");
                return;
            }
            Err(e) => warn!(edition_id, error = %e, "Could not delete page rows during rollback"),
        }

        self.writer.discard(written).await;
        // Images of an earlier run lost their rows at step 4.
        self.writer.clear_stale_images(edition).await;

        let reason = err.failure_reason();
        match Catalog::blocking(&self.catalog, move |c| c.mark_failed(edition_id, run, &reason))
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!(edition_id, run, "Run was superseded before its failure was recorded"),
            Err(e) => error!(edition_id, error = %e, "Could not record failure"),
        }
    }

    fn notify_failed(&self, edition_id: i64, err: &EditionError) {
        if let Some(ref cb) = self.progress {
            cb.on_run_failed(edition_id, &err.to_string());
        }
    }
}

impl std::fmt::Debug for EditionProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditionProcessor")
            .field("catalog", &self.catalog)
            .field("rasterizer", &self.rasterizer.name())
            .field("config", &self.config)
            .field("progress", &self.progress.as_ref().map(|_| "<dyn ProcessingProgressCallback>"))
            .finish()
    }
}

/// Synchronous wrapper around [`EditionProcessor::process`].
///
/// Creates a temporary tokio runtime internally.
pub fn process_sync(
    processor: &EditionProcessor,
    edition_id: i64,
) -> Result<ProcessOutcome, EditionError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| EditionError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(processor.process(edition_id))
}
