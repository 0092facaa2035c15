//! Read-only health reports and explicit remediation for editions.
//!
//! Reports never mutate state: a page image that cannot be resolved is an
//! [`Issue`] in the report, not an error. Mutations happen only through the
//! explicit entry points ([`Diagnostics::reset`], [`Diagnostics::reprocess`],
//! [`Diagnostics::repair_all`]), and reprocessing always goes through
//! [`EditionProcessor::process`].

use crate::error::EditionError;
use crate::model::{Edition, EditionStatus};
use crate::process::{EditionProcessor, ProcessOutcome};
use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::{info, warn};

/// Something wrong with an edition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Issue {
    /// `ready` but no page rows.
    ReadyWithoutPages,
    /// `ready` but `total_pages` disagrees with the page rows.
    PageCountMismatch { expected: u32, actual: u32 },
    /// Page numbers do not form 1..N.
    PageSequenceGap { missing: Vec<u32> },
    /// A page row whose image does not resolve.
    MissingImage { page: u32, tried: Vec<PathBuf> },
    /// Page rows on an edition that is not `ready`.
    OrphanPages { count: u32 },
    /// The source PDF does not resolve.
    SourceUnresolvable { tried: Vec<PathBuf> },
    /// `processing` for longer than the stuck threshold. Needs an admin reset.
    StuckProcessing { since: DateTime<Utc> },
}

/// Presence check for one page image.
#[derive(Debug, Clone, Serialize)]
pub struct PageCheck {
    pub page_number: u32,
    pub image_path: String,
    /// Physical location, if it resolved.
    pub resolved: Option<PathBuf>,
}

/// Health of one edition.
#[derive(Debug, Clone, Serialize)]
pub struct EditionReport {
    pub edition: Edition,
    pub pages: Vec<PageCheck>,
    pub issues: Vec<Issue>,
}

impl EditionReport {
    pub fn is_healthy(&self) -> bool {
        self.issues.is_empty()
    }

    fn is_stuck(&self) -> bool {
        self.issues
            .iter()
            .any(|i| matches!(i, Issue::StuckProcessing { .. }))
    }
}

/// Outcome of [`Diagnostics::repair_all`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct RepairSummary {
    pub attempted: usize,
    pub repaired: Vec<i64>,
    pub failed: Vec<(i64, String)>,
    /// Stuck editions left alone; they need [`Diagnostics::reset`] first.
    pub skipped_stuck: Vec<i64>,
}

/// Reporting and remediation over a processor's catalog.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    processor: EditionProcessor,
    stuck_after: Duration,
}

impl Diagnostics {
    pub fn new(processor: EditionProcessor) -> Self {
        Self {
            processor,
            stuck_after: Duration::hours(1),
        }
    }

    /// How long an edition may stay `processing` before it is reported stuck.
    pub fn with_stuck_after(mut self, stuck_after: Duration) -> Self {
        self.stuck_after = stuck_after;
        self
    }

    pub fn processor(&self) -> &EditionProcessor {
        &self.processor
    }

    /// Check one edition.
    pub async fn edition_report(&self, edition_id: i64) -> Result<EditionReport, EditionError> {
        self.off_runtime(move |d| d.edition_report_blocking(edition_id))
            .await
    }

    /// Check every edition, optionally restricted to one status.
    pub async fn scan(
        &self,
        status: Option<EditionStatus>,
    ) -> Result<Vec<EditionReport>, EditionError> {
        self.off_runtime(move |d| d.scan_blocking(status)).await
    }

    /// Catalog queries and file checks block; run them on the blocking pool.
    async fn off_runtime<T, F>(&self, op: F) -> Result<T, EditionError>
    where
        F: FnOnce(&Diagnostics) -> Result<T, EditionError> + Send + 'static,
        T: Send + 'static,
    {
        let this = self.clone();
        tokio::task::spawn_blocking(move || op(&this))
            .await
            .map_err(|e| EditionError::Internal(format!("Diagnostics task panicked: {}", e)))?
    }

    fn edition_report_blocking(&self, edition_id: i64) -> Result<EditionReport, EditionError> {
        let edition = self
            .processor
            .catalog()
            .get_edition(edition_id)?
            .ok_or(EditionError::EditionNotFound { id: edition_id })?;
        self.report_for(edition)
    }

    fn scan_blocking(
        &self,
        status: Option<EditionStatus>,
    ) -> Result<Vec<EditionReport>, EditionError> {
        self.processor
            .catalog()
            .list_editions(status)?
            .into_iter()
            .map(|edition| self.report_for(edition))
            .collect()
    }

    fn report_for(&self, edition: Edition) -> Result<EditionReport, EditionError> {
        let resolver = self.processor.resolver();
        let rows = self.processor.catalog().pages_for(edition.id)?;
        let mut issues = Vec::new();

        if let Err(EditionError::PathNotFound { tried, .. }) =
            resolver.resolve(&edition.source_pdf_path)
        {
            issues.push(Issue::SourceUnresolvable { tried });
        }

        let mut pages = Vec::with_capacity(rows.len());
        for row in &rows {
            let resolved = match resolver.resolve(&row.image_path) {
                Ok(path) => Some(path),
                Err(EditionError::PathNotFound { tried, .. }) => {
                    issues.push(Issue::MissingImage {
                        page: row.page_number,
                        tried,
                    });
                    None
                }
                Err(e) => return Err(e),
            };
            pages.push(PageCheck {
                page_number: row.page_number,
                image_path: row.image_path.clone(),
                resolved,
            });
        }

        let actual = rows.len() as u32;
        match edition.status {
            EditionStatus::Ready => {
                if actual == 0 {
                    issues.push(Issue::ReadyWithoutPages);
                } else if edition.total_pages != actual {
                    issues.push(Issue::PageCountMismatch {
                        expected: edition.total_pages,
                        actual,
                    });
                }
            }
            EditionStatus::Processing => {
                if Utc::now() - edition.updated_at > self.stuck_after {
                    issues.push(Issue::StuckProcessing {
                        since: edition.updated_at,
                    });
                }
            }
            EditionStatus::Draft | EditionStatus::Failed => {
                if actual > 0 {
                    issues.push(Issue::OrphanPages { count: actual });
                }
            }
        }

        let numbers: BTreeSet<u32> = rows.iter().map(|p| p.page_number).collect();
        let upper = numbers.iter().next_back().copied().unwrap_or(0).max(
            if edition.status == EditionStatus::Ready {
                edition.total_pages
            } else {
                0
            },
        );
        let missing: Vec<u32> = (1..=upper).filter(|n| !numbers.contains(n)).collect();
        if !missing.is_empty() {
            issues.push(Issue::PageSequenceGap { missing });
        }

        Ok(EditionReport {
            edition,
            pages,
            issues,
        })
    }

    /// Administrative status reset, e.g. for a run that crashed mid-flight.
    ///
    /// Only `failed` and `draft` are accepted targets. Page rows left by an
    /// interrupted run are dropped.
    pub async fn reset(&self, edition_id: i64, to: EditionStatus) -> Result<Edition, EditionError> {
        if !matches!(to, EditionStatus::Failed | EditionStatus::Draft) {
            return Err(EditionError::InvalidConfig(format!(
                "editions can only be reset to failed or draft, not {to}"
            )));
        }
        self.off_runtime(move |d| d.reset_blocking(edition_id, to))
            .await
    }

    fn reset_blocking(&self, edition_id: i64, to: EditionStatus) -> Result<Edition, EditionError> {
        let catalog = self.processor.catalog();
        let edition = catalog
            .get_edition(edition_id)?
            .ok_or(EditionError::EditionNotFound { id: edition_id })?;

        if edition.status == EditionStatus::Processing {
            let dropped = catalog.delete_pages(edition_id)?;
            if dropped > 0 {
                warn!(edition_id, dropped, "Dropped pages of interrupted run");
            }
        }
        let reason = (to == EditionStatus::Failed).then_some("reset by administrator");
        catalog.reset_status(edition_id, to, reason)?;
        info!(edition_id, from = %edition.status, to = %to, "Edition reset");

        catalog
            .get_edition(edition_id)?
            .ok_or(EditionError::EditionNotFound { id: edition_id })
    }

    /// Re-run the pipeline for one edition.
    pub async fn reprocess(&self, edition_id: i64) -> Result<ProcessOutcome, EditionError> {
        self.processor.process(edition_id).await
    }

    /// Reprocess every `failed` or unhealthy edition, `concurrency` editions at a time.
    ///
    /// Stuck `processing` editions are skipped and listed in the summary.
    pub async fn repair_all(&self, concurrency: usize) -> Result<RepairSummary, EditionError> {
        let mut summary = RepairSummary::default();
        let mut targets = Vec::new();

        for report in self.scan(None).await? {
            let id = report.edition.id;
            if report.is_stuck() {
                summary.skipped_stuck.push(id);
                continue;
            }
            let needs_repair = match report.edition.status {
                EditionStatus::Processing => false,
                EditionStatus::Failed => true,
                EditionStatus::Draft | EditionStatus::Ready => !report.is_healthy(),
            };
            if needs_repair {
                targets.push(id);
            }
        }

        summary.attempted = targets.len();
        info!(editions = targets.len(), concurrency, "Repairing editions");

        let results: Vec<(i64, Result<ProcessOutcome, EditionError>)> =
            stream::iter(targets.into_iter().map(|id| async move {
                (id, self.processor.process(id).await)
            }))
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        for (id, result) in results {
            match result {
                Ok(_) => summary.repaired.push(id),
                Err(e) => summary.failed.push((id, e.to_string())),
            }
        }
        summary.repaired.sort_unstable();
        summary.failed.sort_by_key(|(id, _)| *id);
        Ok(summary)
    }
}
