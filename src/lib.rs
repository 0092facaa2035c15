//! # edition-render
//!
//! Ingest uploaded PDF documents ("editions") and turn them into per-page
//! images that a viewer can display and a clipping tool can reference.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload (draft)
//!  │
//!  ├─ 1. Load     fetch the edition row
//!  ├─ 2. Guard    refuse editions already in processing
//!  ├─ 3. Resolve  find the source PDF under the known root conventions
//!  ├─ 4. Claim    atomic draft/failed/ready → processing
//!  ├─ 5. Clear    drop page rows from any previous run
//!  ├─ 6. Render   external rasterizer, bounded by a timeout
//!  ├─ 7. Write    move page images into place, one row per page
//!  └─ 8. Publish  total_pages = N, status = ready
//! ```
//!
//! Any failure after the claim rolls back the pages written by the run and
//! leaves the edition `failed` with the reason stored.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edition_render::{Catalog, EditionProcessor, PipelineConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .root_dir("/srv/editions")
//!         .rasterizer_path("/usr/bin/pdftoppm")
//!         .build()?;
//!     let catalog = Arc::new(Catalog::open("/srv/editions/catalog.db")?);
//!     let processor = EditionProcessor::with_external_rasterizer(config, catalog)?;
//!
//!     let outcome = processor.process(42).await?;
//!     println!("edition 42 ready with {} pages", outcome.total_pages);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `editionctl` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod catalog;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod ingest;
pub mod model;
pub mod pipeline;
pub mod process;
pub mod progress;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use catalog::Catalog;
pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use diagnostics::{Diagnostics, EditionReport, Issue, PageCheck, RepairSummary};
pub use error::{EditionError, RasterizeReason};
pub use ingest::ingest_pdf;
pub use model::{Edition, EditionStatus, NewEdition, Page};
pub use pipeline::pages::PageWriter;
pub use pipeline::paths::{Candidate, PathResolver};
pub use pipeline::rasterize::{ExternalRasterizer, RasterRequest, Rasterizer};
pub use process::{process_sync, EditionProcessor, ProcessOutcome};
pub use progress::{NoopProgressCallback, ProcessingProgressCallback, ProgressCallback};
