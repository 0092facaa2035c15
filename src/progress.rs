//! Progress-callback trait for edition processing events.
//!
//! Inject an [`Arc<dyn ProcessingProgressCallback>`] via
//! [`crate::process::EditionProcessor::with_progress`] to observe runs as
//! they move through rasterization and page writing. Callers can forward
//! events to a terminal progress bar, a log, or an admin dashboard without
//! the pipeline knowing how the host application reports them.
//!
//! # Example
//!
//! ```rust
//! use edition_render::ProcessingProgressCallback;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct CountingCallback {
//!     written: AtomicUsize,
//! }
//!
//! impl ProcessingProgressCallback for CountingCallback {
//!     fn on_page_written(&self, edition_id: i64, page_num: u32, total_pages: usize) {
//!         self.written.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("edition {edition_id}: page {page_num}/{total_pages}");
//!     }
//! }
//! ```

use std::sync::Arc;

/// Called by [`crate::process::EditionProcessor`] as a run progresses.
///
/// All methods have default no-op implementations. Runs for different
/// editions may report concurrently, so implementations must be `Send + Sync`
/// and synchronise any shared state.
pub trait ProcessingProgressCallback: Send + Sync {
    /// The run claimed the edition and is about to rasterize.
    fn on_run_start(&self, edition_id: i64) {
        let _ = edition_id;
    }

    /// The rasterizer produced `total_pages` page images.
    fn on_rasterized(&self, edition_id: i64, total_pages: usize) {
        let _ = (edition_id, total_pages);
    }

    /// A page image was moved into place and recorded.
    ///
    /// # Arguments
    /// * `page_num`: 1-indexed page number
    /// * `total_pages`: pages produced by this run
    fn on_page_written(&self, edition_id: i64, page_num: u32, total_pages: usize) {
        let _ = (edition_id, page_num, total_pages);
    }

    /// The edition reached `ready`.
    fn on_run_complete(&self, edition_id: i64, total_pages: u32) {
        let _ = (edition_id, total_pages);
    }

    /// The run ended with the edition in `failed`.
    fn on_run_failed(&self, edition_id: i64, error: &str) {
        let _ = (edition_id, error);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ProcessingProgressCallback for NoopProgressCallback {}

/// Convenience alias for the type held by the processor.
pub type ProgressCallback = Arc<dyn ProcessingProgressCallback>;
