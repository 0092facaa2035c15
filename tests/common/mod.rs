//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use edition_render::{
    ingest_pdf, Catalog, Edition, EditionError, EditionProcessor, PipelineConfig, RasterRequest,
    Rasterizer,
};
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Notify;

pub fn edition_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
}

/// Application root in a temp dir plus an in-memory catalog.
pub struct Fixture {
    pub root: TempDir,
    pub catalog: Arc<Catalog>,
    pub config: PipelineConfig,
}

impl Fixture {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let config = PipelineConfig::builder()
            .root_dir(root.path())
            .build_unchecked()
            .unwrap();
        Self {
            root,
            catalog: Arc::new(Catalog::open_in_memory().unwrap()),
            config,
        }
    }

    pub fn processor(&self, rasterizer: Arc<dyn Rasterizer>) -> EditionProcessor {
        EditionProcessor::new(self.config.clone(), Arc::clone(&self.catalog), rasterizer)
    }

    /// Register a small PDF as a draft edition.
    pub async fn draft(&self, title: &str) -> Edition {
        let incoming = self.root.path().join("incoming.pdf");
        std::fs::write(&incoming, b"%PDF-1.4\n%stub\n").unwrap();
        ingest_pdf(&self.catalog, &self.config, &incoming, title, edition_date())
            .await
            .unwrap()
    }

    pub fn edition(&self, id: i64) -> Edition {
        self.catalog.get_edition(id).unwrap().unwrap()
    }

    pub fn edition_dir(&self, id: i64) -> std::path::PathBuf {
        self.root
            .path()
            .join("uploads")
            .join("2024-01-02")
            .join(id.to_string())
    }
}

fn write_png(dir: &Path, page: u32) -> Result<(), EditionError> {
    image::RgbaImage::new(4, 4)
        .save(dir.join(format!("page-{page}.png")))
        .map_err(|e| EditionError::Internal(e.to_string()))
}

/// In-process rasterizer that writes `pages` tiny PNGs.
pub struct StubRasterizer {
    pages: AtomicU32,
    pub calls: AtomicUsize,
}

impl StubRasterizer {
    pub fn new(pages: u32) -> Arc<Self> {
        Arc::new(Self {
            pages: AtomicU32::new(pages),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set_pages(&self, pages: u32) {
        self.pages.store(pages, Ordering::SeqCst);
    }
}

#[async_trait]
impl Rasterizer for StubRasterizer {
    fn name(&self) -> &str {
        "stub"
    }

    async fn run(&self, request: &RasterRequest<'_>) -> Result<(), EditionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        for page in 1..=self.pages.load(Ordering::SeqCst) {
            write_png(request.output_dir, page)?;
        }
        Ok(())
    }
}

/// Rasterizer that signals `started` and then blocks until `release`.
pub struct GatedRasterizer {
    pub started: Notify,
    pub release: Notify,
    pages: u32,
}

impl GatedRasterizer {
    pub fn new(pages: u32) -> Arc<Self> {
        Arc::new(Self {
            started: Notify::new(),
            release: Notify::new(),
            pages,
        })
    }
}

#[async_trait]
impl Rasterizer for GatedRasterizer {
    fn name(&self) -> &str {
        "gated"
    }

    async fn run(&self, request: &RasterRequest<'_>) -> Result<(), EditionError> {
        self.started.notify_one();
        self.release.notified().await;
        for page in 1..=self.pages {
            write_png(request.output_dir, page)?;
        }
        Ok(())
    }
}
