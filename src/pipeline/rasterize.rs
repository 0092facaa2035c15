//! Rasterizer invocation: PDF → numbered page images in a directory.
//!
//! The actual rendering is delegated to a [`Rasterizer`]. In production that
//! is [`ExternalRasterizer`], which runs a configured executable (poppler's
//! `pdftoppm` by default) as a subprocess under a deadline. Tests substitute
//! an in-process fake that writes stub images.
//!
//! Whatever the implementation, [`rasterize`] does not trust it: after the
//! run it enumerates the output directory itself, keeps only raster image
//! files carrying a page index in their name, and orders them by that index.
//! An empty result is a failure even when the tool reported success.

use crate::config::{expand_args, PipelineConfig, TemplateVars};
use crate::error::{EditionError, RasterizeReason};
use async_trait::async_trait;
use image::ImageFormat;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Trailing page index of a file stem: `page-01`, `page_3`, `img7`.
static PAGE_INDEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)$").expect("page index pattern is valid"));

/// One rasterization job.
#[derive(Debug, Clone)]
pub struct RasterRequest<'a> {
    /// Physical path of the source PDF.
    pub source: &'a Path,
    /// Existing directory that receives one image per page.
    pub output_dir: &'a Path,
    /// Page count of the previous successful run, if any.
    pub page_hint: Option<u32>,
}

/// Renders every page of a PDF into `output_dir`.
///
/// Implementations only report whether the run itself succeeded; locating
/// and ordering the produced files is done by [`rasterize`].
#[async_trait]
pub trait Rasterizer: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn run(&self, request: &RasterRequest<'_>) -> Result<(), EditionError>;
}

/// Rasterizer backed by an external executable.
#[derive(Debug, Clone)]
pub struct ExternalRasterizer {
    program: PathBuf,
    args: Vec<String>,
    dpi: u32,
    timeout: Duration,
}

impl ExternalRasterizer {
    /// Build from a validated configuration, re-checking that the executable exists.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, EditionError> {
        if !config.rasterizer_path.is_file() {
            return Err(EditionError::RasterizerUnavailable {
                path: config.rasterizer_path.clone(),
            });
        }
        Ok(Self {
            program: config.rasterizer_path.clone(),
            args: config.rasterizer_args.clone(),
            dpi: config.dpi,
            timeout: config.timeout(),
        })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Arguments for one request.
    pub fn command_args(&self, request: &RasterRequest<'_>) -> Vec<String> {
        expand_args(
            &self.args,
            &TemplateVars {
                input: request.source,
                output_dir: request.output_dir,
                dpi: self.dpi,
                page_hint: request.page_hint,
            },
        )
    }
}

#[async_trait]
impl Rasterizer for ExternalRasterizer {
    fn name(&self) -> &str {
        self.program
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("rasterizer")
    }

    async fn run(&self, request: &RasterRequest<'_>) -> Result<(), EditionError> {
        let args = self.command_args(request);
        debug!(program = %self.program.display(), ?args, "Launching rasterizer");

        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    EditionError::RasterizerUnavailable {
                        path: self.program.clone(),
                    }
                } else {
                    EditionError::RasterizeFailure {
                        reason: RasterizeReason::Spawn(e.to_string()),
                    }
                }
            })?;

        // Dropping the pending future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| EditionError::RasterizeFailure {
                reason: RasterizeReason::Spawn(e.to_string()),
            })?,
            Err(_) => {
                let secs = self.timeout.as_secs();
                warn!(secs, "Rasterizer timed out, killed");
                return Err(EditionError::RasterizeFailure {
                    reason: RasterizeReason::Timeout { secs },
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(status = %output.status, stderr = %stderr.trim(), "Rasterizer failed");
            let reason = match output.status.code() {
                Some(code) => RasterizeReason::ExitCode(code),
                None => RasterizeReason::Signal,
            };
            return Err(EditionError::RasterizeFailure { reason });
        }

        Ok(())
    }
}

/// Run the rasterizer and return the produced page images in page order.
///
/// Creates `output_dir` if it does not exist.
pub async fn rasterize(
    rasterizer: &dyn Rasterizer,
    request: &RasterRequest<'_>,
) -> Result<Vec<PathBuf>, EditionError> {
    if !request.source.is_file() {
        return Err(EditionError::PathNotFound {
            logical: request.source.to_string_lossy().into_owned(),
            tried: vec![request.source.to_path_buf()],
        });
    }
    create_output_dir(request.output_dir).await?;

    let start = Instant::now();
    rasterizer.run(request).await?;

    let pages = collect_page_images(request.output_dir).await?;
    if pages.is_empty() {
        warn!(rasterizer = rasterizer.name(), "Rasterizer succeeded but wrote no pages");
        return Err(EditionError::RasterizeFailure {
            reason: RasterizeReason::NoOutput,
        });
    }

    info!(
        rasterizer = rasterizer.name(),
        pages = pages.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Rasterized"
    );
    Ok(pages)
}

async fn create_output_dir(dir: &Path) -> Result<(), EditionError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| EditionError::io(dir, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o755))
            .await
            .map_err(|e| EditionError::io(dir, e))?;
    }
    Ok(())
}

/// Image files in `dir` that carry a page index, sorted by that index.
pub async fn collect_page_images(dir: &Path) -> Result<Vec<PathBuf>, EditionError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| EditionError::io(dir, e))?;

    let mut indexed: Vec<(u32, PathBuf)> = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| EditionError::io(dir, e))?
    {
        let path = entry.path();
        let is_file = entry
            .file_type()
            .await
            .map(|t| t.is_file())
            .unwrap_or(false);
        if !is_file {
            continue;
        }
        match page_index(&path) {
            Some(index) => indexed.push((index, path)),
            None => debug!(file = %path.display(), "Ignoring non-page file"),
        }
    }

    indexed.sort_by(|(a, pa), (b, pb)| a.cmp(b).then_with(|| pa.cmp(pb)));
    Ok(indexed.into_iter().map(|(_, p)| p).collect())
}

/// Page index encoded in an image file name, or `None` for non-image or unnumbered files.
pub fn page_index(path: &Path) -> Option<u32> {
    let ext = path.extension()?.to_str()?;
    ImageFormat::from_extension(ext)?;
    let stem = path.file_stem()?.to_str()?;
    PAGE_INDEX
        .captures(stem)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}
