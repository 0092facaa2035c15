//! Configuration for the ingestion pipeline.
//!
//! Everything the pipeline needs from its environment (the application root,
//! where page images live, which rasterizer to run and how) is carried in one
//! immutable [`PipelineConfig`]. It is validated once by
//! [`PipelineConfigBuilder::build`] and then shared read-only by the
//! processor and the rasterizer invoker.

use crate::error::EditionError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Argument template targeting poppler's `pdftoppm`.
///
/// Produces `page-1.png`, `page-2.png`, … (zero-padded for larger documents)
/// inside the output directory.
pub const DEFAULT_RASTERIZER_ARGS: &[&str] = &["-png", "-r", "{dpi}", "{input}", "{output_prefix}"];

/// Configuration for edition processing.
///
/// Built via [`PipelineConfig::builder()`].
///
/// # Example
/// ```rust,no_run
/// use edition_render::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .root_dir("/srv/editions")
///     .rasterizer_path("/usr/bin/pdftoppm")
///     .dpi(150)
///     .timeout_secs(120)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Application root. All logical paths stored in the catalog are relative to it.
    pub root_dir: PathBuf,

    /// Root-relative directory holding page images. Default: `uploads`.
    pub uploads_dir: PathBuf,

    /// External rasterizer executable.
    pub rasterizer_path: PathBuf,

    /// Argument template for the rasterizer. Default: [`DEFAULT_RASTERIZER_ARGS`].
    ///
    /// Placeholders: `{input}`, `{output_dir}`, `{output_prefix}`, `{dpi}`,
    /// `{page_hint}`. Arguments referencing `{page_hint}` are dropped when the
    /// edition has no previous page count.
    pub rasterizer_args: Vec<String>,

    /// Rendering resolution passed as `{dpi}`. Range: 36–600. Default: 150.
    pub dpi: u32,

    /// Wall-clock limit for one rasterizer invocation. Default: 300.
    pub timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            uploads_dir: PathBuf::from("uploads"),
            rasterizer_path: PathBuf::from("/usr/bin/pdftoppm"),
            rasterizer_args: DEFAULT_RASTERIZER_ARGS.iter().map(|s| s.to_string()).collect(),
            dpi: 150,
            timeout_secs: 300,
        }
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Absolute directory holding page images.
    pub fn uploads_root(&self) -> PathBuf {
        self.root_dir.join(&self.uploads_dir)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn root_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.root_dir = dir.into();
        self
    }

    pub fn uploads_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.uploads_dir = dir.into();
        self
    }

    pub fn rasterizer_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.rasterizer_path = path.into();
        self
    }

    pub fn rasterizer_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.rasterizer_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(36, 600);
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.timeout_secs = secs;
        self
    }

    /// Build the configuration, validating constraints and the rasterizer path.
    pub fn build(self) -> Result<PipelineConfig, EditionError> {
        let config = self.build_unchecked()?;
        if !config.rasterizer_path.is_file() {
            return Err(EditionError::RasterizerUnavailable {
                path: config.rasterizer_path,
            });
        }
        Ok(config)
    }

    /// Build without checking that the rasterizer executable exists.
    ///
    /// For pipelines driven by an in-process [`crate::pipeline::rasterize::Rasterizer`].
    ///
    /// The root is made absolute here, so resolution never depends on the
    /// working directory of the process.
    pub fn build_unchecked(mut self) -> Result<PipelineConfig, EditionError> {
        let root = std::fs::canonicalize(&self.config.root_dir)
            .ok()
            .filter(|root| root.is_dir())
            .ok_or_else(|| {
                EditionError::InvalidConfig(format!(
                    "root directory '{}' does not exist",
                    self.config.root_dir.display()
                ))
            })?;
        self.config.root_dir = root;

        let c = &self.config;
        if c.uploads_dir.is_absolute() {
            return Err(EditionError::InvalidConfig(format!(
                "uploads directory must be root-relative, got '{}'",
                c.uploads_dir.display()
            )));
        }
        if c.timeout_secs == 0 {
            return Err(EditionError::InvalidConfig(
                "Timeout must be ≥ 1 second".into(),
            ));
        }
        if !c.rasterizer_args.iter().any(|a| a.contains("{input}")) {
            return Err(EditionError::InvalidConfig(
                "Rasterizer arguments must reference {input}".into(),
            ));
        }
        Ok(self.config)
    }
}

/// Inputs substituted into the rasterizer argument template.
#[derive(Debug, Clone)]
pub struct TemplateVars<'a> {
    pub input: &'a Path,
    pub output_dir: &'a Path,
    pub dpi: u32,
    pub page_hint: Option<u32>,
}

/// Expand the argument template.
pub fn expand_args(template: &[String], vars: &TemplateVars<'_>) -> Vec<String> {
    let prefix = vars.output_dir.join("page");
    template
        .iter()
        .filter_map(|arg| {
            let arg = if arg.contains("{page_hint}") {
                let hint = vars.page_hint?;
                arg.replace("{page_hint}", &hint.to_string())
            } else {
                arg.clone()
            };
            Some(
                arg.replace("{input}", &vars.input.to_string_lossy())
                    .replace("{output_dir}", &vars.output_dir.to_string_lossy())
                    .replace("{output_prefix}", &prefix.to_string_lossy())
                    .replace("{dpi}", &vars.dpi.to_string()),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dpi_is_clamped() {
        let b = PipelineConfig::builder().dpi(5000);
        assert_eq!(b.config.dpi, 600);
    }

    #[test]
    fn missing_rasterizer_fails_fast() {
        let root = tempfile::tempdir().unwrap();
        let err = PipelineConfig::builder()
            .root_dir(root.path())
            .rasterizer_path(root.path().join("no-such-tool"))
            .build()
            .unwrap_err();
        assert!(matches!(err, EditionError::RasterizerUnavailable { .. }));
    }

    #[test]
    fn missing_root_is_invalid() {
        let err = PipelineConfig::builder()
            .root_dir("/definitely/not/a/root")
            .build_unchecked()
            .unwrap_err();
        assert!(matches!(err, EditionError::InvalidConfig(_)));
    }

    #[test]
    fn relative_root_is_made_absolute() {
        let config = PipelineConfig::builder()
            .root_dir(".")
            .build_unchecked()
            .unwrap();
        assert!(config.root_dir.is_absolute());
        assert_eq!(config.root_dir, std::env::current_dir().unwrap().canonicalize().unwrap());
    }

    #[test]
    fn zero_timeout_is_invalid() {
        let root = tempfile::tempdir().unwrap();
        let err = PipelineConfig::builder()
            .root_dir(root.path())
            .timeout_secs(0)
            .build_unchecked()
            .unwrap_err();
        assert!(matches!(err, EditionError::InvalidConfig(_)));
    }

    #[test]
    fn expand_default_template() {
        let args: Vec<String> = DEFAULT_RASTERIZER_ARGS.iter().map(|s| s.to_string()).collect();
        let out = expand_args(
            &args,
            &TemplateVars {
                input: Path::new("/r/uploads/a.pdf"),
                output_dir: Path::new("/r/uploads/stage"),
                dpi: 120,
                page_hint: None,
            },
        );
        assert_eq!(
            out,
            vec!["-png", "-r", "120", "/r/uploads/a.pdf", "/r/uploads/stage/page"]
        );
    }

    #[test]
    fn page_hint_argument_dropped_without_hint() {
        let args = vec!["--pages={page_hint}".to_string(), "{input}".to_string()];
        let vars = TemplateVars {
            input: Path::new("a.pdf"),
            output_dir: Path::new("out"),
            dpi: 150,
            page_hint: None,
        };
        assert_eq!(expand_args(&args, &vars), vec!["a.pdf"]);

        let vars = TemplateVars {
            page_hint: Some(12),
            ..vars
        };
        assert_eq!(expand_args(&args, &vars), vec!["--pages=12", "a.pdf"]);
    }
}
