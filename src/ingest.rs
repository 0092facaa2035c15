//! Upload helper: register a local PDF as a new `draft` edition.
//!
//! Stands in for the web upload workflow when editions are loaded from the
//! command line or from tests. The PDF is copied under the application root
//! so the stored `source_pdf_path` is root-relative like every other
//! catalog path.

use crate::catalog::Catalog;
use crate::config::PipelineConfig;
use crate::error::EditionError;
use crate::model::{Edition, NewEdition};
use crate::pipeline::paths::PathResolver;
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

/// Copy `pdf` into `<uploads_dir>/<date>/` and create a draft edition for it.
pub async fn ingest_pdf(
    catalog: &Arc<Catalog>,
    config: &PipelineConfig,
    pdf: &Path,
    title: &str,
    date: NaiveDate,
) -> Result<Edition, EditionError> {
    check_pdf(pdf).await?;

    let file_name = pdf
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| EditionError::InvalidConfig(format!("'{}' has no file name", pdf.display())))?;

    let resolver = PathResolver::new(&config.root_dir);
    let date_dir = config
        .uploads_root()
        .join(date.format("%Y-%m-%d").to_string());
    tokio::fs::create_dir_all(&date_dir)
        .await
        .map_err(|e| EditionError::io(&date_dir, e))?;

    let destination = unique_destination(&date_dir, file_name).await?;
    let bytes = tokio::fs::copy(pdf, &destination)
        .await
        .map_err(|e| EditionError::io(&destination, e))?;
    debug!(from = %pdf.display(), to = %destination.display(), bytes, "Copied upload");

    let new = NewEdition {
        title: title.to_string(),
        date,
        source_pdf_path: resolver.to_logical(&destination)?,
        file_size: bytes,
    };
    let edition = Catalog::blocking(catalog, move |c| c.create_edition(&new)).await?;

    info!(edition_id = edition.id, source = %edition.source_pdf_path, "Edition registered");
    Ok(edition)
}

/// Validate that `path` exists and starts with the PDF magic bytes.
async fn check_pdf(path: &Path) -> Result<(), EditionError> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| EditionError::io(path, e))?;
    let mut magic = [0u8; 4];
    if file.read_exact(&mut magic).await.is_err() || &magic != b"%PDF" {
        return Err(EditionError::NotAPdf {
            path: path.to_path_buf(),
            magic,
        });
    }
    Ok(())
}

/// `dir/name`, or `dir/stem-2.ext`, `dir/stem-3.ext`, … if taken.
async fn unique_destination(dir: &Path, file_name: &str) -> Result<PathBuf, EditionError> {
    let candidate = dir.join(file_name);
    if is_free(&candidate).await? {
        return Ok(candidate);
    }
    let path = Path::new(file_name);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("edition");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("pdf");
    for n in 2u32.. {
        let candidate = dir.join(format!("{stem}-{n}.{ext}"));
        if is_free(&candidate).await? {
            return Ok(candidate);
        }
    }
    Err(EditionError::Internal(format!(
        "no free file name for '{file_name}' in '{}'",
        dir.display()
    )))
}

async fn is_free(path: &Path) -> Result<bool, EditionError> {
    tokio::fs::try_exists(path)
        .await
        .map(|exists| !exists)
        .map_err(|e| EditionError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_non_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.pdf");
        std::fs::write(&path, b"hello").unwrap();
        match check_pdf(&path).await {
            Err(EditionError::NotAPdf { magic, .. }) => assert_eq!(&magic, b"hell"),
            other => panic!("expected NotAPdf, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unique_destination_appends_counter() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.pdf"), b"%PDF").unwrap();
        std::fs::write(dir.path().join("a-2.pdf"), b"%PDF").unwrap();
        assert_eq!(
            unique_destination(dir.path(), "a.pdf").await.unwrap(),
            dir.path().join("a-3.pdf")
        );
        assert_eq!(
            unique_destination(dir.path(), "b.pdf").await.unwrap(),
            dir.path().join("b.pdf")
        );
    }

    #[tokio::test]
    async fn ingest_creates_root_relative_draft() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let pdf = outside.path().join("daily.pdf");
        std::fs::write(&pdf, b"%PDF-1.7\n").unwrap();

        let config = PipelineConfig::builder()
            .root_dir(root.path())
            .build_unchecked()
            .unwrap();
        let catalog = Arc::new(Catalog::open_in_memory().unwrap());
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();

        let edition = ingest_pdf(&catalog, &config, &pdf, "Daily", date).await.unwrap();
        assert_eq!(edition.source_pdf_path, "uploads/2024-01-02/daily.pdf");
        assert_eq!(edition.file_size, 9);
        assert!(root.path().join(&edition.source_pdf_path).is_file());
    }
}
