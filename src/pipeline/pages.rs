//! Page persistence: move staged images to their stable location and record them.
//!
//! Every page of an edition lives at
//! `<uploads_dir>/<edition date>/<edition id>/page-<n>.<ext>` under the
//! application root, and the catalog stores exactly that root-relative
//! string. The writer never records a physical path.

use crate::catalog::Catalog;
use crate::error::EditionError;
use crate::model::{Edition, Page};
use crate::pipeline::paths::PathResolver;
use crate::pipeline::rasterize::page_index;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Writes page images and page rows for one edition.
#[derive(Debug, Clone)]
pub struct PageWriter {
    catalog: Arc<Catalog>,
    resolver: PathResolver,
    uploads_dir: String,
}

impl PageWriter {
    pub fn new(catalog: Arc<Catalog>, resolver: PathResolver, uploads_dir: &Path) -> Self {
        let uploads_dir = uploads_dir
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        Self {
            catalog,
            resolver,
            uploads_dir,
        }
    }

    /// Logical directory holding an edition's page images.
    pub fn edition_dir(&self, edition: &Edition) -> String {
        format!(
            "{}/{}/{}",
            self.uploads_dir,
            edition.date.format("%Y-%m-%d"),
            edition.id
        )
    }

    /// Logical path of one page image.
    pub fn page_path(&self, edition: &Edition, page_number: u32, extension: &str) -> String {
        format!("{}/page-{page_number}.{extension}", self.edition_dir(edition))
    }

    /// Physical directory holding an edition's page images.
    pub fn edition_dir_physical(&self, edition: &Edition) -> PathBuf {
        self.resolver.write_location(&self.edition_dir(edition))
    }

    /// Remove page images left by earlier runs. Best-effort.
    pub async fn clear_stale_images(&self, edition: &Edition) -> usize {
        let dir = self.edition_dir_physical(edition);
        let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
            return 0;
        };

        let mut removed = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let is_page_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false)
                && is_stable_page_name(&path);
            if !is_page_file {
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(file = %path.display(), error = %e, "Could not remove stale page image"),
            }
        }
        if removed > 0 {
            debug!(edition_id = edition.id, removed, "Cleared stale page images");
        }
        removed
    }

    /// Place `staged` as page `page_number` of `edition` and record it.
    ///
    /// The image is removed again if the row cannot be written.
    pub async fn write_page(
        &self,
        edition: &Edition,
        page_number: u32,
        staged: &Path,
    ) -> Result<Page, EditionError> {
        let extension = staged
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .ok_or_else(|| EditionError::WriteFailure {
                page: page_number,
                detail: format!("'{}' has no image extension", staged.display()),
            })?;

        let destination = self
            .resolver
            .write_location(&self.page_path(edition, page_number, &extension));
        let page = Page {
            edition_id: edition.id,
            page_number,
            image_path: self.resolver.to_logical(&destination)?,
        };

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| EditionError::WriteFailure {
                    page: page_number,
                    detail: format!("create '{}': {e}", parent.display()),
                })?;
        }

        move_file(staged, &destination)
            .await
            .map_err(|e| EditionError::WriteFailure {
                page: page_number,
                detail: format!("move to '{}': {e}", destination.display()),
            })?;

        let row = page.clone();
        if let Err(e) = Catalog::blocking(&self.catalog, move |c| c.insert_page(&row)).await {
            remove_quietly(&destination).await;
            return Err(e);
        }

        debug!(edition_id = edition.id, page = page_number, path = %page.image_path, "Page written");
        Ok(page)
    }

    /// Remove the images of pages written by a failed run. Best-effort.
    pub async fn discard(&self, written: &[Page]) {
        for page in written {
            remove_quietly(&self.resolver.write_location(&page.image_path)).await;
        }
        if !written.is_empty() {
            debug!(pages = written.len(), "Discarded partial page set");
        }
    }
}

fn is_stable_page_name(path: &Path) -> bool {
    let stem_is_page = path
        .file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|s| s.starts_with("page-"));
    stem_is_page && page_index(path).is_some()
}

/// Rename, falling back to copy + remove across filesystems.
async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            if tokio::fs::metadata(to).await.is_ok_and(|m| m.is_dir()) {
                return Err(rename_err);
            }
            tokio::fs::copy(from, to).await?;
            tokio::fs::remove_file(from).await
        }
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(file = %path.display(), error = %e, "Could not remove page image");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewEdition;
    use chrono::NaiveDate;

    fn setup() -> (tempfile::TempDir, Arc<Catalog>, PageWriter, Edition) {
        let root = tempfile::tempdir().unwrap();
        let catalog = Arc::new(Catalog::open_in_memory().unwrap());
        let edition = catalog
            .create_edition(&NewEdition {
                title: "Evening".into(),
                date: NaiveDate::from_ymd_opt(2024, 3, 9).unwrap(),
                source_pdf_path: "uploads/2024-03-09/evening.pdf".into(),
                file_size: 10,
            })
            .unwrap();
        let writer = PageWriter::new(
            Arc::clone(&catalog),
            PathResolver::new(root.path()),
            Path::new("uploads"),
        );
        (root, catalog, writer, edition)
    }

    #[test]
    fn page_path_layout() {
        let (_root, _catalog, writer, edition) = setup();
        assert_eq!(
            writer.page_path(&edition, 4, "png"),
            format!("uploads/2024-03-09/{}/page-4.png", edition.id)
        );
    }

    #[tokio::test]
    async fn write_page_moves_file_and_records_logical_path() {
        let (root, catalog, writer, edition) = setup();
        let staged = root.path().join("staged-page-01.PNG");
        std::fs::write(&staged, b"png").unwrap();

        let page = writer.write_page(&edition, 1, &staged).await.unwrap();

        assert_eq!(page.image_path, format!("uploads/2024-03-09/{}/page-1.png", edition.id));
        assert!(!staged.exists());
        assert!(root.path().join(&page.image_path).is_file());
        assert_eq!(catalog.pages_for(edition.id).unwrap(), vec![page]);
    }

    #[tokio::test]
    async fn duplicate_write_removes_the_new_file() {
        let (root, _catalog, writer, edition) = setup();
        let first = root.path().join("a-1.png");
        std::fs::write(&first, b"one").unwrap();
        let page = writer.write_page(&edition, 1, &first).await.unwrap();

        let second = root.path().join("b-1.png");
        std::fs::write(&second, b"two").unwrap();
        let err = writer.write_page(&edition, 1, &second).await.unwrap_err();
        assert!(matches!(err, EditionError::DuplicatePage { page: 1, .. }));
        assert!(!root.path().join(&page.image_path).exists());
    }

    #[tokio::test]
    async fn discard_removes_written_images_only() {
        let (root, catalog, writer, edition) = setup();
        let staged = root.path().join("page-1.png");
        std::fs::write(&staged, b"one").unwrap();
        let page = writer.write_page(&edition, 1, &staged).await.unwrap();

        writer.discard(std::slice::from_ref(&page)).await;
        assert!(!root.path().join(&page.image_path).exists());
        // Rows are the processor's business.
        assert_eq!(catalog.page_count(edition.id).unwrap(), 1);
    }

    #[tokio::test]
    async fn clear_stale_images_keeps_other_files() {
        let (_root, _catalog, writer, edition) = setup();
        let dir = writer.edition_dir_physical(&edition);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("page-1.png"), b"x").unwrap();
        std::fs::write(dir.join("page-2.png"), b"x").unwrap();
        std::fs::write(dir.join("cover.png"), b"x").unwrap();

        assert_eq!(writer.clear_stale_images(&edition).await, 2);
        assert!(dir.join("cover.png").exists());
    }
}
