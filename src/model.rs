//! Catalog records: editions and their pages.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Processing state of an edition.
///
/// Transitions are owned by [`crate::process::EditionProcessor`]:
/// `draft → processing → {ready, failed}`. Both `failed` and `ready` may be
/// resubmitted, which re-enters `processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditionStatus {
    Draft,
    Processing,
    Ready,
    Failed,
}

impl EditionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EditionStatus::Draft => "draft",
            EditionStatus::Processing => "processing",
            EditionStatus::Ready => "ready",
            EditionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for EditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EditionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(EditionStatus::Draft),
            "processing" => Ok(EditionStatus::Processing),
            "ready" => Ok(EditionStatus::Ready),
            "failed" => Ok(EditionStatus::Failed),
            other => Err(format!("unknown edition status '{other}'")),
        }
    }
}

impl ToSql for EditionStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for EditionStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        s.parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

/// An uploaded PDF document and its processing state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edition {
    pub id: i64,
    pub title: String,
    /// Publication date; also names the image directory.
    pub date: NaiveDate,
    /// Root-relative path of the source PDF.
    pub source_pdf_path: String,
    /// Number of pages written by the last successful run.
    pub total_pages: u32,
    pub status: EditionStatus,
    pub file_size: u64,
    /// Set when the last run ended in `failed`.
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied by the upload workflow when it registers a new edition.
#[derive(Debug, Clone)]
pub struct NewEdition {
    pub title: String,
    pub date: NaiveDate,
    pub source_pdf_path: String,
    pub file_size: u64,
}

/// One rendered page of an edition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub edition_id: i64,
    /// 1-based position in the edition.
    pub page_number: u32,
    /// Root-relative path of the page image.
    pub image_path: String,
}
