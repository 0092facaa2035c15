//! Pipeline stages for edition ingestion.
//!
//! Each submodule owns one step of a run.
//!
//! ## Data Flow
//!
//! ```text
//! paths ──▶ rasterize ──▶ pages
//! (resolve)  (subprocess)  (move + record)
//! ```
//!
//! 1. [`paths`]: translate stored logical paths to filesystem locations
//! 2. [`rasterize`]: run the rasterizer into a staging directory and collect
//!    the numbered page images it produced
//! 3. [`pages`]: move each image to its stable name and insert its row

pub mod pages;
pub mod paths;
pub mod rasterize;
