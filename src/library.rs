//! Data library: the recordings saved under the data directory.

use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::Result;
use crate::export::json_path_for;

#[derive(Debug, Clone, PartialEq)]
pub struct LibraryEntry {
    pub path: PathBuf,
    pub file_name: String,
    pub modified: DateTime<Local>,
    pub size_bytes: u64,
    /// png thumbnail rendered next to the csv, if any
    pub preview: Option<PathBuf>,
    pub has_json: bool,
}

impl LibraryEntry {
    pub fn size_kb(&self) -> f64 {
        self.size_bytes as f64 / 1024.0
    }

    pub fn label(&self) -> String {
        upload_label(&self.file_name)
    }
}

/// List `*.csv` recordings in `dir`, newest first.
///
/// a missing directory is created and reads as empty.
pub fn scan(dir: &Path) -> Result<Vec<LibraryEntry>> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for item in fs::read_dir(dir)? {
        let item = item?;
        let path = item.path();
        let is_csv = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("csv"))
            .unwrap_or(false);
        if !is_csv {
            continue;
        }

        let metadata = item.metadata()?;
        if !metadata.is_file() {
            continue;
        }

        let png = path.with_extension("png");
        entries.push(LibraryEntry {
            file_name: item.file_name().to_string_lossy().into_owned(),
            modified: DateTime::<Local>::from(metadata.modified()?),
            size_bytes: metadata.len(),
            preview: png.exists().then_some(png),
            has_json: json_path_for(&path).exists(),
            path,
        });
    }

    entries.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.file_name.cmp(&b.file_name)));
    debug!(dir = %dir.display(), count = entries.len(), "scanned data library");
    Ok(entries)
}

/// upload label taken from a file name: `mawar_2024..._x.json` -> `mawar`,
/// `melati-03_...` -> `melati`
pub fn upload_label(file_name: &str) -> String {
    file_name
        .split('_')
        .next()
        .unwrap_or_default()
        .split('-')
        .next()
        .unwrap_or_default()
        .to_string()
}

pub fn render_table(entries: &[LibraryEntry]) -> String {
    let width = entries
        .iter()
        .map(|e| e.file_name.chars().count())
        .max()
        .unwrap_or(0)
        .max("Filename".len());

    let mut out = format!(
        "{:<width$} | {:<19} | {:>10} | {:<7} | JSON\n",
        "Filename", "Last Modified", "Size", "Preview"
    );
    for e in entries {
        out.push_str(&format!(
            "{:<width$} | {:<19} | {:>7.1} KB | {:<7} | {}\n",
            e.file_name,
            e.modified.format("%Y-%m-%d %H:%M:%S"),
            e.size_kb(),
            if e.preview.is_some() { "yes" } else { "-" },
            if e.has_json { "yes" } else { "-" },
        ));
    }
    out
}
