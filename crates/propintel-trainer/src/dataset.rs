//! Reading the raw scraped dataset.
//!
//! Each scrape run writes one `listings-<UTC timestamp>.jsonl` file into the
//! data directory. The dataset is all of them, read in file-name (and so
//! chronological) order.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use propintel_core::ListingRecord;

use crate::error::DatasetError;

const FILE_PREFIX: &str = "listings-";
const FILE_SUFFIX: &str = ".jsonl";

/// File name for a scrape run started at `started_at`.
#[must_use]
pub fn listings_file_name(started_at: DateTime<Utc>) -> String {
    format!(
        "{FILE_PREFIX}{}{FILE_SUFFIX}",
        started_at.format("%Y%m%dT%H%M%SZ")
    )
}

/// Records read from the data directory, in insertion order.
#[derive(Debug, Default)]
pub struct LoadedDataset {
    pub records: Vec<ListingRecord>,
    pub files: usize,
    /// Lines that failed to decode: torn tails from a crashed writer, or
    /// anything else malformed.
    pub skipped_lines: usize,
}

/// Loads every listings file under `data_dir`.
///
/// A missing directory is an empty dataset.
///
/// # Errors
///
/// Returns [`DatasetError`] if the directory or a file in it cannot be read.
pub fn load_dataset(data_dir: &Path) -> Result<LoadedDataset, DatasetError> {
    let entries = match std::fs::read_dir(data_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %data_dir.display(), "dataset: data directory does not exist");
            return Ok(LoadedDataset::default());
        }
        Err(source) => {
            return Err(DatasetError::ReadDir {
                path: data_dir.to_path_buf(),
                source,
            })
        }
    };

    let mut files: Vec<PathBuf> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| DatasetError::ReadDir {
            path: data_dir.to_path_buf(),
            source,
        })?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(FILE_PREFIX) && name.ends_with(FILE_SUFFIX) {
            files.push(entry.path());
        }
    }
    files.sort();

    let mut dataset = LoadedDataset {
        files: files.len(),
        ..LoadedDataset::default()
    };
    for path in &files {
        read_file(path, &mut dataset)?;
    }

    tracing::info!(
        files = dataset.files,
        records = dataset.records.len(),
        skipped_lines = dataset.skipped_lines,
        "dataset: loaded"
    );
    Ok(dataset)
}

fn read_file(path: &Path, dataset: &mut LoadedDataset) -> Result<(), DatasetError> {
    let contents = std::fs::read_to_string(path).map_err(|source| DatasetError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    let has_trailing_newline = contents.ends_with('\n');
    let lines: Vec<&str> = contents.lines().collect();

    for (idx, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ListingRecord>(line) {
            Ok(record) => dataset.records.push(record),
            Err(e) => {
                dataset.skipped_lines += 1;
                let torn = idx + 1 == lines.len() && !has_trailing_newline;
                if torn {
                    tracing::warn!(path = %path.display(), "dataset: skipping torn trailing line");
                } else {
                    tracing::warn!(
                        path = %path.display(),
                        line = idx + 1,
                        error = %e,
                        "dataset: skipping malformed line"
                    );
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn line(url: &str) -> String {
        let record = ListingRecord {
            url: url.to_string(),
            city: "Pune".to_string(),
            location: Some("Baner".to_string()),
            property_type: None,
            bedrooms: Some(2),
            area_sqft: Some(1000.0),
            price_cr: Some(1.0),
            price_per_sqft: Some(10_000.0),
            title: None,
            scraped_at: Utc::now(),
        };
        serde_json::to_string(&record).unwrap()
    }

    #[test]
    fn file_name_sorts_chronologically() {
        let a = listings_file_name(Utc.with_ymd_and_hms(2026, 10, 11, 2, 0, 0).unwrap());
        let b = listings_file_name(Utc.with_ymd_and_hms(2026, 10, 18, 2, 0, 0).unwrap());
        assert_eq!(a, "listings-20261011T020000Z.jsonl");
        assert!(a < b);
    }

    #[test]
    fn loads_files_in_name_order_and_ignores_others() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("listings-20261018T020000Z.jsonl"),
            format!("{}\n", line("u3")),
        )
        .unwrap();
        std::fs::write(
            dir.path().join("listings-20261011T020000Z.jsonl"),
            format!("{}\n{}\n", line("u1"), line("u2")),
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignore me").unwrap();

        let dataset = load_dataset(dir.path()).unwrap();
        let urls: Vec<&str> = dataset.records.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec!["u1", "u2", "u3"]);
        assert_eq!(dataset.files, 2);
        assert_eq!(dataset.skipped_lines, 0);
    }

    #[test]
    fn torn_trailing_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let whole = line("u1");
        let torn = &line("u2")[..20];
        std::fs::write(
            dir.path().join("listings-20261011T020000Z.jsonl"),
            format!("{whole}\n{torn}"),
        )
        .unwrap();

        let dataset = load_dataset(dir.path()).unwrap();
        assert_eq!(dataset.records.len(), 1);
        assert_eq!(dataset.skipped_lines, 1);
    }

    #[test]
    fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = load_dataset(&dir.path().join("absent")).unwrap();
        assert!(dataset.records.is_empty());
        assert_eq!(dataset.files, 0);
    }
}
