//! Append-only JSON Lines store shared by concurrent producers.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::error::StoreError;

/// One JSON object per line, appended under a mutex.
///
/// Each [`append`](Self::append) holds the file lock for the whole
/// write-flush-sync sequence, so concurrent producers never interleave bytes.
/// A failed write truncates the file back to its previous length so no
/// partial line is left for the next append to run into. A partial line left
/// by a process that died mid-write is cut off when the file is reopened.
#[derive(Debug)]
pub struct IncrementalStore {
    path: PathBuf,
    file: Mutex<File>,
    appended: AtomicU64,
}

impl IncrementalStore {
    /// Opens (creating if needed) the file at `path` for appending. Missing
    /// parent directories are created, and an unterminated last line is
    /// truncated away so the next append starts on a line of its own.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Open`] if the directory or file cannot be created
    /// or repaired.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let open_err = |source| StoreError::Open {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(open_err)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(open_err)?;
        truncate_torn_tail(&file, &path).await.map_err(open_err)?;

        Ok(Self {
            path,
            file: Mutex::new(file),
            appended: AtomicU64::new(0),
        })
    }

    /// Serializes `record` as one line and appends it durably.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Serialize`] if the record cannot be encoded (nothing is written).
    /// - [`StoreError::Write`] if the write, flush or sync fails.
    pub async fn append<T: Serialize + ?Sized>(&self, record: &T) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        let len_before = file
            .metadata()
            .await
            .map_err(|source| self.write_err(source))?
            .len();

        if let Err(source) = write_line(&mut file, &line).await {
            if let Err(rollback) = file.set_len(len_before).await {
                tracing::error!(
                    path = %self.path.display(),
                    error = %rollback,
                    "store: failed to roll back partial append"
                );
            }
            return Err(self.write_err(source));
        }
        drop(file);

        self.appended.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Number of successful appends through this handle.
    #[must_use]
    pub fn appended(&self) -> u64 {
        self.appended.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_err(&self, source: std::io::Error) -> StoreError {
        StoreError::Write {
            path: self.path.clone(),
            source,
        }
    }
}

/// Cuts `file` back to just after its last `\n` if it does not end in one.
async fn truncate_torn_tail(file: &File, path: &Path) -> std::io::Result<()> {
    let len = file.metadata().await?.len();
    if len == 0 {
        return Ok(());
    }

    let mut last = [0_u8; 1];
    let mut reader = File::open(path).await?;
    reader.seek(SeekFrom::End(-1)).await?;
    reader.read_exact(&mut last).await?;
    if last[0] == b'\n' {
        return Ok(());
    }

    let contents = tokio::fs::read(path).await?;
    let keep = contents
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |i| i + 1);
    file.set_len(keep as u64).await?;
    tracing::warn!(
        path = %path.display(),
        dropped_bytes = contents.len() - keep,
        "store: truncated torn trailing line"
    );
    Ok(())
}

async fn write_line(file: &mut File, line: &[u8]) -> std::io::Result<()> {
    file.write_all(line).await?;
    file.flush().await?;
    file.sync_data().await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Row {
        writer: usize,
        seq: usize,
        payload: String,
    }

    async fn concurrent_appends(writers: usize, per_writer: usize) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("rows.jsonl");
        let store = Arc::new(IncrementalStore::open(&path).await.expect("open store"));

        let handles: Vec<_> = (0..writers)
            .map(|writer| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    for seq in 0..per_writer {
                        let row = Row {
                            writer,
                            seq,
                            payload: "x".repeat(512),
                        };
                        store.append(&row).await.expect("append");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.expect("writer task");
        }

        assert_eq!(store.appended(), (writers * per_writer) as u64);

        let contents = std::fs::read_to_string(&path).expect("read back");
        let rows: Vec<Row> = contents
            .lines()
            .map(|l| serde_json::from_str(l).expect("every line is a whole record"))
            .collect();
        assert_eq!(rows.len(), writers * per_writer);

        for writer in 0..writers {
            let seqs: Vec<usize> = rows
                .iter()
                .filter(|r| r.writer == writer)
                .map(|r| r.seq)
                .collect();
            let expected: Vec<usize> = (0..per_writer).collect();
            assert_eq!(seqs, expected, "writer {writer} records lost or reordered");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn single_writer_appends_every_record() {
        concurrent_appends(1, 40).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn five_writers_never_interleave() {
        concurrent_appends(5, 40).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn twenty_writers_never_interleave() {
        concurrent_appends(20, 20).await;
    }

    #[tokio::test]
    async fn reopening_appends_after_existing_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rows.jsonl");

        let first = IncrementalStore::open(&path).await.unwrap();
        first.append(&serde_json::json!({"n": 1})).await.unwrap();
        drop(first);

        let second = IncrementalStore::open(&path).await.unwrap();
        second.append(&serde_json::json!({"n": 2})).await.unwrap();
        assert_eq!(second.appended(), 1);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "{\"n\":1}\n{\"n\":2}\n");
    }

    #[tokio::test]
    async fn reopening_drops_a_torn_trailing_line() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rows.jsonl");
        std::fs::write(&path, b"{\"n\":1}\n{\"n\":").unwrap();

        let store = IncrementalStore::open(&path).await.unwrap();
        store.append(&serde_json::json!({"n": 2})).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "{\"n\":1}\n{\"n\":2}\n");
        let values: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).expect("every line is a whole record"))
            .collect();
        assert_eq!(values.len(), 2);
    }

    #[tokio::test]
    async fn reopening_a_file_without_any_newline_starts_fresh() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rows.jsonl");
        std::fs::write(&path, b"{\"n\":").unwrap();

        let store = IncrementalStore::open(&path).await.unwrap();
        store.append(&serde_json::json!({"n": 1})).await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"n\":1}\n");
    }

    #[tokio::test]
    async fn open_fails_when_parent_is_a_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a dir").unwrap();

        let err = IncrementalStore::open(blocker.join("rows.jsonl"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Open { .. }));
    }
}
