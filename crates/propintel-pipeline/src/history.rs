//! Bounded in-memory run history, mirrored to an append-only log.

use std::collections::VecDeque;
use std::path::Path;

use propintel_scraper::IncrementalStore;

use crate::state::JobRunRecord;

/// Most recent terminal runs, newest first.
#[derive(Debug)]
pub struct RunHistory {
    recent: VecDeque<JobRunRecord>,
    limit: usize,
    log: Option<IncrementalStore>,
}

impl RunHistory {
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            recent: VecDeque::with_capacity(limit),
            limit: limit.max(1),
            log: None,
        }
    }

    /// Also appends every recorded run to `log`.
    #[must_use]
    pub fn with_log(mut self, log: IncrementalStore) -> Self {
        self.log = Some(log);
        self
    }

    /// Pre-fills the history with runs from a previous process, oldest first.
    pub fn seed(&mut self, runs: impl IntoIterator<Item = JobRunRecord>) {
        for run in runs {
            self.push(run);
        }
    }

    /// Records a terminal run. A log write failure is logged and otherwise
    /// ignored; the in-memory history is authoritative for this process.
    pub async fn record(&mut self, run: JobRunRecord) {
        if let Some(log) = &self.log {
            if let Err(e) = log.append(&run).await {
                tracing::warn!(run_id = %run.run_id, error = %e, "pipeline: failed to append run log");
            }
        }
        self.push(run);
    }

    fn push(&mut self, run: JobRunRecord) {
        self.recent.push_front(run);
        self.recent.truncate(self.limit);
    }

    #[must_use]
    pub fn last(&self) -> Option<&JobRunRecord> {
        self.recent.front()
    }

    /// Up to `limit` runs, newest first.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<JobRunRecord> {
        self.recent.iter().take(limit).cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.recent.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.recent.is_empty()
    }
}

/// Reads the last `limit` runs from a run log, oldest first. Unreadable
/// lines are skipped; a missing log is an empty history.
#[must_use]
pub fn read_recent_runs(path: &Path, limit: usize) -> Vec<JobRunRecord> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "pipeline: could not read run log");
            return Vec::new();
        }
    };

    let runs: Vec<JobRunRecord> = contents
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect();
    let skip = runs.len().saturating_sub(limit);
    runs.into_iter().skip(skip).collect()
}
