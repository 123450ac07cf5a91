//! Append-only contact ledger
//!
//! Every send attempt, successful or not, is recorded as one JSON object per
//! line in `sent_log.jsonl`. The ledger doubles as the dedup source: an
//! in-memory index of successfully contacted targets is rebuilt from the file
//! on open and consulted before every send.
//!
//! A single writer guards the file. The record is flushed to disk before the
//! index is updated, so a crash can lose at most the in-flight line and never
//! leaves the index claiming a contact the file does not show.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{LedgerError, Result};
use crate::types::{SendRecord, Target};

/// Totals accumulated from the ledger file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerTotals {
    pub sent: usize,
    pub failed: usize,
}

struct LedgerInner {
    writer: BufWriter<File>,
    /// Lowercased handles of successfully contacted targets
    contacted: HashSet<String>,
    totals: LedgerTotals,
}

/// Shared handle to the contact ledger
#[derive(Clone)]
pub struct ContactLedger {
    path: PathBuf,
    inner: Arc<Mutex<LedgerInner>>,
}

impl ContactLedger {
    /// Open the ledger at `path`, creating the file and parent directories
    /// if needed, and rebuild the contacted index from existing lines.
    ///
    /// Malformed lines are skipped with a warning rather than aborting;
    /// a partially written trailing line must not block startup.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(LedgerError::Io)?;
        }

        let mut contacted = HashSet::new();
        let mut totals = LedgerTotals::default();
        if path.exists() {
            let reader = BufReader::new(File::open(&path).map_err(LedgerError::Io)?);
            for (lineno, line) in reader.lines().enumerate() {
                let line = line.map_err(LedgerError::Io)?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<SendRecord>(&line) {
                    Ok(record) => {
                        if record.ok {
                            totals.sent += 1;
                            contacted.insert(record.target.to_lowercase());
                        } else {
                            totals.failed += 1;
                        }
                    }
                    Err(e) => {
                        warn!(line = lineno + 1, "Skipping malformed ledger line: {}", e);
                    }
                }
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(LedgerError::Io)?;

        debug!(
            path = %path.display(),
            contacted = contacted.len(),
            "Opened contact ledger"
        );

        Ok(ContactLedger {
            path,
            inner: Arc::new(Mutex::new(LedgerInner {
                writer: BufWriter::new(file),
                contacted,
                totals,
            })),
        })
    }

    /// Append a record and flush it before updating the contacted index
    pub async fn record(&self, record: &SendRecord) -> Result<()> {
        let mut inner = self.inner.lock().await;

        let line = serde_json::to_string(record).map_err(LedgerError::Encode)?;
        inner.writer.write_all(line.as_bytes()).map_err(LedgerError::Io)?;
        inner.writer.write_all(b"\n").map_err(LedgerError::Io)?;
        inner.writer.flush().map_err(LedgerError::Io)?;

        if record.ok {
            inner.totals.sent += 1;
            inner.contacted.insert(record.target.to_lowercase());
        } else {
            inner.totals.failed += 1;
        }

        Ok(())
    }

    /// Whether a target was already successfully contacted by any account
    pub async fn already_contacted(&self, target: &Target) -> bool {
        let inner = self.inner.lock().await;
        inner.contacted.contains(&target.dedup_key())
    }

    /// Drop already-contacted targets from a queue, preserving order
    pub async fn filter_pending(&self, targets: Vec<Target>) -> Vec<Target> {
        let inner = self.inner.lock().await;
        targets
            .into_iter()
            .filter(|t| !inner.contacted.contains(&t.dedup_key()))
            .collect()
    }

    /// Lifetime ok/failed counts
    pub async fn totals(&self) -> LedgerTotals {
        self.inner.lock().await.totals
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_and_dedup() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let ledger = ContactLedger::open(temp_dir.path().join("sent_log.jsonl")).unwrap();

        let target = Target("bob".to_string());
        assert!(!ledger.already_contacted(&target).await);

        ledger
            .record(&SendRecord::success("ana", &target))
            .await
            .unwrap();

        assert!(ledger.already_contacted(&target).await);
        // Case-insensitive match
        assert!(ledger.already_contacted(&Target("BOB".to_string())).await);
    }

    #[tokio::test]
    async fn test_failed_record_does_not_mark_contacted() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let ledger = ContactLedger::open(temp_dir.path().join("sent_log.jsonl")).unwrap();

        let target = Target("bob".to_string());
        ledger
            .record(&SendRecord::failure("ana", &target, "challenge_required"))
            .await
            .unwrap();

        assert!(!ledger.already_contacted(&target).await);
        let totals = ledger.totals().await;
        assert_eq!(totals.sent, 0);
        assert_eq!(totals.failed, 1);
    }

    #[tokio::test]
    async fn test_index_rebuilt_on_reopen() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("sent_log.jsonl");

        {
            let ledger = ContactLedger::open(&path).unwrap();
            ledger
                .record(&SendRecord::success("ana", &Target("bob".to_string())))
                .await
                .unwrap();
            ledger
                .record(&SendRecord::failure(
                    "ana",
                    &Target("carla".to_string()),
                    "network",
                ))
                .await
                .unwrap();
        }

        let ledger = ContactLedger::open(&path).unwrap();
        assert!(ledger.already_contacted(&Target("bob".to_string())).await);
        assert!(!ledger.already_contacted(&Target("carla".to_string())).await);

        let totals = ledger.totals().await;
        assert_eq!(totals.sent, 1);
        assert_eq!(totals.failed, 1);
    }

    #[tokio::test]
    async fn test_malformed_line_is_skipped() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("sent_log.jsonl");

        {
            let ledger = ContactLedger::open(&path).unwrap();
            ledger
                .record(&SendRecord::success("ana", &Target("bob".to_string())))
                .await
                .unwrap();
        }
        // Simulate a crash mid-write
        {
            use std::io::Write;
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(b"{\"ts\":\"2026-01-01T").unwrap();
        }

        let ledger = ContactLedger::open(&path).unwrap();
        assert!(ledger.already_contacted(&Target("bob".to_string())).await);
        assert_eq!(ledger.totals().await.sent, 1);
    }

    #[tokio::test]
    async fn test_filter_pending_preserves_order() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let ledger = ContactLedger::open(temp_dir.path().join("sent_log.jsonl")).unwrap();

        ledger
            .record(&SendRecord::success("ana", &Target("two".to_string())))
            .await
            .unwrap();

        let queue = vec![
            Target("one".to_string()),
            Target("two".to_string()),
            Target("three".to_string()),
        ];
        let pending = ledger.filter_pending(queue).await;
        assert_eq!(
            pending,
            vec![Target("one".to_string()), Target("three".to_string())]
        );
    }

    #[tokio::test]
    async fn test_records_visible_across_clones() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let ledger = ContactLedger::open(temp_dir.path().join("sent_log.jsonl")).unwrap();
        let other = ledger.clone();

        ledger
            .record(&SendRecord::success("ana", &Target("bob".to_string())))
            .await
            .unwrap();

        assert!(other.already_contacted(&Target("bob".to_string())).await);
    }

    #[tokio::test]
    async fn test_creates_parent_directories() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("dir").join("sent_log.jsonl");
        let ledger = ContactLedger::open(&path).unwrap();
        ledger
            .record(&SendRecord::success("ana", &Target("bob".to_string())))
            .await
            .unwrap();
        assert!(path.exists());
    }
}
