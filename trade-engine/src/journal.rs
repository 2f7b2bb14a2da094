//! Trade journal
//!
//! Durable audit trail of every committed trade snapshot:
//! - JSON lines, append-only
//! - SHA-256 hash chain for tamper detection
//! - Replay to the latest snapshot per trade

use crate::{types::Trade, Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use uuid::Uuid;

/// One journal line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Position in the journal, starting at 1
    pub seq: u64,

    /// Trade as committed
    pub trade: Trade,

    /// Commit time
    pub recorded_at: DateTime<Utc>,

    /// Hash of the previous entry (empty for the first)
    pub previous_hash: String,

    /// Hash of this entry
    pub hash: String,
}

impl JournalEntry {
    fn new(seq: u64, trade: Trade, recorded_at: DateTime<Utc>, previous_hash: String) -> Result<Self> {
        let mut entry = Self {
            seq,
            trade,
            recorded_at,
            previous_hash,
            hash: String::new(),
        };
        entry.hash = entry.compute_hash()?;
        Ok(entry)
    }

    fn compute_hash(&self) -> Result<String> {
        let trade = serde_json::to_string(&self.trade)
            .map_err(|e| Error::Journal(format!("serialize trade: {}", e)))?;

        let mut hasher = Sha256::new();
        hasher.update(self.seq.to_be_bytes());
        hasher.update(trade.as_bytes());
        hasher.update(self.recorded_at.to_rfc3339().as_bytes());
        hasher.update(self.previous_hash.as_bytes());

        Ok(hex::encode(hasher.finalize()))
    }

    /// Verify entry hash
    pub fn verify_hash(&self) -> bool {
        self.compute_hash().map(|h| h == self.hash).unwrap_or(false)
    }
}

#[derive(Debug)]
struct JournalTail {
    file: File,
    seq: u64,
    last_hash: String,
}

/// Append-only, hash-chained trade journal
#[derive(Debug)]
pub struct TradeJournal {
    path: PathBuf,
    tail: Mutex<JournalTail>,
}

impl TradeJournal {
    /// Open or create a journal file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        Self::repair_tail(&path, &mut file)?;
        let (seq, last_hash) = match Self::read_entries(&path)?.pop() {
            Some(last) => (last.seq, last.hash),
            None => (0, String::new()),
        };

        tracing::info!(?path, entries = seq, "Opened trade journal");

        Ok(Self {
            path,
            tail: Mutex::new(JournalTail {
                file,
                seq,
                last_hash,
            }),
        })
    }

    /// Drop a torn final line left by an interrupted write
    fn repair_tail(path: &Path, file: &mut File) -> Result<()> {
        let bytes = std::fs::read(path)?;
        if bytes.last().map_or(true, |b| *b == b'\n') {
            return Ok(());
        }

        let keep = bytes
            .iter()
            .rposition(|b| *b == b'\n')
            .map_or(0, |pos| pos + 1);
        if serde_json::from_slice::<JournalEntry>(&bytes[keep..]).is_ok() {
            file.write_all(b"\n")?;
        } else {
            tracing::warn!(
                ?path,
                dropped_bytes = bytes.len() - keep,
                "Truncating torn journal line"
            );
            file.set_len(keep as u64)?;
        }
        Ok(())
    }

    fn read_entries(path: &Path) -> Result<Vec<JournalEntry>> {
        if !path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(path)?);
        let mut entries = Vec::new();
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: JournalEntry = serde_json::from_str(&line)
                .map_err(|e| Error::Journal(format!("line {}: {}", i + 1, e)))?;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Append a committed trade snapshot
    pub async fn append(&self, trade: &Trade, at: DateTime<Utc>) -> Result<JournalEntry> {
        let mut tail = self.tail.lock().await;

        let entry = JournalEntry::new(tail.seq + 1, trade.clone(), at, tail.last_hash.clone())?;

        let mut json = serde_json::to_string(&entry)
            .map_err(|e| Error::Journal(format!("serialize entry: {}", e)))?;
        json.push('\n');

        let offset = tail.file.metadata()?.len();
        let file = &mut tail.file;
        if let Err(e) = file.write_all(json.as_bytes()).and_then(|()| file.flush()) {
            // Cut any partial line so the next append starts clean
            if let Err(truncate) = file.set_len(offset) {
                tracing::error!(error = %truncate, "Failed to roll back journal write");
            }
            return Err(e.into());
        }

        tail.seq = entry.seq;
        tail.last_hash = entry.hash.clone();

        Ok(entry)
    }

    /// Verify the hash chain, returning the number of entries
    pub async fn verify_integrity(&self) -> Result<u64> {
        let _tail = self.tail.lock().await;

        let mut previous_hash = String::new();
        let mut count = 0;

        for entry in Self::read_entries(&self.path)? {
            if !entry.verify_hash() {
                return Err(Error::Journal(format!(
                    "entry hash mismatch at seq {}",
                    entry.seq
                )));
            }
            if entry.previous_hash != previous_hash {
                return Err(Error::Journal(format!(
                    "hash chain broken at seq {}",
                    entry.seq
                )));
            }
            previous_hash = entry.hash;
            count += 1;
        }

        Ok(count)
    }

    /// Latest journaled snapshot of every trade
    pub async fn latest_snapshots(&self) -> Result<HashMap<Uuid, Trade>> {
        let _tail = self.tail.lock().await;

        let mut trades = HashMap::new();
        for entry in Self::read_entries(&self.path)? {
            trades.insert(entry.trade.id, entry.trade);
        }
        Ok(trades)
    }

    /// Journal file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}
