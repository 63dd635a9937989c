// log.rs — Append-only, hash-chained JSONL audit log.
//
// One JSON object per line, so the file can be followed with `tail -f` and
// filtered with `jq` while the pipeline is running.
//
// Each record's `previous_hash` is the SHA-256 of the raw previous line.
// Inserting, deleting, or editing any line breaks the chain at that point,
// and `verify_chain` reports the first line where the link no longer holds.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::AuditError;
use crate::event::AuditEvent;

/// An append-only audit log backed by a JSONL file.
///
/// Writes go through a `BufWriter` and are flushed after every record, so a
/// crash loses at most the record being written.
pub struct AuditLog {
    writer: BufWriter<File>,
    path: PathBuf,
    /// Hash of the last line written; becomes the next record's `previous_hash`.
    last_hash: Option<String>,
}

impl AuditLog {
    /// Open (or create) the log at `path`.
    ///
    /// When the file already has records, the hash of its last line becomes
    /// the chain head, so records appended by this process link onto what an
    /// earlier process wrote.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();

        // Make sure the parent directory exists (`.waypoint/` on first run).
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| AuditError::OpenFailed {
                path: path.clone(),
                source,
            })?;
        }

        // Recover the chain head from any existing content.
        let last_hash = if path.exists() {
            Self::read_last_hash(&path)?
        } else {
            None
        };

        // Append mode: existing records are never rewritten.
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| AuditError::OpenFailed {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            writer: BufWriter::new(file),
            path,
            last_hash,
        })
    }

    /// Append a record.
    ///
    /// Sets the record's `previous_hash` to the current chain head, writes it
    /// as a single line, and flushes. The event is taken by `&mut` so the
    /// caller can see the link that was written.
    pub fn append(&mut self, event: &mut AuditEvent) -> Result<(), AuditError> {
        // Link onto the previous record.
        event.previous_hash = self.last_hash.clone();

        // Compact JSON: one record per line.
        let json = serde_json::to_string(event)?;

        // The hash of exactly these bytes is the next record's link.
        self.last_hash = Some(line_hash(&json));

        writeln!(self.writer, "{}", json)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Read every record, oldest first.
    ///
    /// Blank lines are skipped; a line that does not parse is an error, since
    /// the log is never expected to hold partial records.
    pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<AuditEvent>, AuditError> {
        let mut events = Vec::new();
        for line in Self::lines(path.as_ref())? {
            events.push(serde_json::from_str(&line)?);
        }
        Ok(events)
    }

    /// Read the newest `n` records, oldest first.
    pub fn tail(path: impl AsRef<Path>, n: usize) -> Result<Vec<AuditEvent>, AuditError> {
        let mut events = Self::read_all(path)?;
        let start = events.len().saturating_sub(n);
        Ok(events.split_off(start))
    }

    /// Verify the hash chain.
    ///
    /// Walks the file from the top, checking each record's `previous_hash`
    /// against the hash of the line before it. Returns the number of records
    /// checked, or `IntegrityViolation` naming the first broken line.
    pub fn verify_chain(path: impl AsRef<Path>) -> Result<usize, AuditError> {
        let mut previous_hash: Option<String> = None;
        let mut count = 0;

        let file = File::open(path.as_ref()).map_err(|source| AuditError::OpenFailed {
            path: path.as_ref().to_path_buf(),
            source,
        })?;
        for (line_num, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let event: AuditEvent = serde_json::from_str(&line)?;

            // The first record has no predecessor; every later one must
            // point at the line just read.
            if event.previous_hash != previous_hash {
                return Err(AuditError::IntegrityViolation {
                    line: line_num + 1,
                    expected: previous_hash.unwrap_or_else(|| "None".to_string()),
                    actual: event.previous_hash.unwrap_or_else(|| "None".to_string()),
                });
            }
            // Hash the raw line, not a re-serialization, so field order is preserved.
            previous_hash = Some(line_hash(&line));
            count += 1;
        }

        Ok(count)
    }

    /// The file this log appends to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Non-blank lines of the file, in order.
    fn lines(path: &Path) -> Result<Vec<String>, AuditError> {
        let file = File::open(path).map_err(|source| AuditError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let mut out = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if !line.trim().is_empty() {
                out.push(line);
            }
        }
        Ok(out)
    }

    /// Hash of the last record, or `None` for an empty file.
    fn read_last_hash(path: &Path) -> Result<Option<String>, AuditError> {
        Ok(Self::lines(path)?.last().map(|line| line_hash(line)))
    }
}

/// Lowercase hex SHA-256 of one log line.
fn line_hash(line: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(line.as_bytes());
    format!("{:x}", hasher.finalize())
}
