//! File-backed bucket store
//!
//! One append-only log per bucket directory. Flushes append and fsync;
//! compaction rewrites the live state into a fresh log and renames it over
//! the old one, so a failed compaction leaves the previous log untouched.
//!
//! The writer tracks the length of the log up to its last good record. A
//! failed append is cut back to that length, and any bytes found past it are
//! cut before the next append, so a record that follows a torn one is never
//! acknowledged.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::{BucketError, Result};

use super::record::{encode_record, Record, RecordReader, StoredBucket};
use super::BucketStore;

/// Result of scanning a log file
struct Scan {
    bucket: StoredBucket,
    last_lsn: u64,
    valid_len: u64,
    torn: Option<BucketError>,
}

struct LogWriter {
    file: File,
    next_lsn: u64,
    /// Bytes of the log covered by acknowledged records
    len: u64,
}

impl LogWriter {
    /// Cut anything past the last acknowledged record
    fn discard_unacknowledged(&mut self, path: &Path) -> Result<()> {
        let actual = self.file.metadata()?.len();
        if actual != self.len {
            tracing::warn!(
                path = %path.display(),
                expected = self.len,
                actual,
                "bucket log has unacknowledged bytes, truncating"
            );
            self.file.set_len(self.len)?;
        }
        Ok(())
    }

    /// Append `buf` and sync, or leave the log exactly as it was
    fn write_frames(&mut self, path: &Path, buf: &[u8]) -> Result<()> {
        self.discard_unacknowledged(path)?;

        let written = self
            .file
            .write_all(buf)
            .and_then(|()| self.file.sync_data());
        if let Err(e) = written {
            if let Err(trunc) = self.file.set_len(self.len) {
                tracing::warn!(
                    path = %path.display(),
                    "failed to roll back partial append: {}",
                    trunc
                );
            }
            return Err(e.into());
        }
        self.len += buf.len() as u64;
        Ok(())
    }
}

/// Append-log store rooted at a bucket directory
pub struct FileStore {
    dir: PathBuf,
    path: PathBuf,
    writer: Mutex<LogWriter>,
}

impl FileStore {
    pub const LOG_FILENAME: &'static str = "bucket.log";
    const COMPACT_FILENAME: &'static str = "bucket.log.compact";

    /// Open or create the store in `dir`
    ///
    /// A torn or corrupt tail left by a crash is cut off so later appends
    /// start from the last good record.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(Self::LOG_FILENAME);

        let mut next_lsn = 1;
        let mut len = 0;
        if path.exists() {
            let scan = Self::scan(&path)?;
            if let Some(err) = scan.torn {
                tracing::warn!(
                    path = %path.display(),
                    valid_len = scan.valid_len,
                    "truncating bucket log tail: {}",
                    err
                );
                let file = OpenOptions::new().write(true).open(&path)?;
                file.set_len(scan.valid_len)?;
                file.sync_all()?;
            }
            next_lsn = scan.last_lsn + 1;
            len = scan.valid_len;
        }

        let file = Self::open_append(&path)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            path,
            writer: Mutex::new(LogWriter {
                file,
                next_lsn,
                len,
            }),
        })
    }

    /// Size of the log file in bytes
    pub fn log_size(&self) -> Result<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }

    pub fn log_path(&self) -> &Path {
        &self.path
    }

    fn open_append(path: &Path) -> Result<File> {
        Ok(OpenOptions::new().create(true).append(true).open(path)?)
    }

    fn scan(path: &Path) -> Result<Scan> {
        let file = File::open(path)?;
        let mut reader = RecordReader::new(BufReader::new(file));
        let mut bucket = StoredBucket::default();
        let mut last_lsn = 0;

        let torn = loop {
            match reader.next_record() {
                Ok(Some((lsn, record))) => {
                    last_lsn = lsn;
                    bucket.apply(record);
                }
                Ok(None) => break None,
                Err(e @ BucketError::Corruption(_)) => break Some(e),
                Err(e) => return Err(e),
            }
        };

        Ok(Scan {
            bucket,
            last_lsn,
            valid_len: reader.valid_len(),
            torn,
        })
    }

    /// Write the compacted log to `tmp` and rename it into place
    ///
    /// Returns the new log length. Nothing is renamed unless the temp file was
    /// fully written and synced.
    fn write_compacted(&self, tmp: &Path, records: &[Record]) -> Result<u64> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(tmp)?;
        let mut buf = Vec::new();
        for (i, record) in records.iter().enumerate() {
            buf.extend_from_slice(&encode_record(i as u64 + 1, record)?);
        }
        file.write_all(&buf)?;
        file.sync_all()?;
        fs::rename(tmp, &self.path)?;
        Ok(buf.len() as u64)
    }
}

impl BucketStore for FileStore {
    fn load(&self) -> Result<StoredBucket> {
        let mut writer = self.writer.lock();
        writer.discard_unacknowledged(&self.path)?;
        let scan = Self::scan(&self.path)?;
        if let Some(err) = scan.torn {
            return Err(err);
        }
        Ok(scan.bucket)
    }

    fn append(&self, records: &[Record]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut writer = self.writer.lock();
        let mut buf = Vec::new();
        for (i, record) in records.iter().enumerate() {
            buf.extend_from_slice(&encode_record(writer.next_lsn + i as u64, record)?);
        }
        writer.write_frames(&self.path, &buf)?;
        writer.next_lsn += records.len() as u64;
        Ok(())
    }

    fn compact(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.discard_unacknowledged(&self.path)?;
        let before = fs::metadata(&self.path)?.len();

        let scan = Self::scan(&self.path)?;
        if let Some(err) = scan.torn {
            return Err(err);
        }
        let records = scan.bucket.to_records();

        let tmp = self.dir.join(Self::COMPACT_FILENAME);
        let len = match self.write_compacted(&tmp, &records) {
            Ok(len) => len,
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                return Err(e);
            }
        };

        // The old inode is gone; point the writer at the new log before
        // anything else can fail
        writer.file = Self::open_append(&self.path)?;
        writer.next_lsn = records.len() as u64 + 1;
        writer.len = len;
        File::open(&self.dir)?.sync_all()?;

        let after = fs::metadata(&self.path)?.len();
        tracing::info!(
            path = %self.path.display(),
            before,
            after,
            records = records.len(),
            "bucket log compacted"
        );
        Ok(())
    }

    fn location(&self) -> Option<&Path> {
        Some(&self.dir)
    }
}
