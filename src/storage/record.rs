//! Bucket log records
//!
//! Defines the records appended to a bucket log and their framing.

use std::collections::BTreeMap;
use std::io::{ErrorKind, Read};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::bucket::BucketSettings;
use crate::error::{BucketError, Result};
use crate::partition::{Item, PartitionState};

/// Frame header: LSN (8) + CRC (4) + Len (4)
pub const HEADER_SIZE: usize = 16;

/// Largest payload accepted when reading a frame (64 MB)
pub const MAX_RECORD_SIZE: u32 = 64 * 1024 * 1024;

/// A single change to a bucket's persisted state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Record {
    Settings(BucketSettings),
    PartitionState {
        partition: u16,
        state: PartitionState,
    },
    Item {
        partition: u16,
        key: Vec<u8>,
        value: Vec<u8>,
        flags: u32,
        expiration: u32,
        cas: u64,
    },
    Delete {
        partition: u16,
        key: Vec<u8>,
    },
    DropPartition {
        partition: u16,
    },
}

impl Record {
    pub fn item(partition: u16, item: &Item) -> Self {
        Record::Item {
            partition,
            key: item.key.to_vec(),
            value: item.value.to_vec(),
            flags: item.flags,
            expiration: item.expiration,
            cas: item.cas,
        }
    }
}

// =============================================================================
// Framing
// =============================================================================

/// Encode a record as `[LSN][CRC32][Len][bincode payload]`
pub fn encode_record(lsn: u64, record: &Record) -> Result<Vec<u8>> {
    let payload = bincode::serialize(record)?;
    let crc = crc32fast::hash(&payload);

    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&lsn.to_le_bytes());
    frame.extend_from_slice(&crc.to_le_bytes());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Sequential reader over framed records
///
/// A torn or corrupt frame yields `BucketError::Corruption`; `valid_len()`
/// then tells how many bytes of the log are known good.
pub struct RecordReader<R: Read> {
    reader: R,
    valid_len: u64,
}

impl<R: Read> RecordReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            valid_len: 0,
        }
    }

    /// Read the next record, `Ok(None)` on a clean end of log
    pub fn next_record(&mut self) -> Result<Option<(u64, Record)>> {
        let mut header = [0u8; HEADER_SIZE];
        let got = read_full(&mut self.reader, &mut header)?;
        if got == 0 {
            return Ok(None);
        }
        if got < HEADER_SIZE {
            return Err(BucketError::Corruption(format!(
                "torn header at offset {} ({} of {} bytes)",
                self.valid_len, got, HEADER_SIZE
            )));
        }

        let lsn = u64::from_le_bytes([
            header[0], header[1], header[2], header[3], header[4], header[5], header[6], header[7],
        ]);
        let crc = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
        let len = u32::from_le_bytes([header[12], header[13], header[14], header[15]]);

        if len > MAX_RECORD_SIZE {
            return Err(BucketError::Corruption(format!(
                "record at offset {} claims {} bytes (max {})",
                self.valid_len, len, MAX_RECORD_SIZE
            )));
        }

        let mut payload = vec![0u8; len as usize];
        let got = read_full(&mut self.reader, &mut payload)?;
        if got < payload.len() {
            return Err(BucketError::Corruption(format!(
                "torn payload at offset {} ({} of {} bytes)",
                self.valid_len, got, len
            )));
        }
        if crc32fast::hash(&payload) != crc {
            return Err(BucketError::Corruption(format!(
                "crc mismatch for lsn {} at offset {}",
                lsn, self.valid_len
            )));
        }

        let record = bincode::deserialize(&payload)?;
        self.valid_len += (HEADER_SIZE + payload.len()) as u64;
        Ok(Some((lsn, record)))
    }

    /// Bytes consumed by fully valid records so far
    pub fn valid_len(&self) -> u64 {
        self.valid_len
    }
}

/// Fill `buf` as far as the reader allows, returning the byte count
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

// =============================================================================
// Replayed State
// =============================================================================

/// A partition as reconstructed from the log
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StoredPartition {
    pub state: PartitionState,
    pub items: BTreeMap<Bytes, Item>,
}

/// A bucket as reconstructed from the log
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StoredBucket {
    pub settings: Option<BucketSettings>,
    pub partitions: BTreeMap<u16, StoredPartition>,
}

impl StoredBucket {
    /// Fold one record into the state
    pub fn apply(&mut self, record: Record) {
        match record {
            Record::Settings(settings) => self.settings = Some(settings),
            Record::PartitionState { partition, state } => {
                self.partitions.entry(partition).or_default().state = state;
            }
            Record::Item {
                partition,
                key,
                value,
                flags,
                expiration,
                cas,
            } => {
                let item = Item {
                    key: Bytes::from(key),
                    value: Bytes::from(value),
                    flags,
                    expiration,
                    cas,
                };
                self.partitions
                    .entry(partition)
                    .or_default()
                    .items
                    .insert(item.key.clone(), item);
            }
            Record::Delete { partition, key } => {
                if let Some(p) = self.partitions.get_mut(&partition) {
                    p.items.remove(key.as_slice());
                }
            }
            Record::DropPartition { partition } => {
                self.partitions.remove(&partition);
            }
        }
    }

    /// Minimal record sequence that rebuilds this state
    pub fn to_records(&self) -> Vec<Record> {
        let mut records = Vec::new();
        if let Some(settings) = &self.settings {
            records.push(Record::Settings(settings.clone()));
        }
        for (&partition, stored) in &self.partitions {
            records.push(Record::PartitionState {
                partition,
                state: stored.state,
            });
            records.extend(stored.items.values().map(|item| Record::item(partition, item)));
        }
        records
    }

    pub fn is_empty(&self) -> bool {
        self.settings.is_none() && self.partitions.is_empty()
    }
}
