use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ByteOrder};
use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::common::{BlockID, DbError, Result, TransactionID, LSN};
use crate::log_mod::{LogRecord, LogRecordType};

const LEN_PREFIX: usize = std::mem::size_of::<i32>();

struct LogFile {
    file: File,
    // Offset the next record will be written at
    end: u64,
    // Everything before this offset is known to be on stable storage
    durable_end: u64,
    record_counts: HashMap<LogRecordType, u64>,
}

/// Append-only write-ahead log. Every record is framed as
/// `[i32 length][body]` and identified by the offset of its frame.
pub struct LogManager {
    path: PathBuf,
    inner: Mutex<LogFile>,
}

impl LogManager {
    /// Opens (or creates) the log. A torn record left by a crash in the middle
    /// of an append is cut off so that new records follow the valid prefix.
    pub fn new(log_file_path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(log_file_path)?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        let (records, valid_end) = scan_frames(&bytes, 0);

        if valid_end < bytes.len() as u64 {
            warn!(
                "log {} has {} bytes of torn tail after offset {}, truncating",
                log_file_path.display(),
                bytes.len() as u64 - valid_end,
                valid_end
            );
            file.set_len(valid_end)?;
            file.sync_all()?;
        }
        info!(
            "opened log {} with {} records ({} bytes)",
            log_file_path.display(),
            records.len(),
            valid_end
        );

        Ok(Self {
            path: log_file_path.to_path_buf(),
            inner: Mutex::new(LogFile {
                file,
                end: valid_end,
                durable_end: valid_end,
                record_counts: HashMap::new(),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record and returns its LSN. Appends are serialized; the
    /// record is not durable until `flush` covers it.
    pub fn append(&self, record: &LogRecord) -> Result<LSN> {
        let body = record.encode();
        let mut frame = vec![0u8; LEN_PREFIX];
        BigEndian::write_i32(&mut frame, body.len() as i32);
        frame.extend_from_slice(&body);

        let mut inner = self.inner.lock();
        let lsn = LSN(inner.end);
        inner.file.seek(SeekFrom::Start(lsn.0))?;
        inner.file.write_all(&frame)?;
        inner.end += frame.len() as u64;
        *inner.record_counts.entry(record.record_type()).or_insert(0) += 1;

        debug!("appended {:?} at {}", record.record_type(), lsn);
        Ok(lsn)
    }

    /// Forces the log to stable storage so that the record at `upto` is durable.
    /// Skips the sync when an earlier flush already covered it; otherwise the
    /// whole file is forced.
    pub fn flush(&self, upto: LSN) -> Result<()> {
        let mut inner = self.inner.lock();
        if upto.0 < inner.durable_end {
            return Ok(());
        }
        inner.file.sync_all()?;
        inner.durable_end = inner.end;
        Ok(())
    }

    /// Forces everything appended so far.
    pub fn flush_all(&self) -> Result<()> {
        let end = self.end_lsn();
        self.flush(end)
    }

    /// Offset the next record will get.
    pub fn end_lsn(&self) -> LSN {
        LSN(self.inner.lock().end)
    }

    pub fn durable_lsn(&self) -> LSN {
        LSN(self.inner.lock().durable_end)
    }

    /// Every valid record in append order.
    pub fn read_all(&self) -> Result<Vec<(LSN, LogRecord)>> {
        self.read_from(LSN(0))
    }

    /// Every valid record at or after `from`, which must be a record boundary.
    pub fn read_from(&self, from: LSN) -> Result<Vec<(LSN, LogRecord)>> {
        let bytes = {
            let mut inner = self.inner.lock();
            if from.0 > inner.end {
                return Err(DbError::Other(format!(
                    "{} is past the end of the log ({})",
                    from, inner.end
                )));
            }
            let mut bytes = vec![0u8; (inner.end - from.0) as usize];
            inner.file.seek(SeekFrom::Start(from.0))?;
            inner.file.read_exact(&mut bytes)?;
            bytes
        };

        let (records, _) = scan_frames(&bytes, from.0);
        Ok(records)
    }

    pub fn log_txn_begin(&self, tx: TransactionID) -> Result<LSN> {
        self.append(&LogRecord::Start { tx })
    }

    pub fn log_commit(&self, tx: TransactionID) -> Result<LSN> {
        self.append(&LogRecord::Commit { tx })
    }

    pub fn log_abort(&self, tx: TransactionID) -> Result<LSN> {
        self.append(&LogRecord::Rollback { tx })
    }

    pub fn log_set_int(
        &self,
        tx: TransactionID,
        block: &BlockID,
        offset: usize,
        old_value: i32,
    ) -> Result<LSN> {
        self.append(&LogRecord::SetInt {
            tx,
            block: block.clone(),
            offset: offset as u32,
            old_value,
        })
    }

    pub fn log_set_string(
        &self,
        tx: TransactionID,
        block: &BlockID,
        offset: usize,
        old_value: &str,
    ) -> Result<LSN> {
        self.append(&LogRecord::SetString {
            tx,
            block: block.clone(),
            offset: offset as u32,
            old_value: old_value.to_string(),
        })
    }

    pub fn log_checkpoint(&self, active: &[TransactionID]) -> Result<LSN> {
        self.append(&LogRecord::Checkpoint {
            active: active.to_vec(),
        })
    }

    pub fn get_total_log_records(&self) -> u64 {
        self.inner.lock().record_counts.values().sum()
    }

    /// Records of one type appended through this instance.
    pub fn get_total_log_records_of_type(&self, record_type: LogRecordType) -> u64 {
        *self
            .inner
            .lock()
            .record_counts
            .get(&record_type)
            .unwrap_or(&0)
    }
}

/// Splits raw log bytes into records. Stops at the first frame that is short
/// or does not decode; everything before it is the valid log.
fn scan_frames(bytes: &[u8], base: u64) -> (Vec<(LSN, LogRecord)>, u64) {
    let mut records = Vec::new();
    let mut pos = 0usize;

    while pos < bytes.len() {
        let lsn = LSN(base + pos as u64);
        let remaining = bytes.len() - pos;
        if remaining < LEN_PREFIX {
            warn!("torn length prefix at {}, ignoring rest of log", lsn);
            break;
        }

        let len = BigEndian::read_i32(&bytes[pos..pos + LEN_PREFIX]);
        if len <= 0 || len as usize > remaining - LEN_PREFIX {
            warn!("torn record at {} (length {}), ignoring rest of log", lsn, len);
            break;
        }

        let body = &bytes[pos + LEN_PREFIX..pos + LEN_PREFIX + len as usize];
        match LogRecord::decode(body, lsn) {
            Ok(record) => records.push((lsn, record)),
            Err(e) => {
                warn!("{}, ignoring rest of log", e);
                break;
            }
        }
        pos += LEN_PREFIX + len as usize;
    }

    (records, base + pos as u64)
}
