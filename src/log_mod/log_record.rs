use std::convert::TryFrom;
use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::common::{BlockID, DbError, Result, TransactionID, LSN};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogRecordType {
    Start = 1,
    Commit = 2,
    Rollback = 3,
    SetInt = 4,
    SetString = 5,
    Checkpoint = 6,
}

impl TryFrom<i32> for LogRecordType {
    type Error = String;

    fn try_from(value: i32) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(LogRecordType::Start),
            2 => Ok(LogRecordType::Commit),
            3 => Ok(LogRecordType::Rollback),
            4 => Ok(LogRecordType::SetInt),
            5 => Ok(LogRecordType::SetString),
            6 => Ok(LogRecordType::Checkpoint),
            _ => Err(format!("unknown log record type {}", value)),
        }
    }
}

/// One write-ahead log record. Updates carry the value that was overwritten,
/// never the new one: the log is only ever used to undo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    Start {
        tx: TransactionID,
    },
    Commit {
        tx: TransactionID,
    },
    Rollback {
        tx: TransactionID,
    },
    SetInt {
        tx: TransactionID,
        block: BlockID,
        offset: u32,
        old_value: i32,
    },
    SetString {
        tx: TransactionID,
        block: BlockID,
        offset: u32,
        old_value: String,
    },
    Checkpoint {
        active: Vec<TransactionID>,
    },
}

impl LogRecord {
    pub fn record_type(&self) -> LogRecordType {
        match self {
            LogRecord::Start { .. } => LogRecordType::Start,
            LogRecord::Commit { .. } => LogRecordType::Commit,
            LogRecord::Rollback { .. } => LogRecordType::Rollback,
            LogRecord::SetInt { .. } => LogRecordType::SetInt,
            LogRecord::SetString { .. } => LogRecordType::SetString,
            LogRecord::Checkpoint { .. } => LogRecordType::Checkpoint,
        }
    }

    /// Owning transaction; checkpoints belong to none.
    pub fn tx_id(&self) -> Option<TransactionID> {
        match self {
            LogRecord::Start { tx }
            | LogRecord::Commit { tx }
            | LogRecord::Rollback { tx }
            | LogRecord::SetInt { tx, .. }
            | LogRecord::SetString { tx, .. } => Some(*tx),
            LogRecord::Checkpoint { .. } => None,
        }
    }

    /// Serializes the record body: `[type][txId][payload]`, all integers i32 big-endian.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32);
        // Writes into a Vec cannot fail
        let _ = self.encode_into(&mut buf);
        buf
    }

    fn encode_into(&self, buf: &mut Vec<u8>) -> std::io::Result<()> {
        buf.write_i32::<BigEndian>(self.record_type() as i32)?;
        buf.write_u32::<BigEndian>(self.tx_id().unwrap_or(TransactionID::NONE).0)?;

        match self {
            LogRecord::Start { .. } | LogRecord::Commit { .. } | LogRecord::Rollback { .. } => {}
            LogRecord::SetInt {
                block,
                offset,
                old_value,
                ..
            } => {
                write_block(buf, block)?;
                buf.write_u32::<BigEndian>(*offset)?;
                buf.write_i32::<BigEndian>(*old_value)?;
            }
            LogRecord::SetString {
                block,
                offset,
                old_value,
                ..
            } => {
                write_block(buf, block)?;
                buf.write_u32::<BigEndian>(*offset)?;
                write_str(buf, old_value)?;
            }
            LogRecord::Checkpoint { active } => {
                buf.write_i32::<BigEndian>(active.len() as i32)?;
                for tx in active {
                    buf.write_u32::<BigEndian>(tx.0)?;
                }
            }
        }
        Ok(())
    }

    /// Parses a record body. `lsn` only labels the error.
    pub fn decode(bytes: &[u8], lsn: LSN) -> Result<LogRecord> {
        let corrupt = |reason: String| DbError::CorruptLogRecord { lsn, reason };

        let mut cursor = Cursor::new(bytes);
        let record = Self::decode_from(&mut cursor).map_err(|e| corrupt(e.to_string()))?;
        let consumed = cursor.position() as usize;
        if consumed != bytes.len() {
            return Err(corrupt(format!(
                "{} trailing bytes after {:?} record",
                bytes.len() - consumed,
                record.record_type()
            )));
        }
        Ok(record)
    }

    fn decode_from(cursor: &mut Cursor<&[u8]>) -> std::io::Result<LogRecord> {
        let code = cursor.read_i32::<BigEndian>()?;
        let record_type = LogRecordType::try_from(code).map_err(invalid_data)?;
        let tx = TransactionID(cursor.read_u32::<BigEndian>()?);

        let record = match record_type {
            LogRecordType::Start => LogRecord::Start { tx },
            LogRecordType::Commit => LogRecord::Commit { tx },
            LogRecordType::Rollback => LogRecord::Rollback { tx },
            LogRecordType::SetInt => {
                let block = read_block(cursor)?;
                let offset = cursor.read_u32::<BigEndian>()?;
                let old_value = cursor.read_i32::<BigEndian>()?;
                LogRecord::SetInt {
                    tx,
                    block,
                    offset,
                    old_value,
                }
            }
            LogRecordType::SetString => {
                let block = read_block(cursor)?;
                let offset = cursor.read_u32::<BigEndian>()?;
                let old_value = read_str(cursor)?;
                LogRecord::SetString {
                    tx,
                    block,
                    offset,
                    old_value,
                }
            }
            LogRecordType::Checkpoint => {
                let count = cursor.read_i32::<BigEndian>()?;
                if count < 0 {
                    return Err(invalid_data(format!("negative checkpoint size {}", count)));
                }
                let mut active = Vec::with_capacity(count.min(1024) as usize);
                for _ in 0..count {
                    active.push(TransactionID(cursor.read_u32::<BigEndian>()?));
                }
                LogRecord::Checkpoint { active }
            }
        };
        Ok(record)
    }
}

fn invalid_data(msg: String) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg)
}

fn write_str(buf: &mut Vec<u8>, s: &str) -> std::io::Result<()> {
    buf.write_i32::<BigEndian>(s.len() as i32)?;
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

fn read_str(cursor: &mut Cursor<&[u8]>) -> std::io::Result<String> {
    let len = cursor.read_i32::<BigEndian>()?;
    let remaining = cursor.get_ref().len() as u64 - cursor.position();
    if len < 0 || len as u64 > remaining {
        return Err(invalid_data(format!(
            "string length {} with {} bytes left",
            len, remaining
        )));
    }
    let mut bytes = vec![0u8; len as usize];
    cursor.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|e| invalid_data(e.to_string()))
}

fn write_block(buf: &mut Vec<u8>, block: &BlockID) -> std::io::Result<()> {
    write_str(buf, &block.file_name)?;
    buf.write_u32::<BigEndian>(block.number)
}

fn read_block(cursor: &mut Cursor<&[u8]>) -> std::io::Result<BlockID> {
    let file_name = read_str(cursor)?;
    let number = cursor.read_u32::<BigEndian>()?;
    Ok(BlockID { file_name, number })
}
