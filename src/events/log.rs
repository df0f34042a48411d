//! Append-only, file-backed event log.

use super::types::{EventEnvelope, EventQuery, NewEvent, RawEvent};
use super::{EventIter, EventLog};
use crate::error::{EngineError, Result};
use crate::types::{PayloadEncoding, SequenceNumber, Timestamp};
use parking_lot::{Mutex, RwLock};
use std::fs::{File, OpenOptions};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

/// Magic bytes at the start of every frame.
const FRAME_MAGIC: &[u8; 4] = b"EVT\0";

/// Current frame format version.
const FRAME_VERSION: u8 = 1;

/// magic + body length
const FRAME_HEADER_SIZE: u64 = 4 + 4;

/// Refuse to allocate for frames above this size.
const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

const FLAG_HAS_ID: u8 = 0b01;
const FLAG_HAS_METADATA: u8 = 0b10;

/// File event log configuration.
#[derive(Clone, Debug)]
pub struct FileEventLogConfig {
    /// Path of the log file.
    pub path: PathBuf,

    /// Sync every N appends (0 and 1 both mean every append).
    pub sync_interval: u64,
}

impl Default for FileEventLogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./events.log"),
            sync_interval: 100,
        }
    }
}

/// Append-only event log stored in a single file.
///
/// Each frame is `magic | body length | body | crc32(body)`. The in-memory
/// offset table maps sequence number `n` to the frame at `offsets[n - 1]`
/// and is rebuilt by scanning the file on open.
pub struct FileEventLog {
    /// Log file handle.
    file: RwLock<File>,

    /// Frame offsets by sequence number.
    offsets: RwLock<Vec<u64>>,

    /// Current file size (for appending).
    file_size: RwLock<u64>,

    /// Number of appends since last sync.
    writes_since_sync: Mutex<u64>,

    sync_interval: u64,
}

impl FileEventLog {
    /// Open or create a log with default settings at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_config(FileEventLogConfig {
            path: path.into(),
            ..Default::default()
        })
    }

    /// Open or create a log.
    ///
    /// A torn frame at the end of the file (crash during append) is cut off;
    /// a complete frame with a bad checksum is reported as an error.
    pub fn open_with_config(config: FileEventLogConfig) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&config.path)?;

        let (offsets, valid_end) = Self::scan(&mut file)?;
        let file_size = file.metadata()?.len();
        if valid_end < file_size {
            tracing::warn!(
                path = %config.path.display(),
                valid_end,
                file_size,
                "Event log: truncating torn frame at end of file"
            );
            file.set_len(valid_end)?;
            file.sync_all()?;
        }

        Ok(Self {
            file: RwLock::new(file),
            offsets: RwLock::new(offsets),
            file_size: RwLock::new(valid_end),
            writes_since_sync: Mutex::new(0),
            sync_interval: config.sync_interval.max(1),
        })
    }

    /// Append an event, assigning the next sequence number.
    pub fn append(&self, event: NewEvent) -> Result<EventEnvelope> {
        let mut file = self.file.write();
        let mut offsets = self.offsets.write();

        let envelope = EventEnvelope {
            sequence_number: SequenceNumber(offsets.len() as u64 + 1),
            stream: event.stream,
            recorded_at: Timestamp::now(),
            event: event.event,
        };

        let body = encode_body(&envelope)?;
        if body.len() > MAX_FRAME_SIZE {
            return Err(EngineError::Serialization(format!(
                "Event frame too large: {} bytes (max {})",
                body.len(),
                MAX_FRAME_SIZE
            )));
        }
        let offset = *self.file_size.read();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(FRAME_MAGIC)?;
        file.write_all(&(body.len() as u32).to_le_bytes())?;
        file.write_all(&body)?;
        file.write_all(&crc32fast::hash(&body).to_le_bytes())?;

        *self.file_size.write() = file.stream_position()?;
        offsets.push(offset);

        let mut writes = self.writes_since_sync.lock();
        *writes += 1;
        if *writes >= self.sync_interval {
            file.sync_all()?;
            *writes = 0;
        }

        Ok(envelope)
    }

    /// Force sync all pending writes to disk.
    pub fn sync(&self) -> Result<()> {
        self.file.write().sync_all()?;
        *self.writes_since_sync.lock() = 0;
        Ok(())
    }

    /// Read the event with the given sequence number.
    pub fn get(&self, sequence_number: SequenceNumber) -> Result<Option<EventEnvelope>> {
        let offset = match sequence_number
            .0
            .checked_sub(1)
            .and_then(|index| self.offsets.read().get(index as usize).copied())
        {
            Some(offset) => offset,
            None => return Ok(None),
        };
        self.read_at(offset).map(Some)
    }

    /// Current file size.
    pub fn size(&self) -> u64 {
        *self.file_size.read()
    }

    fn read_at(&self, offset: u64) -> Result<EventEnvelope> {
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;
        let body = read_frame(&mut *file)?;
        decode_body(&body)
    }

    /// Scan all frames, returning their offsets and the end of the last
    /// complete frame.
    fn scan(file: &mut File) -> Result<(Vec<u64>, u64)> {
        let file_size = file.metadata()?.len();
        file.seek(SeekFrom::Start(0))?;

        let mut offsets = Vec::new();
        let mut position = 0u64;

        while position + FRAME_HEADER_SIZE <= file_size {
            let mut magic = [0u8; 4];
            file.read_exact(&mut magic)?;
            if &magic != FRAME_MAGIC {
                return Err(EngineError::InvalidFormat(format!(
                    "Invalid event frame magic at offset {}",
                    position
                )));
            }

            let mut len_bytes = [0u8; 4];
            file.read_exact(&mut len_bytes)?;
            let len = u32::from_le_bytes(len_bytes) as u64;

            let frame_end = position + FRAME_HEADER_SIZE + len + 4;
            if frame_end > file_size {
                break;
            }

            let mut body = vec![0u8; len as usize];
            file.read_exact(&mut body)?;
            verify_checksum(file, &body)?;

            let envelope = decode_body(&body)?;
            let expected = SequenceNumber(offsets.len() as u64 + 1);
            if envelope.sequence_number != expected {
                return Err(EngineError::Corruption(format!(
                    "Expected sequence number {} at offset {}, found {}",
                    expected, position, envelope.sequence_number
                )));
            }

            offsets.push(position);
            position = frame_end;
        }

        Ok((offsets, position))
    }
}

impl EventLog for FileEventLog {
    fn load(&self, query: &EventQuery) -> Result<EventIter<'_>> {
        let index = query.minimum_sequence_number.0.saturating_sub(1) as usize;
        Ok(Box::new(FileEventIterator {
            log: self,
            query: query.clone(),
            index,
        }))
    }

    fn head(&self) -> SequenceNumber {
        SequenceNumber(self.offsets.read().len() as u64)
    }
}

/// Iterator over frames in the log. Looks up the offset table on every
/// step, so it observes appends made while iterating.
struct FileEventIterator<'a> {
    log: &'a FileEventLog,
    query: EventQuery,
    index: usize,
}

impl<'a> Iterator for FileEventIterator<'a> {
    type Item = Result<EventEnvelope>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let offset = self.log.offsets.read().get(self.index).copied()?;
            self.index += 1;

            match self.log.read_at(offset) {
                Ok(envelope) if self.query.matches(&envelope) => return Some(Ok(envelope)),
                Ok(_) => continue,
                Err(e) => {
                    // Stop iteration on error
                    self.index = usize::MAX;
                    return Some(Err(e));
                }
            }
        }
    }
}

fn read_frame(reader: &mut impl Read) -> Result<Vec<u8>> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != FRAME_MAGIC {
        return Err(EngineError::InvalidFormat("Invalid event frame magic".into()));
    }

    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(EngineError::Corruption("Event frame too large".into()));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    verify_checksum(reader, &body)?;
    Ok(body)
}

fn verify_checksum(reader: &mut impl Read, body: &[u8]) -> Result<()> {
    let mut checksum_bytes = [0u8; 4];
    reader.read_exact(&mut checksum_bytes)?;
    let stored = u32::from_le_bytes(checksum_bytes);
    let computed = crc32fast::hash(body);
    if stored != computed {
        return Err(EngineError::ChecksumMismatch {
            expected: stored,
            got: computed,
        });
    }
    Ok(())
}

fn encode_body(envelope: &EventEnvelope) -> Result<Vec<u8>> {
    let event = &envelope.event;
    let mut body = Vec::with_capacity(64 + event.data.len());

    let mut flags = 0u8;
    if event.id.is_some() {
        flags |= FLAG_HAS_ID;
    }
    if event.metadata.is_some() {
        flags |= FLAG_HAS_METADATA;
    }

    body.push(FRAME_VERSION);
    body.push(flags);
    body.extend_from_slice(&envelope.sequence_number.0.to_le_bytes());
    body.extend_from_slice(&envelope.recorded_at.0.to_le_bytes());
    write_short_str(&mut body, &envelope.stream)?;
    write_short_str(&mut body, &event.event_type)?;
    if let Some(id) = &event.id {
        write_short_str(&mut body, id)?;
    }
    body.push(event.encoding.to_byte());
    if let Some(metadata) = &event.metadata {
        write_long_bytes(&mut body, &serde_json::to_vec(metadata)?)?;
    }
    write_long_bytes(&mut body, &event.data)?;

    Ok(body)
}

fn decode_body(body: &[u8]) -> Result<EventEnvelope> {
    let mut cursor = Cursor::new(body);

    let version = read_u8(&mut cursor)?;
    if version != FRAME_VERSION {
        return Err(EngineError::InvalidFormat(format!(
            "Unsupported event frame version: {}",
            version
        )));
    }
    let flags = read_u8(&mut cursor)?;

    let sequence_number = SequenceNumber(read_u64(&mut cursor)?);
    let recorded_at = Timestamp(read_u64(&mut cursor)? as i64);
    let stream = read_short_str(&mut cursor)?;
    let event_type = read_short_str(&mut cursor)?;
    let id = if flags & FLAG_HAS_ID != 0 {
        Some(read_short_str(&mut cursor)?)
    } else {
        None
    };
    let encoding = PayloadEncoding::from_byte(read_u8(&mut cursor)?);
    let metadata = if flags & FLAG_HAS_METADATA != 0 {
        Some(serde_json::from_slice(&read_long_bytes(&mut cursor)?)
            .map_err(|e| EngineError::Deserialization(e.to_string()))?)
    } else {
        None
    };
    let data = read_long_bytes(&mut cursor)?;

    Ok(EventEnvelope {
        sequence_number,
        stream,
        recorded_at,
        event: RawEvent {
            id,
            event_type,
            data,
            encoding,
            metadata,
        },
    })
}

fn write_short_str(buf: &mut Vec<u8>, value: &str) -> Result<()> {
    let bytes = value.as_bytes();
    let len = u16::try_from(bytes.len())
        .map_err(|_| EngineError::Serialization(format!("String too long: {} bytes", bytes.len())))?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

fn write_long_bytes(buf: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| EngineError::Serialization(format!("Payload too large: {} bytes", bytes.len())))?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

fn read_u8(cursor: &mut Cursor<&[u8]>) -> Result<u8> {
    let mut byte = [0u8; 1];
    cursor.read_exact(&mut byte)?;
    Ok(byte[0])
}

fn read_u64(cursor: &mut Cursor<&[u8]>) -> Result<u64> {
    let mut bytes = [0u8; 8];
    cursor.read_exact(&mut bytes)?;
    Ok(u64::from_le_bytes(bytes))
}

fn read_short_str(cursor: &mut Cursor<&[u8]>) -> Result<String> {
    let mut len_bytes = [0u8; 2];
    cursor.read_exact(&mut len_bytes)?;
    let mut bytes = vec![0u8; u16::from_le_bytes(len_bytes) as usize];
    cursor.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|e| EngineError::Deserialization(e.to_string()))
}

fn read_long_bytes(cursor: &mut Cursor<&[u8]>) -> Result<Vec<u8>> {
    let mut len_bytes = [0u8; 4];
    cursor.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(EngineError::Corruption("Event payload too large".into()));
    }
    let mut bytes = vec![0u8; len];
    cursor.read_exact(&mut bytes)?;
    Ok(bytes)
}
