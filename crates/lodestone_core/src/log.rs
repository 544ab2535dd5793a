//! The append-only record log.
//!
//! Every committed mutation is appended here; on open, the log is
//! replayed to rebuild the in-memory key-store state.
//!
//! ## Framing
//!
//! ```text
//! file   := header entry*
//! header := magic (6) | format version (2)
//! entry  := kind (1) | payload len (4) | payload | crc32 (4)
//! ```
//!
//! The CRC covers kind, length and payload. Entries between two commit
//! markers belong to one transaction; replay applies a batch only when
//! its commit marker is present.
//!
//! ## Recovery policy
//!
//! A truncated entry at the tail is a crash mid-write: tolerated, the
//! torn tail (including any uncommitted batch before it) is discarded and
//! the file truncated back to the last commit marker. A CRC mismatch or
//! unknown entry kind in the interior is real corruption and fails the
//! open with `CorruptData`; no heuristic repair is attempted.

use crate::error::{Error, Result};
use crate::record::Record;
use crate::types::{DocumentFlags, SequenceNumber, Timestamp};
use lodestone_storage::StorageBackend;

const MAGIC: &[u8; 6] = b"LSLOG\x01";
const FORMAT_VERSION: u16 = 1;
const HEADER_SIZE: u64 = 8;
const FRAME_OVERHEAD: usize = 1 + 4 + 4;

const KIND_PUT: u8 = 1;
const KIND_DELETE: u8 = 2;
const KIND_COMMIT: u8 = 3;

/// A single logged mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOp {
    /// Insert, update or tombstone a record in a key store.
    Put {
        /// Key store id from the manifest.
        store_id: u32,
        /// The full record, including its assigned sequence.
        record: Record,
    },
    /// Remove a record (hard delete).
    Delete {
        /// Key store id from the manifest.
        store_id: u32,
        /// Key of the removed record.
        key: Vec<u8>,
        /// Sequence consumed by the deletion.
        sequence: SequenceNumber,
    },
}

impl LogOp {
    /// The key store this operation targets.
    #[must_use]
    pub fn store_id(&self) -> u32 {
        match self {
            Self::Put { store_id, .. } | Self::Delete { store_id, .. } => *store_id,
        }
    }
}

/// How durable a commit append must be before it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    /// Push writes to the OS.
    Flush,
    /// Wait for the disk (manual WAL flush requests map here).
    Sync,
}

/// The record log over a storage backend.
pub struct RecordLog {
    backend: Box<dyn StorageBackend>,
}

impl RecordLog {
    /// Opens the log, replaying committed batches.
    ///
    /// Returns the log and the committed operations in commit order.
    pub fn open(mut backend: Box<dyn StorageBackend>) -> Result<(Self, Vec<LogOp>)> {
        let size = backend.size()?;
        if size == 0 {
            let mut header = Vec::with_capacity(HEADER_SIZE as usize);
            header.extend_from_slice(MAGIC);
            header.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
            backend.append(&header)?;
            backend.sync()?;
            return Ok((Self { backend }, Vec::new()));
        }
        if size < HEADER_SIZE {
            return Err(Error::corrupt_data("record log header truncated"));
        }
        let header = backend.read_at(0, HEADER_SIZE as usize)?;
        if &header[..6] != MAGIC {
            return Err(Error::corrupt_data("not a record log"));
        }
        let version = u16::from_le_bytes([header[6], header[7]]);
        if version != FORMAT_VERSION {
            return Err(Error::corrupt_data(format!(
                "unsupported record log version {version}"
            )));
        }

        let mut committed = Vec::new();
        let mut pending = Vec::new();
        let mut offset = HEADER_SIZE;
        let mut committed_end = HEADER_SIZE;

        loop {
            match Self::read_entry(backend.as_ref(), offset, size)? {
                EntryRead::End => break,
                EntryRead::Torn => break,
                EntryRead::Entry { kind, payload, next } => {
                    match kind {
                        KIND_PUT => pending.push(decode_put(&payload)?),
                        KIND_DELETE => pending.push(decode_delete(&payload)?),
                        KIND_COMMIT => {
                            if !payload.is_empty() {
                                return Err(Error::corrupt_data("commit entry has payload"));
                            }
                            committed.append(&mut pending);
                            committed_end = next;
                        }
                        other => {
                            return Err(Error::corrupt_data(format!(
                                "unknown log entry kind {other}"
                            )))
                        }
                    }
                    offset = next;
                }
            }
        }

        if committed_end < size {
            // Drop the torn tail and any uncommitted batch before it.
            tracing::debug!(
                dropped = size - committed_end,
                "discarding unterminated log tail"
            );
            backend.truncate(committed_end)?;
        }

        Ok((Self { backend }, committed))
    }

    fn read_entry(backend: &dyn StorageBackend, offset: u64, size: u64) -> Result<EntryRead> {
        if offset == size {
            return Ok(EntryRead::End);
        }
        if offset + 5 > size {
            return Ok(EntryRead::Torn);
        }
        let head = backend.read_at(offset, 5)?;
        let kind = head[0];
        let len = u32::from_le_bytes([head[1], head[2], head[3], head[4]]) as u64;
        let end = offset + 5 + len + 4;
        if end > size {
            return Ok(EntryRead::Torn);
        }
        let frame = backend.read_at(offset, (5 + len) as usize)?;
        let stored_crc = backend.read_at(offset + 5 + len, 4)?;
        let stored_crc = u32::from_le_bytes([
            stored_crc[0],
            stored_crc[1],
            stored_crc[2],
            stored_crc[3],
        ]);
        let computed = compute_crc32(&frame);
        if stored_crc != computed {
            return Err(Error::corrupt_data(format!(
                "log entry checksum mismatch at offset {offset}"
            )));
        }
        Ok(EntryRead::Entry {
            kind,
            payload: frame[5..].to_vec(),
            next: end,
        })
    }

    /// Appends a committed batch: all operations, then the commit marker.
    ///
    /// On failure the partial batch is truncated away so the log never
    /// carries a half-written commit, and the error is returned.
    pub fn append_commit(&mut self, ops: &[LogOp], durability: Durability) -> Result<()> {
        let rollback_to = self.backend.size()?;
        let result = self.append_commit_inner(ops, durability);
        if result.is_err() {
            let _ = self.backend.truncate(rollback_to);
        }
        result
    }

    fn append_commit_inner(&mut self, ops: &[LogOp], durability: Durability) -> Result<()> {
        let mut buf = Vec::new();
        for op in ops {
            encode_entry(&mut buf, op);
        }
        append_frame(&mut buf, KIND_COMMIT, &[]);
        self.backend.append(&buf)?;
        match durability {
            Durability::Flush => self.backend.flush()?,
            Durability::Sync => self.backend.sync()?,
        }
        Ok(())
    }

    /// Replaces the log contents with a single committed batch, in place.
    ///
    /// Used to compact ephemeral (in-memory) databases; file-backed
    /// databases rewrite into a fresh file and swap instead.
    pub fn rewrite(&mut self, ops: &[LogOp]) -> Result<()> {
        self.backend.truncate(HEADER_SIZE)?;
        if !ops.is_empty() {
            self.append_commit(ops, Durability::Sync)?;
        }
        Ok(())
    }

    /// Current log size in bytes.
    pub fn size(&self) -> Result<u64> {
        Ok(self.backend.size()?)
    }

    /// Pushes buffered writes to the OS.
    pub fn flush(&mut self) -> Result<()> {
        self.backend.flush()?;
        Ok(())
    }

    /// Writes a complete log (header plus one committed batch) into a
    /// fresh backend and syncs it. Used by compaction and rekey to build
    /// the replacement file before swapping it in.
    pub fn write_full(backend: &mut dyn StorageBackend, ops: &[LogOp]) -> Result<()> {
        if backend.size()? != 0 {
            return Err(Error::invalid_parameter("replacement log must be empty"));
        }
        let mut buf = Vec::with_capacity(HEADER_SIZE as usize);
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        if !ops.is_empty() {
            for op in ops {
                encode_entry(&mut buf, op);
            }
            append_frame(&mut buf, KIND_COMMIT, &[]);
        }
        backend.append(&buf)?;
        backend.sync()?;
        Ok(())
    }
}

enum EntryRead {
    Entry {
        kind: u8,
        payload: Vec<u8>,
        next: u64,
    },
    Torn,
    End,
}

fn encode_entry(out: &mut Vec<u8>, op: &LogOp) {
    match op {
        LogOp::Put { store_id, record } => {
            let mut payload = Vec::with_capacity(
                33 + record.key.len()
                    + record.version.len()
                    + record.meta.len()
                    + record.body.len(),
            );
            payload.extend_from_slice(&store_id.to_le_bytes());
            payload.push(record.flags.as_byte());
            payload.extend_from_slice(&record.sequence.as_u64().to_le_bytes());
            payload.extend_from_slice(&record.expiration.as_millis().to_le_bytes());
            payload.extend_from_slice(&(record.key.len() as u32).to_le_bytes());
            payload.extend_from_slice(&(record.version.len() as u32).to_le_bytes());
            payload.extend_from_slice(&(record.meta.len() as u32).to_le_bytes());
            payload.extend_from_slice(&(record.body.len() as u32).to_le_bytes());
            payload.extend_from_slice(&record.key);
            payload.extend_from_slice(&record.version);
            payload.extend_from_slice(&record.meta);
            payload.extend_from_slice(&record.body);
            append_frame(out, KIND_PUT, &payload);
        }
        LogOp::Delete {
            store_id,
            key,
            sequence,
        } => {
            let mut payload = Vec::with_capacity(16 + key.len());
            payload.extend_from_slice(&store_id.to_le_bytes());
            payload.extend_from_slice(&sequence.as_u64().to_le_bytes());
            payload.extend_from_slice(&(key.len() as u32).to_le_bytes());
            payload.extend_from_slice(key);
            append_frame(out, KIND_DELETE, &payload);
        }
    }
}

fn append_frame(out: &mut Vec<u8>, kind: u8, payload: &[u8]) {
    let start = out.len();
    out.push(kind);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    let crc = compute_crc32(&out[start..]);
    out.extend_from_slice(&crc.to_le_bytes());
    debug_assert_eq!(out.len() - start, FRAME_OVERHEAD + payload.len());
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(Error::corrupt_data("log entry payload truncated"));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(self.u64()? as i64)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn finish(&self) -> Result<()> {
        if self.pos != self.data.len() {
            return Err(Error::corrupt_data("trailing bytes in log entry"));
        }
        Ok(())
    }
}

fn decode_put(payload: &[u8]) -> Result<LogOp> {
    let mut cur = Cursor::new(payload);
    let store_id = cur.u32()?;
    let flags = DocumentFlags::from_byte(cur.u8()?);
    let sequence = SequenceNumber::new(cur.u64()?);
    let expiration = Timestamp::from_millis(cur.i64()?);
    let key_len = cur.u32()? as usize;
    let version_len = cur.u32()? as usize;
    let meta_len = cur.u32()? as usize;
    let body_len = cur.u32()? as usize;
    let key = cur.take(key_len)?.to_vec();
    let version = cur.take(version_len)?.to_vec();
    let meta = cur.take(meta_len)?.to_vec();
    let body = cur.take(body_len)?.to_vec();
    cur.finish()?;
    if key.is_empty() {
        return Err(Error::corrupt_data("logged record has empty key"));
    }
    Ok(LogOp::Put {
        store_id,
        record: Record {
            key,
            version,
            meta,
            body,
            sequence,
            flags,
            expiration,
        },
    })
}

fn decode_delete(payload: &[u8]) -> Result<LogOp> {
    let mut cur = Cursor::new(payload);
    let store_id = cur.u32()?;
    let sequence = SequenceNumber::new(cur.u64()?);
    let key_len = cur.u32()? as usize;
    let key = cur.take(key_len)?.to_vec();
    cur.finish()?;
    Ok(LogOp::Delete {
        store_id,
        key,
        sequence,
    })
}

/// Computes a CRC32 checksum (IEEE polynomial).
pub fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ TABLE[index];
    }
    !crc
}
