use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Largest payload a record may carry. A bigger length prefix on replay is
/// treated as a torn tail.
pub const MAX_RECORD_LEN: usize = 1 << 20;

/// Encode one record and return how many bytes it occupies.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<u64> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_RECORD_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("record of {} bytes exceeds {MAX_RECORD_LEN}", payload.len()),
        ));
    }
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(8 + payload.len() as u64)
}

/// Append-only log of scheduling events.
///
/// Each record is `[u32 len][bincode Event][u32 crc32]`, little-endian, where
/// `len` counts only the payload. A torn tail left by a crash fails the length
/// or checksum test and is dropped on replay.
///
/// Appends are buffered until `flush_sync`. If a flush fails, every record
/// buffered since the last successful flush is discarded and the file is cut
/// back to its last committed length, so a batch reported as failed never
/// reaches the log later.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// File length after the last successful flush.
    committed_len: u64,
    pending_bytes: u64,
    pending_events: u64,
    appends_since_compact: u64,
    /// Set when a rollback itself failed; the file can no longer be trusted.
    poisoned: Option<String>,
    #[cfg(test)]
    fail_next_flush: Option<usize>,
}

impl Wal {
    /// Open (or create) the WAL file at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let committed_len = file.metadata()?.len();
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            committed_len,
            pending_bytes: 0,
            pending_events: 0,
            appends_since_compact: 0,
            poisoned: None,
            #[cfg(test)]
            fail_next_flush: None,
        })
    }

    /// Append and fsync one event.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer one event. Nothing is durable until `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        if let Some(reason) = &self.poisoned {
            return Err(io::Error::other(format!("WAL unusable: {reason}")));
        }
        let written = encode_event(&mut self.writer, event)?;
        self.pending_bytes += written;
        self.pending_events += 1;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Flush buffered records and fsync. On failure the pending records are
    /// rolled back before the error is returned.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        if let Err(e) = self.write_through() {
            self.rollback();
            return Err(e);
        }
        self.committed_len += self.pending_bytes;
        self.pending_bytes = 0;
        self.pending_events = 0;
        Ok(())
    }

    fn write_through(&mut self) -> io::Result<()> {
        self.injected_failure()?;
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    #[cfg(not(test))]
    fn injected_failure(&mut self) -> io::Result<()> {
        Ok(())
    }

    #[cfg(test)]
    fn injected_failure(&mut self) -> io::Result<()> {
        let Some(leak) = self.fail_next_flush.take() else {
            return Ok(());
        };
        // Part of the buffer reaches the file before the device gives up.
        let buffered = self.writer.buffer();
        let partial = buffered[..leak.min(buffered.len())].to_vec();
        self.writer.get_mut().write_all(&partial)?;
        Err(io::Error::other("injected flush failure"))
    }

    /// Drop every record appended since the last successful flush, both the
    /// bytes still buffered and any that already reached the file.
    pub fn rollback(&mut self) {
        if let Err(e) = self.discard_pending() {
            tracing::error!(path = %self.path.display(), "WAL rollback failed, refusing further appends: {e}");
            self.poisoned = Some(e.to_string());
        }
        self.appends_since_compact -= self.pending_events;
        self.pending_bytes = 0;
        self.pending_events = 0;
    }

    fn discard_pending(&mut self) -> io::Result<()> {
        let file = self.writer.get_ref().try_clone()?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        // into_parts hands back the file without flushing what is buffered.
        drop(stale.into_parts());
        let file = self.writer.get_ref();
        file.set_len(self.committed_len)?;
        file.sync_all()
    }

    /// Make the next flush fail after `leak` buffered bytes reach the file.
    #[cfg(test)]
    pub(crate) fn fail_next_flush(&mut self, leak: usize) {
        self.fail_next_flush = Some(leak);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the compacted event set to `<wal>.wal.tmp` and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Rename the compacted file over the live log and reopen for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.committed_len = file.metadata()?.len();
        self.writer = BufWriter::new(file);
        self.pending_bytes = 0;
        self.pending_events = 0;
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Both compaction phases in one call.
    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Read every intact record from disk. Replay stops at the first short,
    /// corrupt or undecodable record; a missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        while let Some(payload) = read_record(&mut reader)? {
            match bincode::deserialize::<Event>(&payload) {
                Ok(event) => events.push(event),
                Err(_) => break,
            }
        }
        Ok(events)
    }
}

/// Next checksummed payload, or `None` at end of log or on a torn/corrupt record.
fn read_record(reader: &mut impl Read) -> io::Result<Option<Vec<u8>>> {
    let mut word = [0u8; 4];
    if !read_full(reader, &mut word)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(word) as usize;
    if len > MAX_RECORD_LEN {
        return Ok(None);
    }
    let mut payload = vec![0u8; len];
    if !read_full(reader, &mut payload)? || !read_full(reader, &mut word)? {
        return Ok(None);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(Some(payload))
}

/// `read_exact` that reports a short read as `false` instead of an error.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}
