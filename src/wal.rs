use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::model::Event;

/// Largest payload one entry may carry. A reservation with every text field at
/// its length cap encodes to well under 1 KiB; a bigger length prefix on disk
/// can only be corruption.
pub const MAX_ENTRY_LEN: usize = 16 * 1024;

/// Length prefix plus CRC trailer around each payload.
const ENTRY_FRAMING: u64 = 8;

/// Append-only log of admitted reservations.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`, `len` counting the
/// payload only. Replay keeps the longest valid prefix of the file. Writers keep
/// that prefix intact: a torn tail is cut off on open, and a batch that fails to
/// write is truncated away again by `rollback`.
pub struct ReservationLog {
    writer: BufWriter<File>,
    path: PathBuf,
    /// File length covered by the last successful fsync.
    durable_len: u64,
    /// Bytes and entries handed to the writer since then.
    pending_len: u64,
    pending_entries: u64,
    /// Durable entries written through this handle.
    appends: u64,
    /// Set when a rollback failed; the on-disk tail is then unknown.
    poisoned: bool,
}

/// Valid entries at the head of a log file, and how many bytes they span.
struct Scan {
    events: Vec<Event>,
    valid_len: u64,
}

impl ReservationLog {
    /// Open (or create) the log at `path` and return the reservations already in it.
    /// Anything past the last valid entry is truncated before new entries go in.
    pub fn open(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let Scan { events, valid_len } = scan(path)?;

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let file_len = file.metadata()?.len();
        if file_len > valid_len {
            warn!(
                "{}: dropping {} bytes of torn or corrupt tail after {} reservations",
                path.display(),
                file_len - valid_len,
                events.len()
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        let log = Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            durable_len: valid_len,
            pending_len: 0,
            pending_entries: 0,
            appends: 0,
            poisoned: false,
        };
        Ok((log, events))
    }

    /// Every reservation event recorded at `path`, oldest first.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Ok(scan(path)?.events)
    }

    /// Append and fsync one event. Tests only; the store batches with
    /// `append_buffered` + `flush_sync`.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer an event without flushing. Not durable until `flush_sync()`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        self.ensure_usable()?;
        let payload =
            bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        if payload.len() > MAX_ENTRY_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("log entry of {} bytes exceeds {MAX_ENTRY_LEN}", payload.len()),
            ));
        }

        let crc = crc32fast::hash(&payload);
        self.writer.write_all(&(payload.len() as u32).to_le_bytes())?;
        self.writer.write_all(&payload)?;
        self.writer.write_all(&crc.to_le_bytes())?;
        self.pending_len += payload.len() as u64 + ENTRY_FRAMING;
        self.pending_entries += 1;
        Ok(())
    }

    /// Flush the buffer and fsync. On success every pending entry is durable.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.ensure_usable()?;
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.durable_len += self.pending_len;
        self.appends += self.pending_entries;
        self.pending_len = 0;
        self.pending_entries = 0;
        Ok(())
    }

    /// Discard everything since the last successful `flush_sync`, buffered or
    /// already partly on disk. If that fails the log refuses all further writes.
    pub fn rollback(&mut self) -> io::Result<()> {
        let result = self.truncate_to_durable();
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    fn truncate_to_durable(&mut self) -> io::Result<()> {
        let file = self.writer.get_ref().try_clone()?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        // into_parts hands back the unwritten buffer instead of flushing it.
        let (_, _unwritten) = stale.into_parts();

        let file = self.writer.get_ref();
        file.set_len(self.durable_len)?;
        file.sync_all()?;
        self.pending_len = 0;
        self.pending_entries = 0;
        Ok(())
    }

    fn ensure_usable(&self) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other(format!(
                "{}: reservation log is read-only after a failed rollback",
                self.path.display()
            )));
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends(&self) -> u64 {
        self.appends
    }
}

fn scan(path: &Path) -> io::Result<Scan> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Ok(Scan {
                events: Vec::new(),
                valid_len: 0,
            });
        }
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut events = Vec::new();
    let mut valid_len = 0u64;

    loop {
        let mut len_buf = [0u8; 4];
        if !read_or_eof(&mut reader, &mut len_buf)? {
            break;
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_ENTRY_LEN {
            break; // garbage length, not a real entry
        }

        let mut payload = vec![0u8; len];
        let mut crc_buf = [0u8; 4];
        if !read_or_eof(&mut reader, &mut payload)? || !read_or_eof(&mut reader, &mut crc_buf)? {
            break; // torn
        }
        if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
            break;
        }
        let Ok(event) = bincode::deserialize::<Event>(&payload) else {
            break;
        };

        events.push(event);
        valid_len += len as u64 + ENTRY_FRAMING;
    }

    Ok(Scan { events, valid_len })
}

/// `read_exact`, but a short read at EOF yields `Ok(false)` instead of an error.
fn read_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Reservation;
    use chrono::{NaiveDate, NaiveTime};
    use std::fs;
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("labres_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn created(room: &str, hour: u32) -> Event {
        Event::ReservationCreated(Reservation {
            id: Ulid::new(),
            owner_name: "Bia".into(),
            lab: "Physics".into(),
            room: room.into(),
            date: NaiveDate::from_ymd_opt(2030, 6, 1).unwrap(),
            start_time: NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(hour + 1, 0, 0).unwrap(),
            user_id: 11,
        })
    }

    /// Raw bytes straight onto the file, bypassing the log.
    fn scribble(path: &Path, bytes: &[u8]) {
        let mut f = OpenOptions::new().append(true).open(path).unwrap();
        f.write_all(bytes).unwrap();
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");

        let events = vec![created("A", 9), created("B", 10)];
        {
            let (mut log, existing) = ReservationLog::open(&path).unwrap();
            assert!(existing.is_empty());
            for e in &events {
                log.append(e).unwrap();
            }
            assert_eq!(log.appends(), 2);
        }

        assert_eq!(ReservationLog::replay(&path).unwrap(), events);
        let (_, reopened) = ReservationLog::open(&path).unwrap();
        assert_eq!(reopened, events);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_handles_truncation() {
        let path = tmp_path("truncation.wal");

        let event = created("A", 9);
        {
            let (mut log, _) = ReservationLog::open(&path).unwrap();
            log.append(&event).unwrap();
        }
        // Partial length prefix plus a few bytes of a second entry
        scribble(&path, &[0u8; 6]);

        assert_eq!(ReservationLog::replay(&path).unwrap(), vec![event]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_nonexistent_file() {
        let path = tmp_path("nonexistent.wal");
        assert!(ReservationLog::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_stops_at_corrupt_crc() {
        let path = tmp_path("corrupt_crc.wal");

        let good = created("A", 9);
        {
            let (mut log, _) = ReservationLog::open(&path).unwrap();
            log.append(&good).unwrap();
        }
        let payload = bincode::serialize(&created("B", 12)).unwrap();
        scribble(&path, &(payload.len() as u32).to_le_bytes());
        scribble(&path, &payload);
        scribble(&path, &0xDEADBEEFu32.to_le_bytes());

        assert_eq!(ReservationLog::replay(&path).unwrap(), vec![good]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn oversized_length_prefix_ends_replay() {
        let path = tmp_path("oversized_prefix.wal");

        let good = created("A", 9);
        {
            let (mut log, _) = ReservationLog::open(&path).unwrap();
            log.append(&good).unwrap();
        }
        scribble(&path, &u32::MAX.to_le_bytes());
        scribble(&path, &[7u8; 32]);

        assert_eq!(ReservationLog::replay(&path).unwrap(), vec![good]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn oversized_event_is_refused() {
        let path = tmp_path("oversized_event.wal");
        let (mut log, _) = ReservationLog::open(&path).unwrap();

        let Event::ReservationCreated(mut huge) = created("A", 9);
        huge.owner_name = "x".repeat(MAX_ENTRY_LEN + 1);
        let err = log
            .append_buffered(&Event::ReservationCreated(huge))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

        // Nothing half-written; the log keeps working.
        let next = created("B", 10);
        log.append(&next).unwrap();
        assert_eq!(ReservationLog::replay(&path).unwrap(), vec![next]);

        drop(log);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn buffered_appends_invisible_until_flushed() {
        let path = tmp_path("buffered_flush.wal");

        let events: Vec<Event> = (8..13).map(|h| created("C", h)).collect();
        let (mut log, _) = ReservationLog::open(&path).unwrap();
        for e in &events {
            log.append_buffered(e).unwrap();
        }
        assert!(ReservationLog::replay(&path).unwrap().is_empty());
        assert_eq!(log.appends(), 0);

        log.flush_sync().unwrap();
        assert_eq!(ReservationLog::replay(&path).unwrap(), events);
        assert_eq!(log.appends(), 5);

        drop(log);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn open_cuts_torn_tail_before_appending() {
        let path = tmp_path("cut_tail.wal");

        let first = created("A", 9);
        {
            let (mut log, _) = ReservationLog::open(&path).unwrap();
            log.append(&first).unwrap();
        }
        scribble(&path, &[0xAB; 11]);

        let second = created("B", 10);
        {
            let (mut log, existing) = ReservationLog::open(&path).unwrap();
            assert_eq!(existing, vec![first.clone()]);
            log.append(&second).unwrap();
        }

        assert_eq!(ReservationLog::replay(&path).unwrap(), vec![first, second]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn rollback_discards_failed_batch() {
        let path = tmp_path("rollback.wal");

        let kept = created("A", 9);
        let (mut log, _) = ReservationLog::open(&path).unwrap();
        log.append(&kept).unwrap();

        // A batch that got partly onto disk before failing.
        log.append_buffered(&created("B", 10)).unwrap();
        scribble(&path, &[0x5A; 9]);
        log.rollback().unwrap();
        assert_eq!(log.appends(), 1);

        let later = created("C", 11);
        log.append(&later).unwrap();
        assert_eq!(ReservationLog::replay(&path).unwrap(), vec![kept, later]);

        drop(log);
        let _ = fs::remove_file(&path);
    }
}
