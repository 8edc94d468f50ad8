use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Larger lengths can only come from a corrupt header.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Frame one event as `[u32 len][bincode payload][u32 crc32]`, little-endian.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "event too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Read `buf.len()` bytes; `Ok(false)` on a clean or torn end of file.
fn read_frame_part(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Decode the next framed event and its frame size in bytes. `None` at end
/// of log or at the first torn/corrupt frame; everything after it is ignored.
fn decode_next(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut len_buf = [0u8; 4];
    if !read_frame_part(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Ok(None);
    }
    let mut payload = vec![0u8; len];
    if !read_frame_part(reader, &mut payload)? {
        return Ok(None);
    }
    let mut crc_buf = [0u8; 4];
    if !read_frame_part(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize::<Event>(&payload)
        .ok()
        .map(|event| (event, 8 + len as u64)))
}

/// Append-only booking log. The in-memory ledgers are a projection of it.
///
/// A crash mid-append leaves a torn last frame, which replay drops and
/// `recover` cuts off before the log is reopened for appends.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// File length covered by the last successful fsync.
    durable_len: u64,
    /// Buffered since the last flush; not yet counted below.
    pending_appends: u64,
    appends_since_compact: u64,
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = open_append(path)?;
        let durable_len = file.metadata()?.len();
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            durable_len,
            pending_appends: 0,
            appends_since_compact: 0,
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer one event. Nothing is durable until `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        encode_event(&mut self.writer, event)?;
        self.pending_appends += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.durable_len = self.writer.get_ref().metadata()?.len();
        self.appends_since_compact += self.pending_appends;
        self.pending_appends = 0;
        Ok(())
    }

    /// Throw away everything since the last successful `flush_sync`: the
    /// buffer, and any bytes of it that reached the file before the failure.
    pub fn discard_unflushed(&mut self) -> io::Result<()> {
        let file = self.writer.get_ref().try_clone()?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        // into_parts hands back the buffer without writing it out.
        let (_file, _unwritten) = stale.into_parts();
        self.pending_appends = 0;
        self.writer.get_ref().set_len(self.durable_len)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn compact_tmp_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Phase one of compaction: write the snapshot to a side file and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::compact_tmp_path(path))?);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Phase two: rename the side file over the log and reopen for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(Self::compact_tmp_path(&self.path), &self.path)?;
        let file = open_append(&self.path)?;
        self.durable_len = file.metadata()?.len();
        self.writer = BufWriter::new(file);
        self.pending_appends = 0;
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// All intact events in append order. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Ok(Self::replay_with_len(path)?.0)
    }

    /// Intact events plus the byte offset just past the last of them.
    fn replay_with_len(path: &Path) -> io::Result<(Vec<Event>, u64)> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        let mut good_len = 0;
        while let Some((event, frame_len)) = decode_next(&mut reader)? {
            events.push(event);
            good_len += frame_len;
        }
        Ok((events, good_len))
    }

    /// Replay, then cut the log back to its last intact frame so the next
    /// append follows it directly. Run this before `open`.
    pub fn recover(path: &Path) -> io::Result<Vec<Event>> {
        let (events, good_len) = Self::replay_with_len(path)?;
        let file_len = match fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(events),
            Err(e) => return Err(e),
        };
        if file_len > good_len {
            tracing::warn!(
                "truncating {} bytes of torn or corrupt WAL tail at offset {good_len}",
                file_len - good_len
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(good_len)?;
            file.sync_all()?;
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Booking, BookingStatus};
    use chrono::{NaiveDate, Utc};
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("carbook_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn created(vehicle: &str) -> Event {
        let now = Utc::now();
        Event::BookingCreated {
            booking: Booking {
                id: Ulid::new(),
                vehicle_id: vehicle.into(),
                renter_id: "renter".into(),
                pickup_date: NaiveDate::from_ymd_opt(2030, 1, 5).unwrap(),
                return_date: NaiveDate::from_ymd_opt(2030, 1, 10).unwrap(),
                price: 500,
                status: BookingStatus::Pending,
                created_at: now,
                updated_at: now,
            },
        }
    }

    fn status_changed(id: Ulid, status: BookingStatus) -> Event {
        Event::BookingStatusChanged {
            id,
            vehicle_id: "car".into(),
            status,
            at: Utc::now(),
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let first = created("car");
        let id = match &first {
            Event::BookingCreated { booking } => booking.id,
            _ => unreachable!(),
        };
        let events = vec![first, status_changed(id, BookingStatus::Confirmed)];
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }
        assert_eq!(Wal::replay(&path).unwrap(), events);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_drops_torn_tail() {
        let path = tmp_path("torn_tail.wal");
        let event = created("car");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[7u8; 6]).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![event]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_missing_file_is_empty() {
        let path = tmp_path("never_written.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_stops_at_bad_crc() {
        let path = tmp_path("bad_crc.wal");
        let good = created("car");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&good).unwrap();
        }
        {
            let payload = bincode::serialize(&created("car")).unwrap();
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![good]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_shrinks_and_keeps_snapshot() {
        let path = tmp_path("compact_shrinks.wal");
        let snapshot = vec![created("car")];
        {
            let mut wal = Wal::open(&path).unwrap();
            for _ in 0..10 {
                let e = created("car");
                wal.append(&e).unwrap();
                if let Event::BookingCreated { booking } = &e {
                    wal.append(&status_changed(booking.id, BookingStatus::Cancelled))
                        .unwrap();
                }
            }
        }
        let before = fs::metadata(&path).unwrap().len();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.compact(&snapshot).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
        }
        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted log should shrink: {after} < {before}");
        assert_eq!(Wal::replay(&path).unwrap(), snapshot);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn append_after_compact_lands_in_new_file() {
        let path = tmp_path("append_after_compact.wal");
        let snapshot = vec![created("car")];
        let later = created("car");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&snapshot[0]).unwrap();
            wal.compact(&snapshot).unwrap();
            wal.append(&later).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![snapshot[0].clone(), later]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn buffered_appends_count_after_flush() {
        let path = tmp_path("buffered.wal");
        let events: Vec<Event> = (0..4).map(|_| created("car")).collect();
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 0);
            wal.flush_sync().unwrap();
            assert_eq!(wal.appends_since_compact(), 4);
        }
        assert_eq!(Wal::replay(&path).unwrap(), events);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn append_after_torn_tail_survives_next_replay() {
        let path = tmp_path("append_after_torn.wal");
        let before_crash = created("car");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&before_crash).unwrap();
        }
        let intact_len = fs::metadata(&path).unwrap().len();
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[7u8; 7]).unwrap();
        }

        assert_eq!(Wal::recover(&path).unwrap(), vec![before_crash.clone()]);
        assert_eq!(fs::metadata(&path).unwrap().len(), intact_len);

        let after_restart = created("car");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&after_restart).unwrap();
        }
        assert_eq!(
            Wal::replay(&path).unwrap(),
            vec![before_crash, after_restart]
        );
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn recover_cuts_bad_crc_frame() {
        let path = tmp_path("recover_bad_crc.wal");
        let good = created("car");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&good).unwrap();
        }
        {
            let payload = bincode::serialize(&created("car")).unwrap();
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        }
        Wal::recover(&path).unwrap();
        let later = created("car");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&later).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![good, later]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn recover_missing_file_is_empty() {
        let path = tmp_path("recover_missing.wal");
        assert!(Wal::recover(&path).unwrap().is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn discarded_batch_never_becomes_durable() {
        let path = tmp_path("discard_unflushed.wal");
        let kept = created("car");
        let failed = created("car");
        let next = created("car");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&kept).unwrap();

            wal.append_buffered(&failed).unwrap();
            // Part of the failed batch reached the file before the error.
            let mut raw: &File = wal.writer.get_ref();
            raw.write_all(&[1u8; 5]).unwrap();
            wal.discard_unflushed().unwrap();
            assert_eq!(wal.appends_since_compact(), 1);

            wal.append(&next).unwrap();
            assert_eq!(wal.appends_since_compact(), 2);
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![kept, next]);
        let _ = fs::remove_file(&path);
    }
}
