// FreqDB
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

// Append-only log store
// Every put appends a checksummed record to the data file. An in-memory ordered
// directory maps each key to the location of its latest value, so values stay
// on disk, lookups cost one seek and keys sharing a prefix sit next to each
// other. The directory is rebuilt by scanning the file at open; superseded
// records are reclaimed by compaction.

use super::{KvStore, StoreOptions, StoreStats};
use crate::error::{FreqError, FreqResult, io_error};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Magic number to identify store files (FQDB)
const STORE_MAGIC: [u8; 4] = [0x46, 0x51, 0x44, 0x42];
/// Current store format version
const STORE_VERSION: u32 = 2;
/// Size of the file header in bytes (magic + version)
const FILE_HEADER_SIZE: u64 = 8;
/// Size of a record header in bytes (checksum + key length + value length + length checksum)
const RECORD_HEADER_SIZE: u64 = 16;

/// Where the latest value of a key lives in the data file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RecordLocation {
    value_offset: u64,
    value_len: u32,
}

/// Fixed-size prefix of every record
#[derive(Debug, Clone, Copy)]
struct RecordHeader {
    checksum: u32,
    key_len: u32,
    value_len: u32,
}

impl RecordHeader {
    /// Record size including the header
    fn record_len(&self) -> u64 {
        RECORD_HEADER_SIZE + self.key_len as u64 + self.value_len as u64
    }
}

/// Ordered, append-only key-value store backed by a single file
pub struct LogStore {
    path: PathBuf,
    file: Option<File>,
    directory: BTreeMap<Vec<u8>, RecordLocation>,
    /// Offset one past the last valid record
    end: u64,
    dead_records: usize,
    options: StoreOptions,
}

impl LogStore {
    /// Path of the data file
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    /// Size of the valid portion of the data file
    pub fn file_size(&self) -> u64 {
        self.end
    }

    fn handle(&self) -> FreqResult<&File> {
        self.file.as_ref().ok_or_else(|| FreqError::InvalidOperation(format!("store {} is closed", self.path.display())))
    }

    /// Read records appended after `self.end`, validating the header first if needed
    ///
    /// Only an incomplete record at the very end of the file is treated as an
    /// interrupted write and dropped. Damage anywhere else is `Corruption` and
    /// leaves the file untouched.
    fn load_from_end(&mut self) -> FreqResult<()> {
        let file = self.file.as_ref().ok_or_else(|| FreqError::InvalidOperation(format!("store {} is closed", self.path.display())))?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        if self.end < FILE_HEADER_SIZE {
            if file_len < FILE_HEADER_SIZE {
                // An empty file opened read-only: nothing to load yet
                return Ok(());
            }
            check_file_header(&mut reader)?;
            self.end = FILE_HEADER_SIZE;
        }

        reader.seek(SeekFrom::Start(self.end))?;
        let mut pos = self.end;
        let mut torn = false;

        while pos < file_len {
            if file_len - pos < RECORD_HEADER_SIZE {
                torn = true;
                break;
            }

            let header = read_record_header(&mut reader).map_err(|e| match e {
                FreqError::Corruption(reason) => FreqError::Corruption(format!("{} at offset {} in {}", reason, pos, self.path.display())),
                other => other,
            })?;

            // The lengths are verified, so a record running past the end was cut short
            let record_end = pos + header.record_len();
            if record_end > file_len {
                torn = true;
                break;
            }

            let mut key = vec![0u8; header.key_len as usize];
            reader.read_exact(&mut key)?;
            let mut value = vec![0u8; header.value_len as usize];
            reader.read_exact(&mut value)?;

            if calculate_checksum(&key, &value) != header.checksum {
                if record_end == file_len {
                    torn = true;
                    break;
                }
                return Err(FreqError::Corruption(format!("Checksum mismatch at offset {} in {}", pos, self.path.display())));
            }

            let location = RecordLocation {
                value_offset: pos + RECORD_HEADER_SIZE + header.key_len as u64,
                value_len: header.value_len,
            };
            if self.directory.insert(key, location).is_some() {
                self.dead_records += 1;
            }
            pos = record_end;
        }

        if torn {
            warn!("Dropping {} bytes of incomplete record at the end of {}", file_len - pos, self.path.display());
            if !self.options.read_only {
                file.set_len(pos)?;
            }
        }

        self.end = pos;
        Ok(())
    }

    /// Cursor over the given directory entries, read back in file order
    fn cursor_over<'a>(&'a self, entries: impl Iterator<Item = (&'a Vec<u8>, &'a RecordLocation)>) -> LogCursor<'a> {
        let mut entries: Vec<(&[u8], RecordLocation)> = match self.file {
            Some(_) => entries.map(|(key, location)| (key.as_slice(), *location)).collect(),
            None => Vec::new(),
        };
        entries.sort_unstable_by_key(|(_, location)| location.value_offset);

        LogCursor {
            file: self.file.as_ref(),
            entries: entries.into_iter(),
        }
    }
}

impl KvStore for LogStore {
    type Cursor<'a> = LogCursor<'a>;

    fn open(path: &Path, options: StoreOptions) -> FreqResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(!options.read_only)
            .create(options.create_if_missing && !options.read_only)
            .open(path)?;

        let file_len = file.metadata()?.len();
        let mut store = Self {
            path: path.to_path_buf(),
            file: Some(file),
            directory: BTreeMap::new(),
            end: 0,
            dead_records: 0,
            options,
        };

        if file_len == 0 && !options.read_only {
            let mut file = store.handle()?;
            write_file_header(&mut file)?;
            file.sync_data()?;
            store.end = FILE_HEADER_SIZE;
            info!("Created store {}", path.display());
            return Ok(store);
        }

        if file_len > 0 && file_len < FILE_HEADER_SIZE {
            return Err(FreqError::Corruption(format!("{} is too short to be a store file", path.display())));
        }

        store.load_from_end()?;
        debug!("Opened store {} with {} keys ({} superseded records)", path.display(), store.directory.len(), store.dead_records);
        Ok(store)
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> FreqResult<()> {
        if self.options.read_only {
            return Err(FreqError::InvalidOperation(format!("store {} is read-only", self.path.display())));
        }

        let record = encode_record(key, value)?;
        let end = self.end;
        let mut file = self.handle()?;
        file.seek(SeekFrom::Start(end))?;
        file.write_all(&record)?;

        let location = RecordLocation {
            value_offset: end + RECORD_HEADER_SIZE + key.len() as u64,
            value_len: value.len() as u32,
        };
        self.end += record.len() as u64;
        if self.directory.insert(key.to_vec(), location).is_some() {
            self.dead_records += 1;
        }
        Ok(())
    }

    fn get(&self, key: &[u8]) -> FreqResult<Option<Vec<u8>>> {
        let (Some(file), Some(location)) = (self.file.as_ref(), self.directory.get(key)) else {
            return Ok(None);
        };
        read_value(file, *location).map(Some)
    }

    fn contains(&self, key: &[u8]) -> bool {
        self.file.is_some() && self.directory.contains_key(key)
    }

    fn cursor(&self) -> FreqResult<LogCursor<'_>> {
        Ok(self.cursor_over(self.directory.iter()))
    }

    fn prefix_cursor(&self, prefix: &[u8]) -> FreqResult<LogCursor<'_>> {
        let range = self
            .directory
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix));
        Ok(self.cursor_over(range))
    }

    fn len(&self) -> usize {
        if self.file.is_some() { self.directory.len() } else { 0 }
    }

    fn sync(&mut self) -> FreqResult<()> {
        if self.options.read_only {
            return Ok(());
        }
        if let Some(file) = self.file.as_ref() {
            file.sync_data()?;
        }
        Ok(())
    }

    fn close(&mut self) -> FreqResult<()> {
        if let Some(file) = self.file.take() {
            if !self.options.read_only {
                file.sync_data()?;
            }
            self.directory.clear();
            debug!("Closed store {}", self.path.display());
        }
        Ok(())
    }

    fn refresh(&mut self) -> FreqResult<()> {
        if !self.options.read_only || !self.options.allow_dirty_reads || self.file.is_none() {
            return Ok(());
        }
        self.load_from_end()
    }

    fn compact(&mut self) -> FreqResult<bool> {
        if self.options.read_only {
            return Err(io_error(ErrorKind::PermissionDenied, "cannot compact a read-only store"));
        }
        if self.dead_records == 0 {
            return Ok(false);
        }

        let file = self.handle()?;
        let parent = self.path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
        let temp = NamedTempFile::new_in(parent)?;

        let mut entries: Vec<(&[u8], RecordLocation)> = self.directory.iter().map(|(key, location)| (key.as_slice(), *location)).collect();
        entries.sort_unstable_by_key(|(_, location)| location.value_offset);

        let mut directory = BTreeMap::new();
        let mut end = FILE_HEADER_SIZE;
        {
            let mut writer = BufWriter::new(temp.as_file());
            write_file_header(&mut writer)?;
            for (key, location) in entries {
                let value = read_value(file, location)?;
                let record = encode_record(key, &value)?;
                writer.write_all(&record)?;
                directory.insert(
                    key.to_vec(),
                    RecordLocation {
                        value_offset: end + RECORD_HEADER_SIZE + key.len() as u64,
                        value_len: location.value_len,
                    },
                );
                end += record.len() as u64;
            }
            writer.flush()?;
        }
        temp.as_file().sync_data()?;

        let reclaimed = self.dead_records;
        let file = temp.persist(&self.path).map_err(|e| FreqError::Io(e.error))?;
        self.file = Some(file);
        self.directory = directory;
        self.end = end;
        self.dead_records = 0;

        info!("Compacted {}: reclaimed {} superseded records", self.path.display(), reclaimed);
        Ok(true)
    }

    fn stats(&self) -> StoreStats {
        StoreStats {
            live_records: self.len(),
            dead_records: self.dead_records,
        }
    }
}

impl Drop for LogStore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close store {}: {}", self.path.display(), e);
        }
    }
}

/// Cursor over the live records of a [`LogStore`], in file order
pub struct LogCursor<'a> {
    file: Option<&'a File>,
    entries: std::vec::IntoIter<(&'a [u8], RecordLocation)>,
}

impl Iterator for LogCursor<'_> {
    type Item = FreqResult<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let (key, location) = self.entries.next()?;
        let file = self.file?;
        Some(read_value(file, location).map(|value| (key.to_vec(), value)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

/// CRC32 over the lengths, key and value of a record
fn calculate_checksum(key: &[u8], value: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&(key.len() as u32).to_be_bytes());
    hasher.update(&(value.len() as u32).to_be_bytes());
    hasher.update(key);
    hasher.update(value);
    hasher.finalize()
}

/// CRC32 over the two length fields alone, so they can be trusted before the body is read
fn length_checksum(key_len: u32, value_len: u32) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&key_len.to_be_bytes());
    hasher.update(&value_len.to_be_bytes());
    hasher.finalize()
}

fn encode_record(key: &[u8], value: &[u8]) -> FreqResult<Vec<u8>> {
    let key_len = u32::try_from(key.len()).map_err(|_| FreqError::InvalidOperation(format!("key of {} bytes is too large", key.len())))?;
    let value_len = u32::try_from(value.len()).map_err(|_| FreqError::InvalidOperation(format!("value of {} bytes is too large", value.len())))?;

    let mut record = Vec::with_capacity(RECORD_HEADER_SIZE as usize + key.len() + value.len());
    record.write_u32::<BigEndian>(calculate_checksum(key, value))?;
    record.write_u32::<BigEndian>(key_len)?;
    record.write_u32::<BigEndian>(value_len)?;
    record.write_u32::<BigEndian>(length_checksum(key_len, value_len))?;
    record.extend_from_slice(key);
    record.extend_from_slice(value);
    Ok(record)
}

fn read_record_header<R: Read>(reader: &mut R) -> FreqResult<RecordHeader> {
    let checksum = reader.read_u32::<BigEndian>()?;
    let key_len = reader.read_u32::<BigEndian>()?;
    let value_len = reader.read_u32::<BigEndian>()?;
    let stored = reader.read_u32::<BigEndian>()?;

    if length_checksum(key_len, value_len) != stored {
        return Err(FreqError::Corruption("Record length checksum mismatch".to_string()));
    }
    Ok(RecordHeader { checksum, key_len, value_len })
}

fn read_value(mut file: &File, location: RecordLocation) -> FreqResult<Vec<u8>> {
    file.seek(SeekFrom::Start(location.value_offset))?;
    let mut value = vec![0u8; location.value_len as usize];
    file.read_exact(&mut value)?;
    Ok(value)
}

fn write_file_header<W: Write>(writer: &mut W) -> io::Result<()> {
    writer.write_all(&STORE_MAGIC)?;
    writer.write_u32::<BigEndian>(STORE_VERSION)
}

fn check_file_header<R: Read>(reader: &mut R) -> FreqResult<()> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != STORE_MAGIC {
        return Err(FreqError::Corruption("Invalid magic number".to_string()));
    }

    let version = reader.read_u32::<BigEndian>()?;
    if version != STORE_VERSION {
        return Err(FreqError::Corruption(format!("Unsupported store version {version}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::AccessMode;
    use tempfile::TempDir;

    fn open_rw(path: &Path) -> LogStore {
        LogStore::open(path, StoreOptions::for_mode(AccessMode::ReadWrite)).unwrap()
    }

    fn open_ro(path: &Path) -> FreqResult<LogStore> {
        LogStore::open(path, StoreOptions::for_mode(AccessMode::ReadOnly))
    }

    #[test]
    fn test_put_get_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("words.db");

        let mut store = open_rw(&path);
        store.put(b"dog", b"\x02").unwrap();
        store.put(b"cat", b"\x01").unwrap();
        store.put(b"dog", b"\x03").unwrap();
        assert_eq!(store.get(b"dog").unwrap(), Some(vec![3]));
        assert_eq!(store.len(), 2);
        assert_eq!(store.stats().dead_records, 1);
        store.close().unwrap();

        let store = open_rw(&path);
        assert_eq!(store.get(b"dog").unwrap(), Some(vec![3]));
        assert_eq!(store.get(b"cat").unwrap(), Some(vec![1]));
        assert_eq!(store.get(b"fish").unwrap(), None);
        assert_eq!(store.stats().dead_records, 1);
    }

    #[test]
    fn test_read_only_open_of_missing_file_fails() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("missing.db");

        match open_ro(&path) {
            Err(FreqError::Io(e)) => assert_eq!(e.kind(), ErrorKind::NotFound),
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("read-only open created a store"),
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_read_only_rejects_put() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ro.db");
        open_rw(&path).close().unwrap();

        let mut store = open_ro(&path).unwrap();
        assert!(matches!(store.put(b"k", b"v"), Err(FreqError::InvalidOperation(_))));
    }

    #[test]
    fn test_cursor_yields_live_records_once() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = open_rw(&temp_dir.path().join("scan.db"));
        store.put(b"a", b"1").unwrap();
        store.put(b"b", b"2").unwrap();
        store.put(b"a", b"3").unwrap();

        let mut records: Vec<_> = store.cursor().unwrap().collect::<FreqResult<Vec<_>>>().unwrap();
        records.sort();
        assert_eq!(records, vec![(b"a".to_vec(), b"3".to_vec()), (b"b".to_vec(), b"2".to_vec())]);
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("torn.db");

        let mut store = open_rw(&path);
        store.put(b"kept", b"value").unwrap();
        let valid_len = store.file_size();
        store.close().unwrap();

        // Half a record header left behind by an interrupted write
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0, 0, 0, 1, 0, 0]).unwrap();
        drop(file);

        let store = open_rw(&path);
        assert_eq!(store.get(b"kept").unwrap(), Some(b"value".to_vec()));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), valid_len);
    }

    #[test]
    fn test_cut_short_record_at_end_is_dropped() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("cut.db");

        let mut store = open_rw(&path);
        store.put(b"kept", b"value").unwrap();
        let valid_len = store.file_size();
        store.close().unwrap();

        // Full header, but the write stopped inside the value
        let record = encode_record(b"lost", b"value").unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&record[..record.len() - 2]).unwrap();
        drop(file);

        let store = open_rw(&path);
        assert_eq!(store.get(b"kept").unwrap(), Some(b"value".to_vec()));
        assert!(!store.contains(b"lost"));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), valid_len);
    }

    #[test]
    fn test_damaged_length_is_corruption_and_keeps_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("damaged.db");

        let mut store = open_rw(&path);
        for key in [b"a", b"b", b"c", b"d", b"e"] {
            store.put(key, &[7]).unwrap();
        }
        store.close().unwrap();
        let len_before = std::fs::metadata(&path).unwrap().len();

        // Overwrite the key length of the first record
        let mut file = OpenOptions::new().write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(FILE_HEADER_SIZE + 4)).unwrap();
        file.write_all(&0x0010_0000u32.to_be_bytes()).unwrap();
        drop(file);

        assert!(matches!(LogStore::open(&path, StoreOptions::for_mode(AccessMode::ReadWrite)), Err(FreqError::Corruption(_))));
        assert!(matches!(open_ro(&path), Err(FreqError::Corruption(_))));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), len_before);
    }

    #[test]
    fn test_damaged_value_before_end_is_corruption() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("flipped.db");

        let mut store = open_rw(&path);
        store.put(b"first", b"1").unwrap();
        store.put(b"second", b"2").unwrap();
        store.close().unwrap();
        let len_before = std::fs::metadata(&path).unwrap().len();

        let value_offset = FILE_HEADER_SIZE + RECORD_HEADER_SIZE + b"first".len() as u64;
        let mut file = OpenOptions::new().write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(value_offset)).unwrap();
        file.write_all(b"9").unwrap();
        drop(file);

        assert!(matches!(LogStore::open(&path, StoreOptions::for_mode(AccessMode::ReadWrite)), Err(FreqError::Corruption(_))));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), len_before);
    }

    #[test]
    fn test_prefix_cursor() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = open_rw(&temp_dir.path().join("prefix.db"));
        store.put(b"ab:2", b"y").unwrap();
        store.put(b"a:1", b"x").unwrap();
        store.put(b"ab:1", b"z").unwrap();
        store.put(b"b:1", b"w").unwrap();

        let mut records: Vec<_> = store.prefix_cursor(b"ab:").unwrap().collect::<FreqResult<Vec<_>>>().unwrap();
        records.sort();
        assert_eq!(records, vec![(b"ab:1".to_vec(), b"z".to_vec()), (b"ab:2".to_vec(), b"y".to_vec())]);
        assert_eq!(store.prefix_cursor(b"c").unwrap().count(), 0);
        assert_eq!(store.prefix_cursor(b"").unwrap().count(), 4);
    }

    #[test]
    fn test_bad_magic_is_corruption() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("junk.db");
        std::fs::write(&path, b"NOTASTOREFILE").unwrap();

        assert!(matches!(LogStore::open(&path, StoreOptions::for_mode(AccessMode::ReadWrite)), Err(FreqError::Corruption(_))));
    }

    #[test]
    fn test_compaction_drops_superseded_records() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("compact.db");

        let mut store = open_rw(&path);
        for i in 0u32..100 {
            store.put(b"hot", &i.to_be_bytes()).unwrap();
        }
        store.put(b"cold", b"x").unwrap();
        let before = store.file_size();

        assert!(store.compact().unwrap());
        assert!(store.file_size() < before);
        assert_eq!(store.stats().dead_records, 0);
        assert_eq!(store.get(b"hot").unwrap(), Some(99u32.to_be_bytes().to_vec()));
        assert!(!store.compact().unwrap());

        store.put(b"after", b"y").unwrap();
        store.close().unwrap();

        let store = open_rw(&path);
        assert_eq!(store.len(), 3);
        assert_eq!(store.get(b"cold").unwrap(), Some(b"x".to_vec()));
        assert_eq!(store.get(b"after").unwrap(), Some(b"y".to_vec()));
    }

    #[test]
    fn test_refresh_sees_concurrent_appends() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("shared.db");

        let mut writer = open_rw(&path);
        writer.put(b"first", b"1").unwrap();
        writer.sync().unwrap();

        let mut reader = open_ro(&path).unwrap();
        assert_eq!(reader.len(), 1);

        writer.put(b"second", b"2").unwrap();
        writer.sync().unwrap();
        assert_eq!(reader.get(b"second").unwrap(), None);

        reader.refresh().unwrap();
        assert_eq!(reader.get(b"second").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn test_close_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = open_rw(&temp_dir.path().join("close.db"));
        store.put(b"k", b"v").unwrap();

        store.close().unwrap();
        store.close().unwrap();
        assert!(store.is_closed());
        assert_eq!(store.get(b"k").unwrap(), None);
        assert_eq!(store.cursor().unwrap().count(), 0);
    }
}
