//! Buffered and memory-mapped access to flat key files.
//!
//! A key file is a raw array of native-byte-order `u32` values. Every reader in this module
//! treats a byte length that is not a multiple of the key width as [`SortError::InvalidFileSize`].

use std::fs;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::slice;

use memmap2;

use crate::sort::SortError;
use crate::{Key, KEY_BYTES};

/// Raw byte view of a key slice, matching the on-disk layout.
pub(crate) fn keys_as_bytes(keys: &[Key]) -> &[u8] {
    // u32 to u8 reinterpretation: alignment only weakens and every byte pattern is valid.
    unsafe { slice::from_raw_parts(keys.as_ptr().cast(), keys.len() * KEY_BYTES) }
}

fn keys_as_bytes_mut(keys: &mut [Key]) -> &mut [u8] {
    unsafe { slice::from_raw_parts_mut(keys.as_mut_ptr().cast(), keys.len() * KEY_BYTES) }
}

/// Buffered sequential reader over a key file.
pub struct SequencedReader {
    inner: BufReader<fs::File>,
    path: PathBuf,
    len: u64,
}

impl SequencedReader {
    /// Opens `path` for sequential key reads.
    ///
    /// # Arguments
    /// * `path` - Key file to be read.
    /// * `buf_size` - Read buffer size in bytes.
    pub fn open(path: &Path, buf_size: usize) -> Result<Self, SortError> {
        let file = fs::File::open(path).map_err(|err| SortError::io(path, err))?;
        let len = file.metadata().map_err(|err| SortError::io(path, err))?.len();

        return Ok(SequencedReader {
            inner: BufReader::with_capacity(buf_size, file),
            path: path.to_path_buf(),
            len,
        });
    }

    /// File length in bytes at open time.
    pub fn len(&self) -> u64 {
        return self.len;
    }

    /// Checks whether the file held any bytes at open time.
    pub fn is_empty(&self) -> bool {
        return self.len == 0;
    }

    /// Checks that the file holds a whole number of keys.
    pub fn check_aligned(&self) -> Result<(), SortError> {
        if self.len % KEY_BYTES as u64 != 0 {
            return Err(SortError::InvalidFileSize {
                path: self.path.clone(),
            });
        }
        return Ok(());
    }

    /// Reads up to `max_keys` keys into `out`, replacing its previous contents.
    /// Returns `false` once the file is exhausted and nothing was read.
    pub fn read_batch(&mut self, out: &mut Vec<Key>, max_keys: usize) -> Result<bool, SortError> {
        out.clear();
        out.resize(max_keys, 0);

        let filled = self.fill(keys_as_bytes_mut(out))?;
        if filled % KEY_BYTES != 0 {
            return Err(SortError::InvalidFileSize {
                path: self.path.clone(),
            });
        }

        out.truncate(filled / KEY_BYTES);
        return Ok(!out.is_empty());
    }

    /// Reads the next key, `None` at end of file.
    pub fn read_key(&mut self) -> Result<Option<Key>, SortError> {
        let mut bytes = [0u8; KEY_BYTES];

        let filled = self.fill(&mut bytes)?;
        if filled == 0 {
            return Ok(None);
        }
        if filled != KEY_BYTES {
            return Err(SortError::InvalidFileSize {
                path: self.path.clone(),
            });
        }

        return Ok(Some(Key::from_ne_bytes(bytes)));
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<usize, SortError> {
        let mut filled = 0;

        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(read) => filled += read,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(SortError::io(&self.path, err)),
            }
        }

        return Ok(filled);
    }
}

/// Buffered sequential writer over a key file.
pub struct SequencedWriter {
    inner: BufWriter<fs::File>,
    path: PathBuf,
}

impl SequencedWriter {
    /// Creates (or truncates) `path` for sequential key writes.
    ///
    /// # Arguments
    /// * `path` - Destination file.
    /// * `buf_size` - Write buffer size in bytes.
    pub fn create(path: &Path, buf_size: usize) -> Result<Self, SortError> {
        let file = fs::File::create(path).map_err(|err| SortError::io(path, err))?;
        return Ok(Self::from_file(file, path, buf_size));
    }

    /// Wraps an already open file positioned at its start.
    pub fn from_file(file: fs::File, path: &Path, buf_size: usize) -> Self {
        return SequencedWriter {
            inner: BufWriter::with_capacity(buf_size, file),
            path: path.to_path_buf(),
        };
    }

    /// Presizes the file to `len` bytes. Must be called before the first write.
    pub fn resize(&mut self, len: u64) -> Result<(), SortError> {
        self.inner
            .get_ref()
            .set_len(len)
            .map_err(|err| SortError::io(&self.path, err))?;
        return Ok(());
    }

    /// Appends a batch of keys.
    pub fn write_keys(&mut self, keys: &[Key]) -> Result<(), SortError> {
        self.inner
            .write_all(keys_as_bytes(keys))
            .map_err(|err| SortError::io(&self.path, err))?;
        return Ok(());
    }

    /// Appends one key.
    pub fn write_key(&mut self, key: Key) -> Result<(), SortError> {
        self.inner
            .write_all(&key.to_ne_bytes())
            .map_err(|err| SortError::io(&self.path, err))?;
        return Ok(());
    }

    /// Flushes buffered data and releases the handle.
    pub fn finish(mut self) -> Result<(), SortError> {
        self.inner.flush().map_err(|err| SortError::io(&self.path, err))?;
        return Ok(());
    }
}

/// Loads a whole key file into memory through a read-only mapping.
///
/// The mapping is dropped before this function returns, so the caller may remap or rewrite
/// the same file afterwards. The in-memory copy is allocated fallibly and an allocation
/// failure is reported as [`SortError::OutOfMemory`].
pub fn read_keys_file(path: &Path) -> Result<Vec<Key>, SortError> {
    let file = fs::File::open(path).map_err(|err| SortError::io(path, err))?;
    let len = file.metadata().map_err(|err| SortError::io(path, err))?.len();
    if len % KEY_BYTES as u64 != 0 {
        return Err(SortError::InvalidFileSize {
            path: path.to_path_buf(),
        });
    }

    let count = (len / KEY_BYTES as u64) as usize;
    let mut keys: Vec<Key> = Vec::new();
    if keys.try_reserve_exact(count).is_err() {
        return Err(SortError::OutOfMemory);
    }
    keys.resize(count, 0);

    if len > 0 {
        // The OS rejects zero-length mappings.
        let map = unsafe { memmap2::Mmap::map(&file) }.map_err(|err| SortError::io(path, err))?;
        keys_as_bytes_mut(&mut keys).copy_from_slice(&map);
    }

    return Ok(keys);
}

/// Writes a key slice as a whole file through a writable mapping, truncating whatever
/// the file held before.
pub fn write_keys_file(path: &Path, keys: &[Key]) -> Result<(), SortError> {
    let file = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(path)
        .map_err(|err| SortError::io(path, err))?;
    file.set_len((keys.len() * KEY_BYTES) as u64)
        .map_err(|err| SortError::io(path, err))?;

    if keys.is_empty() {
        return Ok(());
    }

    let mut map = unsafe { memmap2::MmapMut::map_mut(&file) }.map_err(|err| SortError::io(path, err))?;
    map.copy_from_slice(keys_as_bytes(keys));
    map.flush().map_err(|err| SortError::io(path, err))?;

    return Ok(());
}
