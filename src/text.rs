//! Decimal text converters for key files.

use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::io::SequencedReader;
use crate::sort::{SortError, StagedOutput, DEFAULT_RW_BUF_SIZE};
use crate::Key;

const BATCH_KEYS: usize = 64 * 1024;

/// Parses whitespace-separated decimal keys from `src` into the flat binary layout
/// at `dst`.
///
/// The first token that is not an unsigned 32-bit decimal fails the conversion with
/// its 1-based line number and leaves `dst` untouched.
pub fn text_to_keys(src: &Path, dst: &Path) -> Result<(), SortError> {
    let file = fs::File::open(src).map_err(|err| SortError::io(src, err))?;
    let reader = BufReader::with_capacity(DEFAULT_RW_BUF_SIZE, file);

    let staged = StagedOutput::create(dst)?;
    let mut writer = staged.writer(DEFAULT_RW_BUF_SIZE)?;

    for (number, line) in reader.lines().enumerate() {
        let line = line.map_err(|err| SortError::io(src, err))?;
        for token in line.split_whitespace() {
            let key: Key = token.parse().map_err(|_| SortError::InvalidText {
                path: src.to_path_buf(),
                line: number as u64 + 1,
            })?;
            writer.write_key(key)?;
        }
    }

    writer.finish()?;
    return staged.publish();
}

/// Renders the keys of `src` as decimal text at `dst`, one key per line.
pub fn keys_to_text(src: &Path, dst: &Path) -> Result<(), SortError> {
    let mut reader = SequencedReader::open(src, DEFAULT_RW_BUF_SIZE)?;
    reader.check_aligned()?;

    let staged = StagedOutput::create(dst)?;
    let mut out = BufWriter::with_capacity(DEFAULT_RW_BUF_SIZE, staged.plain_file()?);

    let mut batch = Vec::new();
    while reader.read_batch(&mut batch, BATCH_KEYS)? {
        for &key in &batch {
            writeln!(out, "{}", key).map_err(|err| SortError::io(dst, err))?;
        }
    }

    out.flush().map_err(|err| SortError::io(dst, err))?;
    drop(out);
    return staged.publish();
}
