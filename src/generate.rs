//! Key file generation for benchmarks and tests.

use std::path::Path;

use rand::Rng;

use crate::sort::{SortError, StagedOutput, DEFAULT_RW_BUF_SIZE};
use crate::{Key, KEY_BYTES};

/// Top 24 bits shared by roughly half of the biased keys.
const BIAS_STAMP: Key = 0x17F3_9D00;
const BIAS_KEEP_MASK: Key = 0x0000_00FF;

/// Fills `dst` with `bytes` bytes of uniformly random keys.
pub fn generate_unbiased(dst: &Path, bytes: u64) -> Result<(), SortError> {
    return generate_keys(dst, bytes, false);
}

/// Fills `dst` with `bytes` bytes of keys where about half share one 24-bit prefix.
///
/// The skew makes a single prefix hold far more keys than an even spread would, which
/// is the adversarial shape for histogram-balanced partitioning.
pub fn generate_biased(dst: &Path, bytes: u64) -> Result<(), SortError> {
    return generate_keys(dst, bytes, true);
}

fn generate_keys(dst: &Path, bytes: u64, biased: bool) -> Result<(), SortError> {
    if bytes % KEY_BYTES as u64 != 0 {
        return Err(SortError::InvalidFileSize {
            path: dst.to_path_buf(),
        });
    }

    let staged = StagedOutput::create(dst)?;
    let mut writer = staged.writer(DEFAULT_RW_BUF_SIZE)?;
    writer.resize(bytes)?;

    let mut rng = rand::thread_rng();
    for _ in 0..bytes / KEY_BYTES as u64 {
        let key: Key = rng.gen();
        let key = if biased && rng.gen_bool(0.5) {
            key & BIAS_KEEP_MASK | BIAS_STAMP
        } else {
            key
        };
        writer.write_key(key)?;
    }

    writer.finish()?;
    return staged.publish();
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::{generate_biased, generate_unbiased, BIAS_STAMP};
    use crate::io;
    use crate::sort::SortError;

    #[fixture]
    fn work_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[rstest]
    fn test_generate_unbiased_size(work_dir: tempfile::TempDir) {
        let path = work_dir.path().join("keys");

        generate_unbiased(&path, 4000).unwrap();

        assert_eq!(io::read_keys_file(&path).unwrap().len(), 1000);
    }

    #[rstest]
    fn test_generate_biased_stamps_about_half(work_dir: tempfile::TempDir) {
        let path = work_dir.path().join("keys");

        generate_biased(&path, 40_000).unwrap();

        let keys = io::read_keys_file(&path).unwrap();
        let stamped = keys.iter().filter(|key| *key & !0xFF == BIAS_STAMP).count();
        assert!(stamped > keys.len() / 4, "stamped={} of {}", stamped, keys.len());
    }

    #[rstest]
    fn test_generate_rejects_misaligned_size(work_dir: tempfile::TempDir) {
        let path = work_dir.path().join("keys");

        assert!(matches!(
            generate_unbiased(&path, 10),
            Err(SortError::InvalidFileSize { .. })
        ));
        assert!(!path.exists());
    }
}
