//! External key-file sorter.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;

use log;

use crate::io::SequencedWriter;
use crate::{kway, radix, split, KEY_BYTES};

/// Default memory budget in bytes.
pub const DEFAULT_MEMORY_LIMIT: u64 = 256 * 1024 * 1024;
/// Default file read/write buffer size in bytes.
pub const DEFAULT_RW_BUF_SIZE: usize = 1024 * 1024;

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// Temporary directory or file creation error.
    TempDir(io::Error),
    /// Workers thread pool initialization error.
    ThreadPool(rayon::ThreadPoolBuildError),
    /// I/O operation failure, annotated with the file it ran against.
    Io {
        /// File the failing operation was working on.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
    /// File byte length that is not a whole number of keys.
    InvalidFileSize {
        /// The misaligned file.
        path: PathBuf,
    },
    /// Malformed textual key data.
    InvalidText {
        /// The malformed file.
        path: PathBuf,
        /// 1-based line the first bad token was found on.
        line: u64,
    },
    /// Sort scratch memory could not be allocated.
    OutOfMemory,
    /// The operation stopped because another pipeline stage already failed.
    Aborted,
}

impl SortError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        return SortError::Io {
            path: path.to_path_buf(),
            source,
        };
    }
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::TempDir(err) => Some(err),
            SortError::ThreadPool(err) => Some(err),
            SortError::Io { source, .. } => Some(source),
            SortError::InvalidFileSize { .. } => None,
            SortError::InvalidText { .. } => None,
            SortError::OutOfMemory => None,
            SortError::Aborted => None,
        }
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::TempDir(err) => write!(f, "temporary directory or file not created: {}", err),
            SortError::ThreadPool(err) => write!(f, "thread pool initialization failed: {}", err),
            SortError::Io { path, source } => {
                write!(f, "I/O operation on {} failed: {}", path.display(), source)
            }
            SortError::InvalidFileSize { path } => {
                write!(f, "size of {} is not a multiple of the key width", path.display())
            }
            SortError::InvalidText { path, line } => {
                write!(
                    f,
                    "{} line {}: not an unsigned 32-bit decimal key",
                    path.display(),
                    line
                )
            }
            SortError::OutOfMemory => write!(f, "sort scratch memory allocation failed"),
            SortError::Aborted => write!(f, "sorting aborted after a failure in another stage"),
        }
    }
}

/// Sorting strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Whole file in memory at once; fastest whenever it fits.
    InMemory,
    /// Budget-sized sorted chunks merged through a binary heap.
    KWayMerge,
    /// Histogram-balanced key-space partitioning.
    BalancedSplit,
}

impl Default for Strategy {
    fn default() -> Self {
        return Strategy::BalancedSplit;
    }
}

/// Resolved configuration handed to the strategy functions.
pub(crate) struct SortOptions {
    /// Memory budget in bytes.
    pub memory_limit: u64,
    /// Number of routing/sorting worker threads.
    pub threads: usize,
    /// Scratch directory override; the destination directory when `None`.
    pub tmp_dir: Option<PathBuf>,
    /// File read/write buffer size in bytes.
    pub rw_buf_size: usize,
}

impl SortOptions {
    /// Keys one staged partition or chunk may hold: a quarter of the byte budget, which
    /// leaves room for the finishing pass's scratch buffer and the pipeline batches.
    pub fn capacity_keys(&self) -> u64 {
        return (self.memory_limit / 4 / KEY_BYTES as u64).max(1);
    }
}

/// Directory the destination file lives in.
pub(crate) fn dst_dir(dst: &Path) -> PathBuf {
    match dst.parent() {
        Some(parent) if parent != Path::new("") => return parent.to_path_buf(),
        _ => return PathBuf::from("."),
    }
}

/// Creates the scratch directory for one sort run, under the configured tmp dir or next
/// to the destination. Removed on drop, whether the sort succeeds or fails.
pub(crate) fn scratch_dir(dst: &Path, opts: &SortOptions) -> Result<tempfile::TempDir, SortError> {
    let root = match &opts.tmp_dir {
        Some(path) => path.clone(),
        None => dst_dir(dst),
    };

    let tmp_dir = tempfile::Builder::new()
        .prefix(".splitsort-")
        .tempdir_in(root)
        .map_err(|err| SortError::TempDir(err))?;
    log::info!("using {} as a temporary directory", tmp_dir.path().display());

    return Ok(tmp_dir);
}

/// Staging file next to the destination, published over it by an atomic rename.
pub(crate) struct StagedOutput {
    file: tempfile::NamedTempFile,
    dst: PathBuf,
}

impl StagedOutput {
    pub fn create(dst: &Path) -> Result<Self, SortError> {
        let file = tempfile::Builder::new()
            .prefix(".splitsort-out-")
            .tempfile_in(dst_dir(dst))
            .map_err(|err| SortError::TempDir(err))?;

        return Ok(StagedOutput {
            file,
            dst: dst.to_path_buf(),
        });
    }

    /// Writer positioned at the start of the staging file.
    pub fn writer(&self, buf_size: usize) -> Result<SequencedWriter, SortError> {
        let file = self
            .file
            .as_file()
            .try_clone()
            .map_err(|err| SortError::io(self.file.path(), err))?;
        return Ok(SequencedWriter::from_file(file, self.file.path(), buf_size));
    }

    /// Raw handle to the staging file, for non-key payloads.
    pub fn plain_file(&self) -> Result<fs::File, SortError> {
        return self
            .file
            .as_file()
            .try_clone()
            .map_err(|err| SortError::io(self.file.path(), err));
    }

    /// Renames the staging file over the destination. The destination is never touched
    /// on any earlier failure path; the staging file is removed on drop instead.
    pub fn publish(self) -> Result<(), SortError> {
        self.file
            .persist(&self.dst)
            .map_err(|err| SortError::io(&self.dst, err.error))?;
        return Ok(());
    }
}

/// Sorter builder. Provides methods for [`Sorter`] initialization.
#[derive(Clone, Default)]
pub struct SorterBuilder {
    /// Sorting strategy.
    strategy: Option<Strategy>,
    /// Memory budget in bytes shared by the sorting buffers.
    memory_limit: Option<u64>,
    /// Number of threads to be used to route data in parallel.
    threads_number: Option<usize>,
    /// Directory to be used to store temporary data.
    tmp_dir: Option<Box<Path>>,
    /// File read/write buffer size.
    rw_buf_size: Option<usize>,
}

impl SorterBuilder {
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        return SorterBuilder::default();
    }

    /// Builds a [`Sorter`] instance using provided configuration.
    pub fn build(self) -> Sorter {
        return Sorter {
            strategy: self.strategy.unwrap_or_default(),
            memory_limit: self.memory_limit.unwrap_or(DEFAULT_MEMORY_LIMIT).max(KEY_BYTES as u64),
            threads_number: self.threads_number,
            tmp_dir: self.tmp_dir,
            rw_buf_size: self.rw_buf_size.unwrap_or(DEFAULT_RW_BUF_SIZE).max(KEY_BYTES),
        };
    }

    /// Sets the sorting strategy.
    pub fn with_strategy(mut self, strategy: Strategy) -> SorterBuilder {
        self.strategy = Some(strategy);
        return self;
    }

    /// Sets the memory budget in bytes.
    pub fn with_memory_limit(mut self, memory_limit: u64) -> SorterBuilder {
        self.memory_limit = Some(memory_limit);
        return self;
    }

    /// Sets number of threads to be used to route data in parallel.
    pub fn with_threads_number(mut self, threads_number: usize) -> SorterBuilder {
        self.threads_number = Some(threads_number);
        return self;
    }

    /// Sets directory to be used to store temporary data.
    pub fn with_tmp_dir(mut self, path: &Path) -> SorterBuilder {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets file read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> SorterBuilder {
        self.rw_buf_size = Some(buf_size);
        return self;
    }
}

/// External key-file sorter.
pub struct Sorter {
    /// Sorting strategy.
    strategy: Strategy,
    /// Memory budget in bytes.
    memory_limit: u64,
    /// Worker threads override.
    threads_number: Option<usize>,
    /// Scratch directory override.
    tmp_dir: Option<Box<Path>>,
    /// File read/write buffer size.
    rw_buf_size: usize,
}

impl Sorter {
    /// Sorts the keys of `src` into `dst`.
    ///
    /// `src` and `dst` may name the same file; the destination is replaced by an atomic
    /// rename only after the whole sort has succeeded and is left untouched otherwise.
    ///
    /// # Arguments
    /// * `src` - Key file to be sorted.
    /// * `dst` - Path the sorted keys are published to.
    pub fn sort(&self, src: &Path, dst: &Path) -> Result<(), SortError> {
        let opts = SortOptions {
            memory_limit: self.memory_limit,
            threads: self.resolve_threads(),
            tmp_dir: self.tmp_dir.as_deref().map(|path| path.to_path_buf()),
            rw_buf_size: self.rw_buf_size,
        };

        log::info!(
            "sorting {} into {} ({:?} strategy, {} byte budget, {} threads)",
            src.display(),
            dst.display(),
            self.strategy,
            opts.memory_limit,
            opts.threads,
        );

        match self.strategy {
            Strategy::InMemory => return sort_in_memory(src, dst, &opts),
            Strategy::KWayMerge => return kway::sort(src, dst, &opts),
            Strategy::BalancedSplit => return split::sort(src, dst, &opts),
        }
    }

    fn resolve_threads(&self) -> usize {
        match self.threads_number {
            Some(threads) => return threads.max(1),
            None => return thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
        }
    }
}

impl Default for Sorter {
    fn default() -> Self {
        return SorterBuilder::new().build();
    }
}

/// Sorts `src` into `dst` with the default strategy and configuration.
pub fn sort(src: &Path, dst: &Path) -> Result<(), SortError> {
    return Sorter::default().sort(src, dst);
}

/// Whole file in one buffer, radix sorted over all digits, staged out.
fn sort_in_memory(src: &Path, dst: &Path, opts: &SortOptions) -> Result<(), SortError> {
    let mut keys = crate::io::read_keys_file(src)?;
    if !radix::sort_slice(&mut keys, 0, radix::TOTAL_DIGITS) {
        return Err(SortError::OutOfMemory);
    }

    let staged = StagedOutput::create(dst)?;
    let mut writer = staged.writer(opts.rw_buf_size)?;
    writer.resize((keys.len() * KEY_BYTES) as u64)?;
    writer.write_keys(&keys)?;
    writer.finish()?;
    return staged.publish();
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::path::Path;

    use rand::Rng;
    use rstest::*;

    use super::{sort, SortError, Sorter, SorterBuilder, Strategy};
    use crate::io;

    #[fixture]
    fn work_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn random_keys(count: usize) -> Vec<u32> {
        let mut rng = rand::thread_rng();
        return Vec::from_iter((0..count).map(|_| rng.gen()));
    }

    fn small_sorter(strategy: Strategy, tmp: &Path) -> Sorter {
        return SorterBuilder::new()
            .with_strategy(strategy)
            .with_memory_limit(4096)
            .with_threads_number(2)
            .with_tmp_dir(tmp)
            .with_rw_buf_size(8192)
            .build();
    }

    #[rstest]
    #[case(Strategy::InMemory)]
    #[case(Strategy::KWayMerge)]
    #[case(Strategy::BalancedSplit)]
    fn test_sort_is_an_ordered_permutation(#[case] strategy: Strategy, work_dir: tempfile::TempDir) {
        let src = work_dir.path().join("input");
        let dst = work_dir.path().join("output");

        let keys = random_keys(10_000);
        io::write_keys_file(&src, &keys).unwrap();

        small_sorter(strategy, work_dir.path()).sort(&src, &dst).unwrap();

        let mut expected = keys.clone();
        expected.sort_unstable();
        assert_eq!(io::read_keys_file(&dst).unwrap(), expected);
        // The source stays what it was when sorting into a different file.
        assert_eq!(io::read_keys_file(&src).unwrap(), keys);
    }

    #[rstest]
    #[case(Strategy::InMemory)]
    #[case(Strategy::KWayMerge)]
    #[case(Strategy::BalancedSplit)]
    fn test_sort_in_place(#[case] strategy: Strategy, work_dir: tempfile::TempDir) {
        let path = work_dir.path().join("keys");

        let keys = random_keys(10_000);
        io::write_keys_file(&path, &keys).unwrap();

        small_sorter(strategy, work_dir.path()).sort(&path, &path).unwrap();

        let mut expected = keys;
        expected.sort_unstable();
        assert_eq!(io::read_keys_file(&path).unwrap(), expected);
    }

    #[rstest]
    #[case(Strategy::InMemory)]
    #[case(Strategy::KWayMerge)]
    #[case(Strategy::BalancedSplit)]
    fn test_sort_empty_and_single_key_files(#[case] strategy: Strategy, work_dir: tempfile::TempDir) {
        let src = work_dir.path().join("input");
        let dst = work_dir.path().join("output");

        io::write_keys_file(&src, &[]).unwrap();
        small_sorter(strategy, work_dir.path()).sort(&src, &dst).unwrap();
        assert_eq!(io::read_keys_file(&dst).unwrap(), Vec::<u32>::new());

        io::write_keys_file(&src, &[42]).unwrap();
        small_sorter(strategy, work_dir.path()).sort(&src, &dst).unwrap();
        assert_eq!(io::read_keys_file(&dst).unwrap(), vec![42]);
    }

    #[rstest]
    #[case(Strategy::KWayMerge)]
    #[case(Strategy::BalancedSplit)]
    fn test_sort_is_idempotent(#[case] strategy: Strategy, work_dir: tempfile::TempDir) {
        let src = work_dir.path().join("input");
        let once = work_dir.path().join("once");
        let twice = work_dir.path().join("twice");

        io::write_keys_file(&src, &random_keys(10_000)).unwrap();

        let sorter = small_sorter(strategy, work_dir.path());
        sorter.sort(&src, &once).unwrap();
        sorter.sort(&once, &twice).unwrap();

        assert_eq!(fs::read(&once).unwrap(), fs::read(&twice).unwrap());
    }

    #[rstest]
    fn test_sort_single_repeated_key_run(work_dir: tempfile::TempDir) {
        let src = work_dir.path().join("input");
        let dst = work_dir.path().join("output");

        // One over-capacity prefix: the whole run goes through suffix counting.
        let keys = vec![0x17F3_9D42u32; 100_000];
        io::write_keys_file(&src, &keys).unwrap();

        small_sorter(Strategy::BalancedSplit, work_dir.path()).sort(&src, &dst).unwrap();

        assert_eq!(io::read_keys_file(&dst).unwrap(), keys);
    }

    #[rstest]
    #[case(Strategy::InMemory)]
    #[case(Strategy::KWayMerge)]
    #[case(Strategy::BalancedSplit)]
    fn test_sort_rejects_misaligned_file_and_keeps_destination(
        #[case] strategy: Strategy,
        work_dir: tempfile::TempDir,
    ) {
        let src = work_dir.path().join("truncated");
        let dst = work_dir.path().join("output");

        fs::write(&src, [1u8, 2, 3, 4, 5]).unwrap();
        fs::write(&dst, b"untouched").unwrap();

        let result = small_sorter(strategy, work_dir.path()).sort(&src, &dst);

        match result {
            Err(SortError::InvalidFileSize { path }) => assert_eq!(path, src),
            other => panic!("expected an invalid size error, got {:?}", other),
        }
        assert_eq!(fs::read(&dst).unwrap(), b"untouched");
    }

    #[rstest]
    #[case(Strategy::InMemory)]
    #[case(Strategy::KWayMerge)]
    #[case(Strategy::BalancedSplit)]
    fn test_sort_missing_source_reports_io_error(
        #[case] strategy: Strategy,
        work_dir: tempfile::TempDir,
    ) {
        let src = work_dir.path().join("missing");
        let dst = work_dir.path().join("output");

        let result = small_sorter(strategy, work_dir.path()).sort(&src, &dst);

        assert!(matches!(result, Err(SortError::Io { .. })));
    }

    #[rstest]
    fn test_default_sort_function(work_dir: tempfile::TempDir) {
        let src = work_dir.path().join("input");
        let dst = work_dir.path().join("output");

        let keys = random_keys(1000);
        io::write_keys_file(&src, &keys).unwrap();

        sort(&src, &dst).unwrap();

        let mut expected = keys;
        expected.sort_unstable();
        assert_eq!(io::read_keys_file(&dst).unwrap(), expected);
    }
}
