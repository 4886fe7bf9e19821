//! External sorter.

use log;
use std::error::Error;
use std::fmt;
use std::fmt::{Debug, Display};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use sysinfo::{System, SystemExt};

use crate::merger::{BinaryHeapMerger, MergeSource};
use crate::reader::{ReadError, RecordReader};
use crate::record::{FormatError, Record, MAX_LINE_LEN};
use crate::writer::RecordWriter;

/// Default physical read buffer size.
pub const READ_BUF_SIZE: usize = 10 * 1024 * 1024;

const MEMORY_LIMIT_THRESHOLD: f64 = 0.8;
const MEMORY_RESERVE: u64 = 4 * 1024 * 1024 * 1024;

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// Input file is missing or unreadable. Checked before any sizing or I/O.
    Input(PathBuf, io::Error),
    /// Temporary directory or file creation error.
    TempDir(io::Error),
    /// Workers thread pool initialization error.
    ThreadPoolBuild(rayon::ThreadPoolBuildError),
    /// Common I/O error.
    Io(io::Error),
    /// Malformed input line. Aborts the run, partial output is not rolled back.
    Format(FormatError),
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(match self {
            SortError::Input(_, err) => err,
            SortError::TempDir(err) => err,
            SortError::ThreadPoolBuild(err) => err,
            SortError::Io(err) => err,
            SortError::Format(err) => err,
        })
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortError::Input(path, err) => write!(f, "input file {} not readable: {}", path.display(), err),
            SortError::TempDir(err) => write!(f, "temporary directory or file not created: {}", err),
            SortError::ThreadPoolBuild(err) => write!(f, "thread pool initialization failed: {}", err),
            SortError::Io(err) => write!(f, "I/O operation failed: {}", err),
            SortError::Format(err) => write!(f, "malformed input: {}", err),
        }
    }
}

impl From<io::Error> for SortError {
    fn from(err: io::Error) -> Self {
        SortError::Io(err)
    }
}

impl From<ReadError> for SortError {
    fn from(err: ReadError) -> Self {
        match err {
            ReadError::Io(err) => SortError::Io(err),
            ReadError::Format(err) => SortError::Format(err),
        }
    }
}

/// Sizes chosen for one run. Computed once after the input is inspected and
/// immutable afterwards.
#[derive(Debug, Clone, Copy)]
struct Sizing {
    memory_limit: u64,
    block_size: u64,
    block_count: u64,
}

/// External sorter builder. Provides methods for [`Sorter`] initialization.
#[derive(Default, Clone)]
pub struct SorterBuilder {
    /// Number of threads to be used to sort blocks in parallel.
    threads_number: Option<usize>,
    /// Directory to be used to store temporary data.
    tmp_dir: Option<Box<Path>>,
    /// Memory limit in bytes. Clamped against available system memory.
    memory_limit: Option<u64>,
    /// Block size in bytes. Clamped against the memory limit.
    block_size: Option<u64>,
    /// Physical read buffer size.
    read_buf_size: Option<usize>,
}

impl SorterBuilder {
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        SorterBuilder::default()
    }

    /// Sets number of threads to be used to sort blocks in parallel.
    pub fn with_threads_number(mut self, threads_number: usize) -> SorterBuilder {
        self.threads_number = Some(threads_number);
        return self;
    }

    /// Sets directory to be used to store temporary data.
    pub fn with_tmp_dir(mut self, path: &Path) -> SorterBuilder {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets the memory limit in bytes.
    pub fn with_memory_limit(mut self, memory_limit: u64) -> SorterBuilder {
        self.memory_limit = Some(memory_limit);
        return self;
    }

    /// Sets the block size in bytes.
    pub fn with_block_size(mut self, block_size: u64) -> SorterBuilder {
        self.block_size = Some(block_size);
        return self;
    }

    /// Sets the physical read buffer size.
    pub fn with_read_buf_size(mut self, read_buf_size: usize) -> SorterBuilder {
        self.read_buf_size = Some(read_buf_size);
        return self;
    }

    /// Builds a [`Sorter`] instance using provided configuration.
    pub fn build(self) -> Result<Sorter, SortError> {
        Sorter::new(
            self.threads_number,
            self.tmp_dir.as_deref(),
            self.memory_limit,
            self.block_size,
            self.read_buf_size,
        )
    }
}

/// External sorter.
///
/// Splits the input into blocks that fit the memory budget, sorts each block
/// in memory, spills the blocks to temporary files and merges them into the
/// output. A single run never holds more than one block of records plus the
/// bounded merge lookaheads.
pub struct Sorter {
    /// Block sorting thread pool.
    thread_pool: rayon::ThreadPool,
    /// Directory holding the spilled block files. Removed on drop.
    tmp_dir: tempfile::TempDir,
    memory_limit: Option<u64>,
    block_size: Option<u64>,
    read_buf_size: usize,
}

impl Sorter {
    /// Creates a new external sorter instance.
    ///
    /// # Arguments
    /// * `threads_number` - Number of threads to be used to sort blocks in parallel. If the parameter is [`None`]
    ///   threads number will be selected based on available CPU core number.
    /// * `tmp_path` - Directory to be used to store temporary data. If parameter is [`None`] default OS temporary
    ///   directory will be used.
    /// * `memory_limit` - Memory limit in bytes. If the parameter is [`None`] or exceeds the auto-detected limit
    ///   the limit is derived from available system memory.
    /// * `block_size` - Block size in bytes. If the parameter is [`None`] or exceeds the memory limit the size is
    ///   derived from the input length and the memory limit.
    /// * `read_buf_size` - Physical read buffer size.
    pub fn new(
        threads_number: Option<usize>,
        tmp_path: Option<&Path>,
        memory_limit: Option<u64>,
        block_size: Option<u64>,
        read_buf_size: Option<usize>,
    ) -> Result<Self, SortError> {
        return Ok(Sorter {
            memory_limit,
            block_size,
            read_buf_size: read_buf_size.unwrap_or(READ_BUF_SIZE),
            thread_pool: Self::init_thread_pool(threads_number)?,
            tmp_dir: Self::init_tmp_directory(tmp_path)?,
        });
    }

    fn init_thread_pool(threads_number: Option<usize>) -> Result<rayon::ThreadPool, SortError> {
        let mut thread_pool_builder = rayon::ThreadPoolBuilder::new();

        if let Some(threads_number) = threads_number {
            log::info!("initializing thread-pool (threads: {})", threads_number);
            thread_pool_builder = thread_pool_builder.num_threads(threads_number);
        } else {
            log::info!("initializing thread-pool (threads: default)");
        }
        let thread_pool = thread_pool_builder.build().map_err(SortError::ThreadPoolBuild)?;

        return Ok(thread_pool);
    }

    fn init_tmp_directory(tmp_path: Option<&Path>) -> Result<tempfile::TempDir, SortError> {
        let tmp_dir = if let Some(tmp_path) = tmp_path {
            fs::create_dir_all(tmp_path).map_err(SortError::TempDir)?;
            tempfile::tempdir_in(tmp_path)
        } else {
            tempfile::tempdir()
        }
        .map_err(SortError::TempDir)?;

        log::info!("using {} as a temporary directory", tmp_dir.path().display());

        return Ok(tmp_dir);
    }

    /// Sorts `input` into `output`.
    ///
    /// An input that fits a single block is sorted in memory and written out
    /// directly; anything larger goes through the split and merge stages.
    pub fn sort(&self, input: &Path, output: &Path) -> Result<(), SortError> {
        let input_len = fs::metadata(input)
            .map_err(|err| SortError::Input(input.to_path_buf(), err))?
            .len();

        let sizing = self.compute_sizing(input_len);
        log::info!(
            "input size: {} bytes, memory limit: {} bytes, block size: {} bytes, block count: {}",
            input_len,
            sizing.memory_limit,
            sizing.block_size,
            sizing.block_count,
        );

        if sizing.block_count == 1 {
            log::info!("single block sort stage");
            self.sort_single_block(input, output, sizing)
        } else {
            log::info!("split and sort stage");
            let block_files = self.split_and_sort(input, sizing)?;
            log::info!("merge stage ({} blocks)", block_files.len());
            self.merge(&block_files, output, sizing)
        }
    }

    fn compute_sizing(&self, input_len: u64) -> Sizing {
        let auto_limit = system_memory_limit();
        let memory_limit = match self.memory_limit {
            Some(limit) if limit <= auto_limit => limit,
            _ => auto_limit,
        };

        let block_size = match self.block_size {
            Some(size) if size <= memory_limit => size,
            _ => input_len.min(memory_limit),
        };
        let block_size = block_size.max(MAX_LINE_LEN as u64);

        let block_count = input_len.div_ceil(block_size).max(1);

        Sizing {
            memory_limit,
            block_size,
            block_count,
        }
    }

    fn sort_single_block(&self, input: &Path, output: &Path, sizing: Sizing) -> Result<(), SortError> {
        let mut reader = self.open_input(input, sizing)?;
        let mut records = reader.read_block(sizing.block_size)?;
        self.thread_pool.install(|| records.par_sort());

        let mut writer = RecordWriter::new(fs::File::create(output)?);
        writer.write_batch(&records)?;
        writer.flush()?;

        return Ok(());
    }

    fn split_and_sort(&self, input: &Path, sizing: Sizing) -> Result<Vec<PathBuf>, SortError> {
        let mut reader = self.open_input(input, sizing)?;
        let mut block_files = Vec::with_capacity(sizing.block_count as usize);

        for index in 1.. {
            let mut records = reader.read_block(sizing.block_size)?;
            if records.is_empty() {
                break;
            }

            self.thread_pool.install(|| records.par_sort());

            let path = self.tmp_dir.path().join(format!("block_{}", index));
            let mut writer = RecordWriter::new(fs::File::create(&path).map_err(SortError::TempDir)?);
            writer.write_batch(&records)?;
            writer.flush()?;

            log::debug!("block {} sorted and spilled ({} records)", index, records.len());
            block_files.push(path);
        }

        return Ok(block_files);
    }

    fn merge(&self, block_files: &[PathBuf], output: &Path, sizing: Sizing) -> Result<(), SortError> {
        // one budget share per source plus one for the buffered output
        let chunk_budget = (sizing.block_size / (sizing.block_count + 1)).max(MAX_LINE_LEN as u64);

        let mut sources = Vec::with_capacity(block_files.len());
        for path in block_files {
            let reader = RecordReader::new(fs::File::open(path)?, chunk_budget as usize);
            sources.push(MergeSource::new(reader, chunk_budget));
        }

        let mut writer = RecordWriter::new(fs::File::create(output)?);
        let mut buffered: Vec<Record> = Vec::new();
        let mut buffered_bytes = 0u64;

        for record in BinaryHeapMerger::new(sources) {
            let record = record?;
            buffered_bytes += record.byte_len() as u64;
            buffered.push(record);

            if buffered_bytes >= chunk_budget {
                writer.write_batch(&buffered)?;
                buffered.clear();
                buffered_bytes = 0;
            }
        }

        if !buffered.is_empty() {
            writer.write_batch(&buffered)?;
        }
        writer.flush()?;

        return Ok(());
    }

    fn open_input(&self, input: &Path, sizing: Sizing) -> Result<RecordReader<fs::File>, SortError> {
        let file = fs::File::open(input).map_err(|err| SortError::Input(input.to_path_buf(), err))?;
        let buf_size = (self.read_buf_size as u64).min(sizing.block_size) as usize;

        return Ok(RecordReader::new(file, buf_size));
    }
}

fn system_memory_limit() -> u64 {
    let mut system = System::new();
    system.refresh_memory();
    let total = system.total_memory();

    ((total as f64 * MEMORY_LIMIT_THRESHOLD) as u64).max(total.saturating_sub(MEMORY_RESERVE))
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::path::Path;

    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use rstest::*;

    use super::{SortError, SorterBuilder};
    use crate::reader::RecordReader;
    use crate::record::Record;
    use crate::writer::RecordWriter;

    fn write_input(path: &Path, records: &[Record]) {
        let mut writer = RecordWriter::new(fs::File::create(path).unwrap());
        writer.write_batch(records).unwrap();
        writer.flush().unwrap();
    }

    fn read_all(path: &Path) -> Vec<Record> {
        let len = fs::metadata(path).unwrap().len();
        let mut reader = RecordReader::new(fs::File::open(path).unwrap(), 4096);
        reader.read_block(len + 1).unwrap()
    }

    fn shuffled_records(count: i64) -> Vec<Record> {
        let mut records: Vec<Record> = (0..count)
            .map(|i| Record::new(i % 100, format!("payload {:06}", i).into_bytes()))
            .collect();
        records.shuffle(&mut StdRng::seed_from_u64(42));
        records
    }

    #[rstest]
    #[case::single_block(1 << 20)]
    #[case::split_and_merge(256)]
    #[case::many_small_blocks(64)]
    fn test_sort(#[case] block_size: u64) {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.txt");
        let output = dir.path().join("output.txt");

        let records = shuffled_records(500);
        write_input(&input, &records);

        let sorter = SorterBuilder::new()
            .with_tmp_dir(dir.path())
            .with_block_size(block_size)
            .with_threads_number(2)
            .build()
            .unwrap();
        sorter.sort(&input, &output).unwrap();

        let mut expected = records;
        expected.sort();
        assert_eq!(read_all(&output), expected);
    }

    #[test]
    fn test_sort_single_and_split_agree() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.txt");
        let single = dir.path().join("single.txt");
        let split = dir.path().join("split.txt");

        write_input(&input, &shuffled_records(300));

        let whole_file = SorterBuilder::new().with_tmp_dir(dir.path()).build().unwrap();
        whole_file.sort(&input, &single).unwrap();

        let blocks = SorterBuilder::new()
            .with_tmp_dir(dir.path())
            .with_block_size(512)
            .build()
            .unwrap();
        blocks.sort(&input, &split).unwrap();

        assert_eq!(fs::read(&single).unwrap(), fs::read(&split).unwrap());
    }

    #[test]
    fn test_sort_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.txt");
        let once = dir.path().join("once.txt");
        let twice = dir.path().join("twice.txt");

        write_input(&input, &shuffled_records(200));

        let sorter = SorterBuilder::new()
            .with_tmp_dir(dir.path())
            .with_block_size(512)
            .build()
            .unwrap();
        sorter.sort(&input, &once).unwrap();
        sorter.sort(&once, &twice).unwrap();

        assert_eq!(fs::read(&once).unwrap(), fs::read(&twice).unwrap());
    }

    #[test]
    fn test_sort_tiny_input_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.txt");
        let output = dir.path().join("output.txt");
        fs::write(&input, b"1. a\r\n").unwrap();

        let sorter = SorterBuilder::new().with_tmp_dir(dir.path()).build().unwrap();
        sorter.sort(&input, &output).unwrap();

        assert_eq!(fs::read(&output).unwrap(), b"1. a\r\n");
    }

    #[test]
    fn test_sort_empty_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.txt");
        let output = dir.path().join("output.txt");
        fs::write(&input, b"").unwrap();

        let sorter = SorterBuilder::new().with_tmp_dir(dir.path()).build().unwrap();
        sorter.sort(&input, &output).unwrap();

        assert_eq!(fs::read(&output).unwrap(), b"");
    }

    #[test]
    fn test_sort_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let sorter = SorterBuilder::new().with_tmp_dir(dir.path()).build().unwrap();

        let result = sorter.sort(&dir.path().join("absent.txt"), &dir.path().join("output.txt"));
        assert!(matches!(result, Err(SortError::Input(_, _))));
    }

    #[test]
    fn test_sort_malformed_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.txt");
        let output = dir.path().join("output.txt");
        fs::write(&input, b"1. fine\r\nnot a record\r\n").unwrap();

        let sorter = SorterBuilder::new().with_tmp_dir(dir.path()).build().unwrap();
        let result = sorter.sort(&input, &output);
        assert!(matches!(result, Err(SortError::Format(_))));
    }
}
