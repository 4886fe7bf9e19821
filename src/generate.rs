//! Test data file generator.
//!
//! Produces well-formed input files through the same record codec the sorter
//! parses, with a configurable share of duplicated payloads.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io;
use std::io::prelude::*;
use std::path::Path;

use rand::prelude::*;
use rayon::prelude::*;

use crate::record::{Record, MAX_DATA_LEN, MAX_LINE_LEN, MAX_NUMBER_DIGITS, SEPARATOR, TERMINATOR};

/// Payload alphabet.
pub const ALLOWED_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789 ";
/// Alphabet for the first payload byte.
pub const ALLOWED_FIRST_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

const MAX_DUPLICATE_POOL: usize = 10_000;
/// Bytes generated by one parallel task.
const TASK_BYTES: u64 = 1024 * 1024;

/// Generation error.
#[derive(Debug)]
pub enum GenerateError {
    /// An option is out of its allowed range.
    InvalidOptions(String),
    /// Output file error.
    Io(io::Error),
}

impl Error for GenerateError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            GenerateError::InvalidOptions(_) => None,
            GenerateError::Io(err) => Some(err),
        }
    }
}

impl Display for GenerateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerateError::InvalidOptions(reason) => write!(f, "invalid generation options: {}", reason),
            GenerateError::Io(err) => write!(f, "I/O operation failed: {}", err),
        }
    }
}

impl From<io::Error> for GenerateError {
    fn from(err: io::Error) -> Self {
        GenerateError::Io(err)
    }
}

/// Test file generation options.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    /// Target file size in bytes. The result may overshoot by the records
    /// that were in flight when the target was reached.
    pub size: u64,
    /// Maximum payload length, `1..=2048`.
    pub max_data_len: usize,
    /// Probability of drawing the payload from the pre-generated duplicate pool.
    pub duplicates_ratio: f64,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        GenerateOptions {
            size: 0,
            max_data_len: 1024,
            duplicates_ratio: 0.01,
        }
    }
}

impl GenerateOptions {
    fn validate(&self) -> Result<(), GenerateError> {
        if self.size == 0 {
            return Err(GenerateError::InvalidOptions("size must be positive".into()));
        }
        if self.max_data_len == 0 || self.max_data_len > MAX_DATA_LEN {
            return Err(GenerateError::InvalidOptions(format!(
                "max data length must be within 1..={}",
                MAX_DATA_LEN
            )));
        }
        if !(0.0..=1.0).contains(&self.duplicates_ratio) {
            return Err(GenerateError::InvalidOptions(
                "duplicates ratio must be within 0.0..=1.0".into(),
            ));
        }
        Ok(())
    }
}

/// Totals of one generation run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GenerateStats {
    pub records: u64,
    pub bytes: u64,
    pub duplicates: u64,
}

impl GenerateStats {
    fn merge(&mut self, other: GenerateStats) {
        self.records += other.records;
        self.bytes += other.bytes;
        self.duplicates += other.duplicates;
    }
}

/// Generates a record file of roughly `options.size` bytes at `path`.
///
/// Batches are produced by parallel tasks, each with its own RNG, output
/// buffer and local counters; the driver writes finished batches sequentially
/// and aggregates the counters once the tasks complete.
pub fn generate_file(path: &Path, options: &GenerateOptions) -> Result<GenerateStats, GenerateError> {
    options.validate()?;

    let duplicate_pool = build_duplicate_pool(options);
    log::info!(
        "generating {} bytes into {} (duplicate pool: {} payloads)",
        options.size,
        path.display(),
        duplicate_pool.len(),
    );

    let mut file = fs::File::create(path)?;
    let mut stats = GenerateStats::default();

    while stats.bytes < options.size {
        let remaining = options.size - stats.bytes;
        let round_total = remaining.min(rayon::current_num_threads() as u64 * TASK_BYTES);
        let task_count = round_total.div_ceil(TASK_BYTES);
        let task_budget = round_total.div_ceil(task_count);

        let batches: Vec<(Vec<u8>, GenerateStats)> = (0..task_count)
            .into_par_iter()
            .map(|_| generate_batch(task_budget, options, &duplicate_pool))
            .collect();

        for (buffer, batch_stats) in batches {
            file.write_all(&buffer)?;
            stats.merge(batch_stats);
        }
    }

    file.flush()?;
    log::info!(
        "generated {} records, {} bytes, {} duplicate payloads",
        stats.records,
        stats.bytes,
        stats.duplicates,
    );

    return Ok(stats);
}

fn generate_batch(byte_budget: u64, options: &GenerateOptions, duplicate_pool: &[Box<[u8]>]) -> (Vec<u8>, GenerateStats) {
    let mut rng = rand::thread_rng();
    let mut buf = Vec::with_capacity(byte_budget as usize + MAX_LINE_LEN);
    let mut stats = GenerateStats::default();

    while (buf.len() as u64) < byte_budget {
        let take_duplicate = !duplicate_pool.is_empty() && rng.gen_bool(options.duplicates_ratio);
        let record = if take_duplicate {
            stats.duplicates += 1;
            Record::new(random_number(&mut rng), duplicate_pool[rng.gen_range(0..duplicate_pool.len())].clone())
        } else {
            Record::new(random_number(&mut rng), random_payload(&mut rng, options.max_data_len))
        };

        let start = buf.len();
        buf.resize(start + record.byte_len(), 0);
        record.write_to(&mut buf[start..]);
        stats.records += 1;
    }

    stats.bytes = buf.len() as u64;
    (buf, stats)
}

fn build_duplicate_pool(options: &GenerateOptions) -> Vec<Box<[u8]>> {
    let overhead = MAX_NUMBER_DIGITS + SEPARATOR.len() + TERMINATOR.len();
    let median_line_len = (options.max_data_len.saturating_sub(1) / 2 + overhead) as u64;
    let approx_records = options.size / median_line_len.max(1);
    let pool_size = ((approx_records as f64 * options.duplicates_ratio) as usize).min(MAX_DUPLICATE_POOL);

    let mut rng = rand::thread_rng();
    (0..pool_size)
        .map(|_| random_payload(&mut rng, options.max_data_len))
        .collect()
}

/// Skewed towards small values, zero included; duplicates across records are
/// expected and break no invariant since the payload leads the record order.
fn random_number(rng: &mut impl Rng) -> i64 {
    (0..4).map(|_| rng.gen_range(0..1000i64)).product()
}

fn random_payload(rng: &mut impl Rng, max_data_len: usize) -> Box<[u8]> {
    let len = rng.gen_range(1..=max_data_len);
    let mut payload = Vec::with_capacity(len);

    payload.push(ALLOWED_FIRST_CHARS[rng.gen_range(0..ALLOWED_FIRST_CHARS.len())]);
    for _ in 1..len {
        payload.push(ALLOWED_CHARS[rng.gen_range(0..ALLOWED_CHARS.len())]);
    }

    payload.into_boxed_slice()
}
