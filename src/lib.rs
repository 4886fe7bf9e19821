//! `line-sort` sorts delimited text files that do not fit into main memory.
//!
//! The input is a line-oriented ASCII file of `<number>. <data>\r\n` records.
//! Sorting is achieved in two passes. During the first pass the input is read
//! in blocks sized to the memory budget, each block is sorted in memory and
//! spilled to a temporary file. During the second pass the sorted block files
//! are merged into the output with a binary heap, holding only one bounded
//! lookahead batch per block. An input that fits a single block skips the
//! merge entirely. For more information see
//! [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! Records are ordered by payload first (bytewise, with a payload extending
//! another sorting before it and the empty payload sorting last) and by
//! number second.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use line_sort::SorterBuilder;
//!
//! fn main() {
//!     let sorter = SorterBuilder::new()
//!         .with_tmp_dir(Path::new("./tmp"))
//!         .with_memory_limit(512 * 1024 * 1024)
//!         .build()
//!         .unwrap();
//!
//!     sorter.sort(Path::new("input.txt"), Path::new("output.txt")).unwrap();
//! }
//! ```

pub mod generate;
pub mod merger;
pub mod reader;
pub mod record;
pub mod sort;
pub mod writer;

pub use generate::{GenerateError, GenerateOptions, GenerateStats};
pub use merger::{BinaryHeapMerger, MergeSource};
pub use reader::{ReadError, RecordReader};
pub use record::{FormatError, Record};
pub use sort::{SortError, Sorter, SorterBuilder};
pub use writer::RecordWriter;
