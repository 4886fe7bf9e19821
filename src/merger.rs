//! Binary heap merger.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::io::Read;
use std::vec;

use crate::reader::{ReadError, RecordReader};
use crate::record::Record;

/// Cursor over one sorted block file.
///
/// Refills a lookahead batch of at most `chunk_budget` bytes at a time, so
/// the merge holds one bounded batch per source rather than a whole block.
pub struct MergeSource<R> {
    reader: RecordReader<R>,
    lookahead: vec::IntoIter<Record>,
    chunk_budget: u64,
    exhausted: bool,
}

impl<R: Read> MergeSource<R> {
    pub fn new(reader: RecordReader<R>, chunk_budget: u64) -> Self {
        MergeSource {
            reader,
            lookahead: Vec::new().into_iter(),
            chunk_budget,
            exhausted: false,
        }
    }

    /// Advances the cursor. [`None`] means the source is drained; the reader
    /// itself is dropped only together with the whole merge.
    fn next_record(&mut self) -> Result<Option<Record>, ReadError> {
        if let Some(record) = self.lookahead.next() {
            return Ok(Some(record));
        }
        if self.exhausted {
            return Ok(None);
        }

        let batch = self.reader.read_block(self.chunk_budget)?;
        if batch.is_empty() {
            self.exhausted = true;
            return Ok(None);
        }

        self.lookahead = batch.into_iter();
        return Ok(self.lookahead.next());
    }
}

/// Binary heap merger implementation.
/// Merges multiple sorted sources into a single sorted output.
/// Time complexity is *m* \* log(*n*) in worst case where *m* is the number
/// of records, *n* is the number of sources.
pub struct BinaryHeapMerger<R> {
    // binary heap is max-heap by default so we reverse it to convert it to min-heap
    items: BinaryHeap<(Reverse<Record>, usize)>,
    sources: Vec<MergeSource<R>>,
    initiated: bool,
}

impl<R: Read> BinaryHeapMerger<R> {
    /// Creates an instance of a binary heap merger using the given sources.
    /// Each source must yield records in ascending order otherwise the result
    /// is undefined.
    pub fn new(sources: Vec<MergeSource<R>>) -> Self {
        let items = BinaryHeap::with_capacity(sources.len());

        return BinaryHeapMerger {
            items,
            sources,
            initiated: false,
        };
    }
}

impl<R: Read> Iterator for BinaryHeapMerger<R> {
    type Item = Result<Record, ReadError>;

    /// Returns the next record from the sources in ascending order.
    fn next(&mut self) -> Option<Self::Item> {
        if !self.initiated {
            for idx in 0..self.sources.len() {
                match self.sources[idx].next_record() {
                    Ok(Some(record)) => self.items.push((Reverse(record), idx)),
                    Ok(None) => {}
                    Err(err) => return Some(Err(err)),
                }
            }
            self.initiated = true;
        }

        let (result, idx) = self.items.pop()?;
        match self.sources[idx].next_record() {
            Ok(Some(record)) => self.items.push((Reverse(record), idx)),
            Ok(None) => {}
            Err(err) => return Some(Err(err)),
        }

        return Some(Ok(result.0));
    }
}
