//! Record writer.

use std::io;
use std::io::prelude::*;

use crate::record::{Record, MAX_LINE_LEN};

/// Default pack buffer size.
pub const WRITE_BUF_SIZE: usize = 1024 * 1024;

/// Packs records into one reusable byte buffer and hands filled buffers to
/// the underlying stream. A single writer owns its output stream, so bytes
/// reach it in record order with no interleaving.
pub struct RecordWriter<W> {
    stream: W,
    buf: Vec<u8>,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(stream: W) -> Self {
        Self::with_capacity(WRITE_BUF_SIZE, stream)
    }

    /// Creates a writer with the given pack buffer capacity. The capacity is
    /// grown to the maximum line length if the requested size is below it.
    pub fn with_capacity(capacity: usize, stream: W) -> Self {
        RecordWriter {
            stream,
            buf: Vec::with_capacity(capacity.max(MAX_LINE_LEN + 1)),
        }
    }

    /// Serializes the batch in order. The pack buffer is drained to the
    /// stream whenever the next record would overflow it and once more after
    /// the batch, so no record bytes are held across batches.
    pub fn write_batch(&mut self, records: &[Record]) -> io::Result<()> {
        for record in records {
            let len = record.byte_len();
            if self.buf.len() + len > self.buf.capacity() {
                self.drain_buf()?;
            }

            let start = self.buf.len();
            self.buf.resize(start + len, 0);
            record.write_to(&mut self.buf[start..]);
        }

        self.drain_buf()
    }

    /// Flushes the pack buffer and the underlying stream.
    pub fn flush(&mut self) -> io::Result<()> {
        self.drain_buf()?;
        self.stream.flush()
    }

    pub fn into_inner(self) -> W {
        self.stream
    }

    fn drain_buf(&mut self) -> io::Result<()> {
        if !self.buf.is_empty() {
            self.stream.write_all(&self.buf)?;
            self.buf.clear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::RecordWriter;
    use crate::record::{Record, MAX_LINE_LEN};

    fn serialized(records: &[Record]) -> Vec<u8> {
        let mut expected = Vec::new();
        for record in records {
            let start = expected.len();
            expected.resize(start + record.byte_len(), 0);
            record.write_to(&mut expected[start..]);
        }
        expected
    }

    #[rstest]
    #[case(Vec::new())]
    #[case(vec![Record::new(1, *b"a")])]
    #[case(vec![Record::new(22222, *b"long first part"), Record::new(11, *b"continuation")])]
    fn test_write_batch(#[case] records: Vec<Record>) {
        let mut writer = RecordWriter::new(Vec::new());
        writer.write_batch(&records).unwrap();
        writer.flush().unwrap();

        assert_eq!(writer.into_inner(), serialized(&records));
    }

    #[test]
    fn test_write_batch_drains_full_buffer() {
        // minimal pack buffer forces repeated drains mid-batch
        let records: Vec<Record> = (0..1000).map(|i| Record::new(i, *b"payload")).collect();

        let mut writer = RecordWriter::with_capacity(MAX_LINE_LEN, Vec::new());
        writer.write_batch(&records).unwrap();
        writer.flush().unwrap();

        assert_eq!(writer.into_inner(), serialized(&records));
    }

    #[test]
    fn test_write_batches_keep_order() {
        let first: Vec<Record> = (0..10).map(|i| Record::new(i, *b"first")).collect();
        let second: Vec<Record> = (10..20).map(|i| Record::new(i, *b"second")).collect();

        let mut writer = RecordWriter::new(Vec::new());
        writer.write_batch(&first).unwrap();
        writer.write_batch(&second).unwrap();
        writer.flush().unwrap();

        let mut all = first;
        all.extend(second);
        assert_eq!(writer.into_inner(), serialized(&all));
    }
}
