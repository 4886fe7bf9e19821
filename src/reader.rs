//! Chunked record reader.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::io;
use std::io::prelude::*;

use crate::record::{FormatError, Record, MAX_LINE_LEN, MIN_LINE_LEN};

/// Record reading error.
#[derive(Debug)]
pub enum ReadError {
    /// Underlying stream error.
    Io(io::Error),
    /// Malformed line. Aborts the whole read, no retry.
    Format(FormatError),
}

impl Error for ReadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(match self {
            ReadError::Io(err) => err,
            ReadError::Format(err) => err,
        })
    }
}

impl Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadError::Io(err) => write!(f, "I/O operation failed: {}", err),
            ReadError::Format(err) => write!(f, "malformed input: {}", err),
        }
    }
}

impl From<io::Error> for ReadError {
    fn from(err: io::Error) -> Self {
        ReadError::Io(err)
    }
}

impl From<FormatError> for ReadError {
    fn from(err: FormatError) -> Self {
        ReadError::Format(err)
    }
}

/// Reads records out of a byte stream in budgeted blocks.
///
/// The reader owns a single fixed-size buffer that is refilled by physical
/// reads. A record sliced by a read boundary is carried over: its bytes are
/// moved to the buffer start and completed by the next read, so records are
/// never lost or duplicated across block boundaries.
pub struct RecordReader<R> {
    stream: R,
    buf: Box<[u8]>,
    /// Bytes at the buffer start holding an unterminated partial record.
    leftover: usize,
}

impl<R: Read> RecordReader<R> {
    /// Creates a reader with the given buffer size. The buffer is grown to
    /// the maximum line length if the requested size is below it.
    pub fn new(stream: R, buf_size: usize) -> Self {
        let buf_size = buf_size.max(MAX_LINE_LEN);
        RecordReader {
            stream,
            buf: vec![0; buf_size].into_boxed_slice(),
            leftover: 0,
        }
    }

    /// Reads and parses complete records until at least `byte_budget` bytes
    /// of them have been consumed or the stream is exhausted.
    ///
    /// An empty result signals end of stream. Every complete record of the
    /// last physical read is kept even if that crosses the budget, so the
    /// budget may be overshot by less than one buffered read.
    pub fn read_block(&mut self, byte_budget: u64) -> Result<Vec<Record>, ReadError> {
        let expected = byte_budget.min(self.buf.len() as u64) as usize / MIN_LINE_LEN + 1;
        let mut records = Vec::with_capacity(expected);

        let mut consumed = 0u64;
        while consumed < byte_budget {
            let free = self.buf.len() - self.leftover;
            let mut to_read = (byte_budget - consumed).min(free as u64) as usize;
            if to_read < MAX_LINE_LEN {
                // close to the budget: still read enough to finish the trailing record
                to_read = free.min(MAX_LINE_LEN);
            }

            let read = self.stream.read(&mut self.buf[self.leftover..self.leftover + to_read])?;
            if read == 0 {
                if self.leftover > 0 {
                    return Err(FormatError::UnterminatedRecord.into());
                }
                break;
            }

            let filled = self.leftover + read;
            let (last_complete, _) = scan_buffer(&self.buf[..filled], &mut records)?;
            consumed += last_complete as u64;

            let tail = filled - last_complete;
            if tail >= MAX_LINE_LEN {
                return Err(FormatError::LineTooLong.into());
            }
            self.buf.copy_within(last_complete..filled, 0);
            self.leftover = tail;
        }

        return Ok(records);
    }
}

/// Scans `bytes` for terminated lines, parses each into `records` and returns
/// the offset just past the last terminator plus whether the scan ended on a
/// record boundary. A final lone `\r` counts as incomplete, not as an error.
fn scan_buffer(bytes: &[u8], records: &mut Vec<Record>) -> Result<(usize, bool), FormatError> {
    let mut last_complete = 0;
    let mut record_start = 0;

    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\r' {
            i += 1;
            continue;
        }
        if i + 1 == bytes.len() {
            // terminator may continue in the next read
            break;
        }
        if bytes[i + 1] != b'\n' {
            return Err(FormatError::BareCarriageReturn);
        }

        i += 2;
        records.push(Record::parse(&bytes[record_start..i])?);
        last_complete = i;
        record_start = i;
    }

    Ok((last_complete, last_complete == bytes.len()))
}

#[cfg(test)]
mod test {
    use std::io;
    use std::io::Read;

    use rstest::*;

    use super::{scan_buffer, ReadError, RecordReader};
    use crate::record::{FormatError, Record};

    /// Hands out at most `chop` bytes per read call.
    struct ChoppyReader<'a> {
        data: &'a [u8],
        chop: usize,
    }

    impl<'a> Read for ChoppyReader<'a> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.data.len().min(self.chop).min(buf.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    fn records_of(pairs: &[(i64, &[u8])]) -> Vec<Record> {
        pairs.iter().map(|(number, data)| Record::new(*number, *data)).collect()
    }

    #[rstest]
    #[case(b"1. first\r\n", &[(1, b"first".as_slice())], true)]
    #[case(
        b"1. first\r\n22222. long continuation\r\n",
        &[(1, b"first".as_slice()), (22222, b"long continuation".as_slice())],
        true,
    )]
    #[case(
        b"22222. long first part\r\n11. continuation\r\n",
        &[(22222, b"long first part".as_slice()), (11, b"continuation".as_slice())],
        true,
    )]
    #[case(b"1. abcd\r\n22222", &[(1, b"abcd".as_slice())], false)]
    #[case(b"1. abcd\r\n22222.", &[(1, b"abcd".as_slice())], false)]
    #[case(b"1. abcd\r\n22222. continuation", &[(1, b"abcd".as_slice())], false)]
    #[case(b"1. abcd\r\n22222. long continuation\r", &[(1, b"abcd".as_slice())], false)]
    fn test_scan_buffer(#[case] bytes: &[u8], #[case] expected: &[(i64, &[u8])], #[case] complete: bool) {
        let mut records = Vec::new();
        let (last_complete, last_record_complete) = scan_buffer(bytes, &mut records).unwrap();

        assert_eq!(records, records_of(expected));
        assert_eq!(last_record_complete, complete);
        if complete {
            assert_eq!(last_complete, bytes.len());
        }
    }

    #[test]
    fn test_scan_buffer_leftover_offset() {
        let mut records = Vec::new();
        let (last_complete, complete) = scan_buffer(b"1. abcd\r\n22222. cont", &mut records).unwrap();

        assert_eq!(records, records_of(&[(1, b"abcd")]));
        assert!(!complete);
        assert_eq!(&b"1. abcd\r\n22222. cont"[last_complete..], b"22222. cont");
    }

    #[test]
    fn test_scan_buffer_bare_carriage_return() {
        let mut records = Vec::new();
        let result = scan_buffer(b"1. a\rb\r\n", &mut records);
        assert!(matches!(result, Err(FormatError::BareCarriageReturn)));
    }

    #[rstest]
    #[case(1024 * 1024)]
    #[case(30)]
    fn test_read_block(#[case] budget: u64) {
        let data = b"22222. long first part\r\n11. continuation\r\n14. continuation 2\r\n";
        let mut reader = RecordReader::new(io::Cursor::new(data.as_slice()), data.len());

        let mut result = Vec::new();
        loop {
            let records = reader.read_block(budget).unwrap();
            if records.is_empty() {
                break;
            }
            result.extend(records);
        }

        // block reads preserve input order, sorting happens elsewhere
        let expected = records_of(&[
            (22222, b"long first part"),
            (11, b"continuation"),
            (14, b"continuation 2"),
        ]);
        assert_eq!(result, expected);
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(7)]
    #[case(23)]
    fn test_read_block_carry_over(#[case] chop: usize) {
        // records arrive sliced at arbitrary physical read boundaries
        let data = b"1. split across reads\r\n-2. second record\r\n3. third\r\n";
        let stream = ChoppyReader { data, chop };
        let mut reader = RecordReader::new(stream, data.len());

        let records = reader.read_block(data.len() as u64).unwrap();

        let expected = records_of(&[(1, b"split across reads"), (-2, b"second record"), (3, b"third")]);
        assert_eq!(records, expected);
    }

    #[test]
    fn test_read_block_empty_stream() {
        let mut reader = RecordReader::new(io::Cursor::new(&b""[..]), 64);
        assert!(reader.read_block(1024).unwrap().is_empty());
    }

    #[test]
    fn test_read_block_unterminated_tail() {
        let data = b"1. complete\r\n2. cut off";
        let mut reader = RecordReader::new(io::Cursor::new(data.as_slice()), 64);

        let result = reader.read_block(1024);
        assert!(matches!(result, Err(ReadError::Format(FormatError::UnterminatedRecord))));
    }

    #[test]
    fn test_read_block_budget_resumes() {
        // one record per call: the stream yields one line per physical read
        // and the budget stops the block after the first of them
        let data = b"1. aaaa\r\n2. bbbb\r\n";
        let mut reader = RecordReader::new(ChoppyReader { data, chop: 9 }, data.len());

        let first = reader.read_block(9).unwrap();
        let second = reader.read_block(9).unwrap();
        let third = reader.read_block(9).unwrap();

        assert_eq!(first, records_of(&[(1, b"aaaa")]));
        assert_eq!(second, records_of(&[(2, b"bbbb")]));
        assert!(third.is_empty());
    }
}
