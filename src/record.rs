//! File record type, line codec and record ordering.

use std::cmp::Ordering;
use std::error::Error;
use std::fmt;
use std::fmt::Display;

/// Field separator between the number and the payload.
pub const SEPARATOR: &[u8] = b". ";
/// Line terminator. A bare `\r` or `\n` is not a valid terminator.
pub const TERMINATOR: &[u8] = b"\r\n";
/// Maximum decimal digits of an `i64` magnitude.
pub const MAX_NUMBER_DIGITS: usize = 19;
/// Maximum payload length in bytes.
pub const MAX_DATA_LEN: usize = 2048;
/// Upper bound of a serialized line, terminator included.
pub const MAX_LINE_LEN: usize = MAX_NUMBER_DIGITS + MAX_DATA_LEN + SEPARATOR.len() + TERMINATOR.len();
/// Lower bound of a serialized line: one digit, one payload byte, separator, terminator.
pub const MIN_LINE_LEN: usize = 1 + 1 + SEPARATOR.len() + TERMINATOR.len();

/// Line format violation. Any occurrence aborts the surrounding run.
#[derive(Debug, PartialEq, Eq)]
pub enum FormatError {
    /// Line does not end with `\r\n`.
    MissingTerminator(String),
    /// Line contains no `". "` separator.
    MissingSeparator(String),
    /// Bytes before the separator are not a decimal `i64`.
    InvalidNumber(String),
    /// `\r` inside a line is not followed by `\n`.
    BareCarriageReturn,
    /// A record grew past the maximum line length without a terminator.
    LineTooLong,
    /// The stream ended in the middle of a record.
    UnterminatedRecord,
}

impl Error for FormatError {}

impl Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::MissingTerminator(line) => write!(f, "line is not terminated with \\r\\n: {}", line),
            FormatError::MissingSeparator(line) => write!(f, "unable to find separator in line: {}", line),
            FormatError::InvalidNumber(prefix) => write!(f, "unable to parse number from: {}", prefix),
            FormatError::BareCarriageReturn => write!(f, "\\r must be followed by \\n"),
            FormatError::LineTooLong => write!(f, "record exceeds the maximum line length"),
            FormatError::UnterminatedRecord => write!(f, "stream ended in the middle of a record"),
        }
    }
}

/// A single `<number>. <data>\r\n` record.
///
/// The payload is owned, so a record stays valid after the scan buffer
/// it was parsed from is reused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    number: i64,
    data: Box<[u8]>,
}

impl Record {
    pub fn new(number: i64, data: impl Into<Box<[u8]>>) -> Self {
        Record {
            number,
            data: data.into(),
        }
    }

    pub fn number(&self) -> i64 {
        self.number
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Parses one line, terminator included.
    pub fn parse(line: &[u8]) -> Result<Self, FormatError> {
        let body = line
            .strip_suffix(TERMINATOR)
            .ok_or_else(|| FormatError::MissingTerminator(preview(line)))?;

        let separator = body
            .windows(SEPARATOR.len())
            .position(|window| window == SEPARATOR)
            .ok_or_else(|| FormatError::MissingSeparator(preview(body)))?;

        let number = std::str::from_utf8(&body[..separator])
            .ok()
            .and_then(|digits| digits.parse::<i64>().ok())
            .ok_or_else(|| FormatError::InvalidNumber(preview(&body[..separator])))?;

        let data = &body[separator + SEPARATOR.len()..];

        return Ok(Record::new(number, data));
    }

    /// Exact serialized length of the record, terminator included.
    pub fn byte_len(&self) -> usize {
        digit_count(self.number) + self.data.len() + SEPARATOR.len() + TERMINATOR.len()
    }

    /// Serializes the record into `buf`, which must hold at least
    /// [`byte_len`](Record::byte_len) bytes. Returns the written length.
    pub fn write_to(&self, buf: &mut [u8]) -> usize {
        let len = self.byte_len();
        assert!(buf.len() >= len, "record does not fit into the output buffer");

        let digits = self.number.to_string();
        let mut pos = 0;
        buf[pos..pos + digits.len()].copy_from_slice(digits.as_bytes());
        pos += digits.len();
        buf[pos..pos + SEPARATOR.len()].copy_from_slice(SEPARATOR);
        pos += SEPARATOR.len();
        buf[pos..pos + self.data.len()].copy_from_slice(&self.data);
        pos += self.data.len();
        buf[pos..pos + TERMINATOR.len()].copy_from_slice(TERMINATOR);
        pos += TERMINATOR.len();

        debug_assert_eq!(pos, len);
        return pos;
    }
}

impl Ord for Record {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_data(&self.data, &other.data).then_with(|| self.number.cmp(&other.number))
    }
}

impl PartialOrd for Record {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Payload order: bytewise over the common prefix, then the longer payload
/// sorts first; an empty payload sorts after any non-empty one.
fn compare_data(x: &[u8], y: &[u8]) -> Ordering {
    match (x.is_empty(), y.is_empty()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Greater,
        (false, true) => return Ordering::Less,
        (false, false) => {}
    }

    for (a, b) in x.iter().zip(y.iter()) {
        match a.cmp(b) {
            Ordering::Equal => {}
            decided => return decided,
        }
    }

    y.len().cmp(&x.len())
}

/// Decimal digit count of `value`, sign included.
pub fn digit_count(value: i64) -> usize {
    let sign = usize::from(value < 0);
    let digits = value.unsigned_abs().checked_ilog10().map_or(0, |d| d as usize) + 1;
    sign + digits
}

fn preview(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
