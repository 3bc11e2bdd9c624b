//! Line-oriented sinks for child process output.
//!
//! [LineBuffer] accumulates output for later (or concurrent) reads, [LineStream] forwards each
//! completed line to a bounded channel as soon as it arrives.
pub mod buffer;
pub mod stream;

pub use buffer::LineBuffer;
pub use stream::{LineBufferOverflow, LineStream};

/// Default size of the [LineStream] line buffer.
///
/// If [LineBufferOverflow] errors occur, raise it with [LineStream::max_line_size].
pub const DEFAULT_LINE_BUFFER_SIZE: usize = 16384;

/// Splits off a trailing carriage return.
pub(crate) fn trim_cr(line: &[u8]) -> &[u8] {
	line.strip_suffix(b"\r").unwrap_or(line)
}
