use crate::{trim_cr, DEFAULT_LINE_BUFFER_SIZE};
use thiserror::Error;
use tokio::sync::mpsc::Sender;
use tracing::debug;

/// Returned by [LineStream::write] when the line buffer fills before a newline terminates
/// the line. The partial line is discarded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error(
	"line does not contain newline and is {overflow} bytes too long to buffer (buffer size: {buffer_size})"
)]
pub struct LineBufferOverflow {
	/// Unterminated line that caused the error
	pub line: String,
	/// Internal line buffer size
	pub buffer_size: usize,
	/// Bytes beyond the buffer size
	pub overflow: usize,
}

/// Splits raw output into lines and sends each completed line to a bounded channel.
///
/// Sends wait for channel capacity, so a slow receiver throttles the writer instead of losing
/// lines. The stream owns its sender: dropping the stream closes the channel.
pub struct LineStream {
	pending: Vec<u8>,
	max_line_size: usize,
	sender: Sender<String>,
	last_error: Option<LineBufferOverflow>,
	disconnected: bool,
}

impl LineStream {
	pub fn new(sender: Sender<String>) -> Self {
		Self {
			pending: Vec::new(),
			max_line_size: DEFAULT_LINE_BUFFER_SIZE,
			sender,
			last_error: None,
			disconnected: false,
		}
	}

	/// Sets the size an unterminated line may grow to before it overflows.
	pub fn max_line_size(mut self, size: usize) -> Self {
		self.max_line_size = size;
		self
	}

	/// The most recent overflow, if any.
	pub fn last_error(&self) -> Option<&LineBufferOverflow> {
		self.last_error.as_ref()
	}

	/// Consumes a chunk of raw output, sending every line it completes.
	///
	/// Lines completed by the chunk are always sent, even when its unterminated tail overflows.
	pub async fn write(&mut self, chunk: &[u8]) -> Result<usize, LineBufferOverflow> {
		let mut rest = chunk;

		while let Some(newline) = rest.iter().position(|b| *b == b'\n') {
			self.pending.extend_from_slice(&rest[..newline]);
			let line = String::from_utf8_lossy(trim_cr(&self.pending)).into_owned();
			self.pending.clear();
			self.send(line).await;
			rest = &rest[newline + 1..];
		}

		if self.pending.len() + rest.len() > self.max_line_size {
			self.pending.extend_from_slice(rest);
			let error = LineBufferOverflow {
				line: String::from_utf8_lossy(&self.pending).into_owned(),
				buffer_size: self.max_line_size,
				overflow: self.pending.len() - self.max_line_size,
			};
			self.pending.clear();
			self.last_error = Some(error.clone());
			return Err(error);
		}

		self.pending.extend_from_slice(rest);
		Ok(chunk.len())
	}

	/// Sends any unterminated tail as a final line.
	pub async fn flush(&mut self) {
		if self.pending.is_empty() {
			return;
		}
		let line = String::from_utf8_lossy(trim_cr(&self.pending)).into_owned();
		self.pending.clear();
		self.send(line).await;
	}

	async fn send(&mut self, line: String) {
		if self.disconnected {
			return;
		}
		if self.sender.send(line).await.is_err() {
			debug!("line receiver dropped, discarding further output");
			self.disconnected = true;
		}
	}
}
