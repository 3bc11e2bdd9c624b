use crate::trim_cr;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct Inner {
	pending: Vec<u8>,
	lines: Vec<String>,
}

/// Output saved line by line in an unbounded buffer.
///
/// Safe to read from any number of tasks while a writer is still appending. Only terminated
/// lines are returned by [LineBuffer::lines]; an unterminated tail stays pending until its
/// newline arrives.
#[derive(Default)]
pub struct LineBuffer {
	inner: Mutex<Inner>,
}

impl LineBuffer {
	pub fn new() -> Self {
		Self::default()
	}

	fn lock(&self) -> MutexGuard<'_, Inner> {
		self.inner.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// Appends raw output. Never fails.
	pub fn write(&self, bytes: &[u8]) -> usize {
		self.lock().pending.extend_from_slice(bytes);
		bytes.len()
	}

	/// Returns every complete line written so far, in write order.
	///
	/// Pending bytes up to the last newline are consumed into lines; a trailing `\r` is
	/// stripped from each.
	pub fn lines(&self) -> Vec<String> {
		let mut inner = self.lock();

		if let Some(end) = inner.pending.iter().rposition(|b| *b == b'\n') {
			let scanned: Vec<u8> = inner.pending.drain(..=end).collect();
			let new_lines = scanned[..end]
				.split(|b| *b == b'\n')
				.map(|line| String::from_utf8_lossy(trim_cr(line)).into_owned());
			inner.lines.extend(new_lines);
		}

		inner.lines.clone()
	}

	/// Number of bytes written but not yet terminated by a newline.
	pub fn len_bytes(&self) -> usize {
		let inner = self.lock();
		match inner.pending.iter().rposition(|b| *b == b'\n') {
			Some(end) => inner.pending.len() - end - 1,
			None => inner.pending.len(),
		}
	}
}
