use procwatch_output::{LineBuffer, LineBufferOverflow, LineStream};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::ChildStdin;
use tokio::sync::mpsc::{Receiver, Sender};
use tracing::{debug, warn};

const READ_CHUNK_SIZE: usize = 8192;

/// Where one output stream of the process goes.
pub(crate) enum OutputSink {
	Buffer(Arc<LineBuffer>),
	Stream(LineStream),
	Tee(LineStream, Arc<LineBuffer>),
}

impl OutputSink {
	/// `None` means the output is discarded.
	pub(crate) fn new(buffer: Option<Arc<LineBuffer>>, sender: Option<Sender<String>>) -> Option<Self> {
		match (buffer, sender) {
			(Some(buffer), None) => Some(OutputSink::Buffer(buffer)),
			(Some(buffer), Some(sender)) => Some(OutputSink::Tee(LineStream::new(sender), buffer)),
			(None, Some(sender)) => Some(OutputSink::Stream(LineStream::new(sender))),
			(None, None) => None,
		}
	}

	async fn write(&mut self, chunk: &[u8]) -> Result<(), LineBufferOverflow> {
		match self {
			OutputSink::Buffer(buffer) => {
				buffer.write(chunk);
				Ok(())
			}
			OutputSink::Stream(stream) => stream.write(chunk).await.map(drop),
			OutputSink::Tee(stream, buffer) => {
				// Buffer first: a line seen on the channel is already visible in the status.
				buffer.write(chunk);
				stream.write(chunk).await.map(drop)
			}
		}
	}

	async fn flush(&mut self) {
		if let OutputSink::Stream(stream) | OutputSink::Tee(stream, _) = self {
			stream.flush().await;
		}
	}

	fn last_error(&self) -> Option<LineBufferOverflow> {
		match self {
			OutputSink::Stream(stream) | OutputSink::Tee(stream, _) => stream.last_error().cloned(),
			OutputSink::Buffer(_) => None,
		}
	}
}

/// Copies a process pipe into its sink until EOF and returns the last line overflow.
///
/// Dropping the sink afterwards closes its line channel.
pub(crate) async fn drain<R>(
	pipe: Option<R>,
	sink: Option<OutputSink>,
	name: &'static str,
) -> Option<LineBufferOverflow>
where
	R: AsyncRead + Unpin,
{
	let (Some(mut pipe), Some(mut sink)) = (pipe, sink) else {
		return None;
	};

	let mut chunk = vec![0u8; READ_CHUNK_SIZE];
	loop {
		match pipe.read(&mut chunk).await {
			Ok(0) => break,
			Ok(read) => {
				if let Err(overflow) = sink.write(&chunk[..read]).await {
					warn!(
						stream = name,
						buffer_size = overflow.buffer_size,
						overflow = overflow.overflow,
						"discarding line that overflowed the line buffer"
					);
				}
			}
			Err(error) => {
				warn!(stream = name, %error, "failed to read process output");
				break;
			}
		}
	}

	sink.flush().await;
	sink.last_error()
}

/// Writes each line received on `lines` to the process's stdin, followed by a newline.
///
/// Closes the pipe once the channel closes.
pub(crate) async fn pump_stdin(mut lines: Receiver<String>, mut pipe: ChildStdin) {
	while let Some(line) = lines.recv().await {
		let mut bytes = line.into_bytes();
		bytes.push(b'\n');
		if let Err(error) = pipe.write_all(&bytes).await {
			debug!(%error, "process stdin closed");
			return;
		}
		if let Err(error) = pipe.flush().await {
			debug!(%error, "process stdin closed");
			return;
		}
	}

	debug!("stdin channel closed, closing process stdin");
	if let Err(error) = pipe.shutdown().await {
		debug!(%error, "failed to close process stdin");
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tokio::sync::mpsc;

	#[tokio::test]
	async fn test_tee_feeds_buffer_and_channel() {
		let buffer = Arc::new(LineBuffer::new());
		let (sender, mut receiver) = mpsc::channel(10);
		let sink = OutputSink::new(Some(buffer.clone()), Some(sender));

		let overflow = drain(Some(&b"a\r\nb\nc"[..]), sink, "stdout").await;
		assert_eq!(overflow, None);

		// the buffer elides the unterminated tail, the stream flushes it
		assert_eq!(buffer.lines(), vec!["a", "b"]);
		let mut streamed = Vec::new();
		while let Some(line) = receiver.recv().await {
			streamed.push(line);
		}
		assert_eq!(streamed, vec!["a", "b", "c"]);
	}

	#[tokio::test]
	async fn test_drain_reports_overflow_and_keeps_going() {
		let (sender, mut receiver) = mpsc::channel(10);
		let sink = OutputSink::Stream(LineStream::new(sender).max_line_size(4));

		let overflow = drain(Some(&b"123456"[..]), Some(sink), "stdout").await;
		assert_eq!(overflow.map(|overflow| overflow.line), Some("123456".to_string()));
		assert_eq!(receiver.recv().await, None);

		// overflowed bytes are dropped, later lines still arrive
		let (sender, mut receiver) = mpsc::channel(10);
		let sink = OutputSink::Stream(LineStream::new(sender).max_line_size(4));
		let pipe = (&b"123456"[..]).chain(&b"78\nafter\n"[..]);
		let overflow = drain(Some(pipe), Some(sink), "stdout").await;
		assert!(overflow.is_some());
		assert_eq!(receiver.recv().await.as_deref(), Some("78"));
		assert_eq!(receiver.recv().await.as_deref(), Some("after"));
	}

	#[tokio::test]
	async fn test_discarded_output_has_no_sink() {
		assert!(OutputSink::new(None, None).is_none());
	}
}
