//! Shortcuts for running a command, or a bash script, to completion.
use crate::command::Command;
use crate::options::Options;
use crate::status::Status;
use tokio::sync::mpsc::Receiver;
use tracing::debug;

/// Runs `program` with buffered output and waits for it to finish.
pub async fn run<S, I, A>(program: S, args: I) -> (Command, Status)
where
	S: Into<String>,
	I: IntoIterator<Item = A>,
	A: Into<String>,
{
	let command = Command::new(program, args);
	let status = command.start().recv().await;
	(command, status)
}

/// Runs `bash -c script` and waits for it to finish.
pub async fn bash(script: impl Into<String>, options: Options) -> (Command, Status) {
	let command = Command::with_options(options, "bash", ["-c".to_string(), script.into()]);
	let status = command.start().recv().await;
	(command, status)
}

/// Runs `bash -c script`, passing each stdout line to `liner` as it is written.
///
/// Streaming is forced on and buffering off. The script is stopped the first time `liner`
/// returns false. Stderr is read and discarded so the script never stalls on it.
pub async fn bash_liner<F>(script: impl Into<String>, mut liner: F, options: Options) -> (Command, Status)
where
	F: FnMut(&str) -> bool,
{
	let options = options.streaming().buffered(false);
	let command = Command::with_options(options, "bash", ["-c".to_string(), script.into()]);

	let mut stdout = command.take_stdout();
	let mut stderr = command.take_stderr();
	let status_rx = command.start();

	loop {
		tokio::select! {
			// Lines are preferred over the status so that every line reaches `liner`.
			biased;

			line = next_line(&mut stdout) => match line {
				Some(line) => {
					if !liner(&line) {
						if let Err(error) = command.stop() {
							debug!(%error, "script ended before it could be stopped");
						}
					}
				}
				None => stdout = None,
			},
			line = next_line(&mut stderr) => {
				if line.is_none() {
					stderr = None;
				}
			}
			status = status_rx.recv() => return (command, status),
		}
	}
}

/// Receives from the channel, or never resolves once it is gone.
async fn next_line(channel: &mut Option<Receiver<String>>) -> Option<String> {
	match channel {
		Some(receiver) => receiver.recv().await,
		None => std::future::pending().await,
	}
}
