use crate::error::ProcessError;
use crate::options::{Options, DEFAULT_STDIN_CHANNEL_SIZE, DEFAULT_STREAM_CHANNEL_SIZE};
use crate::run::{self, signal::signal_group};
use crate::status::Status;
use nix::sys::signal::Signal;
use procwatch_output::{LineBuffer, LineBufferOverflow};
use procwatch_state::{Latch, LatchError, LatchReader};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tracing::debug;

/// Mutable per-command state, guarded by [Shared::state].
pub(crate) struct State {
	pub(crate) env: Vec<String>,
	pub(crate) dir: Option<PathBuf>,
	pub(crate) timeout: Option<Duration>,
	pub(crate) buffered: bool,

	pub(crate) stdin_tx: Option<Sender<String>>,
	pub(crate) stdin_rx: Option<Receiver<String>>,
	pub(crate) stdout_tx: Option<Sender<String>>,
	pub(crate) stdout_rx: Option<Receiver<String>>,
	pub(crate) stderr_tx: Option<Sender<String>>,
	pub(crate) stderr_rx: Option<Receiver<String>>,

	/// Set by the first `start`.
	pub(crate) status_rx: Option<StatusReceiver>,
	/// The process was spawned.
	pub(crate) started: bool,
	/// `stop` was accepted while the process was running.
	pub(crate) stopped: bool,
	/// The runner has finished.
	pub(crate) done: bool,
	/// `status.stdout` and `status.stderr` are complete and the buffers are released.
	pub(crate) finalized: bool,

	pub(crate) start_time: Option<Instant>,
	pub(crate) stdout: Option<Arc<LineBuffer>>,
	pub(crate) stderr: Option<Arc<LineBuffer>>,
	/// Last line that overflowed a streaming channel's line buffer, recorded when the run ends.
	pub(crate) stdout_overflow: Option<LineBufferOverflow>,
	pub(crate) stderr_overflow: Option<LineBufferOverflow>,
	pub(crate) status: Status,
}

impl State {
	/// Copies the buffered output into the status and releases the buffers.
	pub(crate) fn finalize_output(&mut self) {
		if self.finalized {
			return;
		}
		if let Some(stdout) = self.stdout.take() {
			self.status.stdout = Some(stdout.lines());
		}
		if let Some(stderr) = self.stderr.take() {
			self.status.stderr = Some(stderr.lines());
		}
		self.finalized = true;
	}

	fn apply(&mut self, options: Options) {
		self.buffered = options.buffered;

		if options.streaming {
			let (stdout_tx, stdout_rx) = mpsc::channel(DEFAULT_STREAM_CHANNEL_SIZE);
			let (stderr_tx, stderr_rx) = mpsc::channel(DEFAULT_STREAM_CHANNEL_SIZE);
			self.stdout_tx = Some(stdout_tx);
			self.stdout_rx = Some(stdout_rx);
			self.stderr_tx = Some(stderr_tx);
			self.stderr_rx = Some(stderr_rx);
		} else {
			self.stdout_tx = None;
			self.stdout_rx = None;
			self.stderr_tx = None;
			self.stderr_rx = None;
		}

		if options.stdin {
			let (stdin_tx, stdin_rx) = mpsc::channel(DEFAULT_STDIN_CHANNEL_SIZE);
			self.stdin_tx = Some(stdin_tx);
			self.stdin_rx = Some(stdin_rx);
		} else {
			self.stdin_tx = None;
			self.stdin_rx = None;
		}

		self.timeout = options.timeout.filter(|timeout| !timeout.is_zero());
		self.env = options.env;
	}
}

pub(crate) struct Shared {
	pub(crate) program: String,
	pub(crate) args: Vec<String>,
	pub(crate) state: Mutex<State>,
	/// Published once by the runner; doubles as the done signal.
	pub(crate) latch: Latch<Status>,
}

impl Shared {
	pub(crate) fn lock(&self) -> MutexGuard<'_, State> {
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}
}

/// Receives the final [Status] of a command.
///
/// Exactly one status is published. Every clone of the receiver observes it, including ones
/// that start waiting after the command ended.
#[derive(Debug, Clone)]
pub struct StatusReceiver {
	reader: LatchReader<Status>,
}

impl StatusReceiver {
	/// Waits for the command to end and returns its final status.
	pub async fn recv(&self) -> Status {
		self.reader.wait().await
	}

	/// Waits up to `timeout` for the final status.
	pub async fn recv_timeout(&self, timeout: Duration) -> Result<Status, LatchError> {
		self.reader.wait_for_duration(timeout).await
	}

	/// Returns the final status if the command has already ended.
	pub fn try_recv(&self) -> Option<Status> {
		self.reader.get()
	}

	/// Returns true if both receivers belong to the same command.
	pub fn same_channel(&self, other: &StatusReceiver) -> bool {
		self.reader.same_latch(&other.reader)
	}
}

/// Signals that a command stopped running, for any number of observers.
#[derive(Debug, Clone)]
pub struct Done {
	reader: LatchReader<Status>,
}

impl Done {
	/// Waits until the command has stopped running.
	pub async fn wait(&self) {
		self.reader.wait().await;
	}

	pub fn is_done(&self) -> bool {
		self.reader.is_set()
	}
}

/// An external command, run at most once.
///
/// Clones share the same process, so any number of tasks can query its status, wait for it,
/// or stop it. A command cannot be restarted: after [Command::start] the options are fixed and
/// further starts return the original [StatusReceiver].
#[derive(Clone)]
pub struct Command {
	shared: Arc<Shared>,
}

impl Command {
	/// Creates a command with buffered output, no streaming, no stdin, and no timeout.
	pub fn new<S, I, A>(program: S, args: I) -> Self
	where
		S: Into<String>,
		I: IntoIterator<Item = A>,
		A: Into<String>,
	{
		let program = program.into();
		let state = State {
			env: Vec::new(),
			dir: None,
			timeout: None,
			buffered: true,
			stdin_tx: None,
			stdin_rx: None,
			stdout_tx: None,
			stdout_rx: None,
			stderr_tx: None,
			stderr_rx: None,
			status_rx: None,
			started: false,
			stopped: false,
			done: false,
			finalized: false,
			start_time: None,
			stdout: None,
			stderr: None,
			stdout_overflow: None,
			stderr_overflow: None,
			status: Status::new(&program),
		};

		Self {
			shared: Arc::new(Shared {
				program,
				args: args.into_iter().map(Into::into).collect(),
				state: Mutex::new(state),
				latch: Latch::new(),
			}),
		}
	}

	/// Creates a command and applies `options` to it.
	pub fn with_options<S, I, A>(options: Options, program: S, args: I) -> Self
	where
		S: Into<String>,
		I: IntoIterator<Item = A>,
		A: Into<String>,
	{
		let command = Self::new(program, args);
		command.shared.lock().apply(options);
		command
	}

	fn lock(&self) -> MutexGuard<'_, State> {
		self.shared.lock()
	}

	fn reject_if_started(&self, state: &State) -> Result<(), ProcessError> {
		match state.status_rx {
			Some(_) => Err(ProcessError::AlreadyStarted { program: self.shared.program.clone() }),
			None => Ok(()),
		}
	}

	/// Replaces the options. Channels taken before this call are disconnected.
	pub fn apply_options(&self, options: Options) -> Result<(), ProcessError> {
		let mut state = self.lock();
		self.reject_if_started(&state)?;
		state.apply(options);
		Ok(())
	}

	/// Sets the working directory; by default the process inherits ours.
	pub fn current_dir(&self, dir: impl AsRef<Path>) -> Result<(), ProcessError> {
		let mut state = self.lock();
		self.reject_if_started(&state)?;
		state.dir = Some(dir.as_ref().to_path_buf());
		Ok(())
	}

	pub fn program(&self) -> &str {
		&self.shared.program
	}

	pub fn args(&self) -> &[String] {
		&self.shared.args
	}

	/// Process id, zero until the process has been spawned.
	pub fn pid(&self) -> u32 {
		self.lock().status.pid
	}

	/// Starts the command and returns the receiver for its final status.
	///
	/// Idempotent: every call returns the same receiver and the process is launched once.
	/// Must be called within a tokio runtime.
	pub fn start(&self) -> StatusReceiver {
		let mut state = self.lock();
		if let Some(status_rx) = &state.status_rx {
			return status_rx.clone();
		}

		let status_rx = StatusReceiver { reader: self.shared.latch.reader() };
		state.status_rx = Some(status_rx.clone());
		drop(state);

		tokio::spawn(run::run(self.shared.clone()));
		status_rx
	}

	/// Stops the command by sending SIGTERM to its process group.
	///
	/// Does nothing if the process is not running or was already stopped. An error is only
	/// expected if the process ended just before the signal was sent.
	pub fn stop(&self) -> Result<(), ProcessError> {
		let mut state = self.lock();
		if !state.started || state.stopped || state.done {
			return Ok(());
		}

		// Recorded before signaling so the final status reports the command as incomplete.
		state.stopped = true;

		let pid = state.status.pid;
		debug!(program = %self.shared.program, pid, "stopping process group");
		signal_group(pid, Signal::SIGTERM)
			.map_err(|error| ProcessError::Signal { pid, reason: error.to_string() })
	}

	/// Returns the status at any time.
	///
	/// While running, `runtime` is current and buffered `stdout`/`stderr` hold every complete
	/// line written so far; the caller is responsible for tailing them. Once the command ends
	/// the status is final and every call returns the same value.
	pub fn status(&self) -> Status {
		let mut state = self.lock();
		if !state.started {
			return state.status.clone();
		}

		if state.done {
			state.finalize_output();
		} else {
			if let Some(start_time) = state.start_time {
				state.status.runtime = start_time.elapsed().as_secs_f64();
			}
			if let Some(stdout) = &state.stdout {
				let lines = stdout.lines();
				state.status.stdout = Some(lines);
			}
			if let Some(stderr) = &state.stderr {
				let lines = stderr.lines();
				state.status.stderr = Some(lines);
			}
		}

		state.status.clone()
	}

	/// Returns a signal that fires once the command stops running.
	pub fn done(&self) -> Done {
		Done { reader: self.shared.latch.reader() }
	}

	/// The last stdout line that was too long for the streaming line buffer and was discarded.
	///
	/// Overflows do not stop the command. They are logged as they happen and reported here once
	/// the command has ended.
	pub fn stdout_overflow(&self) -> Option<LineBufferOverflow> {
		self.lock().stdout_overflow.clone()
	}

	/// Like [Command::stdout_overflow], for stderr.
	pub fn stderr_overflow(&self) -> Option<LineBufferOverflow> {
		self.lock().stderr_overflow.clone()
	}

	/// Takes the stdin line channel, if enabled. Dropping it closes the process's stdin.
	pub fn take_stdin(&self) -> Option<Sender<String>> {
		self.lock().stdin_tx.take()
	}

	/// Takes the streaming stdout channel, if enabled.
	pub fn take_stdout(&self) -> Option<Receiver<String>> {
		self.lock().stdout_rx.take()
	}

	/// Takes the streaming stderr channel, if enabled.
	pub fn take_stderr(&self) -> Option<Receiver<String>> {
		self.lock().stderr_rx.take()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tracing_test::traced_test;

	#[tokio::test]
	async fn test_not_started() -> Result<(), anyhow::Error> {
		let command = Command::new("echo", ["foo"]);

		assert_eq!(command.status(), Status::new("echo"));
		command.stop()?;
		assert!(!command.done().is_done());

		Ok(())
	}

	#[tokio::test]
	async fn test_start_is_idempotent() -> Result<(), anyhow::Error> {
		let command = Command::new("echo", ["once"]);

		let first = command.start();
		let second = command.start();
		assert!(first.same_channel(&second));

		let status = first.recv().await;
		assert_eq!(status.stdout, Some(vec!["once".to_string()]));
		assert_eq!(second.recv().await, status);
		assert!(command.start().same_channel(&first));

		Ok(())
	}

	#[tokio::test]
	async fn test_final_status_is_stable() -> Result<(), anyhow::Error> {
		let command = Command::new("sh", ["-c", "echo out; echo err >&2"]);
		let published = command.start().recv().await;

		command.done().wait().await;
		assert!(command.done().is_done());
		assert_eq!(command.status(), published);
		assert_eq!(command.status(), command.status());
		assert_eq!(published.stderr, Some(vec!["err".to_string()]));

		Ok(())
	}

	#[tokio::test]
	async fn test_options_rejected_after_start() -> Result<(), anyhow::Error> {
		let command = Command::new("true", Vec::<String>::new());
		command.apply_options(Options::default().buffered(false))?;
		command.start().recv().await;

		let error = command.apply_options(Options::default()).unwrap_err();
		assert_eq!(error, ProcessError::AlreadyStarted { program: "true".to_string() });
		assert!(command.current_dir("/").is_err());

		Ok(())
	}

	#[tokio::test]
	async fn test_env_replaces_parent_environment() -> Result<(), anyhow::Error> {
		let options = Options::default().env("PROCWATCH_A=1").env("PROCWATCH_B=two");
		// PATH is not passed on, so the program is named by its full path.
		let command = Command::with_options(options, "/usr/bin/env", Vec::<String>::new());

		let mut stdout = command.start().recv().await.stdout.unwrap_or_default();
		stdout.sort();
		assert_eq!(stdout, vec!["PROCWATCH_A=1", "PROCWATCH_B=two"]);

		Ok(())
	}

	#[tokio::test]
	async fn test_zero_timeout_means_no_timeout() -> Result<(), anyhow::Error> {
		let options = Options::default().timeout(Duration::ZERO);
		let command = Command::with_options(options, "sh", ["-c", "sleep 0.3; echo foo"]);

		let status = command.start().recv().await;
		assert!(status.success(), "{status:?}");
		assert_eq!(status.stdout, Some(vec!["foo".to_string()]));

		Ok(())
	}

	#[tokio::test]
	async fn test_deserialized_zero_timeout_means_no_timeout() -> Result<(), anyhow::Error> {
		let options: Options = serde_json::from_str(r#"{ "timeout": { "secs": 0, "nanos": 0 } }"#)?;
		let command = Command::with_options(options, "sh", ["-c", "sleep 0.3; echo foo"]);

		let status = command.start().recv().await;
		assert!(status.complete);
		assert_eq!(status.error, None);

		Ok(())
	}

	#[tokio::test]
	async fn test_working_directory() -> Result<(), anyhow::Error> {
		let dir = tempfile::tempdir()?;
		let command = Command::new("pwd", Vec::<String>::new());
		command.current_dir(dir.path())?;

		let status = command.start().recv().await;
		let cwd = std::path::PathBuf::from(&status.stdout.unwrap_or_default()[0]);
		assert_eq!(cwd.canonicalize()?, dir.path().canonicalize()?);

		Ok(())
	}

	#[test]
	fn test_channels_are_taken_once() {
		let options = Options::default().streaming().stdin();
		let command = Command::with_options(options, "cat", Vec::<String>::new());

		assert!(command.take_stdout().is_some());
		assert!(command.take_stdout().is_none());
		assert!(command.take_stderr().is_some());
		assert!(command.take_stdin().is_some());
		assert!(command.take_stdin().is_none());
	}

	#[tokio::test]
	#[traced_test]
	async fn test_launch_is_logged() {
		let command = Command::new("echo", ["logged"]);
		command.start().recv().await;

		assert!(logs_contain("Running command: echo logged"));
	}
}
