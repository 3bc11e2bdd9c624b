pub(crate) mod pipe;
pub mod signal;

use crate::command::Shared;
use crate::error::ProcessError;
use crate::status::{unix_nanos, Status};
use futures::future::join3;
use itertools::Itertools;
use nix::sys::signal::Signal;
use pipe::{drain, pump_stdin, OutputSink};
use procwatch_output::LineBuffer;
use signal::{signal_group, ExitSignal};
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::process::Command as InnerCommand;
use tokio::sync::mpsc::{Receiver, Sender};
use tracing::{debug, info, warn};

/// Everything the runner takes out of the shared state before spawning.
struct Launch {
	inner: InnerCommand,
	buffered: bool,
	timeout: Option<Duration>,
	stdin: Option<Receiver<String>>,
	stdout: Option<Sender<String>>,
	stderr: Option<Sender<String>>,
}

/// Runs the command to completion and publishes its final status.
///
/// Runs exactly once per command, spawned by the first [crate::Command::start].
pub(crate) async fn run(shared: Arc<Shared>) {
	let status = supervise(&shared).await;
	if let Err(error) = shared.latch.writer().set(status) {
		warn!(program = %shared.program, %error, "final status was already published");
	}
}

fn prepare(shared: &Shared) -> Launch {
	let mut state = shared.lock();

	let mut inner = InnerCommand::new(&shared.program);
	inner.args(&shared.args);

	// An empty list inherits our environment, otherwise the list is the whole environment.
	if !state.env.is_empty() {
		inner.env_clear();
		for entry in &state.env {
			match entry.split_once('=') {
				Some((key, value)) => {
					inner.env(key, value);
				}
				None => {
					warn!(program = %shared.program, entry = %entry, "ignoring environment entry without '='");
				}
			}
		}
	}

	if let Some(dir) = &state.dir {
		inner.current_dir(dir);
	}

	// The process and its children get their own group so that stop signals all of them
	// without signaling us. Children left running would keep the output pipes open.
	inner.process_group(0).kill_on_drop(true);

	let stdin = state.stdin_rx.take();
	let stdout = state.stdout_tx.take();
	let stderr = state.stderr_tx.take();
	let buffered = state.buffered;

	inner.stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() });
	inner.stdout(if buffered || stdout.is_some() { Stdio::piped() } else { Stdio::null() });
	inner.stderr(if buffered || stderr.is_some() { Stdio::piped() } else { Stdio::null() });

	let working_dir = state
		.dir
		.as_ref()
		.map(|dir| dir.to_string_lossy().into_owned())
		.unwrap_or_else(|| "default".to_string());
	info!(
		"Running command: {} {} in {working_dir}",
		shared.program,
		shared.args.iter().join(" ")
	);

	Launch { inner, buffered, timeout: state.timeout, stdin, stdout, stderr }
}

async fn supervise(shared: &Shared) -> Status {
	let Launch { mut inner, buffered, timeout, stdin, stdout, stderr } = prepare(shared);

	let started_at = SystemTime::now();
	let start_time = Instant::now();
	let mut child = match inner.spawn() {
		Ok(child) => child,
		Err(error) => return fail_to_start(shared, &error, started_at),
	};

	let pid = child.id().unwrap_or(0);
	let stdout_buffer = buffered.then(|| Arc::new(LineBuffer::new()));
	let stderr_buffer = buffered.then(|| Arc::new(LineBuffer::new()));
	mark_started(shared, pid, started_at, start_time, &stdout_buffer, &stderr_buffer);

	let stdin_pump = match (stdin, child.stdin.take()) {
		(Some(lines), Some(pipe)) => Some(tokio::spawn(pump_stdin(lines, pipe))),
		_ => None,
	};

	let stdout_drain =
		drain(child.stdout.take(), OutputSink::new(stdout_buffer, stdout), "stdout");
	let stderr_drain =
		drain(child.stderr.take(), OutputSink::new(stderr_buffer, stderr), "stderr");

	// The exit is only classified once both pipes reached EOF, so no output is lost.
	let supervised = join3(child.wait(), stdout_drain, stderr_drain);
	tokio::pin!(supervised);

	let (exit, stdout_overflow, stderr_overflow) = match timeout {
		Some(timeout) => tokio::select! {
			finished = &mut supervised => finished,
			_ = tokio::time::sleep(timeout) => {
				warn!(program = %shared.program, pid, ?timeout, "command timed out, killing process group");
				if let Err(error) = signal_group(pid, Signal::SIGKILL) {
					warn!(program = %shared.program, pid, %error, "failed to kill process group");
				}
				supervised.await
			}
		},
		None => supervised.await,
	};

	if let Some(pump) = stdin_pump {
		pump.abort();
	}

	{
		let mut state = shared.lock();
		state.stdout_overflow = stdout_overflow;
		state.stderr_overflow = stderr_overflow;
	}

	finish(shared, exit, start_time)
}

fn fail_to_start(shared: &Shared, error: &io::Error, started_at: SystemTime) -> Status {
	warn!(program = %shared.program, %error, "failed to start command");

	let mut state = shared.lock();
	let error = ProcessError::spawn(&shared.program, state.dir.as_deref(), error);
	state.status.error = Some(error);
	state.status.start_ts = unix_nanos(started_at);
	state.status.stop_ts = unix_nanos(SystemTime::now());
	state.done = true;
	state.finalized = true;
	state.status.clone()
}

fn mark_started(
	shared: &Shared,
	pid: u32,
	started_at: SystemTime,
	start_time: Instant,
	stdout: &Option<Arc<LineBuffer>>,
	stderr: &Option<Arc<LineBuffer>>,
) {
	debug!(program = %shared.program, pid, "process started");

	let mut state = shared.lock();
	state.start_time = Some(start_time);
	state.status.pid = pid;
	state.status.start_ts = unix_nanos(started_at);
	state.stdout = stdout.clone();
	state.stderr = stderr.clone();
	state.started = true;
}

fn finish(shared: &Shared, exit: io::Result<ExitStatus>, start_time: Instant) -> Status {
	let runtime = start_time.elapsed();
	let stopped_at = SystemTime::now();
	let (code, error) = classify(exit);

	let mut state = shared.lock();
	if !state.stopped && error.is_none() {
		state.status.complete = true;
	}
	state.status.runtime = runtime.as_secs_f64();
	state.status.stop_ts = unix_nanos(stopped_at);
	state.status.exit = code;
	state.status.error = error;
	state.done = true;
	state.finalize_output();

	debug!(
		program = %shared.program,
		pid = state.status.pid,
		exit = code,
		complete = state.status.complete,
		stopped = state.stopped,
		"process finished"
	);
	state.status.clone()
}

/// Turns the wait result into an exit code and an error.
///
/// A non-zero exit is not an error; only termination by a signal or a failed wait is.
fn classify(exit: io::Result<ExitStatus>) -> (i32, Option<ProcessError>) {
	match exit {
		Ok(status) => match (status.code(), status.signal()) {
			(Some(code), _) => (code, None),
			(None, Some(signal)) => (-1, Some(ProcessError::Signaled(ExitSignal::from_raw(signal)))),
			(None, None) => (-1, None),
		},
		Err(error) => (0, Some(ProcessError::Wait { reason: error.to_string() })),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_classify_exit_codes() {
		assert_eq!(classify(Ok(ExitStatus::from_raw(0))), (0, None));
		// wait status 0x0300 is a normal exit with code 3
		assert_eq!(classify(Ok(ExitStatus::from_raw(3 << 8))), (3, None));
	}

	#[test]
	fn test_classify_signals() {
		// a raw wait status below 0x80 is the terminating signal
		let (code, error) = classify(Ok(ExitStatus::from_raw(Signal::SIGTERM as i32)));
		assert_eq!(code, -1);
		assert_eq!(error.map(|error| error.to_string()).as_deref(), Some("signal: terminated"));
	}

	#[test]
	fn test_classify_wait_error() {
		let (code, error) = classify(Err(io::Error::new(io::ErrorKind::Other, "boom")));
		assert_eq!(code, 0);
		assert_eq!(error, Some(ProcessError::Wait { reason: "boom".to_string() }));
	}
}
