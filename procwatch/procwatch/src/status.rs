use crate::error::ProcessError;
use std::time::{SystemTime, UNIX_EPOCH};

/// The running status and consolidated result of a [crate::Command].
///
/// It can be obtained at any time with [crate::Command::status]. A non-zero `start_ts` means
/// the command started; a non-zero `stop_ts` means it stopped. Check `error` first: if set,
/// the process either never ran or was terminated by a signal. Otherwise `exit` and
/// `complete` describe how it ended. Success, presuming the program only exits zero on
/// success, is `error == None`, `exit == 0`, `complete == true`.
#[derive(Debug, Clone, PartialEq)]
pub struct Status {
	pub program: String,
	/// Zero until the process has been spawned.
	pub pid: u32,
	/// False if stopped, signaled, or never started.
	pub complete: bool,
	/// Exit code, -1 if signaled or never ran.
	pub exit: i32,
	pub error: Option<ProcessError>,
	/// Unix timestamp in nanoseconds, zero if not started.
	pub start_ts: i64,
	/// Unix timestamp in nanoseconds, zero if not started or still running.
	pub stop_ts: i64,
	/// Seconds, updated while running and frozen once the process ends.
	pub runtime: f64,
	/// Buffered stdout lines; `None` if the process never started or buffering is disabled.
	pub stdout: Option<Vec<String>>,
	/// Buffered stderr lines; `None` if the process never started or buffering is disabled.
	pub stderr: Option<Vec<String>>,
}

impl Status {
	pub(crate) fn new(program: &str) -> Self {
		Self {
			program: program.to_string(),
			pid: 0,
			complete: false,
			exit: -1,
			error: None,
			start_ts: 0,
			stop_ts: 0,
			runtime: 0.0,
			stdout: None,
			stderr: None,
		}
	}

	/// Ran to completion and exited zero.
	pub fn success(&self) -> bool {
		self.error.is_none() && self.complete && self.exit == 0
	}
}

/// Nanoseconds since the Unix epoch.
pub(crate) fn unix_nanos(time: SystemTime) -> i64 {
	time.duration_since(UNIX_EPOCH)
		.map(|elapsed| i64::try_from(elapsed.as_nanos()).unwrap_or(i64::MAX))
		.unwrap_or(0)
}
