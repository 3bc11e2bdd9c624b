use crate::run::signal::ExitSignal;
use std::io;
use std::path::Path;
use thiserror::Error;

/// Errors reported in [crate::Status::error] and returned by [crate::Command] operations.
///
/// A non-zero exit is not an error: it is reported through [crate::Status::exit].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProcessError {
	#[error("exec {program:?}: {reason}")]
	Spawn { program: String, kind: io::ErrorKind, reason: String },

	#[error("signal: {0}")]
	Signaled(ExitSignal),

	#[error("failed to wait for process: {reason}")]
	Wait { reason: String },

	#[error("failed to signal process group {pid}: {reason}")]
	Signal { pid: u32, reason: String },

	#[error("command {program:?} has already been started")]
	AlreadyStarted { program: String },
}

impl ProcessError {
	/// Wraps a failure to launch `program` from the working directory `dir`.
	///
	/// `NotFound` is only blamed on the executable when the working directory exists; a missing
	/// directory reports the same kind.
	pub(crate) fn spawn(program: &str, dir: Option<&Path>, error: &io::Error) -> Self {
		let lookup_failed =
			error.kind() == io::ErrorKind::NotFound && dir.map_or(true, |dir| dir.is_dir());
		let reason = if lookup_failed {
			format!("executable file not found: {error}")
		} else {
			error.to_string()
		};
		ProcessError::Spawn { program: program.to_string(), kind: error.kind(), reason }
	}

	/// Returns true if the process was terminated by a signal.
	pub fn is_signaled(&self) -> bool {
		matches!(self, ProcessError::Signaled(_))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_not_found_reason() {
		let error = io::Error::new(io::ErrorKind::NotFound, "No such file or directory");
		let error = ProcessError::spawn("cmd-does-not-exist", None, &error);

		assert_eq!(
			error.to_string(),
			"exec \"cmd-does-not-exist\": executable file not found: No such file or directory"
		);
	}

	#[test]
	fn test_missing_directory_keeps_reason() {
		let error = io::Error::new(io::ErrorKind::NotFound, "No such file or directory");
		let dir = Path::new("/definitely/not/here");
		let error = ProcessError::spawn("echo", Some(dir), &error);

		assert_eq!(error.to_string(), "exec \"echo\": No such file or directory");
		assert!(matches!(error, ProcessError::Spawn { kind: io::ErrorKind::NotFound, .. }));
	}

	#[test]
	fn test_other_spawn_errors_keep_reason() {
		let error = io::Error::new(io::ErrorKind::PermissionDenied, "Permission denied");
		let error = ProcessError::spawn("./script.sh", None, &error);

		assert_eq!(error.to_string(), "exec \"./script.sh\": Permission denied");
	}

	#[test]
	fn test_signal_messages() {
		let terminated = ProcessError::Signaled(ExitSignal::from_raw(15));
		let killed = ProcessError::Signaled(ExitSignal::from_raw(9));

		assert_eq!(terminated.to_string(), "signal: terminated");
		assert_eq!(killed.to_string(), "signal: killed");
		assert!(killed.is_signaled());
	}
}
