use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::fmt;

/// The signal that terminated a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExitSignal(i32);

impl ExitSignal {
	pub fn from_raw(signal: i32) -> Self {
		Self(signal)
	}

	/// The raw signal number.
	pub fn as_raw(&self) -> i32 {
		self.0
	}
}

impl fmt::Display for ExitSignal {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match Signal::try_from(self.0) {
			Ok(Signal::SIGHUP) => "hangup",
			Ok(Signal::SIGINT) => "interrupt",
			Ok(Signal::SIGQUIT) => "quit",
			Ok(Signal::SIGILL) => "illegal instruction",
			Ok(Signal::SIGTRAP) => "trace/breakpoint trap",
			Ok(Signal::SIGABRT) => "aborted",
			Ok(Signal::SIGBUS) => "bus error",
			Ok(Signal::SIGFPE) => "floating point exception",
			Ok(Signal::SIGKILL) => "killed",
			Ok(Signal::SIGUSR1) => "user defined signal 1",
			Ok(Signal::SIGSEGV) => "segmentation fault",
			Ok(Signal::SIGUSR2) => "user defined signal 2",
			Ok(Signal::SIGPIPE) => "broken pipe",
			Ok(Signal::SIGALRM) => "alarm clock",
			Ok(Signal::SIGTERM) => "terminated",
			Ok(Signal::SIGXCPU) => "CPU time limit exceeded",
			Ok(Signal::SIGXFSZ) => "file size limit exceeded",
			Ok(Signal::SIGVTALRM) => "virtual timer expired",
			Ok(Signal::SIGPROF) => "profiling timer expired",
			Ok(Signal::SIGSYS) => "bad system call",
			_ => return write!(f, "signal {}", self.0),
		};
		f.write_str(name)
	}
}

/// Sends `signal` to every process in the group led by `pid`.
pub(crate) fn signal_group(pid: u32, signal: Signal) -> nix::Result<()> {
	// Equivalent to kill(-pid, signal). Group 0 would be our own.
	let pgid = i32::try_from(pid).ok().filter(|pgid| *pgid > 0).ok_or(nix::errno::Errno::ESRCH)?;
	killpg(Pid::from_raw(pgid), signal)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_unknown_signal_falls_back_to_number() {
		assert_eq!(ExitSignal::from_raw(64).to_string(), "signal 64");
		assert_eq!(ExitSignal::from_raw(2).to_string(), "interrupt");
		assert_eq!(ExitSignal::from_raw(2).as_raw(), 2);
	}
}
