use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default capacity of the stdout and stderr line channels when streaming is enabled.
///
/// Too small a capacity makes the output writers wait on the receiver more often.
pub const DEFAULT_STREAM_CHANNEL_SIZE: usize = 1000;

/// Default capacity of the stdin line channel.
pub const DEFAULT_STDIN_CHANNEL_SIZE: usize = 1;

/// Customizations applied to a [crate::Command] before it starts.
///
/// Options can be embedded in a larger configuration: missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
	/// Write stdout and stderr to [crate::Status::stdout] and [crate::Status::stderr].
	pub buffered: bool,

	/// Create the stdout and stderr line channels and send output to them as it arrives.
	/// The caller must read both channels, or the process stalls once they fill up.
	pub streaming: bool,

	/// Create a stdin line channel; each line sent is written to the process followed by `\n`.
	pub stdin: bool,

	/// Kill the process group if it is still running after this long. Zero means no timeout.
	pub timeout: Option<Duration>,

	/// `KEY=VALUE` entries. Empty means the parent environment is inherited; otherwise the
	/// process gets exactly these variables.
	pub env: Vec<String>,
}

impl Default for Options {
	fn default() -> Self {
		Self { buffered: true, streaming: false, stdin: false, timeout: None, env: Vec::new() }
	}
}

impl Options {
	pub fn buffered(mut self, buffered: bool) -> Self {
		self.buffered = buffered;
		self
	}

	pub fn streaming(mut self) -> Self {
		self.streaming = true;
		self
	}

	pub fn disable_streaming(mut self) -> Self {
		self.streaming = false;
		self
	}

	pub fn stdin(mut self) -> Self {
		self.stdin = true;
		self
	}

	pub fn timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);
		self
	}

	/// Appends a `KEY=VALUE` entry to the environment.
	pub fn env(mut self, entry: impl Into<String>) -> Self {
		self.env.push(entry.into());
		self
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_builder_helpers() {
		let options = Options::default()
			.buffered(false)
			.streaming()
			.stdin()
			.timeout(Duration::from_secs(2))
			.env("A=1")
			.env("B=2");

		assert!(!options.buffered);
		assert!(options.streaming);
		assert!(options.stdin);
		assert_eq!(options.timeout, Some(Duration::from_secs(2)));
		assert_eq!(options.env, vec!["A=1", "B=2"]);
		assert!(!options.disable_streaming().streaming);
	}

	#[test]
	fn test_partial_config_uses_defaults() -> Result<(), anyhow::Error> {
		let options: Options =
			serde_json::from_str(r#"{ "streaming": true, "timeout": { "secs": 3, "nanos": 0 } }"#)?;

		assert_eq!(options, Options::default().streaming().timeout(Duration::from_secs(3)));
		Ok(())
	}
}
