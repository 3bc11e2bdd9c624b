//! End-to-end scenarios for procwatch.
//! The fixtures are small bash scripts so the tests only need bash and coreutils.

pub mod fixtures {
	use procwatch::{Command, Options};
	use std::path::Path;

	/// Prints 1 through `$1`, sleeping `$2` seconds after each number.
	pub const COUNT_AND_SLEEP: &str = r#"for i in $(seq 1 "$1"); do echo "$i"; sleep "$2"; done"#;

	/// Prints `stdout N` and `stderr N` pairs until the file `$1` exists.
	pub const STREAM: &str = r#"i=0
while [ ! -e "$1" ]; do
	i=$((i+1))
	echo "stdout $i"
	echo "stderr $i" >&2
	sleep 0.1
done"#;

	/// Prints a running count each time the file `$1` appears, then removes it.
	pub const TOUCH_FILE_COUNT: &str = r#"i=0
while true; do
	if [ -e "$1" ]; then
		i=$((i+1))
		echo "$i"
		rm -f "$1"
	fi
	sleep 0.1
done"#;

	fn script(options: Options, script: &str, name: &str, args: &[String]) -> Command {
		let mut argv = vec!["-c".to_string(), script.to_string(), name.to_string()];
		argv.extend(args.iter().cloned());
		Command::with_options(options, "bash", argv)
	}

	pub fn count_and_sleep(count: u32, seconds: u32) -> Command {
		script(
			Options::default(),
			COUNT_AND_SLEEP,
			"count-and-sleep",
			&[count.to_string(), seconds.to_string()],
		)
	}

	pub fn stream(options: Options, marker: &Path) -> Command {
		script(options, STREAM, "stream", &[marker.to_string_lossy().into_owned()])
	}

	pub fn touch_file_count(marker: &Path) -> Command {
		script(
			Options::default(),
			TOUCH_FILE_COUNT,
			"touch-file-count",
			&[marker.to_string_lossy().into_owned()],
		)
	}
}
