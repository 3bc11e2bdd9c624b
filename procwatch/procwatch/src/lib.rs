//! Runs external commands with concurrent access to their output and status.
//!
//! A [Command] is started once. While it runs, any number of tasks can read its [Status],
//! stop it, or wait for it to finish; when it ends for any reason exactly one final status is
//! published.
//!
//! ```no_run
//! # async fn example() {
//! use procwatch::Command;
//!
//! let command = Command::new("env", Vec::<String>::new());
//! let status = command.start().recv().await;
//! for line in status.stdout.unwrap_or_default() {
//!     println!("{line}");
//! }
//! # }
//! ```
//!
//! Output is buffered by default and can also be streamed line by line, see [Options].
pub mod command;
pub mod error;
pub mod options;
pub(crate) mod run;
pub mod shell;
pub mod status;

pub use command::{Command, Done, StatusReceiver};
pub use error::ProcessError;
pub use options::{Options, DEFAULT_STDIN_CHANNEL_SIZE, DEFAULT_STREAM_CHANNEL_SIZE};
pub use procwatch_output::{LineBuffer, LineBufferOverflow, LineStream, DEFAULT_LINE_BUFFER_SIZE};
pub use procwatch_state::LatchError;
pub use run::signal::ExitSignal;
pub use shell::{bash, bash_liner, run};
pub use status::Status;
