//! Write-once values that any number of tasks can wait on.
//!
//! A [Latch] is published exactly once by its [LatchWriter] and observed by any number of
//! [LatchReader]s. Readers that arrive after publication see the value immediately.
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::{sleep, Duration};

struct Inner<T> {
	value: OnceLock<T>,
	notify: Notify,
}

/// Main latch container holding a value that can be set once.
pub struct Latch<T: Clone + Send + Sync + 'static> {
	inner: Arc<Inner<T>>,
}

/// Wrapper for the publishing side of a latch
pub struct LatchWriter<T: Clone + Send + Sync + 'static> {
	inner: Arc<Inner<T>>,
}

/// Wrapper for the observing side of a latch
pub struct LatchReader<T: Clone + Send + Sync + 'static> {
	inner: Arc<Inner<T>>,
}

impl<T: Clone + Send + Sync + 'static> Clone for LatchReader<T> {
	fn clone(&self) -> Self {
		Self { inner: self.inner.clone() }
	}
}

impl<T: Clone + Send + Sync + 'static> std::fmt::Debug for LatchReader<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("LatchReader").field("set", &self.is_set()).finish()
	}
}

/// Errors returned by latch operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LatchError {
	#[error("latch value has already been set")]
	AlreadySet,

	#[error("latch was not set within {0:?}")]
	Timeout(Duration),
}

impl<T: Clone + Send + Sync + 'static> Default for Latch<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T: Clone + Send + Sync + 'static> Latch<T> {
	/// Creates a new unset latch.
	pub fn new() -> Self {
		Self { inner: Arc::new(Inner { value: OnceLock::new(), notify: Notify::new() }) }
	}

	/// Returns the publishing side of the latch.
	pub fn writer(&self) -> LatchWriter<T> {
		LatchWriter { inner: self.inner.clone() }
	}

	/// Returns an observing side of the latch.
	pub fn reader(&self) -> LatchReader<T> {
		LatchReader { inner: self.inner.clone() }
	}
}

impl<T: Clone + Send + Sync + 'static> LatchWriter<T> {
	/// Publishes the value and wakes every waiting reader.
	///
	/// Only the first call has an effect; later calls return [LatchError::AlreadySet].
	pub fn set(&self, value: T) -> Result<(), LatchError> {
		self.inner.value.set(value).map_err(|_| LatchError::AlreadySet)?;
		self.inner.notify.notify_waiters();
		Ok(())
	}
}

impl<T: Clone + Send + Sync + 'static> LatchReader<T> {
	/// Waits for the latch to be set and returns a clone of the value.
	pub async fn wait(&self) -> T {
		loop {
			if let Some(value) = self.inner.value.get() {
				return value.clone();
			}

			// Registered before the second check, so a concurrent `set` cannot be missed.
			let notified = self.inner.notify.notified();

			if let Some(value) = self.inner.value.get() {
				return value.clone();
			}

			notified.await;
		}
	}

	/// Waits for the latch to be set up to a given duration.
	pub async fn wait_for_duration(&self, duration: Duration) -> Result<T, LatchError> {
		tokio::select! {
			value = self.wait() => Ok(value),
			_ = sleep(duration) => Err(LatchError::Timeout(duration)),
		}
	}

	/// Checks if the value is already set.
	pub fn is_set(&self) -> bool {
		self.inner.value.get().is_some()
	}

	/// Gets a clone of the value if it has been published.
	pub fn get(&self) -> Option<T> {
		self.inner.value.get().cloned()
	}

	/// Returns true if both readers observe the same latch.
	pub fn same_latch(&self, other: &LatchReader<T>) -> bool {
		Arc::ptr_eq(&self.inner, &other.inner)
	}
}

#[cfg(test)]
pub mod test {

	use super::*;

	#[tokio::test]
	async fn test_many_readers_see_single_value() -> Result<(), anyhow::Error> {
		let latch = Latch::new();
		let writer = latch.writer();

		let readers: Vec<_> = (0..4)
			.map(|_| {
				let reader = latch.reader();
				tokio::spawn(async move { reader.wait().await })
			})
			.collect();

		writer.set("done".to_string())?;

		for reader in readers {
			assert_eq!(reader.await?, "done");
		}

		Ok(())
	}

	#[tokio::test]
	async fn test_second_set_is_rejected() -> Result<(), anyhow::Error> {
		let latch = Latch::new();
		let writer = latch.writer();

		writer.set(1)?;
		assert_eq!(writer.set(2), Err(LatchError::AlreadySet));
		assert_eq!(latch.reader().get(), Some(1));

		Ok(())
	}

	#[tokio::test]
	async fn test_late_reader_returns_immediately() -> Result<(), anyhow::Error> {
		let latch = Latch::new();
		latch.writer().set(7u32)?;

		let value = latch.reader().wait_for_duration(Duration::from_millis(10)).await?;
		assert_eq!(value, 7);

		Ok(())
	}

	#[tokio::test]
	async fn test_wait_for_duration_times_out() {
		let latch: Latch<u32> = Latch::new();
		let reader = latch.reader();

		let result = reader.wait_for_duration(Duration::from_millis(20)).await;
		assert_eq!(result, Err(LatchError::Timeout(Duration::from_millis(20))));
		assert!(!reader.is_set());
	}

	#[tokio::test]
	async fn test_reader_identity() {
		let a: Latch<u8> = Latch::new();
		let b: Latch<u8> = Latch::new();

		assert!(a.reader().same_latch(&a.reader()));
		assert!(!a.reader().same_latch(&b.reader()));
	}
}
