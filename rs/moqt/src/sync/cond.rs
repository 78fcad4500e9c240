use std::{future::Future, sync::Arc};

use tokio::sync::watch;

/// A condition variable that wakes every waiter on broadcast.
///
/// Waiters registered after a broadcast wait for the next one.
#[derive(Clone)]
pub struct Cond {
	generation: Arc<watch::Sender<u64>>,
}

impl Cond {
	pub fn new() -> Self {
		Self {
			generation: Arc::new(watch::Sender::new(0)),
		}
	}

	/// Register a waiter for the next broadcast.
	///
	/// Registration happens when this is called, not when the future is first polled.
	pub fn wait(&self) -> impl Future<Output = ()> + Send + 'static {
		let mut rx = self.generation.subscribe();
		async move {
			// Also returns if the Cond is dropped.
			let _ = rx.changed().await;
		}
	}

	/// Wake every registered waiter.
	pub fn broadcast(&self) {
		self.generation.send_modify(|generation| *generation = generation.wrapping_add(1));
	}
}

impl Default for Cond {
	fn default() -> Self {
		Self::new()
	}
}
