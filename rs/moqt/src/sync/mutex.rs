use std::{
	future::Future,
	ops::{Deref, DerefMut},
	sync::Arc,
};

use tokio::sync::{oneshot, OwnedMutexGuard};

/// An async mutex that grants the lock in the order [Mutex::lock] was called.
///
/// Each caller reserves its turn synchronously by swapping the tail of a chain of one-shot channels.
/// The turn is released when the previous holder drops its guard, or abandons its reservation.
pub struct Mutex<T> {
	value: Arc<tokio::sync::Mutex<T>>,
	tail: std::sync::Mutex<oneshot::Receiver<()>>,
}

impl<T: Send + 'static> Mutex<T> {
	pub fn new(value: T) -> Self {
		// A closed channel, so the first caller acquires immediately.
		let (_, tail) = oneshot::channel();

		Self {
			value: Arc::new(tokio::sync::Mutex::new(value)),
			tail: std::sync::Mutex::new(tail),
		}
	}

	/// Reserve a turn and return a future that resolves once it is our turn.
	///
	/// The reservation is made when this function is called, not when the future is first polled.
	pub fn lock(&self) -> impl Future<Output = MutexGuard<T>> + Send + 'static {
		let (next, rx) = oneshot::channel();
		let previous = std::mem::replace(&mut *self.tail.lock().unwrap(), rx);

		let mut turn = Turn {
			previous: Some(previous),
			next: Some(next),
		};
		let value = self.value.clone();

		async move {
			if let Some(previous) = turn.previous.as_mut() {
				// A dropped sender also releases the turn.
				let _ = previous.await;
			}
			turn.previous = None;

			// Uncontended; the chain already guarantees exclusive access.
			let value = value.lock_owned().await;

			MutexGuard {
				value,
				_next: turn.next.take(),
			}
		}
	}
}

struct Turn {
	previous: Option<oneshot::Receiver<()>>,
	next: Option<oneshot::Sender<()>>,
}

impl Drop for Turn {
	fn drop(&mut self) {
		// Abandoned while still waiting, so forward the previous release to the next waiter.
		let (Some(mut previous), Some(next)) = (self.previous.take(), self.next.take()) else {
			return;
		};

		match previous.try_recv() {
			Err(oneshot::error::TryRecvError::Empty) => {
				web_async::spawn(async move {
					let _ = previous.await;
					drop(next);
				});
			}
			_ => drop(next),
		}
	}
}

/// Grants access to the value until dropped.
pub struct MutexGuard<T> {
	// Dropped in declaration order: the value is released before the next waiter is woken.
	value: OwnedMutexGuard<T>,
	_next: Option<oneshot::Sender<()>>,
}

impl<T> Deref for MutexGuard<T> {
	type Target = T;

	fn deref(&self) -> &T {
		&self.value
	}
}

impl<T> DerefMut for MutexGuard<T> {
	fn deref_mut(&mut self) -> &mut T {
		&mut self.value
	}
}
