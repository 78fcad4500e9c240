use crate::Error;

/// An unbounded FIFO queue with a suspending dequeue.
pub struct Queue<T> {
	tx: async_channel::Sender<T>,
	rx: async_channel::Receiver<T>,
}

impl<T> Queue<T> {
	pub fn new() -> Self {
		let (tx, rx) = async_channel::unbounded();
		Self { tx, rx }
	}

	/// Append an item, failing if the queue is closed.
	pub fn enqueue(&self, item: T) -> Result<(), Error> {
		self.tx.try_send(item).map_err(|_| Error::Closed)
	}

	/// Wait for the next item.
	///
	/// Returns None once the queue is closed and drained.
	pub async fn dequeue(&self) -> Option<T> {
		self.rx.recv().await.ok()
	}

	/// Close the queue, waking every pending dequeue once drained.
	pub fn close(&self) -> bool {
		self.tx.close()
	}

	pub fn is_closed(&self) -> bool {
		self.tx.is_closed()
	}

	pub fn len(&self) -> usize {
		self.rx.len()
	}

	pub fn is_empty(&self) -> bool {
		self.rx.is_empty()
	}
}

impl<T> Clone for Queue<T> {
	fn clone(&self) -> Self {
		Self {
			tx: self.tx.clone(),
			rx: self.rx.clone(),
		}
	}
}

impl<T> Default for Queue<T> {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn fifo() {
		let queue = Queue::new();
		queue.enqueue(1).unwrap();
		queue.enqueue(2).unwrap();
		queue.enqueue(3).unwrap();
		assert_eq!(queue.len(), 3);

		assert_eq!(queue.dequeue().await, Some(1));
		assert_eq!(queue.dequeue().await, Some(2));

		queue.close();
		assert!(queue.enqueue(4).is_err());

		// Remaining items are drained before None.
		assert_eq!(queue.dequeue().await, Some(3));
		assert_eq!(queue.dequeue().await, None);
	}

	#[tokio::test]
	async fn suspends() {
		let queue = Queue::new();
		let producer = queue.clone();

		let handle = tokio::spawn(async move { queue.dequeue().await });
		tokio::task::yield_now().await;

		producer.enqueue("hello").unwrap();
		assert_eq!(handle.await.unwrap(), Some("hello"));
	}
}
