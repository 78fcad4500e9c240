use std::{
	collections::{BTreeMap, VecDeque},
	ops::{Deref, DerefMut},
	sync::{Arc, Mutex},
};

use bytes::BytesMut;

/// Limits applied to a [BytesPool].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BytesPoolConfig {
	/// The maximum number of buffers kept per capacity class; the oldest is evicted first.
	pub max_per_bucket: usize,

	/// The maximum number of bytes kept across all buckets, or 0 for no limit.
	pub max_total_bytes: usize,
}

impl Default for BytesPoolConfig {
	fn default() -> Self {
		Self {
			max_per_bucket: 5,
			max_total_bytes: 0,
		}
	}
}

#[derive(Default)]
struct PoolState {
	// Keyed by the largest power of two not exceeding the capacity.
	buckets: BTreeMap<usize, VecDeque<BytesMut>>,
	total: usize,
}

/// A pool of reusable buffers, bucketed by capacity.
#[derive(Clone, Default)]
pub struct BytesPool {
	state: Arc<Mutex<PoolState>>,
	config: BytesPoolConfig,
}

impl BytesPool {
	pub fn new(config: BytesPoolConfig) -> Self {
		Self {
			state: Default::default(),
			config,
		}
	}

	/// Return an empty buffer with at least the given capacity.
	///
	/// The buffer is returned to the pool when the guard is dropped.
	pub fn acquire(&self, capacity: usize) -> PooledBytes {
		let capacity = capacity.max(1).next_power_of_two();

		let reused = {
			let mut state = self.state.lock().unwrap();
			// Only the request's class and the next one up, so small requests don't take large buffers.
			let found = state
				.buckets
				.range_mut(capacity..=capacity.saturating_mul(2))
				.find_map(|(_, bucket)| {
					let index = bucket.iter().position(|buf| buf.capacity() >= capacity)?;
					bucket.remove(index)
				});

			if let Some(buf) = &found {
				state.total -= buf.capacity();
			}
			found
		};

		let buf = match reused {
			Some(mut buf) => {
				buf.clear();
				buf
			}
			None => BytesMut::with_capacity(capacity),
		};

		PooledBytes {
			buf,
			pool: self.clone(),
		}
	}

	fn release(&self, mut buf: BytesMut) {
		let capacity = buf.capacity();
		if capacity == 0 || self.config.max_per_bucket == 0 {
			return;
		}

		if self.config.max_total_bytes > 0 && capacity > self.config.max_total_bytes {
			return;
		}

		buf.clear();

		// The largest power of two that is <= capacity.
		let class = 1 << capacity.ilog2();

		let mut state = self.state.lock().unwrap();

		let mut evicted = 0;
		{
			let bucket = state.buckets.entry(class).or_default();
			bucket.push_back(buf);

			while bucket.len() > self.config.max_per_bucket {
				if let Some(old) = bucket.pop_front() {
					evicted += old.capacity();
				}
			}
		}
		state.total = state.total + capacity - evicted;

		// Evict the oldest buffers from the largest buckets until we're under budget.
		while self.config.max_total_bytes > 0 && state.total > self.config.max_total_bytes {
			let old = {
				let Some(mut entry) = state.buckets.last_entry() else {
					break;
				};

				let old = entry.get_mut().pop_front();
				if entry.get().is_empty() {
					entry.remove();
				}
				old
			};

			match old {
				Some(old) => state.total -= old.capacity(),
				None => break,
			}
		}
	}

	/// Drop every pooled buffer.
	pub fn cleanup(&self) {
		let mut state = self.state.lock().unwrap();
		state.buckets.clear();
		state.total = 0;
	}

	/// The number of bytes currently held by the pool.
	pub fn size(&self) -> usize {
		self.state.lock().unwrap().total
	}
}

/// A buffer borrowed from a [BytesPool].
pub struct PooledBytes {
	buf: BytesMut,
	pool: BytesPool,
}

impl Deref for PooledBytes {
	type Target = BytesMut;

	fn deref(&self) -> &BytesMut {
		&self.buf
	}
}

impl DerefMut for PooledBytes {
	fn deref_mut(&mut self) -> &mut BytesMut {
		&mut self.buf
	}
}

impl Drop for PooledBytes {
	fn drop(&mut self) {
		let buf = std::mem::take(&mut self.buf);
		self.pool.release(buf);
	}
}
