use std::sync::{Arc, Weak};

use bytes::BytesMut;

use crate::{
	coding::*,
	message::MAX_FRAME_SIZE,
	sync::{BytesPool, Mutex},
	CancelCauseFunc, Context, Error, GroupErrorCode, StreamError,
};

/// Writes frames to a single group stream.
#[derive(Clone)]
pub struct GroupWriter {
	inner: Arc<WriterState>,
}

struct WriterState {
	sequence: u64,
	writer: Mutex<Writer>,
	pool: BytesPool,
	ctx: Context,
	cancel: CancelCauseFunc,
}

impl GroupWriter {
	/// Wrap a stream that already carries the group header.
	pub(crate) fn new(parent: &Context, sequence: u64, writer: Writer, pool: BytesPool) -> Self {
		let (ctx, cancel) = parent.with_cancel_cause();

		let inner = Arc::new(WriterState {
			sequence,
			writer: Mutex::new(writer),
			pool,
			ctx,
			cancel,
		});

		web_async::spawn(Self::watch(Arc::downgrade(&inner)));

		Self { inner }
	}

	// Reset the stream if the context is cancelled before the group was finished.
	// Holds a weak reference so dropping every handle resets the stream instead.
	async fn watch(state: Weak<WriterState>) {
		let Some(done) = state.upgrade().map(|state| state.ctx.done()) else {
			return;
		};

		let cause = done.await;

		let Some(state) = state.upgrade() else {
			return;
		};

		let mut writer = state.writer.lock().await;
		if writer.is_closed() {
			return;
		}

		let code = match &cause {
			Error::Stream(err) => err.code,
			_ => GroupErrorCode::SubscribeCanceled.into(),
		};

		tracing::debug!(sequence = state.sequence, %cause, code, "group cancelled");
		writer.reset(code);
	}

	/// Write a frame as a length prefix followed by the payload, in a single write.
	pub async fn write_frame(&self, payload: &[u8]) -> Result<(), Error> {
		if let Some(err) = self.inner.ctx.err() {
			return Err(err);
		}

		if payload.len() > MAX_FRAME_SIZE {
			return Err(DecodeError::BoundsExceeded(BoundsExceeded).into());
		}

		let mut buf = self.inner.pool.acquire(payload.len() + 8);
		payload.len().encode(&mut *buf);
		buf.extend_from_slice(payload);

		let turn = self.inner.writer.lock();

		let res = tokio::select! {
			biased;
			err = self.inner.ctx.done() => Err(err),
			res = async {
				let mut writer = turn.await;
				writer.write_all(&buf).await
			} => res,
		};

		if let Err(err) = &res {
			tracing::debug!(%err, sequence = self.inner.sequence, "failed to write frame");
			self.inner.cancel.cancel(err.clone());
		}

		res
	}

	/// Finish the stream after every pending frame.
	pub async fn close(&self) -> Result<(), Error> {
		let mut writer = self.inner.writer.lock().await;
		if writer.is_closed() {
			return Ok(());
		}

		if let Some(err) = self.inner.ctx.err() {
			return Err(err);
		}

		let res = writer.finish();
		drop(writer);

		self.inner.cancel.cancel(res.clone().err().unwrap_or(Error::Closed));
		res
	}

	/// Reset the stream with the given code.
	pub async fn close_with_error(&self, code: GroupErrorCode) {
		let mut writer = self.inner.writer.lock().await;
		writer.reset(code.into());
		drop(writer);

		self.inner.cancel.cancel(Error::from(StreamError::new(code, "")));
	}

	pub fn sequence(&self) -> u64 {
		self.inner.sequence
	}

	/// The lifetime of the group stream.
	pub fn context(&self) -> &Context {
		&self.inner.ctx
	}
}

/// Reads frames from a single group stream.
pub struct GroupReader {
	sequence: u64,
	reader: Reader,
	ctx: Context,
	cancel: CancelCauseFunc,
}

impl GroupReader {
	/// Wrap a stream whose group header was already decoded.
	pub(crate) fn new(parent: &Context, sequence: u64, reader: Reader) -> Self {
		let (ctx, cancel) = parent.with_cancel_cause();

		Self {
			sequence,
			reader,
			ctx,
			cancel,
		}
	}

	/// Read the next frame into `dest`, replacing its contents.
	///
	/// `dest` only grows when it is too small, to `max(capacity * 2, size)`.
	/// Returns None once the group is finished.
	pub async fn read_frame(&mut self, dest: &mut BytesMut) -> Result<Option<usize>, Error> {
		if let Some(err) = self.ctx.err() {
			return Err(err);
		}

		let done = self.ctx.done();

		let res = tokio::select! {
			biased;
			cause = done => {
				self.stop(&cause);
				return Err(cause);
			}
			res = Self::read(&mut self.reader, dest) => res,
		};

		match &res {
			Ok(Some(size)) => tracing::trace!(sequence = self.sequence, size, "read frame"),
			Ok(None) => self.cancel.cancel(Error::Closed),
			Err(err) => {
				tracing::debug!(%err, sequence = self.sequence, "failed to read frame");
				self.cancel.cancel(err.clone());
				if !matches!(err, Error::Stream(StreamError { remote: true, .. })) {
					self.reader.abort(err);
				}
			}
		}

		res
	}

	async fn read(reader: &mut Reader, dest: &mut BytesMut) -> Result<Option<usize>, Error> {
		let Some(size) = reader.decode_maybe::<usize>().await? else {
			return Ok(None);
		};

		if size > MAX_FRAME_SIZE {
			return Err(DecodeError::BoundsExceeded(BoundsExceeded).into());
		}

		dest.clear();
		if dest.capacity() < size {
			dest.reserve(size.max(dest.capacity() * 2));
		}

		reader.read_into(dest, size).await?;

		Ok(Some(size))
	}

	// Tell the publisher to stop, echoing a stream error or defaulting to SubscribeCanceled.
	fn stop(&mut self, cause: &Error) {
		let code = match cause {
			Error::Stream(err) => err.code,
			_ => GroupErrorCode::SubscribeCanceled.into(),
		};

		tracing::debug!(sequence = self.sequence, %cause, code, "group cancelled");
		self.reader.abort(&StreamError::new(code, "").into());
	}

	/// Stop reading the group.
	pub fn close(&mut self) {
		if self.ctx.is_cancelled() {
			return;
		}

		self.cancel.cancel(Error::Closed);
		self.stop(&Error::Closed);
	}

	/// Stop reading the group with the given code.
	pub fn close_with_error(&mut self, code: GroupErrorCode) {
		if self.ctx.is_cancelled() {
			return;
		}

		let cause: Error = StreamError::new(code, "").into();
		self.cancel.cancel(cause.clone());
		self.stop(&cause);
	}

	pub fn sequence(&self) -> u64 {
		self.sequence
	}

	/// The lifetime of the group stream.
	pub fn context(&self) -> &Context {
		&self.ctx
	}
}
