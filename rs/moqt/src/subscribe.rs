use std::{fmt, future::Future, sync::Arc};

use web_async::Lock;

use crate::{
	coding::*,
	message::{self, BiStreamType, GroupOrder},
	sync::{Cond, Mutex},
	CancelCauseFunc, Context, Error, StreamError, SubscribeErrorCode,
};

/// Identifies a subscription within a session.
///
/// Assigned by the subscriber in increasing order and never reused.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscribeId(pub u64);

impl fmt::Display for SubscribeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.fmt(f)
	}
}

impl Encode for SubscribeId {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) {
		self.0.encode(w)
	}
}

impl Decode for SubscribeId {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(Self(u64::decode(r)?))
	}
}

/// The parameters of a subscription, which the subscriber may update.
///
/// A group sequence of 0 leaves that end of the range open.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TrackConfig {
	pub track_priority: u8,
	pub min_group_sequence: u64,
	pub max_group_sequence: u64,
}

impl TrackConfig {
	/// Check that the range is not empty.
	pub fn validate(&self) -> Result<(), Error> {
		if self.max_group_sequence != 0 && self.min_group_sequence > self.max_group_sequence {
			return Err(Error::InvalidRange);
		}

		Ok(())
	}

	/// Check that `next` is a valid update of this config.
	///
	/// The range may only shrink: a bound, once set, can't be removed or widened.
	pub fn validate_update(&self, next: &TrackConfig) -> Result<(), Error> {
		next.validate()?;

		if self.min_group_sequence != 0
			&& (next.min_group_sequence == 0 || next.min_group_sequence < self.min_group_sequence)
		{
			return Err(Error::InvalidRange);
		}

		if self.max_group_sequence != 0
			&& (next.max_group_sequence == 0 || next.max_group_sequence > self.max_group_sequence)
		{
			return Err(Error::InvalidRange);
		}

		Ok(())
	}
}

impl From<&message::Subscribe> for TrackConfig {
	fn from(msg: &message::Subscribe) -> Self {
		Self {
			track_priority: msg.track_priority,
			min_group_sequence: msg.min_group_sequence,
			max_group_sequence: msg.max_group_sequence,
		}
	}
}

impl From<message::SubscribeUpdate> for TrackConfig {
	fn from(msg: message::SubscribeUpdate) -> Self {
		Self {
			track_priority: msg.track_priority,
			min_group_sequence: msg.min_group_sequence,
			max_group_sequence: msg.max_group_sequence,
		}
	}
}

/// Sent by the publisher when it accepts a subscription.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Info {
	pub group_order: GroupOrder,
}

/// The subscriber's half of a subscribe stream.
#[derive(Clone)]
pub struct SendSubscribeStream {
	inner: Arc<SendState>,
}

struct SendState {
	id: SubscribeId,
	info: Info,

	// Only replaced after the update was written.
	config: Lock<TrackConfig>,
	writer: Mutex<Writer>,

	ctx: Context,
	cancel: CancelCauseFunc,
}

impl SendSubscribeStream {
	/// Open a subscribe stream and wait for the publisher to accept it.
	pub(crate) async fn open(transport: &dyn Transport, parent: &Context, msg: message::Subscribe) -> Result<Self, Error> {
		let mut stream = Stream::open(transport).await?;
		stream.writer.encode(&BiStreamType::Subscribe).await?;

		tracing::trace!(message = ?msg, "sending subscribe");
		stream.writer.encode(&msg).await?;

		let ok: message::SubscribeOk = stream.reader.decode().await?;
		tracing::trace!(message = ?ok, "received subscribe ok");

		let info = Info {
			group_order: ok.group_order,
		};

		Ok(Self::new(parent, msg.subscribe_id, TrackConfig::from(&msg), info, stream))
	}

	pub(crate) fn new(parent: &Context, id: SubscribeId, config: TrackConfig, info: Info, stream: Stream) -> Self {
		let (ctx, cancel) = parent.with_cancel_cause();
		let Stream { writer, reader } = stream;

		let this = Self {
			inner: Arc::new(SendState {
				id,
				info,
				config: Lock::new(config),
				writer: Mutex::new(writer),
				ctx,
				cancel,
			}),
		};

		web_async::spawn(this.clone().run(reader));

		this
	}

	// The publisher sends nothing after SubscribeOk.
	async fn run(self, mut reader: Reader) {
		let ctx = self.inner.ctx.clone();

		tokio::select! {
			res = reader.closed() => match res {
				Ok(()) => self.inner.cancel.cancel(Error::Closed),
				Err(err) => {
					tracing::debug!(%err, id = %self.inner.id, "subscribe stream failed");
					self.inner.cancel.cancel(err);
				}
			},
			_ = ctx.done() => {},
		}

		let cause = ctx.err().unwrap_or(Error::Cancel);
		if let Error::Stream(_) = cause {
			reader.abort(&cause);
		}

		self.teardown(&cause).await;
	}

	async fn teardown(&self, cause: &Error) {
		let mut writer = self.inner.writer.lock().await;
		match cause {
			Error::Closed | Error::Cancel => {
				if let Err(err) = writer.finish() {
					tracing::debug!(%err, "failed to finish subscribe stream");
				}
			}
			err => writer.abort(err),
		}
	}

	/// Send a SubscribeUpdate, replacing the config once it was written.
	pub async fn update(&self, config: TrackConfig) -> Result<(), Error> {
		if let Some(err) = self.inner.ctx.err() {
			return Err(err);
		}

		let mut writer = self.inner.writer.lock().await;

		let current = *self.inner.config.lock();
		current.validate_update(&config)?;

		let msg = message::SubscribeUpdate {
			track_priority: config.track_priority,
			min_group_sequence: config.min_group_sequence,
			max_group_sequence: config.max_group_sequence,
		};

		tracing::trace!(message = ?msg, id = %self.inner.id, "sending subscribe update");

		let res = tokio::select! {
			biased;
			err = self.inner.ctx.done() => Err(err),
			res = writer.encode(&msg) => res,
		};

		match res {
			Ok(()) => {
				*self.inner.config.lock() = config;
				Ok(())
			}
			Err(err) => {
				self.inner.cancel.cancel(err.clone());
				Err(err)
			}
		}
	}

	pub fn id(&self) -> SubscribeId {
		self.inner.id
	}

	/// The latest config that was successfully sent.
	pub fn config(&self) -> TrackConfig {
		*self.inner.config.lock()
	}

	pub fn info(&self) -> Info {
		self.inner.info
	}

	/// The lifetime of the subscribe stream.
	pub fn context(&self) -> &Context {
		&self.inner.ctx
	}

	// The background task finishes the stream.
	pub(crate) fn cancel(&self) {
		self.inner.cancel.cancel(Error::Cancel);
	}

	/// Finish the stream, ending the subscription.
	pub async fn close(&self) {
		self.inner.cancel.cancel(Error::Closed);
		let cause = self.inner.ctx.err().unwrap_or(Error::Closed);
		self.teardown(&cause).await;
	}

	/// Reset the stream with the given code.
	pub async fn close_with_error(&self, code: SubscribeErrorCode, message: &str) {
		self.inner.cancel.cancel(Error::from(StreamError::new(code, message)));
		let cause = self.inner.ctx.err().unwrap_or(Error::Closed);
		self.teardown(&cause).await;
	}
}

/// The publisher's half of a subscribe stream.
#[derive(Clone)]
pub struct ReceiveSubscribeStream {
	inner: Arc<ReceiveState>,
}

struct ReceiveState {
	id: SubscribeId,

	config: Lock<TrackConfig>,
	updated: Cond,

	outgoing: Mutex<Outgoing>,

	ctx: Context,
	cancel: CancelCauseFunc,
}

struct Outgoing {
	writer: Writer,
	accepted: bool,
}

impl ReceiveSubscribeStream {
	pub(crate) fn new(parent: &Context, id: SubscribeId, config: TrackConfig, stream: Stream) -> Self {
		let (ctx, cancel) = parent.with_cancel_cause();
		let Stream { writer, reader } = stream;

		let this = Self {
			inner: Arc::new(ReceiveState {
				id,
				config: Lock::new(config),
				updated: Cond::new(),
				outgoing: Mutex::new(Outgoing {
					writer,
					accepted: false,
				}),
				ctx,
				cancel,
			}),
		};

		web_async::spawn(this.clone().run(reader));

		this
	}

	async fn run(self, mut reader: Reader) {
		let ctx = self.inner.ctx.clone();

		let cause = loop {
			let res = tokio::select! {
				res = reader.decode_maybe::<message::SubscribeUpdate>() => res,
				err = ctx.done() => break err,
			};

			match res {
				Ok(Some(msg)) => {
					tracing::trace!(message = ?msg, id = %self.inner.id, "received subscribe update");
					*self.inner.config.lock() = msg.into();
					self.inner.updated.broadcast();
				}
				Ok(None) => break Error::Closed,
				Err(err) => {
					tracing::debug!(%err, id = %self.inner.id, "subscribe stream failed");
					break err;
				}
			}
		};

		self.inner.cancel.cancel(cause);
		let cause = ctx.err().unwrap_or(Error::Closed);

		if !matches!(cause, Error::Closed | Error::Cancel) {
			reader.abort(&cause);
		}

		self.teardown(&cause).await;

		// Wake anybody waiting for an update that will never come.
		self.inner.updated.broadcast();
	}

	async fn teardown(&self, cause: &Error) {
		let mut outgoing = self.inner.outgoing.lock().await;
		match cause {
			Error::Closed | Error::Cancel => {
				if let Err(err) = outgoing.writer.finish() {
					tracing::debug!(%err, "failed to finish subscribe stream");
				}
			}
			err => outgoing.writer.abort(err),
		}
	}

	/// Send SubscribeOk.
	///
	/// Only the first call writes anything; later calls return immediately.
	pub async fn accept(&self, info: Info) -> Result<(), Error> {
		let mut outgoing = self.inner.outgoing.lock().await;
		if outgoing.accepted {
			return Ok(());
		}

		if let Some(err) = self.inner.ctx.err() {
			return Err(err);
		}

		outgoing.accepted = true;

		let msg = message::SubscribeOk {
			group_order: info.group_order,
		};
		tracing::trace!(message = ?msg, id = %self.inner.id, "sending subscribe ok");

		let res = tokio::select! {
			biased;
			err = self.inner.ctx.done() => Err(err),
			res = outgoing.writer.encode(&msg) => res,
		};

		if let Err(err) = &res {
			let code = SubscribeErrorCode::Internal;
			self.inner.cancel.cancel(Error::from(StreamError::new(code, err.to_string())));
			outgoing.writer.reset(code.into());
		}

		res
	}

	pub fn id(&self) -> SubscribeId {
		self.inner.id
	}

	/// The latest config sent by the subscriber.
	pub fn config(&self) -> TrackConfig {
		*self.inner.config.lock()
	}

	/// Resolves on the next SubscribeUpdate, or once the stream is closed.
	pub fn updated(&self) -> impl Future<Output = ()> + Send + 'static {
		self.inner.updated.wait()
	}

	/// The lifetime of the subscribe stream.
	pub fn context(&self) -> &Context {
		&self.inner.ctx
	}

	/// Finish the stream. Does nothing if already closed.
	pub async fn close(&self) {
		if self.inner.ctx.is_cancelled() {
			return;
		}

		self.inner.cancel.cancel(Error::Closed);
		let cause = self.inner.ctx.err().unwrap_or(Error::Closed);
		self.teardown(&cause).await;
	}

	/// Reset the stream with the given code. Does nothing if already closed.
	pub async fn close_with_error(&self, code: SubscribeErrorCode, message: &str) {
		if self.inner.ctx.is_cancelled() {
			return;
		}

		self.inner.cancel.cancel(Error::from(StreamError::new(code, message)));
		let cause = self.inner.ctx.err().unwrap_or(Error::Closed);
		self.teardown(&cause).await;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::mock;

	fn config(track_priority: u8, min: u64, max: u64) -> TrackConfig {
		TrackConfig {
			track_priority,
			min_group_sequence: min,
			max_group_sequence: max,
		}
	}

	fn setup(initial: TrackConfig) -> (SendSubscribeStream, ReceiveSubscribeStream) {
		let (a, b) = mock::stream_pair();
		let id = SubscribeId(7);

		let send = SendSubscribeStream::new(&Context::background(), id, initial, Info::default(), a);
		let recv = ReceiveSubscribeStream::new(&Context::background(), id, initial, b);

		(send, recv)
	}

	#[test]
	fn range_only_shrinks() {
		let open = TrackConfig::default();
		assert!(open.validate_update(&config(1, 5, 10)).is_ok());
		assert!(matches!(open.validate_update(&config(0, 10, 5)), Err(Error::InvalidRange)));

		let bounded = config(0, 5, 10);
		assert!(bounded.validate_update(&config(3, 6, 9)).is_ok());
		assert!(bounded.validate_update(&config(0, 4, 10)).is_err());
		assert!(bounded.validate_update(&config(0, 5, 11)).is_err());
		assert!(bounded.validate_update(&config(0, 0, 10)).is_err());
		assert!(bounded.validate_update(&config(0, 5, 0)).is_err());
	}

	#[tokio::test]
	async fn update() {
		let (send, recv) = setup(config(1, 0, 100));

		let updated = recv.updated();
		send.update(config(5, 10, 90)).await.unwrap();
		assert_eq!(send.config(), config(5, 10, 90));

		updated.await;
		assert_eq!(recv.config(), config(5, 10, 90));

		// Rejected locally, nothing is sent.
		assert!(matches!(send.update(config(5, 0, 90)).await, Err(Error::InvalidRange)));
		assert_eq!(send.config(), config(5, 10, 90));
	}

	#[tokio::test]
	async fn update_failed() {
		let (a, mut b) = mock::stream_pair();
		let send = SendSubscribeStream::new(&Context::background(), SubscribeId(7), config(1, 0, 100), Info::default(), a);

		// The publisher stops reading, so the update can't be flushed.
		b.reader.abort(&Error::from(StreamError::new(9u32, "")));

		let err = send.update(config(5, 10, 90)).await.unwrap_err();
		assert_eq!(err.to_code(), 9);

		// The previous config is kept.
		assert_eq!(send.config(), config(1, 0, 100));
	}

	#[tokio::test]
	async fn accept_once() {
		let (a, mut b) = mock::stream_pair();
		let recv = ReceiveSubscribeStream::new(&Context::background(), SubscribeId(0), TrackConfig::default(), a);

		let info = Info {
			group_order: GroupOrder::Descending,
		};
		recv.accept(info).await.unwrap();
		recv.accept(Info::default()).await.unwrap();
		recv.close().await;

		let ok: message::SubscribeOk = b.reader.decode().await.unwrap();
		assert_eq!(ok.group_order, GroupOrder::Descending);

		// Only one SubscribeOk was written before the stream finished.
		assert!(b.reader.closed().await.is_ok());
	}

	#[tokio::test]
	async fn close_from_subscriber() {
		let (send, recv) = setup(TrackConfig::default());

		let updated = recv.updated();
		send.close().await;

		recv.context().done().await;
		assert!(matches!(recv.context().err(), Some(Error::Closed)));
		updated.await;

		assert!(send.update(config(1, 0, 0)).await.is_err());
	}

	#[tokio::test]
	async fn close_with_error_from_publisher() {
		let (send, recv) = setup(TrackConfig::default());

		recv.close_with_error(SubscribeErrorCode::TrackNotFound, "not found").await;
		// Idempotent.
		recv.close().await;
		assert!(matches!(recv.context().err(), Some(Error::Stream(_))));

		let err = send.context().done().await;
		assert_eq!(err.to_code(), u32::from(SubscribeErrorCode::TrackNotFound));
	}
}
