use std::{collections::HashMap, future::Future, sync::Arc};

use web_async::Lock;

use crate::{
	coding::*,
	message::{self, UniStreamType},
	subscribe::{Info, ReceiveSubscribeStream, SendSubscribeStream, SubscribeId, TrackConfig},
	sync::{BytesPool, Queue},
	BroadcastPath, Context, Error, GroupErrorCode, GroupReader, GroupWriter, SubscribeErrorCode,
};

/// Group streams that arrived for each subscription, waiting to be accepted.
pub(crate) type Subscriptions = Lock<HashMap<SubscribeId, Queue<(Reader, message::Group)>>>;

/// Publishes a track to a single subscriber.
///
/// The subscription is accepted lazily, by [Self::write_info] or the first [Self::open_group].
#[derive(Clone)]
pub struct TrackWriter {
	inner: Arc<TrackWriterState>,
}

struct TrackWriterState {
	path: BroadcastPath,
	name: String,

	subscribe: ReceiveSubscribeStream,
	transport: Arc<dyn Transport>,
	pool: BytesPool,

	groups: Lock<Vec<GroupWriter>>,
}

impl TrackWriter {
	pub(crate) fn new(
		path: BroadcastPath,
		name: String,
		subscribe: ReceiveSubscribeStream,
		transport: Arc<dyn Transport>,
		pool: BytesPool,
	) -> Self {
		Self {
			inner: Arc::new(TrackWriterState {
				path,
				name,
				subscribe,
				transport,
				pool,
				groups: Default::default(),
			}),
		}
	}

	/// Accept the subscription. Only the first call sends anything.
	pub async fn write_info(&self, info: Info) -> Result<(), Error> {
		self.inner.subscribe.accept(info).await
	}

	/// Open a new group stream, accepting the subscription first if needed.
	///
	/// The sequence is sent as-is; ordering is up to the caller.
	pub async fn open_group(&self, sequence: u64) -> Result<GroupWriter, Error> {
		let ctx = self.context();
		if let Some(err) = ctx.err() {
			return Err(err);
		}

		self.write_info(Info::default()).await?;

		let header = message::Group {
			subscribe_id: self.subscribe_id(),
			sequence,
		};

		let res = tokio::select! {
			biased;
			err = ctx.done() => Err(err),
			res = self.open_stream(&header) => res,
		};

		let writer = res.inspect_err(|err| tracing::debug!(%err, ?header, "failed to open group"))?;
		let group = GroupWriter::new(ctx, sequence, writer, self.inner.pool.clone());

		let mut groups = self.inner.groups.lock();
		groups.retain(|group| !group.context().is_cancelled());
		groups.push(group.clone());

		Ok(group)
	}

	async fn open_stream(&self, header: &message::Group) -> Result<Writer, Error> {
		let send = self.inner.transport.open_uni().await?;

		let mut writer = Writer::new(send);
		writer.set_priority(self.config().track_priority);

		writer.encode(&UniStreamType::Group).await?;
		tracing::trace!(message = ?header, "sending group");
		writer.encode(header).await?;

		Ok(writer)
	}

	pub fn path(&self) -> &BroadcastPath {
		&self.inner.path
	}

	pub fn name(&self) -> &str {
		&self.inner.name
	}

	pub fn subscribe_id(&self) -> SubscribeId {
		self.inner.subscribe.id()
	}

	/// The latest config sent by the subscriber.
	pub fn config(&self) -> TrackConfig {
		self.inner.subscribe.config()
	}

	/// Resolves when the subscriber updates the config, or the subscription ends.
	pub fn updated(&self) -> impl Future<Output = ()> + Send + 'static {
		self.inner.subscribe.updated()
	}

	/// The lifetime of the subscription.
	pub fn context(&self) -> &Context {
		self.inner.subscribe.context()
	}

	fn take_groups(&self) -> Vec<GroupWriter> {
		std::mem::take(&mut *self.inner.groups.lock())
	}

	/// Finish every open group, then the subscription.
	pub async fn close(&self) {
		for group in self.take_groups() {
			if let Err(err) = group.close().await {
				tracing::debug!(%err, sequence = group.sequence(), "failed to close group");
			}
		}

		self.inner.subscribe.close().await;
	}

	/// Abort every open group, then reset the subscription with the given code.
	pub async fn close_with_error(&self, code: SubscribeErrorCode, message: &str) {
		for group in self.take_groups() {
			group.close_with_error(GroupErrorCode::PublishAborted).await;
		}

		self.inner.subscribe.close_with_error(code, message).await;
	}
}

/// Receives a track from a publisher.
///
/// Deregisters from the session when closed or dropped.
pub struct TrackReader {
	path: BroadcastPath,
	name: String,

	subscribe: SendSubscribeStream,
	groups: Queue<(Reader, message::Group)>,
	subscriptions: Subscriptions,
}

impl TrackReader {
	pub(crate) fn new(
		path: BroadcastPath,
		name: String,
		subscribe: SendSubscribeStream,
		groups: Queue<(Reader, message::Group)>,
		subscriptions: Subscriptions,
	) -> Self {
		Self {
			path,
			name,
			subscribe,
			groups,
			subscriptions,
		}
	}

	/// Wait for the next group stream.
	///
	/// The signal only bounds this call; cancelling it does not end the subscription.
	pub async fn accept_group(&self, signal: &Context) -> Result<GroupReader, Error> {
		let ctx = self.context();
		if let Some(err) = ctx.err() {
			return Err(err);
		}

		let (reader, group) = tokio::select! {
			biased;
			err = ctx.done() => return Err(err),
			err = signal.done() => return Err(err),
			next = self.groups.dequeue() => next.ok_or(Error::Closed)?,
		};

		tracing::trace!(message = ?group, "accepted group");

		Ok(GroupReader::new(ctx, group.sequence, reader))
	}

	/// Send a SubscribeUpdate.
	pub async fn update(&self, config: TrackConfig) -> Result<(), Error> {
		self.subscribe.update(config).await
	}

	pub fn path(&self) -> &BroadcastPath {
		&self.path
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn subscribe_id(&self) -> SubscribeId {
		self.subscribe.id()
	}

	/// The latest config that was successfully sent.
	pub fn config(&self) -> TrackConfig {
		self.subscribe.config()
	}

	/// The parameters chosen by the publisher.
	pub fn info(&self) -> Info {
		self.subscribe.info()
	}

	/// The lifetime of the subscription.
	pub fn context(&self) -> &Context {
		self.subscribe.context()
	}

	fn deregister(&self) {
		self.subscriptions.lock().remove(&self.subscribe.id());
		self.groups.close();
	}

	/// End the subscription.
	pub async fn close(&self) {
		self.deregister();
		self.subscribe.close().await;
	}

	/// End the subscription with the given code.
	pub async fn close_with_error(&self, code: SubscribeErrorCode, message: &str) {
		self.deregister();
		self.subscribe.close_with_error(code, message).await;
	}
}

impl Drop for TrackReader {
	fn drop(&mut self) {
		self.deregister();
		self.subscribe.cancel();
	}
}
