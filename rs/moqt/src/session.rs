use std::{
	fmt::Debug,
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc,
	},
};

use web_async::Lock;

use crate::{
	coding::*,
	message::{self, BiStreamType, UniStreamType},
	sync::{BytesPool, Mutex, Queue},
	track::Subscriptions,
	AnnouncementReader, AnnouncementWriter, BroadcastPath, CancelCauseFunc, Context, Error, ReceiveSubscribeStream,
	SendSubscribeStream, SessionConfig, SessionErrorCode, StreamError, SubscribeId, TrackConfig, TrackMux, TrackPrefix,
	TrackReader, TrackWriter,
};

/// A MoQ session, wrapping a multiplexed transport connection.
///
/// Created via:
/// - [`Session::connect`] for clients.
/// - [`Session::accept`] for servers.
///
/// Announce and subscribe requests from the peer are served by the [TrackMux].
/// The session stays open until either side closes it or the transport fails.
#[derive(Clone)]
pub struct Session {
	inner: Arc<SessionState>,
}

struct SessionState {
	transport: Arc<dyn Transport>,
	version: Version,
	peer_extensions: Extensions,
	mux: TrackMux,
	pool: BytesPool,

	// The session stream stays open for SessionUpdate messages.
	writer: Mutex<Writer>,
	peer_bitrate: Lock<Option<u64>>,

	subscriptions: Subscriptions,
	next_id: AtomicU64,

	ctx: Context,
	cancel: CancelCauseFunc,
}

impl Session {
	/// Perform the handshake as a client, offering every configured version.
	pub async fn connect(
		ctx: &Context,
		transport: impl Transport,
		mux: TrackMux,
		config: SessionConfig,
	) -> Result<Self, Error> {
		let transport: Arc<dyn Transport> = Arc::new(transport);

		let res = tokio::select! {
			biased;
			err = ctx.done() => Err(err),
			res = Self::connect_setup(&*transport, &config) => res,
		};

		let (stream, server) = match res {
			Ok(setup) => setup,
			Err(err) => {
				tracing::warn!(%err, "failed to connect");
				transport.close(err.to_code(), &err.to_string());
				return Err(err);
			}
		};

		tracing::info!(version = ?server.version, "connected");

		Ok(Self::new(ctx, transport, stream, server.version, server.extensions, mux, config))
	}

	async fn connect_setup(
		transport: &dyn Transport,
		config: &SessionConfig,
	) -> Result<(Stream, message::SessionServer), Error> {
		let mut stream = Stream::open(transport).await?;
		stream.writer.encode(&BiStreamType::Session).await?;

		let client = message::SessionClient {
			versions: config.versions.clone(),
			extensions: config.extensions.clone(),
		};

		tracing::trace!(?client, "sending client setup");
		stream.writer.encode(&client).await?;

		let server: message::SessionServer = stream.reader.decode().await?;
		tracing::trace!(?server, "received server setup");

		if !config.versions.contains(&server.version) {
			return Err(Error::Version(config.versions.clone(), [server.version].into()));
		}

		Ok((stream, server))
	}

	/// Perform the handshake as a server, choosing the client's most preferred supported version.
	pub async fn accept(
		ctx: &Context,
		transport: impl Transport,
		mux: TrackMux,
		config: SessionConfig,
	) -> Result<Self, Error> {
		let transport: Arc<dyn Transport> = Arc::new(transport);

		let res = tokio::select! {
			biased;
			err = ctx.done() => Err(err),
			res = Self::accept_setup(&*transport, &config) => res,
		};

		let (stream, version, client) = match res {
			Ok(setup) => setup,
			Err(err) => {
				tracing::warn!(%err, "failed to accept");
				transport.close(err.to_code(), &err.to_string());
				return Err(err);
			}
		};

		tracing::info!(?version, "connected");

		Ok(Self::new(ctx, transport, stream, version, client.extensions, mux, config))
	}

	async fn accept_setup(
		transport: &dyn Transport,
		config: &SessionConfig,
	) -> Result<(Stream, Version, message::SessionClient), Error> {
		let mut stream = Stream::accept(transport).await?;

		let kind: u8 = stream.reader.decode().await?;
		if kind != u8::from(BiStreamType::Session) {
			return Err(Error::UnexpectedStream(kind));
		}

		let client: message::SessionClient = stream.reader.decode().await?;
		tracing::trace!(?client, "received client setup");

		let version = client
			.versions
			.iter()
			.find(|v| config.versions.contains(v))
			.copied()
			.ok_or_else(|| Error::Version(client.versions.clone(), config.versions.clone()))?;

		let server = message::SessionServer {
			version,
			extensions: config.extensions.clone(),
		};

		tracing::trace!(?server, "sending server setup");
		stream.writer.encode(&server).await?;

		Ok((stream, version, client))
	}

	fn new(
		parent: &Context,
		transport: Arc<dyn Transport>,
		stream: Stream,
		version: Version,
		peer_extensions: Extensions,
		mux: TrackMux,
		config: SessionConfig,
	) -> Self {
		let (ctx, cancel) = parent.with_cancel_cause();
		let Stream { writer, reader } = stream;

		let this = Self {
			inner: Arc::new(SessionState {
				transport,
				version,
				peer_extensions,
				mux,
				pool: BytesPool::new(config.pool),
				writer: Mutex::new(writer),
				peer_bitrate: Default::default(),
				subscriptions: Default::default(),
				next_id: AtomicU64::new(0),
				ctx,
				cancel,
			}),
		};

		web_async::spawn(this.clone().run(reader));

		this
	}

	async fn run(self, reader: Reader) {
		let ctx = self.inner.ctx.clone();

		let res = tokio::select! {
			err = self.inner.transport.closed() => Err(err),
			res = self.run_session(reader) => res,
			res = self.run_bi() => res,
			res = self.run_uni() => res,
			err = ctx.done() => Err(err),
		};

		self.inner.cancel.cancel(res.err().unwrap_or(Error::Closed));
		let cause = ctx.err().unwrap_or(Error::Closed);

		{
			let mut writer = self.inner.writer.lock().await;
			match &cause {
				Error::Closed | Error::Cancel => {
					if let Err(err) = writer.finish() {
						tracing::debug!(%err, "failed to finish session stream");
					}
				}
				err => writer.abort(err),
			}
		}

		let reason = match &cause {
			Error::Stream(err) => err.message.clone(),
			err => err.to_string(),
		};

		self.inner.transport.close(cause.to_code(), &reason);
		tracing::info!(%cause, "session closed");
	}

	// The session ends when the peer finishes the session stream.
	async fn run_session(&self, mut reader: Reader) -> Result<(), Error> {
		while let Some(update) = reader.decode_maybe::<message::SessionUpdate>().await? {
			tracing::debug!(bitrate = update.bitrate, "received session update");
			*self.inner.peer_bitrate.lock() = Some(update.bitrate);
		}

		Ok(())
	}

	async fn run_bi(&self) -> Result<(), Error> {
		loop {
			let stream = Stream::accept(&*self.inner.transport).await?;

			let this = self.clone();
			web_async::spawn(async move { this.run_bi_stream(stream).await });
		}
	}

	async fn run_bi_stream(self, mut stream: Stream) {
		let kind: u8 = match decode_request(&mut stream).await {
			Ok(kind) => kind,
			Err(err) => {
				tracing::warn!(%err, "failed to decode stream type");
				return;
			}
		};

		let res = match BiStreamType::try_from(kind) {
			Ok(BiStreamType::Announce) => self.recv_announce(stream).await,
			Ok(BiStreamType::Subscribe) => self.recv_subscribe(stream).await,
			_ => {
				let err = Error::UnexpectedStream(kind);
				stream.reader.abort(&err);
				stream.writer.abort(&err);
				Err(err)
			}
		};

		if let Err(err) = res {
			tracing::warn!(%err, "failed to serve stream");
		}
	}

	async fn recv_announce(&self, mut stream: Stream) -> Result<(), Error> {
		let please: message::AnnouncePlease = decode_request(&mut stream).await?;
		tracing::debug!(prefix = %please.prefix, "received announce please");

		let writer = AnnouncementWriter::new(&self.inner.ctx, please.prefix, stream);
		self.inner.mux.serve_announcement(writer).await;

		Ok(())
	}

	async fn recv_subscribe(&self, mut stream: Stream) -> Result<(), Error> {
		let msg: message::Subscribe = decode_request(&mut stream).await?;
		tracing::debug!(id = %msg.subscribe_id, path = %msg.broadcast_path, track = %msg.track_name, "received subscribe");

		let config = TrackConfig::from(&msg);
		let subscribe = ReceiveSubscribeStream::new(&self.inner.ctx, msg.subscribe_id, config, stream);

		let track = TrackWriter::new(
			msg.broadcast_path,
			msg.track_name,
			subscribe,
			self.inner.transport.clone(),
			self.inner.pool.clone(),
		);

		self.inner.mux.serve_track(track).await;

		Ok(())
	}

	async fn run_uni(&self) -> Result<(), Error> {
		loop {
			let recv = self.inner.transport.accept_uni().await?;

			let this = self.clone();
			web_async::spawn(async move { this.run_uni_stream(Reader::new(recv)).await });
		}
	}

	async fn run_uni_stream(self, mut reader: Reader) {
		let header = match decode_group(&mut reader).await {
			Ok(header) => header,
			Err(err) => {
				tracing::warn!(%err, "failed to decode group stream");
				reader.abort(&err);
				return;
			}
		};

		let queue = self
			.inner
			.subscriptions
			.lock()
			.get(&header.subscribe_id)
			.filter(|queue| !queue.is_closed())
			.cloned();

		let Some(queue) = queue else {
			let err = Error::UnknownSubscribe(header.subscribe_id.0);
			tracing::debug!(%err, sequence = header.sequence, "dropping group");
			reader.abort(&err);
			return;
		};

		tracing::trace!(message = ?header, "received group");

		let id = header.subscribe_id;
		if queue.enqueue((reader, header)).is_err() {
			tracing::debug!(%id, "subscription closed while receiving group");
		}
	}

	/// Subscribe to a track published by the peer, waiting for it to be accepted.
	pub async fn subscribe(
		&self,
		path: BroadcastPath,
		name: impl Into<String>,
		config: TrackConfig,
	) -> Result<TrackReader, Error> {
		let ctx = &self.inner.ctx;
		if let Some(err) = ctx.err() {
			return Err(err);
		}

		config.validate()?;

		let id = SubscribeId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
		let name = name.into();

		// Registered first, since groups may arrive before the publisher's reply.
		let groups = Queue::new();
		self.inner.subscriptions.lock().insert(id, groups.clone());

		let msg = message::Subscribe {
			subscribe_id: id,
			broadcast_path: path.clone(),
			track_name: name.clone(),
			track_priority: config.track_priority,
			min_group_sequence: config.min_group_sequence,
			max_group_sequence: config.max_group_sequence,
		};

		let res = tokio::select! {
			biased;
			err = ctx.done() => Err(err),
			res = SendSubscribeStream::open(&*self.inner.transport, ctx, msg) => res,
		};

		match res {
			Ok(subscribe) => {
				tracing::debug!(%id, %path, track = %name, "subscribed");
				Ok(TrackReader::new(path, name, subscribe, groups, self.inner.subscriptions.clone()))
			}
			Err(err) => {
				tracing::debug!(%err, %id, %path, track = %name, "subscribe failed");
				self.inner.subscriptions.lock().remove(&id);
				groups.close();
				Err(err)
			}
		}
	}

	/// Discover the peer's broadcasts under the prefix.
	pub async fn announced(&self, prefix: TrackPrefix) -> Result<AnnouncementReader, Error> {
		let ctx = &self.inner.ctx;

		tokio::select! {
			biased;
			err = ctx.done() => Err(err),
			res = AnnouncementReader::open(&*self.inner.transport, ctx, prefix) => res,
		}
	}

	/// Tell the peer our estimated bitrate, in bits per second.
	pub async fn update_bitrate(&self, bitrate: u64) -> Result<(), Error> {
		let ctx = &self.inner.ctx;
		if let Some(err) = ctx.err() {
			return Err(err);
		}

		let msg = message::SessionUpdate { bitrate };
		let turn = self.inner.writer.lock();

		let res = tokio::select! {
			biased;
			err = ctx.done() => Err(err),
			res = async {
				let mut writer = turn.await;
				writer.encode(&msg).await
			} => res,
		};

		if let Err(err) = &res {
			self.inner.cancel.cancel(err.clone());
		}

		res
	}

	/// The latest bitrate reported by the peer.
	pub fn peer_bitrate(&self) -> Option<u64> {
		*self.inner.peer_bitrate.lock()
	}

	/// The negotiated version.
	pub fn version(&self) -> Version {
		self.inner.version
	}

	/// The extensions sent by the peer during the handshake.
	pub fn peer_extensions(&self) -> &Extensions {
		&self.inner.peer_extensions
	}

	pub fn mux(&self) -> &TrackMux {
		&self.inner.mux
	}

	/// The lifetime of the session.
	pub fn context(&self) -> &Context {
		&self.inner.ctx
	}

	/// Close the session gracefully.
	pub fn close(&self) {
		self.inner.cancel.cancel(Error::Closed);
	}

	/// Close the session with an error code and reason.
	pub fn close_with_error(&self, code: SessionErrorCode, reason: &str) {
		self.inner.cancel.cancel(Error::from(StreamError::new(code, reason)));
	}

	/// Block until the session is closed, returning the cause.
	pub async fn closed(&self) -> Error {
		self.inner.ctx.done().await
	}
}

// Decode a request, aborting both halves of the stream if it is malformed.
async fn decode_request<T: Decode + Debug>(stream: &mut Stream) -> Result<T, Error> {
	let res = stream.reader.decode().await;

	if let Err(err) = &res {
		stream.reader.abort(err);
		stream.writer.abort(err);
	}

	res
}

async fn decode_group(reader: &mut Reader) -> Result<message::Group, Error> {
	let kind: u8 = reader.decode().await?;
	if kind != u8::from(UniStreamType::Group) {
		return Err(Error::UnexpectedStream(kind));
	}

	reader.decode().await
}

#[cfg(test)]
mod tests {
	use bytes::BytesMut;

	use super::*;
	use crate::{mock, SubscribeErrorCode};

	fn path(path: &str) -> BroadcastPath {
		BroadcastPath::new(path).unwrap()
	}

	async fn setup(client_mux: TrackMux, server_mux: TrackMux) -> (Session, Session) {
		let (a, b) = mock::pair();
		let ctx = Context::background();

		let (client, server) = tokio::join!(
			Session::connect(&ctx, a, client_mux, SessionConfig::default()),
			Session::accept(&ctx, b, server_mux, SessionConfig::default()),
		);

		(client.unwrap(), server.unwrap())
	}

	#[tokio::test]
	async fn handshake() {
		let (a, b) = mock::pair();
		let ctx = Context::background();

		let mut config = SessionConfig::default();
		config.extensions.set_string(1, "moqt-rs");

		let (client, server) = tokio::join!(
			Session::connect(&ctx, a, TrackMux::new(), config),
			Session::accept(&ctx, b, TrackMux::new(), SessionConfig::default()),
		);

		let client = client.unwrap();
		let server = server.unwrap();

		assert_eq!(client.version(), Version::DEVELOP);
		assert_eq!(server.version(), Version::DEVELOP);
		assert_eq!(
			server.peer_extensions().get_string(1).unwrap().as_deref(),
			Some("moqt-rs")
		);
	}

	#[tokio::test]
	async fn version_mismatch() {
		let (a, b) = mock::pair();
		let ctx = Context::background();

		let config = SessionConfig {
			versions: [Version(1)].into(),
			..Default::default()
		};

		let (client, server) = tokio::join!(
			Session::connect(&ctx, a, TrackMux::new(), config),
			Session::accept(&ctx, b, TrackMux::new(), SessionConfig::default()),
		);

		assert!(matches!(server, Err(Error::Version(..))));
		assert!(client.is_err());
	}

	#[tokio::test]
	async fn announce() {
		let server_mux = TrackMux::new();
		let (client, _server) = setup(TrackMux::new(), server_mux.clone()).await;

		let reader = client.announced(TrackPrefix::root()).await.unwrap();
		assert!(reader.active().is_empty());

		let alice = server_mux.publish(&Context::background(), path("/alice"), |_: Context, _track: TrackWriter| async {});

		let received = reader.receive(&Context::background()).await.unwrap();
		assert_eq!(received.path().as_str(), "/alice");
		assert!(received.is_active());

		alice.end();
		received.ended().await;
		assert!(reader.active().is_empty());
	}

	#[tokio::test]
	async fn subscribe() {
		let server_mux = TrackMux::new();
		let _alice = server_mux.publish(&Context::background(), path("/alice"), |_: Context, track: TrackWriter| async move {
			let group = track.open_group(0).await.unwrap();
			group.write_frame(b"HELLO").await.unwrap();
			group.close().await.unwrap();
		});

		let (client, _server) = setup(TrackMux::new(), server_mux).await;

		let config = TrackConfig {
			track_priority: 1,
			min_group_sequence: 0,
			max_group_sequence: 100,
		};

		let track = client.subscribe(path("/alice"), "video", config).await.unwrap();
		assert_eq!(track.config(), config);

		let mut group = track.accept_group(&Context::background()).await.unwrap();
		assert_eq!(group.sequence(), 0);

		let mut frame = BytesMut::new();
		assert_eq!(group.read_frame(&mut frame).await.unwrap(), Some(5));
		assert_eq!(&frame[..], &[72, 69, 76, 76, 79]);
		assert_eq!(group.read_frame(&mut frame).await.unwrap(), None);
	}

	#[tokio::test]
	async fn track_not_found() {
		let (client, _server) = setup(TrackMux::new(), TrackMux::new()).await;

		let err = client
			.subscribe(path("/missing"), "video", TrackConfig::default())
			.await
			.err()
			.unwrap();

		assert_eq!(err.to_code(), u32::from(SubscribeErrorCode::TrackNotFound));
	}

	#[tokio::test]
	async fn invalid_range() {
		let (client, _server) = setup(TrackMux::new(), TrackMux::new()).await;

		let config = TrackConfig {
			track_priority: 0,
			min_group_sequence: 10,
			max_group_sequence: 5,
		};

		let res = client.subscribe(path("/alice"), "video", config).await;
		assert!(matches!(res, Err(Error::InvalidRange)));
	}

	#[tokio::test]
	async fn bitrate() {
		let (client, server) = setup(TrackMux::new(), TrackMux::new()).await;

		client.update_bitrate(1000).await.unwrap();

		for _ in 0..100 {
			if server.peer_bitrate().is_some() {
				break;
			}
			tokio::task::yield_now().await;
		}

		assert_eq!(server.peer_bitrate(), Some(1000));
		assert_eq!(client.peer_bitrate(), None);
	}

	#[tokio::test]
	async fn close() {
		let (client, server) = setup(TrackMux::new(), TrackMux::new()).await;

		client.close();
		assert!(matches!(client.closed().await, Error::Closed));

		// The peer sees either the session stream finish or the transport close.
		let cause = server.closed().await;
		assert!(matches!(cause, Error::Closed | Error::Stream(StreamError { remote: true, .. })));

		// Closing again has no effect.
		client.close_with_error(SessionErrorCode::ProtocolViolation, "late");
		assert!(matches!(client.context().err(), Some(Error::Closed)));
		assert!(client.subscribe(path("/alice"), "video", TrackConfig::default()).await.is_err());
	}

	#[tokio::test]
	async fn unknown_subscribe() {
		let (a, b) = mock::pair();

		let peer = async {
			let mut stream = Stream::accept(&b).await.unwrap();
			let _kind: u8 = stream.reader.decode().await.unwrap();
			let _client: message::SessionClient = stream.reader.decode().await.unwrap();

			let server = message::SessionServer {
				version: Version::DEVELOP,
				extensions: Extensions::default(),
			};
			stream.writer.encode(&server).await.unwrap();
			stream
		};

		let ctx = Context::background();
		let (client, _stream) = tokio::join!(
			Session::connect(&ctx, a, TrackMux::new(), SessionConfig::default()),
			peer,
		);
		let _client = client.unwrap();

		let mut send = b.open_uni_mock().unwrap();

		let mut header = BytesMut::new();
		UniStreamType::Group.encode(&mut header);
		message::Group {
			subscribe_id: SubscribeId(99),
			sequence: 0,
		}
		.encode(&mut header);
		send.write(&header).await.unwrap();

		assert_eq!(send.stopped().await, u32::from(crate::GroupErrorCode::InvalidSubscribeId));
	}
}
