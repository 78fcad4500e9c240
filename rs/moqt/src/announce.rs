use std::{
	collections::HashMap,
	fmt,
	future::Future,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
};

use tokio::sync::watch;
use web_async::Lock;

use crate::{
	coding::{Encode, Reader, Stream, Transport, Writer},
	message::{self, BiStreamType},
	sync::{Cond, Mutex, MutexGuard, Queue},
	AnnounceErrorCode, BroadcastPath, CancelCauseFunc, CancelFunc, Context, Error, StreamError, TrackPrefix,
};

/// Marks a broadcast as live until ended.
///
/// Clones share the same lifetime.
#[derive(Clone)]
pub struct Announcement {
	path: BroadcastPath,
	ctx: Context,
	cancel: CancelFunc,
}

impl Announcement {
	/// Create an announcement that ends when [Self::end] is called or the context is cancelled.
	pub fn new(ctx: &Context, path: BroadcastPath) -> Self {
		let (ctx, cancel) = ctx.with_cancel();
		Self { path, ctx, cancel }
	}

	pub fn path(&self) -> &BroadcastPath {
		&self.path
	}

	pub fn is_active(&self) -> bool {
		!self.ctx.is_cancelled()
	}

	pub fn end(&self) {
		self.cancel.cancel()
	}

	/// Resolves once the announcement has ended.
	pub fn ended(&self) -> impl Future<Output = ()> + Send + 'static {
		let done = self.ctx.done();
		async move {
			done.await;
		}
	}

	/// Create a child announcement that ends with this one, but can also be ended on its own.
	pub fn fork(&self) -> Self {
		Self::new(&self.ctx, self.path.clone())
	}

	pub fn context(&self) -> &Context {
		&self.ctx
	}

	/// Returns true if both handles refer to the same announcement.
	pub fn ptr_eq(&self, other: &Self) -> bool {
		self.ctx.ptr_eq(&other.ctx)
	}
}

impl fmt::Debug for Announcement {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Announcement")
			.field("path", &self.path)
			.field("active", &self.is_active())
			.finish()
	}
}

/// Sends announcements under a prefix to a single subscriber.
#[derive(Clone)]
pub struct AnnouncementWriter {
	inner: Arc<WriterState>,
}

struct WriterState {
	prefix: TrackPrefix,

	// Turns are reserved while holding `actives`, so messages are written in the order the map changed.
	writer: Mutex<Writer>,
	actives: Lock<HashMap<String, Announcement>>,

	// Set once AnnounceInit is about to be written.
	initialized: AtomicBool,

	// Set after AnnounceInit was written.
	ready: watch::Sender<bool>,

	ctx: Context,
	cancel: CancelCauseFunc,
}

impl AnnouncementWriter {
	pub(crate) fn new(parent: &Context, prefix: TrackPrefix, stream: Stream) -> Self {
		let (ctx, cancel) = parent.with_cancel_cause();
		let Stream { writer, reader } = stream;

		let this = Self {
			inner: Arc::new(WriterState {
				prefix,
				writer: Mutex::new(writer),
				actives: Default::default(),
				initialized: AtomicBool::new(false),
				ready: watch::Sender::new(false),
				ctx,
				cancel,
			}),
		};

		web_async::spawn(this.clone().run(reader));

		this
	}

	// The subscriber sends nothing after AnnouncePlease, so any data or the end of the stream closes us.
	async fn run(self, mut reader: Reader) {
		let ctx = self.inner.ctx.clone();

		tokio::select! {
			res = reader.closed() => match res {
				Ok(()) => self.inner.cancel.cancel(Error::Closed),
				Err(err) => {
					tracing::debug!(%err, prefix = %self.inner.prefix, "announce stream failed");
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
		{
			let mut writer = self.inner.writer.lock().await;
			match cause {
				Error::Closed | Error::Cancel => {
					if let Err(err) = writer.finish() {
						tracing::debug!(%err, "failed to finish announce stream");
					}
				}
				err => writer.abort(err),
			}
		}

		let actives = std::mem::take(&mut *self.inner.actives.lock());
		for announcement in actives.into_values() {
			announcement.end();
		}
	}

	/// Write AnnounceInit with every active announcement, then allow [Self::send].
	///
	/// Every path is validated against the prefix before anything is written.
	/// Only one AnnounceInit is ever written; calling this again is an error.
	pub async fn init(&self, initial: &[Announcement]) -> Result<(), Error> {
		let mut unique = HashMap::new();
		for announcement in initial {
			let suffix = announcement.path().suffix(&self.inner.prefix)?;
			if !announcement.is_active() {
				continue;
			}

			if unique.insert(suffix, announcement).is_some() {
				return Err(Error::Duplicate(announcement.path().to_string()));
			}
		}

		if self.inner.initialized.swap(true, Ordering::AcqRel) {
			return Err(Error::Duplicate(self.inner.prefix.to_string()));
		}

		let mut suffixes = Vec::with_capacity(unique.len());

		let turn = {
			let mut actives = self.inner.actives.lock();
			for (suffix, announcement) in unique {
				let fork = announcement.fork();
				actives.insert(suffix.to_string(), fork.clone());
				self.watch(suffix.to_string(), fork);
				suffixes.push(suffix.to_string());
			}

			self.inner.writer.lock()
		};

		tracing::debug!(prefix = %self.inner.prefix, ?suffixes, "announce init");
		self.write(turn, message::AnnounceInit { suffixes }).await?;
		self.inner.ready.send_replace(true);

		Ok(())
	}

	/// Announce or withdraw a broadcast, depending on whether the announcement is active.
	///
	/// An active announcement is withdrawn automatically once it ends.
	pub async fn send(&self, announcement: &Announcement) -> Result<(), Error> {
		self.ready().await?;

		let path = announcement.path();
		let suffix = path.suffix(&self.inner.prefix)?.to_string();

		if !announcement.is_active() {
			let (existing, turn) = {
				let mut actives = self.inner.actives.lock();

				// An entry that already ended is withdrawn by its watcher.
				if !actives.get(&suffix).is_some_and(Announcement::is_active) {
					return Err(Error::UnknownAnnouncement(path.to_string()));
				}

				let existing = actives
					.remove(&suffix)
					.ok_or_else(|| Error::UnknownAnnouncement(path.to_string()))?;
				(existing, self.inner.writer.lock())
			};

			existing.end();

			tracing::debug!(%path, "unannounce");
			return self.write(turn, message::Announce { suffix, active: false }).await;
		}

		let (stale, fork, turn) = {
			let mut actives = self.inner.actives.lock();

			let stale = match actives.get(&suffix).map(Announcement::is_active) {
				Some(true) => return Err(Error::Duplicate(path.to_string())),
				Some(false) => {
					actives.remove(&suffix);
					Some(self.inner.writer.lock())
				}
				None => None,
			};

			let fork = announcement.fork();
			actives.insert(suffix.clone(), fork.clone());

			(stale, fork, self.inner.writer.lock())
		};

		if let Some(turn) = stale {
			// The previous announcement ended but was not withdrawn yet.
			self.write(
				turn,
				message::Announce {
					suffix: suffix.clone(),
					active: false,
				},
			)
			.await?;
		}

		self.watch(suffix.clone(), fork);

		tracing::debug!(%path, "announce");
		self.write(turn, message::Announce { suffix, active: true }).await
	}

	// Withdraw the announcement once it ends, unless it was already removed or replaced.
	fn watch(&self, suffix: String, fork: Announcement) {
		let this = self.clone();

		web_async::spawn(async move {
			tokio::select! {
				_ = fork.ended() => {},
				_ = this.inner.ctx.done() => return,
			}

			let turn = {
				let mut actives = this.inner.actives.lock();
				if !actives.get(&suffix).is_some_and(|current| current.ptr_eq(&fork)) {
					return;
				}

				actives.remove(&suffix);
				this.inner.writer.lock()
			};

			tracing::debug!(path = %fork.path(), "unannounce");

			// Best effort: the stream is already closing if this fails.
			if let Err(err) = this.write(turn, message::Announce { suffix, active: false }).await {
				tracing::debug!(%err, path = %fork.path(), "failed to withdraw announcement");
			}
		});
	}

	async fn ready(&self) -> Result<(), Error> {
		let mut ready = self.inner.ready.subscribe();

		tokio::select! {
			biased;
			err = self.inner.ctx.done() => Err(err),
			ok = async move { ready.wait_for(|ready| *ready).await.is_ok() } => match ok {
				true => Ok(()),
				false => Err(Error::Closed),
			},
		}
	}

	async fn write<T: Encode + fmt::Debug>(
		&self,
		turn: impl Future<Output = MutexGuard<Writer>>,
		msg: T,
	) -> Result<(), Error> {
		let res = tokio::select! {
			biased;
			err = self.inner.ctx.done() => return Err(err),
			res = async {
				let mut writer = turn.await;
				tracing::trace!(message = ?msg, "sending announce message");
				writer.encode(&msg).await
			} => res,
		};

		if let Err(err) = &res {
			self.inner.cancel.cancel(err.clone());
		}

		res
	}

	/// Finish the stream and end every tracked announcement.
	pub async fn close(&self) {
		self.inner.cancel.cancel(Error::Closed);
		let cause = self.inner.ctx.err().unwrap_or(Error::Closed);
		self.teardown(&cause).await;
	}

	/// Reset the stream with the given code and end every tracked announcement.
	pub async fn close_with_error(&self, code: AnnounceErrorCode, message: &str) {
		self.inner.cancel.cancel(Error::from(StreamError::new(code, message)));
		let cause = self.inner.ctx.err().unwrap_or(Error::Closed);
		self.teardown(&cause).await;
	}

	pub fn prefix(&self) -> &TrackPrefix {
		&self.inner.prefix
	}

	/// The lifetime of the announce stream.
	pub fn context(&self) -> &Context {
		&self.inner.ctx
	}

	pub fn ptr_eq(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.inner, &other.inner)
	}
}

/// Receives announcements under a prefix from a publisher.
#[derive(Clone)]
pub struct AnnouncementReader {
	inner: Arc<ReaderState>,
}

struct ReaderState {
	prefix: TrackPrefix,
	actives: Lock<HashMap<String, Announcement>>,
	queue: Queue<Announcement>,
	changed: Cond,
	ctx: Context,
	cancel: CancelCauseFunc,
}

impl AnnouncementReader {
	/// Open an announce stream and wait for the initial set of announcements.
	pub(crate) async fn open(transport: &dyn Transport, parent: &Context, prefix: TrackPrefix) -> Result<Self, Error> {
		let mut stream = Stream::open(transport).await?;
		stream.writer.encode(&BiStreamType::Announce).await?;

		let please = message::AnnouncePlease { prefix: prefix.clone() };
		tracing::trace!(message = ?please, "sending announce please");
		stream.writer.encode(&please).await?;

		let init: message::AnnounceInit = stream.reader.decode().await?;
		tracing::debug!(%prefix, suffixes = ?init.suffixes, "announce init");

		Self::new(parent, prefix, stream, init)
	}

	pub(crate) fn new(
		parent: &Context,
		prefix: TrackPrefix,
		stream: Stream,
		init: message::AnnounceInit,
	) -> Result<Self, Error> {
		let (ctx, cancel) = parent.with_cancel_cause();

		let queue = Queue::new();
		let mut actives = HashMap::new();

		for suffix in init.suffixes {
			let path = prefix.join(&suffix)?;
			if actives.contains_key(&suffix) {
				cancel.cancel(Error::Duplicate(path.to_string()));
				return Err(Error::Duplicate(path.to_string()));
			}

			let announcement = Announcement::new(&ctx, path);
			queue.enqueue(announcement.clone())?;
			actives.insert(suffix, announcement);
		}

		let this = Self {
			inner: Arc::new(ReaderState {
				prefix,
				actives: Lock::new(actives),
				queue,
				changed: Cond::new(),
				ctx,
				cancel,
			}),
		};

		let Stream { writer, reader } = stream;
		web_async::spawn(this.clone().run(reader, writer));

		Ok(this)
	}

	async fn run(self, mut reader: Reader, mut writer: Writer) {
		let ctx = self.inner.ctx.clone();

		let cause = loop {
			let res = tokio::select! {
				res = reader.decode_maybe::<message::Announce>() => res,
				err = ctx.done() => break err,
			};

			match res {
				Ok(Some(msg)) => {
					tracing::trace!(message = ?msg, "received announce message");
					if let Err(err) = self.recv(msg) {
						tracing::warn!(%err, prefix = %self.inner.prefix, "announce protocol violation");
						break err;
					}
				}
				Ok(None) => break Error::Closed,
				Err(err) => break err,
			}
		};

		self.inner.cancel.cancel(cause);
		let cause = ctx.err().unwrap_or(Error::Closed);

		match &cause {
			Error::Closed | Error::Cancel => {
				if let Err(err) = writer.finish() {
					tracing::debug!(%err, "failed to finish announce stream");
				}
			}
			err => {
				writer.abort(err);
				reader.abort(err);
			}
		}

		// Every announcement is a child of the context, so they have already ended.
		self.inner.actives.lock().clear();
		self.inner.queue.close();
		self.inner.changed.broadcast();
	}

	fn recv(&self, msg: message::Announce) -> Result<(), Error> {
		let path = self.inner.prefix.join(&msg.suffix)?;

		{
			let mut actives = self.inner.actives.lock();

			if msg.active {
				if actives.get(&msg.suffix).is_some_and(Announcement::is_active) {
					return Err(Error::Duplicate(path.to_string()));
				}

				// Replaces an entry that was ended locally.
				let announcement = Announcement::new(&self.inner.ctx, path);
				actives.insert(msg.suffix, announcement.clone());
				self.inner.queue.enqueue(announcement)?;
			} else {
				let announcement = actives
					.remove(&msg.suffix)
					.ok_or_else(|| Error::UnknownAnnouncement(path.to_string()))?;
				announcement.end();
			}
		}

		self.inner.changed.broadcast();
		Ok(())
	}

	/// Return the next active announcement.
	///
	/// Announcements that ended while queued are skipped.
	/// The signal only bounds this call; cancelling it does not close the stream.
	pub async fn receive(&self, signal: &Context) -> Result<Announcement, Error> {
		loop {
			if let Some(err) = self.inner.ctx.err() {
				return Err(err);
			}

			let announcement = tokio::select! {
				biased;
				err = signal.done() => return Err(err),
				announcement = self.inner.queue.dequeue() => announcement,
				err = self.inner.ctx.done() => return Err(err),
			};

			match announcement {
				Some(announcement) if announcement.is_active() => return Ok(announcement),
				Some(_) => continue,
				None => return Err(self.inner.ctx.err().unwrap_or(Error::Closed)),
			}
		}
	}

	/// A snapshot of the currently active announcements.
	pub fn active(&self) -> Vec<Announcement> {
		self.inner
			.actives
			.lock()
			.values()
			.filter(|announcement| announcement.is_active())
			.cloned()
			.collect()
	}

	/// Resolves on the next change to the active set.
	pub fn changed(&self) -> impl Future<Output = ()> + Send + 'static {
		self.inner.changed.wait()
	}

	pub fn prefix(&self) -> &TrackPrefix {
		&self.inner.prefix
	}

	/// The lifetime of the announce stream.
	pub fn context(&self) -> &Context {
		&self.inner.ctx
	}

	/// Finish the stream, ending every announcement.
	pub fn close(&self) {
		self.inner.cancel.cancel(Error::Closed);
	}

	/// Reset the stream with the given code, ending every announcement.
	pub fn close_with_error(&self, code: AnnounceErrorCode, message: &str) {
		self.inner.cancel.cancel(Error::from(StreamError::new(code, message)));
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::mock;

	fn path(path: &str) -> BroadcastPath {
		BroadcastPath::new(path).unwrap()
	}

	async fn setup(prefix: &str, initial: &[Announcement]) -> (AnnouncementWriter, AnnouncementReader) {
		let prefix = TrackPrefix::new(prefix).unwrap();
		let (a, mut b) = mock::stream_pair();

		let writer = AnnouncementWriter::new(&Context::background(), prefix.clone(), a);
		writer.init(initial).await.unwrap();

		let init: message::AnnounceInit = b.reader.decode().await.unwrap();
		let reader = AnnouncementReader::new(&Context::background(), prefix, b, init).unwrap();

		(writer, reader)
	}

	#[tokio::test]
	async fn announce_then_withdraw() {
		let (writer, reader) = setup("/", &[]).await;
		assert!(reader.active().is_empty());

		let alice = Announcement::new(&Context::background(), path("/alice"));
		writer.send(&alice).await.unwrap();

		let received = reader.receive(&Context::background()).await.unwrap();
		assert_eq!(received.path().as_str(), "/alice");
		assert!(received.is_active());
		assert_eq!(reader.active().len(), 1);

		// Ending the local announcement withdraws it automatically.
		alice.end();
		received.ended().await;
		assert!(reader.active().is_empty());
	}

	#[tokio::test]
	async fn withdraw_unknown() {
		let (writer, reader) = setup("/", &[]).await;

		let bob = Announcement::new(&Context::background(), path("/bob"));
		bob.end();
		assert!(matches!(writer.send(&bob).await, Err(Error::UnknownAnnouncement(_))));

		let alice = Announcement::new(&Context::background(), path("/alice"));
		writer.send(&alice).await.unwrap();
		let received = reader.receive(&Context::background()).await.unwrap();

		alice.end();
		received.ended().await;

		// Already withdrawn automatically.
		assert!(matches!(
			writer.send(&alice).await,
			Err(Error::UnknownAnnouncement(_))
		));
	}

	#[tokio::test]
	async fn withdraw_ended() {
		let (writer, reader) = setup("/", &[]).await;

		let alice = Announcement::new(&Context::background(), path("/alice"));
		writer.send(&alice).await.unwrap();
		let received = reader.receive(&Context::background()).await.unwrap();

		// The entry already ended with alice, so there's nothing left to withdraw explicitly.
		alice.end();
		assert!(matches!(
			writer.send(&alice).await,
			Err(Error::UnknownAnnouncement(_))
		));

		// The watcher still withdraws it.
		received.ended().await;
		assert!(reader.active().is_empty());
	}

	#[tokio::test]
	async fn withdraw_explicit() {
		let (writer, reader) = setup("/", &[]).await;

		let alice = Announcement::new(&Context::background(), path("/alice"));
		writer.send(&alice).await.unwrap();
		let received = reader.receive(&Context::background()).await.unwrap();

		let withdrawn = Announcement::new(&Context::background(), path("/alice"));
		withdrawn.end();
		writer.send(&withdrawn).await.unwrap();

		received.ended().await;
		assert!(reader.active().is_empty());

		// Only the writer's copy ended.
		assert!(alice.is_active());
	}

	#[tokio::test]
	async fn init_twice() {
		let (writer, _reader) = setup("/", &[]).await;

		let alice = Announcement::new(&Context::background(), path("/alice"));
		assert!(matches!(writer.init(&[alice]).await, Err(Error::Duplicate(_))));
	}

	#[tokio::test]
	async fn initial() {
		let alice = Announcement::new(&Context::background(), path("/live/alice"));
		let ended = Announcement::new(&Context::background(), path("/live/bob"));
		ended.end();

		let (_writer, reader) = setup("/live/", &[alice.clone(), ended]).await;

		let active = reader.active();
		assert_eq!(active.len(), 1);
		assert_eq!(active[0].path(), alice.path());

		let received = reader.receive(&Context::background()).await.unwrap();
		assert_eq!(received.path(), alice.path());
	}

	#[tokio::test]
	async fn at_most_one_active() {
		let (writer, _reader) = setup("/", &[]).await;

		let first = Announcement::new(&Context::background(), path("/alice"));
		let second = Announcement::new(&Context::background(), path("/alice"));

		writer.send(&first).await.unwrap();
		assert!(matches!(writer.send(&second).await, Err(Error::Duplicate(_))));

		// A different path is fine.
		let bob = Announcement::new(&Context::background(), path("/bob"));
		writer.send(&bob).await.unwrap();
	}

	#[tokio::test]
	async fn replace_after_withdraw() {
		let (writer, reader) = setup("/", &[]).await;

		let first = Announcement::new(&Context::background(), path("/alice"));
		writer.send(&first).await.unwrap();
		let received = reader.receive(&Context::background()).await.unwrap();

		// Replace it before the automatic withdrawal had a chance to run.
		first.end();
		let second = Announcement::new(&Context::background(), path("/alice"));
		writer.send(&second).await.unwrap();

		received.ended().await;
		let replaced = reader.receive(&Context::background()).await.unwrap();
		assert!(replaced.is_active());
		assert!(!replaced.ptr_eq(&received));
		assert_eq!(reader.active().len(), 1);
	}

	#[tokio::test]
	async fn prefix_mismatch() {
		let prefix = TrackPrefix::new("/live/").unwrap();
		let (a, mut b) = mock::stream_pair();
		let writer = AnnouncementWriter::new(&Context::background(), prefix, a);

		let vod = Announcement::new(&Context::background(), path("/vod/alice"));
		assert!(matches!(writer.init(&[vod.clone()]).await, Err(Error::PrefixMismatch { .. })));

		// Nothing was written, so the next message is a valid AnnounceInit.
		writer.init(&[]).await.unwrap();
		let init: message::AnnounceInit = b.reader.decode().await.unwrap();
		assert!(init.suffixes.is_empty());

		assert!(matches!(writer.send(&vod).await, Err(Error::PrefixMismatch { .. })));
	}

	#[tokio::test]
	async fn receive_signal() {
		let (_writer, reader) = setup("/", &[]).await;

		let (signal, cancel) = Context::background().with_cancel_cause();
		cancel.cancel(Error::Timeout);

		assert!(matches!(reader.receive(&signal).await, Err(Error::Timeout)));

		// The stream itself is unaffected.
		assert!(reader.context().err().is_none());
	}

	#[tokio::test]
	async fn close_ends_everything() {
		let (writer, reader) = setup("/", &[]).await;

		let alice = Announcement::new(&Context::background(), path("/alice"));
		writer.send(&alice).await.unwrap();
		let received = reader.receive(&Context::background()).await.unwrap();

		writer.close().await;
		received.ended().await;

		assert!(matches!(reader.receive(&Context::background()).await, Err(Error::Closed)));
		assert!(writer.send(&alice).await.is_err());

		// The local announcement is unaffected.
		assert!(alice.is_active());
	}
}
