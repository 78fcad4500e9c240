use std::{collections::HashMap, future::Future, sync::Arc};

use futures::future::BoxFuture;
use web_async::Lock;

use crate::{
	AnnounceErrorCode, Announcement, AnnouncementWriter, BroadcastPath, Context, SubscribeErrorCode, TrackPrefix,
	TrackWriter,
};

/// Serves a track to a single subscriber.
pub trait TrackHandler: Send + Sync + 'static {
	/// The broadcast context is cancelled once the announcement ends or is replaced.
	fn serve_track(&self, broadcast: Context, track: TrackWriter) -> BoxFuture<'static, ()>;
}

impl<F, Fut> TrackHandler for F
where
	F: Fn(Context, TrackWriter) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = ()> + Send + 'static,
{
	fn serve_track(&self, broadcast: Context, track: TrackWriter) -> BoxFuture<'static, ()> {
		Box::pin(self(broadcast, track))
	}
}

/// Rejects every subscription with [SubscribeErrorCode::TrackNotFound].
pub struct NotFoundHandler;

impl TrackHandler for NotFoundHandler {
	fn serve_track(&self, _broadcast: Context, track: TrackWriter) -> BoxFuture<'static, ()> {
		Box::pin(async move {
			tracing::debug!(path = %track.path(), name = track.name(), "track not found");
			track
				.close_with_error(SubscribeErrorCode::TrackNotFound, "track not found")
				.await;
		})
	}
}

#[derive(Default)]
struct MuxState {
	// The live announcement and handler for each broadcast.
	handlers: HashMap<BroadcastPath, (Announcement, Arc<dyn TrackHandler>)>,

	// Every announce stream we're serving, by the prefix requested.
	writers: HashMap<TrackPrefix, Vec<AnnouncementWriter>>,
}

/// Routes subscriptions to the handler of a broadcast, and announces broadcasts to interested peers.
///
/// Cloning shares the same registry.
#[derive(Clone, Default)]
pub struct TrackMux {
	state: Lock<MuxState>,
}

impl TrackMux {
	pub fn new() -> Self {
		Self::default()
	}

	/// Announce a broadcast on a new announcement that ends with the context.
	pub fn publish(&self, ctx: &Context, path: BroadcastPath, handler: impl TrackHandler) -> Announcement {
		let announcement = Announcement::new(ctx, path);
		self.announce(&announcement, handler);
		announcement
	}

	/// Serve the broadcast with the handler until the announcement ends.
	///
	/// A different announcement already live at the same path is ended.
	pub fn announce(&self, announcement: &Announcement, handler: impl TrackHandler) {
		let path = announcement.path().clone();

		if !announcement.is_active() {
			tracing::warn!(%path, "ignoring inactive announcement");
			return;
		}

		let handler: Arc<dyn TrackHandler> = Arc::new(handler);

		let writers = {
			let mut state = self.state.lock();

			let previous = state.handlers.insert(path.clone(), (announcement.clone(), handler));

			match previous {
				// Only the handler changed.
				Some((previous, _)) if previous.ptr_eq(announcement) => return,
				Some((previous, _)) => {
					tracing::debug!(%path, "replacing announcement");
					previous.end();
				}
				None => {}
			}

			state
				.writers
				.iter()
				.filter(|(prefix, _)| path.has_prefix(prefix))
				.flat_map(|(_, writers)| writers.iter().cloned())
				.collect::<Vec<_>>()
		};

		tracing::debug!(%path, writers = writers.len(), "announce");

		let this = self.clone();
		let fanout = announcement.clone();
		web_async::spawn(async move {
			let fanout = &fanout;
			let sends = writers.iter().map(|writer| async move {
				let res = writer.send(fanout).await;
				(writer, res)
			});

			for (writer, res) in futures::future::join_all(sends).await {
				let Err(err) = res else {
					continue;
				};

				// Failing because the announcement already ended is not the writer's fault.
				if fanout.is_active() {
					tracing::debug!(%err, path = %fanout.path(), prefix = %writer.prefix(), "evicting announce stream");
					this.remove_writer(writer);
					writer
						.close_with_error(AnnounceErrorCode::Internal, &err.to_string())
						.await;
				}
			}
		});

		let this = self.clone();
		let announcement = announcement.clone();
		web_async::spawn(async move {
			announcement.ended().await;

			let mut state = this.state.lock();
			if state
				.handlers
				.get(&path)
				.is_some_and(|(current, _)| current.ptr_eq(&announcement))
			{
				tracing::debug!(%path, "unannounce");
				state.handlers.remove(&path);
			}
		});
	}

	/// The broadcast context and handler for a live broadcast, or [NotFoundHandler].
	pub fn handler(&self, path: &BroadcastPath) -> (Context, Arc<dyn TrackHandler>) {
		let state = self.state.lock();
		match state.handlers.get(path) {
			Some((announcement, handler)) if announcement.is_active() => {
				(announcement.context().clone(), handler.clone())
			}
			_ => (Context::background(), Arc::new(NotFoundHandler)),
		}
	}

	/// Serve the subscription with the handler registered at its path.
	pub async fn serve_track(&self, track: TrackWriter) {
		let (broadcast, handler) = self.handler(track.path());
		handler.serve_track(broadcast, track).await
	}

	/// Announce every matching broadcast to the writer until its stream closes.
	pub async fn serve_announcement(&self, writer: AnnouncementWriter) {
		let prefix = writer.prefix().clone();

		// Registered in the same critical section as the snapshot, so no announcement is missed.
		let initial: Vec<Announcement> = {
			let mut state = self.state.lock();
			state.writers.entry(prefix.clone()).or_default().push(writer.clone());

			state
				.handlers
				.values()
				.map(|(announcement, _)| announcement)
				.filter(|announcement| announcement.is_active() && announcement.path().has_prefix(&prefix))
				.cloned()
				.collect()
		};

		match writer.init(&initial).await {
			Ok(()) => {
				let cause = writer.context().done().await;
				tracing::debug!(%prefix, %cause, "announce stream closed");
			}
			Err(err) => {
				tracing::warn!(%err, %prefix, "failed to initialize announce stream");
				writer
					.close_with_error(AnnounceErrorCode::Internal, &err.to_string())
					.await;
			}
		}

		self.remove_writer(&writer);
	}

	fn remove_writer(&self, writer: &AnnouncementWriter) {
		let mut state = self.state.lock();

		if let Some(writers) = state.writers.get_mut(writer.prefix()) {
			writers.retain(|existing| !existing.ptr_eq(writer));
			if writers.is_empty() {
				state.writers.remove(writer.prefix());
			}
		}
	}
}
