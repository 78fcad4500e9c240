//! A cancellable lifetime shared between tasks.
//!
//! Every [Context] is a node in a tree.
//! Cancelling a node cancels all of its descendants with the same cause, exactly once.
//! A child created from an already cancelled parent is cancelled immediately.
use std::{
	collections::HashMap,
	future::Future,
	sync::{Arc, LazyLock, Mutex},
	time::Duration,
};

use tokio::sync::watch;

use crate::Error;

static BACKGROUND: LazyLock<Context> = LazyLock::new(Context::root);

/// A cancellable lifetime.
///
/// Cloning is cheap and every clone refers to the same node.
#[derive(Clone)]
pub struct Context {
	node: Arc<Node>,
}

struct Node {
	// Set exactly once.
	cause: watch::Sender<Option<Error>>,
	children: Mutex<Children>,
	parent: Option<(Arc<Node>, u64)>,
}

#[derive(Default)]
struct Children {
	next: u64,
	nodes: HashMap<u64, std::sync::Weak<Node>>,
	cancelled: bool,
}

impl Node {
	fn cancel(&self, cause: Error) {
		let modified = self.cause.send_if_modified(|current| {
			if current.is_some() {
				return false;
			}

			*current = Some(cause.clone());
			true
		});

		if !modified {
			return;
		}

		let children = {
			let mut children = self.children.lock().unwrap();
			children.cancelled = true;
			std::mem::take(&mut children.nodes)
		};

		for child in children.into_values().filter_map(|child| child.upgrade()) {
			child.cancel(cause.clone());
		}

		self.unregister();
	}

	fn unregister(&self) {
		if let Some((parent, id)) = &self.parent {
			if let Ok(mut children) = parent.children.lock() {
				children.nodes.remove(id);
			}
		}
	}
}

impl Drop for Node {
	fn drop(&mut self) {
		self.unregister();
	}
}

impl Context {
	fn root() -> Self {
		Self {
			node: Arc::new(Node {
				cause: watch::Sender::new(None),
				children: Default::default(),
				parent: None,
			}),
		}
	}

	/// The root context, which is never cancelled.
	pub fn background() -> Self {
		BACKGROUND.clone()
	}

	fn child(&self) -> Self {
		let mut children = self.node.children.lock().unwrap();
		let id = children.next;
		children.next += 1;

		let child = Self {
			node: Arc::new(Node {
				cause: watch::Sender::new(None),
				children: Default::default(),
				parent: Some((self.node.clone(), id)),
			}),
		};

		if children.cancelled {
			drop(children);
			child.cancel(self.err().unwrap_or(Error::Cancel));
		} else {
			children.nodes.insert(id, Arc::downgrade(&child.node));
		}

		child
	}

	/// Returns the cause of cancellation, or None if the context is still live.
	pub fn err(&self) -> Option<Error> {
		self.node.cause.borrow().clone()
	}

	pub fn is_cancelled(&self) -> bool {
		self.node.cause.borrow().is_some()
	}

	/// Resolves with the cause once the context is cancelled.
	///
	/// The future does not borrow the context.
	/// It resolves with [Error::Cancel] if every handle to the context is dropped first.
	pub fn done(&self) -> impl Future<Output = Error> + Send + 'static {
		let mut rx = self.node.cause.subscribe();

		async move {
			let cause = rx.wait_for(Option::is_some).await.ok().and_then(|cause| cause.clone());
			cause.unwrap_or(Error::Cancel)
		}
	}

	pub(crate) fn cancel(&self, cause: Error) {
		self.node.cancel(cause)
	}

	/// Derive a child context that is cancelled with [Error::Cancel].
	pub fn with_cancel(&self) -> (Context, CancelFunc) {
		let child = self.child();
		(child.clone(), CancelFunc(child))
	}

	/// Derive a child context that is cancelled with a caller provided cause.
	pub fn with_cancel_cause(&self) -> (Context, CancelCauseFunc) {
		let child = self.child();
		(child.clone(), CancelCauseFunc(child))
	}

	/// Derive a child context that is cancelled with [Error::Timeout] after the given duration.
	pub fn with_timeout(&self, timeout: Duration) -> (Context, CancelFunc) {
		let child = self.child();
		let timer = child.clone();

		web_async::spawn(async move {
			tokio::select! {
				_ = tokio::time::sleep(timeout) => timer.cancel(Error::Timeout),
				_ = timer.done() => {},
			}
		});

		(child.clone(), CancelFunc(child))
	}

	/// Derive a child context that is cancelled when the future completes.
	///
	/// A successful result cancels with [Error::Cancel], otherwise with the returned error.
	pub fn with_future<F>(&self, fut: F) -> Context
	where
		F: Future<Output = Result<(), Error>> + Send + 'static,
	{
		let child = self.child();
		let this = child.clone();

		web_async::spawn(async move {
			tokio::select! {
				res = fut => this.cancel(res.err().unwrap_or(Error::Cancel)),
				_ = this.done() => {},
			}
		});

		child
	}

	/// Derive a child context that is cancelled when the process receives Ctrl-C.
	pub fn with_shutdown_signal(&self) -> Context {
		self.with_future(async {
			if let Err(err) = tokio::signal::ctrl_c().await {
				tracing::warn!(%err, "failed to listen for shutdown signal");
				return Err(Error::Transport(Arc::new(err)));
			}

			tracing::info!("shutdown signal received");
			Ok(())
		})
	}

	/// Returns true if both handles refer to the same context.
	pub fn ptr_eq(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.node, &other.node)
	}
}

impl std::fmt::Debug for Context {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Context").field("err", &self.err()).finish()
	}
}

/// Cancels the associated context with [Error::Cancel].
#[derive(Clone)]
pub struct CancelFunc(Context);

impl CancelFunc {
	pub fn cancel(&self) {
		self.0.cancel(Error::Cancel)
	}
}

/// Cancels the associated context with the given cause.
#[derive(Clone)]
pub struct CancelCauseFunc(Context);

impl CancelCauseFunc {
	/// Cancel with the cause, or [Error::Cancel] if None.
	pub fn cancel(&self, cause: impl Into<Option<Error>>) {
		self.0.cancel(cause.into().unwrap_or(Error::Cancel))
	}
}
