//! An in-memory transport for tests.
use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use tokio::sync::{mpsc, watch};

use crate::{coding::*, CancelCauseFunc, Context, Error, StreamError};

// A chunk of data, or the code the stream was reset with.
type Chunk = Result<Bytes, u32>;

pub struct MockSend {
	tx: Option<mpsc::UnboundedSender<Chunk>>,
	stop: watch::Receiver<Option<u32>>,
	priority: watch::Sender<u8>,
}

impl MockSend {
	/// Resolves with the code once the receiver stops the stream.
	pub async fn stopped(&mut self) -> u32 {
		match self.stop.wait_for(Option::is_some).await {
			Ok(code) => (*code).unwrap_or_default(),
			Err(_) => 0,
		}
	}
}

impl SendStream for MockSend {
	fn write<'a>(&'a mut self, buf: &'a [u8]) -> BoxFuture<'a, Result<usize, Error>> {
		Box::pin(async move {
			let stopped = *self.stop.borrow();
			if let Some(code) = stopped {
				return Err(StreamError::remote(code, "stopped").into());
			}

			let tx = self.tx.as_ref().ok_or(Error::Closed)?;
			tx.send(Ok(Bytes::copy_from_slice(buf)))
				.map_err(|_| Error::from(StreamError::remote(0u32, "receiver dropped")))?;

			Ok(buf.len())
		})
	}

	fn finish(&mut self) -> Result<(), Error> {
		self.tx = None;
		Ok(())
	}

	fn reset(&mut self, code: u32) {
		if let Some(tx) = self.tx.take() {
			let _ = tx.send(Err(code));
		}
	}

	fn set_priority(&mut self, priority: u8) {
		self.priority.send_replace(priority);
	}
}

pub struct MockRecv {
	rx: mpsc::UnboundedReceiver<Chunk>,
	stop: watch::Sender<Option<u32>>,
	priority: watch::Receiver<u8>,
}

impl MockRecv {
	/// The latest priority set by the sender.
	pub fn priority(&self) -> u8 {
		*self.priority.borrow()
	}
}

impl RecvStream for MockRecv {
	fn read_buf<'a>(&'a mut self, buf: &'a mut BytesMut) -> BoxFuture<'a, Result<Option<usize>, Error>> {
		Box::pin(async move {
			match self.rx.recv().await {
				Some(Ok(chunk)) => {
					buf.extend_from_slice(&chunk);
					Ok(Some(chunk.len()))
				}
				Some(Err(code)) => Err(StreamError::remote(code, "reset").into()),
				None => Ok(None),
			}
		})
	}

	fn stop(&mut self, code: u32) {
		self.stop.send_if_modified(|current| {
			if current.is_some() {
				return false;
			}

			*current = Some(code);
			true
		});

		self.rx.close();
	}
}

/// A unidirectional stream.
pub fn pipe() -> (MockSend, MockRecv) {
	let (tx, rx) = mpsc::unbounded_channel();
	let (stop_tx, stop_rx) = watch::channel(None);
	let (priority_tx, priority_rx) = watch::channel(0);

	let send = MockSend {
		tx: Some(tx),
		stop: stop_rx,
		priority: priority_tx,
	};

	let recv = MockRecv {
		rx,
		stop: stop_tx,
		priority: priority_rx,
	};

	(send, recv)
}

/// Both ends of a bidirectional stream.
pub fn stream_pair() -> (Stream, Stream) {
	let (a_send, b_recv) = pipe();
	let (b_send, a_recv) = pipe();

	let a = Stream {
		writer: Writer::new(Box::new(a_send)),
		reader: Reader::new(Box::new(a_recv)),
	};

	let b = Stream {
		writer: Writer::new(Box::new(b_send)),
		reader: Reader::new(Box::new(b_recv)),
	};

	(a, b)
}

type BiStream = (MockSend, MockRecv);

pub struct MockTransport {
	bi: mpsc::UnboundedSender<BiStream>,
	incoming_bi: tokio::sync::Mutex<mpsc::UnboundedReceiver<BiStream>>,

	uni: mpsc::UnboundedSender<MockRecv>,
	incoming_uni: tokio::sync::Mutex<mpsc::UnboundedReceiver<MockRecv>>,

	// Shared by both ends.
	closed: Context,
	close: CancelCauseFunc,
}

/// Both ends of a connection.
pub fn pair() -> (MockTransport, MockTransport) {
	let (closed, close) = Context::background().with_cancel_cause();

	let (a_bi, b_incoming_bi) = mpsc::unbounded_channel();
	let (b_bi, a_incoming_bi) = mpsc::unbounded_channel();
	let (a_uni, b_incoming_uni) = mpsc::unbounded_channel();
	let (b_uni, a_incoming_uni) = mpsc::unbounded_channel();

	let a = MockTransport {
		bi: a_bi,
		incoming_bi: tokio::sync::Mutex::new(a_incoming_bi),
		uni: a_uni,
		incoming_uni: tokio::sync::Mutex::new(a_incoming_uni),
		closed: closed.clone(),
		close: close.clone(),
	};

	let b = MockTransport {
		bi: b_bi,
		incoming_bi: tokio::sync::Mutex::new(b_incoming_bi),
		uni: b_uni,
		incoming_uni: tokio::sync::Mutex::new(b_incoming_uni),
		closed,
		close,
	};

	(a, b)
}

impl MockTransport {
	fn check(&self) -> Result<(), Error> {
		match self.closed.err() {
			Some(err) => Err(err),
			None => Ok(()),
		}
	}

	/// Open a unidirectional stream, keeping the concrete type.
	pub fn open_uni_mock(&self) -> Result<MockSend, Error> {
		self.check()?;

		let (send, recv) = pipe();
		self.uni.send(recv).map_err(|_| Error::Closed)?;

		Ok(send)
	}

	/// Accept a unidirectional stream, keeping the concrete type.
	pub async fn accept_uni_mock(&self) -> Result<MockRecv, Error> {
		let mut incoming = self.incoming_uni.lock().await;

		tokio::select! {
			err = self.closed.done() => Err(err),
			next = incoming.recv() => next.ok_or(Error::Closed),
		}
	}

	fn open_bi_mock(&self) -> Result<BiStream, Error> {
		self.check()?;

		let (local_send, peer_recv) = pipe();
		let (peer_send, local_recv) = pipe();
		self.bi.send((peer_send, peer_recv)).map_err(|_| Error::Closed)?;

		Ok((local_send, local_recv))
	}
}

impl Transport for MockTransport {
	fn open_bi(&self) -> BoxFuture<'_, Result<(Box<dyn SendStream>, Box<dyn RecvStream>), Error>> {
		Box::pin(async move {
			let (send, recv) = self.open_bi_mock()?;
			Ok((Box::new(send) as Box<dyn SendStream>, Box::new(recv) as Box<dyn RecvStream>))
		})
	}

	fn open_uni(&self) -> BoxFuture<'_, Result<Box<dyn SendStream>, Error>> {
		Box::pin(async move {
			let send = self.open_uni_mock()?;
			Ok(Box::new(send) as Box<dyn SendStream>)
		})
	}

	fn accept_bi(&self) -> BoxFuture<'_, Result<(Box<dyn SendStream>, Box<dyn RecvStream>), Error>> {
		Box::pin(async move {
			let mut incoming = self.incoming_bi.lock().await;

			tokio::select! {
				err = self.closed.done() => Err(err),
				next = incoming.recv() => {
					let (send, recv) = next.ok_or(Error::Closed)?;
					Ok((Box::new(send) as Box<dyn SendStream>, Box::new(recv) as Box<dyn RecvStream>))
				}
			}
		})
	}

	fn accept_uni(&self) -> BoxFuture<'_, Result<Box<dyn RecvStream>, Error>> {
		Box::pin(async move {
			let recv = self.accept_uni_mock().await?;
			Ok(Box::new(recv) as Box<dyn RecvStream>)
		})
	}

	fn close(&self, code: u32, reason: &str) {
		self.close.cancel(Error::from(StreamError::remote(code, reason)));
	}

	fn closed(&self) -> BoxFuture<'_, Error> {
		Box::pin(self.closed.done())
	}
}
