use std::sync::Arc;

use bytes::BytesMut;
use futures::future::BoxFuture;

use crate::{
	coding::{Reader, Writer},
	Error, StreamError,
};

// We use wrapper traits that are dyn-compatible to remove the generic bounds from the rest of the crate.
// Any [web_transport_trait::Session] can be used as a [Transport].

/// The send half of a stream.
pub trait SendStream: Send + 'static {
	/// Write some of the buffer, returning the number of bytes written.
	fn write<'a>(&'a mut self, buf: &'a [u8]) -> BoxFuture<'a, Result<usize, Error>>;

	/// Mark the stream as finished.
	fn finish(&mut self) -> Result<(), Error>;

	/// Abruptly terminate the stream with the given code.
	fn reset(&mut self, code: u32);

	fn set_priority(&mut self, priority: u8);
}

/// The receive half of a stream.
pub trait RecvStream: Send + 'static {
	/// Append some data to the buffer, or return None if the stream is finished.
	fn read_buf<'a>(&'a mut self, buf: &'a mut BytesMut) -> BoxFuture<'a, Result<Option<usize>, Error>>;

	/// Tell the peer to stop sending with the given code.
	fn stop(&mut self, code: u32);
}

/// A multiplexed connection that can open and accept streams.
pub trait Transport: Send + Sync + 'static {
	fn open_bi(&self) -> BoxFuture<'_, Result<(Box<dyn SendStream>, Box<dyn RecvStream>), Error>>;
	fn open_uni(&self) -> BoxFuture<'_, Result<Box<dyn SendStream>, Error>>;
	fn accept_bi(&self) -> BoxFuture<'_, Result<(Box<dyn SendStream>, Box<dyn RecvStream>), Error>>;
	fn accept_uni(&self) -> BoxFuture<'_, Result<Box<dyn RecvStream>, Error>>;

	fn close(&self, code: u32, reason: &str);

	/// Resolves with the reason once the connection is closed.
	fn closed(&self) -> BoxFuture<'_, Error>;
}

// Keep the code carried by a stream reset or stop.
fn stream_error<E: web_transport_trait::Error>(err: E) -> Error {
	match err.stream_error() {
		Some(code) => StreamError::remote(code, err.to_string()).into(),
		None => Error::Transport(Arc::new(err)),
	}
}

// Keep the code and reason the peer closed the connection with.
fn session_error<E: web_transport_trait::Error>(err: E) -> Error {
	match err.session_error() {
		Some((code, reason)) => StreamError::remote(code, reason).into(),
		None => Error::Transport(Arc::new(err)),
	}
}

impl<S: web_transport_trait::SendStream + Send + 'static> SendStream for S {
	fn write<'a>(&'a mut self, mut buf: &'a [u8]) -> BoxFuture<'a, Result<usize, Error>> {
		Box::pin(async move {
			S::write_buf(self, &mut buf).await.map_err(stream_error)
		})
	}

	fn finish(&mut self) -> Result<(), Error> {
		S::finish(self).map_err(stream_error)
	}

	fn reset(&mut self, code: u32) {
		S::reset(self, code)
	}

	fn set_priority(&mut self, priority: u8) {
		S::set_priority(self, priority)
	}
}

impl<S: web_transport_trait::RecvStream + Send + 'static> RecvStream for S {
	fn read_buf<'a>(&'a mut self, buf: &'a mut BytesMut) -> BoxFuture<'a, Result<Option<usize>, Error>> {
		Box::pin(async move {
			S::read_buf(self, buf).await.map_err(stream_error)
		})
	}

	fn stop(&mut self, code: u32) {
		S::stop(self, code)
	}
}

impl<S: web_transport_trait::Session> Transport for S {
	fn open_bi(&self) -> BoxFuture<'_, Result<(Box<dyn SendStream>, Box<dyn RecvStream>), Error>> {
		Box::pin(async move {
			let (send, recv) = S::open_bi(self).await.map_err(|e| Error::Transport(Arc::new(e)))?;
			Ok((Box::new(send) as Box<dyn SendStream>, Box::new(recv) as Box<dyn RecvStream>))
		})
	}

	fn open_uni(&self) -> BoxFuture<'_, Result<Box<dyn SendStream>, Error>> {
		Box::pin(async move {
			let send = S::open_uni(self).await.map_err(|e| Error::Transport(Arc::new(e)))?;
			Ok(Box::new(send) as Box<dyn SendStream>)
		})
	}

	fn accept_bi(&self) -> BoxFuture<'_, Result<(Box<dyn SendStream>, Box<dyn RecvStream>), Error>> {
		Box::pin(async move {
			let (send, recv) = S::accept_bi(self).await.map_err(|e| Error::Transport(Arc::new(e)))?;
			Ok((Box::new(send) as Box<dyn SendStream>, Box::new(recv) as Box<dyn RecvStream>))
		})
	}

	fn accept_uni(&self) -> BoxFuture<'_, Result<Box<dyn RecvStream>, Error>> {
		Box::pin(async move {
			let recv = S::accept_uni(self).await.map_err(|e| Error::Transport(Arc::new(e)))?;
			Ok(Box::new(recv) as Box<dyn RecvStream>)
		})
	}

	fn close(&self, code: u32, reason: &str) {
		S::close(self, code, reason)
	}

	fn closed(&self) -> BoxFuture<'_, Error> {
		Box::pin(async move { session_error(S::closed(self).await) })
	}
}

/// A [Writer] and [Reader] pair for a single bidirectional stream.
pub struct Stream {
	pub writer: Writer,
	pub reader: Reader,
}

impl Stream {
	/// Open a new bidirectional stream.
	pub async fn open(transport: &dyn Transport) -> Result<Self, Error> {
		let (send, recv) = transport.open_bi().await?;

		Ok(Stream {
			writer: Writer::new(send),
			reader: Reader::new(recv),
		})
	}

	/// Accept a new bidirectional stream.
	pub async fn accept(transport: &dyn Transport) -> Result<Self, Error> {
		let (send, recv) = transport.accept_bi().await?;

		Ok(Stream {
			writer: Writer::new(send),
			reader: Reader::new(recv),
		})
	}
}
