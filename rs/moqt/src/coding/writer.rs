use std::fmt::Debug;

use crate::{coding::*, Error};

/// A wrapper around a [SendStream] that will reset on Drop.
pub struct Writer {
	stream: Box<dyn SendStream>,
	buffer: bytes::BytesMut,
	// Set once the stream was finished or reset.
	closed: bool,
}

impl Writer {
	pub fn new(stream: Box<dyn SendStream>) -> Self {
		Self {
			stream,
			buffer: Default::default(),
			closed: false,
		}
	}

	/// Encode the given message to the stream.
	pub async fn encode<T: Encode + Debug>(&mut self, msg: &T) -> Result<(), Error> {
		self.buffer.clear();
		msg.encode(&mut self.buffer);

		tracing::trace!(size = self.buffer.len(), hex = %hex::encode(&self.buffer), "encoded message");

		let mut offset = 0;
		while offset < self.buffer.len() {
			offset += self.stream.write(&self.buffer[offset..]).await?;
		}

		Ok(())
	}

	/// Write the entire buffer to the stream.
	pub async fn write_all(&mut self, mut buf: &[u8]) -> Result<(), Error> {
		while !buf.is_empty() {
			let size = self.stream.write(buf).await?;
			buf = &buf[size..];
		}
		Ok(())
	}

	/// Mark the stream as finished.
	///
	/// Does nothing if the stream was already finished or reset.
	pub fn finish(&mut self) -> Result<(), Error> {
		if self.closed {
			return Ok(());
		}

		self.closed = true;
		self.stream.finish()
	}

	/// Abort the stream with the given error.
	pub fn abort(&mut self, err: &Error) {
		self.reset(err.to_code());
	}

	/// Abort the stream with the given code.
	///
	/// Does nothing if the stream was already finished or reset.
	pub fn reset(&mut self, code: u32) {
		if self.closed {
			return;
		}

		self.closed = true;
		self.stream.reset(code);
	}

	pub fn is_closed(&self) -> bool {
		self.closed
	}

	/// Set the priority of the stream.
	pub fn set_priority(&mut self, priority: u8) {
		self.stream.set_priority(priority);
	}
}

impl Drop for Writer {
	fn drop(&mut self) {
		if !self.closed {
			// Unlike the Quinn default, we abort the stream on drop.
			self.stream.reset(Error::Cancel.to_code());
		}
	}
}
