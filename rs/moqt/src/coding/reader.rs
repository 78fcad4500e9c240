use std::{fmt::Debug, io};

use bytes::{Buf, BytesMut};

use crate::{coding::*, Error};

/// A reader for decoding messages from a stream.
pub struct Reader {
	stream: Box<dyn RecvStream>,
	buffer: BytesMut,
}

impl Reader {
	pub fn new(stream: Box<dyn RecvStream>) -> Self {
		Self {
			stream,
			buffer: Default::default(),
		}
	}

	/// Decode the next message from the stream.
	pub async fn decode<T: Decode + Debug>(&mut self) -> Result<T, Error> {
		loop {
			let mut cursor = io::Cursor::new(&self.buffer);
			match T::decode(&mut cursor) {
				Ok(msg) => {
					self.buffer.advance(cursor.position() as usize);
					return Ok(msg);
				}
				Err(DecodeError::Short) => {
					// Try to read more data
					if self.stream.read_buf(&mut self.buffer).await?.is_none() {
						// Stream closed while we still need more data
						return Err(Error::Decode(DecodeError::Short));
					}
				}
				Err(e) => return Err(Error::Decode(e)),
			}
		}
	}

	/// Decode the next message unless the stream is closed.
	pub async fn decode_maybe<T: Decode + Debug>(&mut self) -> Result<Option<T>, Error> {
		match self.closed().await {
			Ok(()) => Ok(None),
			Err(Error::Decode(DecodeError::ExpectedEnd)) => Ok(Some(self.decode().await?)),
			Err(e) => Err(e),
		}
	}

	/// Append exactly the given number of bytes to `dest`, across as many chunks as needed.
	pub async fn read_into(&mut self, dest: &mut BytesMut, mut size: usize) -> Result<(), Error> {
		loop {
			let available = size.min(self.buffer.len());
			dest.extend_from_slice(&self.buffer[..available]);
			self.buffer.advance(available);
			size -= available;

			if size == 0 {
				return Ok(());
			}

			if self.stream.read_buf(&mut self.buffer).await?.is_none() {
				return Err(DecodeError::Short.into());
			}
		}
	}

	/// Wait until the stream is closed, erroring if there are any additional bytes.
	pub async fn closed(&mut self) -> Result<(), Error> {
		if self.buffer.is_empty() && self.stream.read_buf(&mut self.buffer).await?.is_none() {
			return Ok(());
		}

		Err(DecodeError::ExpectedEnd.into())
	}

	/// Abort the stream with the given error.
	pub fn abort(&mut self, err: &Error) {
		self.stream.stop(err.to_code());
	}
}
