//! The typed control messages, each prefixed with its varint body length.
mod announce;
mod group;
mod session;
mod stream;
mod subscribe;

pub use announce::*;
pub use group::*;
pub use session::*;
pub use stream::*;
pub use subscribe::*;

use bytes::{Buf, BytesMut};

use crate::coding::*;

/// A control message, encoded with a varint length prefix.
pub trait Message: Sized {
	fn decode_msg<R: Buf>(r: &mut R) -> Result<Self, DecodeError>;
	fn encode_msg<W: bytes::BufMut>(&self, w: &mut W);
}

impl<T: Message> Encode for T {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) {
		let mut body = BytesMut::new();
		self.encode_msg(&mut body);

		body.len().encode(w);
		w.put_slice(&body);
	}
}

impl<T: Message> Decode for T {
	fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
		let size = usize::decode(r)?;
		if r.remaining() < size {
			return Err(DecodeError::Short);
		}

		let mut body = r.copy_to_bytes(size);

		// The whole body is buffered, so running out of bytes is malformed rather than short.
		let msg = Self::decode_msg(&mut body).map_err(|err| match err {
			DecodeError::Short => DecodeError::InvalidValue,
			err => err,
		})?;

		if body.has_remaining() {
			return Err(DecodeError::Long);
		}

		Ok(msg)
	}
}
