use bytes::Bytes;

use crate::{coding::*, message::Message, SubscribeId};

/// The header of every group stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Group {
	pub subscribe_id: SubscribeId,
	/// Assigned by the publisher and never validated.
	pub sequence: u64,
}

impl Message for Group {
	fn decode_msg<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(Self {
			subscribe_id: SubscribeId::decode(r)?,
			sequence: u64::decode(r)?,
		})
	}

	fn encode_msg<W: bytes::BufMut>(&self, w: &mut W) {
		self.subscribe_id.encode(w);
		self.sequence.encode(w);
	}
}

/// The largest frame we're willing to buffer.
pub const MAX_FRAME_SIZE: usize = 1 << 30;

/// A length-delimited payload inside a group.
///
/// Unlike control messages, the length prefix is the payload itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
	pub payload: Bytes,
}

impl Encode for Frame {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) {
		self.payload.encode(w)
	}
}

impl Decode for Frame {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(Self {
			payload: Bytes::decode(r)?,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn group() {
		let msg = Group {
			subscribe_id: SubscribeId(3),
			sequence: 64,
		};

		let encoded = msg.encode_bytes();
		assert_eq!(encoded.as_ref(), &[0x03, 0x03, 0x40, 0x40]);

		let mut buf = encoded;
		assert_eq!(Group::decode(&mut buf).unwrap(), msg);
	}

	#[test]
	fn frame() {
		let frame = Frame {
			payload: Bytes::from_static(&[72, 69, 76, 76, 79]),
		};

		let encoded = frame.encode_bytes();
		assert_eq!(encoded.as_ref(), &[5, 72, 69, 76, 76, 79]);
	}
}
