use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{coding::*, message::Message, TrackPrefix};

/// Sent by the subscriber to request announcements under a prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnnouncePlease {
	pub prefix: TrackPrefix,
}

impl Message for AnnouncePlease {
	fn decode_msg<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		let prefix = TrackPrefix::decode(r)?;
		Ok(Self { prefix })
	}

	fn encode_msg<W: bytes::BufMut>(&self, w: &mut W) {
		self.prefix.encode(w)
	}
}

/// Sent by the publisher in response to [AnnouncePlease] with the currently active suffixes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnnounceInit {
	pub suffixes: Vec<String>,
}

impl Message for AnnounceInit {
	fn decode_msg<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		let count = u64::decode(r)?;

		// Don't allocate more than 1024 elements upfront
		let mut suffixes = Vec::with_capacity(count.min(1024) as usize);

		for _ in 0..count {
			suffixes.push(String::decode(r)?);
		}

		Ok(Self { suffixes })
	}

	fn encode_msg<W: bytes::BufMut>(&self, w: &mut W) {
		self.suffixes.len().encode(w);
		for suffix in &self.suffixes {
			suffix.encode(w);
		}
	}
}

/// Sent by the publisher when a broadcast under the prefix starts or ends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Announce {
	pub suffix: String,
	pub active: bool,
}

impl Message for Announce {
	fn decode_msg<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		let status = AnnounceStatus::decode(r)?;
		let suffix = String::decode(r)?;

		Ok(Self {
			suffix,
			active: status == AnnounceStatus::Active,
		})
	}

	fn encode_msg<W: bytes::BufMut>(&self, w: &mut W) {
		match self.active {
			true => AnnounceStatus::Active.encode(w),
			false => AnnounceStatus::Ended.encode(w),
		}
		self.suffix.encode(w);
	}
}

/// Send by the publisher, used to determine the message that follows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
enum AnnounceStatus {
	Ended = 0,
	Active = 1,
}

impl Decode for AnnounceStatus {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		let status = u8::decode(r)?;
		status.try_into().map_err(|_| DecodeError::InvalidValue)
	}
}

impl Encode for AnnounceStatus {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) {
		u8::from(*self).encode(w)
	}
}

#[cfg(test)]
mod tests {
	use bytes::Bytes;

	use super::*;

	#[test]
	fn announce() {
		let msg = Announce {
			suffix: "alice".to_string(),
			active: true,
		};

		let encoded = msg.encode_bytes();
		assert_eq!(encoded.as_ref(), b"\x07\x01\x05alice");

		let mut buf = encoded;
		assert_eq!(Announce::decode(&mut buf).unwrap(), msg);
	}

	#[test]
	fn invalid_status() {
		let mut buf = Bytes::from_static(b"\x07\x02\x05alice");
		assert!(matches!(Announce::decode(&mut buf), Err(DecodeError::InvalidValue)));
	}

	#[test]
	fn init() {
		let empty = AnnounceInit { suffixes: vec![] }.encode_bytes();
		assert_eq!(empty.as_ref(), &[0x01, 0x00]);

		let msg = AnnounceInit {
			suffixes: vec!["alice".to_string(), "bob".to_string()],
		};
		let mut buf = msg.encode_bytes();
		assert_eq!(AnnounceInit::decode(&mut buf).unwrap(), msg);
	}
}
