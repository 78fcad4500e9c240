use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{coding::*, message::Message, BroadcastPath, SubscribeId};

/// Sent by the subscriber to request a track.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subscribe {
	pub subscribe_id: SubscribeId,
	pub broadcast_path: BroadcastPath,
	pub track_name: String,
	pub track_priority: u8,
	pub min_group_sequence: u64,
	pub max_group_sequence: u64,
}

impl Message for Subscribe {
	fn decode_msg<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(Self {
			subscribe_id: SubscribeId::decode(r)?,
			broadcast_path: BroadcastPath::decode(r)?,
			track_name: String::decode(r)?,
			track_priority: decode_priority(r)?,
			min_group_sequence: u64::decode(r)?,
			max_group_sequence: u64::decode(r)?,
		})
	}

	fn encode_msg<W: bytes::BufMut>(&self, w: &mut W) {
		self.subscribe_id.encode(w);
		self.broadcast_path.encode(w);
		self.track_name.encode(w);
		(self.track_priority as u64).encode(w);
		self.min_group_sequence.encode(w);
		self.max_group_sequence.encode(w);
	}
}

/// Sent by the publisher once it accepts the subscription.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SubscribeOk {
	pub group_order: GroupOrder,
}

impl Message for SubscribeOk {
	fn decode_msg<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(Self {
			group_order: GroupOrder::decode(r)?,
		})
	}

	fn encode_msg<W: bytes::BufMut>(&self, w: &mut W) {
		self.group_order.encode(w);
	}
}

/// Sent by the subscriber to change the parameters of an existing subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubscribeUpdate {
	pub track_priority: u8,
	pub min_group_sequence: u64,
	pub max_group_sequence: u64,
}

impl Message for SubscribeUpdate {
	fn decode_msg<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(Self {
			track_priority: decode_priority(r)?,
			min_group_sequence: u64::decode(r)?,
			max_group_sequence: u64::decode(r)?,
		})
	}

	fn encode_msg<W: bytes::BufMut>(&self, w: &mut W) {
		(self.track_priority as u64).encode(w);
		self.min_group_sequence.encode(w);
		self.max_group_sequence.encode(w);
	}
}

fn decode_priority<R: bytes::Buf>(r: &mut R) -> Result<u8, DecodeError> {
	u8::try_from(u64::decode(r)?).map_err(|_| DecodeError::BoundsExceeded(BoundsExceeded))
}

/// The order in which the publisher delivers groups.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum GroupOrder {
	#[default]
	Default = 0,
	Ascending = 1,
	Descending = 2,
}

impl Decode for GroupOrder {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		let order = u64::decode(r)?;
		u8::try_from(order)
			.ok()
			.and_then(|order| Self::try_from(order).ok())
			.ok_or(DecodeError::InvalidValue)
	}
}

impl Encode for GroupOrder {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) {
		(u8::from(*self) as u64).encode(w)
	}
}

#[cfg(test)]
mod tests {
	use bytes::Bytes;

	use super::*;

	#[test]
	fn subscribe() {
		let msg = Subscribe {
			subscribe_id: SubscribeId(0),
			broadcast_path: BroadcastPath::new("/alice").unwrap(),
			track_name: "video".to_string(),
			track_priority: 1,
			min_group_sequence: 0,
			max_group_sequence: 100,
		};

		let encoded = msg.encode_bytes();
		assert_eq!(encoded.as_ref(), b"\x12\x00\x06/alice\x05video\x01\x00\x40\x64");

		let mut buf = encoded;
		assert_eq!(Subscribe::decode(&mut buf).unwrap(), msg);
	}

	#[test]
	fn priority_out_of_range() {
		let mut buf = Bytes::from_static(&[0x04, 0x41, 0x00, 0x00, 0x00]);
		assert!(matches!(
			SubscribeUpdate::decode(&mut buf),
			Err(DecodeError::BoundsExceeded(_))
		));
	}

	#[test]
	fn group_order() {
		let mut buf = SubscribeOk {
			group_order: GroupOrder::Descending,
		}
		.encode_bytes();
		assert_eq!(buf.as_ref(), &[0x01, 0x02]);
		assert_eq!(SubscribeOk::decode(&mut buf).unwrap().group_order, GroupOrder::Descending);

		let mut buf = Bytes::from_static(&[0x01, 0x03]);
		assert!(matches!(SubscribeOk::decode(&mut buf), Err(DecodeError::InvalidValue)));
	}
}
