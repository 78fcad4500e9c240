use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::coding::*;

/// The first byte of every bidirectional stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum BiStreamType {
	Session = 0x00,
	Announce = 0x01,
	Subscribe = 0x02,
}

impl Encode for BiStreamType {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) {
		u8::from(*self).encode(w)
	}
}

/// The first byte of every unidirectional stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum UniStreamType {
	Group = 0x00,
}

impl Encode for UniStreamType {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) {
		u8::from(*self).encode(w)
	}
}
