// Based on quinn-proto's VarInt.
use std::{convert::TryFrom, fmt};

use thiserror::Error;

use super::{Decode, DecodeError, Encode};

/// The value is too large to be encoded as a varint.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Error)]
#[error("value out of range")]
pub struct BoundsExceeded;

/// An integer less than 2^62, encoded in 1, 2, 4 or 8 bytes.
///
/// The two most significant bits of the first byte encode the length.
#[derive(Default, Copy, Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct VarInt(u64);

impl VarInt {
	/// The largest representable value.
	pub const MAX: Self = Self((1 << 62) - 1);

	/// The smallest representable value.
	pub const ZERO: Self = Self(0);

	/// Construct a `VarInt` infallibly using the largest available type.
	pub const fn from_u32(x: u32) -> Self {
		Self(x as u64)
	}

	/// Extract the integer value.
	pub const fn into_inner(self) -> u64 {
		self.0
	}

	/// The number of bytes used by the encoding.
	pub const fn size(self) -> usize {
		let x = self.0;
		if x < 1 << 6 {
			1
		} else if x < 1 << 14 {
			2
		} else if x < 1 << 30 {
			4
		} else {
			8
		}
	}
}

impl From<VarInt> for u64 {
	fn from(x: VarInt) -> Self {
		x.0
	}
}

impl From<u8> for VarInt {
	fn from(x: u8) -> Self {
		Self(x.into())
	}
}

impl From<u16> for VarInt {
	fn from(x: u16) -> Self {
		Self(x.into())
	}
}

impl From<u32> for VarInt {
	fn from(x: u32) -> Self {
		Self(x.into())
	}
}

impl TryFrom<u64> for VarInt {
	type Error = BoundsExceeded;

	/// Succeeds iff `x` < 2^62
	fn try_from(x: u64) -> Result<Self, BoundsExceeded> {
		if x <= Self::MAX.into_inner() {
			Ok(Self(x))
		} else {
			Err(BoundsExceeded)
		}
	}
}

impl TryFrom<usize> for VarInt {
	type Error = BoundsExceeded;

	fn try_from(x: usize) -> Result<Self, BoundsExceeded> {
		Self::try_from(x as u64)
	}
}

impl TryFrom<VarInt> for usize {
	type Error = BoundsExceeded;

	fn try_from(x: VarInt) -> Result<Self, BoundsExceeded> {
		usize::try_from(x.0).map_err(|_| BoundsExceeded)
	}
}

impl fmt::Debug for VarInt {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.fmt(f)
	}
}

impl fmt::Display for VarInt {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.fmt(f)
	}
}

impl Decode for VarInt {
	/// Decode a varint from the given reader.
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		if !r.has_remaining() {
			return Err(DecodeError::Short);
		}

		let tag = r.chunk()[0] >> 6;
		let size = 1usize << tag;

		if r.remaining() < size {
			return Err(DecodeError::Short);
		}

		let x = match size {
			1 => (r.get_u8() & 0b0011_1111) as u64,
			2 => (r.get_u16() & 0x3fff) as u64,
			4 => (r.get_u32() & 0x3fff_ffff) as u64,
			_ => r.get_u64() & 0x3fff_ffff_ffff_ffff,
		};

		Ok(Self(x))
	}
}

impl Encode for VarInt {
	/// Encode a varint to the given writer, using the smallest possible size.
	fn encode<W: bytes::BufMut>(&self, w: &mut W) {
		let x = self.0;
		match self.size() {
			1 => w.put_u8(x as u8),
			2 => w.put_u16((0b01 << 14) | x as u16),
			4 => w.put_u32((0b10 << 30) | x as u32),
			_ => w.put_u64((0b11 << 62) | x),
		}
	}
}

impl Encode for u64 {
	/// Encode a varint to the given writer.
	///
	/// Panics if the value is 2^62 or larger.
	fn encode<W: bytes::BufMut>(&self, w: &mut W) {
		VarInt::try_from(*self).expect("varint too large").encode(w)
	}
}

impl Decode for u64 {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		VarInt::decode(r).map(|v| v.into_inner())
	}
}

impl Encode for usize {
	/// Encode a varint to the given writer.
	fn encode<W: bytes::BufMut>(&self, w: &mut W) {
		(*self as u64).encode(w)
	}
}

impl Decode for usize {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(usize::try_from(VarInt::decode(r)?)?)
	}
}
