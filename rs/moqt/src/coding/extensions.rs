use std::collections::{hash_map, HashMap};

use crate::coding::*;

const MAX_EXTENSIONS: u64 = 64;

/// Setup extensions, keyed by a varint with a byte array value.
///
/// Typed accessors encode numbers as 8 little-endian bytes and booleans as a single byte.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Extensions {
	entries: HashMap<u64, Vec<u8>>,
}

impl Decode for Extensions {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		let mut entries = HashMap::new();

		let count = u64::decode(r)?;
		if count > MAX_EXTENSIONS {
			return Err(DecodeError::TooMany);
		}

		for _ in 0..count {
			let key = u64::decode(r)?;
			match entries.entry(key) {
				hash_map::Entry::Occupied(_) => return Err(DecodeError::Duplicate),
				hash_map::Entry::Vacant(entry) => entry.insert(Vec::<u8>::decode(r)?),
			};
		}

		Ok(Self { entries })
	}
}

impl Encode for Extensions {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) {
		self.entries.len().encode(w);

		for (key, value) in self.entries.iter() {
			key.encode(w);
			value.encode(w);
		}
	}
}

impl Extensions {
	pub fn get_bytes(&self, key: u64) -> Option<&[u8]> {
		self.entries.get(&key).map(|v| v.as_slice())
	}

	pub fn set_bytes(&mut self, key: u64, value: Vec<u8>) {
		self.entries.insert(key, value);
	}

	pub fn get_string(&self, key: u64) -> Result<Option<String>, DecodeError> {
		match self.get_bytes(key) {
			Some(value) => Ok(Some(String::from_utf8(value.to_vec())?)),
			None => Ok(None),
		}
	}

	pub fn set_string(&mut self, key: u64, value: impl Into<String>) {
		self.set_bytes(key, value.into().into_bytes());
	}

	pub fn get_u64(&self, key: u64) -> Result<Option<u64>, DecodeError> {
		let Some(value) = self.get_bytes(key) else {
			return Ok(None);
		};

		let value: [u8; 8] = value.try_into().map_err(|_| DecodeError::InvalidValue)?;
		Ok(Some(u64::from_le_bytes(value)))
	}

	pub fn set_u64(&mut self, key: u64, value: u64) {
		self.set_bytes(key, value.to_le_bytes().to_vec());
	}

	pub fn get_bool(&self, key: u64) -> Result<Option<bool>, DecodeError> {
		match self.get_bytes(key) {
			None => Ok(None),
			Some([0]) => Ok(Some(false)),
			Some([1]) => Ok(Some(true)),
			Some(_) => Err(DecodeError::InvalidValue),
		}
	}

	pub fn set_bool(&mut self, key: u64, value: bool) {
		self.set_bytes(key, vec![value as u8]);
	}

	pub fn remove(&mut self, key: u64) -> Option<Vec<u8>> {
		self.entries.remove(&key)
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}
