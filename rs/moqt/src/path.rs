use std::fmt;

use crate::{coding::*, Error};

/// The absolute path of a broadcast, always starting with `/`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
pub struct BroadcastPath(String);

impl BroadcastPath {
	pub fn new(path: impl Into<String>) -> Result<Self, Error> {
		let path = path.into();
		if !path.starts_with('/') {
			return Err(Error::InvalidPath(path));
		}

		Ok(Self(path))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn has_prefix(&self, prefix: &TrackPrefix) -> bool {
		self.0.starts_with(prefix.as_str())
	}

	/// Strip the prefix, returning the remaining suffix.
	pub fn suffix(&self, prefix: &TrackPrefix) -> Result<&str, Error> {
		self.0
			.strip_prefix(prefix.as_str())
			.ok_or_else(|| Error::PrefixMismatch {
				path: self.0.clone(),
				prefix: prefix.0.clone(),
			})
	}
}

impl fmt::Display for BroadcastPath {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.fmt(f)
	}
}

impl TryFrom<String> for BroadcastPath {
	type Error = Error;

	fn try_from(path: String) -> Result<Self, Error> {
		Self::new(path)
	}
}

impl TryFrom<&str> for BroadcastPath {
	type Error = Error;

	fn try_from(path: &str) -> Result<Self, Error> {
		Self::new(path)
	}
}

impl From<BroadcastPath> for String {
	fn from(path: BroadcastPath) -> Self {
		path.0
	}
}

impl Encode for BroadcastPath {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) {
		self.as_str().encode(w)
	}
}

impl Decode for BroadcastPath {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		Self::new(String::decode(r)?).map_err(|_| DecodeError::InvalidValue)
	}
}

/// A prefix used to discover broadcasts, always starting and ending with `/`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
pub struct TrackPrefix(String);

impl TrackPrefix {
	pub fn new(prefix: impl Into<String>) -> Result<Self, Error> {
		let prefix = prefix.into();
		if !prefix.starts_with('/') || !prefix.ends_with('/') {
			return Err(Error::InvalidPrefix(prefix));
		}

		Ok(Self(prefix))
	}

	/// The prefix that matches every broadcast.
	pub fn root() -> Self {
		Self("/".to_string())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Append a suffix, producing the absolute path.
	pub fn join(&self, suffix: &str) -> Result<BroadcastPath, Error> {
		BroadcastPath::new(format!("{}{}", self.0, suffix))
	}
}

impl fmt::Display for TrackPrefix {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.fmt(f)
	}
}

impl TryFrom<String> for TrackPrefix {
	type Error = Error;

	fn try_from(prefix: String) -> Result<Self, Error> {
		Self::new(prefix)
	}
}

impl TryFrom<&str> for TrackPrefix {
	type Error = Error;

	fn try_from(prefix: &str) -> Result<Self, Error> {
		Self::new(prefix)
	}
}

impl From<TrackPrefix> for String {
	fn from(prefix: TrackPrefix) -> Self {
		prefix.0
	}
}

impl Encode for TrackPrefix {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) {
		self.as_str().encode(w)
	}
}

impl Decode for TrackPrefix {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		Self::new(String::decode(r)?).map_err(|_| DecodeError::InvalidValue)
	}
}
