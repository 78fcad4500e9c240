use crate::{coding::*, message::Message};

/// Sent by the client to start the session.
#[derive(Debug, Clone)]
pub struct SessionClient {
	pub versions: Versions,
	pub extensions: Extensions,
}

impl Message for SessionClient {
	fn decode_msg<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		let versions = Versions::decode(r)?;
		let extensions = Extensions::decode(r)?;

		Ok(Self { versions, extensions })
	}

	fn encode_msg<W: bytes::BufMut>(&self, w: &mut W) {
		self.versions.encode(w);
		self.extensions.encode(w);
	}
}

/// Sent by the server with the selected version.
#[derive(Debug, Clone)]
pub struct SessionServer {
	pub version: Version,
	pub extensions: Extensions,
}

impl Message for SessionServer {
	fn decode_msg<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		let version = Version::decode(r)?;
		let extensions = Extensions::decode(r)?;

		Ok(Self { version, extensions })
	}

	fn encode_msg<W: bytes::BufMut>(&self, w: &mut W) {
		self.version.encode(w);
		self.extensions.encode(w);
	}
}

/// Sent by either side on the session stream after setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionUpdate {
	/// The estimated bitrate in bits per second.
	pub bitrate: u64,
}

impl Message for SessionUpdate {
	fn decode_msg<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		let bitrate = u64::decode(r)?;
		Ok(Self { bitrate })
	}

	fn encode_msg<W: bytes::BufMut>(&self, w: &mut W) {
		self.bitrate.encode(w);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn setup() {
		let mut extensions = Extensions::default();
		extensions.set_string(1, "moqt-rs");

		let client = SessionClient {
			versions: [Version(1), Version::DEVELOP].into(),
			extensions: extensions.clone(),
		};

		let mut buf = client.encode_bytes();
		let decoded = SessionClient::decode(&mut buf).unwrap();
		assert_eq!(decoded.versions, client.versions);
		assert_eq!(decoded.extensions, extensions);

		let server = SessionServer {
			version: Version::DEVELOP,
			extensions: Extensions::default(),
		};

		let mut buf = server.encode_bytes();
		let decoded = SessionServer::decode(&mut buf).unwrap();
		assert_eq!(decoded.version, Version::DEVELOP);
		assert!(decoded.extensions.is_empty());
	}
}
