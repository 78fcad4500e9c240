use std::sync::Arc;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::coding;

/// A transport error that can be shared between tasks.
pub trait SendSyncError: std::error::Error + Send + Sync {}

impl<T> SendSyncError for T where T: std::error::Error + Send + Sync {}

/// A list of possible errors that can occur during the session.
#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
	#[error("transport error: {0}")]
	Transport(Arc<dyn SendSyncError>),

	#[error("decode error: {0}")]
	Decode(#[from] coding::DecodeError),

	#[error("unsupported versions: client={0:?} server={1:?}")]
	Version(coding::Versions, coding::Versions),

	#[error("stream error: {0}")]
	Stream(#[from] StreamError),

	/// The context was cancelled without a more specific cause.
	#[error("cancelled")]
	Cancel,

	#[error("closed")]
	Closed,

	#[error("timeout")]
	Timeout,

	#[error("invalid path: {0:?}")]
	InvalidPath(String),

	#[error("invalid prefix: {0:?}")]
	InvalidPrefix(String),

	#[error("path {path:?} does not match prefix {prefix:?}")]
	PrefixMismatch { path: String, prefix: String },

	#[error("duplicate announcement: {0:?}")]
	Duplicate(String),

	#[error("unknown announcement: {0:?}")]
	UnknownAnnouncement(String),

	#[error("unexpected stream type: {0}")]
	UnexpectedStream(u8),

	#[error("track not found")]
	NotFound,

	#[error("unknown subscribe id: {0}")]
	UnknownSubscribe(u64),

	#[error("invalid group range")]
	InvalidRange,
}

impl Error {
	/// An integer code that is sent over the wire.
	pub fn to_code(&self) -> u32 {
		match self {
			Self::Stream(err) => err.code,
			Self::Cancel | Self::Closed => SessionErrorCode::NoError.into(),
			Self::Transport(_) => SessionErrorCode::Internal.into(),
			Self::Timeout => SessionErrorCode::GoAwayTimeout.into(),
			Self::NotFound => SubscribeErrorCode::TrackNotFound.into(),
			Self::UnknownSubscribe(_) => GroupErrorCode::InvalidSubscribeId.into(),
			Self::InvalidRange => SubscribeErrorCode::InvalidRange.into(),
			Self::InvalidPrefix(_) | Self::PrefixMismatch { .. } => AnnounceErrorCode::InvalidPrefix.into(),
			Self::Duplicate(_) => AnnounceErrorCode::DuplicatedAnnounce.into(),
			Self::UnknownAnnouncement(_) => AnnounceErrorCode::InvalidAnnounceStatus.into(),
			Self::Decode(_) | Self::Version(..) | Self::InvalidPath(_) | Self::UnexpectedStream(_) => {
				SessionErrorCode::ProtocolViolation.into()
			}
		}
	}
}

/// An error carried by a closed or reset stream.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("code={code} message={message:?} remote={remote}")]
pub struct StreamError {
	pub code: u32,
	pub message: String,
	/// True if the peer closed the stream.
	pub remote: bool,
}

impl StreamError {
	pub fn new(code: impl Into<u32>, message: impl Into<String>) -> Self {
		Self {
			code: code.into(),
			message: message.into(),
			remote: false,
		}
	}

	pub fn remote(code: impl Into<u32>, message: impl Into<String>) -> Self {
		Self {
			remote: true,
			..Self::new(code, message)
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum SessionErrorCode {
	NoError = 0x00,
	Internal = 0x01,
	Unauthorized = 0x02,
	ProtocolViolation = 0x03,
	DuplicateTrackAlias = 0x04,
	ParameterLengthMismatch = 0x05,
	TooManySubscribers = 0x06,
	GoAwayTimeout = 0x10,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum AnnounceErrorCode {
	Internal = 0x00,
	DuplicatedAnnounce = 0x01,
	InvalidAnnounceStatus = 0x02,
	Uninterested = 0x03,
	BannedPrefix = 0x04,
	InvalidPrefix = 0x05,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum SubscribeErrorCode {
	Internal = 0x00,
	InvalidRange = 0x01,
	DuplicateSubscribeId = 0x02,
	TrackNotFound = 0x03,
	Unauthorized = 0x04,
	Timeout = 0x05,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum GroupErrorCode {
	Internal = 0x00,
	OutOfRange = 0x02,
	ExpiredGroup = 0x03,
	SubscribeCanceled = 0x04,
	PublishAborted = 0x05,
	ClosedSession = 0x06,
	InvalidSubscribeId = 0x07,
}
