use crate::{
	coding::{Extensions, Versions},
	sync::BytesPoolConfig,
};

/// Options for a [crate::Session].
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SessionConfig {
	/// Offered by a client, or accepted by a server, in order of preference.
	pub versions: Versions,

	/// Sent to the peer during the handshake.
	pub extensions: Extensions,

	/// Limits for the buffers used to write frames.
	pub pool: BytesPoolConfig,
}
