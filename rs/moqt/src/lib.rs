//! # moqt: Media over QUIC Transport
//!
//! `moqt` is a transport engine for live media: session handshake, broadcast discovery,
//! track subscriptions with live-updatable parameters, and ordered group/frame delivery,
//! multiplexed over the streams of any [web_transport_trait::Session].
//!
//! ## API
//!
//! Everything is scoped by a [Context], which cancels its descendants:
//! - [Session]: owns one connection, derived from the caller's context.
//! - [TrackReader] / [TrackWriter]: one subscription, derived from the session.
//! - [GroupReader] / [GroupWriter]: one group stream, derived from the subscription.
//!
//! To publish, register a [TrackHandler] on a [TrackMux] with [TrackMux::publish] and pass the mux to
//! [Session::connect] or [Session::accept]. Every subscription for the broadcast is handed to the handler,
//! which writes groups with [TrackWriter::open_group] and frames with [GroupWriter::write_frame].
//!
//! To consume:
//! - [Session::announced] to discover the peer's broadcasts under a [TrackPrefix].
//! - [Session::subscribe] to get a [TrackReader] for a specific track.
//! - [TrackReader::accept_group] to receive the next group.
//! - [GroupReader::read_frame] to read each frame in the group.

mod announce;
mod config;
mod context;
mod error;
mod group;
mod mux;
mod path;
mod session;
mod subscribe;
mod track;

pub mod coding;
pub mod message;
pub mod sync;

#[cfg(test)]
mod mock;

pub use announce::*;
pub use config::*;
pub use context::*;
pub use error::*;
pub use group::*;
pub use mux::*;
pub use path::*;
pub use session::*;
pub use subscribe::*;
pub use track::*;
