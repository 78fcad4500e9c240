//! The wire encoding: QUIC varints, length-prefixed strings and bytes, and the stream wrappers.
mod decode;
mod encode;
mod extensions;
mod reader;
mod stream;
mod varint;
mod version;
mod writer;

pub use decode::*;
pub use encode::*;
pub use extensions::*;
pub use reader::*;
pub use stream::*;
pub use varint::*;
pub use version::*;
pub use writer::*;
