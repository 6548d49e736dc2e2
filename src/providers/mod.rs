//! Frame source implementations
//!
//! - [`ByteStreamProvider`] extracts frames from any `AsyncRead`
//! - [`DecoderProvider`] spawns the external decoder and reads its stdout
//! - [`ReplayProvider`] streams a recorded MJPEG byte file

pub mod decoder;
pub mod replay;
pub mod stream;

pub use decoder::{DecoderCommand, DecoderProvider};
pub use replay::ReplayProvider;
pub use stream::ByteStreamProvider;
