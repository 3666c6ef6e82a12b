//! TCP transport layer.
//!
//! Submodules:
//! - `framing`: newline-delimited JSON frames over byte streams
//! - `listener`: port-scanning bind and the connection accept loop

pub mod framing;
pub mod listener;

pub use framing::{DEFAULT_MAX_FRAME_BYTES, FrameCodec, FrameError, MessageReader, encode_frame};
pub use listener::{accept_loop, bind_with_fallback};
