//! Wire protocol: frame model and incremental decoder.
//!
//! The decrypting proxy process sends a stream of frames, each an ASCII
//! header line followed by raw payload bytes:
//!
//! ```text
//! <timestamp>:<local_port>:<kind>:<payload_length>\n<payload_length raw bytes>
//! ```

mod decoder;
mod frame;

pub use decoder::FrameDecoder;
pub use frame::{
    encode_frame, ChunkKind, Frame, FrameClass, PayloadChunk, PayloadKind, MAX_PAYLOAD_SIZE,
};
