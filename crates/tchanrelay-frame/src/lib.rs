//! Frame codec for a multiplexed RPC protocol.
//!
//! Every frame carries a 16-byte header:
//! - a 2-byte big-endian total size (header included)
//! - a 1-byte message type
//! - a 4-byte big-endian message id scoping the frame to one call
//!
//! The relay only ever rewrites the id; payloads pass through untouched.
//! The [`call`] module parses just enough of the payload to route a call
//! (service name, fragment flag) and to synthesize error and init frames.

pub mod call;
pub mod codec;
pub mod error;
pub mod message;
pub mod reader;
pub mod writer;

pub use call::{
    CallRequest, CallResponse, ErrorCode, ErrorPayload, InitPayload, CALL_FLAG_MORE_FRAGMENTS,
    INIT_HOST_PORT, INIT_PROCESS_NAME, INIT_VERSION, TRACING_SIZE,
};
pub use codec::{
    decode_frame, encode_frame, Frame, FrameConfig, FrameHeader, HEADER_SIZE, MAX_FRAME_SIZE,
};
pub use error::{FrameError, Result};
pub use message::MessageType;
pub use reader::FrameReader;
pub use writer::FrameWriter;
