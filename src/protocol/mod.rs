//! Event-stream wire protocol: frame encoding and incremental parsing.

pub mod frame;
pub mod parser;

pub use frame::{encode_ping, Frame, FrameEvent, FramePayload};
pub use parser::{frame_stream, parse_block, FrameHandler, FrameParser, ParsedFrame, Transcript};
