//! Protocol layer for the RPC transport.
//!
//! This module contains the wire definitions:
//! - Request, reply and error envelopes
//! - Frame types and the length-prefixed frame codec
//! - The CBOR codec used for wire primitives

pub mod codec;
pub mod framing;
pub mod message;

pub use framing::{Frame, FrameCodec, FrameType};
pub use message::{ErrorCode, ErrorInfo, ReplyEnvelope, RequestEnvelope};
