// src/core/protocol/mod.rs

//! The RESP2 wire format spoken by SpinelQ's store clients.

pub mod resp_frame;
pub use resp_frame::{RespFrame, RespFrameCodec};
