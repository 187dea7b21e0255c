// src/core/protocol/resp_frame.rs

//! RESP2 frames and the `tokio_util` codec that moves them over a store connection.
//!
//! Clients only ever write command arrays, but the encoder handles every frame type
//! so the same codec can drive the in-process test servers.

use crate::core::SpinelQError;
use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

const CRLF: &[u8] = b"\r\n";

// Upper bounds on what a reply may declare, so a corrupt length prefix cannot
// make the decoder reserve unbounded memory or recurse without end.
const MAX_ARRAY_LEN: usize = 1_024 * 1_024;
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;
const MAX_NESTING: usize = 128;

/// A single RESP2 value as it appears on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum RespFrame {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Bytes),
    Null,
    NullArray,
    Array(Vec<RespFrame>),
}

impl RespFrame {
    /// Builds a command array from its name and arguments.
    pub fn command<I, A>(args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Bytes>,
    {
        RespFrame::Array(
            args.into_iter()
                .map(|arg| RespFrame::BulkString(arg.into()))
                .collect(),
        )
    }

    /// Returns the textual payload of a simple or bulk string reply.
    pub fn as_text(&self) -> Option<String> {
        match self {
            RespFrame::SimpleString(s) => Some(s.clone()),
            RespFrame::BulkString(b) => Some(String::from_utf8_lossy(b).into_owned()),
            _ => None,
        }
    }

    /// Returns true if this is a `+OK` style acknowledgement.
    pub fn is_ok(&self) -> bool {
        matches!(self, RespFrame::SimpleString(s) if s.eq_ignore_ascii_case("OK"))
    }
}

/// Encodes and decodes `RespFrame`s on a byte stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct RespFrameCodec;

impl Encoder<RespFrame> for RespFrameCodec {
    type Error = SpinelQError;

    fn encode(&mut self, item: RespFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        write_frame(&item, dst);
        Ok(())
    }
}

fn write_line(dst: &mut BytesMut, prefix: u8, body: &[u8]) {
    dst.reserve(body.len() + 3);
    dst.extend_from_slice(&[prefix]);
    dst.extend_from_slice(body);
    dst.extend_from_slice(CRLF);
}

fn write_frame(frame: &RespFrame, dst: &mut BytesMut) {
    match frame {
        RespFrame::SimpleString(s) => write_line(dst, b'+', s.as_bytes()),
        RespFrame::Error(s) => write_line(dst, b'-', s.as_bytes()),
        RespFrame::Integer(i) => write_line(dst, b':', i.to_string().as_bytes()),
        RespFrame::BulkString(b) => {
            write_line(dst, b'$', b.len().to_string().as_bytes());
            dst.extend_from_slice(b);
            dst.extend_from_slice(CRLF);
        }
        RespFrame::Null => dst.extend_from_slice(b"$-1\r\n"),
        RespFrame::NullArray => dst.extend_from_slice(b"*-1\r\n"),
        RespFrame::Array(items) => {
            write_line(dst, b'*', items.len().to_string().as_bytes());
            for item in items {
                write_frame(item, dst);
            }
        }
    }
}

impl Decoder for RespFrameCodec {
    type Item = RespFrame;
    type Error = SpinelQError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let mut cursor = Cursor { buf: &src[..], pos: 0 };
        match cursor.frame(0) {
            Ok(frame) => {
                let consumed = cursor.pos;
                src.advance(consumed);
                Ok(Some(frame))
            }
            // A partial frame stays in the buffer until more bytes arrive.
            Err(SpinelQError::IncompleteData) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// A read position over a borrowed buffer. Nothing is consumed from the
/// underlying `BytesMut` until a whole frame has been parsed.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn frame(&mut self, depth: usize) -> Result<RespFrame, SpinelQError> {
        if depth > MAX_NESTING {
            return Err(SpinelQError::Protocol("reply nested too deeply".into()));
        }
        let Some(&tag) = self.buf.get(self.pos) else {
            return Err(SpinelQError::IncompleteData);
        };
        self.pos += 1;

        match tag {
            b'+' => Ok(RespFrame::SimpleString(self.text_line()?)),
            b'-' => Ok(RespFrame::Error(self.text_line()?)),
            b':' => Ok(RespFrame::Integer(self.integer_line()?)),
            b'$' => self.bulk(),
            b'*' => self.array(depth),
            other => Err(SpinelQError::Protocol(format!(
                "unexpected type byte 0x{other:02x}"
            ))),
        }
    }

    fn line(&mut self) -> Result<&'a [u8], SpinelQError> {
        let rest = &self.buf[self.pos..];
        let end = rest
            .windows(CRLF.len())
            .position(|w| w == CRLF)
            .ok_or(SpinelQError::IncompleteData)?;
        self.pos += end + CRLF.len();
        Ok(&rest[..end])
    }

    fn text_line(&mut self) -> Result<String, SpinelQError> {
        Ok(String::from_utf8_lossy(self.line()?).into_owned())
    }

    fn integer_line(&mut self) -> Result<i64, SpinelQError> {
        let line = self.line()?;
        std::str::from_utf8(line)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                SpinelQError::Protocol(format!(
                    "invalid integer '{}'",
                    String::from_utf8_lossy(line)
                ))
            })
    }

    fn bulk(&mut self) -> Result<RespFrame, SpinelQError> {
        let len = self.integer_line()?;
        if len == -1 {
            return Ok(RespFrame::Null);
        }
        let len = usize::try_from(len)
            .ok()
            .filter(|l| *l <= MAX_BULK_LEN)
            .ok_or_else(|| SpinelQError::Protocol(format!("invalid bulk length {len}")))?;

        let rest = &self.buf[self.pos..];
        if rest.len() < len + CRLF.len() {
            return Err(SpinelQError::IncompleteData);
        }
        if &rest[len..len + CRLF.len()] != CRLF {
            return Err(SpinelQError::Protocol(
                "bulk string not terminated by CRLF".into(),
            ));
        }
        self.pos += len + CRLF.len();
        Ok(RespFrame::BulkString(Bytes::copy_from_slice(&rest[..len])))
    }

    fn array(&mut self, depth: usize) -> Result<RespFrame, SpinelQError> {
        let len = self.integer_line()?;
        if len == -1 {
            return Ok(RespFrame::NullArray);
        }
        let len = usize::try_from(len)
            .ok()
            .filter(|l| *l <= MAX_ARRAY_LEN)
            .ok_or_else(|| SpinelQError::Protocol(format!("invalid array length {len}")))?;

        // Cap the up-front reservation; the declared length is untrusted.
        let mut items = Vec::with_capacity(len.min(64));
        for _ in 0..len {
            items.push(self.frame(depth + 1)?);
        }
        Ok(RespFrame::Array(items))
    }
}
