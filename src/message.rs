//! Control message framing
//!
//! Bytes `0..4` carry the message kind as a little-endian `u32`; the body
//! follows. The body length is not stored: the handler knows how much to
//! read for each kind.

use crate::error::{ProbeError, Result};

/// Size of the kind prefix
pub const KIND_LEN: usize = 4;

/// A decoded view of a control request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message<'a> {
    pub kind: u32,
    pub body: &'a [u8],
}

impl<'a> Message<'a> {
    pub fn new(kind: u32, body: &'a [u8]) -> Self {
        Self { kind, body }
    }

    /// Split a raw request into kind and body; `None` if shorter than the prefix
    pub fn decode(raw: &'a [u8]) -> Option<Self> {
        let kind = read_kind(raw)?;
        Some(Self {
            kind,
            body: &raw[KIND_LEN..],
        })
    }

    pub fn encoded_len(&self) -> usize {
        KIND_LEN + self.body.len()
    }

    /// Write the framed message into `out`, returning the bytes used
    pub fn encode_into(&self, out: &mut [u8]) -> Result<usize> {
        let len = self.encoded_len();
        if len > out.len() {
            return Err(ProbeError::BufferOverflow {
                max: out.len(),
                got: len,
            });
        }
        out[..KIND_LEN].copy_from_slice(&self.kind.to_le_bytes());
        out[KIND_LEN..len].copy_from_slice(self.body);
        Ok(len)
    }
}

#[inline]
fn read_kind(raw: &[u8]) -> Option<u32> {
    let prefix: [u8; KIND_LEN] = raw.get(..KIND_LEN)?.try_into().ok()?;
    Some(u32::from_le_bytes(prefix))
}
