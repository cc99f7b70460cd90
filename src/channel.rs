//! Shared buffer plus request/response signal pair
//!
//! One request on a channel runs as a two-phase rendezvous:
//!
//! 1. producer writes the payload at offset 0
//! 2. producer sets `request`
//! 3. consumer observes `request` and clears it
//! 4. consumer reads the payload
//! 5. consumer pulses `response`, releasing the producer
//!
//! The producer must not start another request before it has consumed the
//! response pulse. Nothing here enforces that; two concurrent producers on
//! one channel corrupt the buffer.

use crate::error::{ProbeError, Result};
use crate::names::{ResourceNames, ResourceRole};
use crate::shm::SharedRegion;
use crate::signal::{Doorbell, Signal};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Bytes per channel buffer; upper bound for one message or telemetry block
pub const CHANNEL_CAPACITY: usize = 64 * 1024;

/// Which of the session's two channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Control,
    Telemetry,
}

impl ChannelKind {
    fn roles(self) -> (ResourceRole, ResourceRole, ResourceRole) {
        match self {
            ChannelKind::Control => (
                ResourceRole::ControlBuffer,
                ResourceRole::ControlRequest,
                ResourceRole::ControlResponse,
            ),
            ChannelKind::Telemetry => (
                ResourceRole::TelemetryBuffer,
                ResourceRole::TelemetryRequest,
                ResourceRole::TelemetryResponse,
            ),
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Control => f.write_str("control"),
            ChannelKind::Telemetry => f.write_str("telemetry"),
        }
    }
}

/// Fixed-capacity byte buffer in shared memory
pub struct SharedBuffer {
    region: SharedRegion,
    capacity: usize,
}

impl SharedBuffer {
    pub fn create(name: &str, capacity: usize) -> Result<Self> {
        Ok(Self {
            region: SharedRegion::create(name, capacity)?,
            capacity,
        })
    }

    pub fn open(name: &str, capacity: usize) -> Result<Self> {
        Ok(Self {
            region: SharedRegion::open_at_least(name, capacity)?,
            capacity,
        })
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Copy from offset 0 into `dst`; returns the number of bytes copied
    #[inline]
    pub fn read_into(&self, dst: &mut [u8]) -> usize {
        let len = dst.len().min(self.capacity);
        // SAFETY: the region holds `capacity` bytes and the rendezvous gives
        // this side exclusive use of the buffer while it reads
        unsafe {
            std::ptr::copy_nonoverlapping(self.region.as_ptr(), dst.as_mut_ptr(), len);
        }
        len
    }

    /// Copy `src` to offset 0
    #[inline]
    pub fn write_from(&self, src: &[u8]) -> Result<()> {
        if src.len() > self.capacity {
            return Err(ProbeError::BufferOverflow {
                max: self.capacity,
                got: src.len(),
            });
        }
        // SAFETY: bounds checked above; exclusive use per the rendezvous
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), self.region.as_ptr(), src.len());
        }
        Ok(())
    }

    /// Zero the first `len` bytes
    #[inline]
    pub fn zero(&self, len: usize) {
        let len = len.min(self.capacity);
        // SAFETY: bounded by capacity; exclusive use per the rendezvous
        unsafe {
            std::ptr::write_bytes(self.region.as_ptr(), 0, len);
        }
    }

    /// Whether any of the first `len` bytes is non-zero
    pub fn holds_data(&self, len: usize) -> bool {
        let len = len.min(self.capacity);
        // SAFETY: bounded by capacity; the region outlives the borrow
        let bytes = unsafe { std::slice::from_raw_parts(self.region.as_ptr() as *const u8, len) };
        bytes.iter().any(|b| *b != 0)
    }

    pub fn name(&self) -> &str {
        self.region.name()
    }
}

/// One channel of a session: buffer, request signal, response signal
pub struct Channel {
    kind: ChannelKind,
    buffer: SharedBuffer,
    request: Signal,
    response: Signal,
}

impl Channel {
    /// Create the channel's resources (host side)
    pub fn create(names: &ResourceNames, kind: ChannelKind) -> Result<Self> {
        let (buf, req, resp) = kind.roles();
        Ok(Self {
            kind,
            buffer: SharedBuffer::create(&names.name(buf), CHANNEL_CAPACITY)?,
            request: Signal::create(&names.name(req), None)?,
            response: Signal::create(&names.name(resp), None)?,
        })
    }

    /// Open an existing channel (agent side)
    ///
    /// Requests raised through this handle ring the session doorbell.
    pub fn open(names: &ResourceNames, kind: ChannelKind, doorbell: Arc<Doorbell>) -> Result<Self> {
        let (buf, req, resp) = kind.roles();
        Ok(Self {
            kind,
            buffer: SharedBuffer::open(&names.name(buf), CHANNEL_CAPACITY)?,
            request: Signal::open(&names.name(req), Some(doorbell))?,
            response: Signal::open(&names.name(resp), None)?,
        })
    }

    #[inline]
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    #[inline]
    pub fn buffer(&self) -> &SharedBuffer {
        &self.buffer
    }

    #[inline]
    pub fn request(&self) -> &Signal {
        &self.request
    }

    #[inline]
    pub fn response(&self) -> &Signal {
        &self.response
    }

    /// Producer half of one rendezvous: write, signal, wait for the pulse
    ///
    /// Returns `false` if `timeout` elapsed before the response arrived.
    pub fn call(&self, payload: &[u8], timeout: Option<Duration>) -> Result<bool> {
        self.buffer.write_from(payload)?;
        self.request_response(timeout)
    }

    /// Raise `request` and wait for the matching pulse
    ///
    /// A stale pulse left over from an earlier timed-out request is dropped
    /// first so it can not answer this one.
    pub fn request_response(&self, timeout: Option<Duration>) -> Result<bool> {
        self.response.clear();
        self.request.set()?;
        self.response.wait(timeout)
    }

    /// Consumer half of one rendezvous: copy the request out and acknowledge
    ///
    /// The bytes read are zeroed before the producer is released, so a
    /// buffer holding data afterwards was written by a request not yet
    /// accepted.
    pub fn accept(&self, dst: &mut [u8]) -> Result<usize> {
        self.request.clear();
        let len = self.buffer.read_into(dst);
        self.buffer.zero(len);
        self.response.pulse()?;
        Ok(len)
    }
}
