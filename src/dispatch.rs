//! Dispatch loop: services control and telemetry requests until the target exits

use crate::channel::{Channel, CHANNEL_CAPACITY};
use crate::error::{ProbeError, Result};
use crate::handler::MessageHandler;
use crate::launch::TargetExit;
use crate::message::{Message, KIND_LEN};
use crate::queue::{PendingQueue, TelemetryBlock};
use crate::session::Session;
use crate::signal::Doorbell;
use parking_lot::Mutex;

/// What woke the dispatch loop
///
/// When several are ready at once they are serviced in declaration order,
/// so requests already raised are drained before the exit is acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    ControlRequest,
    TelemetryRequest,
    TargetExited,
}

/// Counters for one dispatch run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    pub control_messages: u64,
    pub chunks_sent: u64,
    pub telemetry_blocks: u64,
}

/// The handler's window onto one control request
///
/// Borrows the host's working buffer for the duration of a single
/// `standard_message` call; nothing obtained from it outlives the call.
pub struct Exchange<'a> {
    kind: u32,
    read_len: usize,
    working: &'a mut [u8],
    channel: &'a Channel,
    doorbell: &'a Doorbell,
    exit: &'a TargetExit,
    chunks_sent: u64,
}

impl<'a> Exchange<'a> {
    pub(crate) fn new(
        working: &'a mut [u8],
        read_len: usize,
        channel: &'a Channel,
        doorbell: &'a Doorbell,
        exit: &'a TargetExit,
    ) -> Self {
        let kind = Message::decode(&working[..read_len]).map_or(0, |m| m.kind);
        Self {
            kind,
            read_len,
            working,
            channel,
            doorbell,
            exit,
            chunks_sent: 0,
        }
    }

    pub fn kind(&self) -> u32 {
        self.kind
    }

    /// The request without its kind prefix
    pub fn body(&self) -> &[u8] {
        Message::decode(&self.working[..self.read_len]).map_or(&[][..], |m| m.body)
    }

    /// The whole working buffer, for writing replies
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut *self.working
    }

    pub fn chunks_sent(&self) -> u64 {
        self.chunks_sent
    }

    /// Deliver the first `write_size` bytes of the working buffer as one
    /// chunk and wait for the target to ask for the next one
    ///
    /// Fails with `TargetExited` if the target dies before asking.
    pub fn send_chunk(&mut self, write_size: usize) -> Result<()> {
        self.channel.buffer().write_from(checked(&*self.working, write_size)?)?;

        // Rearm before releasing the target so its continuation can't be erased
        self.channel.request().clear();
        self.channel.response().pulse()?;

        let request = self.channel.request();
        let exit = self.exit;
        let continued = self.doorbell.wait_for(|| {
            if request.take() {
                Some(true)
            } else if exit.has_exited() {
                Some(false)
            } else {
                None
            }
        })?;
        self.channel.response().clear();

        if !continued {
            tracing::warn!(kind = self.kind, "target exited during chunked reply");
            return Err(ProbeError::TargetExited);
        }
        self.chunks_sent += 1;
        tracing::trace!(kind = self.kind, len = write_size, "chunk delivered");
        Ok(())
    }
}

fn checked(working: &[u8], write_size: usize) -> Result<&[u8]> {
    working.get(..write_size).ok_or(ProbeError::BufferOverflow {
        max: working.len(),
        got: write_size,
    })
}

/// Main-thread event loop over one session
pub struct Dispatcher<'s, H> {
    session: &'s Session,
    exit: &'s TargetExit,
    handler: &'s Mutex<H>,
    queue: &'s PendingQueue,
    working: Vec<u8>,
    stats: DispatchStats,
}

impl<'s, H: MessageHandler> Dispatcher<'s, H> {
    pub fn new(
        session: &'s Session,
        exit: &'s TargetExit,
        handler: &'s Mutex<H>,
        queue: &'s PendingQueue,
    ) -> Self {
        Self {
            session,
            exit,
            handler,
            queue,
            working: vec![0u8; CHANNEL_CAPACITY],
            stats: DispatchStats::default(),
        }
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Block until one of the three events is ready
    pub fn next_event(&self) -> Result<Event> {
        let control = self.session.control().request();
        let telemetry = self.session.telemetry().request();
        let exit = self.exit;
        self.session.doorbell().wait_for(|| {
            if control.is_set() {
                Some(Event::ControlRequest)
            } else if telemetry.is_set() {
                Some(Event::TelemetryRequest)
            } else if exit.has_exited() {
                Some(Event::TargetExited)
            } else {
                None
            }
        })
    }

    /// Run until the target exits or a request can not be serviced
    pub fn run(&mut self) -> Result<DispatchStats> {
        let key = self.session.key();
        tracing::info!(%key, "dispatch loop started");
        loop {
            match self.next_event()? {
                Event::ControlRequest => self.handle_control()?,
                Event::TelemetryRequest => self.handle_telemetry()?,
                Event::TargetExited => break,
            }
        }
        tracing::info!(
            %key,
            messages = self.stats.control_messages,
            blocks = self.stats.telemetry_blocks,
            "dispatch loop stopped: target exited"
        );
        Ok(self.stats)
    }

    fn handle_control(&mut self) -> Result<()> {
        let channel = self.session.control();
        channel.request().clear();

        let mut handler = self.handler.lock();
        let read_len = handler.read_size().clamp(KIND_LEN, CHANNEL_CAPACITY);
        channel.buffer().read_into(&mut self.working[..read_len]);

        let mut exchange = Exchange::new(
            &mut self.working,
            read_len,
            channel,
            self.session.doorbell(),
            self.exit,
        );
        let kind = exchange.kind();
        let final_size = handler.standard_message(kind, &mut exchange)?;
        let chunks = exchange.chunks_sent();
        drop(handler);

        channel.buffer().write_from(checked(&self.working, final_size)?)?;
        channel.response().pulse()?;

        self.stats.control_messages += 1;
        self.stats.chunks_sent += chunks;
        tracing::debug!(kind, len = final_size, chunks, "control message handled");
        Ok(())
    }

    fn handle_telemetry(&mut self) -> Result<()> {
        let mut block = vec![0u8; CHANNEL_CAPACITY];
        self.session.telemetry().accept(&mut block)?;
        self.queue.push(TelemetryBlock::new(block));
        self.stats.telemetry_blocks += 1;
        tracing::trace!(blocks = self.stats.telemetry_blocks, "telemetry block queued");
        Ok(())
    }
}

/// Final read of the telemetry buffer after the loop stopped
///
/// The buffer is always read. A block is queued if its request is still
/// raised, or if the target wrote the buffer but exited before raising it.
/// Every accepted block leaves the buffer zeroed, so a block the loop
/// already delivered is never queued twice. Returns whether a block was
/// queued.
pub fn flush_in_flight(session: &Session, queue: &PendingQueue) -> Result<bool> {
    let telemetry = session.telemetry();
    let mut block = vec![0u8; CHANNEL_CAPACITY];
    let raised = telemetry.request().is_set();
    if raised {
        telemetry.accept(&mut block)?;
    } else {
        if !telemetry.buffer().holds_data(CHANNEL_CAPACITY) {
            return Ok(false);
        }
        telemetry.buffer().read_into(&mut block);
        telemetry.buffer().zero(CHANNEL_CAPACITY);
    }
    queue.push(TelemetryBlock::new(block));
    tracing::debug!(key = %session.key(), raised, "flushed in-flight telemetry block");
    Ok(true)
}
