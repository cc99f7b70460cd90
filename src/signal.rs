//! Cross-process binary signals
//!
//! A [`Signal`] is one `u32` in its own named shared memory region. Setting
//! it stores `1` and wakes futex waiters; a waiter consumes it by swapping
//! it back to `0`. A pulse therefore stays pending until the peer picks it
//! up, which is what keeps the request/response rendezvous from losing or
//! duplicating wakeups.
//!
//! The [`Doorbell`] is a per-session wake counter. Request signals ring it
//! whenever they are set, so the host can sleep on a single futex word while
//! watching several signals at once.

use crate::error::Result;
use crate::futex::{self, WaitResult};
use crate::shm::SharedRegion;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const CLEAR: u32 = 0;
const SET: u32 = 1;

/// Size of a signal or doorbell region; one cache line
pub const SIGNAL_REGION_SIZE: usize = 64;

fn word(region: &SharedRegion) -> &AtomicU32 {
    // SAFETY: regions are page aligned and at least SIGNAL_REGION_SIZE bytes;
    // the word is only ever accessed atomically.
    unsafe { &*(region.as_ptr() as *const AtomicU32) }
}

/// Session-wide wake counter
pub struct Doorbell {
    region: SharedRegion,
}

impl Doorbell {
    pub fn create(name: &str) -> Result<Self> {
        Ok(Self {
            region: SharedRegion::create(name, SIGNAL_REGION_SIZE)?,
        })
    }

    pub fn open(name: &str) -> Result<Self> {
        Ok(Self {
            region: SharedRegion::open_at_least(name, std::mem::size_of::<AtomicU32>())?,
        })
    }

    /// Bump the counter and wake whoever sleeps on it
    pub fn ring(&self) -> Result<()> {
        let epoch = word(&self.region);
        epoch.fetch_add(1, Ordering::Release);
        futex::wake_all(epoch)?;
        Ok(())
    }

    /// Block until `poll` yields a value
    ///
    /// `poll` runs after the counter is sampled, so a ring between the poll
    /// and the futex wait makes the wait return at once.
    pub fn wait_for<T, F>(&self, mut poll: F) -> Result<T>
    where
        F: FnMut() -> Option<T>,
    {
        let epoch = word(&self.region);
        loop {
            let seen = epoch.load(Ordering::Acquire);
            if let Some(value) = poll() {
                return Ok(value);
            }
            futex::wait(epoch, seen, None)?;
        }
    }

    pub fn name(&self) -> &str {
        self.region.name()
    }
}

/// Named cross-process binary signal
pub struct Signal {
    region: SharedRegion,
    doorbell: Option<Arc<Doorbell>>,
}

impl Signal {
    /// Create the signal, initially clear
    ///
    /// Pass a doorbell for signals the host watches in its wait-any.
    pub fn create(name: &str, doorbell: Option<Arc<Doorbell>>) -> Result<Self> {
        Ok(Self {
            region: SharedRegion::create(name, SIGNAL_REGION_SIZE)?,
            doorbell,
        })
    }

    pub fn open(name: &str, doorbell: Option<Arc<Doorbell>>) -> Result<Self> {
        Ok(Self {
            region: SharedRegion::open_at_least(name, std::mem::size_of::<AtomicU32>())?,
            doorbell,
        })
    }

    #[inline]
    fn state(&self) -> &AtomicU32 {
        word(&self.region)
    }

    /// Raise the signal
    ///
    /// Release ordering publishes every buffer write made before the call.
    pub fn set(&self) -> Result<()> {
        self.state().store(SET, Ordering::Release);
        futex::wake_all(self.state())?;
        if let Some(doorbell) = &self.doorbell {
            doorbell.ring()?;
        }
        Ok(())
    }

    /// Deliver one edge to the peer; it stays pending until consumed
    #[inline]
    pub fn pulse(&self) -> Result<()> {
        self.set()
    }

    #[inline]
    pub fn clear(&self) {
        self.state().store(CLEAR, Ordering::Release);
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.state().load(Ordering::Acquire) == SET
    }

    /// Consume a pending edge, returning whether there was one
    #[inline]
    pub fn take(&self) -> bool {
        self.state().swap(CLEAR, Ordering::AcqRel) == SET
    }

    /// Wait for the signal and consume it
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<bool> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if self.take() {
                return Ok(true);
            }
            let remaining = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return Ok(false);
                    }
                    Some(d - now)
                }
                None => None,
            };
            if futex::wait(self.state(), CLEAR, remaining)? == WaitResult::TimedOut
                && self.take()
            {
                return Ok(true);
            }
        }
    }

    pub fn name(&self) -> &str {
        self.region.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn name(tag: &str) -> String {
        format!("venom_probe_test_sig_{}_{}", tag, std::process::id())
    }

    #[test]
    fn test_pulse_before_wait_is_not_lost() {
        let owner = Signal::create(&name("early"), None).unwrap();
        let peer = Signal::open(&name("early"), None).unwrap();

        owner.pulse().unwrap();
        assert!(peer.wait(Some(Duration::from_secs(1))).unwrap());
        // Consumed exactly once
        assert!(!peer.is_set());
        assert!(!peer.wait(Some(Duration::from_millis(10))).unwrap());
    }

    #[test]
    fn test_wait_across_threads() {
        let owner = Signal::create(&name("threads"), None).unwrap();
        let waiter = thread::spawn({
            let n = name("threads");
            move || {
                let peer = Signal::open(&n, None).unwrap();
                peer.wait(Some(Duration::from_secs(5))).unwrap()
            }
        });

        thread::sleep(Duration::from_millis(20));
        owner.set().unwrap();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_clear_drops_pending_edge() {
        let sig = Signal::create(&name("clear"), None).unwrap();
        sig.set().unwrap();
        assert!(sig.is_set());
        sig.clear();
        assert!(!sig.take());
    }

    #[test]
    fn test_doorbell_wakes_wait_for() {
        let bell = Arc::new(Doorbell::create(&name("bell")).unwrap());
        let sig = Signal::create(&name("belled"), Some(Arc::clone(&bell))).unwrap();

        let host = thread::spawn({
            let bell = Arc::clone(&bell);
            let peer_name = name("belled");
            move || {
                let peer = Signal::open(&peer_name, None).unwrap();
                bell.wait_for(|| peer.is_set().then_some(())).unwrap();
                peer.take()
            }
        });

        thread::sleep(Duration::from_millis(20));
        sig.set().unwrap();
        assert!(host.join().unwrap());
    }
}
