//! Process-shared futex wait/wake on words living in shared memory
//!
//! The private flag is never used: waiters and wakers sit in different
//! processes mapping the same page.

use crate::error::{ProbeError, Result};
use rustix::io::Errno;
use rustix::thread::{futex, FutexFlags, FutexOperation, Timespec};
use std::io;
use std::ptr;
use std::sync::atomic::AtomicU32;
use std::time::Duration;

/// Outcome of a futex wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// Woken, interrupted, or the word no longer held the expected value
    Woken,
    /// The timeout elapsed first
    TimedOut,
}

/// Block while `word` still holds `expected`
///
/// Returns immediately if the value already differs, so a wake that lands
/// between the caller's check and this call is never lost.
pub fn wait(word: &AtomicU32, expected: u32, timeout: Option<Duration>) -> Result<WaitResult> {
    let ts = timeout.map(|t| Timespec {
        tv_sec: t.as_secs().min(i64::MAX as u64) as _,
        tv_nsec: t.subsec_nanos() as _,
    });
    let ts_ptr = ts.as_ref().map_or(ptr::null(), |t| t as *const Timespec);

    // SAFETY: `word` is a valid, aligned u32 for the duration of the call and
    // `ts_ptr` is null or points at `ts`, which outlives the call
    let rc = unsafe {
        futex(
            word.as_ptr(),
            FutexOperation::Wait,
            FutexFlags::empty(),
            expected,
            ts_ptr,
            ptr::null_mut(),
            0,
        )
    };
    match rc {
        Ok(_) => Ok(WaitResult::Woken),
        Err(Errno::AGAIN) | Err(Errno::INTR) => Ok(WaitResult::Woken),
        Err(Errno::TIMEDOUT) => Ok(WaitResult::TimedOut),
        Err(e) => Err(ProbeError::Futex(io::Error::from(e))),
    }
}

/// Wake every waiter blocked on `word`
pub fn wake_all(word: &AtomicU32) -> Result<usize> {
    // SAFETY: `word` is a valid, aligned u32 for the duration of the call
    unsafe {
        futex(
            word.as_ptr(),
            FutexOperation::Wake,
            FutexFlags::empty(),
            i32::MAX as u32,
            ptr::null(),
            ptr::null_mut(),
            0,
        )
    }
    .map_err(|e| ProbeError::Futex(io::Error::from(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_wait_returns_when_value_differs() {
        let word = AtomicU32::new(7);
        assert_eq!(wait(&word, 3, None).unwrap(), WaitResult::Woken);
    }

    #[test]
    fn test_wait_times_out() {
        let word = AtomicU32::new(0);
        let res = wait(&word, 0, Some(Duration::from_millis(20))).unwrap();
        assert_eq!(res, WaitResult::TimedOut);
    }

    #[test]
    fn test_wake_releases_waiter() {
        let word = Arc::new(AtomicU32::new(0));
        let waiter = {
            let word = Arc::clone(&word);
            thread::spawn(move || {
                while word.load(Ordering::Acquire) == 0 {
                    wait(&word, 0, Some(Duration::from_secs(5))).unwrap();
                }
            })
        };

        thread::sleep(Duration::from_millis(10));
        word.store(1, Ordering::Release);
        wake_all(&word).unwrap();
        waiter.join().unwrap();
    }
}
