//! C Bindings for the agent side
//!
//! Lets a native in-process agent attach to a session and talk to the host.
//! Functions returning `isize` report byte counts, or `-1` on failure.

use crate::agent::AgentSession;
use crate::channel::CHANNEL_CAPACITY;
use crate::config::SessionConfig;
use crate::names::SessionKey;
use std::ffi::CStr;
use std::os::raw::c_char;
use std::ptr;
use std::slice;

// Opaque handle
pub struct VenomProbeAgentHandle(AgentSession);

unsafe fn bytes<'a>(data: *const u8, len: usize) -> &'a [u8] {
    if data.is_null() || len == 0 {
        &[]
    } else {
        slice::from_raw_parts(data, len)
    }
}

unsafe fn bytes_mut<'a>(data: *mut u8, len: usize) -> &'a mut [u8] {
    if data.is_null() || len == 0 {
        &mut []
    } else {
        slice::from_raw_parts_mut(data, len)
    }
}

fn into_handle(agent: crate::Result<AgentSession>) -> *mut VenomProbeAgentHandle {
    match agent {
        Ok(agent) => Box::into_raw(Box::new(VenomProbeAgentHandle(agent))),
        Err(e) => {
            tracing::warn!(error = %e, "agent failed to attach");
            ptr::null_mut()
        }
    }
}

/// Capacity of one channel buffer in bytes
#[no_mangle]
pub extern "C" fn venom_probe_capacity() -> usize {
    CHANNEL_CAPACITY
}

/// Attach to the session named by `key`, using default resource names
///
/// # Safety
/// key must be a valid null-terminated string
#[no_mangle]
pub unsafe extern "C" fn venom_probe_agent_open(key: *const c_char) -> *mut VenomProbeAgentHandle {
    if key.is_null() {
        return ptr::null_mut();
    }
    let key = match CStr::from_ptr(key).to_str() {
        Ok(s) => s,
        Err(_) => return ptr::null_mut(),
    };
    into_handle(
        SessionKey::parse(key).and_then(|key| AgentSession::open(key, &SessionConfig::default())),
    )
}

/// Attach to the session named by the process environment
#[no_mangle]
pub extern "C" fn venom_probe_agent_open_from_env() -> *mut VenomProbeAgentHandle {
    into_handle(AgentSession::from_env(&SessionConfig::default()))
}

/// Destroy an agent handle
///
/// # Safety
/// handle must come from one of the open functions and not be used afterwards
#[no_mangle]
pub unsafe extern "C" fn venom_probe_agent_destroy(handle: *mut VenomProbeAgentHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

/// Send a control message; copies the first reply chunk into `reply`
///
/// # Safety
/// handle must be live; body/reply must be valid for their lengths
#[no_mangle]
pub unsafe extern "C" fn venom_probe_agent_send_message(
    handle: *mut VenomProbeAgentHandle,
    kind: u32,
    body: *const u8,
    body_len: usize,
    reply: *mut u8,
    reply_len: usize,
) -> isize {
    if handle.is_null() {
        return -1;
    }
    let agent = &mut (*handle).0;
    match agent.send_message(kind, bytes(body, body_len), bytes_mut(reply, reply_len)) {
        Ok(n) => n as isize,
        Err(_) => -1,
    }
}

/// Request the next chunk of a chunked reply
///
/// # Safety
/// handle must be live; reply must be valid for reply_len bytes
#[no_mangle]
pub unsafe extern "C" fn venom_probe_agent_next_chunk(
    handle: *mut VenomProbeAgentHandle,
    reply: *mut u8,
    reply_len: usize,
) -> isize {
    if handle.is_null() {
        return -1;
    }
    let agent = &mut (*handle).0;
    match agent.next_chunk(bytes_mut(reply, reply_len)) {
        Ok(n) => n as isize,
        Err(_) => -1,
    }
}

/// Publish one telemetry block (at most `venom_probe_capacity()` bytes)
///
/// # Safety
/// handle must be live; data must be valid for len bytes
#[no_mangle]
pub unsafe extern "C" fn venom_probe_agent_send_telemetry(
    handle: *mut VenomProbeAgentHandle,
    data: *const u8,
    len: usize,
) -> bool {
    if handle.is_null() {
        return false;
    }
    let agent = &mut (*handle).0;
    agent.send_telemetry(bytes(data, len)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    #[test]
    fn test_open_rejects_bad_input() {
        unsafe {
            assert!(venom_probe_agent_open(ptr::null()).is_null());
            let bad = CString::new("not/a/key").unwrap();
            assert!(venom_probe_agent_open(bad.as_ptr()).is_null());
            // Well-formed key, but no host created the session
            let missing = CString::new("DEADBEEF").unwrap();
            assert!(venom_probe_agent_open(missing.as_ptr()).is_null());
            assert!(!venom_probe_agent_send_telemetry(ptr::null_mut(), ptr::null(), 0));
        }
        assert_eq!(venom_probe_capacity(), 65536);
    }
}
