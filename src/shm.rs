//! Low-level POSIX shared memory operations

use crate::error::{ProbeError, Result};
use rustix::fd::OwnedFd;
use rustix::fs::ftruncate;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use rustix::shm::{shm_open, shm_unlink, Mode, ShmOFlags};
use std::ffi::CString;
use std::io;
use std::ptr::NonNull;

/// Longest resource name accepted by `shm_open` (NAME_MAX minus the leading slash)
pub const MAX_NAME_LEN: usize = 254;

/// Handle to a named shared memory region
pub struct SharedRegion {
    // Held so the descriptor behind the mapping lives as long as the handle
    #[allow(dead_code)]
    fd: OwnedFd,
    addr: NonNull<u8>,
    size: usize,
    name: String,
    is_owner: bool,
}

// SAFETY: the mapping stays valid for the handle's lifetime; access to the
// bytes inside is coordinated by the signal protocol built on top.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

fn os_name(name: &str) -> Result<CString> {
    if name.len() > MAX_NAME_LEN {
        return Err(ProbeError::NamespaceTooLong {
            max: MAX_NAME_LEN,
            got: name.len(),
        });
    }
    if name.is_empty() || name.contains('/') {
        return Err(ProbeError::InvalidKey(name.to_string()));
    }
    CString::new(format!("/{}", name)).map_err(|_| ProbeError::InvalidKey(name.to_string()))
}

fn map(fd: &OwnedFd, size: usize) -> Result<NonNull<u8>> {
    // SAFETY: fresh mapping of a shared fd, no existing Rust references alias it
    let addr = unsafe {
        mmap(
            std::ptr::null_mut(),
            size,
            ProtFlags::READ | ProtFlags::WRITE,
            MapFlags::SHARED,
            fd,
            0,
        )
        .map_err(|e| ProbeError::Mmap(e.into()))?
    };

    NonNull::new(addr.cast::<u8>())
        .ok_or_else(|| ProbeError::Mmap(io::Error::new(io::ErrorKind::Other, "mmap returned null")))
}

impl SharedRegion {
    /// Create a new shared memory region
    ///
    /// Creation is exclusive: a name that already exists is an error, never
    /// silently reused, so two sessions can not end up sharing a buffer.
    pub fn create(name: &str, size: usize) -> Result<Self> {
        let c_name = os_name(name)?;

        let fd = shm_open(
            c_name.as_c_str(),
            ShmOFlags::CREATE | ShmOFlags::EXCL | ShmOFlags::RDWR,
            Mode::RUSR | Mode::WUSR,
        )
        .map_err(|e| {
            if e == rustix::io::Errno::EXIST {
                ProbeError::AlreadyExists {
                    name: name.to_string(),
                }
            } else {
                ProbeError::ShmCreate {
                    name: name.to_string(),
                    source: e.into(),
                }
            }
        })?;

        // From here on the name exists; unlink it again if sizing or mapping fails
        let addr = match ftruncate(&fd, size as u64)
            .map_err(|e| ProbeError::Truncate(e.into()))
            .and_then(|_| map(&fd, size))
        {
            Ok(addr) => addr,
            Err(e) => {
                let _ = shm_unlink(c_name.as_c_str());
                return Err(e);
            }
        };

        // SAFETY: `addr` points at `size` freshly mapped bytes
        unsafe {
            std::ptr::write_bytes(addr.as_ptr(), 0, size);
        }

        tracing::trace!(name, size, "created shared region");

        Ok(Self {
            fd,
            addr,
            size,
            name: name.to_string(),
            is_owner: true,
        })
    }

    /// Open an existing shared memory region
    pub fn open(name: &str) -> Result<Self> {
        let c_name = os_name(name)?;

        let fd = shm_open(c_name.as_c_str(), ShmOFlags::RDWR, Mode::empty()).map_err(|e| {
            ProbeError::ShmOpen {
                name: name.to_string(),
                source: e.into(),
            }
        })?;

        // Get size from file
        let stat = rustix::fs::fstat(&fd).map_err(|e| ProbeError::ShmOpen {
            name: name.to_string(),
            source: e.into(),
        })?;
        let size = stat.st_size as usize;
        if size == 0 {
            return Err(ProbeError::RegionTooSmall {
                name: name.to_string(),
                need: 1,
                got: 0,
            });
        }

        let addr = map(&fd, size)?;

        Ok(Self {
            fd,
            addr,
            size,
            name: name.to_string(),
            is_owner: false,
        })
    }

    /// Open an existing region and check it holds at least `need` bytes
    pub fn open_at_least(name: &str, need: usize) -> Result<Self> {
        let region = Self::open(name)?;
        if region.size < need {
            return Err(ProbeError::RegionTooSmall {
                name: name.to_string(),
                need,
                got: region.size,
            });
        }
        Ok(region)
    }

    /// Get raw pointer to shared memory
    #[inline(always)]
    pub fn as_ptr(&self) -> *mut u8 {
        self.addr.as_ptr()
    }

    /// Get size of shared memory region
    #[inline(always)]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Get the name of shared memory
    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if this handle owns (and will unlink) the shared memory
    #[inline(always)]
    pub fn is_owner(&self) -> bool {
        self.is_owner
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        // SAFETY: the mapping was created by this handle with this size
        unsafe {
            let _ = munmap(self.addr.as_ptr().cast(), self.size);
        }

        if self.is_owner {
            if let Ok(c_name) = os_name(&self.name) {
                let _ = shm_unlink(c_name.as_c_str());
            }
            tracing::trace!(name = %self.name, "released shared region");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_open() {
        let name = format!("venom_probe_test_shm_{}", std::process::id());
        let size = 4096;

        let shm1 = SharedRegion::create(&name, size).unwrap();
        assert!(shm1.is_owner());
        assert_eq!(shm1.size(), size);

        unsafe {
            std::ptr::write(shm1.as_ptr(), 42u8);
        }

        // Open from another "process"
        let shm2 = SharedRegion::open(&name).unwrap();
        assert!(!shm2.is_owner());
        assert_eq!(shm2.size(), size);

        let val = unsafe { std::ptr::read(shm2.as_ptr()) };
        assert_eq!(val, 42u8);

        drop(shm2);
        drop(shm1);

        // Owner unlinked the name on drop
        assert!(matches!(
            SharedRegion::open(&name),
            Err(ProbeError::ShmOpen { .. })
        ));
    }

    #[test]
    fn test_create_is_exclusive() {
        let name = format!("venom_probe_test_excl_{}", std::process::id());
        let _first = SharedRegion::create(&name, 64).unwrap();

        match SharedRegion::create(&name, 64) {
            Err(ProbeError::AlreadyExists { name: n }) => assert_eq!(n, name),
            other => panic!("expected AlreadyExists, got {:?}", other.map(|r| r.size())),
        }
    }

    #[test]
    fn test_rejects_bad_names() {
        assert!(matches!(
            SharedRegion::create("has/slash", 64),
            Err(ProbeError::InvalidKey(_))
        ));
        let long = "x".repeat(MAX_NAME_LEN + 1);
        assert!(matches!(
            SharedRegion::create(&long, 64),
            Err(ProbeError::NamespaceTooLong { .. })
        ));
    }

    #[test]
    fn test_open_at_least() {
        let name = format!("venom_probe_test_small_{}", std::process::id());
        let _owner = SharedRegion::create(&name, 128).unwrap();
        assert!(SharedRegion::open_at_least(&name, 128).is_ok());
        assert!(matches!(
            SharedRegion::open_at_least(&name, 4096),
            Err(ProbeError::RegionTooSmall { need: 4096, .. })
        ));
    }
}
