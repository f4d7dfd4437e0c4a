//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! POSIX shared-memory snapshot transport (spec §4.6, §6): an 8-byte
//! little-endian length header followed by JPEG bytes, guarded by a named
//! semaphore. `nix` owns the shared-memory object, `memmap2` the mapping,
//! and raw `libc` calls the named semaphore (neither `nix` nor any
//! higher-level crate in the retrieved corpus wraps POSIX named
//! semaphores).

use anyhow::{bail, Context, Result};
use log::{error, warn};
use memmap2::MmapMut;
use nix::sys::mman::{shm_open, shm_unlink};
use nix::sys::stat::Mode;
use nix::unistd::ftruncate;
use std::ffi::CString;
use std::fs::File;
use std::os::fd::OwnedFd;

const LENGTH_HEADER_BYTES: usize = 8;

pub struct ShmSink {
    name: String,
    sem_name: String,
    size: usize,
    mmap: MmapMut,
    _file: File,
    sem: *mut libc::sem_t,
}

// SAFETY: the semaphore and mapping are only ever touched through `&mut
// self`, one sink per device; `*mut sem_t` has no interior aliasing beyond
// what POSIX guarantees across processes.
unsafe impl Send for ShmSink {}

impl ShmSink {
    pub fn create(name: &str, size: usize) -> Result<Self> {
        if size <= LENGTH_HEADER_BYTES {
            bail!("shared-memory snapshot size must exceed the 8-byte length header");
        }
        let mode = Mode::from_bits_truncate(0o777);
        let fd: OwnedFd = shm_open(
            name,
            nix::fcntl::OFlag::O_CREAT | nix::fcntl::OFlag::O_RDWR,
            mode,
        )
        .with_context(|| format!("shm_open({name})"))?;
        ftruncate(&fd, size as i64).with_context(|| format!("ftruncate({name}, {size})"))?;
        let file = File::from(fd);
        let mmap = unsafe { MmapMut::map_mut(&file) }.context("mmap shared-memory object")?;

        let sem_name_str = format!("{name}-sem");
        let sem_name = CString::new(sem_name_str.clone()).context("semaphore name contains a NUL byte")?;
        let sem = unsafe {
            libc::sem_open(
                sem_name.as_ptr(),
                libc::O_CREAT,
                0o666u32,
                1u32,
            )
        };
        if sem == libc::SEM_FAILED {
            bail!("sem_open({sem_name_str}) failed: {}", std::io::Error::last_os_error());
        }

        Ok(Self {
            name: name.to_string(),
            sem_name: sem_name_str,
            size,
            mmap,
            _file: file,
            sem,
        })
    }

    /// `sem_wait → memcpy length → memcpy bytes → sem_post` (spec §4.6).
    /// Oversize payloads are logged and skipped rather than truncated.
    pub fn publish(&mut self, jpeg: &[u8]) {
        if jpeg.len() > self.size - LENGTH_HEADER_BYTES {
            warn!(
                "shm snapshot '{}': payload {} bytes exceeds capacity {}, skipping",
                self.name,
                jpeg.len(),
                self.size - LENGTH_HEADER_BYTES
            );
            return;
        }
        if unsafe { libc::sem_wait(self.sem) } != 0 {
            error!("shm snapshot '{}': sem_wait failed: {}", self.name, std::io::Error::last_os_error());
            return;
        }
        self.mmap[..LENGTH_HEADER_BYTES].copy_from_slice(&(jpeg.len() as u64).to_le_bytes());
        self.mmap[LENGTH_HEADER_BYTES..LENGTH_HEADER_BYTES + jpeg.len()].copy_from_slice(jpeg);
        if unsafe { libc::sem_post(self.sem) } != 0 {
            error!("shm snapshot '{}': sem_post failed: {}", self.name, std::io::Error::last_os_error());
        }
    }
}

impl Drop for ShmSink {
    fn drop(&mut self) {
        unsafe {
            libc::sem_close(self.sem);
        }
        if let Ok(sem_name) = CString::new(self.sem_name.clone()) {
            unsafe {
                libc::sem_unlink(sem_name.as_ptr());
            }
        }
        if let Err(e) = shm_unlink(self.name.as_str()) {
            error!("shm snapshot '{}': shm_unlink failed: {e}", self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_size_not_exceeding_header() {
        let err = ShmSink::create("/sentrymesh-test-too-small", 4).unwrap_err();
        assert!(err.to_string().contains("8-byte length header"));
    }
}
