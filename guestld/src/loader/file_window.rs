//
// Copyright (c) Memfault, Inc.
// See License.txt for details
use std::os::unix::io::RawFd;
use std::slice::from_raw_parts;

use nix::errno::Errno;

use crate::loader::error::{LoadError, Result};
use crate::util::page::{page_end, PAGE_SIZE};

/// A read-only private mapping of a sub-range of a file.
///
/// Callers ask for arbitrary `(offset, size)` ranges; the window maps the
/// enclosing page range and exposes the requested bytes at `ptr()`. The
/// raw (outer) range is what gets unmapped on drop.
#[derive(Debug)]
pub struct FileWindow {
    user_ptr: *const u8,
    user_size: usize,
    raw_ptr: *mut libc::c_void,
    raw_size: usize,
}

impl FileWindow {
    pub fn map(fd: RawFd, offset: u64, size: usize) -> Result<Self> {
        let delta = (offset % PAGE_SIZE as u64) as usize;
        let raw_offset = offset - delta as u64;
        let raw_size = page_end(size + delta);
        let raw_ptr = unsafe {
            libc::mmap64(
                std::ptr::null_mut(),
                raw_size,
                libc::PROT_READ,
                libc::MAP_PRIVATE,
                fd,
                raw_offset as libc::off64_t,
            )
        };
        if raw_ptr == libc::MAP_FAILED {
            return Err(LoadError::Io {
                op: "mmap",
                errno: Errno::last(),
            });
        }
        Ok(Self {
            user_ptr: unsafe { raw_ptr.cast::<u8>().add(delta) },
            user_size: size,
            raw_ptr,
            raw_size,
        })
    }

    pub fn ptr(&self) -> *const u8 {
        self.user_ptr
    }

    pub fn size(&self) -> usize {
        self.user_size
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { from_raw_parts(self.user_ptr, self.user_size) }
    }
}

impl Drop for FileWindow {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.raw_ptr, self.raw_size);
        }
    }
}
