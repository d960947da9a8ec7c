//
// Copyright (c) Memfault, Inc.
// See License.txt for details
use std::os::unix::io::RawFd;

use nix::errno::Errno;

/// Positional read that transparently retries on EINTR. Returns the byte
/// count the kernel produced; callers decide whether a short count is an
/// error.
pub fn pread(fd: RawFd, buf: &mut [u8], offset: u64) -> Result<usize, Errno> {
    loop {
        let rc = unsafe {
            libc::pread64(
                fd,
                buf.as_mut_ptr().cast(),
                buf.len(),
                offset as libc::off64_t,
            )
        };
        if rc >= 0 {
            return Ok(rc as usize);
        }
        let errno = Errno::last();
        if errno != Errno::EINTR {
            return Err(errno);
        }
    }
}

/// Writes the whole buffer, retrying on EINTR and resuming partial writes.
pub fn write_all(fd: RawFd, mut buf: &[u8]) -> Result<(), Errno> {
    while !buf.is_empty() {
        let rc = unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) };
        if rc < 0 {
            let errno = Errno::last();
            if errno == Errno::EINTR {
                continue;
            }
            return Err(errno);
        }
        buf = &buf[rc as usize..];
    }
    Ok(())
}
