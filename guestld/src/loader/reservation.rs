//
// Copyright (c) Memfault, Inc.
// See License.txt for details
use log::{debug, error};
use nix::errno::Errno;

use crate::linker_maps::LoaderContext;
use crate::loader::error::{LoadError, Result};
use crate::seccomp::{self, SyscallPolicy};

/// Placement policy for the address-space reservation of one image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReservationPolicy {
    /// Kernel chooses the placement.
    None,
    /// Preferred address; the kernel is free to place elsewhere.
    Hint { addr: usize, size: usize },
    /// Caller-owned range the image must fit into.
    Fixed { addr: usize, size: usize },
    /// Placement comes from the process-wide registry when the name
    /// designates a well-known library.
    WellKnownName(String),
}

/// An anonymous PROT_NONE range covering the image's load extent. Later
/// fixed-address segment mappings carve it up; the whole range is released
/// in one unmap on drop.
#[derive(Debug)]
pub struct Reservation {
    base: usize,
    size: usize,
}

impl Reservation {
    pub fn base(&self) -> usize {
        self.base
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.size);
        }
    }
}

/// Reserves address space for `load_size` bytes according to `policy`.
///
/// When the well-known-name rule fires, records the placement in the
/// registry and installs the process syscall filter the first time the
/// trusted-window cursor advances. Filter installation failure is fatal.
pub(crate) fn reserve_address_space(
    name: &str,
    policy: &ReservationPolicy,
    load_size: usize,
    ctx: &mut LoaderContext,
) -> Result<Reservation> {
    if load_size == 0 {
        return Err(LoadError::NoLoadable);
    }

    let reservation = match policy {
        ReservationPolicy::Fixed { addr, size } => {
            if *size < load_size {
                return Err(LoadError::ReservationTooSmall {
                    have: *size,
                    need: load_size,
                });
            }
            mmap_reserve(*addr, load_size, true)?
        }
        ReservationPolicy::Hint { addr, .. } => mmap_reserve(*addr, load_size, false)?,
        ReservationPolicy::WellKnownName(well_known) if well_known.ends_with("libc.so") => {
            mmap_reserve(ctx.maps().guest_libc_addr, load_size, false)?
        }
        ReservationPolicy::WellKnownName(_) | ReservationPolicy::None => {
            mmap_reserve(0, load_size, false)?
        }
    };
    debug!(
        "\"{}\" reserved 0x{:x} bytes at 0x{:x}",
        name,
        reservation.size(),
        reservation.base()
    );

    if let ReservationPolicy::WellKnownName(well_known) = policy {
        if well_known.ends_with("libc.so") {
            let filter_installed = ctx.seccomp_installed();
            ctx.maps_mut()
                .record_guest_libc(reservation.base(), reservation.size());
            if !filter_installed {
                let filter = SyscallPolicy::guest_default(ctx.maps());
                if let Err(errno) = seccomp::install(&filter) {
                    // The process must not keep running with guest code
                    // mapped but unfiltered.
                    error!(
                        "\"{}\" {}",
                        name,
                        LoadError::SeccompInstallFailed { errno }
                    );
                    std::process::abort();
                }
            }
        }
    }

    Ok(reservation)
}

fn mmap_reserve(hint: usize, size: usize, fixed: bool) -> Result<Reservation> {
    let mut flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
    if fixed {
        flags |= libc::MAP_FIXED;
    }
    let base = unsafe {
        libc::mmap64(
            hint as *mut libc::c_void,
            size,
            libc::PROT_NONE,
            flags,
            -1,
            0,
        )
    };
    if base == libc::MAP_FAILED {
        return Err(LoadError::Io {
            op: "mmap",
            errno: Errno::last(),
        });
    }
    Ok(Reservation {
        base: base as usize,
        size,
    })
}
