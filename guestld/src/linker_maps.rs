//
// Copyright (c) Memfault, Inc.
// See License.txt for details
//! Process-wide registry of the well-known guest address ranges.
//!
//! A bootstrap shim populates a [`LinkerMaps`] at [`LINKER_MAPS_ADDR`]
//! during initial process setup. Loader instances never dereference that
//! address themselves; they receive a [`LoaderContext`] and go through it,
//! so tests (and alternative embeddings) can supply an ordinary struct
//! instead.

use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(target_pointer_width = "64")] {
        /// Where the bootstrap shim publishes the registry.
        pub const LINKER_MAPS_ADDR: usize = 0x0048_0000;
        /// Instruction pointers below this limit belong to the main
        /// program text and are always allowed by the syscall filter.
        pub const LOW_TEXT_LIMIT: usize = 0x0050_0000;
        /// Base of the trusted loader/guest window.
        pub const PRELINKER_ADDR: usize = 0x6000_0000_0000;
    } else {
        pub const LINKER_MAPS_ADDR: usize = 0x0030_0000;
        pub const LOW_TEXT_LIMIT: usize = 0x0040_0000;
        pub const PRELINKER_ADDR: usize = 0x6000_0000;
    }
}

/// Well-known base addresses and sizes shared between sibling loaders.
///
/// The byte layout is a contiguous sequence of machine words; the shim and
/// every loader in the process must agree on this exact definition.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct LinkerMaps {
    pub prelinker_addr: usize,
    pub prelinker_size: usize,
    pub host_linker_addr: usize,
    pub host_linker_size: usize,
    pub guest_linker_addr: usize,
    pub guest_linker_size: usize,
    pub guest_libc_addr: usize,
    pub guest_libc_size: usize,
    pub host_libs_addr: usize,
    pub host_libs_size: usize,
    /// End of the trusted window; zero until the first well-known
    /// placement extends it.
    pub last_addr: usize,
}

impl LinkerMaps {
    /// End of the trusted instruction-pointer window
    /// `[PRELINKER_ADDR, last_addr)`.
    pub fn trusted_end(&self) -> usize {
        self.last_addr
    }

    /// Records the placement of the guest libc and grows the trusted
    /// window to cover it.
    pub fn record_guest_libc(&mut self, base: usize, size: usize) {
        self.guest_libc_addr = base;
        self.guest_libc_size = size;
        if self.last_addr < base + size {
            self.last_addr = base + size;
        }
    }
}

/// Handle to the process-wide loader state, passed by reference into every
/// core operation.
pub struct LoaderContext<'m> {
    maps: &'m mut LinkerMaps,
}

impl<'m> LoaderContext<'m> {
    pub fn new(maps: &'m mut LinkerMaps) -> Self {
        Self { maps }
    }

    /// Adopts the registry the bootstrap shim wrote at the well-known
    /// address.
    ///
    /// # Safety
    /// The shim must have initialised a `LinkerMaps` at
    /// [`LINKER_MAPS_ADDR`] before any loader runs, and no other handle to
    /// it may be live.
    pub unsafe fn from_bootstrap() -> LoaderContext<'static> {
        LoaderContext {
            maps: &mut *(LINKER_MAPS_ADDR as *mut LinkerMaps),
        }
    }

    pub fn maps(&self) -> &LinkerMaps {
        self.maps
    }

    pub fn maps_mut(&mut self) -> &mut LinkerMaps {
        self.maps
    }

    /// Whether the one-shot syscall filter is already in place. Set the
    /// moment the trusted-window cursor first advances.
    pub fn seccomp_installed(&self) -> bool {
        self.maps.last_addr != 0
    }
}
